//! Interactive login shell on a PTY channel.

use std::io;

use log::{debug, warn};
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Result, TransportError};

/// Keeps the local terminal in raw mode while alive.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

/// Size of the local terminal, or 80x24 when it cannot be queried.
pub(crate) fn terminal_size() -> (u32, u32) {
    match crossterm::terminal::size() {
        Ok((cols, rows)) => (u32::from(cols), u32::from(rows)),
        Err(_) => (80, 24),
    }
}

/// Relay the local terminal to `channel` until the remote shell exits.
///
/// Returns the shell's exit status if the server sent one.
pub(crate) async fn relay(mut channel: Channel<Msg>) -> Result<Option<u32>> {
    let _raw = RawModeGuard::enable().map_err(TransportError::Io)?;

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut buf = [0u8; 1024];
    let mut stdin_open = true;
    let mut exit_status = None;

    loop {
        tokio::select! {
            read = stdin.read(&mut buf), if stdin_open => match read {
                Ok(0) => {
                    stdin_open = false;
                    channel.eof().await.map_err(TransportError::Ssh)?;
                }
                Ok(n) => channel.data(&buf[..n]).await.map_err(TransportError::Ssh)?,
                Err(e) => return Err(TransportError::Io(e).into()),
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { ref data }) | Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    stdout.write_all(data).await.map_err(TransportError::Io)?;
                    stdout.flush().await.map_err(TransportError::Io)?;
                }
                Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                    debug!("Shell exited with status {}", code);
                    exit_status = Some(code);
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    Ok(exit_status)
}

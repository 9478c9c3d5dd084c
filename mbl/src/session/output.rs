//! Output of a remote command.

use std::io::{self, Write};
use std::time::Duration;

use bytes::BytesMut;

/// Result of running one command over an exec channel.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// The command that was executed.
    pub command: String,

    /// Everything the command wrote to stdout.
    pub stdout: Vec<u8>,

    /// Everything the command wrote to stderr.
    pub stderr: Vec<u8>,

    /// Exit status, if the server reported one.
    pub exit_status: Option<u32>,

    /// Time taken to execute the command.
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn new(
        command: impl Into<String>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        exit_status: Option<u32>,
        elapsed: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            stdout,
            stderr,
            exit_status,
            elapsed,
        }
    }

    /// Check if the command exited with status 0.
    pub fn is_success(&self) -> bool {
        self.exit_status == Some(0)
    }

    /// Stdout decoded lossily as UTF-8.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded lossily as UTF-8.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl std::fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.stdout))
    }
}

/// Echoes a byte stream to a writer one complete line at a time.
///
/// Partial lines are held back until their newline arrives or
/// [`LineEcho::finish`] is called.
#[derive(Debug, Default)]
pub struct LineEcho {
    pending: BytesMut,
}

impl LineEcho {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `data` and write out every line it completes.
    pub fn push(&mut self, data: &[u8], out: &mut impl Write) -> io::Result<()> {
        self.pending.extend_from_slice(data);
        let mut wrote = false;
        while let Some(pos) = memchr::memchr(b'\n', &self.pending) {
            let line = self.pending.split_to(pos + 1);
            out.write_all(&line)?;
            wrote = true;
        }
        if wrote {
            out.flush()?;
        }
        Ok(())
    }

    /// Write out a trailing partial line, terminated with a newline.
    pub fn finish(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rest = self.pending.split();
        out.write_all(&rest)?;
        out.write_all(b"\n")?;
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_waits_for_newline() {
        let mut echo = LineEcho::new();
        let mut out = Vec::new();

        echo.push(b"hel", &mut out).unwrap();
        assert!(out.is_empty());

        echo.push(b"lo\nwor", &mut out).unwrap();
        assert_eq!(out, b"hello\n");

        echo.push(b"ld\nlast", &mut out).unwrap();
        assert_eq!(out, b"hello\nworld\n");

        echo.finish(&mut out).unwrap();
        assert_eq!(out, b"hello\nworld\nlast\n");
    }

    #[test]
    fn test_finish_without_pending_writes_nothing() {
        let mut echo = LineEcho::new();
        let mut out = Vec::new();
        echo.push(b"done\n", &mut out).unwrap();
        echo.finish(&mut out).unwrap();
        assert_eq!(out, b"done\n");
    }

    #[test]
    fn test_output_text() {
        let output = CommandOutput::new(
            "cat missing",
            Vec::new(),
            b"cat: missing: No such file or directory\n".to_vec(),
            Some(1),
            Duration::from_millis(5),
        );
        assert!(!output.is_success());
        assert!(output.stderr_text().contains("No such file"));
        assert_eq!(output.to_string(), "");
    }
}

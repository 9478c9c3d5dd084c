use std::process::ExitCode;

use futures_util::FutureExt;

use super::{Context, on_device};

/// Run `cmd` on the device, or attach an interactive shell.
///
/// The exit status of the remote command or shell becomes ours.
pub async fn shell(ctx: &Context, cmd: Option<String>) -> anyhow::Result<ExitCode> {
    let status = match cmd {
        Some(cmd) => {
            println!("Running a command on the device...");
            let writeout = !ctx.quiet;
            let output = on_device(ctx, move |session| {
                async move { session.run_cmd(&cmd, true, writeout).await }.boxed()
            })
            .await?;
            output.exit_status
        }
        None => {
            println!("Starting an interactive shell...");
            on_device(ctx, |session| async move { session.start_shell().await }.boxed()).await?
        }
    };

    Ok(match status {
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX)),
        None => ExitCode::SUCCESS,
    })
}

mod commands;

use std::process::ExitCode;

use commands::{CommandLine, Commands, Context, device, provision, shell, store, transfer};
use env_logger::{Builder, Env};
use mbl::MblPaths;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CommandLine::parse_args();

    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    Builder::from_env(Env::default().default_filter_or(level)).init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<mbl::Error>()
                .and_then(mbl::Error::remote_exit_code)
                .and_then(|code| u8::try_from(code).ok())
                .filter(|code| *code != 0)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: CommandLine) -> anyhow::Result<ExitCode> {
    let ctx = Context {
        paths: MblPaths::from_home()?,
        address: cli.address,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::List => {
            device::list().await?;
        }
        Commands::Select => device::select(&ctx).await?,
        Commands::Which => device::which(&ctx)?,
        Commands::Get {
            src,
            dst,
            recursive,
        } => transfer::get(&ctx, src, dst, recursive).await?,
        Commands::Put {
            src,
            dst,
            recursive,
        } => transfer::put(&ctx, src, dst, recursive).await?,
        Commands::Shell { cmd } => return shell::shell(&ctx, cmd).await,
        Commands::SaveApiKey {
            uid,
            keys,
            new_store,
        } => store::save_api_key(&ctx, &uid, keys, new_store)?,
        Commands::AddCert {
            name,
            header,
            update,
        } => store::add_cert(&ctx, &name, &header, update)?,
        Commands::ListCerts => store::list_certs(&ctx)?,
        Commands::DeleteCert { name } => store::delete_cert(&ctx, &name)?,
        Commands::Provision {
            dev_cert,
            update_cert,
        } => provision::provision(&ctx, &dev_cert, &update_cert).await?,
        Commands::ProvisioningStatus => provision::status(&ctx).await?,
    }

    Ok(ExitCode::SUCCESS)
}

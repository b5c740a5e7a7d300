use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;

use galleria::{config, RunOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "GALLERIA_LOG";

enum Command {
    Exit,
    Run(RunOptions),
}

fn main() {
    let opts = match handle_cli_flags() {
        Ok(Command::Exit) => return,
        Ok(Command::Run(opts)) => opts,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    init_logging();
    tracing::info!(version = galleria::VERSION, offline = opts.offline, "starting");

    if let Err(err) = galleria::run(opts) {
        tracing::error!(error = %format!("{err:#}"), "exiting with error");
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> anyhow::Result<Command> {
    let mut opts = RunOptions::default();
    let mut init_config = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Galleria {}", galleria::VERSION);
                return Ok(Command::Exit);
            }
            "--help" | "-h" => {
                println!(
                    "Galleria - Browse, upload and comment on a photo gallery from the terminal.\n\n  --config <path>      Read settings from this YAML file\n  --offline            Use the built-in sample gallery (password: galleria)\n  --init-config        Write a default config file and exit\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n\nLogs go to the galleria cache directory; set {LOG_ENV} to change the level."
                );
                return Ok(Command::Exit);
            }
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config needs a path"))?;
                opts.config_file = Some(PathBuf::from(path));
            }
            "--offline" => opts.offline = true,
            "--init-config" => init_config = true,
            other => anyhow::bail!("unknown argument {other:?} (see --help)"),
        }
    }
    if init_config {
        let path = config::write_default(opts.config_file.clone())?;
        println!("Wrote {}", path.display());
        return Ok(Command::Exit);
    }
    Ok(Command::Run(opts))
}

// The terminal belongs to the UI, so events go to a file.
fn init_logging() {
    let Some(dir) = dirs::cache_dir().map(|dir| dir.join("galleria")) else {
        return;
    };
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let Ok(file) = File::create(dir.join("galleria.log")) else {
        return;
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .try_init();
}

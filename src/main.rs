use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::error::ErrorKind;
use clap::Parser;
use tracing::{info, warn, Level};

use crate::args::{Args, Command};
use crate::config::Config;
use crate::error::Error;
use crate::prompt::TerminalPrompt;

mod archive;
mod args;
mod commands;
mod config;
mod engine;
mod error;
mod filter;
mod hub;
mod output;
mod prompt;
mod reference;
mod tag;

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };
    configure_tracing(args.debug, args.trace);

    let command = match args.validate() {
        Ok(command) => command,
        Err(e) => return fail(&e.into()),
    };

    if let Command::CleanTags { dry_run: true, .. } = command {
        warn!("Dry run is enabled. No tags will be deleted!");
    }

    let start = Instant::now();
    let config = Config::from(&args);
    let mut prompt = TerminalPrompt::stdio();
    let now = time::OffsetDateTime::now_utc();

    if let Err(e) = commands::run(command, &config, &mut prompt, now).await {
        return fail(&e);
    }

    info!("Done. Took {}", fmt_duration(start.elapsed()));
    ExitCode::SUCCESS
}

fn fail(e: &anyhow::Error) -> ExitCode {
    eprintln!("❌ Error: {e:#}");
    if e.downcast_ref::<Error>().map_or(false, Error::is_usage) {
        eprintln!("Run 'hubtags help' for more information");
    }
    ExitCode::FAILURE
}

fn fmt_duration(duration: Duration) -> String {
    if duration.as_secs() > 0 {
        format!("{}s", duration.as_secs())
    } else if duration.as_millis() > 0 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{}µs", duration.as_micros())
    }
}

fn configure_tracing(debug: bool, trace: bool) {
    let level = if trace {
        Level::TRACE
    } else if debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Setting tracing subscriber");
}

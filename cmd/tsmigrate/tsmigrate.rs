use clap::Parser;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tsmigrate::{
    cli::{CLI, migrate},
    initializers::init_tracing,
    report::{EXIT_FAILURE, emit_error_report},
};

#[tokio::main]
async fn main() {
    let started_at = Instant::now();
    // Usage errors share the validation exit code, 2 means a partial run.
    let CLI { opts } = CLI::try_parse().unwrap_or_else(|error| {
        if error.use_stderr() {
            let _ = error.print();
            std::process::exit(EXIT_FAILURE);
        }
        error.exit()
    });

    if let Err(error) = init_tracing(&opts) {
        emit_error_report(
            opts.migration_name(),
            opts.json,
            started_at,
            &error,
            opts.report_file(),
        );
        std::process::exit(EXIT_FAILURE);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("received interrupt, persisting progress and stopping");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("received second interrupt, exiting before the final checkpoint");
                std::process::exit(EXIT_FAILURE);
            }
        }
    });

    match migrate(&opts, cancel).await {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            emit_error_report(
                opts.migration_name(),
                opts.json,
                started_at,
                &error,
                opts.report_file(),
            );
            std::process::exit(EXIT_FAILURE);
        }
    }
}

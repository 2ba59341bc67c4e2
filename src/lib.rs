//! Lingual: cached, batched LLM translation of .properties localization files.
//! Main library: module wiring, tracing setup and the CLI entry point.

pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod properties;
pub mod translate;

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub use config::AppConfig;
pub use error::{BackendError, CacheError, ConfigError, FormatError, TranslateError};
pub use properties::PropertiesDocument;
pub use translate::{
    BatchRequestBuilder, ContentCache, PartialBatch, TranslationBackend, TranslationOrchestrator,
    TranslationOutcome,
};

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lingual=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Parse arguments, run the command and map the result to an exit code.
pub fn run() -> ExitCode {
    let cli = cli::Cli::parse();
    init_tracing(cli.log_json);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let result = runtime.block_on(async {
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling");
                on_signal.cancel();
            }
        });
        cli::execute(cli.command, cancel).await
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

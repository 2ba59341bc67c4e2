//! Command-line surface: translate, template, check and reset-cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::TranslateError;
use crate::properties::PropertiesDocument;
use crate::translate::{
    ChatCompletionsBackend, ContentCache, SqliteStore, StubBackend, TranslationBackend,
    TranslationOrchestrator, TranslationOutcome,
};

#[derive(Parser, Debug)]
#[command(name = "lingual")]
#[command(about = "Translate .properties localization files with a persistent translation cache")]
#[command(version)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "LINGUAL_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Translate a properties file into one or more languages
    Translate {
        /// Source properties file
        file: PathBuf,
        /// Target language code, repeatable
        #[arg(short, long = "lang", required = true)]
        langs: Vec<String>,
        /// Directory for the translated files (defaults to the source's directory)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Use an offline backend and a throwaway cache
        #[arg(long)]
        dry_run: bool,
    },
    /// Write blank `key=` templates for manual translation
    Template {
        file: PathBuf,
        #[arg(short, long = "lang", required = true)]
        langs: Vec<String>,
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
    /// Validate a properties file
    Check {
        file: PathBuf,
        /// Allow blank values, as in a translation under review
        #[arg(long)]
        review: bool,
        /// Also report the size of the configured cache
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Delete every cached translation
    ResetCache {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Run one parsed command to completion.
pub async fn execute(command: Command, cancel: CancellationToken) -> Result<(), TranslateError> {
    match command {
        Command::Translate {
            file,
            langs,
            out_dir,
            config,
            dry_run,
        } => {
            let config = AppConfig::resolve(config.as_deref())?;
            let document = PropertiesDocument::load(&file)?;
            let out_dir = output_dir(&file, out_dir);

            let outcomes = if dry_run {
                let cache = ContentCache::in_memory();
                translate_languages(&config, cache, StubBackend, &document, &langs, &cancel).await?
            } else {
                let cache = open_cache(&config)?;
                let backend = ChatCompletionsBackend::from_config(&config.backend)?;
                translate_languages(&config, cache, backend, &document, &langs, &cancel).await?
            };

            for outcome in &outcomes {
                let path = out_dir.join(target_file_name(&file, &outcome.language));
                write_file(&path, &outcome.document.serialize(&outcome.language))?;
                report(outcome, &path);
            }
            Ok(())
        }
        Command::Template {
            file,
            langs,
            out_dir,
        } => {
            let document = PropertiesDocument::load(&file)?;
            let out_dir = output_dir(&file, out_dir);
            for lang in &langs {
                let path = out_dir.join(target_file_name(&file, lang));
                write_file(&path, &document.serialize_template(lang))?;
                println!("{}: {} keys to translate", path.display(), document.len());
            }
            Ok(())
        }
        Command::Check {
            file,
            review,
            config,
        } => {
            let document = if review {
                PropertiesDocument::load_for_review(&file)?
            } else {
                PropertiesDocument::load(&file)?
            };
            println!("{}: {} keys OK", file.display(), document.len());

            if let Some(path) = config {
                let config = AppConfig::resolve(Some(&path))?;
                let cache = open_cache(&config)?;
                println!("cache {}: {} rows", config.cache.path.display(), cache.len()?);
            }
            Ok(())
        }
        Command::ResetCache { config } => {
            let config = AppConfig::resolve(config.as_deref())?;
            let removed = open_cache(&config)?.reset()?;
            println!("removed {removed} cached translations");
            Ok(())
        }
    }
}

async fn translate_languages<B: TranslationBackend>(
    config: &AppConfig,
    cache: ContentCache,
    backend: B,
    document: &PropertiesDocument,
    langs: &[String],
    cancel: &CancellationToken,
) -> Result<Vec<TranslationOutcome>, TranslateError> {
    let orchestrator = TranslationOrchestrator::new(cache, backend, config.batching.builder())
        .with_request_timeout(config.run.request_timeout());

    let mut outcomes = Vec::with_capacity(langs.len());
    for lang in langs {
        outcomes.push(orchestrator.translate_with_cancel(document, lang, cancel).await?);
    }

    for (name, summary) in orchestrator.metrics().summary() {
        info!(metric = %name, p50_us = summary.p50_us, p99_us = summary.p99_us, count = summary.count, "stage timing");
    }
    Ok(outcomes)
}

fn open_cache(config: &AppConfig) -> Result<ContentCache, TranslateError> {
    let store = SqliteStore::open(&config.cache)?;
    Ok(ContentCache::new(Arc::new(store)))
}

fn report(outcome: &TranslationOutcome, path: &Path) {
    println!(
        "{}: {} keys ({} cached, {} translated)",
        path.display(),
        outcome.document.len(),
        outcome.cache_hits,
        outcome.backend_translated
    );
    for partial in &outcome.partial {
        warn!(
            language = %outcome.language,
            batch_index = partial.batch_index,
            missing = ?partial.missing_keys,
            "batch came back short"
        );
        println!(
            "warning: batch {} returned {} of {} lines; left blank: {}",
            partial.batch_index,
            partial.received,
            partial.requested,
            partial.missing_keys.join(", ")
        );
    }
}

fn output_dir(source: &Path, out_dir: Option<PathBuf>) -> PathBuf {
    out_dir.unwrap_or_else(|| {
        source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// `<bundle>_<code>.properties`, where `<bundle>` is the source file stem up
/// to its first `_` (`messages_en.properties` → `messages`).
pub fn target_file_name(source: &Path, language: &str) -> String {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("messages");
    let bundle = stem.split('_').next().filter(|b| !b.is_empty()).unwrap_or(stem);
    let code = language.trim().replace('-', "_");
    format!("{bundle}_{code}.properties")
}

fn write_file(path: &Path, content: &str) -> Result<(), TranslateError> {
    let io_err = |e: std::io::Error| TranslateError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, content).map_err(io_err)
}

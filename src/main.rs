//! Subtrans - Subtitle Translation Dispatch Engine
//!
//! Entry point for the command line tool: translates SRT files through the
//! free web endpoint or a batched LLM provider.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{Level, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use subtrans::cli::{Args, Commands, EngineOptions};
use subtrans::config::Config;
use subtrans::progress::ProgressTracker;
use subtrans::translate::provider::mask_credential;
use subtrans::translate::{JobContext, Provider};
use subtrans::workflow::{TranslationRequest, Workflow};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    // Load configuration
    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Translate { input, output, engine } => {
            let workflow = Workflow::new(config)?;
            let request = build_request(&engine);
            let job = workflow.new_job();

            let display = ProgressDisplay::start(&job, &input);
            let result = workflow
                .translate_file(&job, &input, output.as_deref(), &request)
                .await;
            drop(display);
            let file = result?;

            println!(
                "\nTranslated {} lines ({} new, {} cached, {} kept original)",
                file.report.units.len(),
                file.report.translated,
                file.report.cached,
                file.report.fallback
            );
            println!("Output: {}", file.output_path.display());
            println!("\nPreview:\n{}", file.preview);
        }
        Commands::Batch {
            input_dir,
            output_dir,
            engine,
        } => {
            let workflow = Workflow::new(config)?;
            let request = build_request(&engine);

            let summary = workflow
                .translate_directory(&input_dir, output_dir.as_deref(), &request, |path, job| {
                    ProgressDisplay::start(job, path)
                })
                .await?;

            println!(
                "\nTranslated {} files, {} failed",
                summary.translated.len(),
                summary.failed.len()
            );
            for (path, reason) in &summary.failed {
                println!("  {}: {}", path.display(), reason);
            }
        }
        Commands::Providers => {
            println!("\nAI Providers:");
            println!("{:<10} {:<28} {:<8} {:<20}", "Name", "Model", "Batch", "API Key");
            println!("{}", "-".repeat(68));

            for provider in Provider::ALL {
                let settings = config.ai.provider_settings(provider);
                let key_status = match provider.credential_from_env() {
                    Some(key) => mask_credential(&key),
                    None => format!("not set ({})", provider.api_key_env()),
                };
                println!(
                    "{:<10} {:<28} {:<8} {:<20}",
                    provider.name(),
                    settings.model,
                    settings.batch_size,
                    key_status
                );
            }
        }
        Commands::InitConfig { output } => {
            if output.exists() {
                warn!("Overwriting existing config: {}", output.display());
            }
            Config::default().save_to_file(&output)?;
            println!("Default configuration written to {}", output.display());
        }
    }

    Ok(())
}

/// Resolve the credential from the flag first, then the environment
fn build_request(engine: &EngineOptions) -> TranslationRequest {
    if !engine.ai {
        return TranslationRequest::free(&engine.source_lang, &engine.target_lang);
    }

    let credential = engine
        .api_key
        .clone()
        .or_else(|| engine.provider.credential_from_env());
    TranslationRequest::ai(&engine.source_lang, &engine.target_lang, engine.provider, credential)
}

/// Progress bar fed by polling a job's snapshot. Stops when dropped.
struct ProgressDisplay {
    bar: ProgressBar,
    poller: JoinHandle<()>,
}

impl ProgressDisplay {
    fn start(job: &JobContext, path: &Path) -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{prefix} [{bar:40.cyan/blue}] {pos}/{len} {percent}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar.set_prefix(
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        );

        let poller = tokio::spawn(poll_progress(bar.clone(), job.progress()));
        Self { bar, poller }
    }
}

impl Drop for ProgressDisplay {
    fn drop(&mut self) {
        self.poller.abort();
        self.bar.finish_and_clear();
    }
}

async fn poll_progress(bar: ProgressBar, progress: Arc<ProgressTracker>) {
    loop {
        let snapshot = progress.snapshot();
        bar.set_length(snapshot.total as u64);
        bar.set_position(snapshot.processed as u64);
        bar.set_message(snapshot.mode.clone());
        if snapshot.is_complete() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".subtrans").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "subtrans.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("subtrans.log").display()
    );

    Ok(())
}

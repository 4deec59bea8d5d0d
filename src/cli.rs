use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::translate::Provider;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by the translating subcommands
#[derive(clap::Args, Clone)]
pub struct EngineOptions {
    /// Target language code
    #[arg(short, long)]
    pub target_lang: String,

    /// Source language code
    #[arg(short, long, default_value = "auto")]
    pub source_lang: String,

    /// Use an AI provider instead of the free engine
    #[arg(long)]
    pub ai: bool,

    /// AI provider: groq, gemini or openai
    #[arg(long, default_value = "groq")]
    pub provider: Provider,

    /// Provider API key, falls back to the provider's environment variable
    #[arg(long)]
    pub api_key: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate a single SRT file
    Translate {
        /// Input subtitle file
        #[arg(short, long)]
        input: PathBuf,

        /// Output subtitle file, defaults to <stem>_<lang>.srt next to the input
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineOptions,
    },

    /// Translate every SRT file in a directory
    Batch {
        /// Input directory containing subtitle files
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Output directory for translated files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineOptions,
    },

    /// List AI providers, their models and credential status
    Providers,

    /// Write the default configuration file
    InitConfig {
        /// Destination path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
}

//! Subtrans - Subtitle Translation Dispatch Engine
//!
//! Translates ordered subtitle cues through either a rate-limited free web
//! endpoint or batched LLM providers, with a two-tier cache and per-job
//! progress. A unit that cannot be translated keeps its original text.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod progress;
pub mod rate_limit;
pub mod subtitle;
pub mod translate;
pub mod workflow;

// Translation engines
//
// Two engines sit behind one trait, picked per job by the factory:
// - Free: per-line calls to the public endpoint over a bounded worker pool
// - AI: numbered batches sent to an LLM provider (groq, gemini, openai)

pub mod ai;
pub mod common;
pub mod free;
pub mod provider;
pub mod retry;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

pub use common::*;
pub use provider::{CompletionTransport, HttpCompletionTransport, Provider, ProviderRequest};
use crate::cache::TranslationCache;
use crate::config::Config;
use crate::progress::ProgressTracker;
use crate::rate_limit::RateLimiter;
use free::FreeTranslateBackend;

/// Per-job state shared with the engine: its own progress, the process cache
#[derive(Clone)]
pub struct JobContext {
    pub id: Uuid,
    pub progress: Arc<ProgressTracker>,
    pub cache: Arc<TranslationCache>,
}

impl JobContext {
    pub fn new(cache: Arc<TranslationCache>) -> Self {
        Self {
            id: Uuid::new_v4(),
            progress: Arc::new(ProgressTracker::new()),
            cache,
        }
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        self.progress.clone()
    }
}

/// Translate every unit in place.
///
/// Never fails as a whole: a unit that cannot be translated keeps its source
/// text and records why. Progress advances once per finished unit.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    fn mode_label(&self) -> String;

    async fn translate_all(&self, units: &mut [TranslationUnit], languages: &LanguagePair, job: &JobContext);
}

#[derive(Debug, Clone)]
pub enum EngineSelection {
    Free,
    Ai { provider: Provider, credential: String },
}

/// External seams the engines talk through
#[derive(Clone)]
pub struct Backends {
    pub free: Arc<dyn FreeTranslateBackend>,
    pub completion: Arc<dyn CompletionTransport>,
    pub limiter: Arc<RateLimiter>,
}

/// Factory for creating engine instances
pub struct TranslatorFactory;

impl TranslatorFactory {
    pub fn create(selection: EngineSelection, config: &Config, backends: &Backends) -> Box<dyn TranslationEngine> {
        match selection {
            EngineSelection::Free => Box::new(free::FreeTranslator::new(
                backends.free.clone(),
                backends.limiter.clone(),
                config.free.clone(),
            )),
            EngineSelection::Ai { provider, credential } => Box::new(ai::BatchTranslator::new(
                backends.completion.clone(),
                provider,
                credential,
                config.ai.clone(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::free::MockFreeTranslateBackend;
    use super::provider::MockCompletionTransport;

    fn backends() -> Backends {
        Backends {
            free: Arc::new(MockFreeTranslateBackend::new()),
            completion: Arc::new(MockCompletionTransport::new()),
            limiter: Arc::new(RateLimiter::new(std::time::Duration::from_secs(1), 15)),
        }
    }

    #[test]
    fn test_factory_picks_engine() {
        let config = Config::default();
        let free = TranslatorFactory::create(EngineSelection::Free, &config, &backends());
        assert_eq!(free.mode_label(), "Google Free");

        let ai = TranslatorFactory::create(
            EngineSelection::Ai {
                provider: Provider::Gemini,
                credential: "AIzaTest".to_string(),
            },
            &config,
            &backends(),
        );
        assert_eq!(ai.mode_label(), "AI (gemini)");
    }

    #[test]
    fn test_jobs_get_distinct_ids_and_progress() {
        let cache = Arc::new(TranslationCache::in_memory(10));
        let a = JobContext::new(cache.clone());
        let b = JobContext::new(cache);
        assert_ne!(a.id, b.id);

        a.progress.reset(4, "Google Free");
        a.progress.advance(2);
        assert_eq!(b.progress.snapshot().processed, 0);
        assert!(Arc::ptr_eq(&a.cache, &b.cache));
    }
}

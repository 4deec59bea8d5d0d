use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::FreeConfig;
use crate::error::{Result, SubtransError};
use crate::rate_limit::RateLimiter;
use super::retry::{ExponentialBackoff, jitter, retry_with};
use super::{FallbackReason, JobContext, LanguagePair, TranslationEngine, TranslationUnit, free_language_code};

/// Browser signatures rotated across requests
pub const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36 Edg/119.0.0.0",
];

/// Single-text translation call against the free endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FreeTranslateBackend: Send + Sync {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;
}

/// Unauthenticated Google Translate web endpoint
pub struct GoogleFreeBackend {
    client: Client,
    endpoint: String,
}

impl GoogleFreeBackend {
    pub fn new(config: &FreeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl FreeTranslateBackend for GoogleFreeBackend {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        let source = free_language_code(source_lang, true);
        let target = free_language_code(target_lang, false);

        let response = self
            .client
            .get(&self.endpoint)
            .header(USER_AGENT, user_agent)
            .query(&[
                ("client", "gtx"),
                ("sl", source.as_str()),
                ("tl", target.as_str()),
                ("dt", "t"),
                ("ie", "UTF-8"),
                ("oe", "UTF-8"),
                ("q", text),
            ])
            .send()
            .await
            .map_err(SubtransError::from_request)?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(SubtransError::Throttled("429 Too Many Requests".to_string()));
        }
        if !status.is_success() {
            return Err(SubtransError::Transport(format!("Translate endpoint returned {}", status)));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| match SubtransError::from_request(e) {
                SubtransError::Transport(message) => SubtransError::MalformedResponse(message),
                timeout => timeout,
            })?;

        extract_translation(&data)
    }
}

/// Concatenate the segments at `data[0][i][0]`
pub fn extract_translation(data: &Value) -> Result<String> {
    let segments = data
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| SubtransError::MalformedResponse("missing segment array".to_string()))?;

    let translated: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect();

    let translated = translated.trim();
    if translated.is_empty() {
        return Err(SubtransError::MalformedResponse("empty translation received".to_string()));
    }
    Ok(translated.to_string())
}

/// Per-unit translation over a bounded worker pool, cache first
pub struct FreeTranslator {
    backend: Arc<dyn FreeTranslateBackend>,
    limiter: Arc<RateLimiter>,
    config: FreeConfig,
}

impl FreeTranslator {
    pub fn new(backend: Arc<dyn FreeTranslateBackend>, limiter: Arc<RateLimiter>, config: FreeConfig) -> Self {
        Self {
            backend,
            limiter,
            config,
        }
    }

    /// Fewer workers for short work lists, never more than `max_workers`
    pub fn worker_count(&self, misses: usize) -> usize {
        misses
            .div_ceil(self.config.units_per_worker.max(1))
            .clamp(1, self.config.max_workers.max(1))
    }
}

/// Translate one text, retrying per failure class
async fn translate_with_retry(
    backend: &dyn FreeTranslateBackend,
    limiter: &RateLimiter,
    config: &FreeConfig,
    text: &str,
    languages: &LanguagePair,
) -> Result<String> {
    let backoff = ExponentialBackoff::new(Duration::from_millis(config.throttle_base_delay_ms));

    retry_with(
        config.max_attempts,
        move |_| async move {
            limiter.acquire().await;
            backend.translate(text, &languages.source, &languages.target).await
        },
        |err, attempt| match err {
            SubtransError::Timeout(_) => Some(Duration::ZERO),
            SubtransError::Throttled(_) => {
                let delay = backoff.delay(attempt);
                warn!("Rate limited, waiting {:?} before retry", delay);
                Some(delay)
            }
            SubtransError::MalformedResponse(_) | SubtransError::Json(_) => None,
            _ => Some(jitter(config.transient_delay_min_ms, config.transient_delay_max_ms)),
        },
    )
    .await
}

#[async_trait]
impl TranslationEngine for FreeTranslator {
    fn mode_label(&self) -> String {
        "Google Free".to_string()
    }

    async fn translate_all(&self, units: &mut [TranslationUnit], languages: &LanguagePair, job: &JobContext) {
        let total = units.len();
        let mut misses = VecDeque::new();

        for (pos, unit) in units.iter_mut().enumerate() {
            if unit.source_text.trim().is_empty() {
                unit.mark_translated(unit.source_text.clone());
                job.progress.advance(1);
                continue;
            }
            match job.cache.lookup(&unit.source_text, &languages.source, &languages.target).await {
                Some(hit) => {
                    unit.mark_cached(hit);
                    job.progress.advance(1);
                }
                None => misses.push_back((pos, unit.source_text.clone())),
            }
        }

        if misses.is_empty() {
            info!("All {} lines served from cache", total);
            return;
        }

        let miss_count = misses.len();
        let workers = self.worker_count(miss_count);
        info!(
            "Translating {} lines with {} workers ({} cached)",
            miss_count,
            workers,
            total - miss_count
        );

        let queue = Arc::new(Mutex::new(misses));
        let mut pool = JoinSet::new();

        for worker_id in 0..workers {
            let queue = queue.clone();
            let backend = self.backend.clone();
            let limiter = self.limiter.clone();
            let config = self.config.clone();
            let languages = languages.clone();
            let cache = job.cache.clone();
            let progress = job.progress.clone();

            pool.spawn(async move {
                let mut done = Vec::new();
                loop {
                    let next = queue.lock().unwrap_or_else(|p| p.into_inner()).pop_front();
                    let Some((pos, text)) = next else {
                        break;
                    };

                    let outcome =
                        translate_with_retry(backend.as_ref(), &limiter, &config, &text, &languages).await;

                    match &outcome {
                        Ok(translation) => {
                            cache.store(&text, &languages.source, &languages.target, translation).await;
                            let pause = jitter(config.pacing_min_ms, config.pacing_max_ms);
                            if !pause.is_zero() {
                                tokio::time::sleep(pause).await;
                            }
                        }
                        Err(e) => error!("Failed line {} after retries: {}", pos + 1, e),
                    }

                    progress.advance(1);
                    done.push((pos, outcome.map_err(|e| e.fallback_reason())));
                }
                debug!("Worker {} finished {} lines", worker_id, done.len());
                done
            });
        }

        let mut failed = Vec::new();
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(done) => {
                    for (pos, outcome) in done {
                        match outcome {
                            Ok(translation) => units[pos].mark_translated(translation),
                            Err(reason) => {
                                units[pos].fall_back(reason);
                                failed.push(pos);
                            }
                        }
                    }
                }
                Err(e) => error!("Translation worker failed: {}", e),
            }
        }

        // Units owned by a worker that died
        for (pos, unit) in units.iter_mut().enumerate() {
            if unit.is_pending() {
                unit.fall_back(FallbackReason::Aborted);
                failed.push(pos);
            }
        }

        let success = miss_count.saturating_sub(failed.len());
        info!(
            "Google parallel: {}/{} success ({:.1}%)",
            success,
            miss_count,
            success as f64 / miss_count as f64 * 100.0
        );
        if !failed.is_empty() {
            failed.sort_unstable();
            let shown: Vec<usize> = failed.iter().take(20).map(|p| p + 1).collect();
            warn!("Failed lines: {:?}", shown);
        }
    }
}

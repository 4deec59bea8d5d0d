use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{AiConfig, ProviderSettings};
use crate::error::{Result, SubtransError};
use super::provider::{CompletionTransport, Provider};
use super::retry::{ExponentialBackoff, retry_with};
use super::{JobContext, LanguagePair, TranslationEngine, TranslationUnit, language_code_to_name};

static TAGGED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\d+)\]\s*(.*)$").expect("tagged line pattern is valid"));

/// Batched LLM translation: one prompt per batch, all-or-nothing per batch
pub struct BatchTranslator {
    transport: Arc<dyn CompletionTransport>,
    provider: Provider,
    settings: ProviderSettings,
    credential: String,
    config: AiConfig,
}

impl BatchTranslator {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        provider: Provider,
        credential: String,
        config: AiConfig,
    ) -> Self {
        Self {
            settings: config.provider_settings(provider).clone(),
            transport,
            provider,
            credential,
            config,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.settings.batch_size.max(1)
    }

    /// Translate one batch. Either every text gets a translation or the
    /// whole batch errors.
    async fn translate_batch(&self, texts: &[&str], languages: &LanguagePair) -> Result<Vec<String>> {
        let prompt = build_batch_prompt(texts, languages);
        let request = self.provider.build_request(
            &self.settings,
            &prompt,
            &self.credential,
            self.config.temperature,
            self.config.max_tokens,
        )?;

        let backoff = ExponentialBackoff::new(Duration::from_millis(self.config.backoff_base_ms));
        let transport = self.transport.as_ref();
        let provider = self.provider;
        let request = &request;

        let raw = retry_with(
            self.config.max_attempts,
            move |_| async move {
                let body = transport.send(request).await?;
                provider.extract_text(&body)
            },
            |err, retry| {
                if err.is_rate_limit_or_timeout() {
                    let delay = backoff.delay(retry);
                    warn!("{} busy ({}), retrying batch in {:?}", provider, err, delay);
                    Some(delay)
                } else {
                    None
                }
            },
        )
        .await?;

        debug!("Raw {} response: {}", provider, raw);
        assign_positional(parse_tagged_lines(&raw), texts.len())
    }
}

#[async_trait]
impl TranslationEngine for BatchTranslator {
    fn mode_label(&self) -> String {
        format!("AI ({})", self.provider)
    }

    async fn translate_all(&self, units: &mut [TranslationUnit], languages: &LanguagePair, job: &JobContext) {
        let batch_size = self.batch_size();
        let batch_count = units.len().div_ceil(batch_size);
        let pause = Duration::from_millis(self.config.batch_pause_ms);

        info!(
            "Translating {} lines in {} batches of up to {} via {}",
            units.len(),
            batch_count,
            batch_size,
            self.provider
        );

        for (batch_no, batch) in units.chunks_mut(batch_size).enumerate() {
            let texts: Vec<&str> = batch.iter().map(|u| u.source_text.as_str()).collect();

            match self.translate_batch(&texts, languages).await {
                Ok(translations) => {
                    for (unit, translation) in batch.iter_mut().zip(translations) {
                        job.cache
                            .store(&unit.source_text, &languages.source, &languages.target, &translation)
                            .await;
                        unit.mark_translated(translation);
                    }
                }
                Err(e) => {
                    warn!(
                        "Batch {}/{} failed, fallback to original: {}",
                        batch_no + 1,
                        batch_count,
                        e
                    );
                    let reason = e.fallback_reason();
                    for unit in batch.iter_mut() {
                        unit.fall_back(reason);
                    }
                }
            }

            job.progress.advance(batch.len());

            if batch_no + 1 < batch_count && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
    }
}

/// Prompt enumerating each text as `[n] text`, asking for the same form back
pub fn build_batch_prompt(texts: &[&str], languages: &LanguagePair) -> String {
    let combined = texts
        .iter()
        .enumerate()
        .map(|(i, text)| format!("[{}] {}", i + 1, text.replace('\n', " ")))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a professional subtitle translator.\n\
         \n\
         CRITICAL RULES:\n\
         - Maintain exact tone and emotion (casual/formal/childish/aggressive/romantic)\n\
         - Use natural expressions, not literal translations\n\
         - Preserve cultural nuances\n\
         - Keep context from previous lines\n\
         - Respond ONLY in format: [1] translation, [2] translation, etc.\n\
         - Return exactly {} lines, one per input line\n\
         \n\
         Translate from {} to {}:\n\
         \n\
         {}",
        texts.len(),
        language_code_to_name(&languages.source),
        language_code_to_name(&languages.target),
        combined
    )
}

/// Collect `[n] translation` lines in response order. Untagged lines are ignored.
pub fn parse_tagged_lines(response: &str) -> Vec<(usize, String)> {
    response
        .lines()
        .filter_map(|line| {
            let caps = TAGGED_LINE.captures(line.trim())?;
            let tag = caps[1].parse::<usize>().ok()?;
            Some((tag, caps[2].trim().to_string()))
        })
        .collect()
}

/// Accept the candidates only when there are exactly `expected` of them and
/// their tags, once sorted, are `1..=expected`. Duplicates reject the batch.
pub fn assign_positional(mut candidates: Vec<(usize, String)>, expected: usize) -> Result<Vec<String>> {
    if candidates.len() != expected {
        return Err(SubtransError::MalformedResponse(format!(
            "expected {} tagged lines, got {}",
            expected,
            candidates.len()
        )));
    }

    candidates.sort_by_key(|(tag, _)| *tag);
    if !candidates.iter().map(|(tag, _)| *tag).eq(1..=expected) {
        return Err(SubtransError::MalformedResponse(format!(
            "tagged lines do not cover 1..={}",
            expected
        )));
    }

    Ok(candidates.into_iter().map(|(_, text)| text).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TranslationCache;
    use crate::translate::provider::MockCompletionTransport;
    use crate::translate::{FallbackReason, UnitStatus};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn test_config(batch_size: usize) -> AiConfig {
        let mut config = AiConfig {
            batch_pause_ms: 0,
            ..AiConfig::default()
        };
        config.groq.batch_size = batch_size;
        config
    }

    fn chat_body(content: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"content": content}}]})
    }

    fn units(texts: &[&str]) -> Vec<TranslationUnit> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| TranslationUnit::new(i, *t))
            .collect()
    }

    fn job(total: usize) -> JobContext {
        let job = JobContext::new(Arc::new(TranslationCache::in_memory(100)));
        job.progress.reset(total, "AI");
        job
    }

    #[test]
    fn test_prompt_lists_tagged_lines() {
        let prompt = build_batch_prompt(&["Hello", "Two\nlines"], &LanguagePair::new("en", "vi"));
        assert!(prompt.contains("[1] Hello\n[2] Two lines"));
        assert!(prompt.contains("Translate from English to Vietnamese"));
    }

    #[test]
    fn test_parse_tagged_lines() {
        let parsed = parse_tagged_lines("Sure! Here you go:\n[1] Xin chào\n  [2]   Tạm biệt  \nnoise");
        assert_eq!(parsed, vec![(1, "Xin chào".to_string()), (2, "Tạm biệt".to_string())]);
    }

    #[test]
    fn test_assign_rejects_gaps_and_counts() {
        assert!(assign_positional(vec![(1, "a".to_string())], 2).is_err());
        assert!(assign_positional(vec![(1, "a".to_string()), (3, "c".to_string())], 2).is_err());

        let ok = vec![(2, "b".to_string()), (1, "a".to_string())];
        assert_eq!(assign_positional(ok, 2).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_tags_reject_batch() {
        let parsed = parse_tagged_lines("[1] a\n[2] b\n[2] b-again");
        assert_eq!(parsed.len(), 3);
        assert!(matches!(
            assign_positional(parsed, 2),
            Err(SubtransError::MalformedResponse(_))
        ));

        // Right count, but a tag repeated in place of a missing one
        let parsed = parse_tagged_lines("[1] a\n[1] a-again");
        assert!(assign_positional(parsed, 2).is_err());
    }

    #[tokio::test]
    async fn test_duplicate_tag_response_falls_back_whole_batch() {
        let mut transport = MockCompletionTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| Ok(chat_body("[1] a\n[2] b\n[2] b-again")));

        let engine = BatchTranslator::new(Arc::new(transport), Provider::Groq, "gsk_test".into(), test_config(2));
        let job = job(2);
        let mut units = units(&["one", "two"]);
        engine.translate_all(&mut units, &LanguagePair::new("en", "fr"), &job).await;

        for unit in &units {
            assert_eq!(unit.translated_text, unit.source_text);
            assert_eq!(unit.status, UnitStatus::Fallback(FallbackReason::MalformedResponse));
        }
        assert!(job.cache.is_empty());
    }

    #[tokio::test]
    async fn test_batch_translates_positionally() {
        let mut transport = MockCompletionTransport::new();
        transport
            .expect_send()
            .times(1)
            .withf(|req| req.body["messages"][0]["content"].as_str().unwrap_or("").contains("[3] C"))
            .returning(|_| Ok(chat_body("[1] a\n[2] b\n[3] c")));

        let engine = BatchTranslator::new(Arc::new(transport), Provider::Groq, "gsk_test".into(), test_config(20));
        let job = job(3);
        let mut units = units(&["A", "B", "C"]);
        engine.translate_all(&mut units, &LanguagePair::new("en", "fr"), &job).await;

        let out: Vec<&str> = units.iter().map(|u| u.translated_text.as_str()).collect();
        assert_eq!(out, ["a", "b", "c"]);
        assert_eq!(job.cache.len(), 3);
        assert_eq!(job.progress.snapshot().processed, 3);
    }

    #[tokio::test]
    async fn test_short_response_falls_back_whole_batch() {
        let mut transport = MockCompletionTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| Ok(chat_body("[1] v1\n[2] v2\n[3] v3\n[4] v4")));

        let engine = BatchTranslator::new(Arc::new(transport), Provider::Groq, "gsk_test".into(), test_config(5));
        let job = job(5);
        let mut units = units(&["s1", "s2", "s3", "s4", "s5"]);
        engine.translate_all(&mut units, &LanguagePair::new("en", "ko"), &job).await;

        for unit in &units {
            assert_eq!(unit.translated_text, unit.source_text);
            assert_eq!(unit.status, UnitStatus::Fallback(FallbackReason::MalformedResponse));
        }
        assert!(job.cache.is_empty());
        assert_eq!(job.progress.snapshot().processed, 5);
    }

    #[tokio::test]
    async fn test_batch_failures_are_isolated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut transport = MockCompletionTransport::new();
        {
            let calls = calls.clone();
            transport.expect_send().times(3).returning(move |_| {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    1 => Ok(json!({"error": {"message": "Invalid API Key"}})),
                    _ => Ok(chat_body("[1] x\n[2] y")),
                }
            });
        }

        let engine = BatchTranslator::new(Arc::new(transport), Provider::Groq, "gsk_test".into(), test_config(2));
        let job = job(6);
        let mut units = units(&["a", "b", "c", "d", "e", "f"]);
        engine.translate_all(&mut units, &LanguagePair::new("en", "es"), &job).await;

        assert_eq!(units[0].translated_text, "x");
        assert_eq!(units[1].translated_text, "y");
        assert_eq!(units[2].status, UnitStatus::Fallback(FallbackReason::Provider));
        assert_eq!(units[3].translated_text, "d");
        assert_eq!(units[4].translated_text, "x");
        assert_eq!(units[5].translated_text, "y");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_batch_retries_with_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut transport = MockCompletionTransport::new();
        {
            let calls = calls.clone();
            transport.expect_send().times(3).returning(move |_| {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(json!({"error": {"message": "Rate limit reached for requests"}}))
                } else {
                    Ok(chat_body("[1] hola"))
                }
            });
        }

        let engine = BatchTranslator::new(Arc::new(transport), Provider::Groq, "gsk_test".into(), test_config(20));
        let job = job(1);
        let mut units = units(&["hello"]);

        let start = Instant::now();
        engine.translate_all(&mut units, &LanguagePair::new("en", "es"), &job).await;

        assert_eq!(units[0].translated_text, "hola");
        // 2s + 4s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_attempts() {
        let mut transport = MockCompletionTransport::new();
        transport
            .expect_send()
            .times(4)
            .returning(|_| Err(SubtransError::Timeout("30s elapsed".to_string())));

        let engine = BatchTranslator::new(Arc::new(transport), Provider::OpenAi, "sk-test".into(), AiConfig::default());
        let job = job(1);
        let mut units = units(&["hello"]);
        engine.translate_all(&mut units, &LanguagePair::new("en", "it"), &job).await;

        assert_eq!(units[0].status, UnitStatus::Fallback(FallbackReason::Timeout));
        assert_eq!(units[0].translated_text, "hello");
    }

    #[tokio::test]
    async fn test_gemini_response_shape() {
        let mut transport = MockCompletionTransport::new();
        transport
            .expect_send()
            .withf(|req| req.bearer.is_none() && req.url.contains("key="))
            .returning(|_| Ok(json!({"candidates": [{"content": {"parts": [{"text": "[1] Guten Tag"}]}}]})));

        let engine = BatchTranslator::new(Arc::new(transport), Provider::Gemini, "AIzaTest".into(), AiConfig::default());
        let job = job(1);
        let mut units = units(&["Good day"]);
        engine.translate_all(&mut units, &LanguagePair::new("en", "de"), &job).await;

        assert_eq!(units[0].translated_text, "Guten Tag");
    }

    #[test]
    fn test_batch_sizes_follow_provider() {
        let transport: Arc<dyn CompletionTransport> = Arc::new(MockCompletionTransport::new());
        let groq = BatchTranslator::new(transport.clone(), Provider::Groq, String::new(), AiConfig::default());
        let gemini = BatchTranslator::new(transport, Provider::Gemini, String::new(), AiConfig::default());
        assert_eq!(groq.batch_size(), 20);
        assert_eq!(gemini.batch_size(), 8);
    }
}

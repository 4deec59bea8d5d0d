use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::cache::TranslationCache;
use crate::config::Config;
use crate::error::{Result, SubtransError};
use crate::rate_limit::RateLimiter;
use crate::subtitle::{apply_units, is_srt, preview, read_srt, to_units, translated_file_name, write_srt};
use crate::translate::free::GoogleFreeBackend;
use crate::translate::provider::mask_credential;
use crate::translate::{
    Backends, EngineSelection, HttpCompletionTransport, JobContext, LanguagePair, Provider, TranslationUnit,
    TranslatorFactory, UnitStatus,
};

/// Lines shown in the post-translation preview
const PREVIEW_LINES: usize = 5;

#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub source_lang: String,
    pub target_lang: String,
    pub use_ai: bool,
    pub provider: Provider,
    /// Required when `use_ai` is set
    pub credential: Option<String>,
}

impl TranslationRequest {
    pub fn free(source_lang: &str, target_lang: &str) -> Self {
        Self {
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            use_ai: false,
            provider: Provider::Groq,
            credential: None,
        }
    }

    pub fn ai(source_lang: &str, target_lang: &str, provider: Provider, credential: Option<String>) -> Self {
        Self {
            use_ai: true,
            provider,
            credential,
            ..Self::free(source_lang, target_lang)
        }
    }

    fn languages(&self) -> LanguagePair {
        LanguagePair::new(self.source_lang.as_str(), self.target_lang.as_str())
    }
}

/// Outcome of one job: every unit in input order plus status counts
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: Uuid,
    pub units: Vec<TranslationUnit>,
    pub cached: usize,
    pub translated: usize,
    pub fallback: usize,
}

impl JobReport {
    fn new(job_id: Uuid, units: Vec<TranslationUnit>) -> Self {
        let count = |pred: fn(&UnitStatus) -> bool| units.iter().filter(|u| pred(&u.status)).count();
        Self {
            job_id,
            cached: count(|s| matches!(s, UnitStatus::Cached)),
            translated: count(|s| matches!(s, UnitStatus::Translated)),
            fallback: count(|s| matches!(s, UnitStatus::Fallback(_))),
            units,
        }
    }
}

#[derive(Debug)]
pub struct FileReport {
    pub output_path: PathBuf,
    pub report: JobReport,
    pub preview: String,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub translated: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct Workflow {
    config: Config,
    backends: Backends,
    cache: Arc<TranslationCache>,
}

impl Workflow {
    /// Wire the real HTTP backends, the process-wide limiter and the cache
    pub fn new(config: Config) -> Result<Self> {
        let backends = Backends {
            free: Arc::new(GoogleFreeBackend::new(&config.free)?),
            completion: Arc::new(HttpCompletionTransport::new(Duration::from_secs(config.ai.timeout_secs))?),
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
        };
        let cache = Arc::new(TranslationCache::from_config(&config.cache)?);

        Ok(Self::with_backends(config, backends, cache))
    }

    pub fn with_backends(config: Config, backends: Backends, cache: Arc<TranslationCache>) -> Self {
        Self {
            config,
            backends,
            cache,
        }
    }

    /// Fresh job sharing this workflow's cache
    pub fn new_job(&self) -> JobContext {
        JobContext::new(self.cache.clone())
    }

    /// Pre-flight checks. Nothing is mutated when this fails.
    pub fn validate(&self, units: &[TranslationUnit], request: &TranslationRequest) -> Result<EngineSelection> {
        if units.is_empty() {
            return Err(SubtransError::EmptyInput);
        }
        if units.len() > self.config.limits.max_units {
            return Err(SubtransError::TooManyUnits {
                count: units.len(),
                max: self.config.limits.max_units,
            });
        }

        if !request.use_ai {
            return Ok(EngineSelection::Free);
        }

        let provider = request.provider;
        let credential = request
            .credential
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                SubtransError::Config(format!(
                    "Missing API key for {} (pass --api-key or set {})",
                    provider,
                    provider.api_key_env()
                ))
            })?;

        if !provider.credential_looks_valid(credential) {
            warn!(
                "API key {} does not look like a {} key, trying anyway",
                mask_credential(credential),
                provider
            );
        }

        Ok(EngineSelection::Ai {
            provider,
            credential: credential.to_string(),
        })
    }

    /// Translate `units` in place and report. Only pre-flight errors surface;
    /// engine failures degrade individual units.
    pub async fn run(
        &self,
        job: &JobContext,
        mut units: Vec<TranslationUnit>,
        request: &TranslationRequest,
    ) -> Result<JobReport> {
        let selection = self.validate(&units, request)?;
        let engine = TranslatorFactory::create(selection, &self.config, &self.backends);
        let mode = engine.mode_label();

        job.progress.reset(units.len(), &mode);
        info!(
            "Job {}: {} lines {} -> {} using {}",
            job.id,
            units.len(),
            request.source_lang,
            request.target_lang,
            mode
        );

        engine.translate_all(&mut units, &request.languages(), job).await;
        job.progress.finish();

        let report = JobReport::new(job.id, units);
        info!(
            "Job {} done: {} translated, {} cached, {} fallback",
            report.job_id, report.translated, report.cached, report.fallback
        );
        Ok(report)
    }

    /// Translate one SRT file and write `<stem>_<target>.srt`
    pub async fn translate_file(
        &self,
        job: &JobContext,
        input_path: &Path,
        output_path: Option<&Path>,
        request: &TranslationRequest,
    ) -> Result<FileReport> {
        info!("Processing subtitle file: {}", input_path.display());

        let entries = read_srt(input_path).await?;
        let report = self.run(job, to_units(&entries), request).await?;
        let translated = apply_units(&entries, &report.units);

        let output_path = match output_path {
            Some(path) => path.to_path_buf(),
            None => translated_file_name(input_path, &request.target_lang, None),
        };
        write_srt(&translated, &output_path).await?;

        Ok(FileReport {
            output_path,
            preview: preview(&translated, PREVIEW_LINES),
            report,
        })
    }

    /// `.srt` files under `input_dir`, skipping outputs of a previous run for `target_lang`
    pub fn find_subtitles(input_dir: &Path, target_lang: &str) -> Vec<PathBuf> {
        let suffix = format!("_{}", target_lang);
        let mut files: Vec<PathBuf> = WalkDir::new(input_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_srt(e.path()))
            .filter(|e| {
                e.path()
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| !s.ends_with(&suffix))
                    .unwrap_or(true)
            })
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }

    /// Translate every subtitle file under a directory, one job per file.
    ///
    /// `on_job` is called as each job starts; whatever it returns is dropped
    /// when that file is done.
    pub async fn translate_directory<F, G>(
        &self,
        input_dir: &Path,
        output_dir: Option<&Path>,
        request: &TranslationRequest,
        mut on_job: F,
    ) -> Result<BatchSummary>
    where
        F: FnMut(&Path, &JobContext) -> G,
    {
        if !input_dir.is_dir() {
            return Err(SubtransError::FileNotFound(input_dir.display().to_string()));
        }
        if let Some(dir) = output_dir {
            fs::create_dir_all(dir).await?;
        }

        let files = Self::find_subtitles(input_dir, &request.target_lang);
        info!("Found {} subtitle files to translate", files.len());

        let mut summary = BatchSummary::default();
        for path in files {
            let job = self.new_job();
            let output_path = translated_file_name(&path, &request.target_lang, output_dir);

            let guard = on_job(&path, &job);
            let outcome = self.translate_file(&job, &path, Some(&output_path), request).await;
            drop(guard);

            match outcome {
                Ok(file) => {
                    info!("Successfully translated: {}", path.display());
                    summary.translated.push(file.output_path);
                }
                Err(e) => {
                    warn!("Failed to translate {}: {}", path.display(), e);
                    summary.failed.push((path, e.to_string()));
                }
            }
        }

        Ok(summary)
    }
}

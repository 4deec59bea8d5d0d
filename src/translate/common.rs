use serde::{Deserialize, Serialize};

/// Why a unit kept its source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Timeout,
    Throttled,
    Transport,
    MalformedResponse,
    Provider,
    /// The worker handling the unit died before reporting
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum UnitStatus {
    Pending,
    Cached,
    Translated,
    Fallback(FallbackReason),
}

/// One subtitle cue moving through a job. Engines write back into the unit
/// at its own position; units are never reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationUnit {
    pub sequence_index: usize,
    pub source_text: String,
    pub translated_text: String,
    pub status: UnitStatus,
}

impl TranslationUnit {
    pub fn new(sequence_index: usize, source_text: impl Into<String>) -> Self {
        Self {
            sequence_index,
            source_text: source_text.into(),
            translated_text: String::new(),
            status: UnitStatus::Pending,
        }
    }

    pub fn mark_cached(&mut self, translation: String) {
        self.translated_text = translation;
        self.status = UnitStatus::Cached;
    }

    pub fn mark_translated(&mut self, translation: String) {
        self.translated_text = translation;
        self.status = UnitStatus::Translated;
    }

    /// Keep the source text as the output
    pub fn fall_back(&mut self, reason: FallbackReason) {
        self.translated_text = self.source_text.clone();
        self.status = UnitStatus::Fallback(reason);
    }

    pub fn is_pending(&self) -> bool {
        self.status == UnitStatus::Pending
    }

    /// Text to emit: the translation, or the source if none was produced
    pub fn output_text(&self) -> &str {
        if self.translated_text.is_empty() {
            &self.source_text
        } else {
            &self.translated_text
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Language code as the free endpoint expects it. Unknown source codes
/// become `auto`; unknown target codes pass through.
pub fn free_language_code(code: &str, is_source: bool) -> String {
    let lower = code.trim().to_lowercase();
    match lower.as_str() {
        "zh" | "zh-cn" => "zh-CN".to_string(),
        "zh-tw" => "zh-TW".to_string(),
        "auto" | "en" | "vi" | "ja" | "ko" | "th" | "fr" | "de" | "es" | "pt" | "ru" | "ar" | "hi"
        | "id" | "it" | "nl" | "pl" | "tr" | "uk" => lower,
        _ if is_source => "auto".to_string(),
        _ => code.trim().to_string(),
    }
}

/// Convert language code to full language name for clearer prompts
pub fn language_code_to_name(code: &str) -> String {
    match code.to_lowercase().as_str() {
        "auto" => "the detected source language".to_string(),
        "en" => "English".to_string(),
        "vi" => "Vietnamese".to_string(),
        "ja" => "Japanese".to_string(),
        "ko" => "Korean".to_string(),
        "zh" | "zh-cn" => "Simplified Chinese".to_string(),
        "zh-tw" => "Traditional Chinese".to_string(),
        "th" => "Thai".to_string(),
        "fr" => "French".to_string(),
        "de" => "German".to_string(),
        "es" => "Spanish".to_string(),
        "pt" => "Portuguese".to_string(),
        "ru" => "Russian".to_string(),
        "ar" => "Arabic".to_string(),
        "hi" => "Hindi".to_string(),
        "id" => "Indonesian".to_string(),
        "it" => "Italian".to_string(),
        "nl" => "Dutch".to_string(),
        "pl" => "Polish".to_string(),
        "tr" => "Turkish".to_string(),
        "uk" => "Ukrainian".to_string(),
        "sv" => "Swedish".to_string(),
        "da" => "Danish".to_string(),
        "no" => "Norwegian".to_string(),
        "fi" => "Finnish".to_string(),
        "he" => "Hebrew".to_string(),
        "hu" => "Hungarian".to_string(),
        "cs" => "Czech".to_string(),
        "ms" => "Malay".to_string(),
        "tl" => "Filipino".to_string(),
        _ => code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_keeps_source() {
        let mut unit = TranslationUnit::new(0, "Run!");
        unit.fall_back(FallbackReason::Throttled);
        assert_eq!(unit.translated_text, "Run!");
        assert_eq!(unit.status, UnitStatus::Fallback(FallbackReason::Throttled));
    }

    #[test]
    fn test_free_language_codes() {
        assert_eq!(free_language_code("zh", false), "zh-CN");
        assert_eq!(free_language_code("ZH-TW", true), "zh-TW");
        assert_eq!(free_language_code("klingon", true), "auto");
        assert_eq!(free_language_code("sv", false), "sv");
    }

    #[test]
    fn test_language_names() {
        assert_eq!(language_code_to_name("JA"), "Japanese");
        assert_eq!(language_code_to_name("xx"), "xx");
    }

    #[test]
    fn test_status_serializes_with_reason() {
        let json = serde_json::to_string(&UnitStatus::Fallback(FallbackReason::MalformedResponse)).unwrap();
        assert_eq!(json, r#"{"status":"fallback","reason":"malformed_response"}"#);
    }
}

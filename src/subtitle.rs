use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::error::{Result, SubtransError};
use crate::translate::TranslationUnit;

/// One SRT block: index line, timing line, text lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleEntry {
    pub index: String,
    pub timing: String,
    pub text: String,
}

/// Parse SRT content into entries. Malformed blocks are skipped.
pub fn parse_srt(content: &str) -> Vec<SubtitleEntry> {
    let lines: Vec<&str> = content.lines().collect();
    let mut entries = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim().trim_start_matches('\u{feff}');
        if line.is_empty() || !line.chars().all(|c| c.is_ascii_digit()) {
            i += 1;
            continue;
        }

        let index = line.to_string();
        i += 1;

        if i >= lines.len() || !lines[i].contains("-->") {
            continue;
        }

        let timing = lines[i].trim().to_string();
        i += 1;

        let mut text_lines = Vec::new();
        while i < lines.len() && !lines[i].trim().is_empty() {
            text_lines.push(lines[i].trim());
            i += 1;
        }

        entries.push(SubtitleEntry {
            index,
            timing,
            text: text_lines.join("\n"),
        });
    }

    entries
}

/// Serialize entries back into SRT blocks
pub fn build_srt(entries: &[SubtitleEntry]) -> String {
    let mut srt_content = String::new();

    for entry in entries {
        srt_content.push_str(&format!("{}\n{}\n{}\n\n", entry.index, entry.timing, entry.text));
    }

    srt_content
}

/// Convert parsed entries into translation units, one per entry, in order
pub fn to_units(entries: &[SubtitleEntry]) -> Vec<TranslationUnit> {
    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| TranslationUnit::new(idx, entry.text.clone()))
        .collect()
}

/// Replace each entry's text with its unit's translation.
/// Units are matched by sequence index, so order of `units` does not matter.
pub fn apply_units(entries: &[SubtitleEntry], units: &[TranslationUnit]) -> Vec<SubtitleEntry> {
    let mut translated = entries.to_vec();
    for unit in units {
        if let Some(entry) = translated.get_mut(unit.sequence_index) {
            entry.text = unit.output_text().to_string();
        }
    }
    translated
}

/// Read and parse an SRT file
pub async fn read_srt<P: AsRef<Path>>(path: P) -> Result<Vec<SubtitleEntry>> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(SubtransError::FileNotFound(path.display().to_string()));
    }
    if !is_srt(path) {
        return Err(SubtransError::UnsupportedFormat(format!(
            "Only .srt files are allowed: {}",
            path.display()
        )));
    }

    let content = fs::read_to_string(path).await?;
    Ok(parse_srt(&content))
}

/// Write entries to an SRT file
pub async fn write_srt<P: AsRef<Path>>(entries: &[SubtitleEntry], output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Generating SRT file: {}", output_path.display());

    fs::write(output_path, build_srt(entries)).await?;

    info!("SRT file generated successfully");
    Ok(())
}

/// `<stem>_<target>.srt` next to the input, or inside `output_dir` when given
pub fn translated_file_name(input: &Path, target_language: &str, output_dir: Option<&Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "translated".to_string());
    let file_name = format!("{}_{}.srt", stem, target_language);

    match output_dir.or_else(|| input.parent()) {
        Some(dir) => dir.join(file_name),
        None => PathBuf::from(file_name),
    }
}

/// First `count` translated texts joined by newlines
pub fn preview(entries: &[SubtitleEntry], count: usize) -> String {
    entries
        .iter()
        .take(count)
        .map(|e| e.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn is_srt(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("srt"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    const SAMPLE: &str = "1\n00:00:01,000 --> 00:00:02,500\nHello there\n\n\
                          2\n00:00:03,000 --> 00:00:04,000\nTwo lines\nof text\n\n";

    #[test]
    fn test_parse_srt() {
        let entries = parse_srt(SAMPLE);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].index, "1");
        assert_eq!(entries[0].timing, "00:00:01,000 --> 00:00:02,500");
        assert_eq!(entries[1].text, "Two lines\nof text");
    }

    #[test]
    fn test_round_trip_is_exact() {
        assert_eq!(build_srt(&parse_srt(SAMPLE)), SAMPLE);
    }

    #[test]
    fn test_parse_handles_crlf_and_junk() {
        let content = "\u{feff}1\r\n00:00:01,000 --> 00:00:02,000\r\nHi\r\n\r\nnot a block\r\n\
                       3\r\nmissing timing\r\n\r\n";
        let entries = parse_srt(content);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "Hi");
    }

    #[test]
    fn test_apply_units_keeps_structure() {
        let entries = parse_srt(SAMPLE);
        let mut units = to_units(&entries);
        units[0].translated_text = "Xin chào".to_string();
        // Second unit untouched: output falls back to the source text
        let out = apply_units(&entries, &units);
        assert_eq!(out[0].text, "Xin chào");
        assert_eq!(out[0].timing, entries[0].timing);
        assert_eq!(out[1].text, entries[1].text);
    }

    #[test]
    fn test_translated_file_name() {
        let name = translated_file_name(Path::new("/movies/film.srt"), "vi", None);
        assert_eq!(name, PathBuf::from("/movies/film_vi.srt"));

        let name = translated_file_name(Path::new("film.srt"), "ja", Some(Path::new("/out")));
        assert_eq!(name, PathBuf::from("/out/film_ja.srt"));
    }

    #[tokio::test]
    async fn test_read_and_write_files() {
        let temp = assert_fs::TempDir::new().unwrap();
        let input = temp.child("movie.srt");
        input.write_str(SAMPLE).unwrap();

        let entries = read_srt(input.path()).await.unwrap();
        let output = temp.child("movie_vi.srt");
        write_srt(&entries, output.path()).await.unwrap();
        output.assert(SAMPLE);

        let other = temp.child("movie.txt");
        other.write_str(SAMPLE).unwrap();
        assert!(matches!(
            read_srt(other.path()).await,
            Err(SubtransError::UnsupportedFormat(_))
        ));
    }
}

/// Shared types and error taxonomy for the vrenamer pipeline.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error taxonomy shared across every crate in the workspace.
///
/// Each crate surfaces errors through its own local enum where it needs
/// extra context, but converts into this one at its public boundary via
/// `#[from]` so the CLI layer only ever matches on four kinds.
#[derive(Debug, Error)]
pub enum VRenamerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("video decode error: {0}")]
    VideoDecode(String),

    #[error("API error (status={status:?}): {detail}")]
    Api {
        status: Option<u16>,
        detail: String,
    },

    #[error("file operation error: {0}")]
    FileOperation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VRenamerError>;

/// Ordered, deduplicated, bounded set of still frames sampled from one video.
#[derive(Debug, Clone)]
pub struct FrameSet {
    pub output_dir: PathBuf,
    pub frames: Vec<PathBuf>,
    pub duration_secs: f64,
    pub sampling_rate_fps: f64,
}

impl FrameSet {
    /// Every frame path must exist and be readable; used by callers that
    /// accept a `FrameSet` built elsewhere (e.g. constructed in tests).
    pub fn validate(&self) -> Result<()> {
        if self.frames.len() > 4096 {
            return Err(VRenamerError::Config(
                "frame set implausibly large".to_string(),
            ));
        }
        for f in &self.frames {
            if !f.is_file() {
                return Err(VRenamerError::VideoDecode(format!(
                    "missing frame file: {}",
                    f.display()
                )));
            }
        }
        Ok(())
    }
}

/// Static specification for one classification subtask, loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub id: String,
    pub prompt_ref: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub batch_size: Option<usize>,
}

fn default_true() -> bool {
    true
}

/// Result of a single LLM call over one frame batch.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub labels: Vec<String>,
    pub confidence: f64,
    pub error: Option<String>,
}

/// Aggregated result of one subtask's tier-2 fan-out.
#[derive(Debug, Clone)]
pub struct SubtaskResult {
    pub subtask_id: String,
    pub labels: Vec<String>,
    pub batches_attempted: usize,
    pub frames_consumed: usize,
}

pub const UNKNOWN_LABEL: &str = "unknown";

/// Final, total mapping from subtask id to its label list. When a
/// transcript was supplied it is folded into this same map under the
/// `"transcript"` key (single-element value), so `labels.keys()` alone
/// gives the complete key set the spec describes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub labels: indexmap_like::OrderedMap,
}

pub const TRANSCRIPT_KEY: &str = "transcript";

/// A tiny insertion-ordered string->Vec<String> map, sidestepping a
/// dependency on the `indexmap` crate for the one place order matters:
/// the final report must iterate in configuration order regardless of
/// completion order (spec: cross-subtask ordering guarantee).
pub mod indexmap_like {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct OrderedMap {
        entries: Vec<(String, Vec<String>)>,
    }

    impl OrderedMap {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&mut self, key: String, value: Vec<String>) {
            if let Some(existing) = self.entries.iter_mut().find(|(k, _)| *k == key) {
                existing.1 = value;
            } else {
                self.entries.push((key, value));
            }
        }

        pub fn get(&self, key: &str) -> Option<&Vec<String>> {
            self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
        }

        pub fn keys(&self) -> impl Iterator<Item = &String> {
            self.entries.iter().map(|(k, _)| k)
        }

        pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
            self.entries.iter().map(|(k, v)| (k, v))
        }

        pub fn len(&self) -> usize {
            self.entries.len()
        }

        pub fn is_empty(&self) -> bool {
            self.entries.is_empty()
        }
    }
}

/// Closed set of supported naming-style languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Zh,
    En,
}

/// Static specification for one naming style, loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleSpec {
    pub id: String,
    pub label: String,
    pub language: Language,
    pub examples: Vec<String>,
    pub prompt_ref: String,
}

/// One sanitized, style-tagged candidate filename stem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameCandidate {
    pub style_id: String,
    pub style_label: String,
    pub filename: String,
    pub language: Language,
}

/// One append-only audit record, written before the rename it describes commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameRecord {
    pub source: PathBuf,
    pub target: PathBuf,
    pub report: AnalysisReport,
    pub timestamp: DateTime<Utc>,
    pub dry_run: bool,
}

/// Video extensions recognized by the scanner and the rename executor.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg",
];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// "Garbled filename" heuristic (spec §6): not pure ASCII, no CJK codepoint,
/// and more than 30% non-alphanumeric characters outside ` -_.`.
pub fn is_garbled(stem: &str) -> bool {
    if stem.is_ascii() {
        return false;
    }
    let has_cjk = stem.chars().any(|c| {
        ('\u{4e00}'..='\u{9fff}').contains(&c)
            || ('\u{3040}'..='\u{30ff}').contains(&c)
            || ('\u{ac00}'..='\u{d7af}').contains(&c)
    });
    if has_cjk {
        return false;
    }
    let total = stem.chars().count();
    if total == 0 {
        return false;
    }
    let special = stem
        .chars()
        .filter(|c| !c.is_alphanumeric() && !matches!(c, ' ' | '-' | '_' | '.'))
        .count();
    (special as f64) > (total as f64) * 0.3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbled_pure_ascii_is_not_garbled() {
        assert!(!is_garbled("my_vacation_video_2024"));
    }

    #[test]
    fn garbled_cjk_is_not_garbled() {
        assert!(!is_garbled("办公室女主角"));
    }

    #[test]
    fn garbled_mojibake_is_garbled() {
        assert!(is_garbled("Ã¯Â¿Â½Ã¯Â¿Â½###@@@"));
    }

    #[test]
    fn video_extension_matching_is_case_insensitive() {
        assert!(is_video_file(Path::new("clip.MP4")));
        assert!(!is_video_file(Path::new("notes.txt")));
    }

    #[test]
    fn ordered_map_preserves_insertion_order() {
        let mut m = indexmap_like::OrderedMap::new();
        m.insert("scene".to_string(), vec!["a".to_string()]);
        m.insert("role".to_string(), vec!["b".to_string()]);
        let keys: Vec<&String> = m.keys().collect();
        assert_eq!(keys, vec!["scene", "role"]);
    }

    #[test]
    fn frameset_validate_rejects_missing_files() {
        let fs = FrameSet {
            output_dir: PathBuf::from("/tmp/does-not-exist-vrenamer"),
            frames: vec![PathBuf::from("/tmp/does-not-exist-vrenamer/frame_0.jpg")],
            duration_secs: 10.0,
            sampling_rate_fps: 1.0,
        };
        assert!(fs.validate().is_err());
    }
}

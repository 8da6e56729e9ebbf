//! Audio transcription (interface-only; out of scope per the spec).
//!
//! The analysis engine accepts an optional transcript string and attaches
//! it to the report under the `transcript` key. This crate specifies the
//! interface a real backend would implement and ships a no-op stand-in
//! until one is wired in.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;
use vrenamer_common::Result;

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, video: &Path) -> Result<Option<String>>;
}

/// Always reports "no transcript available" without touching the filesystem.
pub struct NullTranscriber;

#[async_trait]
impl Transcriber for NullTranscriber {
    async fn transcribe(&self, video: &Path) -> Result<Option<String>> {
        debug!(video = %video.display(), "no transcription backend configured");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_transcriber_returns_none() {
        let t = NullTranscriber;
        let result = t.transcribe(Path::new("clip.mp4")).await.unwrap();
        assert!(result.is_none());
    }
}

//! Frame Sampler (C1)
//!
//! Decodes a video into a bounded, deduplicated, evenly-spaced set of still
//! frames on disk via the external `ffprobe`/`ffmpeg` binaries.

use img_hash::{HashAlg, HasherConfig};
use md5::{Digest, Md5};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};
use vrenamer_common::{FrameSet, Result, VRenamerError};

const FALLBACK_DURATION_SECS: f64 = 180.0;
const MIN_FPS: f64 = 0.1;
const MAX_FPS: f64 = 6.0;
const PERCEPTUAL_HAMMING_THRESHOLD: u32 = 5;

#[derive(Debug, Clone)]
pub struct FrameSampler {
    /// Frames requested before the duration-driven fps is computed.
    pub target_frames: usize,
    /// Hard ceiling on the final frame count after dedup.
    pub target_max: usize,
    /// Output width; height is derived to preserve aspect ratio.
    pub scale_width: u32,
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self {
            target_frames: 96,
            target_max: 96,
            scale_width: 640,
        }
    }
}

impl FrameSampler {
    #[must_use]
    pub fn new(target_frames: usize) -> Self {
        Self {
            target_frames,
            target_max: target_frames,
            ..Self::default()
        }
    }

    /// Sample `video` into a deduplicated, bounded `FrameSet` under `output_dir`.
    pub fn sample(&self, video: &Path, output_dir: &Path) -> Result<FrameSet> {
        if std::fs::metadata(output_dir).is_ok() {
            std::fs::remove_dir_all(output_dir)?;
        }
        std::fs::create_dir_all(output_dir)?;

        let duration = probe_duration(video);
        let fps = (self.target_frames as f64 / duration).clamp(MIN_FPS, MAX_FPS);
        info!(
            "sampling {} at fps={:.4} (duration={:.1}s, target_frames={})",
            video.display(),
            fps,
            duration,
            self.target_frames
        );

        let raw_frames = run_ffmpeg_sample(video, fps, output_dir, self.scale_width)?;
        if raw_frames.is_empty() {
            return Err(VRenamerError::VideoDecode(format!(
                "ffmpeg produced zero frames for {}",
                video.display()
            )));
        }

        let exact_deduped = dedup_exact(raw_frames);
        let perceptual_deduped = dedup_perceptual(exact_deduped, PERCEPTUAL_HAMMING_THRESHOLD);
        let capped = cap_even(perceptual_deduped, self.target_max);

        info!(
            "{} -> {} frames after dedup/cap",
            video.display(),
            capped.len()
        );

        Ok(FrameSet {
            output_dir: output_dir.to_path_buf(),
            frames: capped,
            duration_secs: duration,
            sampling_rate_fps: fps,
        })
    }
}

/// Probe the video's duration in seconds via `ffprobe`. Falls back to
/// `FALLBACK_DURATION_SECS` (logging a warning) on any failure, per spec:
/// a missing probe must never abort sampling.
fn probe_duration(video: &Path) -> f64 {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(video)
        .output();

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .trim()
            .parse::<f64>()
            .unwrap_or_else(|_| {
                warn!("ffprobe returned unparseable duration for {}", video.display());
                FALLBACK_DURATION_SECS
            }),
        Ok(out) => {
            warn!(
                "ffprobe failed for {}: {}",
                video.display(),
                String::from_utf8_lossy(&out.stderr)
            );
            FALLBACK_DURATION_SECS
        }
        Err(e) => {
            warn!("failed to execute ffprobe for {}: {}", video.display(), e);
            FALLBACK_DURATION_SECS
        }
    }
}

/// Invoke `ffmpeg` to emit numbered JPEG frames at the given sampling rate.
fn run_ffmpeg_sample(
    video: &Path,
    fps: f64,
    output_dir: &Path,
    scale_width: u32,
) -> Result<Vec<PathBuf>> {
    let pattern = output_dir.join("frame_%08d.jpg");
    let vf = format!("fps={fps},scale={scale_width}:-1");

    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-i"])
        .arg(video)
        .args(["-vf", &vf, "-vsync", "vfr"])
        .arg(&pattern)
        .output()
        .map_err(|e| VRenamerError::VideoDecode(format!("failed to execute ffmpeg: {e}")))?;

    if !output.status.success() {
        return Err(VRenamerError::VideoDecode(format!(
            "ffmpeg failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let mut frames: Vec<PathBuf> = std::fs::read_dir(output_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jpg"))
        .collect();
    frames.sort();
    Ok(frames)
}

/// Pass (a): drop byte-identical frames by MD5 digest, unlinking duplicates.
fn dedup_exact(frames: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(frames.len());
    for path in frames {
        let digest = match std::fs::read(&path) {
            Ok(bytes) => {
                let mut hasher = Md5::new();
                hasher.update(&bytes);
                format!("{:x}", hasher.finalize())
            }
            Err(_) => {
                kept.push(path);
                continue;
            }
        };
        if seen.insert(digest) {
            kept.push(path);
        } else {
            let _ = std::fs::remove_file(&path);
        }
    }
    kept
}

/// Pass (b): drop near-duplicate frames by perceptual hash, Hamming distance
/// <= threshold against every retained frame. Best-effort: if an image fails
/// to decode, it is kept rather than dropped (spec: dependency unavailable
/// means "retain all byte-distinct frames").
fn dedup_perceptual(frames: Vec<PathBuf>, threshold: u32) -> Vec<PathBuf> {
    let hasher = HasherConfig::new().hash_alg(HashAlg::Gradient).to_hasher();
    let mut kept: Vec<PathBuf> = Vec::with_capacity(frames.len());
    let mut kept_hashes: Vec<img_hash::ImageHash> = Vec::with_capacity(frames.len());

    for path in frames {
        let img = match image::open(&path) {
            Ok(img) => img,
            Err(_) => {
                kept.push(path);
                continue;
            }
        };
        let hash = hasher.hash_image(&img);
        let is_dup = kept_hashes
            .iter()
            .any(|h| hash.dist(h) <= threshold);
        if is_dup {
            let _ = std::fs::remove_file(&path);
        } else {
            kept_hashes.push(hash);
            kept.push(path);
        }
    }
    kept
}

/// Cap to `target_max` by evenly-spaced index sampling, then drop any
/// collisions introduced by rounding while preserving order.
fn cap_even(frames: Vec<PathBuf>, target_max: usize) -> Vec<PathBuf> {
    let n = frames.len();
    if n <= target_max || target_max == 0 {
        return frames;
    }
    if target_max == 1 {
        return vec![frames[0].clone()];
    }

    let mut indices: Vec<usize> = (0..target_max)
        .map(|i| {
            let numer = i as f64 * (n as f64 - 1.0);
            let denom = target_max as f64 - 1.0;
            (numer / denom).round() as usize
        })
        .collect();
    indices.dedup();

    indices.into_iter().map(|i| frames[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_even_preserves_endpoints_and_order() {
        let frames: Vec<PathBuf> = (0..20).map(|i| PathBuf::from(format!("f{i}"))).collect();
        let capped = cap_even(frames.clone(), 5);
        assert_eq!(capped.first(), frames.first());
        assert_eq!(capped.last(), frames.last());
        assert!(capped.len() <= 5);
        let mut sorted = capped.clone();
        sorted.sort();
        assert_eq!(capped, sorted, "cap_even must preserve temporal order");
    }

    #[test]
    fn cap_even_is_noop_below_target() {
        let frames: Vec<PathBuf> = (0..3).map(|i| PathBuf::from(format!("f{i}"))).collect();
        let capped = cap_even(frames.clone(), 96);
        assert_eq!(capped, frames);
    }

    #[test]
    fn cap_even_dedupes_rounding_collisions() {
        let frames: Vec<PathBuf> = (0..3).map(|i| PathBuf::from(format!("f{i}"))).collect();
        let capped = cap_even(frames, 2);
        let unique: HashSet<_> = capped.iter().collect();
        assert_eq!(unique.len(), capped.len());
    }

    #[test]
    fn fps_is_clamped_to_bounds() {
        let long = (96.0_f64 / 10_000.0).clamp(MIN_FPS, MAX_FPS);
        assert!((long - MIN_FPS).abs() < 1e-9);
        let short = (96.0_f64 / 1.0).clamp(MIN_FPS, MAX_FPS);
        assert!((short - MAX_FPS).abs() < 1e-9);
    }
}

//! Directory scan glue: walk a directory, filter to video files, and
//! surface the "garbled filename" count for `scan`.

use std::path::{Path, PathBuf};
use vrenamer_common::{is_garbled, is_video_file};

pub struct ScanReport {
    pub videos: Vec<PathBuf>,
    pub total_bytes: u64,
    pub garbled_count: usize,
}

pub fn scan(root: &Path, recursive: bool) -> std::io::Result<ScanReport> {
    let mut videos = Vec::new();
    let mut total_bytes = 0u64;
    let mut garbled_count = 0usize;

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();

            if path.is_dir() {
                if recursive && !name.starts_with('.') && !matches!(&*name, "logs" | "temp" | "tmp")
                {
                    stack.push(path);
                }
                continue;
            }

            if is_video_file(&path) {
                if let Ok(meta) = entry.metadata() {
                    total_bytes += meta.len();
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if is_garbled(stem) {
                        garbled_count += 1;
                    }
                }
                videos.push(path);
            }
        }
        if !recursive {
            break;
        }
    }

    Ok(ScanReport {
        videos,
        total_bytes,
        garbled_count,
    })
}

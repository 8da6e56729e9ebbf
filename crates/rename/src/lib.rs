//! Rename Executor (C7)
//!
//! Applies a chosen naming candidate to the source file with collision
//! suffixing, and emits an append-only, line-atomic audit record before the
//! rename commits.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use vrenamer_common::{AnalysisReport, NameCandidate, RenameRecord, Result, VRenamerError};

pub struct RenameExecutor {
    audit_log: PathBuf,
}

impl RenameExecutor {
    pub fn new(audit_log: PathBuf) -> Self {
        Self { audit_log }
    }

    /// Rename `source` to a collision-free target derived from `candidate`.
    /// Writes the audit record before attempting the filesystem rename; in
    /// dry-run mode the record is written but the rename is skipped.
    pub fn rename(
        &self,
        source: &Path,
        candidate: &NameCandidate,
        report: AnalysisReport,
        dry_run: bool,
    ) -> Result<PathBuf> {
        let target = resolve_collision_free_target(source, &candidate.filename)?;

        let record = RenameRecord {
            source: source.to_path_buf(),
            target: target.clone(),
            report,
            timestamp: Utc::now(),
            dry_run,
        };
        append_audit_record(&self.audit_log, &record)?;

        if dry_run {
            info!(
                "dry-run: would rename {} -> {}",
                source.display(),
                target.display()
            );
            return Ok(target);
        }

        std::fs::rename(source, &target).map_err(|e| {
            VRenamerError::FileOperation(format!(
                "failed to rename {} -> {}: {e}",
                source.display(),
                target.display()
            ))
        })?;
        info!("renamed {} -> {}", source.display(), target.display());
        Ok(target)
    }

    /// Replay the audit log in reverse order, restoring each recorded
    /// rename when `target` exists and `source` does not. Idempotent: a
    /// line whose restore preconditions no longer hold is skipped.
    pub fn rollback(&self) -> Result<usize> {
        let records = read_audit_records(&self.audit_log)?;
        let mut restored = 0;

        for record in records.into_iter().rev() {
            if record.dry_run {
                continue;
            }
            if record.target.exists() && !record.source.exists() {
                std::fs::rename(&record.target, &record.source).map_err(|e| {
                    VRenamerError::FileOperation(format!(
                        "rollback failed for {} -> {}: {e}",
                        record.target.display(),
                        record.source.display()
                    ))
                })?;
                info!(
                    "rolled back {} -> {}",
                    record.target.display(),
                    record.source.display()
                );
                restored += 1;
            }
        }
        Ok(restored)
    }
}

fn resolve_collision_free_target(source: &Path, filename: &str) -> Result<PathBuf> {
    let dir = source.parent().unwrap_or_else(|| Path::new("."));
    let ext = source.extension().and_then(|e| e.to_str());

    let candidate_path = |stem: &str| -> PathBuf {
        match ext {
            Some(ext) => dir.join(format!("{stem}.{ext}")),
            None => dir.join(stem),
        }
    };

    let mut target = candidate_path(filename);
    if !target.exists() {
        return Ok(target);
    }

    for i in 1.. {
        let stem = format!("{filename}_{i}");
        target = candidate_path(&stem);
        if !target.exists() {
            return Ok(target);
        }
        if i > 10_000 {
            return Err(VRenamerError::FileOperation(
                "exhausted collision suffixes".to_string(),
            ));
        }
    }
    unreachable!()
}

fn append_audit_record(audit_log: &Path, record: &RenameRecord) -> Result<()> {
    if let Some(parent) = audit_log.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(audit_log)?;
    let line = serde_json::to_string(record)
        .map_err(|e| VRenamerError::FileOperation(format!("failed to serialize audit record: {e}")))?;
    writeln!(file, "{line}")?;
    Ok(())
}

fn read_audit_records(audit_log: &Path) -> Result<Vec<RenameRecord>> {
    let file = std::fs::File::open(audit_log)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RenameRecord = serde_json::from_str(&line).map_err(|e| {
            VRenamerError::FileOperation(format!("corrupt audit line: {e}"))
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrenamer_common::Language;

    fn candidate(name: &str) -> NameCandidate {
        NameCandidate {
            style_id: "classic".to_string(),
            style_label: "Classic".to_string(),
            filename: name.to_string(),
            language: Language::En,
        }
    }

    #[test]
    fn s5_rename_collision_appends_incrementing_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("foo.mp4");
        std::fs::write(&source, b"x").unwrap();
        std::fs::write(dir.path().join("bar.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("bar_1.mp4"), b"x").unwrap();

        let executor = RenameExecutor::new(dir.path().join("audit.jsonl"));
        let target = executor
            .rename(&source, &candidate("bar"), AnalysisReport::default(), false)
            .unwrap();

        assert_eq!(target.file_name().unwrap().to_str().unwrap(), "bar_2.mp4");
        assert!(target.exists());
        assert!(!source.exists());
    }

    #[test]
    fn s6_rollback_restores_original_name_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("foo.mp4");
        std::fs::write(&source, b"x").unwrap();

        let executor = RenameExecutor::new(dir.path().join("audit.jsonl"));
        let target = executor
            .rename(&source, &candidate("bar"), AnalysisReport::default(), false)
            .unwrap();
        assert!(target.exists());

        let restored = executor.rollback().unwrap();
        assert_eq!(restored, 1);
        assert!(source.exists());
        assert!(!target.exists());

        let restored_again = executor.rollback().unwrap();
        assert_eq!(restored_again, 0);
    }

    #[test]
    fn dry_run_writes_audit_but_does_not_rename() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("foo.mp4");
        std::fs::write(&source, b"x").unwrap();

        let executor = RenameExecutor::new(dir.path().join("audit.jsonl"));
        let target = executor
            .rename(&source, &candidate("bar"), AnalysisReport::default(), true)
            .unwrap();

        assert!(source.exists());
        assert!(!target.exists());
        assert!(dir.path().join("audit.jsonl").exists());
    }
}

//! Analysis Engine (C5) — the two-tier concurrent scheduler.
//!
//! Tier 1 fans out enabled subtasks under `S_task` permits; tier 2 fans out
//! each subtask's frame batches under a single, shared `S_batch` pool.
//! Individual subtask and batch failures degrade rather than propagate, so
//! `analyze` only fails when configuration loading itself fails.

use futures::future::join_all;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use vrenamer_common::{
    indexmap_like::OrderedMap, AnalysisReport, BatchResult, FrameSet, Result, SubtaskResult,
    SubtaskSpec, VRenamerError, TRANSCRIPT_KEY, UNKNOWN_LABEL,
};
use vrenamer_json_extract::parse as parse_json;
use vrenamer_llm_gateway::{ClassifyOpts, LlmGateway};
use vrenamer_prompts::PromptStore;

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub task_concurrency: usize,
    pub batch_concurrency: usize,
    pub batch_size: usize,
    pub batch_size_max: usize,
    pub top_k: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            task_concurrency: 4,
            batch_concurrency: 16,
            batch_size: 20,
            batch_size_max: 50,
            top_k: 3,
        }
    }
}

/// Advisory progress events, fired synchronously from whatever worker
/// completes the batch. Implementations must not block in the callback.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    BatchDone {
        subtask: String,
        batch_idx: usize,
        total_batches: usize,
        labels: Vec<String>,
    },
    Error {
        subtask: String,
        batch_idx: usize,
        message: String,
    },
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

pub struct AnalysisEngine {
    gateway: Arc<dyn LlmGateway>,
    prompts: Arc<PromptStore>,
    subtasks: Vec<SubtaskSpec>,
    config: AnalysisConfig,
}

impl AnalysisEngine {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        prompts: Arc<PromptStore>,
        subtasks: Vec<SubtaskSpec>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            gateway,
            prompts,
            subtasks,
            config,
        }
    }

    /// Run every enabled subtask (tier 1) and, within each, every frame
    /// batch (tier 2), then assemble the total report in configuration
    /// order. Never fails unless `frames` itself is invalid.
    pub async fn analyze(
        &self,
        frames: &FrameSet,
        transcript: Option<String>,
        progress: Option<ProgressCallback>,
    ) -> Result<AnalysisReport> {
        frames.validate()?;

        let s_task = Arc::new(Semaphore::new(self.config.task_concurrency.max(1)));
        let s_batch = Arc::new(Semaphore::new(self.config.batch_concurrency.max(1)));

        let enabled: Vec<&SubtaskSpec> = self.subtasks.iter().filter(|s| s.enabled).collect();

        let subtask_futures = enabled.iter().map(|spec| {
            let spec = (*spec).clone();
            let s_task = Arc::clone(&s_task);
            let s_batch = Arc::clone(&s_batch);
            let gateway = Arc::clone(&self.gateway);
            let prompts = Arc::clone(&self.prompts);
            let progress = progress.clone();
            let frames = frames.frames.clone();
            let config = self.config.clone();

            async move {
                let _permit = s_task
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let labels = run_subtask(
                    &spec,
                    &frames,
                    &config,
                    gateway,
                    prompts,
                    s_batch,
                    progress,
                )
                .await;
                (spec.id.clone(), labels)
            }
        });

        let results = join_all(subtask_futures).await;

        let mut report = AnalysisReport::default();
        let mut labels_map = OrderedMap::new();
        for (id, labels) in results {
            labels_map.insert(id, labels);
        }
        if let Some(t) = transcript {
            labels_map.insert(TRANSCRIPT_KEY.to_string(), vec![t]);
        }
        report.labels = labels_map;

        Ok(report)
    }
}

async fn run_subtask(
    spec: &SubtaskSpec,
    all_frames: &[PathBuf],
    config: &AnalysisConfig,
    gateway: Arc<dyn LlmGateway>,
    prompts: Arc<PromptStore>,
    s_batch: Arc<Semaphore>,
    progress: Option<ProgressCallback>,
) -> Vec<String> {
    debug!(subtask = %spec.id, "starting subtask");

    let mut shuffled = all_frames.to_vec();
    shuffled.shuffle(&mut rand::thread_rng());

    let batch_size = spec
        .batch_size
        .unwrap_or(config.batch_size)
        .min(config.batch_size_max)
        .max(1);
    let batches: Vec<Vec<PathBuf>> = shuffled
        .chunks(batch_size)
        .map(|c| c.to_vec())
        .collect();
    let total_batches = batches.len();

    let batch_futures = batches.into_iter().enumerate().map(|(idx, batch_frames)| {
        let subtask_id = spec.id.clone();
        let prompt_ref = spec.prompt_ref.clone();
        let gateway = Arc::clone(&gateway);
        let prompts = Arc::clone(&prompts);
        let s_batch = Arc::clone(&s_batch);
        let progress = progress.clone();

        async move {
            run_batch(
                &subtask_id,
                &prompt_ref,
                idx,
                total_batches,
                batch_frames,
                gateway,
                prompts,
                s_batch,
                progress,
            )
            .await
        }
    });

    let batch_results: Vec<BatchResult> = join_all(batch_futures).await;

    let confidences: Vec<f64> = batch_results
        .iter()
        .filter(|b| b.error.is_none())
        .map(|b| b.confidence)
        .collect();
    let mean_confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    };

    let label_count = aggregate_labels(&batch_results, config.top_k);
    let labels = if label_count.is_empty() {
        vec![UNKNOWN_LABEL.to_string()]
    } else {
        label_count
    };

    let subtask_result = SubtaskResult {
        subtask_id: spec.id.clone(),
        labels: labels.clone(),
        batches_attempted: total_batches,
        frames_consumed: all_frames.len(),
    };
    match mean_confidence {
        Some(mean) => info!(
            subtask = %subtask_result.subtask_id,
            mean_confidence = mean,
            batches = subtask_result.batches_attempted,
            frames = subtask_result.frames_consumed,
            "subtask classification confidence"
        ),
        None => info!(
            subtask = %subtask_result.subtask_id,
            "subtask produced no successful batches; confidence unavailable"
        ),
    }

    labels
}

#[allow(clippy::too_many_arguments)]
async fn run_batch(
    subtask_id: &str,
    prompt_ref: &str,
    batch_idx: usize,
    total_batches: usize,
    batch_frames: Vec<PathBuf>,
    gateway: Arc<dyn LlmGateway>,
    prompts: Arc<PromptStore>,
    s_batch: Arc<Semaphore>,
    progress: Option<ProgressCallback>,
) -> BatchResult {
    let permit = s_batch.acquire_owned().await.expect("semaphore never closed");

    let outcome = render_and_classify(subtask_id, prompt_ref, &batch_frames, &gateway, &prompts).await;
    drop(permit);

    match outcome {
        Ok((labels, confidence)) => {
            if let Some(cb) = &progress {
                cb(ProgressEvent::BatchDone {
                    subtask: subtask_id.to_string(),
                    batch_idx,
                    total_batches,
                    labels: labels.clone(),
                });
            }
            BatchResult {
                labels,
                confidence,
                error: None,
            }
        }
        Err(e) => {
            if let Some(cb) = &progress {
                cb(ProgressEvent::Error {
                    subtask: subtask_id.to_string(),
                    batch_idx,
                    message: e.to_string(),
                });
            }
            BatchResult {
                labels: vec![],
                confidence: 0.0,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Renders the subtask's full prompt (system + user, same join the naming
/// engine uses) and classifies one frame batch. Returns the parsed labels
/// and the model-reported confidence (0.0 if absent or unparseable).
async fn render_and_classify(
    subtask_id: &str,
    prompt_ref: &str,
    batch_frames: &[PathBuf],
    gateway: &Arc<dyn LlmGateway>,
    prompts: &Arc<PromptStore>,
) -> Result<(Vec<String>, f64)> {
    let mut vars = HashMap::new();
    vars.insert("subtask", subtask_id.to_string());
    let rendered = prompts.render(prompt_ref, &vars)?;
    let prompt = format!("{}\n\n{}", rendered.system, rendered.user);

    let text = gateway
        .classify(&prompt, batch_frames, ClassifyOpts::default())
        .await?;

    let value = parse_json(&text);
    let (labels, confidence) = match value {
        Some(v) => {
            let labels = v
                .get("labels")
                .and_then(|l| l.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|x| x.as_str().map(str::to_string))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            let confidence = v.get("confidence").and_then(|c| c.as_f64()).unwrap_or(0.0);
            (labels, confidence)
        }
        None => (vec![], 0.0),
    };
    Ok((labels, confidence))
}

/// Count-then-top-K: concatenate in completion order, count occurrences,
/// sort by descending count with ties broken by first-seen order (a stable
/// sort over a first-seen-ordered vector preserves this automatically).
fn aggregate_labels(batches: &[BatchResult], top_k: usize) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for batch in batches {
        for label in &batch.labels {
            if !counts.contains_key(label) {
                order.push(label.clone());
            }
            *counts.entry(label.clone()).or_insert(0) += 1;
        }
    }

    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order.into_iter().take(top_k).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use vrenamer_llm_gateway::GenerateOpts;

    struct MockGateway {
        call_count: AtomicUsize,
        behavior: MockBehavior,
    }

    enum MockBehavior {
        EvenOddAB,
        FailEveryThird,
        AlwaysFail,
    }

    #[async_trait]
    impl LlmGateway for MockGateway {
        async fn classify(
            &self,
            _prompt: &str,
            _images: &[PathBuf],
            _opts: ClassifyOpts,
        ) -> Result<String> {
            let n = self.call_count.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                MockBehavior::EvenOddAB => {
                    if n % 2 == 0 {
                        Ok(r#"{"labels":["A"],"confidence":0.9}"#.to_string())
                    } else {
                        Ok(r#"{"labels":["B"],"confidence":0.9}"#.to_string())
                    }
                }
                MockBehavior::FailEveryThird => {
                    if n % 3 == 2 {
                        Err(VRenamerError::Api {
                            status: Some(500),
                            detail: "mock failure".to_string(),
                        })
                    } else {
                        Ok(r#"{"labels":["X"],"confidence":0.9}"#.to_string())
                    }
                }
                MockBehavior::AlwaysFail => Err(VRenamerError::Api {
                    status: Some(500),
                    detail: "mock failure".to_string(),
                }),
            }
        }

        async fn generate(&self, _prompt: &str, _opts: GenerateOpts) -> Result<String> {
            unimplemented!("not used by analysis engine")
        }
    }

    fn test_prompts(dir: &std::path::Path, ids: &[&str]) -> PromptStore {
        for id in ids {
            std::fs::write(
                dir.join(format!("{id}.yaml")),
                "system: \"classify\"\nuser_template: \"subtask={{subtask}}\"\n",
            )
            .unwrap();
        }
        PromptStore::load_dir(dir).unwrap()
    }

    fn frame_set(dir: &std::path::Path, n: usize) -> FrameSet {
        let frames: Vec<PathBuf> = (0..n)
            .map(|i| {
                let p = dir.join(format!("frame_{i}.jpg"));
                std::fs::write(&p, b"fake").unwrap();
                p
            })
            .collect();
        FrameSet {
            output_dir: dir.to_path_buf(),
            frames,
            duration_secs: 20.0,
            sampling_rate_fps: 1.0,
        }
    }

    fn subtasks(ids: &[&str]) -> Vec<SubtaskSpec> {
        ids.iter()
            .map(|id| SubtaskSpec {
                id: id.to_string(),
                prompt_ref: id.to_string(),
                enabled: true,
                batch_size: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn s1_mocked_happy_path_tie_breaks_to_first_seen() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = Arc::new(test_prompts(dir.path(), &["role", "scene"]));
        let frames = frame_set(dir.path(), 20);
        let gateway = Arc::new(MockGateway {
            call_count: AtomicUsize::new(0),
            behavior: MockBehavior::EvenOddAB,
        });

        let config = AnalysisConfig {
            task_concurrency: 2,
            batch_concurrency: 4,
            batch_size: 5,
            batch_size_max: 50,
            top_k: 3,
        };
        let engine = AnalysisEngine::new(gateway, prompts, subtasks(&["role", "scene"]), config);
        let report = engine.analyze(&frames, None, None).await.unwrap();

        assert_eq!(report.labels.get("role").unwrap(), &vec!["A", "B"]);
        assert_eq!(report.labels.get("scene").unwrap(), &vec!["A", "B"]);
    }

    #[tokio::test]
    async fn s2_partial_batch_failure_degrades_batch_not_subtask() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = Arc::new(test_prompts(dir.path(), &["role", "scene"]));
        let frames = frame_set(dir.path(), 20);
        let gateway = Arc::new(MockGateway {
            call_count: AtomicUsize::new(0),
            behavior: MockBehavior::FailEveryThird,
        });

        let errors: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = Arc::clone(&errors);
        let cb: ProgressCallback = Arc::new(move |ev| {
            if let ProgressEvent::Error { .. } = &ev {
                errors_clone.lock().unwrap().push(ev);
            }
        });

        let config = AnalysisConfig {
            task_concurrency: 2,
            batch_concurrency: 4,
            batch_size: 5,
            batch_size_max: 50,
            top_k: 3,
        };
        let engine = AnalysisEngine::new(gateway, prompts, subtasks(&["role", "scene"]), config);
        let report = engine.analyze(&frames, None, Some(cb)).await.unwrap();

        assert_eq!(report.labels.get("role").unwrap(), &vec!["X"]);
        assert_eq!(report.labels.get("scene").unwrap(), &vec!["X"]);
        assert!(!errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn s3_all_batches_fail_degrades_to_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = Arc::new(test_prompts(dir.path(), &["role", "scene"]));
        let frames = frame_set(dir.path(), 20);
        let gateway = Arc::new(MockGateway {
            call_count: AtomicUsize::new(0),
            behavior: MockBehavior::AlwaysFail,
        });

        let config = AnalysisConfig {
            task_concurrency: 2,
            batch_concurrency: 4,
            batch_size: 5,
            batch_size_max: 50,
            top_k: 3,
        };
        let engine = AnalysisEngine::new(gateway, prompts, subtasks(&["role", "scene"]), config);
        let report = engine.analyze(&frames, None, None).await.unwrap();

        assert_eq!(report.labels.get("role").unwrap(), &vec!["unknown"]);
        assert_eq!(report.labels.get("scene").unwrap(), &vec!["unknown"]);
    }

    #[test]
    fn aggregate_labels_respects_top_k_bound() {
        let batches = vec![
            BatchResult {
                labels: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                confidence: 0.9,
                error: None,
            },
            BatchResult {
                labels: vec!["a".into(), "b".into()],
                confidence: 0.8,
                error: None,
            },
        ];
        let top = aggregate_labels(&batches, 3);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0], "a");
        assert_eq!(top[1], "b");
    }

    #[tokio::test]
    async fn transcript_is_folded_into_labels_under_transcript_key() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = Arc::new(test_prompts(dir.path(), &["role"]));
        let frames = frame_set(dir.path(), 5);
        let gateway = Arc::new(MockGateway {
            call_count: AtomicUsize::new(0),
            behavior: MockBehavior::EvenOddAB,
        });

        let engine = AnalysisEngine::new(
            gateway,
            prompts,
            subtasks(&["role"]),
            AnalysisConfig::default(),
        );
        let report = engine
            .analyze(&frames, Some("hello world".to_string()), None)
            .await
            .unwrap();

        assert_eq!(
            report.labels.get(TRANSCRIPT_KEY).unwrap(),
            &vec!["hello world".to_string()]
        );
        let keys: Vec<&String> = report.labels.keys().collect();
        assert!(keys.contains(&&"role".to_string()));
        assert!(keys.contains(&&TRANSCRIPT_KEY.to_string()));
    }
}

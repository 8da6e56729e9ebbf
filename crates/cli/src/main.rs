//! vrenamer CLI - AI-assisted video renaming
//!
//! Samples frames from a video, classifies them across configured subtasks,
//! proposes style-specific filename candidates, and applies the chosen one.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod scanner;

use vrenamer_analysis::{AnalysisConfig, AnalysisEngine};
use vrenamer_common::is_video_file;
use vrenamer_frame_sampler::FrameSampler;
use vrenamer_llm_gateway::{HttpLlmGateway, LlmGateway};
use vrenamer_naming::{NamingConfig, NamingEngine};
use vrenamer_prompts::PromptStore;
use vrenamer_rename::RenameExecutor;
use vrenamer_transcript::{NullTranscriber, Transcriber};

#[derive(Parser)]
#[command(name = "vrenamer", version, about = "AI-assisted video renaming")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a YAML config file (defaults to ./vrenamer.yaml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline on one video file
    AnalyzeOne {
        path: PathBuf,
        #[arg(short = 'n', long = "candidates")]
        candidates: Option<usize>,
        /// Comma-separated style ids to restrict naming to
        #[arg(long)]
        styles: Option<String>,
        /// Write the audit record but skip the filesystem rename
        #[arg(long)]
        dry_run: bool,
        /// Pick the first candidate without prompting
        #[arg(long)]
        non_interactive: bool,
    },
    /// List videos under a directory and report garbled-filename counts
    Scan {
        dir: PathBuf,
        #[arg(long, default_value_t = true)]
        recursive: bool,
    },
    /// Reverse renames recorded in an audit log
    Rollback { audit_file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    match cli.command {
        Commands::AnalyzeOne {
            path,
            candidates,
            styles,
            dry_run,
            non_interactive,
        } => {
            analyze_one(
                cli.config.as_deref(),
                &path,
                candidates,
                styles,
                dry_run,
                non_interactive,
            )
            .await
        }
        Commands::Scan { dir, recursive } => scan_cmd(&dir, recursive),
        Commands::Rollback { audit_file } => rollback_cmd(&audit_file),
    }
}

async fn analyze_one(
    config_path: Option<&std::path::Path>,
    video: &std::path::Path,
    candidates_override: Option<usize>,
    styles_override: Option<String>,
    dry_run: bool,
    non_interactive: bool,
) -> Result<()> {
    if !is_video_file(video) {
        anyhow::bail!("not a recognized video file: {}", video.display());
    }

    let cfg = config::Config::load(config_path).context("loading configuration")?;
    info!("processing video: {}", video.display());

    let prompts = Arc::new(
        PromptStore::load_dir(&cfg.prompts_dir).context("loading prompt templates")?,
    );

    let gateway: Arc<dyn LlmGateway> = Arc::new(HttpLlmGateway::new(
        &cfg.llm_backend.base_url,
        &cfg.llm_backend.api_key,
        cfg.llm_backend.transport(),
        &cfg.llm_backend.model,
        Duration::from_secs(cfg.llm_backend.timeout),
    )?);

    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video");
    let frame_dir = std::env::temp_dir().join("vrenamer").join(stem);
    let sampler = FrameSampler::new(cfg.analysis.target_frames);
    let frames = sampler.sample(video, &frame_dir)?;
    info!("sampled {} frames", frames.frames.len());

    let analysis_config = AnalysisConfig {
        task_concurrency: cfg.concurrency.task_concurrency,
        batch_concurrency: cfg.concurrency.batch_concurrency,
        batch_size: cfg.analysis.batch_size,
        batch_size_max: cfg.analysis.batch_size_max,
        top_k: cfg.analysis.top_k,
    };
    let engine = AnalysisEngine::new(
        Arc::clone(&gateway),
        Arc::clone(&prompts),
        cfg.subtasks.clone(),
        analysis_config,
    );
    let transcript = NullTranscriber.transcribe(video).await?;
    let report = engine.analyze(&frames, transcript, None).await?;

    for (subtask, labels) in report.labels.iter() {
        println!("  {subtask}: {}", labels.join(", "));
    }

    let style_ids: Option<Vec<String>> = styles_override
        .map(|s| s.split(',').map(|t| t.trim().to_string()).collect())
        .or_else(|| {
            if cfg.naming.styles.is_empty() {
                None
            } else {
                Some(cfg.naming.styles.clone())
            }
        });

    let naming_config = NamingConfig {
        candidates_per_style: cfg.naming.candidates_per_style,
        total_candidates: candidates_override.unwrap_or(cfg.naming.total_candidates),
        max_length: cfg.naming.max_length,
        illegal_chars_replacement: cfg.naming.illegal_chars_replacement,
    };
    let naming_engine = NamingEngine::new(
        Arc::clone(&gateway),
        Arc::clone(&prompts),
        cfg.style_specs()?,
        naming_config,
    );
    let candidates = naming_engine
        .candidates(&report, style_ids.as_deref(), None)
        .await?;

    if candidates.is_empty() {
        println!("no naming candidates produced");
        return Ok(());
    }

    println!("\ncandidate filenames:");
    for (i, c) in candidates.iter().enumerate() {
        println!(
            "  {}. [{}] {} ({:?})",
            i + 1,
            c.style_label,
            c.filename,
            c.language
        );
    }

    let choice = if non_interactive {
        1
    } else {
        print!("\nselect a number (1-{}), or 0 to skip: ", candidates.len());
        std::io::stdout().flush().ok();
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).ok();
        line.trim().parse().unwrap_or(0)
    };

    if choice < 1 || choice > candidates.len() {
        println!("skipped rename");
        return Ok(());
    }

    let executor = RenameExecutor::new(cfg.audit_log.clone());
    let target = executor.rename(video, &candidates[choice - 1], report, dry_run)?;
    println!("renamed to: {}", target.display());
    Ok(())
}

fn scan_cmd(dir: &std::path::Path, recursive: bool) -> Result<()> {
    let report = scanner::scan(dir, recursive)?;
    println!("videos found: {}", report.videos.len());
    println!("total size: {} bytes", report.total_bytes);
    println!("garbled filenames: {}", report.garbled_count);
    Ok(())
}

fn rollback_cmd(audit_file: &std::path::Path) -> Result<()> {
    let executor = RenameExecutor::new(audit_file.to_path_buf());
    let restored = executor.rollback()?;
    println!("restored {restored} file(s)");
    if restored == 0 {
        error!("no eligible renames found to roll back");
    }
    Ok(())
}

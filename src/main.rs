use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use rdm::{DownloadManager, ManagerConfig, TaskId, TaskSnapshot, TaskStatus};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URLs to download
    #[arg(required = true)]
    urls: Vec<String>,

    /// Directory to save downloaded files
    #[arg(short = 'd', long = "download-dir", default_value = "downloads")]
    download_dir: PathBuf,

    /// Maximum number of concurrent downloads (defaults to number of logical CPUs)
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Emit progress snapshots as JSON lines instead of progress bars
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    std::fs::create_dir_all(&args.download_dir).with_context(|| {
        format!(
            "Failed to create download directory {:?}",
            args.download_dir
        )
    })?;

    let (manager, mut events) = DownloadManager::new(ManagerConfig {
        default_dir: args.download_dir.clone(),
        max_concurrent: Some(args.concurrency.unwrap_or_else(num_cpus::get)),
    });

    for url in &args.urls {
        manager.enqueue(url, None);
    }
    manager.start_all();

    let multi = MultiProgress::new();
    let mut bars: HashMap<TaskId, ProgressBar> = HashMap::new();
    let mut pending = manager.snapshot().len();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                manager.pause_all();
                manager.shutdown().await;
                eprintln!("Paused; partial files kept for resume.");
                break;
            }
            event = events.recv() => {
                let Some(snap) = event else { break };
                let settled = snap.status.run_ended() && !manager.is_active(snap.id);
                render(&multi, &mut bars, &snap, args.json)?;
                if settled {
                    pending = pending.saturating_sub(1);
                    if pending == 0 {
                        break;
                    }
                }
            }
        }
    }

    let failed: Vec<TaskSnapshot> = manager
        .snapshot()
        .into_iter()
        .filter(|s| matches!(s.status, TaskStatus::Failed { .. }))
        .collect();
    if !failed.is_empty() {
        for snap in &failed {
            eprintln!("{}: {}", snap.filename, snap.status_text);
        }
        anyhow::bail!("{} download(s) failed", failed.len());
    }
    Ok(())
}

fn render(
    multi: &MultiProgress,
    bars: &mut HashMap<TaskId, ProgressBar>,
    snap: &TaskSnapshot,
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snap)?);
        return Ok(());
    }

    let bar = bars.entry(snap.id).or_insert_with(|| {
        let pb = multi.add(ProgressBar::new(snap.total_size.unwrap_or(0)));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );
        pb
    });

    if let Some(total) = snap.total_size {
        bar.set_length(total);
    }
    bar.set_position(snap.downloaded_bytes);

    match &snap.status {
        TaskStatus::Done { .. } => {
            bar.finish_with_message(format!("{}  {}", snap.filename, snap.status_text));
        }
        TaskStatus::Failed { .. } => {
            bar.abandon_with_message(format!("{}  {}", snap.filename, snap.status_text));
        }
        _ => {
            bar.set_message(format!(
                "{}  {}  {}  ETA {}",
                snap.filename, snap.status_text, snap.speed_human, snap.eta_human
            ));
        }
    }
    Ok(())
}

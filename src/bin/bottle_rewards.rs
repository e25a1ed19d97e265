//! bottle_rewards - score uploads and credit points from the command line
//!
//! All uploads in one invocation share a single in-memory ledger, so the printed balance is
//! the sum over this run only.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bottle_rewards::{ErrorClass, MediaResult, PipelineError, RewardPipeline, RewardsConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// User credited for every upload.
    #[arg(long, env = "REWARDS_USER")]
    user: String,
    /// MIME type applied to every upload (e.g. image/jpeg). Defaults to the file extension.
    #[arg(long)]
    content_type: Option<String>,
    /// Uploads processed concurrently.
    #[arg(long, default_value_t = 1)]
    jobs: usize,
    /// Image or video paths. `stub://<frames>` runs a synthetic clip.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.jobs == 0 {
        return Err(anyhow!("jobs must be >= 1"));
    }

    let config = RewardsConfig::load()?;
    log::info!(
        "scoring class={} threshold={} image={}pt video={}pt stride={}",
        config.scoring.target_class_id,
        config.scoring.confidence_threshold,
        config.scoring.points_per_image_unit,
        config.scoring.points_per_video_unit,
        config.sampling.frame_stride
    );
    let pipeline = RewardPipeline::from_config(&config)?;

    let next = AtomicUsize::new(0);
    let outcomes: Mutex<Vec<(usize, Result<MediaResult, PipelineError>)>> =
        Mutex::new(Vec::with_capacity(args.paths.len()));

    std::thread::scope(|scope| {
        for _ in 0..args.jobs.min(args.paths.len()) {
            scope.spawn(|| loop {
                let i = next.fetch_add(1, Ordering::SeqCst);
                let Some(path) = args.paths.get(i) else {
                    break;
                };
                let outcome =
                    pipeline.process_path(path, args.content_type.as_deref(), &args.user);
                if let Ok(mut guard) = outcomes.lock() {
                    guard.push((i, outcome));
                }
            });
        }
    });

    let mut outcomes = outcomes
        .into_inner()
        .map_err(|_| anyhow!("result collector lock poisoned"))?;
    outcomes.sort_by_key(|(i, _)| *i);

    let mut failures = 0usize;
    let mut busy = false;
    for (i, outcome) in outcomes {
        let path = args.paths[i].display();
        match outcome {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => {
                failures += 1;
                busy |= e.class() == ErrorClass::Busy;
                eprintln!("bottle_rewards: {}: {}", path, e);
            }
        }
    }

    println!(
        "{}",
        serde_json::json!({
            "user_id": args.user,
            "points": pipeline.ledger().get(&args.user),
        })
    );

    if failures > 0 {
        let hint = if busy { " (detector or ledger busy, retry later)" } else { "" };
        return Err(anyhow!("{} of {} uploads failed{}", failures, args.paths.len(), hint));
    }
    Ok(())
}

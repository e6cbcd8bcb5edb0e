//! Surfel mapper node.
//!
//! Drives a [`MapperContext`] from a JSON-lines replay of camera info,
//! trajectory and cloud events. Events are applied as they arrive; at
//! `node.tick_hz` the queue is retried, the preview is published and
//! diagnostics are refreshed.

mod context;
mod diagnostics;
mod output;
mod params;
mod pointcloud;
mod replay;
mod visualization;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::context::MapperContext;
use crate::output::{JsonLinesMapWriter, LogPublisher};
use crate::params::MapperParams;
use crate::replay::ReplaySource;

const NODE_NAME: &str = "surfel_mapper";

#[derive(Parser, Debug)]
#[command(name = "surfel_mapper")]
#[command(about = "Fuse posed depth-camera clouds into a surfel map")]
struct Args {
    /// TOML parameter file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON-lines event file to replay
    #[arg(short, long)]
    replay: PathBuf,

    /// Stop once the replay is exhausted and the queue has been retried
    #[arg(long)]
    exit_on_eof: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("surfel_mapper=info,surfel_map=info")),
        )
        .init();

    let args = Args::parse();

    let params = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading parameters");
            MapperParams::load(path)?
        }
        None => {
            info!("Using default parameters");
            MapperParams::default()
        }
    };

    let tick_period = Duration::from_secs_f64(1.0 / params.node.tick_hz);
    let mut writer = JsonLinesMapWriter::new(params.node.save_path.clone());
    let mut publisher = LogPublisher::default();
    let mut ctx = MapperContext::new(params)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let (tx, rx) = mpsc::channel();
    let source = ReplaySource::spawn(&args.replay, tx, running.clone())?;

    info!("{NODE_NAME} started");

    let mut next_tick = Instant::now() + tick_period;
    let mut source_done = false;
    while running.load(Ordering::SeqCst) {
        let timeout = next_tick.saturating_duration_since(Instant::now());
        match rx.recv_timeout(timeout) {
            Ok(event) => {
                if let Err(e) = ctx.handle(event, &mut publisher, &mut writer) {
                    error!("Failed to handle event: {e:#}");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                source_done = true;
                std::thread::sleep(timeout);
            }
        }

        if Instant::now() >= next_tick {
            ctx.tick(&mut publisher);
            next_tick += tick_period;

            if source_done && args.exit_on_eof {
                break;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    let forwarded = source.join()?;
    info!(
        events = forwarded,
        pending_clouds = ctx.queue().len(),
        surfels = ctx.map().map_or(0, |map| map.len()),
        "{NODE_NAME} shutting down"
    );

    Ok(())
}

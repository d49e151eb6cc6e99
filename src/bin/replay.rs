//! Offline replay: feed a recorded drive through a session against a fixed
//! marker set and print what it would have done, as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use tokio::time::Instant;

use highway_halo_rs::alerts::{DispatchOutcome, LogNotifier};
use highway_halo_rs::markers::StaticMarkerQuery;
use highway_halo_rs::sensors::{fixes_to_samples, load_fixes};
use highway_halo_rs::trip::MemoryTripStore;
use highway_halo_rs::{HaloConfig, TrackingSession};

#[derive(Parser, Debug)]
struct Args {
    /// Recorded drive (.json or .json.gz)
    #[arg(long)]
    log: PathBuf,

    /// Markers in backend document form
    #[arg(long)]
    markers: PathBuf,

    /// Config file; missing file means defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print every fired alert as it happens
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => HaloConfig::load(path)?,
        None => HaloConfig::default(),
    };
    let fixes = load_fixes(&args.log)?;
    if fixes.is_empty() {
        bail!("{} has no GPS fixes", args.log.display());
    }
    let markers = StaticMarkerQuery::from_file(&args.markers, config.engine.alert_radius_m)?;

    // Whole marker set up front; no background queries, so runs are repeatable
    let mut session = TrackingSession::new(
        config.engine.clone(),
        config.alerts.clone(),
        Arc::new(StaticMarkerQuery::new(Vec::new())),
        Arc::new(LogNotifier),
        Arc::new(MemoryTripStore::new()),
    )
    .without_auto_refresh();
    session.store().replace(None, markers.markers().to_vec());
    session.start()?;

    let epoch = Instant::now();
    let samples = fixes_to_samples(&fixes, epoch);
    let mut last = epoch;
    for sample in samples {
        let at = sample.timestamp;
        // Timers due in the gap before this fix fire first
        session.poll_timers(at);
        if let DispatchOutcome::Fired(alert) = session.process_sample(sample)? {
            if args.verbose {
                eprintln!(
                    "t={:>7.1}s {} [{}]",
                    (at - epoch).as_secs_f64(),
                    alert.message(),
                    alert.marker.id
                );
            }
        }
        last = at;
    }

    let summary = session.stop(last, Utc::now())?;
    let output = json!({
        "log": args.log.display().to_string(),
        "fixes": fixes.len(),
        "duration_s": (last - epoch).as_secs_f64(),
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

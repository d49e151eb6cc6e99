use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use highway_halo_rs::alerts::LogNotifier;
use highway_halo_rs::markers::{HttpBackend, MarkerQuery, ReportActions, StaticMarkerQuery};
use highway_halo_rs::sensors::{self, MockDrive, SampleSubscription};
use highway_halo_rs::trip::JsonTripStore;
use highway_halo_rs::units::format_duration;
use highway_halo_rs::{HaloConfig, SessionSummary, TrackingSession};

#[derive(Parser, Debug)]
#[command(name = "highway_halo")]
#[command(about = "Hazard proximity alerts and trip stats for a GPS stream", long_about = None)]
struct Args {
    /// Config file (JSON); missing file means defaults
    #[arg(long, default_value = "highway_halo.json")]
    config: PathBuf,

    /// Backend base URL, overrides the config file
    #[arg(long)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track a drive and raise alerts
    Run(RunArgs),
    /// Act on a community report
    Report {
        #[command(subcommand)]
        action: ReportCommand,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Duration in seconds (0 = until the feed ends or Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Drive a synthetic route north from --start-lat/--start-lon
    #[arg(long, conflicts_with = "log")]
    mock: bool,

    /// Recorded drive to play back (.json or .json.gz)
    #[arg(long)]
    log: Option<PathBuf>,

    /// Playback speed-up for --log and --mock
    #[arg(long, default_value = "1.0")]
    speedup: f64,

    #[arg(long, default_value = "30.8600959")]
    start_lat: f64,

    #[arg(long, default_value = "75.8610409")]
    start_lon: f64,

    /// Mock drive speed
    #[arg(long, default_value = "50.0")]
    mock_kmh: f64,

    /// Markers file used when the backend cannot be reached
    #[arg(long)]
    markers: Option<PathBuf>,

    /// Write live status JSON here every 2 s
    #[arg(long)]
    status: Option<PathBuf>,

    /// Lifetime trip stats
    #[arg(long, default_value = "trip_stats.json")]
    stats: PathBuf,
}

#[derive(Subcommand, Debug)]
enum ReportCommand {
    Upvote { id: String },
    Resolve { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = HaloConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if let Some(url) = args.base_url {
        config.backend.base_url = url;
    }
    config.engine.validate()?;

    match args.command {
        Command::Run(run) => run_session(config, run).await,
        Command::Report { action } => report(&config, action).await,
    }
}

async fn report(config: &HaloConfig, action: ReportCommand) -> Result<()> {
    let backend = HttpBackend::new(&config.backend, config.engine.alert_radius_m);
    match action {
        ReportCommand::Upvote { id } => {
            backend.upvote(&id).await?;
            println!("[{}] Upvoted report {}", ts_now(), id);
        }
        ReportCommand::Resolve { id } => {
            backend.resolve(&id).await?;
            println!("[{}] Resolved report {}", ts_now(), id);
        }
    }
    Ok(())
}

async fn run_session(config: HaloConfig, args: RunArgs) -> Result<()> {
    let (feed, origin) = open_feed(&args)?;

    println!("[{}] Highway Halo starting", ts_now());
    println!("  Duration: {} seconds (0=until feed ends)", args.duration);
    println!("  Backend: {}", config.backend.base_url);
    println!("  Stats: {}", args.stats.display());

    let query = pick_marker_source(&config, args.markers.as_deref(), origin).await?;
    let mut session = TrackingSession::new(
        config.engine.clone(),
        config.alerts.clone(),
        query,
        Arc::new(LogNotifier),
        Arc::new(JsonTripStore::new(&args.stats)),
    );
    if let Some(path) = &args.status {
        session = session.with_live_status(path);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let duration = args.duration;
    tokio::spawn(async move {
        let limit = async {
            if duration > 0 {
                sleep(Duration::from_secs(duration)).await;
                println!("[{}] Duration reached, stopping...", ts_now());
            } else {
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => println!("[{}] Interrupted, stopping...", ts_now()),
            _ = limit => {}
        }
        let _ = shutdown_tx.send(true);
    });

    let summary = session.run(feed, shutdown_rx).await?;
    print_summary(&config, &summary);
    Ok(())
}

/// Sample feed plus the first position, used for the backend probe
fn open_feed(args: &RunArgs) -> Result<(SampleSubscription, (f64, f64))> {
    if let Some(path) = &args.log {
        let fixes = sensors::load_fixes(path)?;
        let Some(first) = fixes.first() else {
            bail!("{} has no GPS fixes", path.display());
        };
        let origin = (first.latitude, first.longitude);
        return Ok((sensors::spawn_fix_feed(fixes, args.speedup), origin));
    }
    if args.mock {
        let secs = if args.duration > 0 { args.duration } else { 600 };
        let drive = MockDrive::new(args.start_lat, args.start_lon, Duration::from_secs(1)).leg(0.0, args.mock_kmh, secs);
        return Ok((drive.subscribe(args.speedup), (args.start_lat, args.start_lon)));
    }
    bail!("no position source: pass --mock or --log <FILE>")
}

/// The backend, or the markers file when the backend does not answer
async fn pick_marker_source(
    config: &HaloConfig,
    markers: Option<&Path>,
    (lat, lon): (f64, f64),
) -> Result<Arc<dyn MarkerQuery>> {
    let backend = HttpBackend::new(&config.backend, config.engine.alert_radius_m);
    let Some(path) = markers else {
        return Ok(Arc::new(backend));
    };

    match backend.query_nearby(lat, lon, config.engine.query_radius_m).await {
        Ok(found) => {
            log::info!("Backend reachable ({} markers nearby)", found.len());
            Ok(Arc::new(backend))
        }
        Err(e) => {
            log::warn!("Backend unavailable ({}), using {}", e, path.display());
            Ok(Arc::new(StaticMarkerQuery::from_file(path, config.engine.alert_radius_m)?))
        }
    }
}

fn print_summary(config: &HaloConfig, summary: &SessionSummary) {
    let unit = config.alerts.speed_unit;
    println!("\n=== Session ===");
    println!("Samples: {}", summary.samples);
    println!("Markers loaded: {}", summary.markers_loaded);
    println!("Alerts: {} fired, {} suppressed", summary.alerts_fired, summary.alerts_suppressed);
    for alert in &summary.alerts {
        println!(
            "  {} [{}]{}",
            alert.message(),
            alert.marker.id,
            if alert.speed_violation { " over limit" } else { "" }
        );
    }

    match &summary.trip {
        Some(trip) => {
            println!("\n=== Trip ===");
            println!("Distance: {}", unit.format_distance(trip.record.distance_meters));
            println!("Duration: {}", format_duration(trip.record.duration_seconds));
            println!("Avg speed: {}", unit.format_speed(trip.record.avg_speed_kmh));
            println!("Max speed: {}", unit.format_speed(trip.max_speed_kmh));
        }
        None => println!("\nNo trip recorded"),
    }

    let agg = &summary.aggregate;
    println!("\n=== All trips ===");
    println!("Trips: {}", agg.total_trips);
    println!("Distance: {}", unit.format_distance(agg.total_distance_meters));
    println!("Time: {}", format_duration(agg.total_duration_seconds));
    println!("Alerts received: {}", agg.alerts_received);
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

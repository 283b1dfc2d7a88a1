use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use mapgeox_core::{
    ChannelNotifier, HttpBusCatalog, LiveTracker, OrsRouteFetcher, SimulatedTransport,
    SocketIoTransport, SystemClock, TrackerConfig, Transport,
};
use mapgeox_transit::prelude::*;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::FilterFn, layer::SubscriberExt, util::SubscriberInitExt};

mod output;

use output::{arrival_json, render_snapshot, snapshot_json};

const BUNDLED_CATALOG: &str = include_str!("../data/catalog.json");
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(
    name = "mapgeox-tracker",
    author,
    version,
    about = "Follow a bus route live and print per-stop ETAs",
    long_about = "Connects to the tracking backend over socket.io, subscribes to one route \
                  and prints the bus position and an ETA for every stop as updates arrive.\n\n\
                  With --simulate no backend is needed: an in-process driver moves a virtual \
                  bus along the catalog polyline of the route."
)]
struct Args {
    /// Route to follow, e.g. A15
    #[arg(short, long)]
    route: String,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket.io endpoint of the tracking backend
    #[arg(long)]
    server: Option<String>,

    /// Use the in-process simulator instead of a backend
    #[arg(long, conflicts_with = "server")]
    simulate: bool,

    /// Catalog JSON file (array of bus records); the bundled catalog otherwise
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Base URL of the bus info API, used instead of a catalog file
    #[arg(long, conflicts_with = "catalog")]
    catalog_url: Option<String>,

    /// OpenRouteService API key; prints the road distance between the termini
    #[arg(long, env = "ORS_API_KEY")]
    ors_key: Option<String>,

    /// Ask the backend to start driving the route's bus
    #[arg(long)]
    admin_start: bool,

    #[arg(long)]
    capture_radius_m: Option<f64>,

    #[arg(long)]
    speed_floor_kmh: Option<f64>,

    #[arg(long)]
    speed_ceiling_kmh: Option<f64>,

    #[arg(long)]
    refresh_interval_secs: Option<u64>,

    /// 0 keeps old positions forever
    #[arg(long)]
    stale_after_secs: Option<u64>,

    /// Render ETAs at this UTC offset instead of local time
    #[arg(long, allow_hyphen_values = true)]
    utc_offset_minutes: Option<i32>,

    /// Simulator tick length
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Simulator bus speed
    #[arg(long)]
    sim_speed_kmh: Option<f64>,

    /// Print snapshots and arrivals as JSON lines
    #[arg(long)]
    json: bool,

    /// Verbose output (show debug messages)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> Result<TrackerConfig> {
        let mut config = match &self.config {
            Some(path) => TrackerConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => TrackerConfig::default(),
        };

        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(v) = self.capture_radius_m {
            config.capture_radius_m = v;
        }
        if let Some(v) = self.speed_floor_kmh {
            config.speed_floor_kmh = v;
        }
        if let Some(v) = self.speed_ceiling_kmh {
            config.speed_ceiling_kmh = v;
        }
        if let Some(v) = self.refresh_interval_secs {
            config.refresh_interval_secs = v;
        }
        if let Some(v) = self.stale_after_secs {
            config.stale_after_secs = v;
        }
        if let Some(v) = self.utc_offset_minutes {
            config.utc_offset_minutes = Some(v);
        }
        if let Some(v) = self.tick_ms {
            config.simulation.tick_ms = v;
        }
        if let Some(v) = self.sim_speed_kmh {
            config.simulation.speed_kmh = v;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn catalog(&self) -> Result<Arc<dyn BusCatalog>> {
        if let Some(url) = &self.catalog_url {
            tracing::info!(%url, "using bus info API");
            return Ok(Arc::new(HttpBusCatalog::new(url.clone())));
        }

        let json = match &self.catalog {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read catalog {}", path.display()))?,
            None => BUNDLED_CATALOG.to_string(),
        };
        let catalog = StaticCatalog::from_json(&json).context("Failed to parse catalog")?;
        tracing::info!(routes = catalog.all_routes().len(), "catalog loaded");
        Ok(Arc::new(catalog))
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = FilterFn::new(|meta| meta.module_path().unwrap_or_default().starts_with("mapgeox"));
    let layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .with(level)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose);

    let config = args.config()?;
    let catalog = args.catalog()?;
    let route_id = RouteIdentifier::new(args.route.trim());
    if route_id.is_empty() {
        bail!("Route id must not be empty");
    }

    let entry = catalog
        .lookup(&route_id)
        .await
        .with_context(|| format!("Route {route_id} is not in the catalog"))?;
    tracing::info!(
        route = %route_id,
        from = %entry.origin.name,
        to = %entry.destination.name,
        stops = entry.stops.len(),
        "following route"
    );

    if let Some(key) = &args.ors_key {
        let fetcher = OrsRouteFetcher::new(key.clone());
        match fetcher
            .fetch_route(entry.origin.location, entry.destination.location)
            .await
            .and_then(|path| Route::from_path(route_id.clone(), &entry.origin.name, &entry.destination.name, path))
        {
            Ok(road) => tracing::info!(
                length_km = road.length_km,
                steps = road.step_distances_km.len(),
                "road distance between termini"
            ),
            Err(e) => tracing::warn!(error = %e, "directions unavailable"),
        }
    }

    let transport: Arc<dyn Transport> = if args.simulate {
        tracing::info!("using in-process simulator");
        Arc::new(SimulatedTransport::new(
            catalog.clone(),
            config.simulation.clone(),
            config.capture_radius_m,
        ))
    } else {
        tracing::info!(url = %config.server_url, "using tracking backend");
        Arc::new(SocketIoTransport::new(config.server_url.clone()))
    };

    let (notifier, mut arrivals) = ChannelNotifier::new();
    let tracker = LiveTracker::create(
        &config,
        transport,
        catalog,
        Arc::new(notifier),
        Arc::new(SystemClock),
    )
    .context("Failed to start tracker")?;

    tracker
        .track(route_id.clone())
        .await
        .with_context(|| format!("Failed to track route {route_id}"))?;

    let mut snapshots = tracker.snapshots();

    // the simulator only drives a bus on request
    if args.admin_start || args.simulate {
        tokio::time::timeout(CONNECT_TIMEOUT, snapshots.wait_for(|s| s.connected))
            .await
            .context("Timed out waiting for the tracking backend")?
            .context("Tracker stopped unexpectedly")?;
        tracker
            .request_simulation_start(route_id.clone())
            .await
            .context("Failed to request simulation start")?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            Some(arrival) = arrivals.recv() => {
                if args.json {
                    println!("{}", arrival_json(&arrival)?);
                } else {
                    println!(">> {arrival}");
                }
                if args.simulate && arrival.stop_id == StopIdentifier::end() {
                    break;
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    bail!("Tracker stopped unexpectedly");
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if args.json {
                    println!("{}", snapshot_json(&snapshot)?);
                } else {
                    print!("{}", render_snapshot(&entry, &snapshot));
                }
            }
        }
    }

    tracker.dispose().await.context("Failed to shut down tracker")?;
    Ok(())
}

use clap::{Parser, Subcommand};
use erg_core::units::{format_pace, parse_pace, pace_to_watts, watts_to_calories_per_hour, watts_to_pace};
use erg_core::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ergswap")]
#[command(about = "Convert workouts between RowErg and BikeErg using personal power curves", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the power and energy cost of a pace (M:SS.T)
    Pace {
        pace: String,

        /// Pace is per 1000 m (BikeErg) instead of per 500 m
        #[arg(long)]
        per_1000: bool,
    },

    /// Show the pace that holds a given power
    Watts {
        watts: f64,

        /// Report pace per 1000 m (BikeErg)
        #[arg(long)]
        per_1000: bool,
    },

    /// Fit a power curve from a JSON file of samples and store it
    Fit {
        samples: PathBuf,

        /// row or bike
        #[arg(long)]
        modality: Modality,

        /// Damper setting (defaults to config)
        #[arg(long)]
        damper: Option<u8>,

        /// Save even if the fit does not validate
        #[arg(long)]
        force: bool,
    },

    /// List stored calibrations
    List {
        #[arg(long)]
        damper: Option<u8>,
    },

    /// Delete a calibration and its samples, including remote copies when sync is configured
    Delete {
        id: String,

        #[arg(long)]
        user: Option<String>,

        /// Only delete the local copy; the next sync will download it again
        #[arg(long)]
        local: bool,
    },

    /// Convert a workout JSON file for its target machine
    Convert {
        workout: PathBuf,

        /// Calibration id (defaults to the newest validated one for the damper)
        #[arg(long)]
        calibration: Option<String>,

        /// text, csv or json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Run one calibration sync pass against the configured remote
    Sync {
        #[arg(long)]
        user: Option<String>,
    },

    /// Keep calibrations in sync until interrupted
    ///
    /// Passes run on the timer only; the process assumes it is online, so a
    /// pass that cannot reach the remote is logged and retried on the next tick.
    Watch {
        #[arg(long)]
        user: Option<String>,

        /// Minutes between passes (defaults to config)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Export profiles, calibrations and workouts to a JSON backup
    Export { path: PathBuf },

    /// Import a JSON backup
    Import { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    erg_core::logging::init();

    let cli = Cli::parse();

    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let store = JsonFileStore::in_dir(&data_dir);

    match cli.command {
        Commands::Pace { pace, per_1000 } => cmd_pace(&pace, per_1000),
        Commands::Watts { watts, per_1000 } => cmd_watts(watts, per_1000),
        Commands::Fit {
            samples,
            modality,
            damper,
            force,
        } => {
            let damper = damper.unwrap_or(config.defaults.damper);
            cmd_fit(&store, &samples, modality, damper, force).await
        }
        Commands::List { damper } => cmd_list(&store, damper).await,
        Commands::Delete { id, user, local } => cmd_delete(store, &config, &id, user, local).await,
        Commands::Convert {
            workout,
            calibration,
            format,
        } => cmd_convert(&store, &workout, calibration, &format).await,
        Commands::Sync { user } => cmd_sync(store, &config, user).await,
        Commands::Watch { user, interval } => cmd_watch(store, &config, user, interval).await,
        Commands::Export { path } => {
            let count = backup::export_to_file(&store, &path).await?;
            println!("✓ Exported {} records to {}", count, path.display());
            Ok(())
        }
        Commands::Import { path } => cmd_import(&store, &path).await,
    }
}

fn cmd_pace(pace: &str, per_1000: bool) -> Result<()> {
    let seconds = parse_pace(pace)?;
    let watts = pace_to_watts(seconds, !per_1000);
    let unit = if per_1000 { "1000m" } else { "500m" };

    println!("{}/{} = {:.0} W", format_pace(seconds), unit, watts);
    println!("  ~{:.0} kcal/h", watts_to_calories_per_hour(watts));
    Ok(())
}

fn cmd_watts(watts: f64, per_1000: bool) -> Result<()> {
    if !(watts.is_finite() && watts > 0.0) {
        return Err(Error::Other(format!("watts must be positive, got {}", watts)));
    }
    let pace = watts_to_pace(watts, !per_1000);
    let unit = if per_1000 { "1000m" } else { "500m" };
    println!("{:.0} W = {}/{}", watts, format_pace(pace), unit);
    Ok(())
}

async fn cmd_fit(
    store: &JsonFileStore,
    samples_path: &Path,
    modality: Modality,
    damper: u8,
    force: bool,
) -> Result<()> {
    let contents = tokio::fs::read_to_string(samples_path).await?;
    let samples: Vec<Sample> = serde_json::from_str(&contents)?;

    let profile = build_profile(samples, modality, damper)?;
    let validated = validate_calibration(&profile);

    println!("{} calibration, damper {}", modality, damper);
    println!("  a  = {:.6}", profile.a);
    println!("  b  = {:.4}", profile.b);
    println!("  R² = {:.4}", profile.r2);

    if !validated && !force {
        println!("\n✗ Fit did not validate (needs R² ≥ 0.95 over 3+ samples) - not saved.");
        println!("  Re-run with --force to keep it anyway.");
        return Ok(());
    }

    let saved = store.save(profile).await?;
    println!(
        "\n✓ Saved calibration {}{}",
        saved.id.as_deref().unwrap_or("?"),
        if validated { "" } else { " (unvalidated)" }
    );
    Ok(())
}

async fn cmd_list(store: &JsonFileStore, damper: Option<u8>) -> Result<()> {
    let calibrations = match damper {
        Some(d) => store.list_by_damper(d).await?,
        None => store.list_all().await?,
    };

    if calibrations.is_empty() {
        println!("No calibrations stored.");
        return Ok(());
    }

    for c in &calibrations {
        println!(
            "{:>4}  {:<4}  damper {:>2}  a={:.6} b={:.4} R²={:.3}  {} samples  {}{}",
            c.id.as_deref().unwrap_or("-"),
            c.modality,
            c.damper,
            c.a,
            c.b,
            c.r2,
            c.samples.len(),
            c.created_at.format("%Y-%m-%d %H:%M"),
            if validate_calibration(c) { "" } else { "  (unvalidated)" }
        );
    }
    Ok(())
}

async fn cmd_delete(
    store: JsonFileStore,
    config: &Config,
    id: &str,
    user: Option<String>,
    local_only: bool,
) -> Result<()> {
    let user_id = user.or_else(|| config.sync.user_id.clone());
    let remote_target = match (&config.sync.remote_url, user_id) {
        (Some(_), Some(user_id)) if !local_only => Some(user_id),
        _ => None,
    };

    let Some(user_id) = remote_target else {
        if !store.delete(id).await? {
            return Err(Error::Other(format!("No calibration with id {}", id)));
        }
        println!("✓ Deleted calibration {} (local only)", id);
        if config.sync.remote_url.is_some() {
            println!("  A remote copy will be downloaded again on the next sync.");
        }
        return Ok(());
    };

    let reconciler = build_reconciler(store, config)?;
    let deleted = reconciler.delete_calibration(&user_id, id).await?;
    if !deleted.local {
        return Err(Error::Other(format!("No calibration with id {}", id)));
    }
    println!(
        "✓ Deleted calibration {} and {} remote {}",
        id,
        deleted.remote,
        if deleted.remote == 1 { "copy" } else { "copies" }
    );
    Ok(())
}

async fn cmd_convert(
    store: &JsonFileStore,
    workout_path: &Path,
    calibration_id: Option<String>,
    format: &str,
) -> Result<()> {
    let contents = tokio::fs::read_to_string(workout_path).await?;
    let workout: Workout = serde_json::from_str(&contents)?;

    let calibration = match calibration_id {
        Some(id) => Some(
            store
                .get(&id)
                .await?
                .ok_or_else(|| Error::Other(format!("No calibration with id {}", id)))?,
        ),
        None => store
            .list_by_damper(workout.damper_for_target)
            .await?
            .into_iter()
            .find(|c| c.modality == workout.target_modality && validate_calibration(c)),
    };

    if let Some(ref c) = calibration {
        tracing::info!("Using calibration {:?} for conversion", c.id);
    }

    let result = convert_workout(&workout, calibration.as_ref())?;

    let output = if format.eq_ignore_ascii_case("json") {
        serde_json::to_string_pretty(&result)?
    } else {
        format_conversion(&result, format.parse()?)?
    };
    println!("{}", output);
    Ok(())
}

fn build_reconciler(store: JsonFileStore, config: &Config) -> Result<Arc<SyncReconciler>> {
    let remote_url = config.sync.remote_url.clone().ok_or_else(|| {
        Error::Config("no [sync] remote_url configured - cannot sync".into())
    })?;

    Ok(Arc::new(SyncReconciler::new(
        Arc::new(store),
        Arc::new(HttpRemote::new(remote_url)),
        Arc::new(ConnectivityMonitor::new(true)),
    )))
}

fn resolve_user(user: Option<String>, config: &Config) -> Result<String> {
    user.or_else(|| config.sync.user_id.clone())
        .ok_or_else(|| Error::Config("no user id: pass --user or set [sync] user_id".into()))
}

async fn cmd_sync(store: JsonFileStore, config: &Config, user: Option<String>) -> Result<()> {
    let user_id = resolve_user(user, config)?;
    let reconciler = build_reconciler(store, config)?;

    let summary = reconciler.sync_calibrations(&user_id).await?;
    println!(
        "✓ Sync complete: {} uploaded, {} downloaded",
        summary.uploaded, summary.downloaded
    );
    for error in &summary.errors {
        eprintln!("  ✗ {}", error);
    }
    Ok(())
}

async fn cmd_watch(
    store: JsonFileStore,
    config: &Config,
    user: Option<String>,
    interval: Option<u64>,
) -> Result<()> {
    let user_id = resolve_user(user, config)?;
    let reconciler = build_reconciler(store, config)?;
    let interval = interval
        .map(|m| std::time::Duration::from_secs(m.max(1) * 60))
        .unwrap_or_else(|| config.sync.interval());

    let handle = reconciler.setup_auto_sync(user_id, interval);
    println!("Syncing every {} min - Ctrl-C to stop", interval.as_secs() / 60);

    tokio::signal::ctrl_c().await?;
    handle.stop();
    println!("\nStopped.");
    Ok(())
}

async fn cmd_import(store: &JsonFileStore, path: &Path) -> Result<()> {
    let summary = backup::import_from_file(store, path).await?;
    println!(
        "✓ Imported {} profiles, {} calibrations, {} workouts",
        summary.profiles, summary.calibrations, summary.workouts
    );
    for skipped in &summary.skipped {
        eprintln!("  ⚠ Skipped unreadable collection: {}", skipped);
    }
    Ok(())
}

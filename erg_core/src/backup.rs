//! JSON backup and restore of everything in the local store.
//!
//! Import is not transactional: collections are applied one after another,
//! and a collection that fails to parse is skipped with a warning while the
//! others still go in.

use crate::store::{CalibrationStore, JsonFileStore};
use crate::{CalibrationProfile, Result, UserProfile, Workout};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Backup file layout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Backup {
    pub profiles: Vec<UserProfile>,
    pub calibrations: Vec<CalibrationProfile>,
    pub workouts: Vec<Workout>,
    /// ISO-8601 timestamp of the export
    #[serde(rename = "exportDate")]
    pub export_date: String,
}

/// What an import actually applied
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub profiles: usize,
    pub calibrations: usize,
    pub workouts: usize,
    /// Collections that were present but could not be parsed
    pub skipped: Vec<String>,
}

pub async fn export_backup(store: &JsonFileStore) -> Result<Backup> {
    Ok(Backup {
        profiles: store.list_user_profiles().await?,
        calibrations: store.list_all().await?,
        workouts: store.list_workouts().await?,
        export_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// Write a pretty-printed backup; returns the number of records written
pub async fn export_to_file(store: &JsonFileStore, path: &Path) -> Result<usize> {
    let backup = export_backup(store).await?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(&backup)?).await?;

    let count = backup.profiles.len() + backup.calibrations.len() + backup.workouts.len();
    tracing::info!("Exported {} records to {:?}", count, path);
    Ok(count)
}

/// Apply a backup document to the store
///
/// Calibrations receive fresh local ids; profiles and workouts keep theirs
/// and replace any record with the same id.
pub async fn import_backup(store: &JsonFileStore, json: &str) -> Result<ImportSummary> {
    let document: serde_json::Value = serde_json::from_str(json)?;
    let mut summary = ImportSummary::default();

    if let Some(profiles) = collection::<UserProfile>(&document, "profiles", &mut summary) {
        for profile in profiles {
            store.save_user_profile(profile).await?;
            summary.profiles += 1;
        }
    }

    if let Some(calibrations) =
        collection::<CalibrationProfile>(&document, "calibrations", &mut summary)
    {
        for mut calibration in calibrations {
            calibration.id = None;
            store.save(calibration).await?;
            summary.calibrations += 1;
        }
    }

    if let Some(workouts) = collection::<Workout>(&document, "workouts", &mut summary) {
        for workout in workouts {
            store.save_workout(workout).await?;
            summary.workouts += 1;
        }
    }

    tracing::info!(
        "Imported {} profiles, {} calibrations, {} workouts ({} collections skipped)",
        summary.profiles,
        summary.calibrations,
        summary.workouts,
        summary.skipped.len()
    );
    Ok(summary)
}

pub async fn import_from_file(store: &JsonFileStore, path: &Path) -> Result<ImportSummary> {
    let contents = tokio::fs::read_to_string(path).await?;
    import_backup(store, &contents).await
}

fn collection<T: DeserializeOwned>(
    document: &serde_json::Value,
    key: &str,
    summary: &mut ImportSummary,
) -> Option<Vec<T>> {
    let value = document.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(items) => Some(items),
        Err(e) => {
            tracing::warn!("Skipping {} in backup: {}", key, e);
            summary.skipped.push(key.to_string());
            None
        }
    }
}

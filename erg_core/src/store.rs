//! Local calibration persistence.
//!
//! [`CalibrationStore`] is the contract the converter front-ends and the
//! sync reconciler consume. [`JsonFileStore`] keeps everything in a single
//! JSON document guarded by file locks and replaced atomically on write.

use crate::{CalibrationProfile, Error, Result, UserProfile, Workout};
use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Persistence contract for calibration profiles
#[async_trait]
pub trait CalibrationStore: Send + Sync {
    /// Insert (no id) or replace (known id); returns the stored profile with its id
    async fn save(&self, profile: CalibrationProfile) -> Result<CalibrationProfile>;

    async fn get(&self, id: &str) -> Result<Option<CalibrationProfile>>;

    /// Profiles for one damper, newest first
    async fn list_by_damper(&self, damper: u8) -> Result<Vec<CalibrationProfile>>;

    /// All profiles, newest first
    async fn list_all(&self) -> Result<Vec<CalibrationProfile>>;

    /// Remove a profile and its samples; returns whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// On-disk layout of the store
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
struct StoreDocument {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    calibrations: Vec<CalibrationProfile>,
    #[serde(default)]
    profiles: Vec<UserProfile>,
    #[serde(default)]
    workouts: Vec<Workout>,
}

/// JSON-document store with file locking
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at `<data_dir>/calibrations.json`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("calibrations.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document on the blocking pool
    async fn load(&self) -> Result<StoreDocument> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_document(&path))
            .await
            .map_err(|e| Error::Storage(format!("store read task failed: {}", e)))?
    }

    /// Load, modify and save back under the write lock
    async fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreDocument) -> Result<T> + Send,
        T: Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load().await?;
        let value = f(&mut document)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_document(&path, &document))
            .await
            .map_err(|e| Error::Storage(format!("store write task failed: {}", e)))??;
        Ok(value)
    }

    pub async fn save_user_profile(&self, mut profile: UserProfile) -> Result<UserProfile> {
        self.update(|doc| {
            let id = profile
                .id
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            doc.profiles.retain(|p| p.id.as_deref() != Some(id.as_str()));
            doc.profiles.push(profile.clone());
            Ok(profile)
        })
        .await
    }

    pub async fn list_user_profiles(&self) -> Result<Vec<UserProfile>> {
        Ok(self.load().await?.profiles)
    }

    pub async fn save_workout(&self, mut workout: Workout) -> Result<Workout> {
        self.update(|doc| {
            let id = workout
                .id
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            doc.workouts.retain(|w| w.id.as_deref() != Some(id.as_str()));
            doc.workouts.push(workout.clone());
            Ok(workout)
        })
        .await
    }

    pub async fn list_workouts(&self) -> Result<Vec<Workout>> {
        Ok(self.load().await?.workouts)
    }
}

#[async_trait]
impl CalibrationStore for JsonFileStore {
    async fn save(&self, mut profile: CalibrationProfile) -> Result<CalibrationProfile> {
        check_storable(&profile)?;
        self.update(|doc| {
            let existing = profile.id.as_deref().and_then(|id| {
                doc.calibrations
                    .iter()
                    .position(|c| c.id.as_deref() == Some(id))
            });

            match existing {
                Some(index) => doc.calibrations[index] = profile.clone(),
                None => {
                    doc.next_id += 1;
                    profile.id = Some(doc.next_id.to_string());
                    doc.calibrations.push(profile.clone());
                }
            }
            tracing::debug!(
                "Saved calibration {:?} (damper {})",
                profile.id,
                profile.damper
            );
            Ok(profile)
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<CalibrationProfile>> {
        Ok(self
            .load()
            .await?
            .calibrations
            .into_iter()
            .find(|c| c.id.as_deref() == Some(id)))
    }

    async fn list_by_damper(&self, damper: u8) -> Result<Vec<CalibrationProfile>> {
        let mut calibrations: Vec<_> = self
            .load()
            .await?
            .calibrations
            .into_iter()
            .filter(|c| c.damper == damper)
            .collect();
        calibrations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(calibrations)
    }

    async fn list_all(&self) -> Result<Vec<CalibrationProfile>> {
        let mut calibrations = self.load().await?.calibrations;
        calibrations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(calibrations)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.update(|doc| {
            let before = doc.calibrations.len();
            doc.calibrations.retain(|c| c.id.as_deref() != Some(id));
            Ok(doc.calibrations.len() != before)
        })
        .await
    }
}

/// Load the document with a shared lock
///
/// A missing file is an empty store. A corrupted file is an error: falling
/// back to an empty store would erase every calibration on the next write.
fn read_document(path: &Path) -> Result<StoreDocument> {
    if !path.exists() {
        tracing::debug!("No store file at {:?}, starting empty", path);
        return Ok(StoreDocument::default());
    }

    let file = File::open(path).map_err(|e| storage_error(path, e))?;
    file.lock_shared().map_err(|e| storage_error(path, e))?;

    let mut contents = String::new();
    let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
    let _ = file.unlock();
    read.map_err(|e| storage_error(path, e))?;

    serde_json::from_str(&contents)
        .map_err(|e| Error::Storage(format!("store file {:?} is corrupted: {}", path, e)))
}

/// Atomically replace the document: temp file, fsync, rename
fn write_document(path: &Path, document: &StoreDocument) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| storage_error(parent, e))?;

    let temp = NamedTempFile::new_in(parent).map_err(|e| storage_error(parent, e))?;
    temp.as_file()
        .lock_exclusive()
        .map_err(|e| storage_error(temp.path(), e))?;

    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        let contents = serde_json::to_string(document)?;
        writer
            .write_all(contents.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| storage_error(temp.path(), e))?;
    }

    temp.as_file()
        .sync_all()
        .map_err(|e| storage_error(temp.path(), e))?;
    let _ = temp.as_file().unlock();

    temp.persist(path)
        .map_err(|e| storage_error(path, e.error))?;
    tracing::debug!("Saved store to {:?}", path);
    Ok(())
}

/// NaN and infinity serialize as `null` and would poison the whole document
fn check_storable(profile: &CalibrationProfile) -> Result<()> {
    let values = [profile.a, profile.b, profile.r2]
        .into_iter()
        .chain(profile.samples.iter().flat_map(|s| {
            [Some(s.watts), s.rpm, s.pace_500].into_iter().flatten()
        }));
    for value in values {
        if !value.is_finite() {
            return Err(Error::Storage(format!(
                "calibration {:?} holds a non-finite value and cannot be stored",
                profile.id
            )));
        }
    }
    Ok(())
}

fn storage_error(path: &Path, e: std::io::Error) -> Error {
    Error::Storage(format!("{:?}: {}", path, e))
}

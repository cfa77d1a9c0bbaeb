//! Calibration sync between the local store and the remote endpoint.
//!
//! Profiles are matched by fingerprint (damper plus an order-independent
//! hash of the samples) because local and remote ids never agree. A pass
//! uploads every local fingerprint the remote lacks and downloads every
//! remote fingerprint the local store lacks. Profiles present on both sides
//! are left alone: there is no merge of diverged profiles, and `conflicts`
//! is always 0.

use crate::network::ConnectivitySignal;
use crate::remote::RemoteCalibrations;
use crate::store::CalibrationStore;
use crate::{CalibrationProfile, Error, Result, Sample};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Whether a pass is currently running
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
}

/// Outcome of one reconciliation pass
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SyncSummary {
    pub uploaded: usize,
    pub downloaded: usize,
    pub conflicts: usize,
    pub errors: Vec<String>,
}

/// What an explicit delete removed
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DeleteSummary {
    /// Whether the local profile existed
    pub local: bool,
    /// Remote copies deleted by fingerprint
    pub remote: usize,
}

/// Fingerprint identifying "the same calibration" across replicas
pub fn fingerprint(profile: &CalibrationProfile) -> String {
    format!("{}-{}", profile.damper, samples_hash(&profile.samples))
}

fn samples_hash(samples: &[Sample]) -> String {
    let mut keys: Vec<String> = samples
        .iter()
        .map(|s| {
            let rate = s.rpm.or(s.pace_500);
            match rate {
                Some(rate) => format!("{},{}", rate, s.watts),
                None => format!(",{}", s.watts),
            }
        })
        .collect();
    keys.sort();
    to_base36(rolling_hash(&keys.join("|")))
}

/// `h = (h << 5) - h + c` over UTF-16 code units, wrapping at 32 bits
fn rolling_hash(input: &str) -> i32 {
    input.encode_utf16().fold(0i32, |h, c| {
        h.wrapping_shl(5).wrapping_sub(h).wrapping_add(i32::from(c))
    })
}

fn to_base36(value: i32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut magnitude = i64::from(value).unsigned_abs();
    if magnitude == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while magnitude > 0 {
        digits.push(DIGITS[(magnitude % 36) as usize]);
        magnitude /= 36;
    }
    if value < 0 {
        digits.push(b'-');
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Marks a pass in flight; clears the flag when dropped
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reconciles the local calibration store with the remote endpoint
pub struct SyncReconciler {
    store: Arc<dyn CalibrationStore>,
    remote: Arc<dyn RemoteCalibrations>,
    connectivity: Arc<dyn ConnectivitySignal>,
    syncing: AtomicBool,
}

impl SyncReconciler {
    pub fn new(
        store: Arc<dyn CalibrationStore>,
        remote: Arc<dyn RemoteCalibrations>,
        connectivity: Arc<dyn ConnectivitySignal>,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            syncing: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SyncState {
        if self.syncing.load(Ordering::Acquire) {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    /// Run one reconciliation pass
    ///
    /// Fails outright when offline, when another pass is running, or when
    /// either side cannot be listed. Individual upload/download failures are
    /// collected in the summary instead.
    pub async fn sync_calibrations(&self, user_id: &str) -> Result<SyncSummary> {
        if !self.connectivity.is_online() {
            return Err(Error::Offline);
        }
        let _in_flight = InFlight::acquire(&self.syncing).ok_or(Error::SyncInProgress)?;

        let local = self.store.list_all().await?;
        let remote = self.remote.list(user_id).await?;
        tracing::debug!(
            "Reconciling {} local and {} remote calibrations",
            local.len(),
            remote.len()
        );

        let local_prints: HashSet<String> = local.iter().map(fingerprint).collect();
        let remote_prints: HashSet<String> = remote.iter().map(fingerprint).collect();

        let mut summary = SyncSummary::default();

        let mut handled = HashSet::new();
        for profile in &local {
            let print = fingerprint(profile);
            if remote_prints.contains(&print) || !handled.insert(print.clone()) {
                continue;
            }
            match self.upload(user_id, profile).await {
                Ok(remote_id) => {
                    tracing::debug!("Uploaded calibration {} as {}", print, remote_id);
                    summary.uploaded += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to upload calibration {}: {}", print, e);
                    summary.errors.push(format!("upload {}: {}", print, e));
                }
            }
        }

        handled.clear();
        for profile in remote {
            let print = fingerprint(&profile);
            if local_prints.contains(&print) || !handled.insert(print.clone()) {
                continue;
            }
            match self.download(profile).await {
                Ok(saved) => {
                    tracing::debug!("Downloaded calibration {} as {:?}", print, saved.id);
                    summary.downloaded += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to download calibration {}: {}", print, e);
                    summary.errors.push(format!("download {}: {}", print, e));
                }
            }
        }

        tracing::info!(
            "Calibration sync finished: {} uploaded, {} downloaded, {} errors",
            summary.uploaded,
            summary.downloaded,
            summary.errors.len()
        );
        Ok(summary)
    }

    async fn upload(&self, user_id: &str, profile: &CalibrationProfile) -> Result<String> {
        // The local id means nothing to the server
        let mut outgoing = profile.clone();
        outgoing.id = None;
        self.remote.create(user_id, &outgoing).await
    }

    async fn download(&self, mut profile: CalibrationProfile) -> Result<CalibrationProfile> {
        let now = Utc::now();
        profile.id = None;
        profile.created_at = now;
        profile.updated_at = now;
        self.store.save(profile).await
    }

    /// Delete a calibration locally and every remote copy sharing its fingerprint
    ///
    /// Remote copies go first: if one cannot be deleted the local profile
    /// stays, so the delete can be retried instead of the next pass
    /// downloading the profile again.
    pub async fn delete_calibration(&self, user_id: &str, id: &str) -> Result<DeleteSummary> {
        if !self.connectivity.is_online() {
            return Err(Error::Offline);
        }
        let _in_flight = InFlight::acquire(&self.syncing).ok_or(Error::SyncInProgress)?;

        let Some(profile) = self.store.get(id).await? else {
            return Ok(DeleteSummary::default());
        };
        let print = fingerprint(&profile);

        let mut summary = DeleteSummary::default();
        for remote in self.remote.list(user_id).await? {
            if fingerprint(&remote) != print {
                continue;
            }
            match remote.id.as_deref() {
                Some(remote_id) => {
                    self.remote.delete(user_id, remote_id).await?;
                    summary.remote += 1;
                }
                None => tracing::warn!("Remote copy of {} has no id, cannot delete it", print),
            }
        }

        summary.local = self.store.delete(id).await?;
        tracing::info!(
            "Deleted calibration {} locally and {} remote copies",
            id,
            summary.remote
        );
        Ok(summary)
    }

    /// Sync without surfacing errors; returns the summary when a pass ran
    pub async fn auto_sync(&self, user_id: &str) -> Option<SyncSummary> {
        match self.sync_calibrations(user_id).await {
            Ok(summary) => Some(summary),
            Err(Error::SyncInProgress) => {
                tracing::debug!("Skipping auto-sync, a pass is already running");
                None
            }
            Err(Error::Offline) => {
                tracing::debug!("Skipping auto-sync while offline");
                None
            }
            Err(e) => {
                tracing::warn!("Auto-sync failed: {}", e);
                None
            }
        }
    }

    /// Sync now, then every `interval` and whenever the network comes back
    ///
    /// Dropping or stopping the returned handle cancels the schedule.
    pub fn setup_auto_sync(
        self: &Arc<Self>,
        user_id: impl Into<String>,
        interval: Duration,
    ) -> AutoSyncHandle {
        let reconciler = Arc::clone(self);
        let user_id = user_id.into();
        let mut online = self.connectivity.subscribe();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut watching = true;

            loop {
                tokio::select! {
                    // The first tick completes immediately
                    _ = ticker.tick() => {
                        reconciler.auto_sync(&user_id).await;
                    }
                    changed = online.changed(), if watching => {
                        if changed.is_err() {
                            tracing::debug!("Connectivity signal closed");
                            watching = false;
                        } else if *online.borrow_and_update() {
                            tracing::info!("Back online, syncing calibrations");
                            reconciler.auto_sync(&user_id).await;
                        }
                    }
                }
            }
        });

        tracing::info!("Auto-sync armed every {:?}", interval);
        AutoSyncHandle { task }
    }
}

/// Cancels the auto-sync schedule when stopped or dropped
#[derive(Debug)]
pub struct AutoSyncHandle {
    task: JoinHandle<()>,
}

impl AutoSyncHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for AutoSyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ConnectivityMonitor;
    use crate::store::JsonFileStore;
    use crate::Modality;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// In-memory remote that hands out UUIDs like the real server
    #[derive(Default)]
    struct MemoryRemote {
        calibrations: Mutex<Vec<CalibrationProfile>>,
        list_calls: AtomicUsize,
        fail_creates: AtomicBool,
    }

    #[async_trait]
    impl RemoteCalibrations for MemoryRemote {
        async fn list(&self, _user_id: &str) -> Result<Vec<CalibrationProfile>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.calibrations.lock().unwrap().clone())
        }

        async fn create(&self, _user_id: &str, profile: &CalibrationProfile) -> Result<String> {
            if self.fail_creates.load(Ordering::SeqCst) {
                return Err(Error::RemoteRequest("HTTP 500: boom".into()));
            }
            let id = Uuid::new_v4().to_string();
            let mut stored = profile.clone();
            stored.id = Some(id.clone());
            self.calibrations.lock().unwrap().push(stored);
            Ok(id)
        }

        async fn delete(&self, _user_id: &str, id: &str) -> Result<()> {
            self.calibrations
                .lock()
                .unwrap()
                .retain(|c| c.id.as_deref() != Some(id));
            Ok(())
        }
    }

    fn profile(damper: u8, rpms: &[f64]) -> CalibrationProfile {
        CalibrationProfile {
            id: None,
            modality: Modality::Bike,
            damper,
            a: 0.0026,
            b: 3.2,
            r2: 0.98,
            samples: rpms
                .iter()
                .map(|&rpm| Sample::bike(rpm, (rpm * 3.0).round()))
                .collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<JsonFileStore>,
        remote: Arc<MemoryRemote>,
        monitor: Arc<ConnectivityMonitor>,
        reconciler: Arc<SyncReconciler>,
    }

    fn fixture() -> Fixture {
        crate::logging::init_test();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::in_dir(dir.path()));
        let remote = Arc::new(MemoryRemote::default());
        let monitor = Arc::new(ConnectivityMonitor::new(true));
        let reconciler = Arc::new(SyncReconciler::new(
            store.clone(),
            remote.clone(),
            monitor.clone(),
        ));
        Fixture {
            _dir: dir,
            store,
            remote,
            monitor,
            reconciler,
        }
    }

    #[test]
    fn test_rolling_hash_matches_reference_values() {
        assert_eq!(rolling_hash(""), 0);
        assert_eq!(rolling_hash("a"), 97);
        assert_eq!(rolling_hash("ab"), 3105);
        assert_eq!(to_base36(3105), "2e9");
        assert_eq!(to_base36(-35), "-z");
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(i32::MIN), "-zik0zk");
    }

    #[test]
    fn test_rolling_hash_wraps() {
        // Long input overflows 32 bits many times without panicking
        let long = "80,240|".repeat(500);
        let _ = rolling_hash(&long);
    }

    #[test]
    fn test_fingerprint_ignores_sample_order() {
        let a = profile(5, &[60.0, 80.0, 100.0]);
        let mut b = profile(5, &[100.0, 60.0, 80.0]);
        b.id = Some("remote-uuid".into());
        b.created_at = Utc::now() - chrono::Duration::days(3);
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert!(fingerprint(&a).starts_with("5-"));
    }

    #[test]
    fn test_fingerprint_sees_changed_pairs_and_damper() {
        let a = profile(5, &[60.0, 80.0, 100.0]);
        let mut changed = a.clone();
        changed.samples[1].watts += 1.0;
        assert_ne!(fingerprint(&a), fingerprint(&changed));

        let mut other_damper = a.clone();
        other_damper.damper = 6;
        assert_ne!(fingerprint(&a), fingerprint(&other_damper));
    }

    #[test]
    fn test_fingerprint_ignores_sample_source_and_time() {
        let a = profile(5, &[60.0, 80.0, 100.0]);
        let mut b = a.clone();
        for sample in &mut b.samples {
            sample.source = crate::SampleSource::Ble;
            sample.timestamp = 0;
        }
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[tokio::test]
    async fn test_offline_fails_before_any_work() {
        let f = fixture();
        f.monitor.set_online(false);

        let err = f.reconciler.sync_calibrations("u1").await.unwrap_err();
        assert!(matches!(err, Error::Offline));
        assert_eq!(f.remote.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.reconciler.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_bidirectional_sync_then_idempotent() {
        let f = fixture();
        f.store.save(profile(5, &[60.0, 80.0, 100.0])).await.unwrap();
        f.store.save(profile(7, &[65.0, 85.0, 105.0])).await.unwrap();
        f.remote
            .create("u1", &profile(3, &[70.0, 90.0, 110.0]))
            .await
            .unwrap();

        let first = f.reconciler.sync_calibrations("u1").await.unwrap();
        assert_eq!(first.uploaded, 2);
        assert_eq!(first.downloaded, 1);
        assert_eq!(first.conflicts, 0);
        assert!(first.errors.is_empty());

        let local = f.store.list_all().await.unwrap();
        assert_eq!(local.len(), 3);
        let downloaded = local.iter().find(|c| c.damper == 3).unwrap();
        // Local ids, not the remote UUID
        assert!(downloaded.id.as_deref().unwrap().parse::<u64>().is_ok());

        let second = f.reconciler.sync_calibrations("u1").await.unwrap();
        assert_eq!(second.uploaded, 0);
        assert_eq!(second.downloaded, 0);
        assert_eq!(f.remote.calibrations.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_matching_fingerprints_are_untouched() {
        let f = fixture();
        let mut local = profile(5, &[60.0, 80.0, 100.0]);
        local.r2 = 0.97;
        f.store.save(local).await.unwrap();

        let mut remote = profile(5, &[100.0, 80.0, 60.0]);
        remote.r2 = 0.99;
        f.remote.create("u1", &remote).await.unwrap();

        let summary = f.reconciler.sync_calibrations("u1").await.unwrap();
        assert_eq!(summary, SyncSummary::default());
        assert_eq!(f.store.list_all().await.unwrap()[0].r2, 0.97);
    }

    #[tokio::test]
    async fn test_upload_failures_are_collected() {
        let f = fixture();
        f.store.save(profile(5, &[60.0, 80.0, 100.0])).await.unwrap();
        f.remote
            .create("u1", &profile(3, &[70.0, 90.0, 110.0]))
            .await
            .unwrap();
        f.remote.fail_creates.store(true, Ordering::SeqCst);

        let summary = f.reconciler.sync_calibrations("u1").await.unwrap();
        assert_eq!(summary.uploaded, 0);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("boom"));
    }

    /// Store that can be read but refuses every write
    struct ReadOnlyStore(JsonFileStore);

    #[async_trait]
    impl CalibrationStore for ReadOnlyStore {
        async fn save(&self, _profile: CalibrationProfile) -> Result<CalibrationProfile> {
            Err(Error::Storage("disk full".into()))
        }

        async fn get(&self, id: &str) -> Result<Option<CalibrationProfile>> {
            self.0.get(id).await
        }

        async fn list_by_damper(&self, damper: u8) -> Result<Vec<CalibrationProfile>> {
            self.0.list_by_damper(damper).await
        }

        async fn list_all(&self) -> Result<Vec<CalibrationProfile>> {
            self.0.list_all().await
        }

        async fn delete(&self, id: &str) -> Result<bool> {
            self.0.delete(id).await
        }
    }

    #[tokio::test]
    async fn test_download_failures_are_collected() {
        crate::logging::init_test();
        let dir = tempfile::tempdir().unwrap();
        let inner = JsonFileStore::in_dir(dir.path());
        inner.save(profile(5, &[60.0, 80.0, 100.0])).await.unwrap();

        let remote = Arc::new(MemoryRemote::default());
        remote
            .create("u1", &profile(3, &[70.0, 90.0, 110.0]))
            .await
            .unwrap();

        let reconciler = SyncReconciler::new(
            Arc::new(ReadOnlyStore(inner)),
            remote.clone(),
            Arc::new(ConnectivityMonitor::new(true)),
        );

        let summary = reconciler.sync_calibrations("u1").await.unwrap();
        assert_eq!(summary.downloaded, 0);
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("download"));
        assert!(summary.errors[0].contains("disk full"));
        assert_eq!(remote.calibrations.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_deleted_calibration_stays_deleted_after_sync() {
        let f = fixture();
        let saved = f.store.save(profile(5, &[60.0, 80.0, 100.0])).await.unwrap();
        f.store.save(profile(7, &[65.0, 85.0, 105.0])).await.unwrap();

        let first = f.reconciler.sync_calibrations("u1").await.unwrap();
        assert_eq!(first.uploaded, 2);

        let id = saved.id.unwrap();
        let deleted = f.reconciler.delete_calibration("u1", &id).await.unwrap();
        assert_eq!(deleted, DeleteSummary { local: true, remote: 1 });

        let second = f.reconciler.sync_calibrations("u1").await.unwrap();
        assert_eq!(second.downloaded, 0);
        assert_eq!(second.uploaded, 0);

        let local = f.store.list_all().await.unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].damper, 7);
        assert_eq!(f.remote.calibrations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_id_touches_nothing() {
        let f = fixture();
        let deleted = f.reconciler.delete_calibration("u1", "42").await.unwrap();
        assert_eq!(deleted, DeleteSummary::default());
        assert_eq!(f.remote.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_offline_keeps_local_profile() {
        let f = fixture();
        let saved = f.store.save(profile(5, &[60.0, 80.0, 100.0])).await.unwrap();
        f.monitor.set_online(false);

        let err = f
            .reconciler
            .delete_calibration("u1", saved.id.as_deref().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Offline));
        assert_eq!(f.store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_local_profiles_upload_once() {
        let f = fixture();
        f.store.save(profile(5, &[60.0, 80.0, 100.0])).await.unwrap();
        f.store.save(profile(5, &[80.0, 100.0, 60.0])).await.unwrap();

        let summary = f.reconciler.sync_calibrations("u1").await.unwrap();
        assert_eq!(summary.uploaded, 1);
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_refused() {
        let f = fixture();
        f.reconciler.syncing.store(true, Ordering::SeqCst);
        assert_eq!(f.reconciler.state(), SyncState::Syncing);

        let err = f.reconciler.sync_calibrations("u1").await.unwrap_err();
        assert!(matches!(err, Error::SyncInProgress));
        assert!(f.reconciler.auto_sync("u1").await.is_none());
        assert_eq!(f.remote.list_calls.load(Ordering::SeqCst), 0);

        f.reconciler.syncing.store(false, Ordering::SeqCst);
        assert!(f.reconciler.auto_sync("u1").await.is_some());
        assert_eq!(f.reconciler.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_auto_sync_swallows_errors() {
        let f = fixture();
        f.monitor.set_online(false);
        assert!(f.reconciler.auto_sync("u1").await.is_none());

        std::fs::write(f.store.path(), "not json").unwrap();
        f.monitor.set_online(true);
        assert!(f.reconciler.auto_sync("u1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_sync_schedule() {
        let f = fixture();
        let calls = || f.remote.list_calls.load(Ordering::SeqCst);

        let handle = f
            .reconciler
            .setup_auto_sync("u1", Duration::from_secs(5 * 60));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls(), 1, "immediate pass");

        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!(calls(), 2, "timer pass");

        f.monitor.set_online(false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        f.monitor.set_online(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls(), 3, "reconnect pass");

        handle.stop();
        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(calls(), 3, "no passes after stop");
    }
}

//! Remote calibration endpoint.
//!
//! Every payload coming back from the server is decoded into a typed
//! envelope and checked before it reaches the reconciler; anything that does
//! not fit is reported as [`Error::RemoteRequest`].

use crate::{CalibrationProfile, Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Remote side of calibration sync
#[async_trait]
pub trait RemoteCalibrations: Send + Sync {
    /// Every calibration the server holds for the user
    async fn list(&self, user_id: &str) -> Result<Vec<CalibrationProfile>>;

    /// Upload a calibration; returns the server-assigned id
    async fn create(&self, user_id: &str, profile: &CalibrationProfile) -> Result<String>;

    /// Delete a calibration and its samples
    async fn delete(&self, user_id: &str, id: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    calibrations: Vec<CalibrationProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    success: bool,
    #[serde(default)]
    calibration_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// HTTP implementation of [`RemoteCalibrations`]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn calibrations_url(&self) -> String {
        format!("{}/calibrations", self.base_url)
    }

    /// Check the status and decode the body into `T`
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(Error::RemoteRequest(format!("HTTP {}: {}", status, message)));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::RemoteRequest(format!("malformed response: {}", e)))
    }
}

#[async_trait]
impl RemoteCalibrations for HttpRemote {
    async fn list(&self, user_id: &str) -> Result<Vec<CalibrationProfile>> {
        let response = self
            .client
            .get(self.calibrations_url())
            .query(&[("userId", user_id)])
            .send()
            .await?;
        let listing: ListResponse = Self::decode(response).await?;

        // One bad server record must not block every later pass
        let total = listing.calibrations.len();
        let calibrations: Vec<_> = listing
            .calibrations
            .into_iter()
            .filter_map(|profile| match check_profile(profile) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    tracing::warn!("Skipping remote calibration: {}", e);
                    None
                }
            })
            .collect();
        tracing::debug!(
            "Fetched {} remote calibrations ({} skipped)",
            calibrations.len(),
            total - calibrations.len()
        );
        Ok(calibrations)
    }

    async fn create(&self, user_id: &str, profile: &CalibrationProfile) -> Result<String> {
        let response = self
            .client
            .post(self.calibrations_url())
            .query(&[("userId", user_id)])
            .json(profile)
            .send()
            .await?;
        let created: CreateResponse = Self::decode(response).await?;

        match created {
            CreateResponse {
                success: true,
                calibration_id: Some(id),
                ..
            } => Ok(id),
            CreateResponse { error, .. } => Err(Error::RemoteRequest(
                error.unwrap_or_else(|| "create returned no calibrationId".into()),
            )),
        }
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/{}", self.calibrations_url(), id))
            .query(&[("userId", user_id)])
            .send()
            .await?;
        let deleted: DeleteResponse = Self::decode(response).await?;

        if deleted.success {
            Ok(())
        } else {
            Err(Error::RemoteRequest(
                deleted.error.unwrap_or_else(|| format!("delete of {} failed", id)),
            ))
        }
    }
}

/// Reject profiles the local model could not hold
fn check_profile(profile: CalibrationProfile) -> Result<CalibrationProfile> {
    let reject = |reason: &str| -> Result<CalibrationProfile> {
        Err(Error::RemoteRequest(format!(
            "invalid calibration {:?}: {}",
            profile.id, reason
        )))
    };

    if !(1..=10).contains(&profile.damper) {
        return reject("damper out of range");
    }
    if !(profile.a.is_finite() && profile.a > 0.0) {
        return reject("coefficient a must be positive");
    }
    if !profile.b.is_finite() {
        return reject("exponent b is not finite");
    }
    if !(0.0..=1.0).contains(&profile.r2) {
        return reject("r2 outside [0, 1]");
    }
    if profile.samples.iter().any(|s| {
        !s.watts.is_finite()
            || s.rpm.is_some_and(|v| !v.is_finite())
            || s.pace_500.is_some_and(|v| !v.is_finite())
    }) {
        return reject("sample values not finite");
    }
    Ok(profile)
}

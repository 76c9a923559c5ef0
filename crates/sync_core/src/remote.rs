use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use shared::{
    error::SyncError,
    protocol::{ScanBatchRequest, SettingsPayload, UserInfoResponse},
};

/// Remote authority seam. Every call is authenticated with the current
/// session bearer token; implementations map transport and status failures
/// onto the shared error taxonomy.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    async fn fetch_user_info(&self, token: &str) -> Result<UserInfoResponse, SyncError>;
    async fn push_settings(
        &self,
        token: &str,
        payload: &SettingsPayload,
    ) -> Result<(), SyncError>;
    async fn submit_scan_batch(
        &self,
        token: &str,
        batch: &ScanBatchRequest,
    ) -> Result<(), SyncError>;
}

/// Fallback for partially wired construction; errors on every call.
pub struct MissingRemoteAuthority;

#[async_trait]
impl RemoteAuthority for MissingRemoteAuthority {
    async fn fetch_user_info(&self, _token: &str) -> Result<UserInfoResponse, SyncError> {
        Err(SyncError::RemoteUnavailable(
            "remote authority is unavailable".to_string(),
        ))
    }

    async fn push_settings(
        &self,
        _token: &str,
        _payload: &SettingsPayload,
    ) -> Result<(), SyncError> {
        Err(SyncError::RemoteUnavailable(
            "remote authority is unavailable".to_string(),
        ))
    }

    async fn submit_scan_batch(
        &self,
        _token: &str,
        _batch: &ScanBatchRequest,
    ) -> Result<(), SyncError> {
        Err(SyncError::RemoteUnavailable(
            "remote authority is unavailable".to_string(),
        ))
    }
}

/// reqwest-backed implementation against a single base URL.
pub struct HttpRemoteAuthority {
    http: Client,
    base_url: String,
}

impl HttpRemoteAuthority {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn fetch_user_info(&self, token: &str) -> Result<UserInfoResponse, SyncError> {
        let response = self
            .http
            .get(format!("{}/userInfo", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let response = check_status(response)?;
        response
            .json()
            .await
            .map_err(|err| SyncError::MalformedRemoteData(err.to_string()))
    }

    async fn push_settings(
        &self,
        token: &str,
        payload: &SettingsPayload,
    ) -> Result<(), SyncError> {
        let response = self
            .http
            .post(format!("{}/users/settings", self.base_url))
            .bearer_auth(token)
            .json(payload)
            .send()
            .await
            .map_err(classify_transport_error)?;

        check_status(response)?;
        Ok(())
    }

    async fn submit_scan_batch(
        &self,
        token: &str,
        batch: &ScanBatchRequest,
    ) -> Result<(), SyncError> {
        let response = self
            .http
            .post(format!("{}/scan/batch", self.base_url))
            .bearer_auth(token)
            .json(batch)
            .send()
            .await
            .map_err(classify_transport_error)?;

        check_status(response)?;
        Ok(())
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(classify_status(status))
}

fn classify_status(status: StatusCode) -> SyncError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        SyncError::AuthRejected
    } else {
        SyncError::RemoteUnavailable(format!("server responded {status}"))
    }
}

fn classify_transport_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        return SyncError::RemoteUnavailable(format!("request timed out: {err}"));
    }
    if let Some(status) = err.status() {
        return classify_status(status);
    }
    SyncError::RemoteUnavailable(err.to_string())
}

//! HTTP-backed remote record store client.
//!
//! Speaks a small JSON protocol; the wire shape is owned by this crate, the
//! server only has to honor the [`RemoteStore`] contract: bulk save/delete,
//! zone and subscription creation, paged token-in/token-out change queries,
//! and asset transfer by reference.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::models::RecordName;

use super::record::{AssetRef, ChangeToken, DeletedRecord, RemoteRecord};
use super::{
    DatabaseChangePage, RecordFailure, RemoteError, RemoteResult, RemoteStore, ZoneChangePage,
};

/// Remote store client over HTTP + JSON.
#[derive(Clone)]
pub struct HttpRemote {
    endpoint: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpRemote {
    /// Create a client for the given endpoint (must include a scheme).
    pub fn new(endpoint: impl Into<String>) -> RemoteResult<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        Ok(Self {
            endpoint,
            auth_token: None,
            client: reqwest::Client::builder()
                .build()
                .map_err(|error| RemoteError::Network(error.to_string()))?,
        })
    }

    /// Attach a bearer token to every request.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> RemoteResult<T> {
        let mut request = self
            .client
            .post(format!("{}{path}", self.endpoint))
            .header("Accept", "application/json")
            .json(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|error| RemoteError::Api(format!("invalid response payload: {error}")))
    }
}

impl RemoteStore for HttpRemote {
    async fn create_zone(&self, zone_name: &str) -> RemoteResult<()> {
        let _: Ack = self
            .post(
                "/v1/zones",
                &ZoneRequest {
                    zone_name: zone_name.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn create_subscription(&self, subscription_id: &str) -> RemoteResult<()> {
        let _: Ack = self
            .post(
                "/v1/subscriptions",
                &SubscriptionRequest {
                    subscription_id: subscription_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn fetch_database_changes(
        &self,
        since: Option<&ChangeToken>,
    ) -> RemoteResult<DatabaseChangePage> {
        let page: DatabaseChangesResponse = self
            .post(
                "/v1/changes/database",
                &DatabaseChangesRequest {
                    since: since.cloned(),
                },
            )
            .await?;
        Ok(DatabaseChangePage {
            changed_zones: page.changed_zones,
            token: page.token,
            more: page.more,
        })
    }

    async fn fetch_zone_changes(
        &self,
        zone_name: &str,
        since: Option<&ChangeToken>,
    ) -> RemoteResult<ZoneChangePage> {
        let page: ZoneChangesResponse = self
            .post(
                "/v1/changes/zone",
                &ZoneChangesRequest {
                    zone_name: zone_name.to_string(),
                    since: since.cloned(),
                },
            )
            .await?;
        Ok(ZoneChangePage {
            changed: page.changed,
            deleted: page.deleted,
            token: page.token,
            more: page.more,
        })
    }

    async fn save_records(&self, records: Vec<RemoteRecord>) -> RemoteResult<Vec<RemoteRecord>> {
        let response: SaveResponse = self
            .post("/v1/records/save", &SaveRequest { records })
            .await?;

        if response.failed.is_empty() {
            return Ok(response.saved);
        }

        let failures = response
            .failed
            .into_iter()
            .map(|failure| RecordFailure {
                record_name: failure.record_name,
                reason: failure.reason,
                server_record: failure.server_record,
            })
            .collect();
        Err(RemoteError::PartialFailure {
            saved: response.saved,
            failures,
        })
    }

    async fn delete_records(
        &self,
        zone_name: &str,
        record_names: Vec<RecordName>,
    ) -> RemoteResult<Vec<RecordName>> {
        let response: DeleteResponse = self
            .post(
                "/v1/records/delete",
                &DeleteRequest {
                    zone_name: zone_name.to_string(),
                    record_names,
                },
            )
            .await?;
        Ok(response.deleted)
    }

    async fn upload_asset(&self, data: Vec<u8>) -> RemoteResult<AssetRef> {
        let response: AssetUploadResponse =
            self.post("/v1/assets", &AssetUploadRequest { data }).await?;
        Ok(response.asset)
    }

    async fn download_asset(&self, asset: &AssetRef) -> RemoteResult<Vec<u8>> {
        let response: AssetDownloadResponse = self
            .post(
                "/v1/assets/download",
                &AssetDownloadRequest {
                    asset: asset.clone(),
                },
            )
            .await?;
        Ok(response.data)
    }
}

#[derive(Debug, Deserialize)]
struct Ack {
    #[serde(default)]
    #[allow(dead_code)]
    ok: bool,
}

#[derive(Debug, Serialize)]
struct ZoneRequest {
    zone_name: String,
}

#[derive(Debug, Serialize)]
struct SubscriptionRequest {
    subscription_id: String,
}

#[derive(Debug, Serialize)]
struct DatabaseChangesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<ChangeToken>,
}

#[derive(Debug, Deserialize)]
struct DatabaseChangesResponse {
    changed_zones: Vec<String>,
    token: ChangeToken,
    #[serde(default)]
    more: bool,
}

#[derive(Debug, Serialize)]
struct ZoneChangesRequest {
    zone_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<ChangeToken>,
}

#[derive(Debug, Deserialize)]
struct ZoneChangesResponse {
    #[serde(default)]
    changed: Vec<RemoteRecord>,
    #[serde(default)]
    deleted: Vec<DeletedRecord>,
    token: ChangeToken,
    #[serde(default)]
    more: bool,
}

#[derive(Debug, Serialize)]
struct SaveRequest {
    records: Vec<RemoteRecord>,
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
    #[serde(default)]
    saved: Vec<RemoteRecord>,
    #[serde(default)]
    failed: Vec<WireRecordFailure>,
}

#[derive(Debug, Deserialize)]
struct WireRecordFailure {
    record_name: RecordName,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    server_record: Option<RemoteRecord>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest {
    zone_name: String,
    record_names: Vec<RecordName>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    deleted: Vec<RecordName>,
}

#[derive(Debug, Serialize)]
struct AssetUploadRequest {
    data: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct AssetUploadResponse {
    asset: AssetRef,
}

#[derive(Debug, Serialize)]
struct AssetDownloadRequest {
    asset: AssetRef,
}

#[derive(Debug, Deserialize)]
struct AssetDownloadResponse {
    data: Vec<u8>,
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    RemoteError::Network(error.to_string())
}

/// Map an HTTP failure status onto the recovery taxonomy.
fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::NotAuthenticated,
        StatusCode::GONE => RemoteError::TokenExpired,
        StatusCode::INSUFFICIENT_STORAGE => RemoteError::QuotaExceeded,
        _ => RemoteError::Api(parse_api_error(status, body)),
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> RemoteResult<String> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(RemoteError::Api("endpoint must not be empty".to_string()));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::Api(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

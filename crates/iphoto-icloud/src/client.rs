//! iCloud web API client
//!
//! Typed HTTP client for the authentication and photo-library endpoints.
//! The engine never sees HTTP: every response is mapped onto the
//! enumerated outcomes of the [`ICloudSession`] port, and transport
//! failures collapse into the `ServiceUnavailable` kinds.
//!
//! Base URLs are injectable so tests can point the client at a mock
//! server.

use std::sync::Mutex;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use iphoto_core::domain::{Album, AlbumKind, RemotePhoto};
use iphoto_core::ports::cloud_session::{
    AuthOutcome, ByteStream, CloudError, ICloudSession, RequestOutcome, VerifyOutcome,
};

use crate::session_store::{SessionBlob, SessionStore};

/// Default base URL for the authentication endpoints
const AUTH_BASE_URL: &str = "https://idmsa.apple.com/appleauth/auth";

/// Default base URL for the photo-library endpoints
const WEB_BASE_URL: &str = "https://www.icloud.com/library/1";

/// Per-request timeout; downloads carry their own deadline in the engine
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
struct AlbumsResponse {
    albums: Vec<AlbumEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumEntry {
    name: String,
    kind: String,
    #[serde(default)]
    item_count: u64,
}

#[derive(Debug, Deserialize)]
struct PhotosResponse {
    photos: Vec<PhotoEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhotoEntry {
    id: String,
    filename: String,
    #[serde(default)]
    size: u64,
}

// ============================================================================
// ICloudClient
// ============================================================================

/// HTTP adapter implementing the [`ICloudSession`] port
///
/// Holds the credentials, the cookie-carrying HTTP client, and the
/// session blob (tokens captured across the auth exchange). The blob is
/// persisted through [`SessionStore`] whenever it gains a token.
pub struct ICloudClient {
    http: Client,
    auth_base: String,
    web_base: String,
    username: String,
    password: String,
    store: SessionStore,
    blob: Mutex<SessionBlob>,
}

impl ICloudClient {
    /// Creates a client with the production endpoints.
    pub fn new(username: impl Into<String>, password: impl Into<String>, store: SessionStore) -> Self {
        Self::with_base_urls(username, password, store, AUTH_BASE_URL, WEB_BASE_URL)
    }

    /// Creates a client with custom base URLs (used by tests).
    pub fn with_base_urls(
        username: impl Into<String>,
        password: impl Into<String>,
        store: SessionStore,
        auth_base: impl Into<String>,
        web_base: impl Into<String>,
    ) -> Self {
        let username = username.into();
        let blob = store.load(&username).ok().flatten().unwrap_or_default();

        let http = Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            auth_base: auth_base.into(),
            web_base: web_base.into(),
            username,
            password: password.into(),
            store,
            blob: Mutex::new(blob),
        }
    }

    fn blob_snapshot(&self) -> SessionBlob {
        self.blob.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Merges captured headers into the blob and persists it.
    fn update_blob(&self, f: impl FnOnce(&mut SessionBlob)) {
        let mut blob = self.blob.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut blob);
        if let Err(e) = self.store.save(&self.username, &blob) {
            // Never log token material, only the failure itself.
            warn!(error = %e, "Failed to persist session blob");
        }
    }

    /// Captures the session headers the auth endpoints hand back.
    fn capture_session_headers(&self, response: &Response) {
        let session_id = header_value(response, "X-Apple-ID-Session-Id");
        let scnt = header_value(response, "scnt");
        let session_token = header_value(response, "X-Apple-Session-Token");
        if session_id.is_some() || scnt.is_some() || session_token.is_some() {
            self.update_blob(|blob| {
                if session_id.is_some() {
                    blob.session_id = session_id;
                }
                if scnt.is_some() {
                    blob.scnt = scnt;
                }
                if session_token.is_some() {
                    blob.session_token = session_token;
                }
            });
        }
    }

    /// Adds the captured session headers to an auth request.
    fn auth_request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let blob = self.blob_snapshot();
        let mut builder = builder;
        if let Some(ref sid) = blob.session_id {
            builder = builder.header("X-Apple-ID-Session-Id", sid);
        }
        if let Some(ref scnt) = blob.scnt {
            builder = builder.header("scnt", scnt);
        }
        builder
    }
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn kind_from_str(kind: &str) -> AlbumKind {
    match kind {
        "shared" => AlbumKind::Shared,
        _ => AlbumKind::Personal,
    }
}

#[async_trait::async_trait]
impl ICloudSession for ICloudClient {
    async fn authenticate(&self) -> Result<AuthOutcome, CloudError> {
        let trust_token = self.blob_snapshot().trust_token;

        let payload = json!({
            "accountName": self.username,
            "password": self.password,
            "trustTokens": trust_token.iter().collect::<Vec<_>>(),
        });

        let response = match self
            .auth_request(self.http.post(format!("{}/signin", self.auth_base)))
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Sign-in request failed");
                return Ok(AuthOutcome::ServiceUnavailable);
            }
        };

        self.capture_session_headers(&response);

        match response.status() {
            StatusCode::OK => {
                info!(user = %self.username, "Authenticated with trusted session");
                Ok(AuthOutcome::Ok)
            }
            StatusCode::CONFLICT => {
                info!(user = %self.username, "Two-factor code required");
                Ok(AuthOutcome::TwoFactorRequired)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(user = %self.username, "Credentials rejected");
                Ok(AuthOutcome::InvalidCredentials)
            }
            status => {
                warn!(%status, "Sign-in answered unexpectedly");
                Ok(AuthOutcome::ServiceUnavailable)
            }
        }
    }

    async fn request_2fa(&self) -> Result<RequestOutcome, CloudError> {
        let response = match self
            .auth_request(
                self.http
                    .put(format!("{}/verify/trusteddevice/securitycode", self.auth_base)),
            )
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "2FA resend request failed");
                return Ok(RequestOutcome::ServiceUnavailable);
            }
        };

        match response.status() {
            s if s.is_success() => Ok(RequestOutcome::Ok),
            StatusCode::TOO_MANY_REQUESTS => Ok(RequestOutcome::RateLimited),
            status => {
                warn!(%status, "2FA resend answered unexpectedly");
                Ok(RequestOutcome::ServiceUnavailable)
            }
        }
    }

    async fn verify_2fa(&self, code: &str) -> Result<VerifyOutcome, CloudError> {
        let payload = json!({ "securityCode": { "code": code } });

        let response = match self
            .auth_request(
                self.http
                    .post(format!("{}/verify/trusteddevice/securitycode", self.auth_base)),
            )
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "2FA verification request failed");
                return Ok(VerifyOutcome::ServiceUnavailable);
            }
        };

        self.capture_session_headers(&response);

        match response.status() {
            s if s.is_success() => {
                info!("Two-factor code accepted");
                Ok(VerifyOutcome::Ok)
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Ok(VerifyOutcome::CodeInvalid),
            status => {
                warn!(%status, "2FA verification answered unexpectedly");
                Ok(VerifyOutcome::ServiceUnavailable)
            }
        }
    }

    async fn trust_session(&self) -> Result<(), CloudError> {
        let response = self
            .auth_request(self.http.get(format!("{}/2sv/trust", self.auth_base)))
            .send()
            .await
            .map_err(|e| CloudError::ServiceUnavailable(format!("trust request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CloudError::ServiceUnavailable(format!(
                "trust request answered {}",
                response.status()
            )));
        }

        let trust_token = header_value(&response, "X-Apple-TwoSV-Trust-Token");
        if trust_token.is_some() {
            self.update_blob(|blob| blob.trust_token = trust_token);
            info!("Session trusted; future runs will skip 2FA");
        }
        Ok(())
    }

    async fn list_albums(&self) -> Result<Vec<Album>, CloudError> {
        let response = self
            .http
            .get(format!("{}/albums", self.web_base))
            .send()
            .await
            .map_err(|e| CloudError::ServiceUnavailable(format!("album listing failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CloudError::ServiceUnavailable(format!(
                "album listing answered {}",
                response.status()
            )));
        }

        let parsed: AlbumsResponse = response
            .json()
            .await
            .map_err(|e| CloudError::ServiceUnavailable(format!("album listing unreadable: {}", e)))?;

        let albums = parsed
            .albums
            .into_iter()
            .map(|a| Album::new(a.name, kind_from_str(&a.kind), a.item_count))
            .collect::<Vec<_>>();

        debug!(count = albums.len(), "Albums listed");
        Ok(albums)
    }

    async fn list_photos(&self, album: &Album) -> Result<Vec<RemotePhoto>, CloudError> {
        let kind = album.kind.to_string();
        let response = self
            .http
            .get(format!("{}/photos", self.web_base))
            .query(&[("album", album.name.as_str()), ("kind", kind.as_str())])
            .send()
            .await
            .map_err(|e| CloudError::ServiceUnavailable(format!("photo listing failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CloudError::ServiceUnavailable(format!(
                "photo listing answered {}",
                response.status()
            )));
        }

        let parsed: PhotosResponse = response
            .json()
            .await
            .map_err(|e| CloudError::ServiceUnavailable(format!("photo listing unreadable: {}", e)))?;

        let photos = parsed
            .photos
            .into_iter()
            .map(|p| RemotePhoto {
                remote_id: p.id,
                filename: p.filename,
                size_bytes: p.size,
                album_name: album.name.clone(),
                kind: album.kind,
            })
            .collect::<Vec<_>>();

        debug!(album = %album.name, count = photos.len(), "Photos listed");
        Ok(photos)
    }

    async fn download(&self, remote_id: &str) -> Result<ByteStream, CloudError> {
        let response = self
            .http
            .get(format!("{}/download", self.web_base))
            .query(&[("id", remote_id)])
            .send()
            .await
            .map_err(|e| CloudError::ServiceUnavailable(format!("download failed: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(CloudError::NotFound(remote_id.to_string()));
            }
            s if !s.is_success() => {
                return Err(CloudError::ServiceUnavailable(format!(
                    "download answered {}",
                    s
                )));
            }
            _ => {}
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| CloudError::ServiceUnavailable(format!("download stream failed: {}", e)))
        });

        Ok(Box::pin(stream))
    }
}

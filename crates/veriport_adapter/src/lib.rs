#![forbid(unsafe_code)]

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use veriport_contracts::{Aid, Dig, ReportStats, Said, UnixTimeMs};
use veriport_core::authorizing::{self, AuthorizerConfig};
use veriport_core::credentials::CredentialCache;
use veriport_core::keystate::{KeyStateDirectory, KeyStateSource};
use veriport_core::presenting::{self, PRESENTATION_CONTENT_TYPE};
use veriport_core::reporting;
use veriport_storage::VerifierDb;

/// Shared service state: the verifier database behind one mutex, the
/// credential cache fed by presentations, the key-state directory and the
/// authorizer configuration. Handlers and the background sweeps coordinate
/// only through this state.
pub struct AppState {
    pub db: Mutex<VerifierDb>,
    pub creds: CredentialCache,
    pub keys: KeyStateDirectory,
    pub config: AuthorizerConfig,
}

impl AppState {
    pub fn new(config: AuthorizerConfig, keys: KeyStateDirectory) -> Self {
        Self {
            db: Mutex::new(VerifierDb::new_in_memory()),
            creds: CredentialCache::new(),
            keys,
            config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    NotFound(String),
    Forbidden(String),
    Unauthorized(String),
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::NotFound(m)
            | ApiError::Forbidden(m)
            | ApiError::Unauthorized(m)
            | ApiError::BadRequest(m)
            | ApiError::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiMessage {
            message: self.message().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApiMessage {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AuthorizationReply {
    pub aid: String,
    pub said: String,
}

pub fn unix_now() -> UnixTimeMs {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    UnixTimeMs(ms as u64)
}

impl AppState {
    /// 404 unless the AID has resolvable key-state.
    fn require_known(&self, aid_text: &str) -> Result<Aid, ApiError> {
        let aid = Aid::new(aid_text)
            .map_err(|_| ApiError::NotFound(format!("unknown AID: {aid_text}")))?;
        if self.keys.key_state(&aid).is_none() {
            return Err(ApiError::NotFound(format!("unknown AID: {aid_text}")));
        }
        Ok(aid)
    }

    /// 403 unless the AID holds a current authorization record.
    fn require_authorized(&self, aid: &Aid) -> Result<Said, ApiError> {
        let guard = self
            .db
            .lock()
            .map_err(|_| ApiError::Internal("verifier database lock poisoned".to_string()))?;
        match guard.authorization(aid) {
            Ok(Some(said)) => Ok(said),
            Ok(None) => Err(ApiError::Forbidden(format!(
                "identifier {aid} has no valid credential for access"
            ))),
            Err(e) => Err(ApiError::Internal(format!(
                "authorization lookup failed: {e:?}"
            ))),
        }
    }

    /// Accept a credential presentation body: the parse pipeline must have
    /// processed the path SAID, the credential lands in the cache and the
    /// presentation (plus any observed revocations) lands in escrow.
    pub fn presentation_submit(
        &self,
        said_text: &str,
        content_type: Option<&str>,
        body: &[u8],
        now: UnixTimeMs,
    ) -> Result<(), ApiError> {
        match content_type {
            Some(value) if value == PRESENTATION_CONTENT_TYPE => {}
            other => {
                return Err(ApiError::BadRequest(format!(
                    "invalid content type={} for VC presentation",
                    other.unwrap_or("<none>")
                )));
            }
        }

        let said = Said::new(said_text)
            .map_err(|_| ApiError::BadRequest(format!("invalid SAID: {said_text}")))?;
        let parsed = presenting::parse_presentation(body, &self.keys, &self.creds)
            .map_err(|e| ApiError::BadRequest(e.0))?;
        if !parsed.processed(&said) {
            return Err(ApiError::BadRequest(format!(
                "credential {said} not processed in body of request"
            )));
        }

        let mut guard = self
            .db
            .lock()
            .map_err(|_| ApiError::Internal("verifier database lock poisoned".to_string()))?;
        authorizing::record_presentation(&mut guard, &said, now);
        for revoked in &parsed.revoked_saids {
            authorizing::record_revocation(&mut guard, revoked, now);
        }
        tracing::info!(said = %said, "credential presented");
        Ok(())
    }

    pub fn authorization_status(&self, aid_text: &str) -> Result<AuthorizationReply, ApiError> {
        let aid = self.require_known(aid_text)?;
        let said = self.require_authorized(&aid)?;
        Ok(AuthorizationReply {
            aid: aid.as_str().to_string(),
            said: said.as_str().to_string(),
        })
    }

    /// Verify a detached signature over request data using the AID's
    /// current primary key.
    pub fn request_verify(&self, aid_text: &str, data: &str, sig: &str) -> Result<(), ApiError> {
        let aid = self.require_known(aid_text)?;
        self.require_authorized(&aid)?;

        let state = self
            .keys
            .key_state(&aid)
            .ok_or_else(|| ApiError::NotFound(format!("unknown AID: {aid_text}")))?;
        let raw = BASE64.decode(sig.as_bytes()).map_err(|_| {
            ApiError::Unauthorized(format!("{aid} provided invalid signature on request data"))
        })?;
        if !state.verify(0, &raw, data.as_bytes()) {
            return Err(ApiError::Unauthorized(format!(
                "{aid} provided invalid signature on request data"
            )));
        }
        Ok(())
    }

    pub fn report_submit(
        &self,
        aid_text: &str,
        dig_text: &str,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<(), ApiError> {
        let aid = self.require_known(aid_text)?;
        self.require_authorized(&aid)?;
        let dig = Dig::new(dig_text)
            .map_err(|_| ApiError::BadRequest(format!("invalid report digest: {dig_text}")))?;

        let mut guard = self
            .db
            .lock()
            .map_err(|_| ApiError::Internal("verifier database lock poisoned".to_string()))?;
        reporting::create(
            &mut guard,
            &aid,
            &dig,
            filename,
            content_type,
            &mut Cursor::new(bytes),
        )
        .map_err(|e| ApiError::Internal(format!("report ingestion failed: {e:?}")))?;
        tracing::info!(aid = %aid, dig = %dig, filename = %filename, "report accepted");
        Ok(())
    }

    pub fn report_status(&self, aid_text: &str, dig_text: &str) -> Result<ReportStats, ApiError> {
        let aid = self.require_known(aid_text)?;
        self.require_authorized(&aid)?;
        let dig = Dig::new(dig_text)
            .map_err(|_| ApiError::NotFound(format!("report {dig_text} not found")))?;

        let guard = self
            .db
            .lock()
            .map_err(|_| ApiError::Internal("verifier database lock poisoned".to_string()))?;
        match reporting::get(&guard, &dig) {
            Ok(Some(stats)) => Ok(stats),
            Ok(None) => Err(ApiError::NotFound(format!("report {dig} not found"))),
            Err(e) => Err(ApiError::Internal(format!("report lookup failed: {e:?}"))),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/presentations/:said", put(put_presentation))
        .route("/authorizations/:aid", get(get_authorization))
        .route("/request/verify/:aid", post(post_request_verify))
        .route("/reports/:aid/:dig", post(post_report).get(get_report))
        .with_state(state)
}

async fn put_presentation(
    State(state): State<Arc<AppState>>,
    Path(said): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    match state.presentation_submit(&said, content_type, &body, unix_now()) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(ApiMessage {
                message: format!("credential {said} presented"),
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_authorization(
    State(state): State<Arc<AppState>>,
    Path(aid): Path<String>,
) -> Response {
    match state.authorization_status(&aid) {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, serde::Deserialize)]
struct VerifyParams {
    data: Option<String>,
    sig: Option<String>,
}

async fn post_request_verify(
    State(state): State<Arc<AppState>>,
    Path(aid): Path<String>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let (Some(data), Some(sig)) = (params.data, params.sig) else {
        return ApiError::BadRequest("request requires 'data' and 'sig' parameters".to_string())
            .into_response();
    };
    match state.request_verify(&aid, &data, &sig) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(ApiMessage {
                message: "signature valid".to_string(),
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn post_report(
    State(state): State<Arc<AppState>>,
    Path((aid, dig)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("upload") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "upload".to_string());
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                return ApiError::BadRequest(format!("failed to read upload part: {e}"))
                    .into_response();
            }
        };
        return match state.report_submit(&aid, &dig, &filename, &content_type, &bytes) {
            Ok(()) => (
                StatusCode::ACCEPTED,
                Json(ApiMessage {
                    message: format!("report {dig} accepted"),
                }),
            )
                .into_response(),
            Err(e) => e.into_response(),
        };
    }
    ApiError::BadRequest(
        "content type must be multipart/form-data with an upload file".to_string(),
    )
    .into_response()
}

async fn get_report(
    State(state): State<Arc<AppState>>,
    Path((aid, dig)): Path<(String, String)>,
) -> Response {
    match state.report_status(&aid, &dig) {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => e.into_response(),
    }
}

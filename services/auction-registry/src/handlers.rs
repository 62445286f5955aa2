//! Auction Registry REST API Handlers
//!
//! Validates the caller, delegates to the registry, and shapes responses.
//! Registry failures are mapped to fixed user-facing messages so nothing
//! internal (CA paths, signer errors) leaks to callers.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use auction::{
    AuctionError, AuctionRegistry, DESCRIPTOR_FILE_NAME, ErrorCode, ErrorResponse,
    ROOT_CERTIFICATE_FILE_NAME, StatusResponse, types::attachment_disposition,
};
use axum::{
    Json, async_trait,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{
        StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        request::Parts,
    },
    response::{IntoResponse, Response},
};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Shared application state
pub struct AppState {
    pub registry: AuctionRegistry,
    pub root_certificate: String,
    pub trust_forwarded_for: bool,
}

// ==================== Error Handling ====================

pub struct ApiError(pub StatusCode, pub Json<ErrorResponse>);

impl ApiError {
    fn new(status: StatusCode, code: ErrorCode, msg: impl Into<String>) -> Self {
        ApiError(
            status,
            Json(ErrorResponse {
                error: msg.into(),
                code,
            }),
        )
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::BadRequest, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError,
            msg,
        )
    }
}

impl From<AuctionError> for ApiError {
    fn from(e: AuctionError) -> Self {
        match e {
            AuctionError::NoActiveAuction => Self::new(
                StatusCode::CONFLICT,
                ErrorCode::NoActiveAuction,
                "no active auction",
            ),
            AuctionError::NotRegistered(_) => Self::new(
                StatusCode::NOT_FOUND,
                ErrorCode::NotRegistered,
                "not registered",
            ),
            AuctionError::AlreadyRegistered(_) => Self::new(
                StatusCode::CONFLICT,
                ErrorCode::AlreadyRegistered,
                "already registered",
            ),
            AuctionError::PortsExhausted(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorCode::Unavailable,
                "auction is full",
            ),
            AuctionError::Issuance(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorCode::IssuanceFailed,
                "credential issuance failed, retry registration",
            ),
            AuctionError::AllocationRollback(_) => Self::internal_error("internal error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

/// Logs the internal cause before it is replaced by a user-facing message.
fn reject(operation: &'static str, caller: IpAddr, e: AuctionError) -> ApiError {
    match &e {
        AuctionError::Issuance(_) | AuctionError::AllocationRollback(_) => {
            tracing::error!(%caller, operation, error = %e, "Request failed");
        }
        _ => tracing::warn!(%caller, operation, error = %e, "Request rejected"),
    }
    e.into()
}

// ==================== Caller Address ====================

/// First-hop address of the caller.
///
/// The connection peer address, or the first `X-Forwarded-For` entry when the
/// service is configured to trust proxy headers.
#[derive(Debug, Clone, Copy)]
pub struct CallerAddress(pub IpAddr);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CallerAddress {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if state.trust_forwarded_for
            && let Some(value) = parts.headers.get(FORWARDED_FOR)
        {
            let first_hop = value
                .to_str()
                .ok()
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .and_then(|v| v.parse::<IpAddr>().ok())
                .ok_or_else(|| ApiError::bad_request("caller address is not resolvable"))?;
            return Ok(CallerAddress(first_hop.to_canonical()));
        }

        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| CallerAddress(addr.ip().to_canonical()))
            .ok_or_else(|| ApiError::bad_request("caller address is not resolvable"))
    }
}

// ==================== Health Check ====================

pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ==================== Auction Handlers ====================

/// Open a new auction with the caller as seller, discarding any current one.
pub async fn create_auction(
    State(state): State<Arc<AppState>>,
    CallerAddress(caller): CallerAddress,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .registry
        .create_auction(&caller.to_string())
        .await
        .map_err(|e| reject("create", caller, e))?;

    Ok(Json(StatusResponse {
        status: "success".to_string(),
    }))
}

/// Register the caller as a buyer and return its credential bundle.
pub async fn register(
    State(state): State<Arc<AppState>>,
    CallerAddress(caller): CallerAddress,
) -> Result<Response, ApiError> {
    let registration = state
        .registry
        .register_buyer(&caller.to_string())
        .await
        .map_err(|e| reject("register", caller, e))?;

    let bundle = registration.bundle;
    let disposition = attachment_disposition(&bundle.file_name());

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/zip".to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        bundle.into_archive(),
    )
        .into_response())
}

/// Download the auction descriptor for the caller.
pub async fn download_descriptor(
    State(state): State<Arc<AppState>>,
    CallerAddress(caller): CallerAddress,
) -> Result<Response, ApiError> {
    let descriptor = state
        .registry
        .descriptor_for(&caller.to_string())
        .await
        .map_err(|e| reject("descriptor", caller, e))?;

    let body = serde_json::to_vec_pretty(&descriptor)
        .map_err(|e| ApiError::internal_error(format!("Failed to encode descriptor: {}", e)))?;

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/json".to_string()),
            (
                CONTENT_DISPOSITION,
                attachment_disposition(DESCRIPTOR_FILE_NAME),
            ),
        ],
        body,
    )
        .into_response())
}

/// Download the root certificate participants trust.
pub async fn root_certificate(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/x-pem-file".to_string()),
            (
                CONTENT_DISPOSITION,
                attachment_disposition(ROOT_CERTIFICATE_FILE_NAME),
            ),
        ],
        state.root_certificate.clone(),
    )
        .into_response()
}

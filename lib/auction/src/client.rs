//! Auction HTTP Client
//!
//! Used by participants to drive registration against the coordinator.

use std::time::Duration;

use reqwest::header::CONTENT_DISPOSITION;

use crate::archive::{self, UnpackedBundle};
use crate::error::ClientError;
use crate::types::{
    AuctionDescriptor, ErrorCode, ErrorResponse, ParticipantId, StatusResponse,
    parse_attachment_disposition, parse_bundle_file_name,
};

/// A bundle as downloaded, with the identifier recovered from its filename.
#[derive(Debug, Clone)]
pub struct DownloadedBundle {
    pub identifier: ParticipantId,
    pub file_name: String,
    pub archive: Vec<u8>,
}

impl DownloadedBundle {
    pub fn unpack(&self) -> Result<UnpackedBundle, ClientError> {
        Ok(archive::unpack(self.identifier, &self.archive)?)
    }
}

pub struct AuctionClient {
    base_url: String,
    client: reqwest::Client,
}

impl AuctionClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        AuctionClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<(), ClientError> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::Server(
                format!("Health check failed: {}", resp.status()),
                ErrorCode::Unavailable,
            ))
        }
    }

    /// Open a new auction with this caller as the seller.
    pub async fn create(&self) -> Result<StatusResponse, ClientError> {
        let resp = self
            .client
            .post(format!("{}/api/auction", self.base_url))
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(resp.json().await?)
        } else {
            Err(error_from(resp).await)
        }
    }

    /// Register as a buyer and download the credential bundle.
    pub async fn register(&self) -> Result<DownloadedBundle, ClientError> {
        let resp = self
            .client
            .post(format!("{}/api/auction/register", self.base_url))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from(resp).await);
        }

        let file_name = attachment_name(&resp)?;
        let identifier = parse_bundle_file_name(&file_name).ok_or_else(|| {
            ClientError::InvalidAttachment(format!("Unexpected bundle name: {}", file_name))
        })?;
        let archive = resp.bytes().await?.to_vec();

        Ok(DownloadedBundle {
            identifier,
            file_name,
            archive,
        })
    }

    pub async fn descriptor(&self) -> Result<AuctionDescriptor, ClientError> {
        let resp = self
            .client
            .get(format!("{}/api/auction/descriptor", self.base_url))
            .send()
            .await?;

        if resp.status().is_success() {
            let body = resp.bytes().await?;
            Ok(serde_json::from_slice(&body)?)
        } else {
            Err(error_from(resp).await)
        }
    }

    /// Root certificate PEM used to verify other participants.
    pub async fn root_certificate(&self) -> Result<String, ClientError> {
        let resp = self
            .client
            .get(format!("{}/api/auction/ca", self.base_url))
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(resp.text().await?)
        } else {
            Err(error_from(resp).await)
        }
    }
}

fn attachment_name(resp: &reqwest::Response) -> Result<String, ClientError> {
    resp.headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_attachment_disposition)
        .map(str::to_string)
        .ok_or_else(|| ClientError::InvalidAttachment("Missing attachment filename".to_string()))
}

async fn error_from(resp: reqwest::Response) -> ClientError {
    let status = resp.status();
    match resp.json::<ErrorResponse>().await {
        Ok(err) => ClientError::Server(err.error, err.code),
        Err(_) => ClientError::Server(
            format!("Unexpected response: {}", status),
            ErrorCode::InternalError,
        ),
    }
}

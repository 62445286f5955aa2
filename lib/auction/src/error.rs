//! Auction Error Types

use std::time::Duration;

use thiserror::Error;

use crate::types::ErrorCode;

#[derive(Error, Debug)]
pub enum AuctionError {
    #[error("no active auction")]
    NoActiveAuction,

    #[error("not registered: {0}")]
    NotRegistered(String),

    #[error("already registered: {0}")]
    AlreadyRegistered(String),

    #[error("no ports remaining above {0}")]
    PortsExhausted(u32),

    #[error("allocation rollback failed: {0}")]
    AllocationRollback(String),

    #[error("credential issuance failed: {0}")]
    Issuance(#[from] IssuanceError),
}

#[derive(Error, Debug)]
pub enum IssuanceError {
    #[error("Invalid subject address: {0}")]
    InvalidSubject(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Certificate request failed: {0}")]
    Request(String),

    #[error("Signing failed: {0}")]
    Signing(#[from] AuthorityError),

    #[error("Signing timed out after {0:?}")]
    Timeout(Duration),

    #[error("Packaging failed: {0}")]
    Packaging(#[from] ArchiveError),
}

/// Failures reported by a certificate authority.
#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("Invalid key material: {0}")]
    KeyMaterial(String),

    #[error("Invalid signing request: {0}")]
    InvalidRequest(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Authority unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing archive entry: {0}")]
    MissingEntry(String),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server error ({1:?}): {0}")]
    Server(String, ErrorCode),

    #[error("Invalid attachment: {0}")]
    InvalidAttachment(String),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
}

impl ClientError {
    /// The server-side error code, if the server produced one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Server(_, code) => Some(*code),
            _ => None,
        }
    }
}

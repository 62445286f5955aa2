//! Shared auction types
//!
//! Wire types exchanged between the registration service and participants.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Participant identifier. Buyers are numbered from 0 in registration order.
pub type ParticipantId = i64;

/// Reserved identifier for the seller, disjoint from every buyer identifier.
pub const SELLER_IDENTIFIER: ParticipantId = -1;

/// Fixed attachment name for the auction descriptor.
pub const DESCRIPTOR_FILE_NAME: &str = "hosts.auc";

/// Fixed attachment name for the root certificate.
pub const ROOT_CERTIFICATE_FILE_NAME: &str = "ca.cert";

const BUNDLE_EXTENSION: &str = "bundle";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Seller,
    Buyer,
}

/// A seller or buyer registered in the current auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub address: String,
    pub port: u16,
    pub role: Role,
    pub identifier: ParticipantId,
}

impl Participant {
    /// `address:port`, bracketing IPv6 literals.
    pub fn endpoint(&self) -> String {
        match self.address.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port).to_string(),
            Err(_) => format!("{}:{}", self.address, self.port),
        }
    }
}

/// Point-in-time view of the auction for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionDescriptor {
    /// The requesting participant's own identifier
    pub self_identifier: ParticipantId,
    /// Seller endpoint
    pub seller: String,
    /// Every endpoint, seller first, then buyers in registration order
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    NoActiveAuction,
    NotRegistered,
    AlreadyRegistered,
    IssuanceFailed,
    Unavailable,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorCode,
}

/// Attachment name for a participant's credential bundle.
pub fn bundle_file_name(identifier: ParticipantId) -> String {
    format!("{}.{}", identifier, BUNDLE_EXTENSION)
}

/// Recover the identifier from a bundle attachment name such as `3.bundle`.
pub fn parse_bundle_file_name(name: &str) -> Option<ParticipantId> {
    name.strip_suffix(BUNDLE_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

/// `Content-Disposition` value for an attachment.
pub fn attachment_disposition(file_name: &str) -> String {
    format!("attachment; filename=\"{}\"", file_name)
}

/// Extract the filename from a `Content-Disposition` header value.
pub fn parse_attachment_disposition(value: &str) -> Option<&str> {
    value.split(';').map(str::trim).find_map(|part| {
        part.strip_prefix("filename=")
            .map(|name| name.trim_matches('"'))
            .filter(|name| !name.is_empty())
    })
}

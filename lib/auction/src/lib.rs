//! Auction registration library
//!
//! Membership state, credential issuance and the participant client for a
//! single ephemeral peer-to-peer auction.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod archive;
pub mod authority;
pub mod client;
pub mod error;
pub mod issuer;
pub mod registry;
pub mod types;

pub use authority::{CertificateAuthority, LocalAuthority, RootMaterial, Serial, SigningRequest};
pub use client::{AuctionClient, DownloadedBundle};
pub use error::{ArchiveError, AuctionError, AuthorityError, ClientError, IssuanceError};
pub use issuer::{
    CredentialBundle, CredentialIssuer, IssuerConfig, KeyAlgorithm, PreparedCredential,
    SubjectTemplate,
};
pub use registry::{Auction, AuctionRegistry, DuplicatePolicy, Registration, RegistryConfig};
pub use types::{
    AuctionDescriptor, DESCRIPTOR_FILE_NAME, ErrorCode, ErrorResponse, Participant, ParticipantId,
    ROOT_CERTIFICATE_FILE_NAME, Role, SELLER_IDENTIFIER, StatusResponse,
};

//! Credential Issuer
//!
//! Mints a fresh key pair and CA-signed certificate for one participant
//! address and packages both into a single bundle.
//!
//! Issuance is split in two so callers can keep the expensive half outside
//! any lock: [`CredentialIssuer::prepare`] generates the key and request from
//! the address alone, [`CredentialIssuer::complete`] signs and packages once an
//! identifier has been assigned.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rcgen::{
    CertificateParams, DnType, Ia5String, KeyPair, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384,
    SanType, SignatureAlgorithm,
};

use crate::archive;
use crate::authority::{CertificateAuthority, Serial, SigningRequest};
use crate::error::IssuanceError;
use crate::types::{ParticipantId, bundle_file_name};

const DEFAULT_SIGNING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyAlgorithm {
    #[default]
    EcdsaP256,
    EcdsaP384,
}

impl KeyAlgorithm {
    fn signature_algorithm(self) -> &'static SignatureAlgorithm {
        match self {
            KeyAlgorithm::EcdsaP256 => &PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::EcdsaP384 => &PKCS_ECDSA_P384_SHA384,
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p256" | "ecdsa-p256" => Ok(KeyAlgorithm::EcdsaP256),
            "p384" | "ecdsa-p384" => Ok(KeyAlgorithm::EcdsaP384),
            other => Err(format!("unknown key algorithm '{}'", other)),
        }
    }
}

/// Distinguished name fields stamped on every issued certificate besides the CN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectTemplate {
    pub organization: String,
    pub organizational_unit: String,
    pub country: Option<String>,
}

impl Default for SubjectTemplate {
    fn default() -> Self {
        Self {
            organization: "Auction Registry".to_string(),
            organizational_unit: "Auctions".to_string(),
            country: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssuerConfig {
    pub key_algorithm: KeyAlgorithm,
    pub signing_timeout: Duration,
    pub subject: SubjectTemplate,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            key_algorithm: KeyAlgorithm::default(),
            signing_timeout: DEFAULT_SIGNING_TIMEOUT,
            subject: SubjectTemplate::default(),
        }
    }
}

/// Packaged key and certificate for one participant.
pub struct CredentialBundle {
    identifier: ParticipantId,
    archive: Vec<u8>,
}

impl CredentialBundle {
    pub fn identifier(&self) -> ParticipantId {
        self.identifier
    }

    /// Suggested attachment name, encoding the identifier.
    pub fn file_name(&self) -> String {
        bundle_file_name(self.identifier)
    }

    pub fn archive(&self) -> &[u8] {
        &self.archive
    }

    pub fn into_archive(self) -> Vec<u8> {
        self.archive
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("identifier", &self.identifier)
            .field("archive_len", &self.archive.len())
            .finish()
    }
}

/// Key pair and signing request awaiting an identifier.
pub struct PreparedCredential {
    key_pair: KeyPair,
    request: SigningRequest,
}

impl PreparedCredential {
    pub fn subject(&self) -> &str {
        self.request.subject()
    }
}

pub struct CredentialIssuer {
    authority: Arc<dyn CertificateAuthority>,
    config: IssuerConfig,
}

impl CredentialIssuer {
    pub fn new(authority: Arc<dyn CertificateAuthority>, config: IssuerConfig) -> Self {
        Self { authority, config }
    }

    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    /// Issue a bundle for `subject` in one step.
    pub async fn issue(
        &self,
        subject: &str,
        identifier: ParticipantId,
    ) -> Result<CredentialBundle, IssuanceError> {
        let prepared = self.prepare(subject)?;
        self.complete(prepared, identifier).await
    }

    /// Generate a fresh key pair and a signing request bound to `subject`.
    pub fn prepare(&self, subject: &str) -> Result<PreparedCredential, IssuanceError> {
        let subject_alt_names = subject_alt_names(subject)?;

        let key_pair = KeyPair::generate_for(self.config.key_algorithm.signature_algorithm())
            .map_err(|e| IssuanceError::KeyGeneration(e.to_string()))?;

        let mut params = CertificateParams::default();
        params.subject_alt_names = subject_alt_names;

        let template = &self.config.subject;
        let dn = &mut params.distinguished_name;
        if let Some(country) = &template.country {
            dn.push(DnType::CountryName, country.as_str());
        }
        dn.push(DnType::OrganizationName, template.organization.as_str());
        dn.push(
            DnType::OrganizationalUnitName,
            template.organizational_unit.as_str(),
        );
        dn.push(DnType::CommonName, subject);

        let pem = params
            .serialize_request(&key_pair)
            .and_then(|csr| csr.pem())
            .map_err(|e| IssuanceError::Request(e.to_string()))?;

        Ok(PreparedCredential {
            key_pair,
            request: SigningRequest::new(subject, pem),
        })
    }

    /// Sign a prepared request under a fresh serial and package the result.
    pub async fn complete(
        &self,
        prepared: PreparedCredential,
        identifier: ParticipantId,
    ) -> Result<CredentialBundle, IssuanceError> {
        let serial = Serial::random();
        let timeout = self.config.signing_timeout;

        let certificate_pem = tokio::time::timeout(
            timeout,
            self.authority.sign(&prepared.request, &serial),
        )
        .await
        .map_err(|_| IssuanceError::Timeout(timeout))??;

        let archive = archive::pack(
            identifier,
            &prepared.key_pair.serialize_pem(),
            &certificate_pem,
        )?;

        tracing::info!(
            subject = prepared.subject(),
            identifier,
            %serial,
            "Issued credential bundle"
        );

        Ok(CredentialBundle {
            identifier,
            archive,
        })
    }
}

/// The literal address, its wildcard subdomain form, and the address as an IP
/// entry when it is an IP literal.
fn subject_alt_names(subject: &str) -> Result<Vec<SanType>, IssuanceError> {
    if subject.is_empty()
        || subject.starts_with('.')
        || subject
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '*' || c == '/')
    {
        return Err(IssuanceError::InvalidSubject(subject.to_string()));
    }

    let dns = |name: String| {
        Ia5String::try_from(name)
            .map(SanType::DnsName)
            .map_err(|_| IssuanceError::InvalidSubject(subject.to_string()))
    };

    let mut names = vec![dns(subject.to_string())?, dns(format!("*.{}", subject))?];
    if let Ok(ip) = subject.parse::<IpAddr>() {
        names.push(SanType::IpAddress(ip));
    }

    Ok(names)
}

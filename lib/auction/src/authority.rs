//! Certificate Authority
//!
//! The issuer only ever asks an authority to sign a request with a serial.
//! [`LocalAuthority`] signs in-process with a PEM root key loaded from disk.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use rand::RngCore;
use rand::rngs::OsRng;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SerialNumber,
};
use time::OffsetDateTime;

use crate::error::AuthorityError;

const SERIAL_LENGTH: usize = 20;

/// Certificate serial number drawn from the operating system RNG.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Serial([u8; SERIAL_LENGTH]);

impl Serial {
    /// 20 random octets. The top bit is cleared so the DER integer stays
    /// positive and the next bit is set so it keeps its full length.
    pub fn random() -> Self {
        let mut bytes = [0u8; SERIAL_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        bytes[0] = (bytes[0] & 0x7f) | 0x40;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Serial({})", self)
    }
}

impl From<&Serial> for SerialNumber {
    fn from(serial: &Serial) -> Self {
        SerialNumber::from_slice(serial.as_bytes())
    }
}

/// A PEM-encoded PKCS#10 certificate signing request.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    subject: String,
    pem: String,
}

impl SigningRequest {
    pub fn new(subject: impl Into<String>, pem: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            pem: pem.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }
}

/// Signing oracle backed by a pre-provisioned root key.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Sign a request, returning the PEM certificate.
    async fn sign(&self, request: &SigningRequest, serial: &Serial)
    -> Result<String, AuthorityError>;
}

/// Freshly generated root key material.
pub struct RootMaterial {
    pub certificate_pem: String,
    pub key_pem: String,
}

/// Generate a self-signed root certificate and key.
pub fn generate_root(common_name: &str, validity_days: u32) -> Result<RootMaterial, AuthorityError> {
    let key = KeyPair::generate()
        .map_err(|e| AuthorityError::KeyMaterial(format!("Failed to generate root key: {}", e)))?;

    let mut params = CertificateParams::new(Vec::<String>::new())
        .map_err(|e| AuthorityError::Signing(e.to_string()))?;
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.serial_number = Some((&Serial::random()).into());
    let now = OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::hours(1);
    params.not_after = now + time::Duration::days(i64::from(validity_days));

    let certificate = params
        .self_signed(&key)
        .map_err(|e| AuthorityError::Signing(format!("Failed to self-sign root: {}", e)))?;

    Ok(RootMaterial {
        certificate_pem: certificate.pem(),
        key_pem: key.serialize_pem(),
    })
}

/// In-process authority holding the root key.
pub struct LocalAuthority {
    issuer: Certificate,
    issuer_key: KeyPair,
    root_pem: String,
    validity_days: u32,
}

impl LocalAuthority {
    pub fn from_pem(
        certificate_pem: &str,
        key_pem: &str,
        validity_days: u32,
    ) -> Result<Self, AuthorityError> {
        let issuer_key = KeyPair::from_pem(key_pem)
            .map_err(|e| AuthorityError::KeyMaterial(format!("Invalid CA key: {}", e)))?;
        let params = CertificateParams::from_ca_cert_pem(certificate_pem)
            .map_err(|e| AuthorityError::KeyMaterial(format!("Invalid CA certificate: {}", e)))?;

        // Re-signing keeps the subject and key, so issued certificates chain to the on-disk root.
        let issuer = params
            .self_signed(&issuer_key)
            .map_err(|e| AuthorityError::KeyMaterial(format!("CA key does not fit certificate: {}", e)))?;

        Ok(Self {
            issuer,
            issuer_key,
            root_pem: certificate_pem.to_string(),
            validity_days,
        })
    }

    pub fn from_files(
        certificate_path: &Path,
        key_path: &Path,
        validity_days: u32,
    ) -> Result<Self, AuthorityError> {
        let certificate_pem = std::fs::read_to_string(certificate_path)?;
        let key_pem = std::fs::read_to_string(key_path)?;
        Self::from_pem(&certificate_pem, &key_pem, validity_days)
    }

    /// Create an authority around a brand new root.
    pub fn generate(common_name: &str, validity_days: u32) -> Result<Self, AuthorityError> {
        let root = generate_root(common_name, validity_days)?;
        Self::from_pem(&root.certificate_pem, &root.key_pem, validity_days)
    }

    /// The root certificate participants use as their trust anchor.
    pub fn root_certificate_pem(&self) -> &str {
        &self.root_pem
    }
}

#[async_trait]
impl CertificateAuthority for LocalAuthority {
    async fn sign(
        &self,
        request: &SigningRequest,
        serial: &Serial,
    ) -> Result<String, AuthorityError> {
        let mut csr = CertificateSigningRequestParams::from_pem(request.pem())
            .map_err(|e| AuthorityError::InvalidRequest(e.to_string()))?;

        let now = OffsetDateTime::now_utc();
        csr.params.serial_number = Some(serial.into());
        csr.params.not_before = now - time::Duration::hours(1);
        csr.params.not_after = now + time::Duration::days(i64::from(self.validity_days));
        csr.params.is_ca = IsCa::ExplicitNoCa;
        csr.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::ContentCommitment,
            KeyUsagePurpose::KeyEncipherment,
        ];
        csr.params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        csr.params.use_authority_key_identifier_extension = true;

        let certificate = csr
            .signed_by(&self.issuer, &self.issuer_key)
            .map_err(|e| AuthorityError::Signing(e.to_string()))?;

        tracing::debug!(subject = request.subject(), %serial, "Signed certificate");

        Ok(certificate.pem())
    }
}

//! Credential bundle archive
//!
//! A bundle is a zip archive holding `{id}.key` and `{id}.cert`, both PEM.
//! Archives are assembled in memory so no working files touch the disk.

use std::io::{Cursor, Read, Write};

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ArchiveError;
use crate::types::ParticipantId;

/// Contents of an unpacked bundle.
pub struct UnpackedBundle {
    pub private_key_pem: String,
    pub certificate_pem: String,
}

pub fn key_entry_name(identifier: ParticipantId) -> String {
    format!("{}.key", identifier)
}

pub fn certificate_entry_name(identifier: ParticipantId) -> String {
    format!("{}.cert", identifier)
}

/// Pack a private key and certificate into a single archive.
pub fn pack(
    identifier: ParticipantId,
    private_key_pem: &str,
    certificate_pem: &str,
) -> Result<Vec<u8>, ArchiveError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o600);

    writer.start_file(key_entry_name(identifier), options)?;
    writer.write_all(private_key_pem.as_bytes())?;

    writer.start_file(certificate_entry_name(identifier), options)?;
    writer.write_all(certificate_pem.as_bytes())?;

    Ok(writer.finish()?.into_inner())
}

/// Unpack an archive produced by [`pack`] for the given identifier.
pub fn unpack(identifier: ParticipantId, archive: &[u8]) -> Result<UnpackedBundle, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(archive))?;

    let private_key_pem = read_entry(&mut archive, &key_entry_name(identifier))?;
    let certificate_pem = read_entry(&mut archive, &certificate_entry_name(identifier))?;

    Ok(UnpackedBundle {
        private_key_pem,
        certificate_pem,
    })
}

fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<String, ArchiveError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(ArchiveError::MissingEntry(name.to_string())),
        Err(e) => return Err(e.into()),
    };

    let mut contents = String::new();
    entry.read_to_string(&mut contents)?;
    Ok(contents)
}

//! Single-unit bundle archives.
//!
//! A bundle is a gzip-compressed tar archive laid out as:
//!
//! ```text
//! metadata.json      name, created_at, content_hash and export details
//! CHECKSUMS          "sha256:<hex>  files/<rel>" per file, then "sha256:<hex>  *"
//! files/<rel path>   the unit's files
//! ```
//!
//! The content hash only covers file paths and contents, so the same unit
//! hashes identically no matter when or where it was packed.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bundler::hash::{ContentHasher, collect_unit_files, hash_bytes};
use crate::context::DESCRIPTOR_FILE;
use crate::error::{Result, SubstrateError};

pub const METADATA_FILE: &str = "metadata.json";
pub const CHECKSUM_FILE: &str = "CHECKSUMS";
pub const FILES_PREFIX: &str = "files/";
pub const SCHEMA_VERSION: &str = "1.0";

/// Upper bound on a single archived file, guarding against decompression bombs.
const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMetadata {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

/// Optional metadata recorded when packing.
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    pub version: Option<String>,
    pub exported_from: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A packed unit held in memory.
#[derive(Debug, Clone)]
pub struct Bundle {
    metadata: BundleMetadata,
    bytes: Vec<u8>,
}

impl Bundle {
    /// Package the unit at `unit_path` under `name`.
    pub fn pack(unit_path: &Path, name: &str, options: &PackOptions) -> Result<Self> {
        let files = collect_unit_files(unit_path)?;
        let mut hasher = ContentHasher::new();
        let mut payload = Vec::with_capacity(files.len());
        for file in &files {
            let data = fs::read(&file.abs)?;
            hasher.update(&file.rel, &data);
            payload.push((file.rel.clone(), data, is_executable(&file.abs)));
        }

        let metadata = BundleMetadata {
            schema_version: SCHEMA_VERSION.to_string(),
            name: name.to_string(),
            created_at: options.created_at.unwrap_or_else(Utc::now),
            content_hash: hasher.finish(),
            version: options.version.clone(),
            exported_from: options.exported_from.clone(),
            notes: options.notes.clone(),
            files: files.iter().map(|f| f.rel.clone()).collect(),
        };

        let metadata_json = serde_json::to_vec_pretty(&metadata)?;
        let checksums = render_checksums(
            payload
                .iter()
                .map(|(rel, data, _)| (rel.as_str(), data.as_slice())),
        );

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        append_entry(&mut builder, METADATA_FILE, &metadata_json, false)?;
        append_entry(&mut builder, CHECKSUM_FILE, checksums.as_bytes(), false)?;
        for (rel, data, executable) in &payload {
            append_entry(&mut builder, &format!("{FILES_PREFIX}{rel}"), data, *executable)?;
        }
        let encoder = builder.into_inner()?;
        let bytes = encoder.finish()?;

        debug!(
            unit = %name,
            files = payload.len(),
            bytes = bytes.len(),
            hash = %metadata.content_hash,
            "packed unit"
        );
        Ok(Self { metadata, bytes })
    }

    /// Parse an archive, reading its metadata. Integrity is not checked; see [`Bundle::verify`].
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let contents = ArchiveContents::read(&bytes)?;
        let raw = contents
            .metadata
            .ok_or_else(|| SubstrateError::InvalidBundle(format!("missing {METADATA_FILE}")))?;
        let metadata: BundleMetadata = serde_json::from_slice(&raw).map_err(|err| {
            SubstrateError::InvalidBundle(format!("parse {METADATA_FILE}: {err}"))
        })?;
        Ok(Self { metadata, bytes })
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(bytes)
    }

    /// Write the archive to `path`, returning its digest.
    pub fn write_to(&self, path: &Path) -> Result<String> {
        crate::utils::fs::write_atomic(path, &self.bytes)?;
        Ok(self.archive_digest())
    }

    #[must_use]
    pub const fn metadata(&self) -> &BundleMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn content_hash(&self) -> &str {
        &self.metadata.content_hash
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SHA-256 of the compressed archive itself.
    #[must_use]
    pub fn archive_digest(&self) -> String {
        hash_bytes(&self.bytes)
    }

    /// Recompute the content hash from the archived files and compare it with
    /// the metadata and the checksum record.
    pub fn verify(&self) -> Result<()> {
        let contents = ArchiveContents::read(&self.bytes)?;
        contents.verify(&self.metadata)
    }

    /// Verify, then extract the unit's files into `target`.
    pub fn unpack(&self, target: &Path) -> Result<PathBuf> {
        let contents = ArchiveContents::read(&self.bytes)?;
        contents.verify(&self.metadata)?;

        fs::create_dir_all(target)?;
        for (rel, file) in &contents.files {
            let dest = target.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&dest, &file.data)?;
            set_mode(&dest, file.mode)?;
        }
        debug!(
            unit = %self.metadata.name,
            files = contents.files.len(),
            target = %target.display(),
            "unpacked bundle"
        );
        Ok(target.to_path_buf())
    }
}

/// Outcome of validating a bundle file without failing on the first problem.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub path: PathBuf,
    pub valid: bool,
    pub name: Option<String>,
    pub content_hash: Option<String>,
    pub file_count: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Inspect the archive at `path` and report every problem found.
#[must_use]
pub fn validate_bundle(path: &Path) -> ValidationReport {
    let mut report = ValidationReport {
        path: path.to_path_buf(),
        ..ValidationReport::default()
    };

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            report.errors.push(format!("read {}: {err}", path.display()));
            return report;
        }
    };
    let contents = match ArchiveContents::read(&bytes) {
        Ok(contents) => contents,
        Err(err) => {
            report.errors.push(err.to_string());
            return report;
        }
    };
    report.file_count = contents.files.len();

    let Some(raw) = contents.metadata.as_deref() else {
        report.errors.push(format!("missing {METADATA_FILE}"));
        return report;
    };
    let value: serde_json::Value = match serde_json::from_slice(raw) {
        Ok(value) => value,
        Err(err) => {
            report.errors.push(format!("parse {METADATA_FILE}: {err}"));
            return report;
        }
    };
    report.name = value.get("name").and_then(|v| v.as_str()).map(str::to_string);
    if report.name.is_none() {
        report.errors.push("metadata has no name".to_string());
    }
    let schema = value
        .get("schema_version")
        .and_then(|v| v.as_str())
        .unwrap_or(SCHEMA_VERSION);
    if schema != SCHEMA_VERSION {
        report
            .warnings
            .push(format!("schema version {schema} (expected {SCHEMA_VERSION})"));
    }
    if !contents.files.contains_key(DESCRIPTOR_FILE) {
        report.warnings.push(format!("no {DESCRIPTOR_FILE} in bundle"));
    }

    match serde_json::from_value::<BundleMetadata>(value) {
        Ok(metadata) => {
            report.content_hash = Some(metadata.content_hash.clone());
            if let Err(err) = contents.verify(&metadata) {
                report.errors.push(err.to_string());
            }
        }
        Err(err) => report.errors.push(format!("metadata: {err}")),
    }

    report.valid = report.errors.is_empty();
    report
}

struct ArchivedFile {
    data: Vec<u8>,
    mode: u32,
}

/// Every entry of an archive, read into memory and path-checked.
struct ArchiveContents {
    metadata: Option<Vec<u8>>,
    checksums: Option<String>,
    files: BTreeMap<String, ArchivedFile>,
}

impl ArchiveContents {
    fn read(bytes: &[u8]) -> Result<Self> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        let mut contents = Self {
            metadata: None,
            checksums: None,
            files: BTreeMap::new(),
        };

        let entries = archive
            .entries()
            .map_err(|err| SubstrateError::InvalidBundle(format!("read archive: {err}")))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|err| SubstrateError::InvalidBundle(format!("read entry: {err}")))?;
            let path = entry
                .path()
                .map_err(|err| SubstrateError::InvalidBundle(format!("entry path: {err}")))?
                .into_owned();
            ensure_relative(&path)?;
            let entry_type = entry.header().entry_type();
            if entry_type.is_dir() {
                continue;
            }
            if !entry_type.is_file() {
                return Err(SubstrateError::InvalidBundle(format!(
                    "unsupported entry type for {}",
                    path.display()
                )));
            }
            let size = entry.header().size().unwrap_or(0);
            if size > MAX_ENTRY_BYTES {
                return Err(SubstrateError::InvalidBundle(format!(
                    "entry {} exceeds {MAX_ENTRY_BYTES} bytes",
                    path.display()
                )));
            }
            let mode = entry.header().mode().unwrap_or(0o644);
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;

            let name = slash_path(&path)?;
            if name == METADATA_FILE {
                contents.metadata = Some(data);
            } else if name == CHECKSUM_FILE {
                contents.checksums = Some(String::from_utf8(data).map_err(|_| {
                    SubstrateError::InvalidBundle(format!("{CHECKSUM_FILE} is not UTF-8"))
                })?);
            } else if let Some(rel) = name.strip_prefix(FILES_PREFIX) {
                contents.files.insert(rel.to_string(), ArchivedFile { data, mode });
            } else {
                return Err(SubstrateError::InvalidBundle(format!(
                    "unexpected entry {name}"
                )));
            }
        }
        Ok(contents)
    }

    fn verify(&self, metadata: &BundleMetadata) -> Result<()> {
        let mut hasher = ContentHasher::new();
        for (rel, file) in &self.files {
            hasher.update(rel, &file.data);
        }
        let actual = hasher.finish();
        if actual != metadata.content_hash {
            return Err(SubstrateError::Integrity {
                unit: metadata.name.clone(),
                expected: metadata.content_hash.clone(),
                actual,
            });
        }

        let recorded = self
            .checksums
            .as_deref()
            .ok_or_else(|| SubstrateError::InvalidBundle(format!("missing {CHECKSUM_FILE}")))?;
        let expected = render_checksums(
            self.files
                .iter()
                .map(|(rel, file)| (rel.as_str(), file.data.as_slice())),
        );
        if recorded != expected {
            let recorded_digest = recorded.lines().last().unwrap_or_default().to_string();
            let expected_digest = expected.lines().last().unwrap_or_default().to_string();
            return Err(SubstrateError::Integrity {
                unit: metadata.name.clone(),
                expected: recorded_digest,
                actual: expected_digest,
            });
        }
        Ok(())
    }
}

/// Render the checksum record for files given in sorted order.
fn render_checksums<'a>(files: impl Iterator<Item = (&'a str, &'a [u8])>) -> String {
    let mut out = String::new();
    for (rel, data) in files {
        out.push_str(&format!("{}  {FILES_PREFIX}{rel}\n", hash_bytes(data)));
    }
    let digest = hash_bytes(out.as_bytes());
    out.push_str(&format!("{digest}  *\n"));
    out
}

fn append_entry<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    data: &[u8],
    executable: bool,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(if executable { 0o755 } else { 0o644 });
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    builder.append_data(&mut header, path, data)?;
    Ok(())
}

fn ensure_relative(path: &Path) -> Result<()> {
    if path.is_absolute() {
        return Err(SubstrateError::InvalidBundle(format!(
            "bundle path must be relative: {}",
            path.display()
        )));
    }
    for comp in path.components() {
        if matches!(
            comp,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        ) {
            return Err(SubstrateError::InvalidBundle(format!(
                "bundle path contains invalid component: {}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn slash_path(path: &Path) -> Result<String> {
    let parts = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| {
            c.as_os_str().to_str().map(str::to_string).ok_or_else(|| {
                SubstrateError::InvalidBundle(format!("non UTF-8 entry: {}", path.display()))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if mode & 0o111 != 0 { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

//! # Package Indexer
//!
//! Turns a package archive into a stored [`Package`]. A `.nupkg` is a zip
//! archive with a `.nuspec` XML manifest at its root; the manifest supplies
//! the record, the archive itself becomes the stored content.

use crate::error::{AppError, AppResult, MirrorError};
use crate::package::{Package, PackageDependency, PackageType};
use crate::store::{AddOutcome, PackageStore};
use crate::tempstream::TempPackageFile;
use crate::translate::{parse_authors, parse_url};
use crate::types::{PackageVersion, VersionParseError};
use async_trait::async_trait;
use chrono::Utc;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Seek};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingResult {
    Success,
    InvalidPackage,
    PackageAlreadyExists,
}

impl fmt::Display for IndexingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexingResult::Success => "success",
            IndexingResult::InvalidPackage => "invalid_package",
            IndexingResult::PackageAlreadyExists => "package_already_exists",
        })
    }
}

#[async_trait]
pub trait PackageIndexer: Send + Sync {
    /// Validate and persist one package. Rejections are reported through
    /// [`IndexingResult`]; `Err` is reserved for storage failures and
    /// cancellation.
    async fn index(
        &self,
        package: &TempPackageFile,
        cancel: &CancellationToken,
    ) -> AppResult<IndexingResult>;
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("unreadable archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive has no .nuspec manifest at its root")]
    MissingManifest,

    #[error("I/O error reading manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed manifest XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("manifest is missing <{0}>")]
    MissingField(&'static str),

    #[error(transparent)]
    Version(#[from] VersionParseError),
}

/// Indexes `.nupkg` archives into a [`PackageStore`].
pub struct NupkgIndexer {
    store: Arc<dyn PackageStore>,
}

impl NupkgIndexer {
    pub fn new(store: Arc<dyn PackageStore>) -> Self {
        NupkgIndexer { store }
    }
}

#[async_trait]
impl PackageIndexer for NupkgIndexer {
    async fn index(
        &self,
        package: &TempPackageFile,
        cancel: &CancellationToken,
    ) -> AppResult<IndexingResult> {
        let reader = package.blocking_reader().await?;
        let parsed = tokio::task::spawn_blocking(move || read_package(reader))
            .await
            .map_err(|e| AppError::InternalError(format!("manifest reader panicked: {e}")))?;

        let record = match parsed {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, size = package.len(), "Rejecting invalid package");
                return Ok(IndexingResult::InvalidPackage);
            }
        };

        if cancel.is_cancelled() {
            return Err(MirrorError::Cancelled.into());
        }
        if self.store.exists(&record.id, &record.version).await? {
            return Ok(IndexingResult::PackageAlreadyExists);
        }

        let id = record.id.clone();
        let version = record.version.clone();
        let content = package.rewound().await?;
        let result = match self.store.add(record, content).await? {
            AddOutcome::Added => IndexingResult::Success,
            AddOutcome::AlreadyExists => IndexingResult::PackageAlreadyExists,
        };

        info!(package_id = %id, version = %version, result = %result, "Indexed package");
        Ok(result)
    }
}

/// Open a package archive and build its record from the manifest.
pub fn read_package<R: Read + Seek>(archive: R) -> Result<Package, ManifestError> {
    let mut zip = zip::ZipArchive::new(archive)?;

    let manifest_name = zip
        .file_names()
        .find(|name| !name.contains('/') && name.to_ascii_lowercase().ends_with(".nuspec"))
        .map(str::to_string)
        .ok_or(ManifestError::MissingManifest)?;

    let mut xml = String::new();
    zip.by_name(&manifest_name)?.read_to_string(&mut xml)?;

    let mut package = parse_nuspec(&xml)?;
    if let Some(readme) = package_readme(&xml)? {
        let wanted = readme.replace('\\', "/").to_ascii_lowercase();
        package.has_readme = zip
            .file_names()
            .any(|name| name.to_ascii_lowercase() == wanted);
    }
    Ok(package)
}

fn package_readme(xml: &str) -> Result<Option<String>, ManifestError> {
    Ok(NuspecReader::read(xml)?.fields.remove("readme"))
}

/// Build a record from a `.nuspec` document.
pub fn parse_nuspec(xml: &str) -> Result<Package, ManifestError> {
    let mut nuspec = NuspecReader::read(xml)?;
    let mut field = |name: &str| nuspec.fields.remove(name).filter(|v| !v.is_empty());

    let id = field("id").ok_or(ManifestError::MissingField("id"))?;
    let version: PackageVersion = field("version")
        .ok_or(ManifestError::MissingField("version"))?
        .parse()?;

    let mut package = Package::new(id, version);
    package.authors = parse_authors(field("authors").as_deref());
    package.description = field("description");
    package.summary = field("summary");
    package.title = field("title");
    package.language = field("language");
    package.license_url = parse_url(field("licenseUrl").as_deref());
    package.icon_url = parse_url(field("iconUrl").as_deref());
    package.project_url = parse_url(field("projectUrl").as_deref());
    package.require_license_acceptance = field("requireLicenseAcceptance")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    package.tags = field("tags")
        .map(|t| t.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    package.published = Utc::now();
    package.min_client_version = nuspec.min_client_version;
    package.repository_url = nuspec.repository_url;
    package.repository_type = nuspec.repository_type;
    package.package_types = nuspec.package_types;
    package.dependencies = nuspec.dependencies;
    Ok(package)
}

#[derive(Debug, Default)]
struct NuspecReader {
    // Text of the direct children of <metadata>, by local name.
    fields: HashMap<String, String>,
    min_client_version: Option<String>,
    repository_url: Option<String>,
    repository_type: Option<String>,
    package_types: Vec<PackageType>,
    dependencies: Vec<PackageDependency>,
    // Framework of the open <group>, and whether it listed anything yet.
    group: Option<(Option<String>, bool)>,
}

fn attr(element: &BytesStart<'_>, name: &str) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name.as_bytes())
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl NuspecReader {
    fn read(xml: &str) -> Result<Self, ManifestError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut state = NuspecReader::default();
        let mut path: Vec<String> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    state.element(&name, &e, &path);
                    path.push(name);
                }
                Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    state.element(&name, &e, &path);
                    state.close(&name);
                }
                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    state.close(&name);
                    path.pop();
                }
                Event::Text(t) => state.text(&path, t.unescape()?.trim()),
                Event::CData(c) => state.text(&path, String::from_utf8_lossy(&c).trim()),
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(state)
    }

    fn element(&mut self, name: &str, e: &BytesStart<'_>, path: &[String]) {
        let parent = path.last().map(String::as_str);
        match (parent, name) {
            (Some("package"), "metadata") => {
                self.min_client_version = attr(e, "minClientVersion");
            }
            (Some("metadata"), "repository") => {
                self.repository_url = attr(e, "url");
                self.repository_type = attr(e, "type");
            }
            (Some("packageTypes"), "packageType") => {
                if let Some(type_name) = attr(e, "name") {
                    self.package_types.push(PackageType {
                        name: type_name,
                        version: attr(e, "version"),
                    });
                }
            }
            (Some("dependencies"), "group") => {
                self.group = Some((attr(e, "targetFramework"), false));
            }
            (Some("group") | Some("dependencies"), "dependency") => {
                let target_framework = match &mut self.group {
                    Some((framework, listed)) => {
                        *listed = true;
                        framework.clone()
                    }
                    None => None,
                };
                self.dependencies.push(PackageDependency {
                    id: attr(e, "id"),
                    version_range: attr(e, "version"),
                    target_framework,
                });
            }
            _ => {}
        }
    }

    fn close(&mut self, name: &str) {
        if name == "group" {
            if let Some((framework, false)) = self.group.take() {
                self.dependencies.push(PackageDependency::empty_group(framework));
            }
        }
    }

    fn text(&mut self, path: &[String], text: &str) {
        if let [.., parent, field] = path {
            if parent == "metadata" && !text.is_empty() {
                self.fields.insert(field.clone(), text.to_string());
            }
        }
    }
}

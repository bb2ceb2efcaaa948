//! # Local Package Store
//!
//! The single source of truth for "does this package exist locally".
//!
//! [`FilePackageStore`] lays packages out under the data directory:
//!
//! ```text
//! {data_dir}/packages/{id}/{version}/package.json      record
//! {data_dir}/packages/{id}/{version}/{id}.{version}.nupkg
//! ```
//!
//! where `{id}` and `{version}` are lowercased and the version normalized.
//! Records are loaded into memory on open; reads are served from the index.

use crate::error::{AppError, AppResult};
use crate::package::Package;
use crate::search::{
    AutocompleteResponse, DependentResult, DependentsResponse, SearchRequest, SearchResponse,
    SearchResult, SearchResultPackageType, SearchResultVersion,
};
use crate::types::{PackageId, PackageVersion};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const RECORD_FILE: &str = "package.json";

/// Result of adding a package to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyExists,
}

#[async_trait]
pub trait PackageStore: Send + Sync {
    async fn exists(&self, id: &PackageId, version: &PackageVersion) -> AppResult<bool>;

    /// Every version of `id`, oldest first.
    async fn find_all(&self, id: &PackageId, include_unlisted: bool) -> AppResult<Vec<Package>>;

    /// Persist a record together with its package content.
    async fn add(&self, package: Package, content: File) -> AppResult<AddOutcome>;

    async fn open_content(
        &self,
        id: &PackageId,
        version: &PackageVersion,
    ) -> AppResult<Option<File>>;
}

/// Local full-text search.
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> AppResult<SearchResponse>;

    /// Ids containing `request.query`, prefix matches first.
    async fn autocomplete(&self, request: &SearchRequest) -> AppResult<AutocompleteResponse>;

    /// Packages with a listed version that depends on `id`.
    async fn find_dependents(&self, id: &PackageId, take: usize) -> AppResult<DependentsResponse>;
}

pub struct FilePackageStore {
    root: PathBuf,
    // lowercased id -> version -> record
    index: RwLock<HashMap<String, BTreeMap<PackageVersion, Package>>>,
}

impl FilePackageStore {
    /// Open (or create) the store under `data_dir` and load every record.
    pub async fn open(data_dir: impl AsRef<Path>) -> AppResult<Self> {
        let root = data_dir.as_ref().join("packages");
        fs::create_dir_all(&root).await?;

        let mut index: HashMap<String, BTreeMap<PackageVersion, Package>> = HashMap::new();
        let mut loaded = 0usize;

        let mut ids = fs::read_dir(&root).await?;
        while let Some(id_dir) = ids.next_entry().await? {
            if !id_dir.file_type().await?.is_dir() {
                continue;
            }
            let mut versions = fs::read_dir(id_dir.path()).await?;
            while let Some(version_dir) = versions.next_entry().await? {
                let record_path = version_dir.path().join(RECORD_FILE);
                match read_record(&record_path).await {
                    Ok(Some(package)) => {
                        index
                            .entry(package.id.lower())
                            .or_default()
                            .insert(package.version.clone(), package);
                        loaded += 1;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(path = %record_path.display(), error = %e, "Skipping unreadable package record");
                    }
                }
            }
        }

        info!(root = %root.display(), packages = loaded, "Opened local package store");
        Ok(FilePackageStore {
            root,
            index: RwLock::new(index),
        })
    }

    fn version_dir(&self, id: &PackageId, version: &PackageVersion) -> PathBuf {
        self.root
            .join(id.lower())
            .join(version.to_normalized().to_ascii_lowercase())
    }

    fn content_file_name(id: &PackageId, version: &PackageVersion) -> String {
        format!(
            "{}.{}.nupkg",
            id.lower(),
            version.to_normalized().to_ascii_lowercase()
        )
    }

    pub async fn package_count(&self) -> usize {
        self.index.read().await.values().map(BTreeMap::len).sum()
    }
}

async fn read_record(path: &Path) -> AppResult<Option<Package>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl PackageStore for FilePackageStore {
    async fn exists(&self, id: &PackageId, version: &PackageVersion) -> AppResult<bool> {
        Ok(self
            .index
            .read()
            .await
            .get(&id.lower())
            .is_some_and(|versions| versions.contains_key(version)))
    }

    async fn find_all(&self, id: &PackageId, include_unlisted: bool) -> AppResult<Vec<Package>> {
        Ok(self
            .index
            .read()
            .await
            .get(&id.lower())
            .map(|versions| {
                versions
                    .values()
                    .filter(|p| include_unlisted || p.listed)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add(&self, package: Package, mut content: File) -> AppResult<AddOutcome> {
        // Held across the write so two adds of one key cannot interleave.
        let mut index = self.index.write().await;
        let key = package.id.lower();
        if index
            .get(&key)
            .is_some_and(|versions| versions.contains_key(&package.version))
        {
            debug!(package_id = %package.id, version = %package.version, "Package already stored");
            return Ok(AddOutcome::AlreadyExists);
        }

        let dir = self.version_dir(&package.id, &package.version);
        fs::create_dir_all(&dir).await?;

        let content_path = dir.join(Self::content_file_name(&package.id, &package.version));
        let mut target = File::create(&content_path).await?;
        tokio::io::copy(&mut content, &mut target).await?;
        target.flush().await?;

        // Record last: a directory without package.json is ignored on load.
        let record = serde_json::to_vec_pretty(&package)?;
        let tmp_record = dir.join(format!("{RECORD_FILE}.tmp"));
        fs::write(&tmp_record, record).await?;
        fs::rename(&tmp_record, dir.join(RECORD_FILE)).await?;

        info!(package_id = %package.id, version = %package.version, "Stored package");
        index
            .entry(key)
            .or_default()
            .insert(package.version.clone(), package);
        Ok(AddOutcome::Added)
    }

    async fn open_content(
        &self,
        id: &PackageId,
        version: &PackageVersion,
    ) -> AppResult<Option<File>> {
        if !self.exists(id, version).await? {
            return Ok(None);
        }
        let path = self
            .version_dir(id, version)
            .join(Self::content_file_name(id, version));
        match File::open(&path).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::InternalError(
                format!("package record without content: {}", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SearchService for FilePackageStore {
    async fn search(&self, request: &SearchRequest) -> AppResult<SearchResponse> {
        let index = self.index.read().await;
        let results = search_index(index.values(), request);
        Ok(SearchResponse::from_results(results, None))
    }

    async fn autocomplete(&self, request: &SearchRequest) -> AppResult<AutocompleteResponse> {
        let index = self.index.read().await;
        Ok(AutocompleteResponse::from_ids(autocomplete_index(
            index.values(),
            request,
        )))
    }

    async fn find_dependents(&self, id: &PackageId, take: usize) -> AppResult<DependentsResponse> {
        let index = self.index.read().await;
        Ok(DependentsResponse::from_results(dependents_index(
            index.values(),
            id,
            take,
        )))
    }
}

fn matches_query(package: &Package, terms: &[String]) -> bool {
    if terms.is_empty() {
        return true;
    }
    let haystack = [
        Some(package.id.as_str()),
        package.title.as_deref(),
        package.description.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::to_lowercase)
    .chain(package.tags.iter().map(|t| t.to_lowercase()))
    .collect::<Vec<_>>();

    terms
        .iter()
        .all(|term| haystack.iter().any(|field| field.contains(term.as_str())))
}

fn matches_filters(package: &Package, request: &SearchRequest) -> bool {
    package.listed
        && (request.include_prerelease || !package.is_prerelease())
        && (request.include_semver2 || !package.is_semver2())
        && request
            .package_type
            .as_deref()
            .map_or(true, |t| package.has_package_type(t))
        && request.framework.as_deref().map_or(true, |f| {
            package.dependencies.is_empty()
                || package.dependencies.iter().any(|d| {
                    d.target_framework
                        .as_deref()
                        .is_some_and(|tf| tf.eq_ignore_ascii_case(f))
                })
        })
}

/// One result per matching id, represented by its latest matching version
/// and ordered by id.
pub(crate) fn search_index<'a, I>(packages: I, request: &SearchRequest) -> Vec<SearchResult>
where
    I: Iterator<Item = &'a BTreeMap<PackageVersion, Package>>,
{
    let terms: Vec<String> = request
        .query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();

    let mut hits: Vec<SearchResult> = packages
        .filter_map(|versions| {
            let matching: Vec<&Package> = versions
                .values()
                .filter(|p| matches_filters(p, request))
                .collect();
            let latest = *matching.last()?;
            if !matching.iter().any(|p| matches_query(p, &terms)) {
                return None;
            }
            Some(to_search_result(latest, &matching))
        })
        .collect();

    hits.sort_by(|a, b| a.package_id.cmp(&b.package_id));
    hits.into_iter()
        .skip(request.skip)
        .take(request.take)
        .collect()
}

pub(crate) fn autocomplete_index<'a, I>(packages: I, request: &SearchRequest) -> Vec<String>
where
    I: Iterator<Item = &'a BTreeMap<PackageVersion, Package>>,
{
    let query = request.query.trim().to_lowercase();

    let mut ids: Vec<(bool, &PackageId)> = packages
        .filter_map(|versions| {
            let latest = versions
                .values()
                .rev()
                .find(|p| matches_filters(p, request))?;
            let lower = latest.id.lower();
            lower
                .contains(&query)
                .then(|| (!lower.starts_with(&query), &latest.id))
        })
        .collect();

    ids.sort();
    ids.into_iter()
        .skip(request.skip)
        .take(request.take)
        .map(|(_, id)| id.to_string())
        .collect()
}

/// Most downloaded dependents first, then by id.
pub(crate) fn dependents_index<'a, I>(
    packages: I,
    dependency: &PackageId,
    take: usize,
) -> Vec<DependentResult>
where
    I: Iterator<Item = &'a BTreeMap<PackageVersion, Package>>,
{
    let depends_on = |package: &Package| {
        package.dependencies.iter().any(|d| {
            d.id
                .as_deref()
                .is_some_and(|id| id.eq_ignore_ascii_case(dependency.as_str()))
        })
    };

    let mut hits: Vec<DependentResult> = packages
        .filter_map(|versions| {
            let listed: Vec<&Package> = versions.values().filter(|p| p.listed).collect();
            if !listed.iter().any(|p| depends_on(p)) {
                return None;
            }
            let latest = *listed.last()?;
            Some(DependentResult {
                package_id: latest.id.clone(),
                description: latest.description.clone(),
                total_downloads: listed.iter().map(|p| p.downloads).sum(),
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.total_downloads
            .cmp(&a.total_downloads)
            .then_with(|| a.package_id.cmp(&b.package_id))
    });
    hits.truncate(take);
    hits
}

fn to_search_result(latest: &Package, versions: &[&Package]) -> SearchResult {
    let mut result = SearchResult::new(latest.id.clone(), latest.version.to_full_string());
    result.description = latest.description.clone();
    result.authors = latest.authors.clone();
    result.icon_url = latest.icon_url.as_ref().map(|u| u.to_string());
    result.license_url = latest.license_url.as_ref().map(|u| u.to_string());
    result.project_url = latest.project_url.as_ref().map(|u| u.to_string());
    result.summary = latest.summary.clone();
    result.tags = latest.tags.clone();
    result.title = latest.title.clone();
    result.total_downloads = versions.iter().map(|p| p.downloads).sum();
    result.package_types = if latest.package_types.is_empty() {
        vec![SearchResultPackageType {
            name: "Dependency".to_string(),
        }]
    } else {
        latest
            .package_types
            .iter()
            .map(|t| SearchResultPackageType {
                name: t.name.clone(),
            })
            .collect()
    };
    result.versions = versions
        .iter()
        .map(|p| SearchResultVersion {
            registration_leaf_url: None,
            version: p.version.to_full_string(),
            downloads: p.downloads,
        })
        .collect();
    result
}

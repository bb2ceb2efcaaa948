//! # Mirror Coordinator
//!
//! Lookup-or-mirror orchestration between the upstream feed and the local
//! store. Upstream trouble never fails a request: lookups degrade to
//! `Ok(None)` and mirroring degrades to "nothing was added". Cancellation
//! is the only error a caller sees from [`Mirror::mirror`].

use crate::cancel::{ensure_active, OrCancelExt};
use crate::config::MirrorConfig;
use crate::error::{AppError, AppResult, MirrorError, MirrorResult};
use crate::indexer::{IndexingResult, PackageIndexer};
use crate::inflight::InflightMirrors;
use crate::package::Package;
use crate::search::{SearchContext, SearchRequest, SearchResponse};
use crate::store::PackageStore;
use crate::tempstream::TempPackageFile;
use crate::translate::to_package;
use crate::types::{PackageId, PackageVersion};
use crate::upstream::{NuGetClient, UpstreamFeed};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait Mirror: Send + Sync {
    /// Upstream versions of `id` merged with the local ones, ascending.
    /// `None` when upstream has nothing to say.
    async fn find_versions_or_none(
        &self,
        id: &PackageId,
        cancel: &CancellationToken,
    ) -> MirrorResult<Option<Vec<PackageVersion>>>;

    /// Upstream metadata for every version of `id`, translated to records.
    async fn find_packages_or_none(
        &self,
        id: &PackageId,
        cancel: &CancellationToken,
    ) -> MirrorResult<Option<Vec<Package>>>;

    /// Make sure `id`@`version` is in the local store if upstream has it.
    async fn mirror(
        &self,
        id: &PackageId,
        version: &PackageVersion,
        cancel: &CancellationToken,
    ) -> MirrorResult<()>;

    async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> MirrorResult<Option<SearchResponse>>;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Callers that waited on another caller's download instead of
    /// starting their own.
    fn joined_mirrors(&self) -> u64 {
        0
    }
}

/// Pull-through mirror backed by an upstream feed.
pub struct MirrorService {
    upstream: Arc<dyn UpstreamFeed>,
    store: Arc<dyn PackageStore>,
    indexer: Arc<dyn PackageIndexer>,
    inflight: InflightMirrors,
    /// `@base` of search responses: this server's registration resource.
    registration_base: String,
}

impl MirrorService {
    pub fn new(
        upstream: Arc<dyn UpstreamFeed>,
        store: Arc<dyn PackageStore>,
        indexer: Arc<dyn PackageIndexer>,
        registration_base: impl Into<String>,
    ) -> Self {
        Self {
            upstream,
            store,
            indexer,
            inflight: InflightMirrors::new(),
            registration_base: registration_base.into(),
        }
    }

    async fn exists_locally(
        &self,
        id: &PackageId,
        version: &PackageVersion,
        cancel: &CancellationToken,
    ) -> MirrorResult<bool> {
        match self.store.exists(id, version).or_cancel(cancel).await? {
            Ok(exists) => Ok(exists),
            Err(e) => {
                error!(package_id = %id, version = %version, error = %e, "Failed to check local store");
                Ok(false)
            }
        }
    }

    async fn mirror_once(
        &self,
        id: &PackageId,
        version: &PackageVersion,
        cancel: &CancellationToken,
    ) -> MirrorResult<()> {
        // A previous leader may have finished between our check and now.
        if self.exists_locally(id, version, cancel).await? {
            return Ok(());
        }

        info!(package_id = %id, version = %version, "Package does not exist locally, mirroring from upstream");

        match self.download_and_index(id, version, cancel).await {
            Ok(IndexingResult::Success) => {
                info!(package_id = %id, version = %version, "Finished mirroring package");
            }
            Ok(result) => {
                warn!(package_id = %id, version = %version, result = %result, "Mirrored package was not indexed");
            }
            Err(AppError::Mirror(MirrorError::Cancelled)) => return Err(MirrorError::Cancelled),
            Err(AppError::Mirror(e)) if e.is_absent() => {
                warn!(package_id = %id, version = %version, error = %e, "Failed to download package from upstream");
            }
            Err(e) => {
                error!(package_id = %id, version = %version, error = %e, "Failed to mirror package");
            }
        }
        Ok(())
    }

    async fn download_and_index(
        &self,
        id: &PackageId,
        version: &PackageVersion,
        cancel: &CancellationToken,
    ) -> AppResult<IndexingResult> {
        let mut stream = self.upstream.download(id, version).or_cancel(cancel).await??;
        let package = TempPackageFile::materialize(&mut stream)
            .or_cancel(cancel)
            .await??;
        drop(stream);

        debug!(package_id = %id, version = %version, size = package.len(), "Downloaded package, indexing");
        self.indexer.index(&package, cancel).or_cancel(cancel).await?
    }
}

#[async_trait]
impl Mirror for MirrorService {
    async fn find_versions_or_none(
        &self,
        id: &PackageId,
        cancel: &CancellationToken,
    ) -> MirrorResult<Option<Vec<PackageVersion>>> {
        ensure_active(cancel)?;

        let upstream = match self.upstream.list_versions(id, true).or_cancel(cancel).await? {
            Ok(versions) if versions.is_empty() => return Ok(None),
            Ok(versions) => versions,
            Err(MirrorError::Cancelled) => return Err(MirrorError::Cancelled),
            Err(e) if e.is_absent() => {
                warn!(package_id = %id, error = %e, "Unable to mirror package's upstream versions");
                return Ok(None);
            }
            Err(e) => {
                error!(package_id = %id, error = %e, "Unable to mirror package's upstream versions");
                return Ok(None);
            }
        };

        let local = match self.store.find_all(id, true).or_cancel(cancel).await? {
            Ok(packages) => packages.into_iter().map(|p| p.version).collect(),
            Err(e) => {
                error!(package_id = %id, error = %e, "Failed to read local versions");
                Vec::new()
            }
        };

        let mut versions: Vec<PackageVersion> = local.into_iter().chain(upstream).collect();
        versions.sort();
        versions.dedup();
        Ok(Some(versions))
    }

    async fn find_packages_or_none(
        &self,
        id: &PackageId,
        cancel: &CancellationToken,
    ) -> MirrorResult<Option<Vec<Package>>> {
        ensure_active(cancel)?;

        let items = match self.upstream.get_metadata(id).or_cancel(cancel).await? {
            Ok(items) if items.is_empty() => return Ok(None),
            Ok(items) => items,
            Err(MirrorError::Cancelled) => return Err(MirrorError::Cancelled),
            Err(e) if e.is_absent() => {
                warn!(package_id = %id, error = %e, "Unable to mirror package's upstream metadata");
                return Ok(None);
            }
            Err(e) => {
                error!(package_id = %id, error = %e, "Unable to mirror package's upstream metadata");
                return Ok(None);
            }
        };

        let mut packages = Vec::with_capacity(items.len());
        let mut first_failure = None;
        for item in &items {
            match to_package(item) {
                Ok(package) => packages.push(package),
                Err(e) => {
                    warn!(package_id = %id, version = %item.version, error = %e, "Skipping malformed upstream metadata");
                    first_failure.get_or_insert(e);
                }
            }
        }

        match first_failure {
            Some(e) if packages.is_empty() => Err(MirrorError::Malformed(e.to_string())),
            _ => Ok(Some(packages)),
        }
    }

    async fn mirror(
        &self,
        id: &PackageId,
        version: &PackageVersion,
        cancel: &CancellationToken,
    ) -> MirrorResult<()> {
        ensure_active(cancel)?;

        if self.exists_locally(id, version, cancel).await? {
            return Ok(());
        }

        self.inflight
            .run(id, version, cancel, || self.mirror_once(id, version, cancel))
            .await
    }

    async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> MirrorResult<Option<SearchResponse>> {
        ensure_active(cancel)?;

        let data = self.upstream.search(request).or_cancel(cancel).await??;
        Ok(Some(SearchResponse::from_results(
            data,
            Some(SearchContext::with_base(self.registration_base.clone())),
        )))
    }

    fn joined_mirrors(&self) -> u64 {
        self.inflight.joined_count()
    }
}

/// Stand-in used when mirroring is disabled: reports nothing upstream and
/// never touches the network.
pub struct NullMirrorService;

#[async_trait]
impl Mirror for NullMirrorService {
    async fn find_versions_or_none(
        &self,
        _id: &PackageId,
        _cancel: &CancellationToken,
    ) -> MirrorResult<Option<Vec<PackageVersion>>> {
        Ok(None)
    }

    async fn find_packages_or_none(
        &self,
        _id: &PackageId,
        _cancel: &CancellationToken,
    ) -> MirrorResult<Option<Vec<Package>>> {
        Ok(None)
    }

    async fn mirror(
        &self,
        _id: &PackageId,
        _version: &PackageVersion,
        _cancel: &CancellationToken,
    ) -> MirrorResult<()> {
        Ok(())
    }

    async fn search(
        &self,
        _request: &SearchRequest,
        _cancel: &CancellationToken,
    ) -> MirrorResult<Option<SearchResponse>> {
        Ok(None)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Pick the mirror implementation for `config`.
///
/// # Errors
///
/// Fails only when mirroring is enabled and the upstream HTTP client cannot
/// be built.
pub fn build_mirror(
    config: &MirrorConfig,
    store: Arc<dyn PackageStore>,
    indexer: Arc<dyn PackageIndexer>,
    registration_base: impl Into<String>,
) -> anyhow::Result<Arc<dyn Mirror>> {
    if !config.enabled {
        info!("Upstream mirroring disabled");
        return Ok(Arc::new(NullMirrorService));
    }

    let upstream = NuGetClient::new(config.upstream_config())?;
    info!(package_source = %upstream.package_source(), "Mirroring from upstream feed");
    Ok(Arc::new(MirrorService::new(
        Arc::new(upstream),
        store,
        indexer,
        registration_base,
    )))
}

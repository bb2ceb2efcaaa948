//! Scripted collaborators for unit tests.

use crate::error::{AppResult, MirrorError, MirrorResult};
use crate::indexer::{IndexingResult, NupkgIndexer, PackageIndexer};
use crate::package::Package;
use crate::search::{
    AutocompleteResponse, DependentsResponse, SearchRequest, SearchResponse, SearchResult,
};
use crate::store::{
    autocomplete_index, dependents_index, search_index, AddOutcome, PackageStore, SearchService,
};
use crate::tempstream::TempPackageFile;
use crate::types::{PackageId, PackageVersion};
use crate::upstream::{PackageMetadata, PackageStream, UpstreamFeed};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// A minimal `.nuspec` document.
pub fn nuspec(id: &str, version: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
  <metadata>
    <id>{id}</id>
    <version>{version}</version>
    <authors>Test Author</authors>
    <description>Test package {id}</description>
  </metadata>
</package>"#
    )
}

/// A `.nupkg` archive holding `nuspec` plus `extra` entries.
pub fn nupkg_bytes(nuspec: &str, extra: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();

    zip.start_file("package.nuspec", options).unwrap();
    zip.write_all(nuspec.as_bytes()).unwrap();
    for (name, bytes) in extra {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Upstream feed with canned answers. Unknown ids are `NotFound`.
#[derive(Default)]
pub struct FakeUpstream {
    versions: HashMap<PackageId, Vec<PackageVersion>>,
    metadata: HashMap<PackageId, Vec<PackageMetadata>>,
    packages: HashMap<(PackageId, PackageVersion), Vec<u8>>,
    search: Vec<SearchResult>,
    failure: Option<MirrorError>,
    download_delay: Option<Duration>,
    calls: AtomicUsize,
    downloads: AtomicUsize,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_versions(mut self, id: &str, versions: &[&str]) -> Self {
        self.versions.insert(
            PackageId::from(id),
            versions.iter().map(|v| v.parse().unwrap()).collect(),
        );
        self
    }

    pub fn with_metadata(mut self, id: &str, items: Vec<PackageMetadata>) -> Self {
        self.metadata.insert(PackageId::from(id), items);
        self
    }

    pub fn with_package(mut self, id: &str, version: &str, bytes: Vec<u8>) -> Self {
        self.packages
            .insert((PackageId::from(id), version.parse().unwrap()), bytes);
        self
    }

    pub fn with_search(mut self, results: Vec<SearchResult>) -> Self {
        self.search = results;
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = Some(delay);
        self
    }

    /// Every call fails with `error`.
    pub fn failing(mut self, error: MirrorError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn enter(&self) -> MirrorResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl UpstreamFeed for FakeUpstream {
    async fn list_versions(
        &self,
        id: &PackageId,
        _include_unlisted: bool,
    ) -> MirrorResult<Vec<PackageVersion>> {
        self.enter()?;
        self.versions
            .get(id)
            .cloned()
            .ok_or_else(|| MirrorError::NotFound(id.to_string()))
    }

    async fn get_metadata(&self, id: &PackageId) -> MirrorResult<Vec<PackageMetadata>> {
        self.enter()?;
        self.metadata
            .get(id)
            .cloned()
            .ok_or_else(|| MirrorError::NotFound(id.to_string()))
    }

    async fn search(&self, _request: &SearchRequest) -> MirrorResult<Vec<SearchResult>> {
        self.enter()?;
        Ok(self.search.clone())
    }

    async fn download(
        &self,
        id: &PackageId,
        version: &PackageVersion,
    ) -> MirrorResult<PackageStream> {
        self.enter()?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.download_delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = self
            .packages
            .get(&(id.clone(), version.clone()))
            .cloned()
            .ok_or_else(|| MirrorError::NotFound(format!("{id} {version}")))?;
        Ok(Box::pin(Cursor::new(bytes)))
    }
}

type MemoryIndex = HashMap<String, BTreeMap<PackageVersion, (Package, Vec<u8>)>>;

/// In-memory package store.
#[derive(Default)]
pub struct MemoryStore {
    packages: Mutex<MemoryIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record without content.
    pub fn insert(&self, package: Package) {
        self.packages
            .lock()
            .unwrap()
            .entry(package.id.lower())
            .or_default()
            .insert(package.version.clone(), (package, Vec::new()));
    }

    pub fn len(&self) -> usize {
        self.packages.lock().unwrap().values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl PackageStore for MemoryStore {
    async fn exists(&self, id: &PackageId, version: &PackageVersion) -> AppResult<bool> {
        Ok(self
            .packages
            .lock()
            .unwrap()
            .get(&id.lower())
            .is_some_and(|versions| versions.contains_key(version)))
    }

    async fn find_all(&self, id: &PackageId, include_unlisted: bool) -> AppResult<Vec<Package>> {
        Ok(self
            .packages
            .lock()
            .unwrap()
            .get(&id.lower())
            .map(|versions| {
                versions
                    .values()
                    .map(|(p, _)| p)
                    .filter(|p| include_unlisted || p.listed)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add(&self, package: Package, mut content: File) -> AppResult<AddOutcome> {
        let mut bytes = Vec::new();
        content.read_to_end(&mut bytes).await?;

        let mut packages = self.packages.lock().unwrap();
        let versions = packages.entry(package.id.lower()).or_default();
        if versions.contains_key(&package.version) {
            return Ok(AddOutcome::AlreadyExists);
        }
        versions.insert(package.version.clone(), (package, bytes));
        Ok(AddOutcome::Added)
    }

    async fn open_content(
        &self,
        id: &PackageId,
        version: &PackageVersion,
    ) -> AppResult<Option<File>> {
        let bytes = match self
            .packages
            .lock()
            .unwrap()
            .get(&id.lower())
            .and_then(|versions| versions.get(version))
        {
            Some((_, bytes)) => bytes.clone(),
            None => return Ok(None),
        };

        let mut file = tempfile::tempfile()?;
        file.write_all(&bytes)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Some(File::from_std(file)))
    }
}

impl MemoryStore {
    fn snapshot(&self) -> Vec<BTreeMap<PackageVersion, Package>> {
        self.packages
            .lock()
            .unwrap()
            .values()
            .map(|versions| {
                versions
                    .iter()
                    .map(|(v, (p, _))| (v.clone(), p.clone()))
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl SearchService for MemoryStore {
    async fn search(&self, request: &SearchRequest) -> AppResult<SearchResponse> {
        let by_id = self.snapshot();
        Ok(SearchResponse::from_results(
            search_index(by_id.iter(), request),
            None,
        ))
    }

    async fn autocomplete(&self, request: &SearchRequest) -> AppResult<AutocompleteResponse> {
        let by_id = self.snapshot();
        Ok(AutocompleteResponse::from_ids(autocomplete_index(
            by_id.iter(),
            request,
        )))
    }

    async fn find_dependents(&self, id: &PackageId, take: usize) -> AppResult<DependentsResponse> {
        let by_id = self.snapshot();
        Ok(DependentsResponse::from_results(dependents_index(
            by_id.iter(),
            id,
            take,
        )))
    }
}

/// The real `.nupkg` indexer, counting how often it is invoked.
pub struct CountingIndexer {
    inner: NupkgIndexer,
    calls: AtomicUsize,
}

impl CountingIndexer {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            inner: NupkgIndexer::new(store),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageIndexer for CountingIndexer {
    async fn index(
        &self,
        package: &TempPackageFile,
        cancel: &CancellationToken,
    ) -> AppResult<IndexingResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.index(package, cancel).await
    }
}

//! Common test utilities and helpers
//!
//! Shared setup for the integration tests: temporary data directories,
//! package archives, a scripted upstream feed on a `wiremock` server, and
//! an axum-test server over the real router.

#![allow(dead_code)]

use anyhow::Result;
use axum_test::TestServer;
use mirror_server::config::Config;
use mirror_server::indexer::{IndexingResult, NupkgIndexer, PackageIndexer};
use mirror_server::store::FilePackageStore;
use mirror_server::tempstream::TempPackageFile;
use mirror_server::{build_router, AppState};
use serde_json::json;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SERVER_ADDR: &str = "http://localhost:5000";

/// Test setup result
pub struct TestSetup {
    pub temp_dir: TempDir,
    pub app_state: Arc<AppState>,
}

/// A `.nupkg` archive for `id`@`version`.
pub fn nupkg(id: &str, version: &str) -> Vec<u8> {
    nupkg_depending_on(id, version, &[])
}

/// A `.nupkg` whose net6.0 group depends on each of `dependencies`.
pub fn nupkg_depending_on(id: &str, version: &str, dependencies: &[&str]) -> Vec<u8> {
    let group = if dependencies.is_empty() {
        r#"<group targetFramework="net6.0" />"#.to_string()
    } else {
        let entries: String = dependencies
            .iter()
            .map(|dep| format!(r#"<dependency id="{dep}" version="[1.0.0, )" />"#))
            .collect();
        format!(r#"<group targetFramework="net6.0">{entries}</group>"#)
    };
    let nuspec = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
  <metadata>
    <id>{id}</id>
    <version>{version}</version>
    <authors>Integration Tests</authors>
    <description>Package {id} for integration tests</description>
    <tags>testing</tags>
    <dependencies>
      {group}
    </dependencies>
  </metadata>
</package>"#
    );

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(format!("{id}.nuspec"), zip::write::FileOptions::default())
        .unwrap();
    zip.write_all(nuspec.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}

/// Index `.nupkg` archives into the store under `data_dir` before the
/// server opens it.
pub async fn seed_archives(data_dir: &Path, archives: &[Vec<u8>]) -> Result<()> {
    let store = Arc::new(FilePackageStore::open(data_dir).await?);
    let indexer = NupkgIndexer::new(store);

    for (n, bytes) in archives.iter().enumerate() {
        let mut source: &[u8] = bytes;
        let package = TempPackageFile::materialize(&mut source).await?;
        let result = indexer.index(&package, &CancellationToken::new()).await?;
        assert_eq!(result, IndexingResult::Success, "seeding archive #{n}");
    }
    Ok(())
}

/// Configuration mirroring from `upstream` (a service index URL), or with
/// mirroring disabled when `None`.
pub fn test_config(upstream: Option<String>) -> Config {
    let mut config = Config::default();
    match upstream {
        Some(source) => {
            config.mirror.package_source = source;
            config.mirror.timeout_secs = 5;
        }
        None => config.mirror.enabled = false,
    }
    config
}

/// Creates app state over a fresh data directory seeded with `packages`.
pub async fn create_test_setup(
    upstream: Option<String>,
    packages: &[(&str, &str)],
) -> Result<TestSetup> {
    let archives: Vec<Vec<u8>> = packages
        .iter()
        .map(|(id, version)| nupkg(id, version))
        .collect();
    create_setup_from_archives(upstream, &archives).await
}

/// Creates app state over a fresh data directory seeded with `archives`.
pub async fn create_setup_from_archives(
    upstream: Option<String>,
    archives: &[Vec<u8>],
) -> Result<TestSetup> {
    let temp_dir = TempDir::new()?;
    seed_archives(temp_dir.path(), archives).await?;

    let app_state = Arc::new(
        AppState::open(
            test_config(upstream),
            temp_dir.path().to_path_buf(),
            SERVER_ADDR.to_string(),
        )
        .await?,
    );

    Ok(TestSetup {
        temp_dir,
        app_state,
    })
}

pub async fn create_test_server(
    upstream: Option<String>,
    packages: &[(&str, &str)],
) -> (TestServer, TestSetup) {
    let setup = create_test_setup(upstream, packages)
        .await
        .expect("Failed to create test setup");
    serve(setup)
}

pub async fn create_server_from_archives(
    upstream: Option<String>,
    archives: &[Vec<u8>],
) -> (TestServer, TestSetup) {
    let setup = create_setup_from_archives(upstream, archives)
        .await
        .expect("Failed to create test setup");
    serve(setup)
}

fn serve(setup: TestSetup) -> (TestServer, TestSetup) {
    let server =
        TestServer::new(build_router(setup.app_state.clone())).expect("Failed to create test server");
    (server, setup)
}

/// Upstream feed on a mock server. Mounts the service index; individual
/// tests mount the resources they need.
pub struct FakeFeed {
    pub server: MockServer,
}

impl FakeFeed {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base = server.uri();
        Mock::given(method("GET"))
            .and(path("/v3/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "version": "3.0.0",
                "resources": [
                    { "@id": format!("{base}/flat/"), "@type": "PackageBaseAddress/3.0.0" },
                    { "@id": format!("{base}/reg/"), "@type": "RegistrationsBaseUrl/3.6.0" },
                    { "@id": format!("{base}/query"), "@type": "SearchQueryService" }
                ]
            })))
            .mount(&server)
            .await;
        FakeFeed { server }
    }

    pub fn service_index(&self) -> String {
        format!("{}/v3/index.json", self.server.uri())
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub async fn versions(&self, id: &str, versions: &[&str]) {
        Mock::given(method("GET"))
            .and(path(format!("/flat/{}/index.json", id.to_lowercase())))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "versions": versions })))
            .mount(&self.server)
            .await;
    }

    /// Serve a package archive, expecting exactly `expected_downloads` fetches.
    pub async fn package(&self, id: &str, version: &str, expected_downloads: u64) {
        let (lower_id, lower_version) = (id.to_lowercase(), version.to_lowercase());
        Mock::given(method("GET"))
            .and(path(format!(
                "/flat/{lower_id}/{lower_version}/{lower_id}.{lower_version}.nupkg"
            )))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(nupkg(id, version))
                    .set_delay(std::time::Duration::from_millis(50)),
            )
            .expect(expected_downloads)
            .mount(&self.server)
            .await;
    }

    pub async fn registration(&self, id: &str, catalog_entries: serde_json::Value) {
        let base = self.server.uri();
        let lower = id.to_lowercase();
        let leaves: Vec<serde_json::Value> = catalog_entries
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|entry| json!({ "catalogEntry": entry }))
            .collect();
        Mock::given(method("GET"))
            .and(path(format!("/reg/{lower}/index.json")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 1,
                "items": [{
                    "@id": format!("{base}/reg/{lower}/index.json#page/1"),
                    "items": leaves
                }]
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn search(&self, data: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalHits": data.as_array().map_or(0, Vec::len),
                "data": data
            })))
            .mount(&self.server)
            .await;
    }
}

//! Upstream feed access.
//!
//! [`UpstreamFeed`] is the contract the mirror coordinator needs from a remote
//! feed. [`NuGetClient`] implements it against a NuGet v3 service index:
//!
//! | operation       | resource                                   |
//! |-----------------|--------------------------------------------|
//! | `list_versions` | `PackageBaseAddress/3.0.0` (flat container) |
//! | `get_metadata`  | `RegistrationsBaseUrl/3.6.0`               |
//! | `search`        | `SearchQueryService`                       |
//! | `download`      | `PackageBaseAddress/3.0.0`                 |
//!
//! Transport failures map to [`MirrorError::Unreachable`], HTTP 404 to
//! [`MirrorError::NotFound`] and undecodable bodies to
//! [`MirrorError::Malformed`].

use crate::error::{MirrorError, MirrorResult};
use crate::search::{SearchRequest, SearchResult};
use crate::types::{PackageId, PackageVersion};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use futures_util::TryStreamExt;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::OnceCell;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

/// Package content as it arrives from the feed. Not seekable.
pub type PackageStream = Pin<Box<dyn AsyncRead + Send>>;

/// Operations the mirror needs from a remote feed.
#[async_trait]
pub trait UpstreamFeed: Send + Sync {
    async fn list_versions(
        &self,
        id: &PackageId,
        include_unlisted: bool,
    ) -> MirrorResult<Vec<PackageVersion>>;

    async fn get_metadata(&self, id: &PackageId) -> MirrorResult<Vec<PackageMetadata>>;

    async fn search(&self, request: &SearchRequest) -> MirrorResult<Vec<SearchResult>>;

    async fn download(
        &self,
        id: &PackageId,
        version: &PackageVersion,
    ) -> MirrorResult<PackageStream>;
}

/// A registration catalog entry as published by the upstream feed.
///
/// Values are kept as the feed sent them; turning them into a
/// [`crate::package::Package`] is the translator's job.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    #[serde(rename = "id")]
    pub package_id: String,
    pub version: String,
    #[serde(default, deserialize_with = "joined_authors")]
    pub authors: Option<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub title: Option<String>,
    pub language: Option<String>,
    pub listed: Option<bool>,
    pub published: Option<DateTime<FixedOffset>>,
    pub icon_url: Option<String>,
    pub license_url: Option<String>,
    pub project_url: Option<String>,
    pub min_client_version: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub require_license_acceptance: bool,
    #[serde(default, deserialize_with = "tag_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dependency_groups: Vec<DependencyGroupItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGroupItem {
    pub target_framework: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dependencies: Vec<DependencyItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependencyItem {
    pub id: String,
    pub range: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

// Registration entries carry authors either as "a, b" or ["a", "b"].
fn joined_authors<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<StringOrList>::deserialize(d)?.map(|v| match v {
        StringOrList::One(s) => s,
        StringOrList::Many(list) => list.join(", "),
    }))
}

// Feeds send `null` for empty groups and unset flags.
fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

fn tag_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<StringOrList>::deserialize(d)? {
        Some(StringOrList::One(s)) => s.split_whitespace().map(str::to_string).collect(),
        Some(StringOrList::Many(list)) => list,
        None => Vec::new(),
    })
}

/// Connection settings for the upstream feed.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// URL of the feed's v3 service index
    pub package_source: String,
    /// HTTP request timeout for upstream calls
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            package_source: "https://api.nuget.org/v3/index.json".to_string(),
            timeout: Duration::from_secs(600),
            user_agent: concat!("mirror-server/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServiceIndex {
    #[serde(default)]
    resources: Vec<ServiceResource>,
}

#[derive(Debug, Deserialize)]
struct ServiceResource {
    #[serde(rename = "@id")]
    url: String,
    #[serde(rename = "@type")]
    kind: String,
}

#[derive(Debug, Clone)]
struct FeedResources {
    package_base: String,
    registrations: String,
    search: String,
}

impl FeedResources {
    fn from_index(index: ServiceIndex) -> MirrorResult<Self> {
        let find = |kinds: &[&str]| {
            kinds.iter().find_map(|kind| {
                index
                    .resources
                    .iter()
                    .find(|r| r.kind == *kind)
                    .map(|r| r.url.trim_end_matches('/').to_string())
            })
        };
        let missing = |what: &str| MirrorError::Malformed(format!("service index has no {what}"));

        Ok(FeedResources {
            package_base: find(&["PackageBaseAddress/3.0.0"])
                .ok_or_else(|| missing("PackageBaseAddress"))?,
            registrations: find(&[
                "RegistrationsBaseUrl/3.6.0",
                "RegistrationsBaseUrl/3.4.0",
                "RegistrationsBaseUrl",
            ])
            .ok_or_else(|| missing("RegistrationsBaseUrl"))?,
            search: find(&["SearchQueryService/3.5.0", "SearchQueryService/3.0.0-rc", "SearchQueryService"])
                .ok_or_else(|| missing("SearchQueryService"))?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct VersionsIndex {
    #[serde(default)]
    versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegistrationIndex {
    #[serde(default)]
    items: Vec<RegistrationPage>,
}

#[derive(Debug, Deserialize)]
struct RegistrationPage {
    #[serde(rename = "@id")]
    url: String,
    items: Option<Vec<RegistrationLeaf>>,
}

// Entries stay raw until each is decoded on its own.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationLeaf {
    #[serde(default)]
    catalog_entry: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    #[serde(default)]
    data: Vec<SearchResult>,
}

/// HTTP client for a NuGet v3 feed.
///
/// The service index is fetched lazily on first use and cached for the life
/// of the client; a failed fetch is retried on the next call.
pub struct NuGetClient {
    client: Client,
    config: UpstreamConfig,
    resources: OnceCell<FeedResources>,
}

impl NuGetClient {
    /// Create a new upstream client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be created.
    pub fn new(config: UpstreamConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            client,
            config,
            resources: OnceCell::new(),
        })
    }

    pub fn package_source(&self) -> &str {
        &self.config.package_source
    }

    async fn resources(&self) -> MirrorResult<&FeedResources> {
        self.resources
            .get_or_try_init(|| async {
                let index: ServiceIndex = self.get_json(&self.config.package_source).await?;
                let resources = FeedResources::from_index(index)?;
                info!(source = %self.config.package_source, "Resolved upstream service index");
                Ok(resources)
            })
            .await
    }

    async fn get(&self, url: &str) -> MirrorResult<reqwest::Response> {
        debug!(url = %url, "Fetching from upstream feed");
        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Upstream request failed");
            MirrorError::Unreachable(e.to_string())
        })?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(MirrorError::NotFound(url.to_string())),
            status => Err(MirrorError::Unreachable(format!("HTTP {status} from {url}"))),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> MirrorResult<T> {
        let body = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| MirrorError::Unreachable(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| MirrorError::Malformed(format!("{url}: {e}")))
    }

    async fn registration_entries(&self, id: &PackageId) -> MirrorResult<Vec<PackageMetadata>> {
        let resources = self.resources().await?;
        let url = format!("{}/{}/index.json", resources.registrations, id.lower());
        let index: RegistrationIndex = self.get_json(&url).await?;

        let mut leaves = Vec::new();
        for page in index.items {
            // Large packages keep their pages out of line.
            match page.items {
                Some(items) => leaves.extend(items),
                None => {
                    let page: RegistrationPage = self.get_json(&page.url).await?;
                    leaves.extend(page.items.unwrap_or_default());
                }
            }
        }
        decode_catalog_entries(id, leaves)
    }
}

/// Decode each catalog entry on its own. Undecodable entries are skipped;
/// only a page where every entry fails is malformed.
fn decode_catalog_entries(
    id: &PackageId,
    leaves: Vec<RegistrationLeaf>,
) -> MirrorResult<Vec<PackageMetadata>> {
    let total = leaves.len();
    let mut entries = Vec::with_capacity(total);
    let mut first_failure = None;

    for leaf in leaves {
        match serde_json::from_value::<PackageMetadata>(leaf.catalog_entry) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(package_id = %id, error = %e, "Skipping undecodable catalog entry");
                first_failure.get_or_insert(e);
            }
        }
    }

    match first_failure {
        Some(e) if entries.is_empty() => Err(MirrorError::Malformed(format!(
            "{id}: all {total} catalog entries undecodable: {e}"
        ))),
        _ => Ok(entries),
    }
}

#[async_trait]
impl UpstreamFeed for NuGetClient {
    async fn list_versions(
        &self,
        id: &PackageId,
        include_unlisted: bool,
    ) -> MirrorResult<Vec<PackageVersion>> {
        // The flat container lists unlisted versions too; only registration
        // data says which versions are listed.
        if !include_unlisted {
            let entries = self.registration_entries(id).await?;
            return Ok(entries
                .into_iter()
                .filter(|e| e.listed.unwrap_or(true))
                .filter_map(|e| e.version.parse().ok())
                .collect());
        }

        let resources = self.resources().await?;
        let url = format!("{}/{}/index.json", resources.package_base, id.lower());
        let index: VersionsIndex = self.get_json(&url).await?;

        Ok(index
            .versions
            .iter()
            .filter_map(|raw| match raw.parse::<PackageVersion>() {
                Ok(version) => Some(version),
                Err(e) => {
                    warn!(package_id = %id, error = %e, "Skipping unparsable upstream version");
                    None
                }
            })
            .collect())
    }

    async fn get_metadata(&self, id: &PackageId) -> MirrorResult<Vec<PackageMetadata>> {
        self.registration_entries(id).await
    }

    async fn search(&self, request: &SearchRequest) -> MirrorResult<Vec<SearchResult>> {
        let resources = self.resources().await?;

        let mut query: Vec<(&str, String)> = vec![
            ("q", request.query.clone()),
            ("skip", request.skip.to_string()),
            ("take", request.take.to_string()),
            ("prerelease", request.include_prerelease.to_string()),
        ];
        if request.include_semver2 {
            query.push(("semVerLevel", "2.0.0".to_string()));
        }
        if let Some(package_type) = &request.package_type {
            query.push(("packageType", package_type.clone()));
        }

        debug!(url = %resources.search, query = %request.query, "Searching upstream feed");
        let response = self
            .client
            .get(&resources.search)
            .query(&query)
            .send()
            .await
            .map_err(|e| MirrorError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MirrorError::Unreachable(format!(
                "HTTP {} from search service",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| MirrorError::Unreachable(e.to_string()))?;
        let payload: SearchPayload = serde_json::from_slice(&body)
            .map_err(|e| MirrorError::Malformed(format!("search response: {e}")))?;
        Ok(payload.data)
    }

    async fn download(
        &self,
        id: &PackageId,
        version: &PackageVersion,
    ) -> MirrorResult<PackageStream> {
        let resources = self.resources().await?;
        let lower_id = id.lower();
        let lower_version = version.to_normalized().to_ascii_lowercase();
        let url = format!(
            "{}/{lower_id}/{lower_version}/{lower_id}.{lower_version}.nupkg",
            resources.package_base
        );

        let response = self.get(&url).await?;
        info!(package_id = %id, version = %version, "Streaming package from upstream feed");

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }
}

//! Search request and response shapes.
//!
//! Field names follow the NuGet search query service so responses can be
//! returned to clients as-is and upstream responses decode directly.

use crate::types::PackageId;
use serde::{Deserialize, Serialize};

const SCHEMA_VOCAB: &str = "http://schema.nuget.org/schema#";

/// Parameters shared by every search path (local, upstream, aggregated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub skip: usize,
    pub take: usize,
    pub include_prerelease: bool,
    pub include_semver2: bool,
    pub package_type: Option<String>,
    pub framework: Option<String>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            query: String::new(),
            skip: 0,
            take: 20,
            include_prerelease: true,
            include_semver2: true,
            package_type: None,
            framework: None,
        }
    }
}

impl SearchRequest {
    pub fn query(query: impl Into<String>) -> Self {
        SearchRequest {
            query: query.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(rename = "id")]
    pub package_id: PackageId,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub total_downloads: u64,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub package_types: Vec<SearchResultPackageType>,
    #[serde(default)]
    pub versions: Vec<SearchResultVersion>,
}

impl SearchResult {
    pub fn new(package_id: impl Into<PackageId>, version: impl Into<String>) -> Self {
        SearchResult {
            package_id: package_id.into(),
            version: version.into(),
            description: None,
            authors: Vec::new(),
            icon_url: None,
            license_url: None,
            project_url: None,
            registration: None,
            summary: None,
            tags: Vec::new(),
            title: None,
            total_downloads: 0,
            verified: false,
            package_types: Vec::new(),
            versions: Vec::new(),
        }
    }

    pub fn with_downloads(mut self, total_downloads: u64) -> Self {
        self.total_downloads = total_downloads;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultPackageType {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultVersion {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub registration_leaf_url: Option<String>,
    pub version: String,
    #[serde(default)]
    pub downloads: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchContext {
    #[serde(rename = "@vocab")]
    pub vocab: String,
    #[serde(rename = "@base")]
    pub base: String,
}

impl SearchContext {
    pub fn with_base(base: impl Into<String>) -> Self {
        SearchContext {
            vocab: SCHEMA_VOCAB.to_string(),
            base: base.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<SearchContext>,
    pub total_hits: usize,
    pub data: Vec<SearchResult>,
}

impl SearchResponse {
    /// Wraps results with `total_hits` taken from the list itself.
    pub fn from_results(data: Vec<SearchResult>, context: Option<SearchContext>) -> Self {
        SearchResponse {
            context,
            total_hits: data.len(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutocompleteContext {
    #[serde(rename = "@vocab")]
    pub vocab: String,
}

/// Package ids for client-side completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutocompleteResponse {
    #[serde(rename = "@context")]
    pub context: AutocompleteContext,
    pub total_hits: usize,
    pub data: Vec<String>,
}

impl AutocompleteResponse {
    pub fn from_ids(data: Vec<String>) -> Self {
        AutocompleteResponse {
            context: AutocompleteContext {
                vocab: SCHEMA_VOCAB.to_string(),
            },
            total_hits: data.len(),
            data,
        }
    }
}

/// A package that depends on the queried one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentResult {
    #[serde(rename = "id")]
    pub package_id: PackageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub total_downloads: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentsResponse {
    pub total_hits: usize,
    pub data: Vec<DependentResult>,
}

impl DependentsResponse {
    pub fn from_results(data: Vec<DependentResult>) -> Self {
        DependentsResponse {
            total_hits: data.len(),
            data,
        }
    }
}

// Feeds disagree on whether `authors`/`tags` are a string or a list.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Null(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::Null(()) => Vec::new(),
    })
}

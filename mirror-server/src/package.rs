//! The server's internal package record.

use crate::types::{PackageId, PackageVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// One version of one package, as known to the local store.
///
/// Built either by the indexer from a package manifest or by the metadata
/// translator from upstream registration data. The id+version pair is unique
/// within a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: PackageId,
    pub version: PackageVersion,
    #[serde(default)]
    pub authors: Vec<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub title: Option<String>,
    pub language: Option<String>,
    pub listed: bool,
    pub published: DateTime<Utc>,
    pub license_url: Option<Url>,
    pub icon_url: Option<Url>,
    pub project_url: Option<Url>,
    pub min_client_version: Option<String>,
    #[serde(default)]
    pub require_license_acceptance: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub repository_url: Option<String>,
    pub repository_type: Option<String>,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub has_readme: bool,
    #[serde(default)]
    pub package_types: Vec<PackageType>,
    #[serde(default)]
    pub dependencies: Vec<PackageDependency>,
}

impl Package {
    /// A listed package with nothing but identity filled in.
    pub fn new(id: impl Into<PackageId>, version: PackageVersion) -> Self {
        Package {
            id: id.into(),
            version,
            authors: Vec::new(),
            description: None,
            summary: None,
            title: None,
            language: None,
            listed: true,
            published: DateTime::<Utc>::UNIX_EPOCH,
            license_url: None,
            icon_url: None,
            project_url: None,
            min_client_version: None,
            require_license_acceptance: false,
            tags: Vec::new(),
            repository_url: None,
            repository_type: None,
            downloads: 0,
            has_readme: false,
            package_types: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn is_prerelease(&self) -> bool {
        self.version.is_prerelease()
    }

    pub fn is_semver2(&self) -> bool {
        self.version.is_semver2()
            || self
                .dependencies
                .iter()
                .filter_map(|d| d.version_range.as_deref())
                .any(range_needs_semver2)
    }

    /// `Dependency` when no types were declared.
    pub fn has_package_type(&self, name: &str) -> bool {
        if self.package_types.is_empty() {
            return name.eq_ignore_ascii_case("dependency");
        }
        self.package_types
            .iter()
            .any(|t| t.name.eq_ignore_ascii_case(name))
    }
}

// A range that mentions a SemVer 2 version (dotted labels or metadata).
fn range_needs_semver2(range: &str) -> bool {
    range
        .split(|c| matches!(c, '[' | ']' | '(' | ')' | ','))
        .map(str::trim)
        .filter(|bound| !bound.is_empty())
        .filter_map(|bound| bound.parse::<PackageVersion>().ok())
        .any(|v| v.is_semver2())
}

/// A declared package type, e.g. `Dependency` or `DotnetTool`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageType {
    pub name: String,
    pub version: Option<String>,
}

/// One entry of a dependency group.
///
/// A group that lists no dependencies is still recorded, as a single entry
/// with no id and no range but with the group's target framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDependency {
    pub id: Option<String>,
    pub version_range: Option<String>,
    pub target_framework: Option<String>,
}

impl PackageDependency {
    pub fn empty_group(target_framework: Option<String>) -> Self {
        PackageDependency {
            id: None,
            version_range: None,
            target_framework,
        }
    }

    pub fn is_empty_group_marker(&self) -> bool {
        self.id.is_none()
    }
}

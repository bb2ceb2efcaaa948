//! NuGet v3 registration documents built from local records.
//!
//! All versions of a package go into a single inlined page:
//!
//! ```text
//! index -> items[0] (page, lower..upper) -> items[] (leaf) -> catalogEntry
//! ```

use crate::package::{Package, PackageDependency};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RegistrationIndex {
    #[serde(rename = "@id")]
    pub url: String,
    pub count: usize,
    pub items: Vec<RegistrationPage>,
}

#[derive(Debug, Serialize)]
pub struct RegistrationPage {
    #[serde(rename = "@id")]
    pub url: String,
    pub count: usize,
    pub lower: String,
    pub upper: String,
    pub items: Vec<RegistrationLeaf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationLeaf {
    #[serde(rename = "@id")]
    pub url: String,
    pub package_content: String,
    pub catalog_entry: CatalogEntry,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    #[serde(rename = "@id")]
    pub url: String,
    #[serde(rename = "id")]
    pub package_id: String,
    pub version: String,
    pub authors: String,
    pub description: String,
    pub icon_url: String,
    pub language: String,
    pub license_url: String,
    pub listed: bool,
    pub min_client_version: String,
    pub package_content: String,
    pub project_url: String,
    pub published: DateTime<Utc>,
    pub require_license_acceptance: bool,
    pub summary: String,
    pub tags: Vec<String>,
    pub title: String,
    pub dependency_groups: Vec<DependencyGroup>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGroup {
    pub target_framework: Option<String>,
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct Dependency {
    pub id: String,
    pub range: String,
}

/// Build the registration index for `packages` (all one id). `server_addr`
/// has no trailing slash. `None` when there is nothing to list.
pub fn build_index(server_addr: &str, packages: &[Package]) -> Option<RegistrationIndex> {
    let mut sorted: Vec<&Package> = packages.iter().collect();
    sorted.sort_by(|a, b| a.version.cmp(&b.version));
    let (first, last) = (*sorted.first()?, *sorted.last()?);

    let lower_id = first.id.lower();
    let index_url = format!("{server_addr}/v3/registration/{lower_id}/index.json");

    let leaves: Vec<RegistrationLeaf> = sorted
        .iter()
        .map(|package| leaf(server_addr, package))
        .collect();

    Some(RegistrationIndex {
        url: index_url.clone(),
        count: 1,
        items: vec![RegistrationPage {
            url: format!("{index_url}#page/0"),
            count: leaves.len(),
            lower: first.version.to_normalized(),
            upper: last.version.to_normalized(),
            items: leaves,
        }],
    })
}

fn leaf(server_addr: &str, package: &Package) -> RegistrationLeaf {
    let lower_id = package.id.lower();
    let lower_version = package.version.to_normalized().to_ascii_lowercase();
    let leaf_url = format!("{server_addr}/v3/registration/{lower_id}/{lower_version}.json");
    let content_url =
        format!("{server_addr}/v3/package/{lower_id}/{lower_version}/{lower_id}.{lower_version}.nupkg");
    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    let url = |value: &Option<url::Url>| value.as_ref().map(|u| u.to_string()).unwrap_or_default();

    RegistrationLeaf {
        url: leaf_url.clone(),
        package_content: content_url.clone(),
        catalog_entry: CatalogEntry {
            url: leaf_url,
            package_id: package.id.to_string(),
            version: package.version.to_full_string(),
            authors: package.authors.join(", "),
            description: text(&package.description),
            icon_url: url(&package.icon_url),
            language: text(&package.language),
            license_url: url(&package.license_url),
            listed: package.listed,
            min_client_version: text(&package.min_client_version),
            package_content: content_url,
            project_url: url(&package.project_url),
            published: package.published,
            require_license_acceptance: package.require_license_acceptance,
            summary: text(&package.summary),
            tags: package.tags.clone(),
            title: text(&package.title),
            dependency_groups: dependency_groups(&package.dependencies),
        },
    }
}

/// Regroup flattened dependencies by framework, first-seen order. An
/// empty-group marker yields a group with no dependencies.
pub fn dependency_groups(dependencies: &[PackageDependency]) -> Vec<DependencyGroup> {
    let mut groups: Vec<DependencyGroup> = Vec::new();
    for dependency in dependencies {
        let position = groups
            .iter()
            .position(|g| g.target_framework == dependency.target_framework);
        let group = match position {
            Some(i) => &mut groups[i],
            None => {
                groups.push(DependencyGroup {
                    target_framework: dependency.target_framework.clone(),
                    dependencies: Vec::new(),
                });
                let last = groups.len() - 1;
                &mut groups[last]
            }
        };
        if let Some(id) = &dependency.id {
            group.dependencies.push(Dependency {
                id: id.clone(),
                range: dependency.version_range.clone().unwrap_or_else(|| "(, )".to_string()),
            });
        }
    }
    groups
}

//! Upstream registration metadata → local [`Package`] records.
//!
//! Mirrored packages start with zero downloads and no readme: upstream
//! popularity and readme presence are not imported.

use crate::package::{Package, PackageDependency};
use crate::types::{PackageId, PackageVersion, VersionParseError};
use crate::upstream::{DependencyGroupItem, PackageMetadata};
use chrono::{DateTime, Utc};
use url::Url;

const AUTHOR_SEPARATORS: [char; 5] = [',', ';', '\t', '\n', '\r'];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("package {package_id}: {source}")]
    InvalidVersion {
        package_id: String,
        #[source]
        source: VersionParseError,
    },
}

/// Translate one upstream catalog entry.
///
/// Only the version is load-bearing: an unparsable version fails this entry.
/// Bad URLs and empty author lists degrade to `None` and `[]`.
pub fn to_package(metadata: &PackageMetadata) -> Result<Package, TranslateError> {
    let version: PackageVersion =
        metadata
            .version
            .parse()
            .map_err(|source| TranslateError::InvalidVersion {
                package_id: metadata.package_id.clone(),
                source,
            })?;

    Ok(Package {
        id: PackageId::new(metadata.package_id.clone()),
        version,
        authors: parse_authors(metadata.authors.as_deref()),
        description: metadata.description.clone(),
        summary: metadata.summary.clone(),
        title: metadata.title.clone(),
        language: metadata.language.clone(),
        listed: metadata.listed.unwrap_or(true),
        published: metadata
            .published
            .map(|p| p.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        license_url: parse_url(metadata.license_url.as_deref()),
        icon_url: parse_url(metadata.icon_url.as_deref()),
        project_url: parse_url(metadata.project_url.as_deref()),
        min_client_version: metadata.min_client_version.clone(),
        require_license_acceptance: metadata.require_license_acceptance,
        tags: metadata.tags.clone(),
        repository_url: None,
        repository_type: None,
        downloads: 0,
        has_readme: false,
        package_types: Vec::new(),
        dependencies: dependencies(&metadata.dependency_groups),
    })
}

pub fn parse_authors(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(AUTHOR_SEPARATORS)
        .map(str::trim)
        .filter(|author| !author.is_empty())
        .map(str::to_string)
        .collect()
}

/// Absolute URLs only; anything else is dropped.
pub fn parse_url(raw: Option<&str>) -> Option<Url> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| Url::parse(s).ok())
}

fn dependencies(groups: &[DependencyGroupItem]) -> Vec<PackageDependency> {
    groups.iter().flat_map(group_dependencies).collect()
}

fn group_dependencies(group: &DependencyGroupItem) -> Vec<PackageDependency> {
    if group.dependencies.is_empty() {
        return vec![PackageDependency::empty_group(group.target_framework.clone())];
    }

    group
        .dependencies
        .iter()
        .map(|dep| PackageDependency {
            id: Some(dep.id.clone()),
            version_range: dep.range.clone(),
            target_framework: group.target_framework.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::DependencyItem;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn metadata(version: &str) -> PackageMetadata {
        PackageMetadata {
            package_id: "Contoso.Http".to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn authors_are_split_trimmed_and_compacted() {
        assert_eq!(
            parse_authors(Some("Alice,, Bob ;Carol")),
            ["Alice", "Bob", "Carol"]
        );
        assert_eq!(parse_authors(Some("One\tTwo\r\nThree")), ["One", "Two", "Three"]);
        assert!(parse_authors(Some("")).is_empty());
        assert!(parse_authors(Some(" ,; ")).is_empty());
        assert!(parse_authors(None).is_empty());
    }

    #[test]
    fn malformed_icon_url_becomes_none() {
        let mut meta = metadata("1.0.0");
        meta.icon_url = Some("not a url".to_string());
        meta.project_url = Some("https://contoso.example/http".to_string());
        meta.license_url = Some("/relative/license".to_string());

        let pkg = to_package(&meta).unwrap();
        assert_eq!(pkg.icon_url, None);
        assert_eq!(pkg.license_url, None);
        assert_eq!(
            pkg.project_url.map(String::from),
            Some("https://contoso.example/http".to_string())
        );
    }

    #[test]
    fn empty_dependency_group_keeps_its_framework() {
        let mut meta = metadata("1.0.0");
        meta.dependency_groups = vec![DependencyGroupItem {
            target_framework: Some("net6.0".to_string()),
            dependencies: Vec::new(),
        }];

        let pkg = to_package(&meta).unwrap();
        assert_eq!(
            pkg.dependencies,
            [PackageDependency {
                id: None,
                version_range: None,
                target_framework: Some("net6.0".to_string()),
            }]
        );
    }

    #[test]
    fn null_dependency_list_is_an_empty_group() {
        let meta: PackageMetadata = serde_json::from_value(serde_json::json!({
            "id": "Foo",
            "version": "1.0.0",
            "requireLicenseAcceptance": null,
            "dependencyGroups": [{ "targetFramework": "net6.0", "dependencies": null }]
        }))
        .unwrap();

        let pkg = to_package(&meta).unwrap();
        assert!(!pkg.require_license_acceptance);
        assert_eq!(
            pkg.dependencies,
            [PackageDependency::empty_group(Some("net6.0".to_string()))]
        );
        assert_eq!(pkg.dependencies[0].id, None);
        assert_eq!(pkg.dependencies[0].version_range, None);
    }

    #[test]
    fn populated_groups_expand_per_dependency() {
        let mut meta = metadata("1.0.0");
        meta.dependency_groups = vec![
            DependencyGroupItem {
                target_framework: Some("net6.0".to_string()),
                dependencies: vec![
                    DependencyItem {
                        id: "Contoso.Core".to_string(),
                        range: Some("[1.0.0, )".to_string()),
                    },
                    DependencyItem {
                        id: "Contoso.Logging".to_string(),
                        range: None,
                    },
                ],
            },
            DependencyGroupItem {
                target_framework: Some("netstandard2.0".to_string()),
                dependencies: Vec::new(),
            },
        ];

        let deps = to_package(&meta).unwrap().dependencies;
        assert_eq!(deps.len(), 3);
        assert_eq!(deps[0].id.as_deref(), Some("Contoso.Core"));
        assert_eq!(deps[1].target_framework.as_deref(), Some("net6.0"));
        assert_eq!(deps[1].version_range, None);
        assert!(deps[2].is_empty_group_marker());
        assert_eq!(deps[2].target_framework.as_deref(), Some("netstandard2.0"));
    }

    #[test]
    fn no_groups_means_no_dependencies() {
        assert!(to_package(&metadata("1.0.0")).unwrap().dependencies.is_empty());
    }

    #[test]
    fn mirrored_packages_do_not_import_popularity() {
        let mut meta = metadata("3.1.0-preview.2");
        meta.published = Some(
            chrono::FixedOffset::east_opt(2 * 3600)
                .unwrap()
                .with_ymd_and_hms(2022, 5, 6, 12, 0, 0)
                .unwrap(),
        );
        meta.listed = Some(false);
        meta.tags = vec!["http".into(), "client".into()];

        let pkg = to_package(&meta).unwrap();
        assert_eq!(pkg.downloads, 0);
        assert!(!pkg.has_readme);
        assert!(!pkg.listed);
        assert!(pkg.package_types.is_empty());
        assert_eq!(pkg.repository_url, None);
        assert_eq!(pkg.tags, ["http", "client"]);
        assert_eq!(
            pkg.published,
            Utc.with_ymd_and_hms(2022, 5, 6, 10, 0, 0).unwrap()
        );
        assert_eq!(pkg.version.to_normalized(), "3.1.0-preview.2");
    }

    #[test]
    fn unparsable_version_fails_that_entry() {
        let err = to_package(&metadata("one.two")).unwrap_err();
        let TranslateError::InvalidVersion { package_id, .. } = err;
        assert_eq!(package_id, "Contoso.Http");
    }
}

//! Strong type definitions for package identities
//!
//! [`PackageId`] compares ASCII case-insensitively, the way feed clients
//! treat ids. [`PackageVersion`] is a NuGet-flavoured semantic version with
//! an optional fourth numeric segment.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A package id as published, compared case-insensitively.
#[derive(Debug, Clone, Eq)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: impl Into<String>) -> Self {
        PackageId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normalised form used for storage paths and map keys.
    pub fn lower(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl PartialEq for PackageId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for PackageId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl PartialOrd for PackageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageId {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let b = other.0.bytes().map(|b| b.to_ascii_lowercase());
        a.cmp(b)
    }
}

impl From<&str> for PackageId {
    fn from(value: &str) -> Self {
        PackageId::new(value)
    }
}

impl From<String> for PackageId {
    fn from(value: String) -> Self {
        PackageId(value)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for PackageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PackageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(PackageId)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid package version '{input}': {reason}")]
pub struct VersionParseError {
    pub input: String,
    pub reason: &'static str,
}

/// `major.minor.patch[.revision][-label.label][+metadata]`
///
/// Equality, hashing and ordering ignore build metadata; release labels
/// compare case-insensitively, numeric labels numerically.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    major: u64,
    minor: u64,
    patch: u64,
    revision: u64,
    release_labels: Vec<String>,
    metadata: Option<String>,
    original: String,
}

impl PackageVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        PackageVersion {
            major,
            minor,
            patch,
            revision: 0,
            release_labels: Vec::new(),
            metadata: None,
            original: format!("{major}.{minor}.{patch}"),
        }
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn release_labels(&self) -> &[String] {
        &self.release_labels
    }

    pub fn metadata(&self) -> Option<&str> {
        self.metadata.as_deref()
    }

    /// The string this version was parsed from.
    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn is_prerelease(&self) -> bool {
        !self.release_labels.is_empty()
    }

    /// Requires a SemVer 2.0.0 aware client: dotted labels or build metadata.
    pub fn is_semver2(&self) -> bool {
        self.release_labels.len() > 1 || self.metadata.is_some()
    }

    /// Normalized form without metadata; the revision only when non-zero.
    pub fn to_normalized(&self) -> String {
        let mut s = format!("{}.{}.{}", self.major, self.minor, self.patch);
        if self.revision > 0 {
            s.push_str(&format!(".{}", self.revision));
        }
        if self.is_prerelease() {
            s.push('-');
            s.push_str(&self.release_labels.join("."));
        }
        s
    }

    /// Normalized form including build metadata.
    pub fn to_full_string(&self) -> String {
        match &self.metadata {
            Some(meta) => format!("{}+{}", self.to_normalized(), meta),
            None => self.to_normalized(),
        }
    }

    fn compare_labels(a: &[String], b: &[String]) -> Ordering {
        // A version without labels ranks above any prerelease of it.
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            _ => {}
        }

        for (x, y) in a.iter().zip(b.iter()) {
            let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                (Ok(_), Err(_)) => Ordering::Less,
                (Err(_), Ok(_)) => Ordering::Greater,
                (Err(_), Err(_)) => x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase()),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.len().cmp(&b.len())
    }
}

fn is_valid_identifier(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

impl FromStr for PackageVersion {
    type Err = VersionParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let fail = |reason| VersionParseError {
            input: input.to_string(),
            reason,
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(fail("empty version"));
        }

        let (rest, metadata) = match trimmed.split_once('+') {
            Some((rest, meta)) => {
                if !meta.split('.').all(is_valid_identifier) {
                    return Err(fail("invalid build metadata"));
                }
                (rest, Some(meta.to_string()))
            }
            None => (trimmed, None),
        };

        let (numbers, labels) = match rest.split_once('-') {
            Some((numbers, labels)) => {
                let labels: Vec<String> = labels.split('.').map(str::to_string).collect();
                if !labels.iter().all(|l| is_valid_identifier(l)) {
                    return Err(fail("invalid release label"));
                }
                (numbers, labels)
            }
            None => (rest, Vec::new()),
        };

        let segments: Vec<&str> = numbers.split('.').collect();
        if segments.is_empty() || segments.len() > 4 {
            return Err(fail("expected one to four numeric segments"));
        }

        let mut parsed = [0u64; 4];
        for (slot, segment) in parsed.iter_mut().zip(&segments) {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(fail("numeric segment expected"));
            }
            *slot = segment.parse().map_err(|_| fail("numeric segment overflow"))?;
        }

        Ok(PackageVersion {
            major: parsed[0],
            minor: parsed[1],
            patch: parsed[2],
            revision: parsed[3],
            release_labels: labels,
            metadata,
            original: trimmed.to_string(),
        })
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl Hash for PackageVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.major, self.minor, self.patch, self.revision).hash(state);
        for label in &self.release_labels {
            // Numeric labels compare by value, so hash them by value too.
            match label.parse::<u64>() {
                Ok(n) => n.hash(state),
                Err(_) => label.to_ascii_lowercase().hash(state),
            }
        }
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch, self.revision)
            .cmp(&(other.major, other.minor, other.patch, other.revision))
            .then_with(|| Self::compare_labels(&self.release_labels, &other.release_labels))
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_normalized())
    }
}

impl Serialize for PackageVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_full_string())
    }
}

impl<'de> Deserialize<'de> for PackageVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ABOUTME: Version parsing, normalization, and ordering for installations and hooks.
// ABOUTME: Releases sort before their own prereleases; prereleases order alpha < beta < rc.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A version string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed version '{input}': {reason}")]
pub struct MalformedVersionError {
    pub input: String,
    pub reason: &'static str,
}

impl MalformedVersionError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// Prerelease tag such as `alpha`, `beta.2` or `rc10`.
///
/// Tags order by their alphabetic stage label first, then by the trailing
/// number, then by the raw text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Prerelease {
    raw: String,
    stage: String,
    number: Option<u64>,
}

impl Prerelease {
    fn parse(input: &str, tag: &str) -> Result<Self, MalformedVersionError> {
        if tag.is_empty() {
            return Err(MalformedVersionError::new(input, "empty prerelease tag"));
        }
        if !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(MalformedVersionError::new(
                input,
                "invalid character in prerelease tag",
            ));
        }

        let lowered = tag.to_ascii_lowercase();
        let stage: String = lowered
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        let digits: String = lowered[stage.len()..]
            .trim_start_matches(['.', '-'])
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();

        Ok(Self {
            raw: tag.to_string(),
            stage,
            number: digits.parse().ok(),
        })
    }

    /// The tag as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Lowercased alphabetic stage label (`alpha`, `beta`, `rc`, ...).
    pub fn stage(&self) -> &str {
        &self.stage
    }
}

impl Ord for Prerelease {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stage
            .cmp(&other.stage)
            .then_with(|| self.number.cmp(&other.number))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for Prerelease {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A `MAJOR.MINOR.PATCH[-PRERELEASE]` version.
///
/// Ordering is not semver precedence: for equal numeric triples the release
/// (no prerelease) sorts *before* any of its prereleases. Hook selection is
/// defined in terms of this ordering, so it must not be "fixed".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pre: Option<Prerelease>,
}

impl Version {
    /// Create a stable version from its numeric triple.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
        }
    }

    /// Parse a version string. Accepts a leading `v` and ignores `+build` metadata.
    pub fn parse(input: &str) -> Result<Self, MalformedVersionError> {
        let trimmed = input.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let without_build = trimmed.split('+').next().unwrap_or_default();

        if without_build.is_empty() {
            return Err(MalformedVersionError::new(input, "empty version"));
        }

        let (core, pre) = match without_build.split_once('-') {
            Some((core, tag)) => (core, Some(Prerelease::parse(input, tag)?)),
            None => (without_build, None),
        };

        let mut parts = core.split('.');
        let major = parse_component(input, parts.next())?;
        let minor = parse_component(input, parts.next())?;
        let patch = parse_component(input, parts.next())?;
        if parts.next().is_some() {
            return Err(MalformedVersionError::new(
                input,
                "expected exactly three numeric components",
            ));
        }

        Ok(Self {
            major,
            minor,
            patch,
            pre,
        })
    }

    /// The prerelease tag, if any.
    pub fn prerelease(&self) -> Option<&Prerelease> {
        self.pre.as_ref()
    }

    /// True iff no prerelease tag is present.
    pub fn is_stable(&self) -> bool {
        self.pre.is_none()
    }

    /// The same numeric triple with the prerelease tag stripped.
    pub fn normalized(&self) -> Version {
        Version::new(self.major, self.minor, self.patch)
    }
}

fn parse_component(input: &str, part: Option<&str>) -> Result<u64, MalformedVersionError> {
    let part = part.ok_or_else(|| {
        MalformedVersionError::new(input, "expected exactly three numeric components")
    })?;
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
        return Err(MalformedVersionError::new(
            input,
            "version components must be numeric",
        ));
    }
    part.parse()
        .map_err(|_| MalformedVersionError::new(input, "version component out of range"))
}

/// Parse and strip the prerelease suffix.
pub fn normalize(input: &str) -> Result<Version, MalformedVersionError> {
    Version::parse(input).map(|v| v.normalized())
}

/// Compare two versions under the installation ordering.
pub fn compare(a: &Version, b: &Version) -> Ordering {
    a.cmp(b)
}

/// True iff the version carries no prerelease suffix.
pub fn is_stable(v: &Version) -> bool {
    v.is_stable()
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                // Release before prerelease of the same triple.
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre.raw)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = MalformedVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

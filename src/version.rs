//! Release version parsing and install version resolution.

use std::cmp::Ordering;
use std::fmt;

use tracing::debug;

use crate::error::{KeteError, Result};

/// Prefix some providers put in front of release names.
const RELEASE_PREFIX: &str = "openshift-v";

/// A `major.minor.patch[-prerelease]` release version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub pre: Option<String>,
}

impl Version {
    /// Parse a version string, accepting an `openshift-v` or `v` prefix.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = strip_release_prefix(raw.trim());
        let (core, pre) = match trimmed.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return Err(KeteError::InvalidVersion(raw.to_string())),
            None => (trimmed, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(KeteError::InvalidVersion(raw.to_string()));
        }
        let num = |s: &str| {
            s.parse::<u32>()
                .map_err(|_| KeteError::InvalidVersion(raw.to_string()))
        };

        Ok(Self {
            major: num(parts[0])?,
            minor: num(parts[1])?,
            patch: num(parts[2])?,
            pre,
        })
    }

    pub fn is_release_candidate(&self) -> bool {
        self.pre.as_deref().is_some_and(|p| p.starts_with("rc"))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

/// Semver precedence for prerelease tags: numeric identifiers compare
/// numerically, so `rc.10` sorts after `rc.2`.
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    match (semver::Prerelease::new(a), semver::Prerelease::new(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Strip the provider release prefix (`openshift-v4.4.0` -> `4.4.0`).
pub fn strip_release_prefix(raw: &str) -> &str {
    raw.strip_prefix(RELEASE_PREFIX)
        .or_else(|| raw.strip_prefix('v'))
        .unwrap_or(raw)
}

/// Versions a provider can install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionList {
    pub available: Vec<String>,
    pub default: Option<String>,
}

/// Pick the version to install.
///
/// An explicit version wins. With an upgrade target, the greatest available
/// version strictly below the target is chosen so there is something to
/// upgrade to. Otherwise the provider default is used.
pub fn resolve_install_version(
    explicit: Option<&str>,
    upgrade_target: Option<&str>,
    versions: &VersionList,
) -> Result<String> {
    if let Some(explicit) = explicit {
        debug!("Using explicitly configured install version {}", explicit);
        return Ok(explicit.to_string());
    }

    if let Some(target) = upgrade_target {
        let target = Version::parse(target)?;
        let mut candidates: Vec<(Version, &String)> = versions
            .available
            .iter()
            .filter_map(|raw| Version::parse(raw).ok().map(|v| (v, raw)))
            .filter(|(v, _)| *v < target)
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        return candidates
            .last()
            .map(|(_, raw)| (*raw).clone())
            .ok_or_else(|| {
                KeteError::InvalidVersion(format!(
                    "no available version below upgrade target {target}"
                ))
            });
    }

    versions
        .default
        .clone()
        .ok_or_else(|| KeteError::InvalidVersion("provider reports no default version".into()))
}

/// Release channel for upgrading to `version` by name, e.g. `stable-4.4`.
///
/// Release candidates always live in the `candidate` channel.
pub fn channel_for(version: &str, prefix: &str) -> Result<String> {
    let parsed = Version::parse(version)?;
    let prefix = if parsed.is_release_candidate() {
        "candidate"
    } else {
        prefix
    };
    Ok(format!("{}-{}.{}", prefix, parsed.major, parsed.minor))
}

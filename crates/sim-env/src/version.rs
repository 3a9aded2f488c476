//! Version parsing and drift detection for simulation environments.
//!
//! Environment versions are pinned exactly to the application version:
//! any inequality means the environment needs provisioning work. Drift
//! detection distinguishes upgrades from downgrades because the two are
//! handled differently (in-place install vs. full recreate).

use semver::Version;

/// Parse a version tag into a [`Version`].
///
/// Accepts both bare versions (`3.1.0`) and tag-style versions (`v3.1.0`),
/// since release artifacts are tagged with a leading `v`.
pub fn parse_version(tag: &str) -> Result<Version, semver::Error> {
    Version::parse(tag.trim().trim_start_matches('v'))
}

/// How an installed environment version relates to the desired one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionDrift {
    /// Installed version matches the desired version exactly.
    UpToDate,
    /// Installed version is older than desired.
    Outdated { installed: Version, desired: Version },
    /// Installed version is newer than desired (e.g. after reinstalling an
    /// older build of the app). Handled by recreating the environment.
    Downgrade { installed: Version, desired: Version },
}

/// Compare an installed version against the desired version.
///
/// Equality is exact, including pre-release and build metadata.
pub fn drift(installed: &Version, desired: &Version) -> VersionDrift {
    if installed == desired {
        VersionDrift::UpToDate
    } else if installed < desired {
        VersionDrift::Outdated {
            installed: installed.clone(),
            desired: desired.clone(),
        }
    } else {
        VersionDrift::Downgrade {
            installed: installed.clone(),
            desired: desired.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_bare() {
        assert_eq!(parse_version("3.1.0").unwrap(), Version::new(3, 1, 0));
    }

    #[test]
    fn test_parse_version_tag_prefix() {
        assert_eq!(parse_version("v3.1.0").unwrap(), Version::new(3, 1, 0));
        assert_eq!(parse_version(" v1.2.3 ").unwrap(), Version::new(1, 2, 3));
    }

    #[test]
    fn test_parse_version_invalid() {
        assert!(parse_version("not a version").is_err());
        assert!(parse_version("").is_err());
        assert!(parse_version("3.1").is_err());
    }

    #[test]
    fn test_drift_up_to_date() {
        let v = Version::new(3, 1, 0);
        assert_eq!(drift(&v, &v), VersionDrift::UpToDate);
    }

    #[test]
    fn test_drift_outdated() {
        let installed = Version::new(3, 0, 0);
        let desired = Version::new(3, 1, 0);
        assert_eq!(
            drift(&installed, &desired),
            VersionDrift::Outdated {
                installed: installed.clone(),
                desired: desired.clone(),
            }
        );
    }

    #[test]
    fn test_drift_downgrade() {
        let installed = Version::new(4, 0, 0);
        let desired = Version::new(3, 1, 0);
        assert_eq!(
            drift(&installed, &desired),
            VersionDrift::Downgrade {
                installed: installed.clone(),
                desired: desired.clone(),
            }
        );
    }

    #[test]
    fn test_drift_prerelease_is_not_equal() {
        let installed = parse_version("3.1.0-alpha.1").unwrap();
        let desired = Version::new(3, 1, 0);
        // Pre-release sorts below the release it precedes
        assert!(matches!(
            drift(&installed, &desired),
            VersionDrift::Outdated { .. }
        ));
    }
}

use semver::{Version, VersionReq};

/// Pads partial versions (`1`, `1.2`) to three components.
pub fn pad_version(version: &str) -> String {
    let parts: Vec<&str> = version.split('.').collect();
    match parts.len() {
        1 => format!("{}.0.0", version),
        2 => format!("{}.0", version),
        _ => version.to_string(),
    }
}

/// Lenient parse: accepts a leading `v` and partial versions.
pub fn parse_version(version: &str) -> Option<Version> {
    let trimmed = version.trim().trim_start_matches('v');
    Version::parse(&pad_version(trimmed)).ok()
}

/// Whether `installed` falls in any of `affected` (semver requirements such
/// as `>=1.0, <1.4.2`). With no ranges, anything below `fixed` is affected.
///
/// Unparseable versions never match.
pub fn is_affected(installed: &str, affected: &[String], fixed: Option<&str>) -> bool {
    let Some(installed) = parse_version(installed) else {
        return false;
    };

    if !affected.is_empty() {
        return affected
            .iter()
            .filter_map(|range| VersionReq::parse(range).ok())
            .any(|req| matches_including_prerelease(&req, &installed));
    }

    match fixed.and_then(parse_version) {
        Some(fixed) => installed < fixed,
        None => false,
    }
}

// VersionReq skips pre-releases unless a comparator names the same
// major.minor.patch; package revisions like `1.2.3-r1` must still match.
fn matches_including_prerelease(req: &VersionReq, version: &Version) -> bool {
    if req.matches(version) {
        return true;
    }
    if version.pre.is_empty() {
        return false;
    }
    req.comparators.iter().all(|c| c.matches(version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_version() {
        assert_eq!(pad_version("1"), "1.0.0");
        assert_eq!(pad_version("1.2"), "1.2.0");
        assert_eq!(pad_version("1.2.3"), "1.2.3");
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("v2.1"), Some(Version::new(2, 1, 0)));
        assert!(parse_version("not-a-version").is_none());
    }

    #[test]
    fn test_affected_ranges() {
        let ranges = vec![">=1.0, <1.4.2".to_string(), ">=2.0, <2.0.5".to_string()];

        assert!(is_affected("1.3.9", &ranges, None));
        assert!(is_affected("2.0.4", &ranges, None));
        assert!(!is_affected("1.4.2", &ranges, None));
        assert!(!is_affected("0.9.0", &ranges, None));
    }

    #[test]
    fn test_fixed_version_only() {
        assert!(is_affected("3.1.4", &[], Some("3.1.5")));
        assert!(!is_affected("3.1.5", &[], Some("3.1.5")));
        assert!(!is_affected("3.1.4", &[], None));
    }

    #[test]
    fn test_revision_suffix() {
        let ranges = vec!["<1.36.2".to_string()];
        assert!(is_affected("1.36.1-r5", &ranges, None));
    }

    #[test]
    fn test_unparseable_installed_version_never_matches() {
        assert!(!is_affected("latest", &["<9.0".to_string()], Some("9.0")));
    }
}

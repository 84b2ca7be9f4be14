//! Semver range parsing and satisfaction testing.
//!
//! Handles npm-flavored range syntax on top of the `semver` crate:
//! OR ranges (`^1.0.0 || ^2.0.0`), x-ranges (`1.x`, `*`), hyphen ranges
//! (`1.0.0 - 2.0.0`) and space-separated AND comparators (`>= 2.1.2 < 3.0.0`).

use crate::error::PkgError;
use semver::{Version, VersionReq};

/// Prefix marking a requirement pinned to a sibling workspace package.
pub const WORKSPACE_PROTOCOL: &str = "workspace:";

/// A parsed version range: one or more OR alternatives.
#[derive(Debug, Clone)]
pub struct RangeSet {
    raw: String,
    reqs: Vec<VersionReq>,
}

impl RangeSet {
    /// Parse an npm-style range expression.
    ///
    /// # Errors
    /// Returns an error if no alternative parses as a valid range.
    pub fn parse(raw: &str) -> Result<Self, PkgError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "latest" {
            // Empty ranges and the bare `latest` tag accept any version.
            return Ok(Self {
                raw: raw.to_string(),
                reqs: vec![VersionReq::STAR],
            });
        }

        let mut reqs = Vec::new();
        for alt in trimmed.split("||").map(str::trim) {
            if alt.is_empty() {
                continue;
            }
            if let Ok(req) = parse_single_range(alt) {
                reqs.push(req);
            }
        }

        if reqs.is_empty() {
            return Err(PkgError::range_invalid(format!(
                "Invalid version range '{raw}': no valid alternatives"
            )));
        }

        Ok(Self {
            raw: raw.to_string(),
            reqs,
        })
    }

    /// Whether any alternative matches the version.
    ///
    /// Pre-release versions only match when the alternative itself names a
    /// pre-release on the same version triple (the `semver` crate rule, which
    /// mirrors npm's).
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.reqs.iter().any(|req| req.matches(version))
    }

    /// The original range expression.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Pick the maximum version satisfying `range` from an ascending-sorted list.
///
/// # Errors
/// Returns an error if the range is invalid or no version satisfies it.
pub fn pick_version(name: &str, range: &str, sorted: &[Version]) -> Result<Version, PkgError> {
    let set = RangeSet::parse(range)?;
    sorted
        .iter()
        .rev()
        .find(|v| set.matches(v))
        .cloned()
        .ok_or_else(|| {
            PkgError::new(
                crate::error::codes::PKG_UNSATISFIABLE_RANGE,
                format!("No version of {name} satisfies range: {range}"),
            )
        })
}

/// Check whether a version string satisfies a range expression.
///
/// Invalid ranges or versions never match.
#[must_use]
pub fn version_satisfies(range: &str, version: &str) -> bool {
    let Ok(set) = RangeSet::parse(range) else {
        return false;
    };
    let Ok(v) = Version::parse(version) else {
        return false;
    };
    set.matches(&v)
}

/// Whether a range uses the `workspace:` protocol.
#[must_use]
pub fn is_workspace_range(range: &str) -> bool {
    range.trim().starts_with(WORKSPACE_PROTOCOL)
}

/// Check a `workspace:` range against a sibling workspace version.
///
/// `workspace:*`, `workspace:^` and `workspace:~` pin to the sibling no
/// matter its version; anything else is an ordinary range after the prefix.
#[must_use]
pub fn workspace_range_satisfied(range: &str, version: &str) -> bool {
    let Some(rest) = range.trim().strip_prefix(WORKSPACE_PROTOCOL) else {
        return false;
    };
    match rest {
        "*" | "^" | "~" | "" => true,
        other => version_satisfies(other, version),
    }
}

/// Parse a single (non-OR) range, handling npm-specific syntax.
fn parse_single_range(range: &str) -> Result<VersionReq, PkgError> {
    let range = range.trim();

    // Hyphen ranges: "1.0.0 - 2.0.0" -> ">=1.0.0, <=2.0.0"
    if let Some((start, end)) = parse_hyphen_range(range) {
        let converted = format!(">={start}, <={end}");
        return VersionReq::parse(&converted)
            .map_err(|e| PkgError::range_invalid(format!("Invalid version range '{range}': {e}")));
    }

    // X-ranges: "1.x" -> ">=1.0.0, <2.0.0"
    if range.contains('x') || range.contains('X') || range == "*" {
        let converted = convert_x_range(range);
        return VersionReq::parse(&converted)
            .map_err(|e| PkgError::range_invalid(format!("Invalid version range '{range}': {e}")));
    }

    // npm allows spaces between comparators to mean AND; Rust semver wants commas.
    let converted = convert_space_separated_comparators(range);

    VersionReq::parse(&converted)
        .map_err(|e| PkgError::range_invalid(format!("Invalid version range '{range}': {e}")))
}

/// Parse a hyphen range like "1.0.0 - 2.0.0".
fn parse_hyphen_range(range: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = range.split(" - ").collect();
    if parts.len() == 2 {
        let start = parts[0].trim();
        let end = parts[1].trim();
        if !start.is_empty() && !end.is_empty() {
            return Some((start.to_string(), end.to_string()));
        }
    }
    None
}

/// Convert space-separated comparators to comma-separated.
///
/// npm allows: ">= 2.1.2 < 3.0.0" which means ">=2.1.2 AND <3.0.0".
fn convert_space_separated_comparators(range: &str) -> String {
    let mut result = String::new();
    let mut need_comma = false;

    let mut pending_op = String::new();
    for token in range.split_whitespace() {
        if token_has_version(token) {
            if need_comma {
                result.push_str(", ");
            }
            result.push_str(&pending_op);
            result.push_str(token);
            pending_op.clear();
            need_comma = true;
        } else {
            // Bare operator; attach it to the next version token.
            pending_op.push_str(token);
        }
    }

    if result.is_empty() {
        return range.trim().to_string();
    }
    result
}

/// Check if a token contains a version number (has digits).
fn token_has_version(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
}

/// Convert an x-range to a plain semver range.
fn convert_x_range(range: &str) -> String {
    let range = range.trim();

    if range == "*" || range == "x" || range == "X" {
        return ">=0.0.0".to_string();
    }

    let parts: Vec<&str> = range.split('.').collect();

    match parts.as_slice() {
        [major, "x" | "X" | "*"] => {
            if let Ok(m) = major.parse::<u64>() {
                return format!(">={m}.0.0, <{}.0.0", m + 1);
            }
        }
        [major, minor, "x" | "X" | "*"] => {
            if let (Ok(m), Ok(n)) = (major.parse::<u64>(), minor.parse::<u64>()) {
                return format!(">={m}.{n}.0, <{m}.{}.0", n + 1);
            }
        }
        _ => {}
    }

    // Fallback: just replace x with 0
    range.replace(['x', 'X'], "0")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(strs: &[&str]) -> Vec<Version> {
        let mut v: Vec<Version> = strs.iter().map(|s| Version::parse(s).unwrap()).collect();
        v.sort();
        v
    }

    #[test]
    fn test_pick_caret_range() {
        let v = versions(&["1.0.0", "1.2.0", "2.0.0"]);
        let picked = pick_version("dep", "^1.0.0", &v).unwrap();
        assert_eq!(picked.to_string(), "1.2.0");
    }

    #[test]
    fn test_pick_tilde_range() {
        let v = versions(&["1.0.0", "1.0.5", "1.1.0", "2.0.0"]);
        let picked = pick_version("dep", "~1.0.0", &v).unwrap();
        assert_eq!(picked.to_string(), "1.0.5");
    }

    #[test]
    fn test_pick_exact() {
        let v = versions(&["1.0.0", "2.0.0", "3.0.0"]);
        let picked = pick_version("dep", "2.0.0", &v).unwrap();
        assert_eq!(picked.to_string(), "2.0.0");
    }

    #[test]
    fn test_pick_major_only() {
        let v = versions(&["1.0.0", "1.5.0", "2.0.0", "2.5.0"]);
        let picked = pick_version("dep", "2", &v).unwrap();
        assert_eq!(picked.to_string(), "2.5.0");
    }

    #[test]
    fn test_unsatisfiable_range() {
        let v = versions(&["1.0.0", "2.0.0"]);
        let err = pick_version("dep", "^3.0.0", &v).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::PKG_UNSATISFIABLE_RANGE);
    }

    #[test]
    fn test_prerelease_not_picked_by_plain_range() {
        let v = versions(&["1.0.0", "2.0.0-alpha.1", "2.0.0-beta.1", "2.0.0"]);
        let picked = pick_version("dep", "^2.0.0", &v).unwrap();
        assert_eq!(picked.to_string(), "2.0.0");
    }

    #[test]
    fn test_prerelease_picked_when_requested() {
        let v = versions(&["2.0.0-alpha.1", "2.0.0-beta.1"]);
        let picked = pick_version("dep", "^2.0.0-alpha.0", &v).unwrap();
        assert_eq!(picked.to_string(), "2.0.0-beta.1");
    }

    #[test]
    fn test_or_range_picks_highest() {
        let v = versions(&["1.5.0", "2.5.0"]);
        let picked = pick_version("dep", "^1.0.0 || ^2.0.0", &v).unwrap();
        assert_eq!(picked.to_string(), "2.5.0");
    }

    #[test]
    fn test_or_range_only_one_side_matches() {
        let v = versions(&["1.0.0", "1.5.0"]);
        let picked = pick_version("dep", "^1.0.0 || ^2.0.0", &v).unwrap();
        assert_eq!(picked.to_string(), "1.5.0");
    }

    #[test]
    fn test_or_range_without_spaces() {
        let v = versions(&["14.0.0", "15.0.0"]);
        let picked = pick_version("dep", "^14.0.0||^15.0.0", &v).unwrap();
        assert_eq!(picked.to_string(), "15.0.0");
    }

    #[test]
    fn test_x_range() {
        let v = versions(&["1.0.0", "1.5.0", "2.0.0"]);
        let picked = pick_version("dep", "1.x", &v).unwrap();
        assert_eq!(picked.to_string(), "1.5.0");
    }

    #[test]
    fn test_star_range() {
        let v = versions(&["1.0.0", "3.2.1"]);
        let picked = pick_version("dep", "*", &v).unwrap();
        assert_eq!(picked.to_string(), "3.2.1");
    }

    #[test]
    fn test_hyphen_range() {
        let v = versions(&["1.0.0", "1.5.0", "2.0.0", "3.0.0"]);
        let picked = pick_version("dep", "1.0.0 - 2.0.0", &v).unwrap();
        assert_eq!(picked.to_string(), "2.0.0");
    }

    #[test]
    fn test_space_separated_comparators() {
        let v = versions(&["2.0.0", "2.1.2", "2.5.0", "3.0.0"]);
        let picked = pick_version("dep", ">= 2.1.2 < 3.0.0", &v).unwrap();
        assert_eq!(picked.to_string(), "2.5.0");
    }

    #[test]
    fn test_invalid_range() {
        let v = versions(&["1.0.0"]);
        assert!(pick_version("dep", "not-a-range!!!", &v).is_err());
    }

    #[test]
    fn test_version_satisfies() {
        assert!(version_satisfies("^1.0.0", "1.2.3"));
        assert!(!version_satisfies("^1.0.0", "2.0.0"));
        assert!(!version_satisfies("^1.0.0", "garbage"));
    }

    #[test]
    fn test_workspace_ranges() {
        assert!(is_workspace_range("workspace:*"));
        assert!(!is_workspace_range("^1.0.0"));
        assert!(workspace_range_satisfied("workspace:*", "0.1.0"));
        assert!(workspace_range_satisfied("workspace:^", "0.1.0"));
        assert!(workspace_range_satisfied("workspace:^1.0.0", "1.4.0"));
        assert!(!workspace_range_satisfied("workspace:^1.0.0", "2.0.0"));
    }
}

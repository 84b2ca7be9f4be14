//! Package manager error types.

use std::fmt;
use std::io;
use std::path::Path;

/// Package manager error codes.
pub mod codes {
    pub const PKG_MANIFEST_NOT_FOUND: &str = "PKG_MANIFEST_NOT_FOUND";
    pub const PKG_MANIFEST_INVALID: &str = "PKG_MANIFEST_INVALID";
    pub const PKG_RANGE_INVALID: &str = "PKG_RANGE_INVALID";
    pub const PKG_NOT_FOUND: &str = "PKG_NOT_FOUND";
    pub const PKG_UNSATISFIABLE_RANGE: &str = "PKG_UNSATISFIABLE_RANGE";
    pub const PKG_NEEDS_NETWORK: &str = "PKG_NEEDS_NETWORK";
    pub const PKG_REGISTRY_ERROR: &str = "PKG_REGISTRY_ERROR";
    pub const PKG_DOWNLOAD_FAILED: &str = "PKG_DOWNLOAD_FAILED";
    pub const PKG_EXTRACT_FAILED: &str = "PKG_EXTRACT_FAILED";
    pub const PKG_CACHE_ERROR: &str = "PKG_CACHE_ERROR";
    pub const PKG_LINK_FAILED: &str = "PKG_LINK_FAILED";
    pub const PKG_FS_CONFLICT: &str = "PKG_FS_CONFLICT";
    pub const PKG_SYMLINK_UNSUPPORTED: &str = "PKG_SYMLINK_UNSUPPORTED";
    pub const PKG_PATCH_FAILED: &str = "PKG_PATCH_FAILED";
    pub const PKG_SCRIPT_FAILED: &str = "PKG_SCRIPT_FAILED";
}

/// Package manager error.
#[derive(Debug)]
pub struct PkgError {
    code: &'static str,
    message: String,
}

impl PkgError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this error would go away by allowing network access.
    #[must_use]
    pub fn is_needs_network(&self) -> bool {
        self.code == codes::PKG_NEEDS_NETWORK
    }

    /// Create a manifest not found error.
    #[must_use]
    pub fn manifest_not_found(path: &Path) -> Self {
        Self::new(
            codes::PKG_MANIFEST_NOT_FOUND,
            format!("package.json not found: {}", path.display()),
        )
    }

    /// Create a manifest invalid error.
    pub fn manifest_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_MANIFEST_INVALID, msg)
    }

    /// Create a range invalid error.
    pub fn range_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_RANGE_INVALID, msg)
    }

    /// Create a package not found error.
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::new(codes::PKG_NOT_FOUND, format!("Package not found: {name}"))
    }

    /// Create an unsatisfiable range error naming the requester chain.
    #[must_use]
    pub fn unsatisfiable(name: &str, range: &str, chain: &[String]) -> Self {
        let via = if chain.is_empty() {
            String::from("the project root")
        } else {
            chain.join(" > ")
        };
        Self::new(
            codes::PKG_UNSATISFIABLE_RANGE,
            format!("No version of {name} satisfies {range} (required via {via})"),
        )
    }

    /// Create a needs-network error (distinct from not-found so callers can
    /// decide to retry online).
    #[must_use]
    pub fn needs_network(name: &str) -> Self {
        Self::new(
            codes::PKG_NEEDS_NETWORK,
            format!("'{name}' requires a registry lookup but network access is disabled"),
        )
    }

    /// Create a registry error.
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_REGISTRY_ERROR, msg)
    }

    /// Create a download failed error.
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_DOWNLOAD_FAILED, msg)
    }

    /// Create an extraction failed error.
    pub fn extract_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_EXTRACT_FAILED, msg)
    }

    /// Create a cache error.
    pub fn cache_error(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_CACHE_ERROR, msg)
    }

    /// Create a link failed error.
    pub fn link_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_LINK_FAILED, msg)
    }

    /// Create a filesystem conflict error for an occupied link path.
    #[must_use]
    pub fn fs_conflict(path: &Path) -> Self {
        Self::new(
            codes::PKG_FS_CONFLICT,
            format!(
                "Refusing to replace {}: exists and is not a symlink",
                path.display()
            ),
        )
    }

    /// Create a symlinks-unsupported error with guidance.
    pub fn symlink_unsupported(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        Self::new(
            codes::PKG_SYMLINK_UNSUPPORTED,
            format!("{msg}; this filesystem does not support symlinks, use the hoisted linker (--linker hoisted)"),
        )
    }

    /// Create a patch failed error.
    pub fn patch_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_PATCH_FAILED, msg)
    }

    /// Create a script failed error.
    pub fn script_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_SCRIPT_FAILED, msg)
    }
}

impl fmt::Display for PkgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PkgError {}

impl From<io::Error> for PkgError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::PKG_CACHE_ERROR, e.to_string())
    }
}

impl From<serde_json::Error> for PkgError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(codes::PKG_MANIFEST_INVALID, format!("Invalid JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        let err = PkgError::range_invalid("bad range");
        assert_eq!(err.code(), codes::PKG_RANGE_INVALID);
        assert!(err.to_string().contains(codes::PKG_RANGE_INVALID));
    }

    #[test]
    fn test_unsatisfiable_names_requester_chain() {
        let chain = vec!["app@1.0.0".to_string(), "left-pad@1.3.0".to_string()];
        let err = PkgError::unsatisfiable("intersect", "^9.0.0", &chain);
        assert!(err.message().contains("app@1.0.0 > left-pad@1.3.0"));
        assert!(err.message().contains("^9.0.0"));
    }

    #[test]
    fn test_needs_network_is_distinct_from_not_found() {
        let offline = PkgError::needs_network("react");
        let missing = PkgError::not_found("react");
        assert!(offline.is_needs_network());
        assert!(!missing.is_needs_network());
        assert_ne!(offline.code(), missing.code());
    }

    #[test]
    fn test_error_codes_uppercase() {
        let all_codes = [
            codes::PKG_MANIFEST_NOT_FOUND,
            codes::PKG_MANIFEST_INVALID,
            codes::PKG_RANGE_INVALID,
            codes::PKG_NOT_FOUND,
            codes::PKG_UNSATISFIABLE_RANGE,
            codes::PKG_NEEDS_NETWORK,
            codes::PKG_REGISTRY_ERROR,
            codes::PKG_DOWNLOAD_FAILED,
            codes::PKG_EXTRACT_FAILED,
            codes::PKG_CACHE_ERROR,
            codes::PKG_LINK_FAILED,
            codes::PKG_FS_CONFLICT,
            codes::PKG_SYMLINK_UNSUPPORTED,
            codes::PKG_PATCH_FAILED,
            codes::PKG_SCRIPT_FAILED,
        ];

        for code in all_codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Error code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }
}

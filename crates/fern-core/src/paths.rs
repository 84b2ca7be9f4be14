use crate::config::Channel;
use std::path::{Path, PathBuf};

/// Cache layout version; bumped when the on-disk cache format changes.
const CACHE_SCHEMA_VERSION: u32 = 1;

/// Find the project root by walking up from `cwd` looking for `package.json`
/// or `.git`.
///
/// Returns the first directory containing either marker, or `None` if
/// neither is found.
#[must_use]
pub fn project_root(cwd: &Path) -> Option<PathBuf> {
    let mut current = cwd.to_path_buf();

    loop {
        if current.join("package.json").exists() || current.join(".git").exists() {
            return Some(current);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Get the cache directory for fern.
///
/// Uses platform-appropriate locations with versioning:
/// - Linux: `$XDG_CACHE_HOME/fern/v{N}/{channel}` or `~/.cache/fern/v{N}/{channel}`
/// - macOS: `~/Library/Caches/fern/v{N}/{channel}`
/// - Windows: `%LOCALAPPDATA%\fern\v{N}\{channel}`
#[must_use]
pub fn cache_dir(channel: Channel) -> PathBuf {
    let base = dirs_next::cache_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".fern-cache"),
                |p| p.join(".cache").join("fern"),
            )
        },
        |p| p.join("fern"),
    );

    base.join(format!("v{CACHE_SCHEMA_VERSION}"))
        .join(channel.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_project_root_walks_up() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        let nested = dir.path().join("src").join("deep");
        fs::create_dir_all(&nested).unwrap();

        let found = project_root(&nested).unwrap();
        assert_eq!(found.canonicalize().unwrap(), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_cache_dir_includes_channel() {
        let dir = cache_dir(Channel::Nightly);
        assert!(dir.to_string_lossy().contains("nightly"));
        assert!(dir.to_string_lossy().contains("v1"));
    }
}

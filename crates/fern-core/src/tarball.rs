//! Tarball extraction.
//!
//! Downloads go through [`crate::catalog::CatalogSource`]; this module only
//! turns the downloaded bytes into an extracted cache entry, atomically.

use crate::error::PkgError;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tar::Archive;

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// Verify that a downloaded tarball matches its expected integrity string.
///
/// Only `sha512-` integrity is checked; other algorithms (and absent
/// integrity) pass through, matching how registries actually publish.
///
/// # Errors
/// Returns an error if the checksum does not match.
pub fn verify_integrity(bytes: &[u8], expected: &str) -> Result<(), PkgError> {
    let Some(b64) = expected.strip_prefix("sha512-") else {
        return Ok(());
    };

    use sha2::{Digest, Sha512};
    let digest = Sha512::digest(bytes);

    if base64::encode(digest) == b64 {
        Ok(())
    } else {
        Err(PkgError::download_failed(format!(
            "Integrity mismatch: expected {expected}"
        )))
    }
}

/// Extract a tarball to a destination directory atomically.
///
/// Extraction happens to a temp directory first, then the package root is
/// renamed into place. A concurrent extraction of the same version is not an
/// error; whoever renames first wins and the loser discards its temp dir.
///
/// # Errors
/// Returns an error if extraction fails or the tarball is invalid.
pub fn extract_tgz_atomic(bytes: &[u8], dest_package_dir: &Path) -> Result<(), PkgError> {
    let version_dir = dest_package_dir
        .parent()
        .ok_or_else(|| PkgError::extract_failed("Destination has no parent"))?;

    fs::create_dir_all(version_dir)?;

    if dest_package_dir.exists() {
        return Ok(());
    }

    let temp_dir = version_dir.join(format!(".tmp-{}-{}", std::process::id(), rand_u32()));
    if temp_dir.exists() {
        let _ = fs::remove_dir_all(&temp_dir);
    }
    fs::create_dir_all(&temp_dir)?;

    if let Err(e) = extract_tgz_to(bytes, &temp_dir) {
        let _ = fs::remove_dir_all(&temp_dir);
        return Err(e);
    }

    // Most npm tarballs root their entries at `package/`, but some (e.g.
    // @types/*) use the bare package name. Find the actual root.
    let extracted_package = find_extracted_root(&temp_dir)?;

    match fs::rename(&extracted_package, dest_package_dir) {
        Ok(()) => {
            let _ = fs::remove_dir_all(&temp_dir);
            Ok(())
        }
        Err(e) => {
            // Lost the race to a concurrent extraction?
            if dest_package_dir.exists() {
                let _ = fs::remove_dir_all(&temp_dir);
                return Ok(());
            }

            // Cross-filesystem fallback.
            if let Err(copy_err) =
                fern_util::fs::copy_dir_all(&extracted_package, dest_package_dir)
            {
                let _ = fs::remove_dir_all(&temp_dir);
                return Err(PkgError::extract_failed(format!(
                    "Failed to move or copy extracted package: rename={e}, copy={copy_err}"
                )));
            }

            let _ = fs::remove_dir_all(&temp_dir);
            Ok(())
        }
    }
}

/// Find the single top-level directory in an extracted tarball.
fn find_extracted_root(temp_dir: &Path) -> Result<PathBuf, PkgError> {
    let package_dir = temp_dir.join("package");
    if package_dir.is_dir() {
        return Ok(package_dir);
    }

    let entries: Vec<_> = fs::read_dir(temp_dir)
        .map_err(|e| PkgError::extract_failed(format!("Failed to read extracted dir: {e}")))?
        .filter_map(std::result::Result::ok)
        .filter(|e| {
            e.file_type().map(|ft| ft.is_dir()).unwrap_or(false)
                && !e.file_name().to_string_lossy().starts_with('.')
        })
        .collect();

    match entries.len() {
        1 => Ok(entries[0].path()),
        0 => Err(PkgError::extract_failed(
            "Tarball does not contain any top-level directory",
        )),
        n => Err(PkgError::extract_failed(format!(
            "Tarball contains {n} top-level directories, expected 1"
        ))),
    }
}

fn extract_tgz_to(bytes: &[u8], dest: &Path) -> Result<(), PkgError> {
    let gz = GzDecoder::new(bytes);
    let mut archive = Archive::new(gz);

    for entry in archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entries: {e}")))?
    {
        let mut entry = entry
            .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entry: {e}")))?;

        let path = entry
            .path()
            .map_err(|e| PkgError::extract_failed(format!("Failed to read entry path: {e}")))?;
        let path_str = path.to_string_lossy();

        if path.is_absolute() {
            return Err(PkgError::extract_failed(format!(
                "Tarball contains absolute path: {path_str}"
            )));
        }
        for component in path.components() {
            if matches!(component, std::path::Component::ParentDir) {
                return Err(PkgError::extract_failed(format!(
                    "Tarball contains path traversal: {path_str}"
                )));
            }
        }

        let dest_path = dest.join(&*path);
        if !dest_path.starts_with(dest) {
            return Err(PkgError::extract_failed(format!(
                "Tarball entry escapes destination: {path_str}"
            )));
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else if entry.header().entry_type().is_file() {
            let mut file = File::create(&dest_path)?;
            io::copy(&mut entry, &mut file)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(mode) = entry.header().mode() {
                    let perms = fs::Permissions::from_mode(mode);
                    let _ = fs::set_permissions(&dest_path, perms);
                }
            }
        }
        // Skip symlinks and other special entries for security
    }

    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn rand_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    // Truncation is intentional: we just need some randomness for temp file names
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0),
    );
    hasher.finish() as u32
}

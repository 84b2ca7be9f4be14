use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Atomically write bytes to a file by writing to a temp file then renaming.
///
/// This provides crash-safety: the file will either have the old contents or
/// the new contents, never a partial write.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));

    // Create temp file in the same directory to ensure same filesystem for rename
    let mut temp_path = parent.to_path_buf();
    temp_path.push(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // On Windows, rename can fail if target exists. Try copy + remove as fallback.
            if cfg!(windows) {
                fs::copy(&temp_path, path)?;
                let _ = fs::remove_file(&temp_path);
                Ok(())
            } else {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}

/// Whether a rename failure indicates the source and target live on
/// different filesystems.
fn is_cross_device(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}

/// Move a fully written file into its final location.
///
/// Attempts a rename first. If the rename fails because the temp file and the
/// target directory are on different filesystems (EXDEV) or because of a
/// permission error on the rename itself, falls back to copy + remove. The
/// copy lands under a hidden temp name in the target directory and is renamed
/// into place, so a reader never observes a half-written target.
///
/// # Errors
/// Returns an error if both the rename and the copy fallback fail.
pub fn persist_file(src: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) || e.kind() == io::ErrorKind::PermissionDenied => {
            copy_into_place(src, dest)?;
            let _ = fs::remove_file(src);
            Ok(())
        }
        Err(_e) if cfg!(windows) => {
            // Windows rename fails when the target exists.
            copy_into_place(src, dest)?;
            let _ = fs::remove_file(src);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Copy `src` to `dest` via a temp file in `dest`'s directory plus rename,
/// so `dest` never holds partial contents.
fn copy_into_place(src: &Path, dest: &Path) -> io::Result<()> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    let staged = parent.join(format!(
        ".{}.copy.{}",
        dest.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    if let Err(e) = fs::copy(src, &staged) {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }

    match fs::rename(&staged, dest) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&staged);
            Err(e)
        }
    }
}

/// Recursively copy a directory tree.
///
/// Symlinks inside the tree are followed (the copy owns plain files).
///
/// # Errors
/// Returns an error if any entry cannot be read or written.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        if ty.is_dir() {
            copy_dir_all(&entry.path(), &dst.join(entry.file_name()))?;
        } else {
            fs::copy(entry.path(), dst.join(entry.file_name()))?;
        }
    }
    Ok(())
}

/// Compute the relative path from `base` (a directory) to `target`.
///
/// Both paths must be absolute (or share the same components up to their
/// divergence point). Used to keep symlink trees portable across moves of
/// the project root.
#[must_use]
pub fn relative_from(target: &Path, base: &Path) -> PathBuf {
    let target_parts: Vec<_> = target.components().collect();
    let base_parts: Vec<_> = base.components().collect();

    let mut common = 0;
    while common < target_parts.len()
        && common < base_parts.len()
        && target_parts[common] == base_parts[common]
    {
        common += 1;
    }

    let mut rel = PathBuf::new();
    for _ in common..base_parts.len() {
        rel.push("..");
    }
    for part in &target_parts[common..] {
        rel.push(part.as_os_str());
    }

    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

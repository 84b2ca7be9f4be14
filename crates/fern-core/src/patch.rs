//! Local patches applied to installed packages.
//!
//! `begin_patch` copies a package's pristine cache contents into a writable
//! scratch directory. After the user edits it, `commit_patch` diffs the
//! scratch tree against the pristine one, writes a single unified-diff file
//! under `patches/`, and records the patch in the root manifest.
//! `apply_patch` replays a committed patch onto a linked tree.

use crate::cache::PackageCache;
use crate::error::PkgError;
use crate::manifest;
use difference::{Changeset, Difference};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Scratch area under the project root.
const PATCH_WORK_DIR: &str = ".fern/patch-work";

/// Where committed patch files live, relative to the project root.
pub const PATCHES_DIR: &str = "patches";

/// Sidecar written into a scratch dir so commit knows what it diffs against.
const SOURCE_FILE: &str = ".fern-patch-source.json";

/// Context lines kept around each hunk.
const HUNK_CONTEXT: usize = 3;

#[derive(Debug, Serialize, Deserialize)]
struct PatchSource {
    key: String,
    name: String,
    version: String,
}

/// A committed patch.
#[derive(Debug, Clone)]
pub struct PatchRecord {
    /// `name@version` the patch applies to.
    pub key: String,
    /// Patch file path relative to the project root.
    pub patch_file: String,
}

/// Copy a package's pristine contents into a writable scratch directory.
///
/// # Errors
/// Returns an error if the package is not cached or the copy fails.
pub fn begin_patch(
    project_root: &Path,
    cache: &PackageCache,
    name: &str,
    version: &str,
) -> Result<PathBuf, PkgError> {
    let src = cache.package_dir(name, version);
    if !src.is_dir() {
        return Err(PkgError::patch_failed(format!(
            "'{name}@{version}' is not in the cache; install first"
        )));
    }

    let key = format!("{name}@{version}");
    let scratch = project_root.join(PATCH_WORK_DIR).join(flatten_key(&key));
    if scratch.exists() {
        fs::remove_dir_all(&scratch)?;
    }
    fern_util::fs::copy_dir_all(&src, &scratch)?;

    let source = PatchSource {
        key,
        name: name.to_string(),
        version: version.to_string(),
    };
    let json = serde_json::to_string_pretty(&source)
        .map_err(|e| PkgError::patch_failed(format!("Failed to write patch source: {e}")))?;
    fern_util::fs::atomic_write(&scratch.join(SOURCE_FILE), json.as_bytes())?;

    tracing::info!(key = %source.key, dir = %scratch.display(), "patch scratch ready");
    Ok(scratch)
}

/// Diff an edited scratch directory against its pristine source and land
/// the result in `patches/`.
///
/// The patch file is written to a temp path first and moved into place, so
/// a crash can never leave a half-written patch. A rename that fails with
/// a cross-device or permission error falls back to copying.
///
/// # Errors
/// Returns an error if the scratch dir is not a patch workspace, nothing
/// changed, or the patch cannot be written.
pub fn commit_patch(
    project_root: &Path,
    cache: &PackageCache,
    scratch: &Path,
) -> Result<PatchRecord, PkgError> {
    let source_path = scratch.join(SOURCE_FILE);
    let source: PatchSource = serde_json::from_str(
        &fs::read_to_string(&source_path)
            .map_err(|_| PkgError::patch_failed(format!(
                "{} is not a patch workspace (missing {SOURCE_FILE})",
                scratch.display()
            )))?,
    )
    .map_err(|e| PkgError::patch_failed(format!("Invalid patch source file: {e}")))?;

    let original = cache.package_dir(&source.name, &source.version);
    if !original.is_dir() {
        return Err(PkgError::patch_failed(format!(
            "'{}' is no longer in the cache",
            source.key
        )));
    }

    let patch_text = diff_trees(&original, scratch)?;
    if patch_text.is_empty() {
        return Err(PkgError::patch_failed(format!(
            "No changes detected in {}",
            scratch.display()
        )));
    }

    let patches_dir = project_root.join(PATCHES_DIR);
    fs::create_dir_all(&patches_dir)?;
    let file_name = format!("{}.patch", flatten_key(&source.key));
    let final_path = patches_dir.join(&file_name);

    // Stage next to the scratch dir, then move into place.
    let staged = project_root
        .join(PATCH_WORK_DIR)
        .join(format!(".{file_name}.tmp"));
    fern_util::fs::atomic_write(&staged, patch_text.as_bytes())?;
    fern_util::fs::persist_file(&staged, &final_path)?;

    let rel = format!("{PATCHES_DIR}/{file_name}");
    manifest::record_patched_dependency(project_root, &source.key, &rel)?;

    tracing::info!(key = %source.key, file = %rel, "patch committed");
    Ok(PatchRecord {
        key: source.key,
        patch_file: rel,
    })
}

/// Apply a committed patch file onto a package directory.
///
/// # Errors
/// Returns an error if the patch does not parse or a hunk does not match.
pub fn apply_patch(patch_file: &Path, target_dir: &Path) -> Result<(), PkgError> {
    let text = fs::read_to_string(patch_file)
        .map_err(|e| PkgError::patch_failed(format!("Failed to read patch: {e}")))?;

    for file_patch in parse_patch(&text)? {
        let target = target_dir.join(&file_patch.path);
        match file_patch.kind {
            FileChange::Removed => {
                if target.exists() {
                    fs::remove_file(&target)?;
                }
            }
            FileChange::Added(content) => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fern_util::fs::atomic_write(&target, content.as_bytes())?;
            }
            FileChange::Modified(hunks) => {
                let current = fs::read_to_string(&target).map_err(|e| {
                    PkgError::patch_failed(format!(
                        "Cannot patch {}: {e}",
                        file_patch.path
                    ))
                })?;
                let patched = apply_hunks(&current, &hunks, &file_patch.path)?;
                fern_util::fs::atomic_write(&target, patched.as_bytes())?;
            }
        }
    }

    Ok(())
}

/// Flatten `name@version` (possibly scoped) into a single path component.
fn flatten_key(key: &str) -> String {
    key.trim_start_matches('@').replace('/', "+")
}

/// Line-level operations between two versions of a file.
enum LineOp {
    Same(String),
    Add(String),
    Del(String),
}

struct Hunk {
    old_start: usize,
    old_len: usize,
    new_start: usize,
    new_len: usize,
    /// Lines prefixed with ' ', '+', or '-'.
    lines: Vec<String>,
}

struct FilePatch {
    path: String,
    kind: FileChange,
}

enum FileChange {
    Added(String),
    Removed,
    Modified(Vec<Hunk>),
}

/// Walk both trees and render a unified diff covering every difference.
fn diff_trees(original: &Path, edited: &Path) -> Result<String, PkgError> {
    let originals = collect_files(original)?;
    let editeds: Vec<String> = collect_files(edited)?
        .into_iter()
        .filter(|p| p != SOURCE_FILE)
        .collect();

    let mut out = String::new();

    for rel in &originals {
        let old_path = original.join(rel);
        if editeds.contains(rel) {
            let new_path = edited.join(rel);
            let (Ok(old), Ok(new)) = (fs::read_to_string(&old_path), fs::read_to_string(&new_path))
            else {
                if fs::read(&old_path)? != fs::read(&new_path)? {
                    tracing::warn!(file = %rel, "skipping non-UTF-8 file in patch");
                }
                continue;
            };
            if old != new {
                render_file_diff(&mut out, rel, &old, &new);
            }
        } else {
            out.push_str(&format!("--- a/{rel}\n+++ /dev/null\n"));
        }
    }

    for rel in &editeds {
        if !originals.contains(rel) {
            let Ok(content) = fs::read_to_string(edited.join(rel)) else {
                tracing::warn!(file = %rel, "skipping non-UTF-8 added file in patch");
                continue;
            };
            out.push_str(&format!("--- /dev/null\n+++ b/{rel}\n"));
            let lines: Vec<&str> = content.lines().collect();
            out.push_str(&format!("@@ -0,0 +1,{} @@\n", lines.len()));
            for line in lines {
                out.push_str(&format!("+{line}\n"));
            }
        }
    }

    Ok(out)
}

/// Sorted relative file paths under a directory.
fn collect_files(root: &Path) -> Result<Vec<String>, PkgError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry =
            entry.map_err(|e| PkgError::patch_failed(format!("Failed to walk tree: {e}")))?;
        if entry.file_type().is_file() {
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            files.push(rel);
        }
    }
    files.sort();
    Ok(files)
}

fn render_file_diff(out: &mut String, rel: &str, old: &str, new: &str) {
    let ops = line_ops(old, new);
    let hunks = build_hunks(&ops);
    if hunks.is_empty() {
        return;
    }

    out.push_str(&format!("--- a/{rel}\n+++ b/{rel}\n"));
    for hunk in hunks {
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            hunk.old_start, hunk.old_len, hunk.new_start, hunk.new_len
        ));
        for line in &hunk.lines {
            out.push_str(line);
            out.push('\n');
        }
    }
}

/// Flatten a [`Changeset`] into per-line operations.
fn line_ops(old: &str, new: &str) -> Vec<LineOp> {
    let changeset = Changeset::new(old, new, "\n");
    let mut ops = Vec::new();
    for diff in changeset.diffs {
        match diff {
            Difference::Same(text) => {
                ops.extend(text.split('\n').map(|l| LineOp::Same(l.to_string())));
            }
            Difference::Rem(text) => {
                ops.extend(text.split('\n').map(|l| LineOp::Del(l.to_string())));
            }
            Difference::Add(text) => {
                ops.extend(text.split('\n').map(|l| LineOp::Add(l.to_string())));
            }
        }
    }
    ops
}

/// Group changed lines into hunks with surrounding context.
fn build_hunks(ops: &[LineOp]) -> Vec<Hunk> {
    // Indices of ops that are part of any change.
    let changed: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, LineOp::Same(_)))
        .map(|(i, _)| i)
        .collect();
    if changed.is_empty() {
        return Vec::new();
    }

    // Merge changes whose context windows touch into ranges of op indices.
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &idx in &changed {
        let start = idx.saturating_sub(HUNK_CONTEXT);
        let end = (idx + HUNK_CONTEXT + 1).min(ops.len());
        match ranges.last_mut() {
            Some((_, prev_end)) if start <= *prev_end => *prev_end = end.max(*prev_end),
            _ => ranges.push((start, end)),
        }
    }

    // Walk ops once, tracking both line counters, and emit each range.
    let mut hunks = Vec::new();
    let mut old_line = 1usize;
    let mut new_line = 1usize;
    let mut range_iter = ranges.iter();
    let mut current = range_iter.next();

    let mut hunk: Option<Hunk> = None;
    for (i, op) in ops.iter().enumerate() {
        if let Some(&(start, end)) = current {
            if i == start {
                hunk = Some(Hunk {
                    old_start: old_line,
                    old_len: 0,
                    new_start: new_line,
                    new_len: 0,
                    lines: Vec::new(),
                });
            }
            if let Some(h) = hunk.as_mut() {
                match op {
                    LineOp::Same(l) => {
                        h.old_len += 1;
                        h.new_len += 1;
                        h.lines.push(format!(" {l}"));
                    }
                    LineOp::Del(l) => {
                        h.old_len += 1;
                        h.lines.push(format!("-{l}"));
                    }
                    LineOp::Add(l) => {
                        h.new_len += 1;
                        h.lines.push(format!("+{l}"));
                    }
                }
            }
            if i + 1 == end {
                if let Some(h) = hunk.take() {
                    hunks.push(h);
                }
                current = range_iter.next();
            }
        }

        match op {
            LineOp::Same(_) => {
                old_line += 1;
                new_line += 1;
            }
            LineOp::Del(_) => old_line += 1,
            LineOp::Add(_) => new_line += 1,
        }
    }
    if let Some(h) = hunk.take() {
        hunks.push(h);
    }

    hunks
}

fn parse_patch(text: &str) -> Result<Vec<FilePatch>, PkgError> {
    let mut patches: Vec<FilePatch> = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(old_header) = line.strip_prefix("--- ") else {
            continue;
        };
        let new_header = lines
            .next()
            .and_then(|l| l.strip_prefix("+++ "))
            .ok_or_else(|| PkgError::patch_failed("Malformed patch: missing +++ header"))?;

        if new_header == "/dev/null" {
            let path = old_header
                .strip_prefix("a/")
                .ok_or_else(|| PkgError::patch_failed("Malformed patch header"))?;
            patches.push(FilePatch {
                path: path.to_string(),
                kind: FileChange::Removed,
            });
            continue;
        }

        let path = new_header
            .strip_prefix("b/")
            .ok_or_else(|| PkgError::patch_failed("Malformed patch header"))?
            .to_string();

        let mut hunks = Vec::new();
        while let Some(peek) = lines.peek() {
            if !peek.starts_with("@@ ") {
                break;
            }
            let header = lines.next().unwrap_or_default();
            let (old_start, old_len, new_start, new_len) = parse_hunk_header(header)?;
            let mut body = Vec::new();
            while let Some(peek) = lines.peek() {
                if peek.starts_with("@@ ") || peek.starts_with("--- ") {
                    break;
                }
                body.push(lines.next().unwrap_or_default().to_string());
            }
            hunks.push(Hunk {
                old_start,
                old_len,
                new_start,
                new_len,
                lines: body,
            });
        }

        if old_header == "/dev/null" {
            let content: String = hunks
                .iter()
                .flat_map(|h| &h.lines)
                .filter_map(|l| l.strip_prefix('+'))
                .map(|l| format!("{l}\n"))
                .collect();
            patches.push(FilePatch {
                path,
                kind: FileChange::Added(content),
            });
        } else {
            patches.push(FilePatch {
                path,
                kind: FileChange::Modified(hunks),
            });
        }
    }

    Ok(patches)
}

fn parse_hunk_header(header: &str) -> Result<(usize, usize, usize, usize), PkgError> {
    let malformed = || PkgError::patch_failed(format!("Malformed hunk header: {header}"));
    let inner = header
        .trim_start_matches("@@ ")
        .trim_end_matches(" @@");
    let (old, new) = inner.split_once(' ').ok_or_else(malformed)?;

    let parse_pair = |s: &str, prefix: char| -> Result<(usize, usize), PkgError> {
        let s = s.strip_prefix(prefix).ok_or_else(malformed)?;
        let (start, len) = match s.split_once(',') {
            Some((a, b)) => (a, b),
            None => (s, "1"),
        };
        Ok((
            start.parse().map_err(|_| malformed())?,
            len.parse().map_err(|_| malformed())?,
        ))
    };

    let (old_start, old_len) = parse_pair(old, '-')?;
    let (new_start, new_len) = parse_pair(new, '+')?;
    Ok((old_start, old_len, new_start, new_len))
}

/// Apply hunks to file content, verifying context and deleted lines match.
fn apply_hunks(content: &str, hunks: &[Hunk], path: &str) -> Result<String, PkgError> {
    let old_lines: Vec<&str> = content.split('\n').collect();
    let mut out: Vec<String> = Vec::new();
    // 0-based cursor into old_lines.
    let mut cursor = 0usize;

    for hunk in hunks {
        let hunk_start = hunk.old_start.saturating_sub(1);
        if hunk_start < cursor {
            return Err(PkgError::patch_failed(format!(
                "Overlapping hunks in patch for {path}"
            )));
        }
        out.extend(old_lines[cursor..hunk_start].iter().map(ToString::to_string));
        cursor = hunk_start;

        for line in &hunk.lines {
            let (tag, text) = line.split_at(usize::from(!line.is_empty()));
            match tag {
                " " | "" => {
                    if old_lines.get(cursor).copied() != Some(text) {
                        return Err(PkgError::patch_failed(format!(
                            "Context mismatch applying patch to {path} at line {}",
                            cursor + 1
                        )));
                    }
                    out.push(text.to_string());
                    cursor += 1;
                }
                "-" => {
                    if old_lines.get(cursor).copied() != Some(text) {
                        return Err(PkgError::patch_failed(format!(
                            "Deleted line mismatch applying patch to {path} at line {}",
                            cursor + 1
                        )));
                    }
                    cursor += 1;
                }
                "+" => out.push(text.to_string()),
                _ => {
                    return Err(PkgError::patch_failed(format!(
                        "Unexpected patch line in {path}: {line}"
                    )));
                }
            }
        }
    }

    out.extend(old_lines[cursor..].iter().map(ToString::to_string));
    Ok(out.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed_cache(cache: &PackageCache, name: &str, version: &str) -> PathBuf {
        let dir = cache.package_dir(name, version);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("package.json"),
            format!(r#"{{"name":"{name}","version":"{version}"}}"#),
        )
        .unwrap();
        fs::write(
            dir.join("index.js"),
            "function hello() {\n  return 'hello';\n}\nmodule.exports = hello;\n",
        )
        .unwrap();
        dir
    }

    fn setup() -> (tempfile::TempDir, tempfile::TempDir, PackageCache) {
        let project = tempdir().unwrap();
        fs::write(
            project.path().join("package.json"),
            r#"{"name":"app","version":"1.0.0"}"#,
        )
        .unwrap();
        let cache_dir = tempdir().unwrap();
        let cache = PackageCache::with_root(cache_dir.path().to_path_buf());
        (project, cache_dir, cache)
    }

    #[test]
    fn test_begin_edit_commit_apply_round() {
        let (project, _cache_dir, cache) = setup();
        seed_cache(&cache, "dep", "1.0.0");

        let scratch = begin_patch(project.path(), &cache, "dep", "1.0.0").unwrap();
        assert!(scratch.join("index.js").is_file());

        fs::write(
            scratch.join("index.js"),
            "function hello() {\n  return 'patched';\n}\nmodule.exports = hello;\n",
        )
        .unwrap();

        let record = commit_patch(project.path(), &cache, &scratch).unwrap();
        assert_eq!(record.key, "dep@1.0.0");
        let patch_path = project.path().join(&record.patch_file);
        assert!(patch_path.is_file());

        let patch_text = fs::read_to_string(&patch_path).unwrap();
        assert!(patch_text.contains("--- a/index.js"));
        assert!(patch_text.contains("-  return 'hello';"));
        assert!(patch_text.contains("+  return 'patched';"));
        // The sidecar never leaks into the patch.
        assert!(!patch_text.contains(SOURCE_FILE));

        // The manifest now records the patch.
        let manifest_text = fs::read_to_string(project.path().join("package.json")).unwrap();
        assert!(manifest_text.contains("patchedDependencies"));
        assert!(manifest_text.contains("dep@1.0.0"));

        // Apply onto a fresh copy of the pristine contents.
        let target = project.path().join("node_modules").join("dep");
        fern_util::fs::copy_dir_all(&cache.package_dir("dep", "1.0.0"), &target).unwrap();
        apply_patch(&patch_path, &target).unwrap();
        let patched = fs::read_to_string(target.join("index.js")).unwrap();
        assert!(patched.contains("return 'patched';"));
        assert!(!patched.contains("return 'hello';"));
    }

    #[test]
    fn test_added_and_removed_files() {
        let (project, _cache_dir, cache) = setup();
        seed_cache(&cache, "dep", "1.0.0");

        let scratch = begin_patch(project.path(), &cache, "dep", "1.0.0").unwrap();
        fs::write(scratch.join("extra.js"), "module.exports = 1;\n").unwrap();
        fs::remove_file(scratch.join("index.js")).unwrap();

        let record = commit_patch(project.path(), &cache, &scratch).unwrap();
        let patch_path = project.path().join(&record.patch_file);

        let target = project.path().join("node_modules").join("dep");
        fern_util::fs::copy_dir_all(&cache.package_dir("dep", "1.0.0"), &target).unwrap();
        apply_patch(&patch_path, &target).unwrap();

        assert!(target.join("extra.js").is_file());
        assert!(!target.join("index.js").exists());
    }

    #[test]
    fn test_commit_without_changes_fails() {
        let (project, _cache_dir, cache) = setup();
        seed_cache(&cache, "dep", "1.0.0");

        let scratch = begin_patch(project.path(), &cache, "dep", "1.0.0").unwrap();
        let err = commit_patch(project.path(), &cache, &scratch).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::PKG_PATCH_FAILED);
    }

    #[test]
    fn test_no_partial_patch_file_on_disk() {
        let (project, _cache_dir, cache) = setup();
        seed_cache(&cache, "dep", "1.0.0");

        let scratch = begin_patch(project.path(), &cache, "dep", "1.0.0").unwrap();
        fs::write(scratch.join("index.js"), "changed\n").unwrap();
        commit_patch(project.path(), &cache, &scratch).unwrap();

        // Only the finished patch lives in patches/; no temp leftovers.
        let entries: Vec<_> = fs::read_dir(project.path().join(PATCHES_DIR))
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["dep@1.0.0.patch"]);
    }

    #[test]
    fn test_context_mismatch_rejected() {
        let hunks = vec![Hunk {
            old_start: 1,
            old_len: 1,
            new_start: 1,
            new_len: 1,
            lines: vec!["-does not exist".to_string(), "+replacement".to_string()],
        }];
        let err = apply_hunks("actual content\n", &hunks, "x.js").unwrap_err();
        assert_eq!(err.code(), crate::error::codes::PKG_PATCH_FAILED);
    }

    #[test]
    fn test_flatten_key_scoped() {
        assert_eq!(flatten_key("@scope/pkg@1.0.0"), "scope+pkg@1.0.0");
        assert_eq!(flatten_key("dep@1.0.0"), "dep@1.0.0");
    }

    #[test]
    fn test_hunk_grouping_keeps_context_small() {
        let old: String = (1..=40).map(|i| format!("line {i}\n")).collect();
        let new = old.replace("line 5\n", "line five\n").replace("line 30\n", "line thirty\n");

        let ops = line_ops(&old, &new);
        let hunks = build_hunks(&ops);
        // Two changes far apart become two hunks, not one giant one.
        assert_eq!(hunks.len(), 2);
        assert!(hunks[0].old_len <= 2 * HUNK_CONTEXT + 2);
    }
}

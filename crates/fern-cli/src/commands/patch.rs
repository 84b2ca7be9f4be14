//! `fern patch` and `fern patch-commit` command implementations.
//!
//! `patch` copies a cached package into a writable scratch directory;
//! `patch-commit` diffs the edits and lands a patch file in `patches/`.

use fern_core::cache::PackageCache;
use fern_core::config::Channel;
use fern_core::{patch, PkgError};
use miette::Result;
use std::path::Path;

pub fn begin(cwd: &Path, spec: &str, channel: Channel, json: bool) -> Result<()> {
    let project_root = fern_core::paths::project_root(cwd).unwrap_or_else(|| cwd.to_path_buf());

    let Some((name, version)) = split_spec(spec) else {
        eprintln!("error: expected a name@version spec, got '{spec}'");
        std::process::exit(2);
    };

    let cache = PackageCache::new(channel);
    match patch::begin_patch(&project_root, &cache, name, version) {
        Ok(scratch) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "ok": true,
                        "package": spec,
                        "dir": scratch.to_string_lossy(),
                    }))
                    .unwrap()
                );
            } else {
                println!("Edit {} freely, then run:", scratch.display());
                println!("  fern patch-commit {}", scratch.display());
            }
            Ok(())
        }
        Err(err) => fail(&err, json),
    }
}

pub fn commit(cwd: &Path, dir: &Path, channel: Channel, json: bool) -> Result<()> {
    let project_root = fern_core::paths::project_root(cwd).unwrap_or_else(|| cwd.to_path_buf());
    let scratch = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        cwd.join(dir)
    };

    let cache = PackageCache::new(channel);
    match patch::commit_patch(&project_root, &cache, &scratch) {
        Ok(record) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "ok": true,
                        "package": record.key,
                        "patchFile": record.patch_file,
                    }))
                    .unwrap()
                );
            } else {
                println!("saved {} for {}", record.patch_file, record.key);
            }
            Ok(())
        }
        Err(err) => fail(&err, json),
    }
}

// "@scope/pkg@1.0.0" splits at the last '@'.
fn split_spec(spec: &str) -> Option<(&str, &str)> {
    let at = spec.rfind('@')?;
    if at == 0 {
        return None;
    }
    let (name, version) = (&spec[..at], &spec[at + 1..]);
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name, version))
}

fn fail(err: &PkgError, json: bool) -> Result<()> {
    super::report_error(err, json);
    std::process::exit(super::exit_code_for(err));
}

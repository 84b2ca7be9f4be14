//! `fern install` command implementation.
//!
//! Resolves the dependency graph, updates the lockfile, populates the
//! cache, and lays out node_modules.

use fern_core::cache::PackageCache;
use fern_core::catalog::RegistryClient;
use fern_core::config::Channel;
use fern_core::link::LinkerKind;
use fern_core::{install, InstallContext, InstallOptions, InstallReport, NetworkMode};
use miette::{miette, Result};
use std::path::PathBuf;

pub struct InstallAction {
    pub cwd: PathBuf,
    pub frozen_lockfile: bool,
    pub prefer_offline: bool,
    pub offline: bool,
    pub linker: Option<String>,
    pub include_dev: bool,
    pub include_optional: bool,
}

pub fn run(action: InstallAction, channel: Channel, json: bool) -> Result<()> {
    let network = if action.offline {
        NetworkMode::Offline
    } else if action.prefer_offline {
        NetworkMode::PreferOffline
    } else {
        NetworkMode::Online
    };

    let linker = match action.linker.as_deref() {
        None => None,
        Some(s) => match LinkerKind::parse(s) {
            Some(kind) => Some(kind),
            None => {
                eprintln!("error: unknown linker '{s}'. Use: hoisted or isolated");
                std::process::exit(2);
            }
        },
    };

    let options = InstallOptions {
        include_dev: action.include_dev,
        include_optional: action.include_optional,
        frozen_lockfile: action.frozen_lockfile,
        linker,
    };

    let project_root = fern_core::paths::project_root(&action.cwd)
        .unwrap_or_else(|| action.cwd.clone());

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| miette!("failed to start async runtime: {e}"))?;

    let span = tracing::info_span!("install", cwd = %project_root.display());
    let _guard = span.enter();

    let catalog = match RegistryClient::from_env() {
        Ok(c) => c,
        Err(err) => {
            super::report_error(&err, json);
            std::process::exit(super::exit_code_for(&err));
        }
    };
    let cache = PackageCache::new(channel);
    let ctx = InstallContext::new(&catalog, &cache).with_network(network);

    let report = runtime.block_on(install(&project_root, &ctx, &options));

    match report {
        Ok(report) => {
            print_report(&report, json);
            Ok(())
        }
        Err(err) => {
            super::report_error(&err, json);
            std::process::exit(super::exit_code_for(&err));
        }
    }
}

fn print_report(report: &InstallReport, json: bool) {
    if json {
        let warnings: Vec<_> = report
            .warnings
            .iter()
            .map(|w| {
                serde_json::json!({
                    "package": w.package,
                    "peer": w.peer,
                    "range": w.range,
                    "found": w.found,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "ok": true,
                "resolved": report.resolved,
                "fetchedMetadata": report.fetched_metadata,
                "reused": report.reused,
                "downloaded": report.downloaded,
                "linked": report.link.linked,
                "storeEntries": report.link.store_entries,
                "lockfileWritten": report.lockfile_written,
                "patchesApplied": report.patches_applied,
                "diff": {
                    "added": report.diff.added,
                    "removed": report.diff.removed,
                    "changed": report.diff.changed,
                },
                "warnings": warnings,
            }))
            .unwrap()
        );
        return;
    }

    println!(
        "resolved {} packages ({} from lockfile, {} metadata fetches)",
        report.resolved, report.reused, report.fetched_metadata
    );
    if report.downloaded > 0 {
        println!("downloaded {} tarballs", report.downloaded);
    }
    println!("linked {} packages", report.link.linked);
    if report.patches_applied > 0 {
        println!("applied {} patches", report.patches_applied);
    }
    if report.lockfile_written {
        if report.diff.is_empty() {
            println!("wrote fern.lock");
        } else {
            println!(
                "wrote fern.lock (+{} -{} ~{})",
                report.diff.added.len(),
                report.diff.removed.len(),
                report.diff.changed.len()
            );
        }
    } else {
        println!("fern.lock is up to date");
    }
    for w in &report.warnings {
        match &w.found {
            Some(found) => eprintln!(
                "warn: {} wants peer {}@{} but {} is installed",
                w.package, w.peer, w.range, found
            ),
            None => eprintln!(
                "warn: {} wants peer {}@{} but it is not installed",
                w.package, w.peer, w.range
            ),
        }
    }
}

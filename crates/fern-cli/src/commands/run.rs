//! `fern run` command implementation.
//!
//! Runs a package.json script in every workspace package that defines it,
//! in dependency order unless --parallel is given.

use fern_core::manifest::ManifestOptions;
use fern_core::scripts::{run_workspace_scripts, ProcessRunner, ScheduleMode, ScriptStatus};
use fern_core::workspaces;
use fern_core::{manifest, PkgError};
use miette::{miette, Result};
use std::path::Path;

pub fn run(cwd: &Path, script: &str, parallel: bool, json: bool) -> Result<()> {
    let project_root = fern_core::paths::project_root(cwd).unwrap_or_else(|| cwd.to_path_buf());

    let mode = if parallel {
        ScheduleMode::Parallel
    } else {
        ScheduleMode::Ordered
    };

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| miette!("failed to start async runtime: {e}"))?;

    let span = tracing::info_span!("run", script, cwd = %project_root.display());
    let _guard = span.enter();

    let report = runtime.block_on(async {
        let opts = ManifestOptions::default();
        let root = manifest::read_manifest(&project_root, &opts)?;
        let ws = workspaces::discover_workspaces(&project_root, &root.workspaces, &opts);
        run_workspace_scripts(&ws, script, mode, &ProcessRunner).await
    });

    match report {
        Ok(report) => {
            if json {
                let results: Vec<_> = report
                    .results
                    .iter()
                    .map(|r| {
                        let status = match r.status {
                            ScriptStatus::Success => "success".to_string(),
                            ScriptStatus::Failed(code) => format!("failed ({code})"),
                            ScriptStatus::Skipped => "skipped".to_string(),
                        };
                        serde_json::json!({ "package": r.package, "status": status })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "ok": report.exit_code == 0,
                        "script": script,
                        "exitCode": report.exit_code,
                        "results": results,
                    }))
                    .unwrap()
                );
            } else {
                for r in &report.results {
                    match r.status {
                        ScriptStatus::Success => println!("  {} ok", r.package),
                        ScriptStatus::Failed(code) => {
                            println!("  {} failed (exit {code})", r.package);
                        }
                        ScriptStatus::Skipped => println!("  {} skipped", r.package),
                    }
                }
            }
            if report.exit_code != 0 {
                std::process::exit(report.exit_code);
            }
            Ok(())
        }
        Err(err) => fail(&err, json),
    }
}

fn fail(err: &PkgError, json: bool) -> Result<()> {
    super::report_error(err, json);
    std::process::exit(super::exit_code_for(err));
}

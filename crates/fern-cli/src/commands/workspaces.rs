//! `fern workspaces` command implementation.
//!
//! List workspace packages in a monorepo.

use fern_core::manifest::ManifestOptions;
use fern_core::workspaces::{discover_workspaces, find_workspace_root};
use fern_core::{manifest, PkgError};
use miette::Result;
use std::path::Path;

pub fn run(cwd: &Path, json: bool) -> Result<()> {
    let root = find_workspace_root(cwd).unwrap_or_else(|| cwd.to_path_buf());

    let opts = ManifestOptions::default();
    let root_manifest = match manifest::read_manifest(&root, &opts) {
        Ok(m) => m,
        Err(err) => return fail(&err, json),
    };
    let set = discover_workspaces(&root, &root_manifest.workspaces, &opts);

    if set.is_empty() {
        if json {
            println!(
                "{}",
                serde_json::json!({
                    "ok": true,
                    "workspaces": false,
                    "packages": []
                })
            );
        } else {
            println!("No workspaces configured.");
            println!("hint: Add a \"workspaces\" field to package.json");
        }
        return Ok(());
    }

    let packages: Vec<_> = set.packages.values().collect();

    if json {
        let pkg_list: Vec<_> = packages
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "version": p.version,
                    "path": p.path.to_string_lossy()
                })
            })
            .collect();

        println!(
            "{}",
            serde_json::json!({
                "ok": true,
                "workspaces": true,
                "root": root.to_string_lossy(),
                "packages": pkg_list
            })
        );
    } else {
        println!("Workspace root: {}", root.display());
        println!();
        println!("Packages ({}):", packages.len());
        for pkg in &packages {
            println!("  {} @ {}", pkg.name, pkg.version);
            println!("    {}", pkg.path.display());
        }
    }

    Ok(())
}

fn fail(err: &PkgError, json: bool) -> Result<()> {
    super::report_error(err, json);
    std::process::exit(super::exit_code_for(err));
}

//! Lifecycle script scheduling across workspace packages.
//!
//! Ordered mode respects workspace dependency edges: a package's script
//! starts only after every workspace package it depends on has finished
//! successfully. Cycles collapse into one strongly-connected group that
//! runs concurrently. Parallel mode ignores edges entirely. In both modes
//! a package's `pre<script>` / `<script>` / `post<script>` run in sequence,
//! stopping at the first non-zero exit.

use crate::error::PkgError;
use crate::workspaces::{WorkspacePackage, WorkspaceSet};
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::path::Path;

/// How scripts are ordered across packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleMode {
    /// Workspace dependency order; cycles run as one concurrent batch.
    #[default]
    Ordered,
    /// Everything at once.
    Parallel,
}

/// Executes a single script command. Pluggable so tests can record
/// invocations instead of spawning processes.
pub trait ScriptRunner: Sync {
    /// Run `command` in `dir`, returning the exit code.
    fn run(
        &self,
        dir: &Path,
        package: &str,
        script: &str,
        command: &str,
    ) -> impl std::future::Future<Output = Result<i32, PkgError>> + Send;
}

/// Runs scripts through the platform shell.
pub struct ProcessRunner;

impl ScriptRunner for ProcessRunner {
    async fn run(
        &self,
        dir: &Path,
        package: &str,
        script: &str,
        command: &str,
    ) -> Result<i32, PkgError> {
        tracing::info!(package, script, command, "running script");

        #[cfg(unix)]
        let mut cmd = {
            let mut c = tokio::process::Command::new("sh");
            c.arg("-c");
            c
        };
        #[cfg(windows)]
        let mut cmd = {
            let mut c = tokio::process::Command::new("cmd");
            c.arg("/C");
            c
        };

        let status = cmd
            .arg(command)
            .current_dir(dir)
            .status()
            .await
            .map_err(|e| {
                PkgError::script_failed(format!("Failed to spawn '{script}' in {package}: {e}"))
            })?;

        Ok(status.code().unwrap_or(1))
    }
}

/// Outcome for one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStatus {
    Success,
    Failed(i32),
    /// Not run because a workspace dependency failed.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ScriptResult {
    pub package: String,
    pub status: ScriptStatus,
}

/// What the scheduler did.
#[derive(Debug)]
pub struct ScriptReport {
    /// Per-package outcomes, in workspace name order.
    pub results: Vec<ScriptResult>,
    /// Zero when everything succeeded; otherwise the first failure's code
    /// in dependency order (ordered mode) or the highest code (parallel).
    pub exit_code: i32,
}

/// Run a named script across every workspace package that defines it.
///
/// # Errors
/// Returns an error only when a script cannot be spawned at all; a script
/// exiting non-zero is reported through the `ScriptReport`.
pub async fn run_workspace_scripts<R: ScriptRunner>(
    workspaces: &WorkspaceSet,
    script: &str,
    mode: ScheduleMode,
    runner: &R,
) -> Result<ScriptReport, PkgError> {
    let members: Vec<&WorkspacePackage> = workspaces
        .packages
        .values()
        .filter(|p| p.manifest.scripts.contains_key(script))
        .collect();

    if members.is_empty() {
        tracing::warn!(script, "no workspace package defines this script");
        return Ok(ScriptReport {
            results: Vec::new(),
            exit_code: 0,
        });
    }

    let name_to_idx: BTreeMap<&str, usize> = members
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name.as_str(), i))
        .collect();

    // deps[i] = member indices that i depends on.
    let deps: Vec<Vec<usize>> = members
        .iter()
        .map(|p| match mode {
            ScheduleMode::Parallel => Vec::new(),
            ScheduleMode::Ordered => p
                .manifest
                .requirements
                .iter()
                .filter_map(|r| name_to_idx.get(r.name.as_str()).copied())
                .collect(),
        })
        .collect();

    let components = strongly_connected(&deps);
    let schedule = build_schedule(&components, &deps);
    let statuses = run_schedule(&members, &components, &schedule, script, runner).await?;

    let mut exit_code = 0;
    match mode {
        ScheduleMode::Ordered => {
            // First failure in dependency (component emission) order.
            for component in &components {
                for &m in component {
                    if let ScriptStatus::Failed(code) = statuses[m] {
                        if exit_code == 0 {
                            exit_code = code;
                        }
                    }
                }
            }
        }
        ScheduleMode::Parallel => {
            for status in &statuses {
                if let ScriptStatus::Failed(code) = status {
                    exit_code = exit_code.max(*code);
                }
            }
        }
    }

    let results = members
        .iter()
        .zip(&statuses)
        .map(|(p, status)| ScriptResult {
            package: p.name.clone(),
            status: status.clone(),
        })
        .collect();

    Ok(ScriptReport { results, exit_code })
}

/// Per-component scheduling metadata.
struct Schedule {
    /// Component indices each component waits on.
    remaining: Vec<usize>,
    /// Reverse edges: who to notify on completion.
    dependents: Vec<Vec<usize>>,
}

fn build_schedule(components: &[Vec<usize>], deps: &[Vec<usize>]) -> Schedule {
    let mut member_comp = vec![0usize; deps.len()];
    for (c, component) in components.iter().enumerate() {
        for &m in component {
            member_comp[m] = c;
        }
    }

    let mut remaining = vec![0usize; components.len()];
    let mut dependents = vec![Vec::new(); components.len()];
    for (c, component) in components.iter().enumerate() {
        let mut waits_on: Vec<usize> = component
            .iter()
            .flat_map(|&m| deps[m].iter().map(|&d| member_comp[d]))
            .filter(|&d| d != c)
            .collect();
        waits_on.sort_unstable();
        waits_on.dedup();
        remaining[c] = waits_on.len();
        for d in waits_on {
            dependents[d].push(c);
        }
    }

    Schedule {
        remaining,
        dependents,
    }
}

async fn run_schedule<R: ScriptRunner>(
    members: &[&WorkspacePackage],
    components: &[Vec<usize>],
    schedule: &Schedule,
    script: &str,
    runner: &R,
) -> Result<Vec<ScriptStatus>, PkgError> {
    let mut statuses = vec![ScriptStatus::Skipped; members.len()];
    let mut remaining = schedule.remaining.clone();
    let mut skipped = vec![false; components.len()];

    let run_component = |c: usize| async move {
        let runs = components[c].iter().map(|&m| async move {
            let result = run_package_script(members[m], script, runner).await;
            (m, result)
        });
        (c, join_all(runs).await)
    };

    let mut in_flight = FuturesUnordered::new();
    for c in 0..components.len() {
        if remaining[c] == 0 {
            in_flight.push(run_component(c));
        }
    }

    while let Some((c, member_results)) = in_flight.next().await {
        let mut ok = true;
        for (m, result) in member_results {
            let status = match result {
                Ok(0) => ScriptStatus::Success,
                Ok(code) => {
                    ok = false;
                    ScriptStatus::Failed(code)
                }
                Err(e) => return Err(e),
            };
            statuses[m] = status;
        }

        if ok {
            for &d in &schedule.dependents[c] {
                if skipped[d] {
                    continue;
                }
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    in_flight.push(run_component(d));
                }
            }
        } else {
            skip_dependents(c, schedule, &mut skipped);
        }
    }

    Ok(statuses)
}

fn skip_dependents(c: usize, schedule: &Schedule, skipped: &mut [bool]) {
    for &d in &schedule.dependents[c] {
        if !skipped[d] {
            skipped[d] = true;
            skip_dependents(d, schedule, skipped);
        }
    }
}

/// Run pre, main, and post scripts for one package, in that order,
/// short-circuiting on the first non-zero exit.
async fn run_package_script<R: ScriptRunner>(
    pkg: &WorkspacePackage,
    script: &str,
    runner: &R,
) -> Result<i32, PkgError> {
    for name in [format!("pre{script}"), script.to_string(), format!("post{script}")] {
        let Some(command) = pkg.manifest.scripts.get(&name) else {
            continue;
        };
        let code = runner.run(&pkg.path, &pkg.name, &name, command).await?;
        if code != 0 {
            tracing::warn!(package = %pkg.name, script = %name, code, "script failed");
            return Ok(code);
        }
    }
    Ok(0)
}

/// Tarjan's algorithm. Components come out dependencies-first, each a list
/// of member indices.
fn strongly_connected(deps: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct State<'a> {
        deps: &'a [Vec<usize>],
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next_index: usize,
        components: Vec<Vec<usize>>,
    }

    fn visit(state: &mut State<'_>, v: usize) {
        state.index[v] = Some(state.next_index);
        state.lowlink[v] = state.next_index;
        state.next_index += 1;
        state.stack.push(v);
        state.on_stack[v] = true;

        for &w in &state.deps[v] {
            if state.index[w].is_none() {
                visit(state, w);
                state.lowlink[v] = state.lowlink[v].min(state.lowlink[w]);
            } else if state.on_stack[w] {
                state.lowlink[v] = state.lowlink[v].min(state.index[w].unwrap_or(0));
            }
        }

        if Some(state.lowlink[v]) == state.index[v] {
            let mut component = Vec::new();
            while let Some(w) = state.stack.pop() {
                state.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            state.components.push(component);
        }
    }

    let n = deps.len();
    let mut state = State {
        deps,
        index: vec![None; n],
        lowlink: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next_index: 0,
        components: Vec::new(),
    };

    for v in 0..n {
        if state.index[v].is_none() {
            visit(&mut state, v);
        }
    }

    state.components
}

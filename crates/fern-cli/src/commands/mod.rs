pub mod install;
pub mod patch;
pub mod run;
pub mod version;
pub mod workspaces;

use fern_core::error::codes;
use fern_core::lockfile::codes as lock_codes;
use fern_core::PkgError;

/// Map a core error to a process exit code.
///
/// Resolution and metadata failures share one code so scripts can retry
/// with different network flags; filesystem layout failures get another.
pub fn exit_code_for(err: &PkgError) -> i32 {
    match err.code() {
        codes::PKG_NOT_FOUND
        | codes::PKG_UNSATISFIABLE_RANGE
        | codes::PKG_NEEDS_NETWORK
        | codes::PKG_REGISTRY_ERROR
        | codes::PKG_DOWNLOAD_FAILED
        | lock_codes::PKG_LOCK_STALE
        | lock_codes::PKG_LOCK_NOT_FOUND => 3,
        codes::PKG_LINK_FAILED | codes::PKG_FS_CONFLICT | codes::PKG_SYMLINK_UNSUPPORTED => 4,
        _ => 1,
    }
}

/// Print a core error the way every subcommand does: a JSON object with
/// `ok: false` when `--json` is set, a plain line on stderr otherwise.
pub fn report_error(err: &PkgError, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "ok": false,
                "error": {
                    "code": err.code(),
                    "message": err.message(),
                }
            }))
            .unwrap()
        );
    } else {
        eprintln!("error: {}: {}", err.code(), err.message());
    }
}

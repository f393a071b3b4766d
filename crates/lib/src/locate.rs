//! Locate the backend executable.
//!
//! Order: explicit path from config, `GOOSE_HOST_BACKEND_BIN`, `goosed` next to the
//! running executable, `goosed` on `PATH`.

use crate::launch::SpawnError;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

/// Overrides the backend executable path.
pub const BACKEND_BIN_ENV: &str = "GOOSE_HOST_BACKEND_BIN";

fn backend_file_name() -> &'static str {
    if cfg!(windows) {
        "goosed.exe"
    } else {
        "goosed"
    }
}

/// Resolve the backend executable for this process.
pub fn resolve_backend_binary(configured: Option<&Path>) -> Result<PathBuf, SpawnError> {
    let from_env = std::env::var_os(BACKEND_BIN_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    let path_var = std::env::var_os("PATH");
    locate(
        configured,
        from_env.as_deref(),
        exe_dir.as_deref(),
        path_var.as_deref(),
    )
}

/// Resolution with every input explicit. An explicit path (config or env) that does
/// not exist is an error rather than a reason to keep searching. The result is always
/// absolute, since the backend is spawned in its own working directory.
pub fn locate(
    configured: Option<&Path>,
    from_env: Option<&Path>,
    exe_dir: Option<&Path>,
    path_var: Option<&OsStr>,
) -> Result<PathBuf, SpawnError> {
    if let Some(explicit) = configured.or(from_env) {
        if explicit.is_file() {
            return absolute(explicit);
        }
        return Err(not_found(explicit));
    }
    let name = backend_file_name();
    if let Some(candidate) = exe_dir.map(|d| d.join(name)).filter(|c| c.is_file()) {
        return absolute(&candidate);
    }
    if let Some(found) = path_var
        .into_iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(name))
        .find(|c| c.is_file())
    {
        return absolute(&found);
    }
    Err(not_found(Path::new(name)))
}

fn absolute(path: &Path) -> Result<PathBuf, SpawnError> {
    std::path::absolute(path).map_err(|source| SpawnError {
        executable: path.to_path_buf(),
        source,
    })
}

fn not_found(path: &Path) -> SpawnError {
    SpawnError {
        executable: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::NotFound, "backend executable not found"),
    }
}

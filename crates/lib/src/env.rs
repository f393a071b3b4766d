//! Child-process environment composition.
//!
//! Layers, lowest priority first: parent environment (which carries the backend secret
//! key through unchanged), fixed keys (home, user profile, port), caller overrides. The
//! port key is applied once more after the overrides so the backend always listens
//! where the prober looks.

use std::collections::BTreeMap;
use std::path::Path;

/// Environment handed to a child process. Keys are unique and ordered.
pub type EnvMap = BTreeMap<String, String>;

/// Port the backend binds its HTTP server to.
pub const PORT_VAR: &str = "GOOSE_SERVER__PORT";
/// Shared secret the backend checks on authenticated routes.
pub const SECRET_KEY_VAR: &str = "GOOSE_SERVER__SECRET_KEY";
pub const HOME_VAR: &str = "HOME";
pub const USERPROFILE_VAR: &str = "USERPROFILE";

/// Snapshot of this process's environment. Variables that are not valid UTF-8 are skipped.
pub fn parent_env() -> EnvMap {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

/// Build the environment for one backend launch. Never mutates `base`.
pub fn compose(base: &EnvMap, port: u16, home: &Path, overrides: &EnvMap) -> EnvMap {
    let mut env = base.clone();
    let home = home.to_string_lossy().into_owned();
    env.insert(HOME_VAR.to_string(), home.clone());
    env.insert(USERPROFILE_VAR.to_string(), home);
    env.insert(PORT_VAR.to_string(), port.to_string());
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env.insert(PORT_VAR.to_string(), port.to_string());
    env
}

/// Parse `KEY=VALUE` pairs (e.g. from the command line). The value may contain `=`.
pub fn parse_assignments<I, S>(pairs: I) -> Result<EnvMap, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut env = EnvMap::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("empty variable name in {:?}", pair));
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

//! Names of the environment variables the configuration loader reads.
//!
//! Settings: `CAREMATCH__SECTION__KEY` (prefix overridable through `PREFIX`).
//! Secrets behind `"secret_from_env"`: `CAREMATCH_SECRET_SECTION_KEY`, else `SECTION_KEY`.

use std::env;

pub const DEFAULT_PREFIX: &str = "CAREMATCH";
pub const SECRET_PREFIX: &str = "CAREMATCH_SECRET";
pub const CONFIG_SEPARATOR: &str = "__";

pub fn config_prefix() -> String {
    env::var("PREFIX").unwrap_or_else(|_| DEFAULT_PREFIX.to_string())
}

/// `server.host` -> `CAREMATCH__SERVER__HOST`
pub fn config_var(path: &str) -> String {
    let mut parts = vec![config_prefix()];
    parts.extend(path.split('.').map(str::to_string));
    parts.join(CONFIG_SEPARATOR).to_uppercase()
}

/// Candidate names for a secret, most specific first.
pub fn secret_var_candidates(path: &[String]) -> [String; 2] {
    let short = path.join("_").to_uppercase();
    [format!("{}_{}", SECRET_PREFIX, short), short]
}

/// The first candidate that is set, or the short form when neither is.
pub fn secret_env_var(path: &[String]) -> String {
    let [prefixed, short] = secret_var_candidates(path);
    if env::var(&prefixed).is_ok() {
        prefixed
    } else {
        short
    }
}

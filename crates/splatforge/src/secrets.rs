//! Secret resolution for store credentials.
//!
//! A secret can be configured three ways, checked in priority order:
//!
//! 1. **Direct value** - `token: "..."`, handy for local testing
//! 2. **File reference** - `token_file: /run/secrets/store-token` (Docker secrets)
//! 3. **Env var reference** - `token_env: SPLATFORGE_STORE_TOKEN`

use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from the first non-empty source.
///
/// File contents and env var values are trimmed, since both commonly end
/// with a newline.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return match fs::read_to_string(&expanded) {
            Ok(content) => Ok(SecretString::from(content.trim().to_string())),
            Err(e) => Err(SecretError::FileReadError {
                path: expanded,
                source: e,
            }),
        };
    }

    if let Some(var_name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(var_name) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: var_name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: var_name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but an unconfigured secret is `None` rather than
/// an error. Anonymous buckets use this.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Expands a leading `~` to the user's home directory.
///
/// `~user/path` is not supported.
pub(crate) fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    #[test]
    fn test_direct_value_takes_priority() {
        let secret = resolve_secret(Some("direct"), Some("/nonexistent"), Some("NOPE")).unwrap();
        assert_eq!(secret.expose_secret(), "direct");
    }

    #[test]
    fn test_file_takes_priority_over_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "from-file\n").unwrap();

        let secret = resolve_secret(None, path.to_str(), Some("SPLATFORGE_UNSET_VAR")).unwrap();
        assert_eq!(secret.expose_secret(), "from-file");
    }

    #[test]
    #[serial]
    fn test_env_var_fallback() {
        std::env::set_var("SPLATFORGE_TEST_TOKEN", " from-env \n");
        let secret = resolve_secret(None, None, Some("SPLATFORGE_TEST_TOKEN")).unwrap();
        assert_eq!(secret.expose_secret(), "from-env");
        std::env::remove_var("SPLATFORGE_TEST_TOKEN");
    }

    #[test]
    #[serial]
    fn test_env_var_not_set_error() {
        std::env::remove_var("SPLATFORGE_MISSING_TOKEN");
        let err = resolve_secret(None, None, Some("SPLATFORGE_MISSING_TOKEN")).unwrap_err();
        assert!(matches!(err, SecretError::EnvVarNotSet { .. }));
    }

    #[test]
    fn test_no_source_error() {
        let err = resolve_secret(None, None, None).unwrap_err();
        assert!(matches!(err, SecretError::NoSourceProvided));
    }

    #[test]
    fn test_empty_strings_ignored() {
        let err = resolve_secret(Some(""), Some(""), Some("")).unwrap_err();
        assert!(matches!(err, SecretError::NoSourceProvided));
    }

    #[test]
    fn test_file_not_found_error() {
        let err = resolve_secret(None, Some("/nonexistent/splatforge/token"), None).unwrap_err();
        assert!(matches!(err, SecretError::FileReadError { .. }));
    }

    #[test]
    fn test_resolve_secret_optional() {
        assert!(resolve_secret_optional(None, None, None).unwrap().is_none());
        assert!(resolve_secret_optional(Some("x"), None, None)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), "/abs/path");
        if let Some(home) = dirs::home_dir() {
            let expanded = expand_home("~/token");
            assert!(expanded.starts_with(&*home.to_string_lossy()));
            assert!(expanded.ends_with("/token"));
        }
    }
}

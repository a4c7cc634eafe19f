//! Platform-appropriate locations for the socket directory and the config
//! file.
//!
//! The socket directory is where client control/audio sockets are bound
//!; its *policy* (which
//! directory wins) is configuration, not engine logic, per spec.md §1.

use std::path::PathBuf;

/// Application name used for directory paths.
const APP_NAME: &str = "auralink";

/// Returns the directory client and server unix-domain sockets are bound
/// under.
///
/// # Platform paths
///
/// - Linux: `/run/auralink` if writable, else `~/.local/run/auralink`
/// - other unix-likes: `~/.local/run/auralink`
pub fn default_socket_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let system = PathBuf::from("/run").join(APP_NAME);
        if system.exists() || PathBuf::from("/run").exists() {
            return system;
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("run")
        .join(APP_NAME)
}

/// Returns the user configuration directory.
///
/// # Platform paths
///
/// - Linux: `~/.config/auralink/`
/// - macOS: `~/Library/Application Support/auralink/`
/// - Windows: `%APPDATA%\auralink\`
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Returns the default config file path: `<user_config_dir>/auralink.toml`.
pub fn default_config_path() -> PathBuf {
    user_config_dir().join(format!("{APP_NAME}.toml"))
}

/// Ensure `dir` exists, creating all parent components.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(dir: &std::path::Path) -> Result<(), crate::ConfigError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| crate::ConfigError::create_dir(dir, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_socket_dir_mentions_app_name() {
        let dir = default_socket_dir();
        assert!(dir.to_string_lossy().contains(APP_NAME));
    }

    #[test]
    fn user_config_dir_mentions_app_name() {
        assert!(user_config_dir().to_string_lossy().contains(APP_NAME));
    }

    #[test]
    fn default_config_path_ends_in_toml() {
        assert_eq!(
            default_config_path().extension().and_then(|e| e.to_str()),
            Some("toml")
        );
    }

    #[test]
    fn ensure_dir_creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("a").join("b");
        assert!(!target.exists());
        ensure_dir(&target).unwrap();
        assert!(target.is_dir());
    }
}

//! Runtime directory and file path resolution.
//!
//! Priority for the runtime directory:
//! 1. `RSHD_RUNTIME_DIR` (explicit override)
//! 2. `XDG_RUNTIME_DIR/rshd` (Linux standard)
//! 3. `~/.rshd` (home directory fallback)
//! 4. `/tmp/rshd` (last resort)

use std::env;
use std::path::PathBuf;

pub const PID_FILE: &str = "rshd.pid";
/// Where a detached daemon's stderr, and so its log output, goes.
pub const ERROR_LOG: &str = "rshd.err.log";

/// Get the runtime directory with priority fallback.
///
/// Empty environment values are ignored.
pub fn runtime_dir() -> PathBuf {
    if let Ok(dir) = env::var("RSHD_RUNTIME_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Ok(runtime_dir) = env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir).join("rshd");
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".rshd");
    }

    env::temp_dir().join("rshd")
}

pub fn pid_path() -> PathBuf {
    runtime_dir().join(PID_FILE)
}

/// Ensure the runtime directory exists with secure permissions (0700).
pub fn ensure_runtime_dir() -> std::io::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let dir = runtime_dir();
    std::fs::create_dir_all(&dir)?;
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    Ok(dir)
}

/// The shell named by `RSHD_SHELL`, if set.
pub fn env_shell() -> Option<String> {
    env::var("RSHD_SHELL").ok()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use crate::daemon::paths::{ensure_runtime_dir, env_shell, pid_path, runtime_dir};

    // Env var manipulation is not thread-safe, so these tests run serially.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    // Saves and restores env vars while holding the mutex.
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
        _lock: std::sync::MutexGuard<'static, ()>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), std::env::var(name).ok()))
                .collect();
            Self { vars, _lock: lock }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                // SAFETY: We hold ENV_MUTEX, so no other test thread is modifying env vars
                unsafe {
                    match value {
                        Some(v) => std::env::set_var(name, v),
                        None => std::env::remove_var(name),
                    }
                }
            }
        }
    }

    #[test]
    fn test_runtime_dir_explicit_override() {
        let _guard = EnvGuard::new(&["RSHD_RUNTIME_DIR", "XDG_RUNTIME_DIR"]);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("RSHD_RUNTIME_DIR", "/custom/rshd");
            std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        }

        assert_eq!(runtime_dir(), PathBuf::from("/custom/rshd"));
        assert_eq!(pid_path(), PathBuf::from("/custom/rshd/rshd.pid"));
    }

    #[test]
    fn test_runtime_dir_xdg() {
        let _guard = EnvGuard::new(&["RSHD_RUNTIME_DIR", "XDG_RUNTIME_DIR"]);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::remove_var("RSHD_RUNTIME_DIR");
            std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        }

        assert_eq!(runtime_dir(), PathBuf::from("/run/user/1000/rshd"));
    }

    #[test]
    fn test_runtime_dir_ignores_empty() {
        let _guard = EnvGuard::new(&["RSHD_RUNTIME_DIR", "XDG_RUNTIME_DIR"]);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe {
            std::env::set_var("RSHD_RUNTIME_DIR", "");
            std::env::set_var("XDG_RUNTIME_DIR", "");
        }

        let dir = runtime_dir();
        let dir = dir.to_string_lossy();
        assert!(dir.ends_with("rshd"), "{}", dir);
        assert!(!dir.starts_with("/run"));
    }

    #[test]
    fn test_ensure_runtime_dir_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let _guard = EnvGuard::new(&["RSHD_RUNTIME_DIR"]);
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("nested").join("rshd");
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe { std::env::set_var("RSHD_RUNTIME_DIR", &target) };

        assert_eq!(ensure_runtime_dir().unwrap(), target);
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_env_shell() {
        let _guard = EnvGuard::new(&["RSHD_SHELL"]);
        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe { std::env::remove_var("RSHD_SHELL") };
        assert_eq!(env_shell(), None);

        // SAFETY: We hold ENV_MUTEX via _guard
        unsafe { std::env::set_var("RSHD_SHELL", "/bin/bash") };
        assert_eq!(env_shell().as_deref(), Some("/bin/bash"));
    }
}

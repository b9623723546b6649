//! Locating external tools on `PATH`.

use std::ffi::OsString;
use std::path::PathBuf;

/// Resolves an executable name to a path.
pub trait ToolLocator: Send + Sync + std::fmt::Debug {
    /// Returns the path of `tool`, if found.
    fn find(&self, tool: &str) -> Option<PathBuf>;
}

/// Searches a `PATH`-style list of directories.
#[derive(Debug, Clone)]
pub struct PathLocator {
    search_path: OsString,
}

impl PathLocator {
    /// Searches the given `PATH`-style value.
    pub fn new(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: search_path.into(),
        }
    }

    /// Searches the process `PATH`.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os("PATH").unwrap_or_default())
    }
}

impl Default for PathLocator {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ToolLocator for PathLocator {
    fn find(&self, tool: &str) -> Option<PathBuf> {
        std::env::split_paths(&self.search_path)
            .map(|dir| dir.join(tool))
            .find(|candidate| is_executable(candidate))
    }
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

//! Locating engine executables on disk before anything is spawned.
//!
//! Resolution is separate from launching so hosts can plug in their own lookup
//! (a config file, a download cache) without touching the process layer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;

use crate::common::Res;
use crate::EngineError;

/// Maps a user-facing engine name to the path of its executable.
pub trait ExecutableResolver {
    fn resolve(&self, engine_name: &str) -> Res<PathBuf>;
}

/// Makes a resolved path actually runnable. Unpacked engine distributions often
/// lose their execute bit, so this runs between resolution and spawning.
pub trait PermissionSetter {
    /// Best-effort; a failure here surfaces later as a launch error with a proper
    /// OS message, which is more useful than anything this layer could report.
    fn ensure_executable(&self, path: &Path);
}

/// Resolves every name to one fixed path. Useful for tests and for hosts that
/// already know exactly which binary to run.
#[derive(Debug, Clone)]
pub struct FixedPathResolver {
    path: PathBuf,
}

impl FixedPathResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ExecutableResolver for FixedPathResolver {
    fn resolve(&self, engine_name: &str) -> Res<PathBuf> {
        if self.path.is_file() {
            Ok(self.path.clone())
        } else {
            Err(EngineError::ResourceNotFound(format!(
                "{engine_name} (expected at '{}')",
                self.path.display()
            )))
        }
    }
}

lazy_static! {
    /// The engines the catalog knows how to find, keyed by their lowercase
    /// user-facing names. The value is the base name of the executable file.
    static ref KNOWN_ENGINES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("stockfish", "stockfish");
        map.insert("texel", "texel");
        map.insert("crafty", "crafty");
        map.insert("senpai", "senpai");
        map.insert("toga ii", "togaII");
        map.insert("ethereal", "ethereal");
        map.insert("protector", "protector");
        map.insert("murka", "murka");
        map.insert("pigeon", "pigeon");
        map.insert("floyd", "floyd");
        map
    };
}

/// The filenames a given base name may appear under on this platform, most
/// specific first. Engine distributions commonly ship `<name>64.<ext>` builds.
fn platform_candidates(base: &str) -> Vec<String> {
    if cfg!(windows) {
        vec![format!("{base}64.exe"), format!("{base}.exe")]
    } else if cfg!(target_os = "macos") {
        vec![format!("{base}64.mach"), format!("{base}.mach"), base.to_string()]
    } else {
        vec![format!("{base}64.elf"), format!("{base}.elf"), base.to_string()]
    }
}

/// Resolves the bundled catalog of well-known engines inside one directory,
/// trying the platform's usual executable names for each.
#[derive(Debug, Clone)]
pub struct CatalogResolver {
    dir: PathBuf,
}

impl CatalogResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The names this resolver accepts, for listing them to the user.
    pub fn engine_names() -> Vec<&'static str> {
        let mut names: Vec<_> = KNOWN_ENGINES.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl ExecutableResolver for CatalogResolver {
    fn resolve(&self, engine_name: &str) -> Res<PathBuf> {
        let not_found = || EngineError::ResourceNotFound(engine_name.to_string());
        let base = KNOWN_ENGINES.get(engine_name.to_lowercase().as_str()).ok_or_else(not_found)?;
        platform_candidates(base)
            .iter()
            .map(|candidate| self.dir.join(candidate))
            .find(|path| path.is_file())
            .ok_or_else(not_found)
    }
}

#[derive(Debug, Default)]
pub struct NoopPermissionSetter;

impl PermissionSetter for NoopPermissionSetter {
    fn ensure_executable(&self, _path: &Path) {}
}

/// Adds the execute bits to the file's mode, leaving the rest unchanged.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct UnixPermissionSetter;

#[cfg(unix)]
impl PermissionSetter for UnixPermissionSetter {
    fn ensure_executable(&self, path: &Path) {
        use std::fs::{metadata, set_permissions};
        use std::os::unix::fs::PermissionsExt;

        let Ok(meta) = metadata(path) else {
            return;
        };
        let mut perms = meta.permissions();
        if perms.mode() & 0o111 == 0 {
            perms.set_mode(perms.mode() | 0o755);
            _ = set_permissions(path, perms);
        }
    }
}

/// The permission setter appropriate for this platform.
pub fn default_permission_setter() -> Box<dyn PermissionSetter> {
    #[cfg(unix)]
    {
        Box::new(UnixPermissionSetter)
    }
    #[cfg(not(unix))]
    {
        Box::new(NoopPermissionSetter)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    #[test]
    fn fixed_path_requires_the_file_to_exist() {
        let resolver = FixedPathResolver::new("/definitely/not/a/real/engine");
        let err = resolver.resolve("stockfish").unwrap_err();
        assert!(matches!(err, EngineError::ResourceNotFound(_)));
    }

    #[test]
    fn catalog_rejects_unknown_names() {
        let resolver = CatalogResolver::new(std::env::temp_dir());
        let err = resolver.resolve("definitely-not-an-engine").unwrap_err();
        assert!(matches!(err, EngineError::ResourceNotFound(_)));
    }

    #[test]
    fn catalog_lookup_is_case_insensitive() {
        let dir = std::env::temp_dir().join("tethers-resolve-test");
        std::fs::create_dir_all(&dir).unwrap();
        let name = platform_candidates("stockfish").pop().unwrap();
        File::create(dir.join(&name)).unwrap();
        let resolver = CatalogResolver::new(&dir);
        assert_eq!(resolver.resolve("Stockfish").unwrap(), dir.join(&name));
        assert_eq!(resolver.resolve("stockfish").unwrap(), dir.join(&name));
    }

    #[test]
    fn the_catalog_lists_its_engines_sorted() {
        let names = CatalogResolver::engine_names();
        assert!(names.contains(&"stockfish"));
        assert!(names.contains(&"toga ii"));
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }
}

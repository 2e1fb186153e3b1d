use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Source of the `app` standard library module, embedded so a fresh
/// installation works without a populated library directory.
pub const APP_SOURCE: &str = include_str!("../lib/app.cb");

/// The library directory imports resolve against: `COBBLE_LIB` when set,
/// else `~/.cobble/lib`.
pub fn lib_dir() -> PathBuf {
    if let Ok(dir) = env::var("COBBLE_LIB") {
        return PathBuf::from(dir);
    }

    home::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cobble")
        .join("lib")
}

/// Resolves a library module name to its on-disk path.
pub fn lib_path(module: &str) -> PathBuf {
    lib_dir().join(format!("{module}.cb"))
}

pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

pub fn read_file(path: &Path) -> io::Result<String> {
    fs::read_to_string(path)
}

/// Resolves an include path against the directory of the including
/// script.
pub fn from_base(base: &Path, relative: &str) -> PathBuf {
    match base.parent() {
        Some(parent) => parent.join(relative),
        None => PathBuf::from(relative),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_relative_to_base() {
        let path = from_base(Path::new("/tmp/app/main.cb"), "util.cb");
        assert_eq!(path, PathBuf::from("/tmp/app/util.cb"));
    }

    #[test]
    fn lib_dir_honors_environment() {
        env::set_var("COBBLE_LIB", "/opt/cobble");
        assert_eq!(lib_dir(), PathBuf::from("/opt/cobble"));
        assert_eq!(lib_path("math"), PathBuf::from("/opt/cobble/math.cb"));
        env::remove_var("COBBLE_LIB");
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use std::path::{Path, PathBuf};

const DATA_DIR_ENV: &str = "DATA_DIR";

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

fn env_data_dir() -> Option<String> {
    std::env::var(DATA_DIR_ENV)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the active data directory using precedence:
/// 1) explicit `data_dir` config value
/// 2) `DATA_DIR` environment variable
/// 3) cwd-relative `./data`
pub fn resolve_data_dir(explicit_data_dir: Option<&str>) -> PathBuf {
    if let Some(dir) = explicit_data_dir
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .or_else(env_data_dir)
    {
        return absolute(PathBuf::from(dir));
    }
    absolute(PathBuf::from("data"))
}

/// Resolve a path that may be absolute or data-dir-relative.
pub fn resolve_data_path(raw_path: &str, explicit_data_dir: Option<&str>) -> PathBuf {
    let as_path = Path::new(raw_path);
    if as_path.is_absolute() {
        return as_path.to_path_buf();
    }
    resolve_data_dir(explicit_data_dir).join(as_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins() {
        let dir = resolve_data_dir(Some("/tmp/jamdata"));
        assert_eq!(dir, PathBuf::from("/tmp/jamdata"));
    }

    #[test]
    fn relative_paths_land_under_data_dir() {
        let p = resolve_data_path("jams/abc.json", Some("/srv/state"));
        assert_eq!(p, PathBuf::from("/srv/state/jams/abc.json"));
    }
}

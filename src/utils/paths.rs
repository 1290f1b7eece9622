use crate::constants::{env as env_keys, paths};
use std::env;
use std::path::{Path, PathBuf};

fn normalize_env_path(value: Option<String>) -> Option<PathBuf> {
    let raw = value?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn resolve_home_dir() -> Option<PathBuf> {
    env::var("HOME").ok().map(PathBuf::from)
}

pub fn expand_home_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if let Some(str_path) = path.to_str() {
        if let Some(rest) = str_path.strip_prefix("~/") {
            if let Some(home) = resolve_home_dir() {
                return home.join(rest);
            }
        }
        if str_path == "~" {
            if let Some(home) = resolve_home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

pub fn resolve_data_dir() -> PathBuf {
    resolve_home_dir()
        .map(|home| home.join(paths::DATA_DIR_NAME))
        .unwrap_or_else(|| {
            env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(paths::DATA_DIR_NAME)
        })
}

pub fn resolve_registry_path() -> PathBuf {
    if let Some(path) = normalize_env_path(env::var(env_keys::REGISTRY_PATH).ok()) {
        return expand_home_path(path);
    }
    resolve_data_dir().join(paths::REGISTRY_FILE_NAME)
}

pub fn resolve_registry_key_path() -> PathBuf {
    resolve_data_dir().join(paths::KEY_FILE_NAME)
}

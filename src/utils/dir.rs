use std::{io, path::PathBuf};

use anyhow::{anyhow, Result};

pub const APPLICATION_DIR_NAME: &str = "trackono";

fn known(dir: Option<PathBuf>, name: &str) -> Result<PathBuf> {
    dir.ok_or_else(|| anyhow!("Couldn't resolve the {name} directory for the current user"))
}

/// User documents root. On Linux this honours `~/.config/user-dirs.dirs`.
pub fn documents_dir() -> Result<PathBuf> {
    known(dirs::document_dir(), "documents")
}

pub fn pictures_dir() -> Result<PathBuf> {
    known(dirs::picture_dir(), "pictures")
}

/// Roaming per-user application data, e.g. `%APPDATA%` or `~/Library/Application Support`.
pub fn data_dir() -> Result<PathBuf> {
    known(dirs::data_dir(), "application data")
}

/// Machine-local application data, e.g. `%LOCALAPPDATA%`.
pub fn local_data_dir() -> Result<PathBuf> {
    known(dirs::data_local_dir(), "local application data")
}

/// Directory holding the application's own files, such as logs. Created if missing.
pub fn create_application_default_path() -> Result<PathBuf> {
    let path = local_data_dir()?.join(APPLICATION_DIR_NAME);

    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v.into()),
    }
}

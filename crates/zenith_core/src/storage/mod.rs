use crate::error::AppError;
use std::io::Write;
use std::path::{Path, PathBuf};

pub mod json_store;
pub mod session_store;

pub(crate) const APP_DIR_NAME: &str = "zenith";

/// Per-user directory holding config, session and the local store.
pub fn app_dir() -> Result<PathBuf, AppError> {
    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata).join(APP_DIR_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home).join(".config").join(APP_DIR_NAME))
    }
}

/// `env_var` when set and non-blank, else `file_name` inside [`app_dir`].
pub(crate) fn path_from_env(env_var: &str, file_name: &str) -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(env_var)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }
    Ok(app_dir()?.join(file_name))
}

/// Writes `content`, creating parent directories, readable by the owner only.
/// The file never exists with wider permissions: content goes to an
/// owner-only sibling first, which then replaces `path`.
pub(crate) fn write_private(path: &Path, content: &str) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| AppError::io(err.to_string()))?;
    }

    let temp_path = staging_path(path);
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(&temp_path)
        .map_err(|err| AppError::io(err.to_string()))?;

    // A leftover sibling keeps its old mode on open.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(|err| AppError::io(err.to_string()))?;
    }

    file.write_all(content.as_bytes())
        .map_err(|err| AppError::io(err.to_string()))?;
    drop(file);
    std::fs::rename(&temp_path, path).map_err(|err| AppError::io(err.to_string()))?;

    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

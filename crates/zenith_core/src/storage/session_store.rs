use crate::error::AppError;
use crate::identity::Session;
use crate::storage::{path_from_env, write_private};
use std::path::{Path, PathBuf};

const SESSION_FILE_NAME: &str = "session.json";
const SESSION_ENV_VAR: &str = "ZENITH_SESSION_PATH";

pub fn session_path() -> Result<PathBuf, AppError> {
    path_from_env(SESSION_ENV_VAR, SESSION_FILE_NAME)
}

pub fn load_session(path: &Path) -> Result<Option<Session>, AppError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(|err| AppError::io(err.to_string()))?;
    let session =
        serde_json::from_str(&content).map_err(|err| AppError::invalid_data(err.to_string()))?;
    Ok(Some(session))
}

pub fn save_session(path: &Path, session: &Session) -> Result<(), AppError> {
    let content = serde_json::to_string_pretty(session)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;
    write_private(path, &content)
}

pub fn clear_session(path: &Path) -> Result<(), AppError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::io(err.to_string())),
    }
}

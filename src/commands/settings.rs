use crate::models::Role;
use crate::services::{hash_password, AppSettings, SettingsProvider, StoredCredential};
use crate::state::AppState;
use std::path::PathBuf;
use tauri::State;

/// 返回给界面的配置不含密码
#[tauri::command]
pub async fn get_settings(state: State<'_, AppState>) -> Result<AppSettings, String> {
    state.auth.require_admin().map_err(|e| e.to_string())?;
    Ok(state.settings.snapshot().redacted())
}

#[tauri::command]
pub async fn update_project_settings(
    etl_project_path: Option<PathBuf>,
    python_path: Option<String>,
    state: State<'_, AppState>,
) -> Result<(), String> {
    state.auth.require_admin().map_err(|e| e.to_string())?;
    state
        .settings
        .update(|s| {
            s.etl_project_path = etl_project_path;
            s.python_path = python_path;
        })
        .map(|_| ())
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn set_credential(
    role: Role,
    username: String,
    password: String,
    state: State<'_, AppState>,
) -> Result<(), String> {
    state.auth.require_admin().map_err(|e| e.to_string())?;
    if username.trim().is_empty() || password.is_empty() {
        return Err("username and password are required".to_string());
    }

    let stored = StoredCredential {
        username,
        password: hash_password(&password),
    };
    state
        .settings
        .update(|s| *s.credentials.get_mut(role) = Some(stored))
        .map(|_| ())
        .map_err(|e| e.to_string())
}

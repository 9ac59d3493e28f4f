use crate::error::AuthError;
use crate::models::{ActivityKind, Role, SessionSnapshot};
use crate::services::{hash_password, SettingsProvider};
use crate::state::AppState;
use tauri::State;

#[tauri::command]
pub async fn login(
    username: String,
    password: String,
    state: State<'_, AppState>,
) -> Result<Role, AuthError> {
    let role = state.auth.attempt_login(&username, &password).await?;
    upgrade_legacy_credential(&state, role, &username, &password);
    Ok(role)
}

/// 登录成功后把明文存储的密码换成哈希
fn upgrade_legacy_credential(state: &AppState, role: Role, username: &str, password: &str) {
    let settings = state.settings.snapshot();
    let is_legacy = settings
        .credentials
        .role_for(username)
        .map(|(_, stored)| state.credentials.is_legacy_plaintext(&stored.password))
        .unwrap_or(false);
    if !is_legacy {
        return;
    }

    let hashed = hash_password(password);
    let result = state.settings.update(|s| {
        if let Some(stored) = s.credentials.get_mut(role) {
            stored.password = hashed;
        }
    });
    match result {
        Ok(_) => log::info!("[AuthSession] migrated {:?} credential to hashed storage", role),
        Err(e) => log::warn!("[AuthSession] failed to migrate {:?} credential: {}", role, e),
    }
}

#[tauri::command]
pub async fn logout(state: State<'_, AppState>) -> Result<(), AuthError> {
    state.auth.logout();
    Ok(())
}

#[tauri::command]
pub async fn record_activity(
    kind: ActivityKind,
    state: State<'_, AppState>,
) -> Result<bool, AuthError> {
    Ok(state.auth.record_activity(kind))
}

#[tauri::command]
pub async fn get_session(
    state: State<'_, AppState>,
) -> Result<Option<SessionSnapshot>, AuthError> {
    Ok(state.auth.session())
}

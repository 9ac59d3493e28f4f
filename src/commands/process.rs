use crate::error::ProcessError;
use crate::models::{ProcessInfo, RunId};
use crate::services::{build_run_request, discover_pipelines, PipelineRunOptions, SettingsProvider};
use crate::state::AppState;
use tauri::State;

#[tauri::command]
pub async fn run_pipeline(
    key: String,
    options: Option<PipelineRunOptions>,
    state: State<'_, AppState>,
) -> Result<RunId, ProcessError> {
    let settings = state.settings.snapshot();
    let request = build_run_request(&key, &settings, &options.unwrap_or_default())?;
    state.supervisor.run(request)
}

#[tauri::command]
pub async fn stop_pipeline(key: String, state: State<'_, AppState>) -> Result<(), ProcessError> {
    state.supervisor.stop(&key)
}

#[tauri::command]
pub async fn stop_all_pipelines(state: State<'_, AppState>) -> Result<Vec<String>, ProcessError> {
    Ok(state.supervisor.stop_all())
}

#[tauri::command]
pub async fn get_running_processes(
    state: State<'_, AppState>,
) -> Result<Vec<ProcessInfo>, ProcessError> {
    Ok(state.supervisor.running())
}

#[tauri::command]
pub async fn list_pipelines(state: State<'_, AppState>) -> Result<Vec<String>, ProcessError> {
    let project = state
        .settings
        .snapshot()
        .etl_project_path
        .ok_or_else(|| ProcessError::spawn_config("ETL project path not configured"))?;
    Ok(discover_pipelines(&project))
}

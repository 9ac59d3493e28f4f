pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

#[cfg(feature = "desktop")]
pub mod commands;

#[cfg(feature = "desktop")]
pub fn run() {
    use services::{SettingsStore, WindowSink};
    use state::AppState;
    use std::sync::Arc;
    use tauri::Manager;

    utils::init_logging();

    tauri::Builder::default()
        .setup(|app| {
            let window = app.get_window("main").ok_or("main window not found")?;
            let identifier = app.config().tauri.bundle.identifier.clone();
            let settings = SettingsStore::open_default()?;
            log::info!("[Settings] loaded from {}", settings.path().display());

            let sink = Arc::new(WindowSink::new(window.clone(), identifier));
            app.manage(AppState::new(settings, sink));

            // 窗口关闭时阻塞到所有管线进程树都收到终止信号
            let app_handle = app.handle();
            window.on_window_event(move |event| {
                if let tauri::WindowEvent::CloseRequested { .. } = event {
                    let state = app_handle.state::<AppState>();
                    let stopped = state.supervisor.shutdown();
                    if !stopped.is_empty() {
                        log::info!("[ProcessSupervisor] stopped on close: {:?}", stopped);
                    }
                }
            });

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Process commands
            commands::run_pipeline,
            commands::stop_pipeline,
            commands::stop_all_pipelines,
            commands::get_running_processes,
            commands::list_pipelines,

            // Auth commands
            commands::login,
            commands::logout,
            commands::record_activity,
            commands::get_session,

            // Settings commands
            commands::get_settings,
            commands::update_project_settings,
            commands::set_credential,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

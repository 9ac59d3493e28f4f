use crate::services::{
    AuthSessionMachine, CredentialStore, EventSink, ProcessSupervisor, Sha256CredentialStore,
    SettingsStore,
};
use std::sync::Arc;

pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub supervisor: ProcessSupervisor,
    pub auth: AuthSessionMachine,
}

impl AppState {
    pub fn new(settings: SettingsStore, sink: Arc<dyn EventSink>) -> Self {
        let settings = Arc::new(settings);
        let credentials: Arc<dyn CredentialStore> = Arc::new(Sha256CredentialStore);

        Self {
            supervisor: ProcessSupervisor::new(sink.clone()),
            auth: AuthSessionMachine::new(settings.clone(), credentials.clone(), sink),
            settings,
            credentials,
        }
    }
}

pub mod auth_session;
pub mod credential_store;
pub mod event_sink;
pub mod log_parser;
pub mod pipeline_catalog;
pub mod pipeline_command;
pub mod process_registry;
pub mod process_supervisor;
pub mod settings_store;

pub use auth_session::*;
pub use credential_store::*;
pub use event_sink::*;
pub use log_parser::*;
pub use pipeline_catalog::*;
pub use pipeline_command::*;
pub use process_registry::*;
pub use process_supervisor::*;
pub use settings_store::*;

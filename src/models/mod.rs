pub mod auth;
pub mod event;
pub mod log_record;
pub mod process_info;

pub use auth::*;
pub use event::*;
pub use log_record::*;
pub use process_info::*;

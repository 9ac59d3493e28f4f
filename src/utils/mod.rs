pub mod logging;
pub mod process_killer;

#[cfg(not(target_os = "windows"))]
pub mod user_path;

pub use logging::*;
pub use process_killer::*;

#[cfg(not(target_os = "windows"))]
pub use user_path::*;

pub mod auth;
pub mod process;
pub mod settings;

pub use auth::*;
pub use process::*;
pub use settings::*;

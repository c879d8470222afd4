pub mod config;
pub mod logging;
pub mod services;

pub use config::*;
pub use logging::*;
pub use services::*;

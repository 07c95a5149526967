//! # modhost-core
//!
//! Core crate for ModHost. Contains the configuration schemas shared by the
//! loader and the command-line host, and the unified error system.
//!
//! This crate has **no** internal dependencies on other ModHost crates.

pub mod config;
pub mod error;
pub mod result;

pub use config::AppConfig;
pub use error::AppError;
pub use result::AppResult;

//! Core utilities: configuration, errors, logging, process helpers, validation.

pub mod config;
pub mod error;
pub mod logging;
pub mod process;
pub mod validation;

pub use error::{AppError, AppResult};
pub use logging::init_logger;

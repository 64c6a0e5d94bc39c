//! Passkey Server Library - REST API components for passkey ceremonies
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod captcha;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod storage;

pub use captcha::{V2_TOKEN_HEADER, V3_TOKEN_HEADER};
pub use config::Config;
pub use error::ApiError;
pub use routes::{create_router, create_router_with_config};
pub use state::{AppState, StartupError};
pub use storage::{registry_from_config, PostgresCredentialRegistry, StorageError};

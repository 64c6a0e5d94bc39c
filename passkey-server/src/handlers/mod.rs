//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod auth;
pub mod health;

pub use crate::state::AppState;
pub use auth::{
    finish_authentication, finish_registration, start_authentication, start_registration,
    FinishAuthenticationRequest, FinishAuthenticationResponse, FinishRegistrationRequest,
    FinishRegistrationResponse, StartAuthenticationRequest, StartRegistrationRequest,
};
pub use health::{auth_health, health, ready, AuthHealthResponse, HealthResponse, ReadyResponse};

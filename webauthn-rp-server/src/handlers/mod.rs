//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod authenticate;
pub mod credentials;
pub mod health;
pub mod register;

pub use crate::state::AppState;
pub use authenticate::{finish_authentication, start_authentication, StartAuthenticationRequest};
pub use credentials::{
    deregister, list_registrations, CredentialSummary, DeregisterRequest, DeregisterResponse,
};
pub use health::{health, HealthResponse};
pub use register::{finish_registration, start_registration, StartRegistrationRequest};

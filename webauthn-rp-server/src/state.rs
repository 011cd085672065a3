//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use webauthn_rp_core::RelyingParty;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Ceremony engine, including its credential repository
    pub rp: Arc<RelyingParty>,
}

impl AppState {
    pub fn new(rp: RelyingParty) -> Self {
        Self { rp: Arc::new(rp) }
    }
}

//! Shared agent state handed to the HTTP handlers.

use crate::hub::BroadcastHub;

#[derive(Clone)]
pub struct AppState {
    pub hub: BroadcastHub,
    pub auth_token: Option<String>,
}

//! HTTP front of the gateway

pub mod auth;
mod router;
mod server;

pub use router::{AppState, create_router};
pub use server::Gateway;

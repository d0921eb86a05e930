pub mod admin;
pub mod checkout;
pub mod middleware;
pub mod rest;
pub mod router;
pub mod share;
pub mod state;
pub mod webhooks;

// Re-export what the binary needs to build the web server.
pub use middleware::require_auth;
pub use router::build_router;
pub use state::{Adapters, AppState};

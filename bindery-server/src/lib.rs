//! HTTP front door and pipeline orchestration for the bindery book
//! retrieval service.

pub mod config;
pub mod handlers;
pub mod pipeline;
pub mod routes;
pub mod state;

pub use config::Config;
pub use state::AppState;

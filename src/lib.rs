pub mod auth;
pub mod error;
pub mod models;
pub mod moderation;
pub mod notify;
pub mod openapi;
pub mod rate_limit;
pub mod repo;
pub mod routes;
pub mod security;
pub mod storage;
pub mod visibility;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use security::SecurityHeaders;

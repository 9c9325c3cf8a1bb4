pub mod app;
pub mod db;
pub mod errors;
pub mod events;
pub mod jwt;
pub mod models;
pub mod perms;
pub mod routes;

// Re-export commonly used items for tests
pub use app::{create_app, router, AppState};

// Hookline Control Plane Library
// Decision: Shared library for binaries (API server, maintenance tools)

// API routes and types (shared for OpenAPI generation)
pub mod api;

// Router assembly
pub mod app;

// Storage backend selection
pub mod backend;

// Environment configuration
pub mod config;

// OpenAPI document generation
pub mod openapi;

pub use app::build_app;
pub use backend::StorageBackend;
pub use config::Config;

// Core modules
pub mod analysis;
pub mod api;
pub mod config;
pub mod coordination;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod market_data;
pub mod models;
pub mod retry;
pub mod strategy;
pub mod venue;

// Re-export commonly used types
pub use error::CoreError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

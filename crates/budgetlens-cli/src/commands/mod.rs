//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Init and shared utilities (open_db, config loading, period arguments)
//! - `ingest` - Statement ingestion through the pipeline
//! - `reports` - Profiles, budgets, insights and statements
//! - `categories` - Taxonomy and rule inspection
//! - `status` - Database, config and AI backend status

pub mod categories;
pub mod core;
pub mod ingest;
pub mod reports;
pub mod status;

// Re-export command functions for main.rs
pub use categories::*;
pub use self::core::*;
pub use ingest::*;
pub use reports::*;
pub use status::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

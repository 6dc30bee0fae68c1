//! robias-common — Shared types and errors used across all robias crates.

pub mod error;
pub mod sandbox;
pub mod usage;

// Re-export commonly used types
pub use error::{Result, RobiasError};
pub use sandbox::SandboxClient;
pub use usage::TokenUsage;

//! sqlvec-core - Core types and traits for the sqlvec vector store
//!
//! This crate provides the document model, the embedding and store traits,
//! configuration, and error handling shared by the rest of the workspace.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{Result, VecError};
pub use traits::*;
pub use types::*;

// Clippy allows for reasonable defaults
// These suppress warnings where the suggested change doesn't improve readability
#![allow(clippy::too_many_arguments)] // Command handlers often need many params
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::derivable_impls)] // Explicit Default impls can be clearer
#![allow(clippy::field_reassign_with_default)] // Builder pattern is clearer
#![allow(clippy::needless_borrow)] // Explicit borrows can clarify ownership
#![allow(clippy::redundant_closure)] // |x| f(x) can be clearer than f
#![allow(clippy::needless_borrows_for_generic_args)] // Explicit borrows clarify intent
#![allow(clippy::unwrap_or_default)] // unwrap_or_else(Default::default) can be clearer

// Module declarations
pub mod agents;
pub mod commands;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod session;
pub mod shutdown;
pub mod startup;
pub mod storage;
pub mod streaming;
pub mod templates;
mod utils;

// Server module (HTTP/SSE API)
pub mod server;

pub use error::{HubError, HubResult};
pub use models::*;

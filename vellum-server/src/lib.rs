//! Vellum repository server library
//!
//! Multi-repository TCP server for the vellum sync protocol:
//! - Repository registry with lazy create-on-first-reference
//! - Concurrent, bounded per-connection sessions
//! - Operator console for inspection and orderly shutdown

pub mod console;
pub mod manager;
pub mod server;
pub mod session;

pub use manager::{ManagedRepository, RepositoryManager};
pub use server::{Server, ServerConfig};
pub use session::serve_connection;

//! Vellum core library
//!
//! A minimal distributed version-control engine:
//! - Content-addressed object codec and store (zlib-compressed loose objects)
//! - Commit graph model and ancestry traversal
//! - Branch references and HEAD indirection
//! - Repository and working-copy operations (stage, commit, checkout)
//! - Length-prefixed TCP wire protocol and client-side push/fetch/pull

pub mod commit;
pub mod error;
pub mod object;
pub mod protocol;
pub mod refs;
pub mod repository;
pub mod store;
pub mod sync;

pub use commit::{AncestorWalk, Commit, ManifestEntry};
pub use error::{Error, Result};
pub use object::{ObjectId, ObjectKind};
pub use refs::{Head, RefStore};
pub use repository::{Repository, DEFAULT_BRANCH, META_DIR};
pub use store::ObjectStore;
pub use sync::{FetchOutcome, PullOutcome, PushOutcome, Remote};

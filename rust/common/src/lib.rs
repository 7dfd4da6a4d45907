//! # Shared dependencies
//!
//! Third-party crates used by more than one workspace crate are pulled in
//! here once and re-exported, so the rest of the workspace depends on
//! `common` instead of naming versions itself. Bumping a dependency is then
//! a one-line change in this crate's manifest, and two crates can never
//! drift onto incompatible versions of the same library.

pub use async_stream;
pub use async_trait;
pub use chrono;
pub use eyre;
pub use futures;
pub use glob;
pub use indexmap;
pub use itertools;
pub use once_cell;
pub use regex;
pub use serde;
pub use serde_json;
pub use tempfile;
pub use tokio;
pub use tokio_stream;
pub use tracing;
pub use url;

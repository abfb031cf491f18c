//! # castserve - local HTTP media server
//!
//! Serves local files to renderers over HTTP: lazy startup on the first
//! publish, unguessable expiring token URLs, and single-range byte serving
//! so renderers can seek.
//!
//! Runs its own small tokio runtime; the rest of the engine stays
//! synchronous.

pub mod mime;
pub mod range;
pub mod registry;
pub mod server;

pub use registry::FileRegistry;
pub use server::{MediaServer, PublishedFile, ServeConfig, ServeError};

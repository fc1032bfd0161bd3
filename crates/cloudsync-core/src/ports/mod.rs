//! Port definitions (driven/secondary ports)
//!
//! The transfer engine talks to remote storage only through these traits.

pub mod object_store;

pub use object_store::{ObjectStore, PendingUploadPage, UploadMarker};

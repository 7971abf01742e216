//! Content identities
//!
//! Paths, hash records and directory manifests, and the engine computing
//! them for any filesystem view.

pub mod engine;
pub mod hasher;
pub mod node;
pub mod path;

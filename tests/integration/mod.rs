//! Integration tests for the repository view, object store and hashing

mod config;
mod hashing;
mod history;
mod store;
mod subrepos;
mod test_utils;

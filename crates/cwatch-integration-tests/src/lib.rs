//! Integration test crate for the cwatch contact tracing core.
//!
//! This crate has no library code. It only contains integration tests
//! that exercise end-to-end flows across multiple workspace crates.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p cwatch-integration-tests
//! ```

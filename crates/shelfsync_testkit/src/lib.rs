//! # ShelfSync Testkit
//!
//! Test utilities for ShelfSync.
//!
//! This crate provides:
//! - A wired retail shop over in-memory stores and a scripted remote
//! - Builders for synced products and their wire records
//! - Property-based generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shelfsync_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn checkout_is_local_first() {
//!     let shop = TestShop::new();
//!     let milk = shop.seed_product("milk", 650, 10, 5, "11");
//!     // ... drive shop.retail
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;

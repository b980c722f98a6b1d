//! # Trellis Core
//!
//! Shared identifier types for the Trellis triple-store engine.
//!
//! Both the index crate (relation metadata, on-disk store) and the query
//! crate (result tables, operators) speak in terms of the 64-bit [`Id`]
//! defined here. Keeping it in its own crate keeps the dependency edge
//! between the two one-directional.

pub mod ids;

pub use ids::Id;

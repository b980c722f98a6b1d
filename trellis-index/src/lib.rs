//! # Trellis Index
//!
//! Relation metadata, the rhs-list block index, and the on-disk store for
//! the Trellis triple-store engine.
//!
//! A relation is a sorted list of `(lhs, rhs)` id pairs, optionally followed
//! by a block-structured rhs-list segment. This crate owns:
//!
//! - the fixed-size [`RelationMeta`] header and its packed count/flag word,
//! - the [`RelationBlocks`] index that routes an lhs to its block's byte
//!   range without reading the whole segment,
//! - the [`IndexMeta`] catalog with its little-endian persistence format,
//! - the [`IndexStore`] / [`IndexBuilder`] pair for the index file itself.
//!
//! Indexes are built once and opened read-only; every lookup is a pure
//! function over immutable state, so query threads share a store freely.

pub mod error;
pub mod meta;
pub mod relation;
pub mod store;

pub use error::{IndexError, Result};
pub use meta::{IndexMeta, RelationMetaView};
pub use relation::{
    BlockMeta, RelationBlocks, RelationMeta, BLOCK_META_WIRE_SIZE, HAS_BLOCKS_MASK,
    IS_FUNCTIONAL_MASK, NOF_ELEMENTS_MASK, RELATION_META_WIRE_SIZE,
};
pub use store::{IndexBuilder, IndexStore};

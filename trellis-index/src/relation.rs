//! Per-relation metadata records and the rhs-list block index.
//!
//! A relation is stored as two on-disk segments: a pair segment of
//! `(lhs, rhs)` id pairs, and (for relations with per-lhs rhs lists) a
//! block-structured rhs-list segment. [`RelationMeta`] is the fixed-size
//! header locating the pair segment; [`RelationBlocks`] indexes the rhs-list
//! segment by the first lhs of each block.
//!
//! ## Wire layout (little-endian)
//!
//! ```text
//! RelationMeta (24 bytes):
//!   rel_id:  u64   [0..8]
//!   start:   u64   [8..16]    byte offset of the pair segment
//!   packed:  u64   [16..24]   bits 0..62 element count, bit 62 has-blocks,
//!                             bit 63 is-functional
//!
//! BlockMeta (16 bytes):
//!   first_lhs:    u64   [0..8]
//!   start_offset: u64   [8..16]
//!
//! RelationBlocks (24 + 16·k bytes):
//!   start_rhs:    u64   [0..8]    end of the last block
//!   offset_after: u64   [8..16]   end of the relation's disk footprint
//!   block_count:  u64   [16..24]
//!   blocks:       BlockMeta × k
//! ```
//!
//! The flag masks are part of the on-disk ABI and must not change without a
//! format version bump.

use crate::error::{IndexError, Result};
use trellis_core::Id;

/// Top bit of the packed word: the relation is functional (each lhs has
/// exactly one rhs).
pub const IS_FUNCTIONAL_MASK: u64 = 1 << 63;

/// Second-highest bit: the relation has a block-indexed rhs-list segment.
pub const HAS_BLOCKS_MASK: u64 = 1 << 62;

/// Low 62 bits: the element count.
pub const NOF_ELEMENTS_MASK: u64 = (1 << 62) - 1;

/// Wire size of a [`RelationMeta`] record.
pub const RELATION_META_WIRE_SIZE: usize = 24;

/// Wire size of a [`BlockMeta`] record.
pub const BLOCK_META_WIRE_SIZE: usize = 16;

// ============================================================================
// RelationMeta
// ============================================================================

/// Fixed-size header for one relation: where its pair segment starts, how
/// many pairs it holds, and the two flag bits.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct RelationMeta {
    /// Relation id (the map key in the catalog).
    pub rel_id: Id,
    /// Byte offset of the pair segment in the index file.
    pub start: u64,
    /// Packed element count + flags; see the mask constants.
    packed: u64,
}

impl RelationMeta {
    /// Create a record, packing the two flags into the top bits.
    ///
    /// Rejects `nof_elements >= 2^62`: the count shares its word with the
    /// flag bits.
    pub fn new(
        rel_id: Id,
        start: u64,
        nof_elements: u64,
        is_functional: bool,
        has_blocks: bool,
    ) -> Result<Self> {
        if nof_elements > NOF_ELEMENTS_MASK {
            return Err(IndexError::ElementCountOverflow(nof_elements));
        }
        let mut packed = nof_elements;
        if is_functional {
            packed |= IS_FUNCTIONAL_MASK;
        }
        if has_blocks {
            packed |= HAS_BLOCKS_MASK;
        }
        Ok(Self {
            rel_id,
            start,
            packed,
        })
    }

    #[inline]
    pub fn nof_elements(&self) -> u64 {
        self.packed & NOF_ELEMENTS_MASK
    }

    #[inline]
    pub fn is_functional(&self) -> bool {
        self.packed & IS_FUNCTIONAL_MASK != 0
    }

    #[inline]
    pub fn has_blocks(&self) -> bool {
        self.packed & HAS_BLOCKS_MASK != 0
    }

    /// Byte size of the pair segment: `nof_elements` pairs of two ids.
    #[inline]
    pub fn pair_bytes(&self) -> u64 {
        self.nof_elements() * 2 * std::mem::size_of::<Id>() as u64
    }

    /// Byte offset of the rhs-list segment, directly after the pair segment.
    ///
    /// Only meaningful when `has_blocks()` holds.
    #[inline]
    pub fn start_of_lhs(&self) -> u64 {
        debug_assert!(self.has_blocks(), "relation has no rhs-list segment");
        self.start + self.pair_bytes()
    }

    /// Serialize to [`RELATION_META_WIRE_SIZE`] bytes, little-endian.
    pub fn write_le(&self, buf: &mut [u8; RELATION_META_WIRE_SIZE]) {
        buf[0..8].copy_from_slice(&self.rel_id.as_u64().to_le_bytes());
        buf[8..16].copy_from_slice(&self.start.to_le_bytes());
        buf[16..24].copy_from_slice(&self.packed.to_le_bytes());
    }

    /// Deserialize from [`RELATION_META_WIRE_SIZE`] bytes, little-endian.
    pub fn read_le(buf: &[u8; RELATION_META_WIRE_SIZE]) -> Self {
        Self {
            rel_id: Id::from_u64(u64::from_le_bytes(buf[0..8].try_into().unwrap())),
            start: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            packed: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        }
    }
}

// ============================================================================
// BlockMeta
// ============================================================================

/// One block of a relation's rhs-list segment: the smallest lhs whose rhs
/// entries begin in the block, and the block's absolute start offset.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct BlockMeta {
    pub first_lhs: Id,
    pub start_offset: u64,
}

impl BlockMeta {
    pub fn new(first_lhs: Id, start_offset: u64) -> Self {
        Self {
            first_lhs,
            start_offset,
        }
    }

    /// Serialize to [`BLOCK_META_WIRE_SIZE`] bytes, little-endian.
    pub fn write_le(&self, buf: &mut [u8; BLOCK_META_WIRE_SIZE]) {
        buf[0..8].copy_from_slice(&self.first_lhs.as_u64().to_le_bytes());
        buf[8..16].copy_from_slice(&self.start_offset.to_le_bytes());
    }

    /// Deserialize from [`BLOCK_META_WIRE_SIZE`] bytes, little-endian.
    pub fn read_le(buf: &[u8; BLOCK_META_WIRE_SIZE]) -> Self {
        Self {
            first_lhs: Id::from_u64(u64::from_le_bytes(buf[0..8].try_into().unwrap())),
            start_offset: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        }
    }
}

// ============================================================================
// RelationBlocks
// ============================================================================

/// Block index over a relation's rhs-list segment.
///
/// `blocks` is sorted by `first_lhs` (equivalently by `start_offset`);
/// `start_rhs` marks the end of the last block and `offset_after` the end of
/// the relation's whole disk footprint.
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct RelationBlocks {
    pub start_rhs: u64,
    pub offset_after: u64,
    pub blocks: Vec<BlockMeta>,
}

impl RelationBlocks {
    pub fn new(start_rhs: u64, offset_after: u64, blocks: Vec<BlockMeta>) -> Self {
        debug_assert!(
            blocks.windows(2).all(|w| w[0].start_offset < w[1].start_offset
                && w[0].first_lhs <= w[1].first_lhs),
            "blocks must be sorted with strictly increasing offsets"
        );
        Self {
            start_rhs,
            offset_after,
            blocks,
        }
    }

    /// Serialized size of this record.
    pub fn wire_size(&self) -> usize {
        3 * 8 + self.blocks.len() * BLOCK_META_WIRE_SIZE
    }

    /// Append the wire encoding to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.start_rhs.to_le_bytes());
        buf.extend_from_slice(&self.offset_after.to_le_bytes());
        buf.extend_from_slice(&(self.blocks.len() as u64).to_le_bytes());
        let mut rec = [0u8; BLOCK_META_WIRE_SIZE];
        for block in &self.blocks {
            block.write_le(&mut rec);
            buf.extend_from_slice(&rec);
        }
    }

    /// Decode one record from the front of `data`.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 24 {
            return Err(IndexError::Decode(
                "relation blocks: truncated header".to_string(),
            ));
        }
        let start_rhs = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let offset_after = u64::from_le_bytes(data[8..16].try_into().unwrap());
        let block_count = u64::from_le_bytes(data[16..24].try_into().unwrap()) as usize;

        let end = 24 + block_count * BLOCK_META_WIRE_SIZE;
        if end > data.len() {
            return Err(IndexError::Decode(format!(
                "relation blocks: {} blocks extend past buffer of {} bytes",
                block_count,
                data.len()
            )));
        }

        let mut blocks = Vec::with_capacity(block_count);
        let mut pos = 24;
        for _ in 0..block_count {
            blocks.push(BlockMeta::read_le(
                data[pos..pos + BLOCK_META_WIRE_SIZE].try_into().unwrap(),
            ));
            pos += BLOCK_META_WIRE_SIZE;
        }

        Ok((
            Self {
                start_rhs,
                offset_after,
                blocks,
            },
            end,
        ))
    }

    /// Index of the block containing rhs entries for `lhs`.
    ///
    /// Lower bound on `first_lhs`, then one step back unless the match is
    /// exact. An lhs below every block is a planner bug and errors.
    fn position_for_lhs(&self, lhs: Id) -> Result<usize> {
        let first_lhs = self
            .blocks
            .first()
            .map(|b| b.first_lhs)
            .unwrap_or(Id::NONE);

        // First block with first_lhs >= lhs.
        let idx = self.blocks.partition_point(|b| b.first_lhs < lhs);

        if idx == self.blocks.len() || self.blocks[idx].first_lhs > lhs {
            if idx == 0 {
                return Err(IndexError::LhsBelowRange { lhs, first_lhs });
            }
            Ok(idx - 1)
        } else {
            Ok(idx)
        }
    }

    /// Byte span of the block at `pos`: its start offset and length, taken
    /// from the successor's start offset or `start_rhs` for the last block.
    fn span(&self, pos: usize) -> (u64, u64) {
        let start = self.blocks[pos].start_offset;
        let end = self
            .blocks
            .get(pos + 1)
            .map(|b| b.start_offset)
            .unwrap_or(self.start_rhs);
        (start, end - start)
    }

    /// Locate the block containing rhs entries for `lhs`.
    ///
    /// Returns `(start_offset, nof_bytes)`.
    pub fn block_for_lhs(&self, lhs: Id) -> Result<(u64, u64)> {
        let pos = self.position_for_lhs(lhs)?;
        Ok(self.span(pos))
    }

    /// Locate the block after the one containing `lhs`, for scans strictly
    /// greater than `lhs`. Stays on the last block when there is no
    /// successor.
    pub fn follow_block_for_lhs(&self, lhs: Id) -> Result<(u64, u64)> {
        let mut pos = self.position_for_lhs(lhs)?;
        if pos + 1 < self.blocks.len() {
            pos += 1;
        }
        Ok(self.span(pos))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_isolation() {
        for nof in [0u64, 1, 42, NOF_ELEMENTS_MASK] {
            for functional in [false, true] {
                for blocks in [false, true] {
                    let rmd =
                        RelationMeta::new(Id::NONE, 0, nof, functional, blocks).unwrap();
                    assert_eq!(rmd.nof_elements(), nof);
                    assert_eq!(rmd.is_functional(), functional);
                    assert_eq!(rmd.has_blocks(), blocks);
                }
            }
        }
    }

    #[test]
    fn element_count_overflow_rejected() {
        // 2^62 - 1 is the largest representable count.
        assert!(RelationMeta::new(Id(1), 0, NOF_ELEMENTS_MASK, false, false).is_ok());
        let err = RelationMeta::new(Id(1), 0, 1 << 62, false, false).unwrap_err();
        assert!(matches!(err, IndexError::ElementCountOverflow(n) if n == 1 << 62));
    }

    #[test]
    fn relation_meta_wire_round_trip() {
        let rmd = RelationMeta::new(Id(42), 4096, 77, true, true).unwrap();
        let mut buf = [0u8; RELATION_META_WIRE_SIZE];
        rmd.write_le(&mut buf);
        assert_eq!(RelationMeta::read_le(&buf), rmd);

        // The packed word keeps both flag bits above the count.
        let packed = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        assert_eq!(packed, 77 | IS_FUNCTIONAL_MASK | HAS_BLOCKS_MASK);
    }

    #[test]
    fn pair_bytes_and_start_of_lhs() {
        let rmd = RelationMeta::new(Id(1), 1000, 3, false, true).unwrap();
        assert_eq!(rmd.pair_bytes(), 3 * 2 * 8);
        assert_eq!(rmd.start_of_lhs(), 1000 + 48);
    }

    fn three_blocks() -> RelationBlocks {
        RelationBlocks::new(
            400,
            500,
            vec![
                BlockMeta::new(Id(10), 100),
                BlockMeta::new(Id(20), 200),
                BlockMeta::new(Id(30), 300),
            ],
        )
    }

    #[test]
    fn block_lookup() {
        let blocks = three_blocks();
        // Exact matches and in-between lhs values fall into the same block.
        assert_eq!(blocks.block_for_lhs(Id(10)).unwrap(), (100, 100));
        assert_eq!(blocks.block_for_lhs(Id(15)).unwrap(), (100, 100));
        assert_eq!(blocks.block_for_lhs(Id(20)).unwrap(), (200, 100));
        assert_eq!(blocks.block_for_lhs(Id(25)).unwrap(), (200, 100));
        assert_eq!(blocks.block_for_lhs(Id(30)).unwrap(), (300, 100));
        assert_eq!(blocks.block_for_lhs(Id(35)).unwrap(), (300, 100));
    }

    #[test]
    fn follow_block_lookup() {
        let blocks = three_blocks();
        assert_eq!(blocks.follow_block_for_lhs(Id(10)).unwrap(), (200, 100));
        // Already on the last block: stays there.
        assert_eq!(blocks.follow_block_for_lhs(Id(30)).unwrap(), (300, 100));
    }

    #[test]
    fn lhs_below_range_is_an_error() {
        let blocks = three_blocks();
        let err = blocks.block_for_lhs(Id(5)).unwrap_err();
        assert!(matches!(
            err,
            IndexError::LhsBelowRange { lhs: Id(5), first_lhs: Id(10) }
        ));
        assert!(blocks.follow_block_for_lhs(Id(5)).is_err());
    }

    #[test]
    fn empty_block_list_is_invalid_input() {
        let blocks = RelationBlocks::default();
        assert!(blocks.block_for_lhs(Id(1)).is_err());
        assert!(blocks.follow_block_for_lhs(Id(1)).is_err());
    }

    #[test]
    fn relation_blocks_wire_round_trip() {
        let blocks = three_blocks();
        let mut buf = Vec::new();
        blocks.encode(&mut buf);
        assert_eq!(buf.len(), blocks.wire_size());

        let (decoded, consumed) = RelationBlocks::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, blocks);
    }

    #[test]
    fn relation_blocks_truncated_rejected() {
        let blocks = three_blocks();
        let mut buf = Vec::new();
        blocks.encode(&mut buf);
        assert!(RelationBlocks::decode(&buf[..buf.len() - 1]).is_err());
        assert!(RelationBlocks::decode(&buf[..10]).is_err());
    }
}

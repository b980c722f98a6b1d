//! On-disk index store: build-once writer and memory-mapped read side.
//!
//! ## File layout
//!
//! ```text
//! per relation, in insertion order:
//!   pair segment:      nof_elements × (lhs: u64 LE, rhs: u64 LE)
//!   rhs-list segment:  concatenated block payloads (only when blocked)
//! metadata segment:    IndexMeta (see meta.rs)
//! meta_offset:         u64 LE, byte offset of the metadata segment
//! ```
//!
//! The metadata segment is written last; the trailing word locates it on
//! open. The store is read-only after open and safe to share across query
//! threads; metadata offsets index into the mapped image and must not
//! outlive it.

use crate::error::{IndexError, Result};
use crate::meta::IndexMeta;
use crate::relation::{BlockMeta, RelationBlocks, RelationMeta};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use trellis_core::Id;

// ============================================================================
// IndexBuilder
// ============================================================================

/// Single-pass index writer.
///
/// Relations are appended one at a time with their pairs sorted by lhs;
/// [`IndexBuilder::finish`] writes the metadata segment and the trailing
/// offset word. [`IndexBuilder::in_memory`] targets a byte buffer instead
/// of a file, for stores that never touch disk.
pub struct IndexBuilder<W: Write = BufWriter<File>> {
    out: W,
    meta: IndexMeta,
    cursor: u64,
}

impl IndexBuilder<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            out: BufWriter::new(file),
            meta: IndexMeta::new(),
            cursor: 0,
        })
    }
}

impl IndexBuilder<Vec<u8>> {
    pub fn in_memory() -> Self {
        Self {
            out: Vec::new(),
            meta: IndexMeta::new(),
            cursor: 0,
        }
    }

    /// Finish the build and hand back the complete index image.
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        self.write_meta()?;
        Ok(self.out)
    }
}

impl<W: Write> IndexBuilder<W> {
    fn write_pairs(&mut self, pairs: &[(Id, Id)]) -> Result<()> {
        debug_assert!(
            pairs.windows(2).all(|w| w[0].0 <= w[1].0),
            "pairs must be sorted by lhs"
        );
        for (lhs, rhs) in pairs {
            self.out.write_all(&lhs.as_u64().to_le_bytes())?;
            self.out.write_all(&rhs.as_u64().to_le_bytes())?;
        }
        self.cursor += (pairs.len() * 16) as u64;
        Ok(())
    }

    /// Append a relation without an rhs-list segment.
    pub fn add_pairs(&mut self, rel_id: Id, is_functional: bool, pairs: &[(Id, Id)]) -> Result<()> {
        let rmd = RelationMeta::new(
            rel_id,
            self.cursor,
            pairs.len() as u64,
            is_functional,
            false,
        )?;
        self.write_pairs(pairs)?;
        self.meta.add(rmd, None);
        Ok(())
    }

    /// Append a relation with an rhs-list segment.
    ///
    /// Each entry of `rhs_blocks` is one block: the smallest lhs whose rhs
    /// entries begin in it, and its payload bytes. Blocks are concatenated
    /// directly after the pair segment; their start offsets are rebased to
    /// absolute file offsets in the block index.
    pub fn add_pairs_with_rhs_lists(
        &mut self,
        rel_id: Id,
        is_functional: bool,
        pairs: &[(Id, Id)],
        rhs_blocks: &[(Id, &[u8])],
    ) -> Result<()> {
        debug_assert!(!rhs_blocks.is_empty(), "a blocked relation needs blocks");
        let rmd = RelationMeta::new(
            rel_id,
            self.cursor,
            pairs.len() as u64,
            is_functional,
            true,
        )?;
        self.write_pairs(pairs)?;

        let mut blocks = Vec::with_capacity(rhs_blocks.len());
        for (first_lhs, payload) in rhs_blocks {
            blocks.push(BlockMeta::new(*first_lhs, self.cursor));
            self.out.write_all(payload)?;
            self.cursor += payload.len() as u64;
        }
        let start_rhs = self.cursor;
        self.meta
            .add(rmd, Some(RelationBlocks::new(start_rhs, start_rhs, blocks)));
        Ok(())
    }

    fn write_meta(&mut self) -> Result<()> {
        let meta_offset = self.cursor;
        let meta_bytes = self.meta.to_bytes();
        self.out.write_all(&meta_bytes)?;
        self.out.write_all(&meta_offset.to_le_bytes())?;
        self.out.flush()?;

        tracing::debug!(
            relations = self.meta.nof_relations(),
            data_bytes = meta_offset,
            meta_bytes = meta_bytes.len(),
            "index build finished"
        );
        Ok(())
    }

    /// Write the metadata segment and the trailing offset word.
    ///
    /// Returns the finished catalog.
    pub fn finish(mut self) -> Result<IndexMeta> {
        self.write_meta()?;
        Ok(self.meta)
    }
}

// ============================================================================
// IndexStore
// ============================================================================

enum Image {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Image {
    fn bytes(&self) -> &[u8] {
        match self {
            Image::Mapped(m) => m,
            Image::Owned(v) => v,
        }
    }
}

/// Read-only index image plus its decoded catalog.
pub struct IndexStore {
    image: Image,
    meta: IndexMeta,
}

impl IndexStore {
    /// Memory-map an index file and decode its catalog.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let store = Self::from_image(Image::Mapped(mmap))?;
        tracing::debug!(
            path = %path.display(),
            relations = store.meta.nof_relations(),
            "opened index"
        );
        Ok(store)
    }

    /// Build a store over an already-loaded index image.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_image(Image::Owned(bytes))
    }

    fn from_image(image: Image) -> Result<Self> {
        let data = image.bytes();
        if data.len() < 8 {
            return Err(IndexError::Decode(
                "index image: missing trailing offset".to_string(),
            ));
        }
        let meta_offset =
            u64::from_le_bytes(data[data.len() - 8..].try_into().unwrap()) as usize;
        if meta_offset > data.len() - 8 {
            return Err(IndexError::Decode(format!(
                "index image: metadata offset {} past end ({} bytes)",
                meta_offset,
                data.len()
            )));
        }
        let meta = IndexMeta::from_bytes(&data[meta_offset..data.len() - 8])?;
        Ok(Self { image, meta })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    fn slice(&self, start: u64, len: u64) -> Result<&[u8]> {
        let data = self.image.bytes();
        let end = start
            .checked_add(len)
            .filter(|&e| e as usize <= data.len())
            .ok_or_else(|| {
                IndexError::Decode(format!(
                    "index image: range {start}+{len} past end ({} bytes)",
                    data.len()
                ))
            })?;
        Ok(&data[start as usize..end as usize])
    }

    /// Materialize a relation's pair segment.
    pub fn read_pairs(&self, rel_id: Id) -> Result<Vec<(Id, Id)>> {
        let rmd = self.meta.get(rel_id)?.meta;
        let bytes = self.slice(rmd.start, rmd.pair_bytes())?;
        let mut pairs = Vec::with_capacity(rmd.nof_elements() as usize);
        for pair in bytes.chunks_exact(16) {
            pairs.push((
                Id::from_u64(u64::from_le_bytes(pair[0..8].try_into().unwrap())),
                Id::from_u64(u64::from_le_bytes(pair[8..16].try_into().unwrap())),
            ));
        }
        Ok(pairs)
    }

    fn blocks_for(&self, rel_id: Id) -> Result<&RelationBlocks> {
        // A block read on a block-less relation is the same planner bug as
        // an out-of-range lhs.
        self.meta.get(rel_id)?.blocks.ok_or(IndexError::LhsBelowRange {
            lhs: Id::NONE,
            first_lhs: Id::NONE,
        })
    }

    /// Raw bytes of the rhs-list block containing entries for `lhs`.
    pub fn rhs_block_for_lhs(&self, rel_id: Id, lhs: Id) -> Result<&[u8]> {
        let (start, len) = self.blocks_for(rel_id)?.block_for_lhs(lhs)?;
        self.slice(start, len)
    }

    /// Raw bytes of the block after the one containing `lhs`, for scans
    /// strictly greater than `lhs`.
    pub fn rhs_follow_block_for_lhs(&self, rel_id: Id, lhs: Id) -> Result<&[u8]> {
        let (start, len) = self.blocks_for(rel_id)?.follow_block_for_lhs(lhs)?;
        self.slice(start, len)
    }
}

// ============================================================================
// Tests
// ============================================================================

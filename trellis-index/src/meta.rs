//! Index catalog: every relation's metadata record, plus persistence.
//!
//! Built once during index construction (one [`IndexMeta::add`] per
//! relation), serialized as the index file's final segment, and reloaded
//! from the mapped byte image in one pass. After load it is read-only; all
//! lookups are pure functions over immutable state and safe to call from
//! concurrent query threads.
//!
//! ## Metadata segment layout (little-endian)
//!
//! ```text
//! magic:         "TIM1" (4B)
//! version:       u8 = 1
//! _pad:          [u8; 3]
//! nof_relations: u64
//! offset_after:  u64
//! repeat nof_relations times (map iteration order is unspecified):
//!   RelationMeta (24B)
//!   if has_blocks: RelationBlocks (24 + 16·k bytes)
//! ```
//!
//! The load path is order-independent, so round-trips are equal modulo map
//! iteration order; nothing downstream may rely on on-disk record order.

use crate::error::{IndexError, Result};
use crate::relation::{RelationBlocks, RelationMeta, RELATION_META_WIRE_SIZE};
use rustc_hash::FxHashMap;
use trellis_core::Id;

/// Magic bytes for a serialized catalog.
const META_MAGIC: [u8; 4] = *b"TIM1";

/// Current catalog format version.
const META_VERSION: u8 = 1;

/// Fixed header: magic + version + pad + relation count + offset-after.
const META_HEADER_LEN: usize = 4 + 1 + 3 + 8 + 8;

/// Composite lookup result: the fixed record by value, the block record by
/// reference into the catalog (present iff the relation has blocks).
#[derive(Debug)]
pub struct RelationMetaView<'a> {
    pub meta: RelationMeta,
    pub blocks: Option<&'a RelationBlocks>,
}

/// The index catalog.
#[derive(Default, Debug, PartialEq)]
pub struct IndexMeta {
    relations: FxHashMap<Id, RelationMeta>,
    blocks: FxHashMap<Id, RelationBlocks>,
    offset_after: u64,
}

impl IndexMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one relation record.
    ///
    /// `blocks` must be `Some` exactly when `rmd.has_blocks()` holds.
    /// Maintains `offset_after` as the maximum end offset seen so far.
    pub fn add(&mut self, rmd: RelationMeta, blocks: Option<RelationBlocks>) {
        debug_assert_eq!(rmd.has_blocks(), blocks.is_some());
        let expected_end = match &blocks {
            Some(b) => b.offset_after,
            None => rmd.start + rmd.pair_bytes(),
        };
        if let Some(b) = blocks {
            self.blocks.insert(rmd.rel_id, b);
        }
        self.relations.insert(rmd.rel_id, rmd);
        if expected_end > self.offset_after {
            self.offset_after = expected_end;
        }
    }

    pub fn relation_exists(&self, rel_id: Id) -> bool {
        self.relations.contains_key(&rel_id)
    }

    /// Look up a relation's records; errors when the id is unknown.
    pub fn get(&self, rel_id: Id) -> Result<RelationMetaView<'_>> {
        let meta = *self
            .relations
            .get(&rel_id)
            .ok_or(IndexError::MissingRelation(rel_id))?;
        let blocks = meta
            .has_blocks()
            .then(|| &self.blocks[&rel_id]);
        Ok(RelationMetaView { meta, blocks })
    }

    /// Number of rhs-list blocks, zero when the relation has none.
    pub fn nof_blocks_for(&self, rel_id: Id) -> usize {
        self.blocks.get(&rel_id).map_or(0, |b| b.blocks.len())
    }

    /// Total on-disk bytes of one relation: through the end of its rhs-list
    /// segment when present, else just the pair segment.
    pub fn total_bytes_for(&self, rmd: &RelationMeta) -> u64 {
        match self.blocks.get(&rmd.rel_id) {
            Some(b) => b.offset_after - rmd.start,
            None => rmd.pair_bytes(),
        }
    }

    /// Maximum end offset over all inserted relations.
    pub fn offset_after(&self) -> u64 {
        self.offset_after
    }

    pub fn nof_relations(&self) -> usize {
        self.relations.len()
    }

    pub fn relations(&self) -> impl Iterator<Item = &RelationMeta> {
        self.relations.values()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Serialize the catalog to its on-disk form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            META_HEADER_LEN + self.relations.len() * RELATION_META_WIRE_SIZE,
        );
        buf.extend_from_slice(&META_MAGIC);
        buf.push(META_VERSION);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&(self.relations.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.offset_after.to_le_bytes());

        let mut rec = [0u8; RELATION_META_WIRE_SIZE];
        for rmd in self.relations.values() {
            rmd.write_le(&mut rec);
            buf.extend_from_slice(&rec);
            if rmd.has_blocks() {
                self.blocks[&rmd.rel_id].encode(&mut buf);
            }
        }
        buf
    }

    /// Reload a catalog from its on-disk form.
    ///
    /// Trusts the header's relation count and advances a cursor over the
    /// record stream; trailing bytes beyond the last record are the
    /// caller's concern.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < META_HEADER_LEN {
            return Err(IndexError::Decode("catalog: truncated header".to_string()));
        }
        if data[0..4] != META_MAGIC {
            return Err(IndexError::Decode("catalog: invalid magic".to_string()));
        }
        let version = data[4];
        if version != META_VERSION {
            return Err(IndexError::Decode(format!(
                "catalog: unsupported version {version}"
            )));
        }

        let nof_relations = u64::from_le_bytes(data[8..16].try_into().unwrap()) as usize;
        let offset_after = u64::from_le_bytes(data[16..24].try_into().unwrap());

        let mut meta = Self::new();
        meta.offset_after = offset_after;

        let mut pos = META_HEADER_LEN;
        for _ in 0..nof_relations {
            if pos + RELATION_META_WIRE_SIZE > data.len() {
                return Err(IndexError::Decode(
                    "catalog: relation record truncated".to_string(),
                ));
            }
            let rmd = RelationMeta::read_le(
                data[pos..pos + RELATION_META_WIRE_SIZE].try_into().unwrap(),
            );
            pos += RELATION_META_WIRE_SIZE;

            let blocks = if rmd.has_blocks() {
                let (b, consumed) = RelationBlocks::decode(&data[pos..])?;
                pos += consumed;
                Some(b)
            } else {
                None
            };
            meta.add(rmd, blocks);
        }

        tracing::debug!(
            relations = meta.relations.len(),
            offset_after = meta.offset_after,
            "loaded index catalog"
        );
        Ok(meta)
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    /// Human-readable catalog summary.
    pub fn statistics(&self) -> String {
        let mut total_elements: u64 = 0;
        let mut total_bytes: u64 = 0;
        let mut total_blocks: usize = 0;
        for rmd in self.relations.values() {
            total_elements += rmd.nof_elements();
            total_bytes += self.total_bytes_for(rmd);
            total_blocks += self.nof_blocks_for(rmd.rel_id);
        }
        let id_size = std::mem::size_of::<Id>() as u64;
        let triple_bytes = total_elements * 3 * id_size;
        let pair_index_bytes = total_elements * 2 * id_size;

        let mut out = String::new();
        out.push_str("----------------------------------\n");
        out.push_str("Index statistics\n");
        out.push_str("----------------------------------\n");
        out.push_str(&format!("relations: {}\n", group_digits(self.relations.len() as u64)));
        out.push_str(&format!("elements:  {}\n", group_digits(total_elements)));
        out.push_str(&format!("blocks:    {}\n\n", group_digits(total_blocks as u64)));
        out.push_str(&format!(
            "theoretical id-triple size: {} bytes\n",
            group_digits(triple_bytes)
        ));
        out.push_str(&format!(
            "pair index size:            {} bytes\n",
            group_digits(pair_index_bytes)
        ));
        out.push_str(&format!(
            "total size:                 {} bytes\n",
            group_digits(total_bytes)
        ));
        out.push_str("----------------------------------\n");
        out
    }
}

/// Format `n` with thousands separators, e.g. `1234567` → `"1,234,567"`.
fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let lead = digits.len() % 3;
    for (i, c) in digits.chars().enumerate() {
        if i != 0 && (i + 3 - lead) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

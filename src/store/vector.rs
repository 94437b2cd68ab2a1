//! Exact inner-product index over unit vectors.
//!
//! Rows are kept in one contiguous `f32` buffer; row `k` is the vector of chunk id `k`. Search is
//! a full scan, which stays fast for the corpus sizes a single deployment indexes.
//!
//! On-disk layout (little endian):
//!
//! | field     | type  |
//! |-----------|-------|
//! | magic     | `u32` (`"DRVI"`) |
//! | version   | `u32` |
//! | dimension | `u32` |
//! | rows      | `u64` |
//! | data      | `rows * dimension` × `f32` |

use super::{StoreError, open_artifact};
use std::cmp::Ordering;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

const MAGIC: u32 = u32::from_le_bytes(*b"DRVI");
const VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Sentinel id filling result slots the index could not populate.
pub const EMPTY_SLOT: i64 = -1;

/// Result of a k-nearest-neighbor search: parallel score and id columns.
///
/// Both columns report length `k`. Slots past the number of stored rows carry [`EMPTY_SLOT`]
/// ids and negative infinity scores; they are produced on iteration, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborHits {
    scores: Vec<f32>,
    ids: Vec<i64>,
    requested: usize,
}

impl NeighborHits {
    /// Number of slots, always the `k` the search was called with.
    pub fn len(&self) -> usize {
        self.requested
    }

    /// Whether the search asked for zero slots.
    pub fn is_empty(&self) -> bool {
        self.requested == 0
    }

    /// Row ids, best first, padded with [`EMPTY_SLOT`] up to `k`.
    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        let padding = self.requested - self.ids.len();
        self.ids
            .iter()
            .copied()
            .chain(std::iter::repeat_n(EMPTY_SLOT, padding))
    }

    /// Inner-product scores aligned with [`NeighborHits::ids`].
    pub fn scores(&self) -> impl Iterator<Item = f32> + '_ {
        let padding = self.requested - self.scores.len();
        self.scores
            .iter()
            .copied()
            .chain(std::iter::repeat_n(f32::NEG_INFINITY, padding))
    }

    /// Iterate over populated `(id, score)` pairs, skipping sentinel slots.
    pub fn hits(&self) -> impl Iterator<Item = (u64, f32)> + '_ {
        self.ids
            .iter()
            .zip(&self.scores)
            .map(|(id, score)| (*id as u64, *score))
    }
}

/// Flat (brute-force) inner-product index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Create an empty index for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Vector dimension accepted by this index.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    /// Whether the index holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append rows. The whole batch is rejected if any vector has the wrong dimension.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), StoreError> {
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != self.dimension) {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    /// Return the `k` rows with the highest inner product against `query`.
    ///
    /// Ties are broken by ascending id so repeated searches are stable.
    pub fn search(&self, query: &[f32], k: usize) -> Result<NeighborHits, StoreError> {
        if query.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = if self.dimension == 0 {
            Vec::new()
        } else {
            self.data
                .chunks_exact(self.dimension)
                .map(|row| row.iter().zip(query).map(|(a, b)| a * b).sum::<f32>())
                .enumerate()
                .collect()
        };

        let by_rank = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
        };
        if k < scored.len() {
            scored.select_nth_unstable_by(k, by_rank);
            scored.truncate(k);
        }
        scored.sort_by(by_rank);

        let (ids, scores) = scored
            .into_iter()
            .map(|(id, score)| (id as i64, score))
            .unzip();
        Ok(NeighborHits {
            scores,
            ids,
            requested: k,
        })
    }

    /// Persist the index to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        writer.write_all(&MAGIC.to_le_bytes())?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&(self.dimension as u32).to_le_bytes())?;
        writer.write_all(&(self.len() as u64).to_le_bytes())?;
        for value in &self.data {
            writer.write_all(&value.to_le_bytes())?;
        }
        writer.flush()?;
        tracing::debug!(path = %path.display(), rows = self.len(), "Saved vector index");
        Ok(())
    }

    /// Load an index previously written by [`FlatIndex::save`].
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let mut bytes = Vec::new();
        open_artifact(path)?.read_to_end(&mut bytes)?;

        if bytes.len() < HEADER_LEN {
            return Err(StoreError::corrupt(path, "truncated header"));
        }
        let read_u32 = |offset: usize| {
            let mut word = [0_u8; 4];
            word.copy_from_slice(&bytes[offset..offset + 4]);
            u32::from_le_bytes(word)
        };
        if read_u32(0) != MAGIC {
            return Err(StoreError::corrupt(path, "bad magic"));
        }
        let version = read_u32(4);
        if version != VERSION {
            return Err(StoreError::corrupt(
                path,
                format!("unsupported version {version}"),
            ));
        }
        let dimension = read_u32(8) as usize;
        let mut rows = [0_u8; 8];
        rows.copy_from_slice(&bytes[12..20]);
        let rows = u64::from_le_bytes(rows) as usize;

        let expected = rows
            .checked_mul(dimension)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| StoreError::corrupt(path, "row count overflows"))?;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() != expected {
            return Err(StoreError::corrupt(
                path,
                format!("expected {expected} data bytes, found {}", payload.len()),
            ));
        }

        let data = payload
            .chunks_exact(4)
            .map(|word| f32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();
        Ok(Self { dimension, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlatIndex {
        let mut index = FlatIndex::new(2);
        index
            .add(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]])
            .expect("add");
        index
    }

    #[test]
    fn search_ranks_by_inner_product() {
        let hits = sample().search(&[0.8, 0.6], 2).expect("search");
        assert_eq!(hits.ids().collect::<Vec<_>>(), vec![2, 0]);
        let scores: Vec<f32> = hits.scores().collect();
        assert!(scores[0] >= scores[1]);
    }

    #[test]
    fn search_pads_missing_slots_with_sentinel() {
        let hits = sample().search(&[1.0, 0.0], 5).expect("search");
        assert_eq!(hits.len(), 5);
        let ids: Vec<i64> = hits.ids().collect();
        assert_eq!(&ids[3..], &[EMPTY_SLOT, EMPTY_SLOT]);
        assert_eq!(hits.scores().last(), Some(f32::NEG_INFINITY));
        assert_eq!(hits.hits().count(), 3);
    }

    #[test]
    fn search_with_unbounded_k_does_not_allocate_padding() {
        let hits = sample().search(&[1.0, 0.0], usize::MAX).expect("search");
        assert_eq!(hits.len(), usize::MAX);
        assert_eq!(hits.hits().count(), 3);
        assert_eq!(hits.ids().nth(3), Some(EMPTY_SLOT));
    }

    #[test]
    fn search_breaks_ties_by_id() {
        let mut index = FlatIndex::new(1);
        index.add(&[vec![1.0], vec![1.0], vec![1.0]]).expect("add");
        let hits = index.search(&[1.0], 2).expect("search");
        assert_eq!(hits.ids().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn empty_index_returns_only_sentinels() {
        let hits = FlatIndex::new(3).search(&[1.0, 0.0, 0.0], 2).expect("search");
        assert_eq!(hits.hits().count(), 0);
    }

    #[test]
    fn add_rejects_wrong_dimension() {
        let mut index = FlatIndex::new(2);
        let error = index.add(&[vec![1.0, 0.0], vec![1.0]]).expect_err("mismatch");
        assert!(matches!(
            error,
            StoreError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn save_and_load_preserve_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("global.index");
        let index = sample();
        index.save(&path).expect("save");

        let loaded = FlatIndex::load(&path).expect("load");
        assert_eq!(loaded, index);
        assert_eq!(loaded.len(), 3);
    }

    #[test]
    fn load_detects_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("global.index");
        assert!(matches!(
            FlatIndex::load(&path),
            Err(StoreError::IndexNotFound(_))
        ));

        std::fs::write(&path, b"not an index at all").expect("write");
        assert!(matches!(
            FlatIndex::load(&path),
            Err(StoreError::IndexCorrupt { .. })
        ));

        sample().save(&path).expect("save");
        let mut bytes = std::fs::read(&path).expect("read");
        bytes.truncate(bytes.len() - 2);
        std::fs::write(&path, bytes).expect("write");
        assert!(matches!(
            FlatIndex::load(&path),
            Err(StoreError::IndexCorrupt { reason, .. }) if reason.contains("data bytes")
        ));
    }
}

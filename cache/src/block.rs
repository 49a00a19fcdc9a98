//! Loading blocks of chunked multi-resolution images through the cache.
//!
//! A storage backend implements [`BlockReader`]; [`BlockLoader`] adapts one
//! block of it to [`CacheLoader`] so it can be handed to
//! [`LoadingCache::get`](crate::LoadingCache::get).

use crate::error::{BlockError, LoadError};
use crate::value::{CacheLoader, VolatileValue};

use std::fmt;
use std::io;
use std::mem;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifies one block: timepoint, view setup, resolution level and the
/// block's position in the level's grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CellKey {
  pub timepoint: u32,
  pub setup: u32,
  pub level: u32,
  pub cell: [i64; 3],
}

impl CellKey {
  pub const fn new(timepoint: u32, setup: u32, level: u32, cell: [i64; 3]) -> Self {
    Self {
      timepoint,
      setup,
      level,
      cell,
    }
  }
}

/// The block layout of one resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGrid {
  dimensions: [u64; 3],
  block_size: [u32; 3],
}

impl BlockGrid {
  /// `block_size` components of zero are treated as one.
  pub fn new(dimensions: [u64; 3], block_size: [u32; 3]) -> Self {
    Self {
      dimensions,
      block_size: block_size.map(|b| b.max(1)),
    }
  }

  pub fn dimensions(&self) -> [u64; 3] {
    self.dimensions
  }

  pub fn block_size(&self) -> [u32; 3] {
    self.block_size
  }

  /// Number of blocks along each axis.
  pub fn grid_size(&self) -> [u64; 3] {
    [0, 1, 2].map(|d| self.dimensions[d].div_ceil(u64::from(self.block_size[d])))
  }

  /// Position of the block's first element in the image.
  pub fn cell_min(&self, cell: [i64; 3]) -> [i64; 3] {
    [0, 1, 2].map(|d| cell[d].saturating_mul(i64::from(self.block_size[d])))
  }

  /// Extent of the block. Border blocks are cut off at the image bounds and
  /// blocks outside the image are empty.
  pub fn cell_dims(&self, cell: [i64; 3]) -> [usize; 3] {
    let min = self.cell_min(cell);
    [0, 1, 2].map(|d| {
      if min[d] < 0 {
        return 0;
      }
      let left = i64::try_from(self.dimensions[d]).unwrap_or(i64::MAX) - min[d];
      left.clamp(0, i64::from(self.block_size[d])) as usize
    })
  }
}

/// The element data of one block, or a placeholder without data.
#[derive(Clone, PartialEq)]
pub struct VolatileArray<T> {
  dims: [usize; 3],
  data: Option<Box<[T]>>,
}

impl<T> VolatileArray<T> {
  /// A placeholder for a block of the given extent. Allocates nothing.
  pub fn invalid(dims: [usize; 3]) -> Self {
    Self { dims, data: None }
  }

  /// Wraps loaded data. Returns `None` if `data` does not match `dims`.
  pub fn new(dims: [usize; 3], data: Vec<T>) -> Option<Self> {
    (data.len() == element_count(dims)).then(|| Self {
      dims,
      data: Some(data.into_boxed_slice()),
    })
  }

  #[inline]
  pub fn dims(&self) -> [usize; 3] {
    self.dims
  }

  /// The elements in x-fastest order; empty for a placeholder.
  #[inline]
  pub fn as_slice(&self) -> &[T] {
    self.data.as_deref().unwrap_or(&[])
  }

  /// The element at `pos`, or `None` for a placeholder or out of bounds.
  pub fn get(&self, pos: [usize; 3]) -> Option<&T> {
    let [x, y, z] = pos;
    let [w, h, d] = self.dims;
    if x >= w || y >= h || z >= d {
      return None;
    }
    self.data.as_ref()?.get(x + w * (y + h * z))
  }
}

impl<T: Default + Clone> VolatileArray<T> {
  /// A valid block filled with `T::default()`.
  pub fn zeroed(dims: [usize; 3]) -> Self {
    Self {
      dims,
      data: Some(vec![T::default(); element_count(dims)].into_boxed_slice()),
    }
  }
}

impl<T: Send + Sync + 'static> VolatileValue for VolatileArray<T> {
  #[inline]
  fn is_valid(&self) -> bool {
    self.data.is_some()
  }

  fn weight(&self) -> u64 {
    let bytes = self.as_slice().len().saturating_mul(mem::size_of::<T>());
    (bytes as u64).max(1)
  }
}

impl<T> fmt::Debug for VolatileArray<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("VolatileArray")
      .field("dims", &self.dims)
      .field("valid", &self.data.is_some())
      .finish()
  }
}

#[inline]
fn element_count(dims: [usize; 3]) -> usize {
  dims.iter().product()
}

/// A storage backend that can read single blocks.
pub trait BlockReader<T>: Send + Sync + 'static {
  /// Reads the block `key` whose first element is at `min` and whose extent
  /// is `dims`. Must return exactly `dims[0] * dims[1] * dims[2]` elements in
  /// x-fastest order.
  ///
  /// Returns `BlockError::Missing` if the source legitimately has no data for
  /// the block.
  fn read_block(&self, key: &CellKey, min: [i64; 3], dims: [usize; 3]) -> Result<Vec<T>, BlockError>;
}

/// Loads one block through a [`BlockReader`].
///
/// A missing block becomes a valid block of default elements, so it is never
/// fetched again. Every other read error leaves the entry invalid and
/// retryable. An `Interrupted` I/O error counts as a cancellation.
pub struct BlockLoader<T, R> {
  reader: Arc<R>,
  key: CellKey,
  min: [i64; 3],
  dims: [usize; 3],
  _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T, R> BlockLoader<T, R> {
  pub fn new(reader: Arc<R>, key: CellKey, grid: &BlockGrid) -> Self {
    Self {
      reader,
      key,
      min: grid.cell_min(key.cell),
      dims: grid.cell_dims(key.cell),
      _marker: std::marker::PhantomData,
    }
  }

  pub fn key(&self) -> &CellKey {
    &self.key
  }
}

impl<T, R> fmt::Debug for BlockLoader<T, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BlockLoader")
      .field("key", &self.key)
      .field("min", &self.min)
      .field("dims", &self.dims)
      .finish_non_exhaustive()
  }
}

impl<T, R> CacheLoader<VolatileArray<T>> for BlockLoader<T, R>
where
  T: Default + Clone + Send + Sync + 'static,
  R: BlockReader<T>,
{
  fn create_invalid(&self) -> VolatileArray<T> {
    VolatileArray::invalid(self.dims)
  }

  fn load(&self) -> Result<VolatileArray<T>, LoadError> {
    match self.reader.read_block(&self.key, self.min, self.dims) {
      Ok(data) => {
        let len = data.len();
        VolatileArray::new(self.dims, data).ok_or_else(|| {
          LoadError::failed(BlockError::Malformed(format!(
            "expected {} elements for block of extent {:?}, got {len}",
            element_count(self.dims),
            self.dims
          )))
        })
      }
      Err(BlockError::Missing) => {
        tracing::trace!(key = ?self.key, "block missing, using default elements");
        Ok(VolatileArray::zeroed(self.dims))
      }
      Err(BlockError::Io(err)) if err.kind() == io::ErrorKind::Interrupted => Err(LoadError::Cancelled),
      Err(err) => Err(LoadError::failed(err)),
    }
  }
}

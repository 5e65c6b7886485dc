//! Fixed-capacity pool of per-instance records backed by a GPU buffer.
//!
//! A pool is opened with [`InstancePool::unlock`], written with
//! [`append`](InstancePool::append) / [`set`](InstancePool::set) and closed with
//! [`lock`](InstancePool::lock). Draws only read the buffer while the pool is
//! closed; [`buffer`](InstancePool::buffer) closes it implicitly.
//!
//! Readable pools keep a CPU mirror. Writes land in the mirror and only the
//! valid prefix is copied to the GPU on `lock`. Pools without a mirror write
//! straight through to the GPU buffer and always restart at index 0 when
//! opened.

use std::sync::Arc;

use bytemuck::Pod;
use thiserror::Error;

use crate::context::{BufferDesc, BufferUsage, GpuBackend, GpuContext, GpuError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Write attempted while the pool is not open.
    #[error("instance pool is closed for writing")]
    Closed,

    #[error("writing {count} records at {start} exceeds capacity {capacity}")]
    CapacityExceeded {
        start: usize,
        count: usize,
        capacity: usize,
    },

    /// Read access on a pool without a CPU mirror.
    #[error("instance pool keeps no CPU mirror")]
    NotReadable,

    /// The pool has zero capacity and owns no GPU buffer.
    #[error("instance pool has no GPU buffer")]
    NoBuffer,
}

pub struct InstancePool<B: GpuBackend, T: Pod> {
    ctx: Arc<GpuContext<B>>,
    label: String,
    capacity: usize,
    valid: usize,
    mirror: Option<Vec<T>>,
    buffer: Option<B::Buffer>,
    open: bool,
    dirty: bool,
}

impl<B: GpuBackend, T: Pod> InstancePool<B, T> {
    /// Allocate a pool for `capacity` records.
    ///
    /// `initial` seeds the first records (anything past `capacity` is dropped).
    /// A zero capacity creates no GPU buffer and every write on it fails.
    pub fn new(
        ctx: Arc<GpuContext<B>>,
        label: impl Into<String>,
        capacity: usize,
        initial: Option<&[T]>,
        readable: bool,
    ) -> Result<Self, GpuError> {
        let mut pool = Self {
            ctx,
            label: label.into(),
            capacity: 0,
            valid: 0,
            mirror: None,
            buffer: None,
            open: false,
            dirty: false,
        };
        pool.reinitialize(capacity, initial, readable)?;
        Ok(pool)
    }

    /// Drop the current buffer and mirror and allocate fresh ones.
    pub fn reinitialize(
        &mut self,
        capacity: usize,
        initial: Option<&[T]>,
        readable: bool,
    ) -> Result<(), GpuError> {
        self.open = false;
        self.dirty = false;
        self.buffer = None;
        self.mirror = None;
        self.capacity = 0;
        self.valid = 0;

        let initial = initial.unwrap_or(&[]);
        let seeded = initial.len().min(capacity);
        let mut records = vec![T::zeroed(); capacity];
        records[..seeded].copy_from_slice(&initial[..seeded]);

        if capacity > 0 {
            let buffer = self.ctx.create_buffer(&BufferDesc {
                label: &self.label,
                usage: BufferUsage::Instance,
                size: (capacity * self.stride()) as u64,
                contents: Some(bytemuck::cast_slice(&records)),
            })?;
            self.buffer = Some(buffer);
        }
        if readable {
            self.mirror = Some(records);
        }
        self.capacity = capacity;
        self.valid = seeded;
        log::trace!(
            "Instance pool '{}' holds {} records (readable: {})",
            self.label,
            capacity,
            readable
        );
        Ok(())
    }

    /// Open the pool for writing.
    ///
    /// With `write_discard`, or on a pool without CPU mirror, the append cursor
    /// goes back to zero.
    pub fn unlock(&mut self, write_discard: bool) -> Result<(), PoolError> {
        if self.buffer.is_none() {
            return Err(PoolError::NoBuffer);
        }
        if write_discard || self.mirror.is_none() {
            self.valid = 0;
        }
        self.open = true;
        Ok(())
    }

    /// Write `data` at the append cursor.
    pub fn append(&mut self, data: &[T]) -> Result<(), PoolError> {
        self.set(self.valid, data)
    }

    /// Write `data` starting at record `start`.
    ///
    /// Nothing is written if the pool is closed or `start + data.len()`
    /// exceeds the capacity. The valid count grows to cover the written range.
    pub fn set(&mut self, start: usize, data: &[T]) -> Result<(), PoolError> {
        if !self.open {
            return Err(PoolError::Closed);
        }
        let end = start
            .checked_add(data.len())
            .filter(|end| *end <= self.capacity)
            .ok_or(PoolError::CapacityExceeded {
                start,
                count: data.len(),
                capacity: self.capacity,
            })?;
        if data.is_empty() {
            return Ok(());
        }

        let offset = (start * self.stride()) as u64;
        match self.mirror.as_mut() {
            Some(mirror) => {
                mirror[start..end].copy_from_slice(data);
                self.dirty = true;
            }
            None => {
                let buffer = self.buffer.as_ref().ok_or(PoolError::NoBuffer)?;
                self.ctx.write_buffer(buffer, offset, bytemuck::cast_slice(data));
            }
        }
        self.valid = self.valid.max(end);
        Ok(())
    }

    /// Close the pool and commit pending writes.
    ///
    /// `total` overrides the valid count (clamped to the capacity). Only the
    /// valid prefix of a dirty mirror is copied. Returns `false` if the pool
    /// was not open.
    pub fn lock(&mut self, total: Option<usize>) -> bool {
        if !self.open {
            return false;
        }
        if let Some(total) = total {
            self.valid = total.min(self.capacity);
        }
        if self.dirty && self.valid > 0 {
            if let (Some(mirror), Some(buffer)) = (self.mirror.as_ref(), self.buffer.as_ref()) {
                self.ctx
                    .write_buffer(buffer, 0, bytemuck::cast_slice(&mirror[..self.valid]));
            }
        }
        self.open = false;
        self.dirty = false;
        true
    }

    /// The GPU buffer for binding to a draw. Closes the pool first if it is open.
    pub fn buffer(&mut self) -> Option<&B::Buffer> {
        if self.open {
            self.lock(None);
        }
        self.buffer.as_ref()
    }

    pub fn instance(&self, index: usize) -> Result<&T, PoolError> {
        let mirror = self.mirror.as_ref().ok_or(PoolError::NotReadable)?;
        mirror[..self.valid]
            .get(index)
            .ok_or(PoolError::CapacityExceeded {
                start: index,
                count: 1,
                capacity: self.valid,
            })
    }

    /// The valid records of a readable pool.
    pub fn instances(&self) -> Result<&[T], PoolError> {
        self.mirror
            .as_ref()
            .map(|mirror| &mirror[..self.valid])
            .ok_or(PoolError::NotReadable)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn valid(&self) -> usize {
        self.valid
    }

    pub fn stride(&self) -> usize {
        std::mem::size_of::<T>()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_readable(&self) -> bool {
        self.mirror.is_some()
    }

    /// Whether the mirror holds writes not yet committed to the GPU.
    pub fn is_updated(&self) -> bool {
        self.dirty
    }
}

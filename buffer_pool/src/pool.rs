//! Size-class pools over the shared region

use crate::{BufferHandle, PoolError};
use core_types::PoolId;
use hal::SharedRegion;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Alignment of every buffer start in the shared region
pub const BUFFER_ALIGN: usize = 8;

/// One entry of the pool table: `count` buffers of `size` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub count: u32,
    pub size: u32,
}

impl PoolConfig {
    pub fn new(count: u32, size: u32) -> Self {
        Self { count, size }
    }

    fn stride(&self) -> usize {
        align_up(self.size as usize)
    }
}

/// Accounting snapshot of one size class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub pool: PoolId,
    pub buffer_size: u32,
    pub count: u32,
    pub free: u32,
    pub in_use: u32,
}

struct SizeClass {
    id: PoolId,
    buffer_size: u32,
    stride: usize,
    base: usize,
    count: u32,
    /// LIFO free-list of buffer indices
    free: Vec<u32>,
    in_use: Vec<bool>,
}

impl SizeClass {
    fn contains(&self, offset: usize) -> bool {
        offset >= self.base && offset < self.base + self.stride * self.count as usize
    }

    fn index_of(&self, offset: usize) -> Option<usize> {
        if !self.contains(offset) {
            return None;
        }
        let rel = offset - self.base;
        if rel % self.stride != 0 {
            return None;
        }
        Some(rel / self.stride)
    }

    fn offset_of(&self, index: u32) -> usize {
        self.base + self.stride * index as usize
    }

    fn stats(&self) -> PoolStats {
        let free = self.free.len() as u32;
        PoolStats {
            pool: self.id,
            buffer_size: self.buffer_size,
            count: self.count,
            free,
            in_use: self.count - free,
        }
    }
}

fn align_up(value: usize) -> usize {
    (value + BUFFER_ALIGN - 1) & !(BUFFER_ALIGN - 1)
}

/// Reports a programmer error on a handle
///
/// With the `strict-handles` feature this is a fatal assertion.
fn misuse(err: PoolError) -> PoolError {
    error!(target: "buffer_pool", "{}", err);
    if cfg!(feature = "strict-handles") {
        panic!("buffer pool misuse: {}", err);
    }
    err
}

/// The buffer allocator: every size class of one shared region
///
/// Free-lists live behind one short-held lock. Buffer bytes are only
/// touched outside that lock, through the region.
pub struct BufferPool {
    region: Arc<dyn SharedRegion>,
    base: usize,
    end: usize,
    classes: Mutex<Vec<SizeClass>>,
}

impl BufferPool {
    /// Returns the region bytes needed for `configs`, validating them
    pub fn required_bytes(configs: &[PoolConfig]) -> Result<usize, PoolError> {
        if configs.is_empty() {
            return Err(PoolError::Config("no pools configured".to_string()));
        }
        let mut total: usize = 0;
        for (i, config) in configs.iter().enumerate() {
            if config.count == 0 {
                return Err(PoolError::Config(format!("pool {} has zero buffers", i)));
            }
            if config.size == 0 {
                return Err(PoolError::Config(format!("pool {} has zero-byte buffers", i)));
            }
            total = config
                .stride()
                .checked_mul(config.count as usize)
                .and_then(|bytes| total.checked_add(bytes))
                .ok_or_else(|| PoolError::Config("pool table overflows".to_string()))?;
        }
        Ok(total)
    }

    /// Carves the pools in `configs` out of `region`, starting at `base`
    ///
    /// Size classes are ordered by ascending buffer size regardless of
    /// their order in `configs`, and `PoolId`s follow that order.
    pub fn new(
        region: Arc<dyn SharedRegion>,
        base: usize,
        configs: &[PoolConfig],
    ) -> Result<Self, PoolError> {
        let total = Self::required_bytes(configs)?;
        if base % BUFFER_ALIGN != 0 {
            return Err(PoolError::Config(format!(
                "pool base {:#x} is not {}-byte aligned",
                base, BUFFER_ALIGN
            )));
        }
        let end = base
            .checked_add(total)
            .ok_or_else(|| PoolError::Config("pool table overflows".to_string()))?;
        if end > region.size() {
            return Err(PoolError::Config(format!(
                "pools need {} bytes at {:#x} but the region is {} bytes",
                total,
                base,
                region.size()
            )));
        }
        if end > u32::MAX as usize {
            return Err(PoolError::Config(
                "pools extend past the 32-bit offset range".to_string(),
            ));
        }

        let mut sorted = configs.to_vec();
        sorted.sort_by_key(|config| config.size);
        if sorted.windows(2).any(|pair| pair[0].size == pair[1].size) {
            return Err(PoolError::Config(
                "two pools share one buffer size".to_string(),
            ));
        }

        let mut classes = Vec::with_capacity(sorted.len());
        let mut next = base;
        for (i, config) in sorted.iter().enumerate() {
            let class = SizeClass {
                id: PoolId::new(i as u16),
                buffer_size: config.size,
                stride: config.stride(),
                base: next,
                count: config.count,
                free: (0..config.count).rev().collect(),
                in_use: vec![false; config.count as usize],
            };
            info!(
                target: "buffer_pool",
                "{}: {} x {} bytes at {:#x}",
                class.id, class.count, class.buffer_size, class.base
            );
            next += class.stride * class.count as usize;
            classes.push(class);
        }

        Ok(Self {
            region,
            base,
            end,
            classes: Mutex::new(classes),
        })
    }

    /// Returns the shared region the pools live in
    pub fn region(&self) -> &Arc<dyn SharedRegion> {
        &self.region
    }

    /// Returns the region span `[start, end)` occupied by the pools
    pub fn span(&self) -> (usize, usize) {
        (self.base, self.end)
    }

    /// Takes a buffer of at least `min_size` bytes
    ///
    /// The smallest size class that fits is the only candidate; if it is
    /// exhausted the call fails with `OutOfBuffers` rather than spilling
    /// into a larger class.
    pub fn allocate(&self, min_size: usize) -> Result<BufferHandle, PoolError> {
        let mut classes = self.classes.lock();
        let class = classes
            .iter_mut()
            .find(|class| class.buffer_size as usize >= min_size)
            .ok_or(PoolError::NoSizeClass {
                requested: min_size,
            })?;
        let index = class.free.pop().ok_or(PoolError::OutOfBuffers {
            requested: min_size,
            buffer_size: class.buffer_size,
        })?;
        class.in_use[index as usize] = true;
        let offset = class.offset_of(index) as u32;
        debug!(target: "buffer_pool", "{}: allocated {:#x}", class.id, offset);
        Ok(BufferHandle::from_offset(offset))
    }

    /// Returns a buffer to its pool
    ///
    /// Fails with `InvalidHandle` if the handle is not a buffer of any
    /// pool and `DoubleFree` if the buffer is already free; in both cases
    /// pool state is left untouched.
    pub fn free(&self, handle: BufferHandle) -> Result<(), PoolError> {
        let offset = handle.into_offset();
        let mut classes = self.classes.lock();
        let (class, index) = Self::locate(&mut classes, offset)
            .ok_or_else(|| misuse(PoolError::InvalidHandle { offset }))?;
        if !class.in_use[index] {
            return Err(misuse(PoolError::DoubleFree { offset }));
        }
        class.in_use[index] = false;
        class.free.push(index as u32);
        debug!(target: "buffer_pool", "{}: freed {:#x}", class.id, offset);
        Ok(())
    }

    fn locate(classes: &mut [SizeClass], offset: u32) -> Option<(&mut SizeClass, usize)> {
        classes.iter_mut().find_map(|class| {
            let index = class.index_of(offset as usize)?;
            Some((class, index))
        })
    }

    /// Resolves a live handle to `(pool, buffer start, capacity)`
    fn live(&self, handle: &BufferHandle) -> Result<(PoolId, usize, usize), PoolError> {
        let offset = handle.offset();
        let mut classes = self.classes.lock();
        match Self::locate(&mut classes, offset) {
            Some((class, index)) if class.in_use[index] => Ok((
                class.id,
                offset as usize,
                class.buffer_size as usize,
            )),
            _ => Err(misuse(PoolError::InvalidHandle { offset })),
        }
    }

    /// Returns the capacity of the buffer behind `handle`
    pub fn capacity(&self, handle: &BufferHandle) -> Result<usize, PoolError> {
        self.live(handle).map(|(_, _, capacity)| capacity)
    }

    /// Returns the size class the buffer behind `handle` came from
    pub fn pool_of(&self, handle: &BufferHandle) -> Result<PoolId, PoolError> {
        self.live(handle).map(|(pool, _, _)| pool)
    }

    fn checked_range(
        &self,
        handle: &BufferHandle,
        start: usize,
        len: usize,
    ) -> Result<usize, PoolError> {
        let (_, buffer, capacity) = self.live(handle)?;
        match start.checked_add(len) {
            Some(end) if end <= capacity => Ok(buffer + start),
            _ => Err(PoolError::OutOfBounds {
                offset: handle.offset(),
                start,
                len,
                capacity,
            }),
        }
    }

    /// Writes `data` into the buffer at byte `start`
    pub fn write(
        &self,
        handle: &BufferHandle,
        start: usize,
        data: &[u8],
    ) -> Result<(), PoolError> {
        let at = self.checked_range(handle, start, data.len())?;
        self.region.write(at, data)?;
        Ok(())
    }

    /// Reads bytes from the buffer at byte `start` into `out`
    pub fn read(
        &self,
        handle: &BufferHandle,
        start: usize,
        out: &mut [u8],
    ) -> Result<(), PoolError> {
        let at = self.checked_range(handle, start, out.len())?;
        self.region.read(at, out)?;
        Ok(())
    }

    /// Returns per-class accounting, smallest class first
    pub fn stats(&self) -> Vec<PoolStats> {
        self.classes.lock().iter().map(SizeClass::stats).collect()
    }

    /// Returns the configured number of buffers over all classes
    pub fn total_buffers(&self) -> usize {
        self.classes
            .lock()
            .iter()
            .map(|class| class.count as usize)
            .sum()
    }

    /// Returns the number of buffers currently owned by someone
    pub fn in_use(&self) -> usize {
        self.stats().iter().map(|stats| stats.in_use as usize).sum()
    }

    /// Checks that every buffer has come home
    ///
    /// Buffers still in use at teardown are a caller error and are
    /// reported, not ignored.
    pub fn shutdown(&self) -> Result<(), PoolError> {
        let in_use = self.in_use();
        if in_use > 0 {
            warn!(target: "buffer_pool", "teardown with {} buffers in use", in_use);
            return Err(PoolError::BuffersInUse { in_use });
        }
        info!(target: "buffer_pool", "teardown clean");
        Ok(())
    }
}

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::debug;

use crate::error::{Error, Result};
use crate::model::{DataLocation, MemoryHandle};

/// Turns an opaque memory handle into an addressable byte region.
///
/// The host owns the actual mapping primitive; the compiler only ever reads
/// through the returned `Bytes`.
pub trait PoolMapper: Send + Sync {
    /// Map the pool described by `handle`
    fn map(&self, handle: &MemoryHandle) -> Result<Bytes>;
}

/// Mapper over pools that are already resident in memory, keyed by name
#[derive(Debug, Clone, Default)]
pub struct InMemoryMapper {
    pools: HashMap<String, Bytes>,
}

impl InMemoryMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named pool
    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.pools.insert(name.into(), data.into());
    }

    pub fn with_pool(mut self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(name, data);
        self
    }
}

impl PoolMapper for InMemoryMapper {
    fn map(&self, handle: &MemoryHandle) -> Result<Bytes> {
        self.pools
            .get(&handle.name)
            .cloned()
            .ok_or_else(|| Error::InvalidModel(format!("Memory pool '{}' is not available", handle.name)))
    }
}

/// Mapper that reads each pool from a file named after the handle
#[derive(Debug, Clone)]
pub struct FileMapper {
    root: PathBuf,
}

impl FileMapper {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl PoolMapper for FileMapper {
    fn map(&self, handle: &MemoryHandle) -> Result<Bytes> {
        let path = self.root.join(&handle.name);
        let data = fs::read(&path).map_err(|e| Error::ModelLoadError(path.clone(), e.to_string()))?;
        debug!("Mapped pool '{}' from {} ({} bytes)", handle.name, path.display(), data.len());
        Ok(Bytes::from(data))
    }
}

/// A mapped model pool
#[derive(Debug, Clone)]
pub struct MemoryPool {
    name: String,
    data: Bytes,
}

impl MemoryPool {
    pub fn new(name: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The model's memory pools, indexed by the pool index operands refer to
#[derive(Debug, Clone, Default)]
pub struct MemoryPoolSet {
    pools: Vec<MemoryPool>,
}

impl MemoryPoolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map every handle of the model through `mapper`
    pub fn map_all(handles: &[MemoryHandle], mapper: &dyn PoolMapper) -> Result<Self> {
        let mut pools = Vec::with_capacity(handles.len());

        for handle in handles {
            let mut data = mapper.map(handle)?;
            if data.len() < handle.size {
                return Err(Error::InvalidModel(format!(
                    "Memory pool '{}' maps {} bytes but declares {}",
                    handle.name,
                    data.len(),
                    handle.size
                )));
            }
            if handle.size > 0 {
                data.truncate(handle.size);
            }
            pools.push(MemoryPool::new(handle.name.clone(), data));
        }

        debug!("Mapped {} memory pools", pools.len());
        Ok(Self { pools })
    }

    /// Build a pool set from already mapped buffers
    pub fn from_buffers(buffers: Vec<Bytes>) -> Self {
        let pools = buffers
            .into_iter()
            .enumerate()
            .map(|(i, data)| MemoryPool::new(format!("pool_{}", i), data))
            .collect();
        Self { pools }
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn get(&self, pool_index: u32) -> Option<&MemoryPool> {
        self.pools.get(pool_index as usize)
    }

    /// Resolve the region an operand's location points at, without copying
    pub fn region(&self, operand_index: usize, location: &DataLocation) -> Result<Bytes> {
        let pool = self.get(location.pool_index).ok_or(Error::InvalidPoolIndex {
            index: operand_index,
            pool_index: location.pool_index,
            pool_count: self.pools.len(),
        })?;

        slice_region(pool.data(), operand_index, location.offset as usize, location.length as usize)
    }
}

/// Zero-copy sub-slice with bounds checking
pub(crate) fn slice_region(data: &Bytes, operand_index: usize, offset: usize, length: usize) -> Result<Bytes> {
    let end = offset.checked_add(length).filter(|&end| end <= data.len()).ok_or_else(|| {
        Error::InvalidLocation(format!(
            "operand {} reads [{}, {}) from a region of {} bytes",
            operand_index,
            offset,
            offset.saturating_add(length),
            data.len()
        ))
    })?;
    Ok(data.slice(offset..end))
}

/// Buffers owned by a single inference request.
///
/// Inputs are read from and outputs written to these pools; they are never
/// shared with the compiled model.
#[derive(Debug, Clone, Default)]
pub struct RequestPools {
    buffers: Vec<Vec<u8>>,
}

impl RequestPools {
    pub fn new(buffers: Vec<Vec<u8>>) -> Self {
        Self { buffers }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    fn range(&self, pool_index: u32, offset: usize, length: usize) -> Result<(usize, std::ops::Range<usize>)> {
        let pool = pool_index as usize;
        let buffer = self.buffers.get(pool).ok_or_else(|| {
            Error::BindingMismatch(format!(
                "request pool {} does not exist ({} pools)",
                pool_index,
                self.buffers.len()
            ))
        })?;
        match offset.checked_add(length) {
            Some(end) if end <= buffer.len() => Ok((pool, offset..end)),
            _ => Err(Error::BindingMismatch(format!(
                "request region [{}, +{}) exceeds pool {} of {} bytes",
                offset,
                length,
                pool_index,
                buffer.len()
            ))),
        }
    }

    /// Borrow a request region
    pub fn read(&self, location: &DataLocation) -> Result<&[u8]> {
        let (pool, range) = self.range(location.pool_index, location.offset as usize, location.length as usize)?;
        Ok(&self.buffers[pool][range])
    }

    /// Copy `data` into a request region; the region must be exactly `data.len()` bytes
    pub fn write(&mut self, location: &DataLocation, data: &[u8]) -> Result<()> {
        if data.len() != location.length as usize {
            return Err(Error::BindingMismatch(format!(
                "output of {} bytes does not fit a request region of {} bytes",
                data.len(),
                location.length
            )));
        }
        let (pool, range) = self.range(location.pool_index, location.offset as usize, data.len())?;
        self.buffers[pool][range].copy_from_slice(data);
        Ok(())
    }

    pub fn buffer(&self, pool_index: usize) -> Option<&[u8]> {
        self.buffers.get(pool_index).map(|b| b.as_slice())
    }

    pub fn into_buffers(self) -> Vec<Vec<u8>> {
        self.buffers
    }
}

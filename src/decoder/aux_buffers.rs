// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Scratch buffers used by the decode pipe, kept across frames and only ever grown.

use std::collections::BTreeMap;

use anyhow::anyhow;
use log::debug;

use crate::backend::GpuAddress;
use crate::backend::GpuAllocator;
use crate::backend::GpuBuffer;
use crate::decoder::DecodeError;
use crate::decoder::DecodeResult;
use crate::geometry::CACHELINE_SIZE;

/// What an auxiliary buffer is used for by the pipe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuxBufferRole {
    DeblockingFilterLine,
    DeblockingFilterTileLine,
    DeblockingFilterTileColumn,
    MetadataLine,
    MetadataTileLine,
    MetadataTileColumn,
    SaoLine,
    SaoTileLine,
    SaoTileColumn,
    HvdLineRowstore,
    HvdTileRowstore,
    Vp9Probability,
    Vp9SegmentId,
}

impl AuxBufferRole {
    pub fn name(self) -> &'static str {
        match self {
            AuxBufferRole::DeblockingFilterLine => "deblocking filter line",
            AuxBufferRole::DeblockingFilterTileLine => "deblocking filter tile line",
            AuxBufferRole::DeblockingFilterTileColumn => "deblocking filter tile column",
            AuxBufferRole::MetadataLine => "metadata line",
            AuxBufferRole::MetadataTileLine => "metadata tile line",
            AuxBufferRole::MetadataTileColumn => "metadata tile column",
            AuxBufferRole::SaoLine => "sao line",
            AuxBufferRole::SaoTileLine => "sao tile line",
            AuxBufferRole::SaoTileColumn => "sao tile column",
            AuxBufferRole::HvdLineRowstore => "hvd line rowstore",
            AuxBufferRole::HvdTileRowstore => "hvd tile rowstore",
            AuxBufferRole::Vp9Probability => "vp9 probability",
            AuxBufferRole::Vp9SegmentId => "vp9 segment id",
        }
    }
}

/// Allocates `size` bytes, reporting failures as [`DecodeError::AllocationFailed`].
pub(crate) fn allocate<A: GpuAllocator>(
    allocator: &mut A,
    what: &str,
    size: usize,
) -> DecodeResult<A::Buffer> {
    debug!("Allocating {} bytes for {}", size, what);

    allocator
        .allocate(what, size)
        .map_err(|source| DecodeError::AllocationFailed {
            what: what.to_string(),
            size,
            source,
        })
}

struct AuxBuffer<B> {
    buffer: B,
    /// Size that was requested, rounded up to a cache line.
    size: usize,
}

/// One buffer per [`AuxBufferRole`], allocated on first use.
pub struct AuxBufferPool<B> {
    buffers: BTreeMap<AuxBufferRole, AuxBuffer<B>>,
}

impl<B> Default for AuxBufferPool<B> {
    fn default() -> Self {
        Self {
            buffers: BTreeMap::new(),
        }
    }
}

impl<B: GpuBuffer> AuxBufferPool<B> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Makes sure the buffer for `role` holds at least `required` bytes.
    ///
    /// A buffer that is already large enough is kept as-is. On failure, the previous buffer of
    /// `role`, if any, is left in place.
    pub fn ensure<A>(
        &mut self,
        allocator: &mut A,
        role: AuxBufferRole,
        required: usize,
    ) -> DecodeResult<()>
    where
        A: GpuAllocator<Buffer = B>,
    {
        let size = required
            .checked_next_multiple_of(CACHELINE_SIZE)
            .ok_or_else(|| DecodeError::AllocationFailed {
                what: role.name().to_string(),
                size: required,
                source: anyhow!("size overflows when rounded to a cache line"),
            })?;

        if matches!(self.buffers.get(&role), Some(aux) if aux.size >= size) {
            return Ok(());
        }

        let buffer = allocate(allocator, role.name(), size)?;
        self.buffers.insert(role, AuxBuffer { buffer, size });

        Ok(())
    }

    /// Calls [`AuxBufferPool::ensure`] for every `(role, size)` pair.
    pub fn ensure_all<A>(
        &mut self,
        allocator: &mut A,
        sizes: &[(AuxBufferRole, usize)],
    ) -> DecodeResult<()>
    where
        A: GpuAllocator<Buffer = B>,
    {
        sizes
            .iter()
            .try_for_each(|&(role, size)| self.ensure(allocator, role, size))
    }

    pub fn get(&self, role: AuxBufferRole) -> Option<&B> {
        self.buffers.get(&role).map(|aux| &aux.buffer)
    }

    pub fn get_mut(&mut self, role: AuxBufferRole) -> Option<&mut B> {
        self.buffers.get_mut(&role).map(|aux| &mut aux.buffer)
    }

    pub fn address(&self, role: AuxBufferRole) -> Option<GpuAddress> {
        self.get(role).map(GpuBuffer::address)
    }

    pub fn size(&self, role: AuxBufferRole) -> Option<usize> {
        self.buffers.get(&role).map(|aux| aux.size)
    }
}

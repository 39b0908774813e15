// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Services the decode core consumes but does not implement.
//!
//! A backend is the provider of GPU memory, decoded surfaces and command submission for a given
//! device. The decode session only ever talks to it through the traits of this module, so the
//! same packet emission code can be driven by a real kernel driver or by the test doubles of
//! [`dummy`].

#[cfg(test)]
pub(crate) mod dummy;

/// Address of a buffer as seen by the GPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GpuAddress(pub u64);

impl GpuAddress {
    /// Returns the address split into its low and high dwords.
    pub fn dwords(self) -> [u32; 2] {
        [self.0 as u32, (self.0 >> 32) as u32]
    }

    pub fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

/// Opaque handle to a decoded surface owned by the surface service.
///
/// This is also the identity under which a picture is tracked as a reference. Holding a handle
/// does not keep the surface alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SurfaceHandle(pub u32);

/// Pixel layouts the decode pipe can write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceFormat {
    /// 8-bit 4:2:0, interleaved chroma.
    Nv12,
    /// 10-bit 4:2:0 in 16-bit containers, interleaved chroma.
    P010,
}

impl SurfaceFormat {
    pub fn for_bit_depth(bit_depth: u8) -> Self {
        if bit_depth > 8 {
            SurfaceFormat::P010
        } else {
            SurfaceFormat::Nv12
        }
    }
}

/// Memory layout of a decoded surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub address: GpuAddress,
    pub width: u32,
    pub height: u32,
    /// Distance in bytes between two rows of the luma plane.
    pub pitch: u32,
    /// Row at which the chroma plane starts.
    pub y_cb_offset: u32,
    pub format: SurfaceFormat,
}

/// A GPU-visible buffer. Dropping it releases the memory.
pub trait GpuBuffer {
    fn address(&self) -> GpuAddress;
    fn size(&self) -> usize;
    fn write(&mut self, offset: usize, data: &[u8]) -> anyhow::Result<()>;
    fn read(&self, offset: usize, data: &mut [u8]) -> anyhow::Result<()>;
}

/// Allocator of GPU-visible scratch memory.
pub trait GpuAllocator {
    type Buffer: GpuBuffer;

    /// Allocates a buffer of at least `size` bytes. `name` is only used for debugging.
    fn allocate(&mut self, name: &str, size: usize) -> anyhow::Result<Self::Buffer>;
}

/// Resolves surface handles and makes sure decoded surfaces have backing memory.
pub trait SurfaceService {
    /// Makes sure `handle` is backed by memory of `format` large enough for `width`x`height`,
    /// and returns its layout.
    fn ensure_surface(
        &mut self,
        handle: SurfaceHandle,
        format: SurfaceFormat,
        width: u32,
        height: u32,
    ) -> anyhow::Result<SurfaceInfo>;

    /// Returns the layout of an already allocated surface.
    fn surface(&self, handle: SurfaceHandle) -> Option<SurfaceInfo>;
}

/// Command stream of one GPU ring.
pub trait CommandBatch {
    /// Starts a region of `num_dwords` dwords that must reach the ring without interleaving.
    fn begin_atomic(&mut self, num_dwords: usize) -> anyhow::Result<()>;
    fn emit(&mut self, dwords: &[u32]);
    fn end_atomic(&mut self);
    /// Submits the batch. If `wait` is set, only returns once the GPU has executed it.
    fn flush(&mut self, wait: bool) -> anyhow::Result<()>;
}

// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Backend doubles whose only purpose is to let the decode session run so we can test it in
//! isolation. Memory is plain host memory and command batches are simply recorded.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::anyhow;

use crate::backend::CommandBatch;
use crate::backend::GpuAddress;
use crate::backend::GpuAllocator;
use crate::backend::GpuBuffer;
use crate::backend::SurfaceFormat;
use crate::backend::SurfaceHandle;
use crate::backend::SurfaceInfo;
use crate::backend::SurfaceService;
use crate::hcp::split_packets;
use crate::hcp::Opcode;
use crate::utils::align_up;

const BUFFER_BASE: u64 = 0x1_0010_0000;
const SURFACE_BASE: u64 = 0x2_0100_0000;
const SURFACE_SPACING: u64 = 0x100_0000;
const PAGE_SIZE: u64 = 0x1000;

/// Host memory pretending to be GPU memory. The backing storage is shared so tests can play
/// the part of the GPU.
pub struct DummyBuffer {
    address: GpuAddress,
    data: Rc<RefCell<Vec<u8>>>,
}

impl GpuBuffer for DummyBuffer {
    fn address(&self) -> GpuAddress {
        self.address
    }

    fn size(&self) -> usize {
        self.data.borrow().len()
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> anyhow::Result<()> {
        let mut memory = self.data.borrow_mut();
        let dst = memory
            .get_mut(offset..offset + data.len())
            .ok_or_else(|| anyhow!("write out of bounds"))?;
        dst.copy_from_slice(data);

        Ok(())
    }

    fn read(&self, offset: usize, data: &mut [u8]) -> anyhow::Result<()> {
        let memory = self.data.borrow();
        let src = memory
            .get(offset..offset + data.len())
            .ok_or_else(|| anyhow!("read out of bounds"))?;
        data.copy_from_slice(src);

        Ok(())
    }
}

#[derive(Default)]
pub struct DummyAllocator {
    next_address: u64,
    fail: bool,
    /// Name and memory of every successful allocation, in order.
    allocations: Vec<(String, Rc<RefCell<Vec<u8>>>)>,
}

impl DummyAllocator {
    pub fn num_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Makes every following allocation fail, or succeed again.
    pub fn fail_allocations(&mut self, fail: bool) {
        self.fail = fail;
    }

    /// Returns the memory of the latest allocation made under `name`.
    pub fn memory(&self, name: &str) -> Option<Rc<RefCell<Vec<u8>>>> {
        self.allocations
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, memory)| Rc::clone(memory))
    }
}

impl GpuAllocator for DummyAllocator {
    type Buffer = DummyBuffer;

    fn allocate(&mut self, name: &str, size: usize) -> anyhow::Result<Self::Buffer> {
        if self.fail {
            return Err(anyhow!("out of memory"));
        }

        let address = GpuAddress(BUFFER_BASE + self.next_address);
        self.next_address += align_up(size as u32, PAGE_SIZE as u32) as u64 + PAGE_SIZE;

        let data = Rc::new(RefCell::new(vec![0u8; size]));
        self.allocations.push((name.to_string(), Rc::clone(&data)));

        Ok(DummyBuffer { address, data })
    }
}

/// Surfaces with a plausible layout and no memory behind them.
#[derive(Default)]
pub struct DummySurfaces {
    surfaces: BTreeMap<SurfaceHandle, SurfaceInfo>,
    num_created: u64,
}

impl DummySurfaces {
    fn create(&mut self, format: SurfaceFormat, width: u32, height: u32) -> SurfaceInfo {
        let bytes_per_sample = match format {
            SurfaceFormat::Nv12 => 1,
            SurfaceFormat::P010 => 2,
        };

        let info = SurfaceInfo {
            address: GpuAddress(SURFACE_BASE + self.num_created * SURFACE_SPACING),
            width,
            height,
            pitch: align_up(width * bytes_per_sample, 128),
            y_cb_offset: align_up(height, 32),
            format,
        };
        self.num_created += 1;

        info
    }

    /// Adds an 8-bit surface, as if it had been decoded earlier.
    pub fn add(&mut self, handle: SurfaceHandle, width: u32, height: u32) -> SurfaceInfo {
        let info = self.create(SurfaceFormat::Nv12, width, height);
        self.surfaces.insert(handle, info);

        info
    }
}

impl SurfaceService for DummySurfaces {
    fn ensure_surface(
        &mut self,
        handle: SurfaceHandle,
        format: SurfaceFormat,
        width: u32,
        height: u32,
    ) -> anyhow::Result<SurfaceInfo> {
        if let Some(info) = self.surfaces.get(&handle) {
            if info.format == format && info.width == width && info.height == height {
                return Ok(*info);
            }
        }

        let info = self.create(format, width, height);
        self.surfaces.insert(handle, info);

        Ok(info)
    }

    fn surface(&self, handle: SurfaceHandle) -> Option<SurfaceInfo> {
        self.surfaces.get(&handle).copied()
    }
}

/// Batch that keeps everything it is given.
#[derive(Default)]
pub struct RecordingBatch {
    dwords: Vec<u32>,
    flushes: Vec<bool>,
    /// Dwords left in the current atomic region.
    reserved: Option<usize>,
    on_flush: Option<Box<dyn FnMut()>>,
}

impl RecordingBatch {
    pub fn dwords(&self) -> &[u32] {
        &self.dwords
    }

    /// The `wait` argument of every flush.
    pub fn flushes(&self) -> &[bool] {
        &self.flushes
    }

    /// Calls `f` on every flush, standing in for the GPU executing the batch.
    pub fn on_flush(&mut self, f: impl FnMut() + 'static) {
        self.on_flush = Some(Box::new(f));
    }

    pub fn packets(&self) -> Vec<(Opcode, Vec<u32>)> {
        split_packets(&self.dwords)
            .into_iter()
            .map(|(opcode, packet)| (opcode, packet.to_vec()))
            .collect()
    }

    pub fn opcodes(&self) -> Vec<Opcode> {
        split_packets(&self.dwords)
            .into_iter()
            .map(|(opcode, _)| opcode)
            .collect()
    }
}

impl CommandBatch for RecordingBatch {
    fn begin_atomic(&mut self, num_dwords: usize) -> anyhow::Result<()> {
        if self.reserved.is_some() {
            return Err(anyhow!("atomic regions cannot be nested"));
        }

        self.reserved = Some(num_dwords);
        Ok(())
    }

    fn emit(&mut self, dwords: &[u32]) {
        match self.reserved.as_mut() {
            Some(left) if *left >= dwords.len() => *left -= dwords.len(),
            _ => panic!("{} dwords emitted outside of their reservation", dwords.len()),
        }

        self.dwords.extend_from_slice(dwords);
    }

    fn end_atomic(&mut self) {
        assert_eq!(self.reserved.take(), Some(0), "reservation not filled");
    }

    fn flush(&mut self, wait: bool) -> anyhow::Result<()> {
        self.flushes.push(wait);
        if let Some(f) = self.on_flush.as_mut() {
            f();
        }

        Ok(())
    }
}

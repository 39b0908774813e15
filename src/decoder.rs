// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-frame decode driver.
//!
//! A [`DecodeSession`] receives fully parsed picture and slice parameters for one frame at a time,
//! makes sure every buffer the pipe needs exists, and turns the parameters into a single HCP
//! command stream that is appended atomically to the caller's [`CommandBatch`].
//!
//! All state that must survive from one frame to the next (auxiliary buffers, reference slots,
//! VP9 probability contexts and motion vector buffers) is owned by the session and released when
//! it is dropped.

pub mod aux_buffers;
pub mod frame_store;
pub mod hevc;
pub mod vp9;

use anyhow::Context;
use log::debug;
use thiserror::Error;

use crate::backend::CommandBatch;
use crate::backend::GpuAddress;
use crate::backend::GpuAllocator;
use crate::backend::GpuBuffer;
use crate::backend::SurfaceHandle;
use crate::backend::SurfaceService;
use crate::codec::hevc::params as hevc_params;
use crate::codec::vp9::params as vp9_params;
use crate::decoder::aux_buffers::AuxBufferPool;
use crate::decoder::aux_buffers::AuxBufferRole;
use crate::decoder::frame_store::FrameStore;
use crate::decoder::hevc::HevcState;
use crate::decoder::vp9::Vp9State;
use crate::hcp::CommandStream;
use crate::hcp::PipeBufferAddresses;
use crate::HardwareConfig;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("failed to allocate {size} bytes for {what}")]
    AllocationFailed {
        what: String,
        size: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Slices sharing the same data buffer.
#[derive(Clone, Debug)]
pub struct SliceGroup<P> {
    /// Address of the buffer holding the slice data of every slice of the group.
    pub data: GpuAddress,
    pub params: Vec<P>,
}

#[derive(Clone, Debug)]
pub struct HevcDecodeState {
    /// Surface the picture is decoded into.
    pub target: SurfaceHandle,
    pub picture: Option<hevc_params::PictureParameters>,
    /// Scaling lists. Flat matrices are used if absent.
    pub iq_matrix: Option<hevc_params::IqMatrix>,
    pub slice_groups: Vec<SliceGroup<hevc_params::SliceParameters>>,
}

#[derive(Clone, Debug)]
pub struct Vp9DecodeState {
    /// Surface the frame is decoded into.
    pub target: SurfaceHandle,
    pub picture: Option<vp9_params::PictureParameters>,
    pub slice_groups: Vec<SliceGroup<vp9_params::SliceParameters>>,
    /// Buffer holding the compressed header, if the pipe should read it from a separate buffer.
    pub compressed_header: Option<GpuAddress>,
}

/// Everything needed to decode one frame.
#[derive(Clone, Debug)]
pub enum DecodeState {
    Hevc(HevcDecodeState),
    Vp9(Vp9DecodeState),
}

/// Session state shared by both codecs.
pub(crate) struct SessionResources<A: GpuAllocator> {
    pub(crate) allocator: A,
    pub(crate) config: HardwareConfig,
    pub(crate) aux_buffers: AuxBufferPool<A::Buffer>,
    pub(crate) frame_store: FrameStore,
}

enum CodecState<B> {
    Hevc(HevcState<B>),
    Vp9(Vp9State<B>),
}

/// Hands a complete command stream over to `batch`.
pub(crate) fn submit(
    batch: &mut dyn CommandBatch,
    stream: &CommandStream,
    wait: bool,
) -> DecodeResult<()> {
    batch
        .begin_atomic(stream.len())
        .context("while reserving space in the command batch")?;
    batch.emit(stream.dwords());
    batch.end_atomic();
    batch
        .flush(wait)
        .context("while flushing the command batch")?;

    Ok(())
}

/// Fills the auxiliary buffer entries of HCP_PIPE_BUF_ADDR_STATE for `roles`. Buffers of other
/// roles present in `pool` are left out.
pub(crate) fn pipe_buffer_addresses<B: GpuBuffer>(
    pool: &AuxBufferPool<B>,
    decoded_picture: GpuAddress,
    roles: impl IntoIterator<Item = AuxBufferRole>,
) -> PipeBufferAddresses {
    let mut addresses = PipeBufferAddresses {
        decoded_picture,
        ..Default::default()
    };

    for role in roles {
        let address = pool.address(role);
        let entry = match role {
            AuxBufferRole::DeblockingFilterLine => &mut addresses.deblocking_filter_line,
            AuxBufferRole::DeblockingFilterTileLine => &mut addresses.deblocking_filter_tile_line,
            AuxBufferRole::DeblockingFilterTileColumn => {
                &mut addresses.deblocking_filter_tile_column
            }
            AuxBufferRole::MetadataLine => &mut addresses.metadata_line,
            AuxBufferRole::MetadataTileLine => &mut addresses.metadata_tile_line,
            AuxBufferRole::MetadataTileColumn => &mut addresses.metadata_tile_column,
            AuxBufferRole::SaoLine => &mut addresses.sao_line,
            AuxBufferRole::SaoTileLine => &mut addresses.sao_tile_line,
            AuxBufferRole::SaoTileColumn => &mut addresses.sao_tile_column,
            AuxBufferRole::HvdLineRowstore => &mut addresses.hvd_line_rowstore,
            AuxBufferRole::HvdTileRowstore => &mut addresses.hvd_tile_rowstore,
            AuxBufferRole::Vp9Probability => &mut addresses.vp9_probability,
            AuxBufferRole::Vp9SegmentId => &mut addresses.vp9_segment_id,
        };
        *entry = address;
    }

    addresses
}

/// Decoding context of a single stream.
pub struct DecodeSession<A: GpuAllocator> {
    resources: SessionResources<A>,
    codec: Option<CodecState<A::Buffer>>,
}

impl<A: GpuAllocator> DecodeSession<A> {
    pub fn new(allocator: A, config: HardwareConfig) -> Self {
        debug!("Creating decode session for {:?}", config.generation);

        Self {
            resources: SessionResources {
                allocator,
                config,
                aux_buffers: AuxBufferPool::new(),
                frame_store: FrameStore::new(),
            },
            codec: None,
        }
    }

    pub fn config(&self) -> &HardwareConfig {
        &self.resources.config
    }

    pub fn allocator(&self) -> &A {
        &self.resources.allocator
    }

    pub fn aux_buffers(&self) -> &AuxBufferPool<A::Buffer> {
        &self.resources.aux_buffers
    }

    pub fn frame_store(&self) -> &FrameStore {
        &self.resources.frame_store
    }

    /// Decodes one frame.
    ///
    /// The parameters are validated before anything else happens: on a validation error, neither
    /// the session nor `batch` are modified.
    pub fn decode_picture(
        &mut self,
        state: &DecodeState,
        surfaces: &mut dyn SurfaceService,
        batch: &mut dyn CommandBatch,
    ) -> DecodeResult<()> {
        match state {
            DecodeState::Hevc(frame) => {
                let pic = hevc::validate(&self.resources.config, frame, &*surfaces)?;

                if !matches!(self.codec, Some(CodecState::Hevc(_))) {
                    debug!("Session now decoding HEVC");
                    self.resources.frame_store = FrameStore::new();
                    self.codec = Some(CodecState::Hevc(HevcState::new()));
                }

                match &mut self.codec {
                    Some(CodecState::Hevc(hevc)) => {
                        hevc.decode(&mut self.resources, frame, pic, surfaces, batch)
                    }
                    _ => unreachable!(),
                }
            }
            DecodeState::Vp9(frame) => {
                let Some(pic) = vp9::validate(&self.resources.config, frame, &*surfaces)? else {
                    debug!("Frame only shows an already decoded one, nothing to decode");
                    return Ok(());
                };

                if !matches!(self.codec, Some(CodecState::Vp9(_))) {
                    debug!("Session now decoding VP9");
                    self.resources.frame_store = FrameStore::new();
                    self.codec = Some(CodecState::Vp9(Vp9State::new()));
                }

                match &mut self.codec {
                    Some(CodecState::Vp9(vp9)) => {
                        vp9.decode(&mut self.resources, frame, pic, surfaces, batch)
                    }
                    _ => unreachable!(),
                }
            }
        }
    }
}

impl<A: GpuAllocator> Drop for DecodeSession<A> {
    fn drop(&mut self) {
        debug!("Destroying decode session");
    }
}

// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Command packets of the HEVC/VP9 codec pipe (HCP).
//!
//! Every packet starts with a header dword carrying the opcode and the packet length in dwords
//! minus two. Packets are appended to a [`CommandStream`] through one builder method per packet,
//! which takes named fields and keeps the bit layout private. The codec-specific packets live in
//! the [`hevc`] and [`vp9`] submodules.

pub mod hevc;
pub mod vp9;

use enumn::N;

use crate::backend::GpuAddress;
use crate::backend::SurfaceFormat;

const COMMAND_TYPE_GFXPIPE: u32 = 3 << 29;
const PIPELINE_MFX_COMMON: u32 = 2 << 27;
const OPCODE_HCP: u32 = 7 << 23;

/// Number of reference pictures the pipe can address.
pub const NUM_HCP_REFERENCES: usize = 8;

#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    PipeModeSelect = 0,
    SurfaceState = 1,
    PipeBufAddrState = 2,
    IndObjBaseAddrState = 3,
    QmState = 4,
    PicState = 16,
    TileState = 17,
    RefIdxState = 18,
    WeightOffsetState = 19,
    SliceState = 20,
    BsdObject = 32,
    Vp9PicState = 48,
    Vp9SegmentState = 50,
}

impl Opcode {
    fn header(self, num_dwords: usize) -> u32 {
        COMMAND_TYPE_GFXPIPE
            | PIPELINE_MFX_COMMON
            | OPCODE_HCP
            | (self as u32) << 16
            | (num_dwords as u32 - 2)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecSelect {
    Hevc = 0,
    Vp9 = 1,
}

/// Surface identifiers of HCP_SURFACE_STATE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceId {
    DecodedPicture = 0,
    Vp9LastReference = 2,
    Vp9GoldenReference = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceState {
    pub id: SurfaceId,
    pub pitch: u32,
    pub y_cb_offset: u32,
    pub format: SurfaceFormat,
}

/// Every buffer the pipe may access while decoding a frame. `None` entries are emitted as null
/// addresses.
#[derive(Clone, Debug, Default)]
pub struct PipeBufferAddresses {
    pub decoded_picture: GpuAddress,
    pub deblocking_filter_line: Option<GpuAddress>,
    pub deblocking_filter_tile_line: Option<GpuAddress>,
    pub deblocking_filter_tile_column: Option<GpuAddress>,
    pub metadata_line: Option<GpuAddress>,
    pub metadata_tile_line: Option<GpuAddress>,
    pub metadata_tile_column: Option<GpuAddress>,
    pub sao_line: Option<GpuAddress>,
    pub sao_tile_line: Option<GpuAddress>,
    pub sao_tile_column: Option<GpuAddress>,
    pub current_mv_temporal: Option<GpuAddress>,
    pub references: [Option<GpuAddress>; NUM_HCP_REFERENCES],
    pub collocated_mv_temporal: [Option<GpuAddress>; NUM_HCP_REFERENCES],
    pub vp9_probability: Option<GpuAddress>,
    pub vp9_segment_id: Option<GpuAddress>,
    pub hvd_line_rowstore: Option<GpuAddress>,
    pub hvd_tile_rowstore: Option<GpuAddress>,
}

/// Flat sequence of command dwords for one frame.
///
/// Nothing reaches the hardware until the whole stream is handed over to a
/// [`crate::backend::CommandBatch`].
#[derive(Debug, Default)]
pub struct CommandStream {
    dwords: Vec<u32>,
    /// Memory object control state attached to every buffer address.
    cache_attributes: u32,
}

impl CommandStream {
    pub fn new(cache_attributes: u32) -> Self {
        Self {
            dwords: Vec::new(),
            cache_attributes,
        }
    }

    pub fn dwords(&self) -> &[u32] {
        &self.dwords
    }

    pub fn len(&self) -> usize {
        self.dwords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dwords.is_empty()
    }

    fn packet(&mut self, opcode: Opcode, body: &[u32]) {
        self.dwords.push(opcode.header(body.len() + 1));
        self.dwords.extend_from_slice(body);
    }

    /// Address followed by its memory attributes.
    fn push_address(&self, body: &mut Vec<u32>, address: Option<GpuAddress>) {
        match address {
            Some(address) => {
                body.extend_from_slice(&address.dwords());
                body.push(self.cache_attributes);
            }
            None => body.extend_from_slice(&[0, 0, 0]),
        }
    }

    /// Address without attributes, as used in arrays sharing a single attribute dword.
    fn push_address_no_attributes(body: &mut Vec<u32>, address: Option<GpuAddress>) {
        body.extend_from_slice(&address.unwrap_or_default().dwords());
    }

    /// HCP_PIPE_MODE_SELECT. Kabylake-class parts take two more dwords.
    pub fn pipe_mode_select(&mut self, codec: CodecSelect, extended: bool) {
        // Bit 0 cleared selects decoding.
        let mut body = vec![(codec as u32) << 5, 0, 0];

        if extended {
            body.push(match codec {
                CodecSelect::Vp9 => 1 << 6,
                CodecSelect::Hevc => 0,
            });
            body.push(0);
        }

        self.packet(Opcode::PipeModeSelect, &body);
    }

    /// HCP_SURFACE_STATE.
    pub fn surface_state(&mut self, state: &SurfaceState) {
        let format: u32 = match state.format {
            SurfaceFormat::Nv12 => 4,
            SurfaceFormat::P010 => 13,
        };

        self.packet(
            Opcode::SurfaceState,
            &[
                (state.id as u32) << 28 | (state.pitch - 1),
                format << 28 | state.y_cb_offset,
            ],
        );
    }

    /// HCP_PIPE_BUF_ADDR_STATE.
    pub fn pipe_buf_addr_state(&mut self, addresses: &PipeBufferAddresses) {
        let mut body = Vec::with_capacity(94);

        // DW 1..33
        for address in [
            Some(addresses.decoded_picture),
            addresses.deblocking_filter_line,
            addresses.deblocking_filter_tile_line,
            addresses.deblocking_filter_tile_column,
            addresses.metadata_line,
            addresses.metadata_tile_line,
            addresses.metadata_tile_column,
            addresses.sao_line,
            addresses.sao_tile_line,
            addresses.sao_tile_column,
            addresses.current_mv_temporal,
        ] {
            self.push_address(&mut body, address);
        }

        // DW 34..36, reserved.
        self.push_address(&mut body, None);

        // DW 37..53
        for address in addresses.references {
            Self::push_address_no_attributes(&mut body, address);
        }
        body.push(self.cache_attributes);

        // DW 54..65: encoder-only surfaces and stream-out.
        for _ in 0..4 {
            self.push_address(&mut body, None);
        }

        // DW 66..82
        for address in addresses.collocated_mv_temporal {
            Self::push_address_no_attributes(&mut body, address);
        }
        body.push(self.cache_attributes);

        // DW 83..94
        for address in [
            addresses.vp9_probability,
            addresses.vp9_segment_id,
            addresses.hvd_line_rowstore,
            addresses.hvd_tile_rowstore,
        ] {
            self.push_address(&mut body, address);
        }

        self.packet(Opcode::PipeBufAddrState, &body);
    }

    /// HCP_IND_OBJ_BASE_ADDR_STATE.
    pub fn ind_obj_base_addr_state(
        &mut self,
        slice_data: GpuAddress,
        compressed_header: Option<GpuAddress>,
    ) {
        let mut body = Vec::with_capacity(13);

        self.push_address(&mut body, Some(slice_data));
        // Upper bound, unused.
        Self::push_address_no_attributes(&mut body, None);
        self.push_address(&mut body, compressed_header);
        self.push_address(&mut body, None);
        Self::push_address_no_attributes(&mut body, None);

        self.packet(Opcode::IndObjBaseAddrState, &body);
    }

    /// HCP_BSD_OBJECT.
    pub fn bsd_object(&mut self, size: u32, offset: u32) {
        self.packet(Opcode::BsdObject, &[size, offset]);
    }
}

/// Splits a command stream back into its packets.
#[cfg(test)]
pub(crate) fn split_packets(dwords: &[u32]) -> Vec<(Opcode, &[u32])> {
    let mut packets = Vec::new();
    let mut rest = dwords;

    while let Some(&header) = rest.first() {
        let opcode = Opcode::n((header >> 16) & 0x7f).expect("unknown opcode");
        let len = (header & 0xfff) as usize + 2;
        let (packet, tail) = rest.split_at(len);
        packets.push((opcode, packet));
        rest = tail;
    }

    packets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encoding() {
        let mut stream = CommandStream::new(2);
        stream.bsd_object(0x100, 0x20);

        assert_eq!(stream.dwords(), &[0x73a0_0001, 0x100, 0x20]);
    }

    #[test]
    fn pipe_mode_select_length() {
        let mut stream = CommandStream::new(2);
        stream.pipe_mode_select(CodecSelect::Vp9, false);
        stream.pipe_mode_select(CodecSelect::Vp9, true);

        let packets = split_packets(stream.dwords());
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].1, &[Opcode::PipeModeSelect.header(4), 1 << 5, 0, 0]);
        assert_eq!(packets[1].1.len(), 6);
        assert_eq!(packets[1].1[4], 1 << 6);
    }

    #[test]
    fn pipe_buf_addr_state_layout() {
        let mut addresses = PipeBufferAddresses {
            decoded_picture: GpuAddress(0x1_0000_1000),
            metadata_line: Some(GpuAddress(0x2000)),
            vp9_probability: Some(GpuAddress(0x3000)),
            ..Default::default()
        };
        addresses.references[1] = Some(GpuAddress(0x4000));
        addresses.collocated_mv_temporal[0] = Some(GpuAddress(0x5000));

        let mut stream = CommandStream::new(7);
        stream.pipe_buf_addr_state(&addresses);
        let dw = stream.dwords();

        assert_eq!(dw.len(), 95);
        assert_eq!(&dw[1..4], &[0x1000, 1, 7]);
        // Absent buffers are null and carry no attributes.
        assert_eq!(&dw[4..7], &[0, 0, 0]);
        assert_eq!(&dw[13..16], &[0x2000, 0, 7]);
        assert_eq!(&dw[37..41], &[0, 0, 0x4000, 0]);
        assert_eq!(dw[53], 7);
        assert_eq!(&dw[66..68], &[0x5000, 0]);
        assert_eq!(dw[82], 7);
        assert_eq!(&dw[83..86], &[0x3000, 0, 7]);
    }

    #[test]
    fn ind_obj_base_addr_state_layout() {
        let mut stream = CommandStream::new(2);
        stream.ind_obj_base_addr_state(GpuAddress(0x8000), Some(GpuAddress(0x9000)));
        let dw = stream.dwords();

        assert_eq!(dw.len(), 14);
        assert_eq!(&dw[1..4], &[0x8000, 0, 2]);
        assert_eq!(&dw[6..9], &[0x9000, 0, 2]);
    }
}

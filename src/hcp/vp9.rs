// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VP9-only HCP packets.

use crate::codec::vp9::params::Header;
use crate::codec::vp9::params::SegmentParameters;
use crate::codec::vp9::params::REFS_PER_FRAME;
use crate::hcp::CommandStream;
use crate::hcp::Opcode;

/// A reference frame as seen by HCP_VP9_PIC_STATE.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReferenceScaling {
    pub width: u32,
    pub height: u32,
    /// Horizontal and vertical scale factors in 2.14 fixed point, or zero if the reference
    /// cannot be scaled to the current frame.
    pub scale_x: u32,
    pub scale_y: u32,
}

/// Values of HCP_VP9_PIC_STATE that are not found as-is in the frame header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PicState {
    /// Frame context actually used, after resets.
    pub frame_context_idx: u8,
    /// Whether the pipe adapts the probabilities at the end of the frame.
    pub adapt_probabilities: bool,
    pub use_prev_frame_mvs: bool,
    pub last_frame_is_key: bool,
    /// LAST, GOLDEN and ALTREF references.
    pub references: [Option<ReferenceScaling>; REFS_PER_FRAME],
}

impl CommandStream {
    /// HCP_VP9_SEGMENT_STATE for segment `id`.
    pub fn vp9_segment_state(&mut self, id: u8, segment: &SegmentParameters) {
        let level = |reference: usize, mode: usize| {
            let shift = 8 * (2 * (reference % 2) + mode);
            (segment.filter_level[reference][mode] as u32 & 0x3f) << shift
        };

        let body = [
            id as u32 & 0x7,
            (segment.reference_skipped as u32) << 3
                | (segment.reference as u32 & 0x3) << 1
                | segment.reference_enabled as u32,
            level(0, 0) | level(0, 1) | level(1, 0) | level(1, 1),
            level(2, 0) | level(2, 1) | level(3, 0) | level(3, 1),
            (segment.luma_ac_quant_scale as u16 as u32) << 16
                | segment.luma_dc_quant_scale as u16 as u32,
            (segment.chroma_ac_quant_scale as u16 as u32) << 16
                | segment.chroma_dc_quant_scale as u16 as u32,
        ];

        self.packet(Opcode::Vp9SegmentState, &body);
    }

    /// HCP_VP9_PIC_STATE.
    pub fn vp9_pic_state(&mut self, hdr: &Header, state: &PicState) {
        let mi_cols = (hdr.width + 7) >> 3;
        let mi_rows = (hdr.height + 7) >> 3;
        let sign_bias = |i: usize| (hdr.ref_frame_sign_bias[i] as u32 & 1);

        let mut body = [0u32; 11];

        body[0] = (mi_rows - 1) << 16 | (mi_cols - 1);
        body[1] = (hdr.frame_type as u32)
            | (state.adapt_probabilities as u32) << 1
            | (hdr.intra_only as u32) << 2
            | (hdr.allow_high_precision_mv as u32) << 3
            | (hdr.interpolation_filter as u32 & 0x7) << 4
            | (hdr.refresh_frame_context as u32) << 7
            | (hdr.error_resilient_mode as u32) << 8
            | (hdr.frame_parallel_decoding_mode as u32) << 9
            | (hdr.seg.enabled as u32) << 10
            | (hdr.seg.update_map as u32) << 11
            | (hdr.seg.temporal_update as u32) << 12
            | (hdr.seg.abs_or_delta_update as u32) << 13
            | (state.use_prev_frame_mvs as u32) << 14
            | (hdr.lossless as u32) << 15
            | (!state.last_frame_is_key as u32) << 16
            | (state.frame_context_idx as u32 & 0x3) << 17
            | sign_bias(1) << 19
            | sign_bias(2) << 20
            | sign_bias(3) << 21;
        body[2] = (hdr.profile as u32) << 28
            | (hdr.bit_depth as u32 - 8) << 24
            | (hdr.tile_rows_log2 as u32 & 0x3) << 8
            | (hdr.tile_cols_log2 as u32 & 0x7);

        for (i, reference) in state.references.iter().enumerate() {
            if let Some(r) = reference {
                body[3 + i] = r.scale_y << 16 | r.scale_x;
                body[6 + i] = (r.height - 1) << 16 | (r.width - 1);
            }
        }

        body[9] = (hdr.header_size_in_bytes as u32) << 16
            | hdr.uncompressed_header_size_in_bytes as u32;
        body[10] = (hdr.quant.base_q_idx as u32) << 16
            | (hdr.lf.sharpness as u32 & 0x7) << 8
            | (hdr.lf.level as u32 & 0x3f);

        self.packet(Opcode::Vp9PicState, &body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::vp9::params::FrameType;

    #[test]
    fn segment_state_layout() {
        let segment = SegmentParameters {
            reference_enabled: true,
            reference: 2,
            filter_level: [[1, 2], [3, 4], [5, 6], [7, 8]],
            luma_ac_quant_scale: 100,
            luma_dc_quant_scale: 50,
            chroma_dc_quant_scale: -1,
            ..Default::default()
        };

        let mut stream = CommandStream::new(0);
        stream.vp9_segment_state(5, &segment);
        let dw = stream.dwords();

        assert_eq!(dw.len(), 7);
        assert_eq!(dw[1], 5);
        assert_eq!(dw[2], 2 << 1 | 1);
        assert_eq!(dw[3], 0x0403_0201);
        assert_eq!(dw[4], 0x0807_0605);
        assert_eq!(dw[5], 100 << 16 | 50);
        assert_eq!(dw[6], 0xffff);
    }

    #[test]
    fn pic_state_layout() {
        let hdr = Header {
            frame_type: FrameType::InterFrame,
            width: 352,
            height: 288,
            refresh_frame_context: true,
            header_size_in_bytes: 300,
            uncompressed_header_size_in_bytes: 20,
            ..Default::default()
        };
        let state = PicState {
            frame_context_idx: 2,
            adapt_probabilities: true,
            use_prev_frame_mvs: true,
            references: [
                Some(ReferenceScaling {
                    width: 352,
                    height: 288,
                    scale_x: 1 << 14,
                    scale_y: 1 << 14,
                }),
                None,
                None,
            ],
            ..Default::default()
        };

        let mut stream = CommandStream::new(0);
        stream.vp9_pic_state(&hdr, &state);
        let dw = stream.dwords();

        assert_eq!(dw.len(), 12);
        assert_eq!(dw[1], 35 << 16 | 43);
        assert_eq!(dw[2], 1 | 1 << 1 | 1 << 7 | 1 << 14 | 1 << 16 | 2 << 17);
        assert_eq!(dw[4], 1 << 30 | 1 << 14);
        assert_eq!(dw[5], 0);
        assert_eq!(dw[7], 287 << 16 | 351);
        assert_eq!(dw[10], 300 << 16 | 20);
    }
}

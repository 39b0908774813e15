// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! HEVC-only HCP packets.

use byteorder::ByteOrder;
use byteorder::LittleEndian;

use crate::codec::hevc::params::IqMatrix;
use crate::codec::hevc::params::PictureParameters;
use crate::codec::hevc::params::PredWeightTable;
use crate::codec::hevc::params::SliceParameters;
use crate::codec::hevc::params::MAX_REF_IDX_ACTIVE;
use crate::codec::hevc::params::MAX_TILE_COLUMNS;
use crate::codec::hevc::params::MAX_TILE_ROWS;
use crate::geometry::FrameGeometry;
use crate::hcp::CommandStream;
use crate::hcp::Opcode;

/// Number of entries of the REF_IDX_STATE and WEIGHTOFFSET_STATE tables.
const NUM_REF_IDX_ENTRIES: usize = 16;

/// Number of bytes of the tile column and row position tables of TILE_STATE.
const TILE_COLUMN_POSITION_BYTES: usize = 20;
const TILE_ROW_POSITION_BYTES: usize = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QmSize {
    Size4x4 = 0,
    Size8x8 = 1,
    Size16x16 = 2,
    Size32x32 = 3,
}

/// Collocated picture used for temporal motion vector prediction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollocatedReference {
    /// Frame store slot of the collocated picture.
    pub slot: u8,
    pub from_l0: bool,
}

/// Values of HCP_SLICE_STATE that are not found as-is in the slice parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SliceState {
    /// Horizontal and vertical position of the first CTB of the slice.
    pub position: (u32, u32),
    /// Position of the first CTB of the next slice, or `None` for the last slice of the picture.
    pub next_position: Option<(u32, u32)>,
    pub collocated: CollocatedReference,
    /// Whether no reference picture follows the current one in output order.
    pub low_delay: bool,
}

/// One entry of a REF_IDX_STATE table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefIdxEntry {
    pub slot: u8,
    /// Difference between the POC of the current picture and the one of the reference.
    pub poc_diff: i32,
    pub long_term: bool,
    pub field_pic: bool,
    pub bottom_field: bool,
}

/// Packs a byte table into dwords, little-endian.
fn pack_bytes<const N: usize>(bytes: &[u8]) -> [u32; N] {
    let mut dwords = [0u32; N];
    LittleEndian::read_u32_into(bytes, &mut dwords);
    dwords
}

/// Start positions, in CTBs, of each tile along one dimension (H.265 6.5.1).
fn tile_positions(
    num_tiles: usize,
    size_minus1: &[u16],
    uniform_spacing: bool,
    pic_size_in_ctbs: u32,
) -> Vec<u32> {
    let mut positions = Vec::with_capacity(num_tiles);
    let mut position = 0;

    for i in 0..num_tiles {
        positions.push(position);

        position = if uniform_spacing {
            ((i as u32 + 1) * pic_size_in_ctbs) / num_tiles as u32
        } else {
            position + size_minus1.get(i).copied().unwrap_or_default() as u32 + 1
        };
    }

    positions
}

impl CommandStream {
    fn hevc_qm(&mut self, size: QmSize, color_component: u32, pred_type: u32, dc: u8, list: &[u8]) {
        let mut matrix = [0u8; 64];
        matrix[..list.len()].copy_from_slice(list);

        let mut body =
            vec![(dc as u32) << 5 | color_component << 3 | (size as u32) << 1 | pred_type];
        body.extend_from_slice(&pack_bytes::<16>(&matrix));

        self.packet(Opcode::QmState, &body);
    }

    /// The 24 HCP_QM_STATE packets covering all scaling lists.
    pub fn hevc_qm_state(&mut self, iq: &IqMatrix) {
        for (i, list) in iq.scaling_list_4x4.iter().enumerate() {
            self.hevc_qm(QmSize::Size4x4, i as u32 % 3, i as u32 / 3, 0, list);
        }

        for (i, list) in iq.scaling_list_8x8.iter().enumerate() {
            self.hevc_qm(QmSize::Size8x8, i as u32 % 3, i as u32 / 3, 0, list);
        }

        for (i, list) in iq.scaling_list_16x16.iter().enumerate() {
            let dc = iq.scaling_list_dc_16x16[i];
            self.hevc_qm(QmSize::Size16x16, i as u32 % 3, i as u32 / 3, dc, list);
        }

        // Chroma 32x32 lists are not coded and reuse the 16x16 ones.
        for i in 0..6 {
            let (component, pred_type) = (i as u32 % 3, i as u32 / 3);
            let (list, dc) = if component == 0 {
                let j = pred_type as usize;
                (&iq.scaling_list_32x32[j], iq.scaling_list_dc_32x32[j])
            } else {
                (&iq.scaling_list_16x16[i], iq.scaling_list_dc_16x16[i])
            };

            self.hevc_qm(QmSize::Size32x32, component, pred_type, dc, list);
        }
    }

    /// HCP_PIC_STATE.
    pub fn hevc_pic_state(&mut self, pic: &PictureParameters, geometry: &FrameGeometry) {
        let min_cb_log2_minus3 = pic.log2_min_luma_coding_block_size_minus3 as u32;
        let max_cb_log2_minus3 =
            min_cb_log2_minus3 + pic.log2_diff_max_min_luma_coding_block_size as u32;
        let min_tu_log2_minus2 = pic.log2_min_transform_block_size_minus2 as u32;
        let max_tu_log2_minus2 =
            min_tu_log2_minus2 + pic.log2_diff_max_min_transform_block_size as u32;
        let min_pcm_log2_minus3 = pic.log2_min_pcm_luma_coding_block_size_minus3 as u32;
        let max_pcm_log2_minus3 =
            min_pcm_log2_minus3 + pic.log2_diff_max_min_pcm_luma_coding_block_size as u32;

        let mut body = [0u32; 18];

        body[0] =
            (geometry.height_in_min_blocks - 1) << 16 | (geometry.width_in_min_blocks - 1);
        body[1] = max_pcm_log2_minus3 << 10
            | min_pcm_log2_minus3 << 8
            | max_tu_log2_minus2 << 6
            | min_tu_log2_minus2 << 4
            | max_cb_log2_minus3 << 2
            | min_cb_log2_minus3;
        body[3] = (pic.strong_intra_smoothing_enabled_flag as u32) << 26
            | (pic.transquant_bypass_enabled_flag as u32) << 25
            | (pic.amp_enabled_flag as u32) << 23
            | (pic.transform_skip_enabled_flag as u32) << 22
            | (pic.current.field_pic as u32) << 21
            | (pic.current.bottom_field as u32) << 20
            | (pic.weighted_pred_flag as u32) << 19
            | (pic.weighted_bipred_flag as u32) << 18
            | (pic.tiles_enabled_flag as u32) << 17
            | (pic.entropy_coding_sync_enabled_flag as u32) << 16
            | (pic.loop_filter_across_tiles_enabled_flag as u32) << 15
            | (pic.sign_data_hiding_enabled_flag as u32) << 13
            | (pic.log2_parallel_merge_level_minus2 as u32 & 0x7) << 10
            | (pic.constrained_intra_pred_flag as u32) << 9
            | (pic.pcm_loop_filter_disabled_flag as u32) << 8
            | (pic.diff_cu_qp_delta_depth as u32 & 0x3) << 6
            | (pic.cu_qp_delta_enabled_flag as u32) << 5
            | (pic.pcm_enabled_flag as u32) << 4
            | (pic.sample_adaptive_offset_enabled_flag as u32) << 3
            | (pic.scaling_list_enabled_flag as u32) << 2;
        body[4] = (pic.bit_depth_chroma_minus8 as u32) << 27
            | (pic.bit_depth_luma_minus8 as u32) << 24
            | (pic.pcm_sample_bit_depth_luma_minus1 as u32 & 0xf) << 20
            | (pic.pcm_sample_bit_depth_chroma_minus1 as u32 & 0xf) << 16
            | (pic.max_transform_hierarchy_depth_inter as u32 & 0x7) << 13
            | (pic.max_transform_hierarchy_depth_intra as u32 & 0x7) << 10
            | (pic.pps_cr_qp_offset as u32 & 0x1f) << 5
            | (pic.pps_cb_qp_offset as u32 & 0x1f);

        self.packet(Opcode::PicState, &body);
    }

    /// HCP_TILE_STATE.
    pub fn hevc_tile_state(&mut self, pic: &PictureParameters, geometry: &FrameGeometry) {
        let num_columns = pic.num_tile_columns_minus1 as usize + 1;
        let num_rows = pic.num_tile_rows_minus1 as usize + 1;

        let mut column_bytes = [0u8; TILE_COLUMN_POSITION_BYTES];
        let mut row_bytes = [0u8; TILE_ROW_POSITION_BYTES];

        let columns = tile_positions(
            num_columns.min(MAX_TILE_COLUMNS),
            &pic.column_width_minus1,
            pic.uniform_spacing_flag,
            geometry.width_in_blocks,
        );
        let rows = tile_positions(
            num_rows.min(MAX_TILE_ROWS),
            &pic.row_height_minus1,
            pic.uniform_spacing_flag,
            geometry.height_in_blocks,
        );

        for (byte, position) in column_bytes.iter_mut().zip(columns) {
            *byte = position as u8;
        }
        for (byte, position) in row_bytes.iter_mut().zip(rows) {
            *byte = position as u8;
        }

        let mut body =
            vec![(pic.num_tile_columns_minus1 as u32) << 5 | pic.num_tile_rows_minus1 as u32];
        body.extend_from_slice(&pack_bytes::<5>(&column_bytes));
        body.extend_from_slice(&pack_bytes::<6>(&row_bytes));

        self.packet(Opcode::TileState, &body);
    }

    /// HCP_SLICE_STATE.
    pub fn hevc_slice_state(
        &mut self,
        pic: &PictureParameters,
        slice: &SliceParameters,
        state: &SliceState,
    ) {
        let slice_qp = 26 + pic.init_qp_minus26 as i32 + slice.slice_qp_delta as i32;
        let (next_hor, next_ver) = state.next_position.unwrap_or_default();
        let last_slice = state.next_position.is_none();
        let max_merge_cand_minus1 = 4u32.saturating_sub(slice.five_minus_max_num_merge_cand as u32);
        let weights = &slice.pred_weight_table;
        let chroma_log2_weight_denom =
            weights.luma_log2_weight_denom as i32 + weights.delta_chroma_log2_weight_denom as i32;

        let body = [
            state.position.1 << 16 | state.position.0,
            next_ver << 16 | next_hor,
            (slice.slice_cr_qp_offset as u32 & 0x1f) << 17
                | (slice.slice_cb_qp_offset as u32 & 0x1f) << 12
                | (slice_qp as u32 & 0x3f) << 6
                | (slice.slice_temporal_mvp_enabled_flag as u32) << 5
                | (slice.dependent_slice_segment_flag as u32) << 4
                | (last_slice as u32) << 2
                | slice.slice_type as u32,
            (state.collocated.slot as u32 & 0x7) << 26
                | max_merge_cand_minus1 << 23
                | (slice.cabac_init_flag as u32) << 22
                | (weights.luma_log2_weight_denom as u32 & 0x7) << 19
                | (chroma_log2_weight_denom as u32 & 0x7) << 16
                | (state.collocated.from_l0 as u32) << 15
                | (state.low_delay as u32) << 14
                | (slice.mvd_l1_zero_flag as u32) << 13
                | (slice.slice_sao_luma_flag as u32) << 12
                | (slice.slice_sao_chroma_flag as u32) << 11
                | (slice.slice_loop_filter_across_slices_enabled_flag as u32) << 10
                | (slice.slice_beta_offset_div2 as u32 & 0xf) << 5
                | (slice.slice_tc_offset_div2 as u32 & 0xf) << 1
                | slice.slice_deblocking_filter_disabled_flag as u32,
            slice.slice_data_byte_offset,
            0,
            0,
            0,
        ];

        self.packet(Opcode::SliceState, &body);
    }

    /// HCP_REF_IDX_STATE for reference list `list`. Entries past `entries` are unused.
    pub fn hevc_ref_idx_state(&mut self, list: usize, entries: &[RefIdxEntry]) {
        let num_ref_idx_active_minus1 = entries.len().saturating_sub(1) as u32;
        let mut body = [0u32; NUM_REF_IDX_ENTRIES + 1];

        body[0] = num_ref_idx_active_minus1 << 1 | list as u32;

        for (dw, entry) in body[1..].iter_mut().zip(entries) {
            let poc_diff = crate::utils::clip3(-128, 127, entry.poc_diff);

            *dw = (!entry.bottom_field as u32) << 15
                | (entry.field_pic as u32) << 14
                | (entry.long_term as u32) << 13
                | (entry.slot as u32 & 0x7) << 8
                | (poc_diff as u32 & 0xff);
        }

        self.packet(Opcode::RefIdxState, &body);
    }

    /// HCP_WEIGHTOFFSET_STATE for reference list `list`.
    pub fn hevc_weight_offset_state(
        &mut self,
        list: usize,
        weights: &PredWeightTable,
        num_entries: usize,
    ) {
        let mut body = [0u32; 2 * NUM_REF_IDX_ENTRIES + 1];
        let num_entries = num_entries.min(MAX_REF_IDX_ACTIVE);

        body[0] = list as u32;

        for i in 0..num_entries {
            body[1 + i] = (weights.luma_offset[list][i] as u32 & 0xff) << 8
                | (weights.delta_luma_weight[list][i] as u32 & 0xff);

            let weight = weights.delta_chroma_weight[list][i];
            let offset = weights.chroma_offset[list][i];
            body[1 + NUM_REF_IDX_ENTRIES + i] = (offset[1] as u32 & 0xff) << 24
                | (weight[1] as u32 & 0xff) << 16
                | (offset[0] as u32 & 0xff) << 8
                | (weight[0] as u32 & 0xff);
        }

        self.packet(Opcode::WeightOffsetState, &body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hcp::split_packets;

    #[test]
    fn qm_state_flat() {
        let mut stream = CommandStream::new(0);
        stream.hevc_qm_state(&IqMatrix::default());

        let packets = split_packets(stream.dwords());
        assert_eq!(packets.len(), 24);
        assert!(packets
            .iter()
            .all(|(opcode, dw)| *opcode == Opcode::QmState && dw.len() == 18));

        // 4x4 lists only fill the first 16 bytes.
        assert_eq!(packets[0].1[1], 0);
        assert_eq!(packets[0].1[2], 0x1010_1010);
        assert_eq!(packets[0].1[6], 0);

        // 32x32, intra, luma: dc, size id, component and prediction type.
        assert_eq!(packets[18].1[1], 16 << 5 | 3 << 1);
        // 32x32, inter, Cr.
        assert_eq!(packets[23].1[1], 16 << 5 | 2 << 3 | 3 << 1 | 1);
    }

    #[test]
    fn qm_state_32x32_chroma_reuses_16x16() {
        let mut iq = IqMatrix::default();
        iq.scaling_list_16x16[4] = [7; 64];
        iq.scaling_list_dc_16x16[4] = 9;
        iq.scaling_list_32x32[1] = [3; 64];

        let mut stream = CommandStream::new(0);
        stream.hevc_qm_state(&iq);
        let packets = split_packets(stream.dwords());

        // Index 4 of the 32x32 block is inter Cb.
        assert_eq!(packets[22].1[1] >> 5, 9);
        assert_eq!(packets[22].1[2], 0x0707_0707);
        // Index 3 is inter luma, from the second 32x32 list.
        assert_eq!(packets[21].1[2], 0x0303_0303);
    }

    #[test]
    fn tile_positions_uniform_and_explicit() {
        assert_eq!(tile_positions(3, &[], true, 30), vec![0, 10, 20]);
        assert_eq!(tile_positions(3, &[], true, 17), vec![0, 5, 11]);
        assert_eq!(tile_positions(3, &[4, 9, 0], false, 30), vec![0, 5, 15]);
    }

    #[test]
    fn tile_state_layout() {
        let pic = PictureParameters {
            tiles_enabled_flag: true,
            uniform_spacing_flag: true,
            num_tile_columns_minus1: 2,
            num_tile_rows_minus1: 1,
            ..Default::default()
        };
        let geometry = FrameGeometry::hevc(1920, 1080, 3, 3);

        let mut stream = CommandStream::new(0);
        stream.hevc_tile_state(&pic, &geometry);
        let dw = stream.dwords();

        assert_eq!(dw.len(), 13);
        assert_eq!(dw[1], 2 << 5 | 1);
        assert_eq!(dw[2], 20 << 16 | 10 << 8);
        // Rows start at 0 and 8.
        assert_eq!(dw[7], 8 << 8);
    }

    #[test]
    fn ref_idx_state_clamps_poc_diff() {
        let entries = [
            RefIdxEntry {
                slot: 3,
                poc_diff: 300,
                ..Default::default()
            },
            RefIdxEntry {
                slot: 1,
                poc_diff: -300,
                long_term: true,
                ..Default::default()
            },
            RefIdxEntry {
                slot: 2,
                poc_diff: -2,
                ..Default::default()
            },
        ];

        let mut stream = CommandStream::new(0);
        stream.hevc_ref_idx_state(1, &entries);
        let dw = stream.dwords();

        assert_eq!(dw.len(), 18);
        assert_eq!(dw[1], 2 << 1 | 1);
        assert_eq!(dw[2], 1 << 15 | 3 << 8 | 127);
        assert_eq!(dw[3], 1 << 15 | 1 << 13 | 1 << 8 | 0x80);
        assert_eq!(dw[4], 1 << 15 | 2 << 8 | 0xfe);
        assert_eq!(dw[5], 0);
    }

    #[test]
    fn weight_offset_state_layout() {
        let mut weights = PredWeightTable::default();
        weights.delta_luma_weight[0][1] = -3;
        weights.luma_offset[0][1] = 5;
        weights.delta_chroma_weight[0][1] = [1, 2];
        weights.chroma_offset[0][1] = [-1, 4];

        let mut stream = CommandStream::new(0);
        stream.hevc_weight_offset_state(0, &weights, 2);
        let dw = stream.dwords();

        assert_eq!(dw.len(), 34);
        assert_eq!(dw[1], 0);
        assert_eq!(dw[3], 5 << 8 | 0xfd);
        assert_eq!(dw[19], 4 << 24 | 2 << 16 | 0xff << 8 | 1);
    }
}

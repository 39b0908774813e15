// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Already-parsed HEVC picture and slice parameters, as handed over by the bitstream parser and
//! the DPB management of the caller.

use enumn::N;

use crate::backend::SurfaceHandle;

/// Maximum number of entries of a reference picture list.
pub const MAX_REF_IDX_ACTIVE: usize = 15;
pub const MAX_TILE_COLUMNS: usize = 20;
pub const MAX_TILE_ROWS: usize = 22;

/// Index into a reference picture list that does not point to any picture.
pub const INVALID_REF_IDX: u8 = 0xff;

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
/// See table 7-7 in the H.265 specification.
pub enum SliceType {
    B = 0,
    #[default]
    P = 1,
    I = 2,
}

impl SliceType {
    /// Whether this is a P slice. See table 7-7 in the H.265 specification.
    pub fn is_p(&self) -> bool {
        matches!(self, SliceType::P)
    }

    /// Whether this is a B slice. See table 7-7 in the H.265 specification.
    pub fn is_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    /// Whether this is an I slice. See table 7-7 in the H.265 specification.
    pub fn is_i(&self) -> bool {
        matches!(self, SliceType::I)
    }
}

/// A picture, as referenced by the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PictureReference {
    pub surface: SurfaceHandle,
    pub pic_order_cnt: i32,
    pub long_term: bool,
    pub field_pic: bool,
    pub bottom_field: bool,
}

impl PictureReference {
    pub fn new(surface: SurfaceHandle, pic_order_cnt: i32) -> Self {
        Self {
            surface,
            pic_order_cnt,
            long_term: false,
            field_pic: false,
            bottom_field: false,
        }
    }
}

/// Picture-level parameters, gathered from the SPS and PPS in use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PictureParameters {
    pub current: PictureReference,
    /// Pictures of the current reference picture set. `RefPicList` entries index into this.
    pub reference_frames: Vec<PictureReference>,

    pub pic_width_in_luma_samples: u16,
    pub pic_height_in_luma_samples: u16,
    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,

    pub pcm_enabled_flag: bool,
    pub pcm_sample_bit_depth_luma_minus1: u8,
    pub pcm_sample_bit_depth_chroma_minus1: u8,
    pub log2_min_pcm_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_pcm_luma_coding_block_size: u8,
    pub pcm_loop_filter_disabled_flag: bool,

    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub log2_min_transform_block_size_minus2: u8,
    pub log2_diff_max_min_transform_block_size: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub max_transform_hierarchy_depth_intra: u8,

    pub scaling_list_enabled_flag: bool,
    pub amp_enabled_flag: bool,
    pub sample_adaptive_offset_enabled_flag: bool,
    pub strong_intra_smoothing_enabled_flag: bool,
    pub sign_data_hiding_enabled_flag: bool,
    pub constrained_intra_pred_flag: bool,
    pub transform_skip_enabled_flag: bool,
    pub cu_qp_delta_enabled_flag: bool,
    pub diff_cu_qp_delta_depth: u8,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_flag: bool,
    pub transquant_bypass_enabled_flag: bool,
    pub entropy_coding_sync_enabled_flag: bool,
    pub pps_loop_filter_across_slices_enabled_flag: bool,
    pub log2_parallel_merge_level_minus2: u8,

    pub init_qp_minus26: i8,
    pub pps_cb_qp_offset: i8,
    pub pps_cr_qp_offset: i8,

    pub tiles_enabled_flag: bool,
    pub uniform_spacing_flag: bool,
    pub loop_filter_across_tiles_enabled_flag: bool,
    pub num_tile_columns_minus1: u8,
    pub num_tile_rows_minus1: u8,
    pub column_width_minus1: [u16; MAX_TILE_COLUMNS - 1],
    pub row_height_minus1: [u16; MAX_TILE_ROWS - 1],
}

impl Default for PictureParameters {
    fn default() -> Self {
        Self {
            current: PictureReference::new(SurfaceHandle(0), 0),
            reference_frames: Default::default(),
            pic_width_in_luma_samples: 0,
            pic_height_in_luma_samples: 0,
            chroma_format_idc: 1,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            pcm_enabled_flag: false,
            pcm_sample_bit_depth_luma_minus1: 0,
            pcm_sample_bit_depth_chroma_minus1: 0,
            log2_min_pcm_luma_coding_block_size_minus3: 0,
            log2_diff_max_min_pcm_luma_coding_block_size: 0,
            pcm_loop_filter_disabled_flag: false,
            log2_min_luma_coding_block_size_minus3: 0,
            log2_diff_max_min_luma_coding_block_size: 3,
            log2_min_transform_block_size_minus2: 0,
            log2_diff_max_min_transform_block_size: 3,
            max_transform_hierarchy_depth_inter: 0,
            max_transform_hierarchy_depth_intra: 0,
            scaling_list_enabled_flag: false,
            amp_enabled_flag: false,
            sample_adaptive_offset_enabled_flag: false,
            strong_intra_smoothing_enabled_flag: false,
            sign_data_hiding_enabled_flag: false,
            constrained_intra_pred_flag: false,
            transform_skip_enabled_flag: false,
            cu_qp_delta_enabled_flag: false,
            diff_cu_qp_delta_depth: 0,
            weighted_pred_flag: false,
            weighted_bipred_flag: false,
            transquant_bypass_enabled_flag: false,
            entropy_coding_sync_enabled_flag: false,
            pps_loop_filter_across_slices_enabled_flag: false,
            log2_parallel_merge_level_minus2: 0,
            init_qp_minus26: 0,
            pps_cb_qp_offset: 0,
            pps_cr_qp_offset: 0,
            tiles_enabled_flag: false,
            uniform_spacing_flag: false,
            loop_filter_across_tiles_enabled_flag: false,
            num_tile_columns_minus1: 0,
            num_tile_rows_minus1: 0,
            column_width_minus1: [0; MAX_TILE_COLUMNS - 1],
            row_height_minus1: [0; MAX_TILE_ROWS - 1],
        }
    }
}

impl PictureParameters {
    pub fn bit_depth(&self) -> u8 {
        self.bit_depth_luma_minus8 + 8
    }

    pub fn log2_min_cb_size(&self) -> u8 {
        self.log2_min_luma_coding_block_size_minus3 + 3
    }

    pub fn log2_ctb_size(&self) -> u8 {
        self.log2_min_cb_size() + self.log2_diff_max_min_luma_coding_block_size
    }
}

/// Explicit weighted prediction parameters, with chroma offsets already derived.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredWeightTable {
    pub luma_log2_weight_denom: u8,
    pub delta_chroma_log2_weight_denom: i8,
    pub delta_luma_weight: [[i8; MAX_REF_IDX_ACTIVE]; 2],
    pub luma_offset: [[i8; MAX_REF_IDX_ACTIVE]; 2],
    pub delta_chroma_weight: [[[i8; 2]; MAX_REF_IDX_ACTIVE]; 2],
    pub chroma_offset: [[[i8; 2]; MAX_REF_IDX_ACTIVE]; 2],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceParameters {
    /// Number of bytes of slice data, slice header included.
    pub slice_data_size: u32,
    /// Offset of the slice in the slice data buffer.
    pub slice_data_offset: u32,
    /// Size of the slice header, i.e. offset of the slice data proper.
    pub slice_data_byte_offset: u32,
    pub slice_segment_address: u32,
    /// Indices into `PictureParameters::reference_frames`, or `INVALID_REF_IDX`.
    pub ref_pic_list: [[u8; MAX_REF_IDX_ACTIVE]; 2],
    pub slice_type: SliceType,
    pub dependent_slice_segment_flag: bool,
    pub slice_temporal_mvp_enabled_flag: bool,
    pub slice_sao_luma_flag: bool,
    pub slice_sao_chroma_flag: bool,
    pub mvd_l1_zero_flag: bool,
    pub cabac_init_flag: bool,
    pub collocated_from_l0_flag: bool,
    pub collocated_ref_idx: u8,
    pub slice_deblocking_filter_disabled_flag: bool,
    pub slice_loop_filter_across_slices_enabled_flag: bool,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub slice_qp_delta: i8,
    pub slice_cb_qp_offset: i8,
    pub slice_cr_qp_offset: i8,
    pub slice_beta_offset_div2: i8,
    pub slice_tc_offset_div2: i8,
    pub five_minus_max_num_merge_cand: u8,
    pub pred_weight_table: PredWeightTable,
}

impl Default for SliceParameters {
    fn default() -> Self {
        Self {
            slice_data_size: 0,
            slice_data_offset: 0,
            slice_data_byte_offset: 0,
            slice_segment_address: 0,
            ref_pic_list: [[INVALID_REF_IDX; MAX_REF_IDX_ACTIVE]; 2],
            slice_type: SliceType::I,
            dependent_slice_segment_flag: false,
            slice_temporal_mvp_enabled_flag: false,
            slice_sao_luma_flag: false,
            slice_sao_chroma_flag: false,
            mvd_l1_zero_flag: false,
            cabac_init_flag: false,
            collocated_from_l0_flag: true,
            collocated_ref_idx: 0,
            slice_deblocking_filter_disabled_flag: false,
            slice_loop_filter_across_slices_enabled_flag: false,
            num_ref_idx_l0_active_minus1: 0,
            num_ref_idx_l1_active_minus1: 0,
            slice_qp_delta: 0,
            slice_cb_qp_offset: 0,
            slice_cr_qp_offset: 0,
            slice_beta_offset_div2: 0,
            slice_tc_offset_div2: 0,
            five_minus_max_num_merge_cand: 0,
            pred_weight_table: Default::default(),
        }
    }
}

impl SliceParameters {
    /// Number of active entries of reference picture list `list`.
    pub fn num_ref_idx_active(&self, list: usize) -> usize {
        match (list, self.slice_type) {
            (_, SliceType::I) => 0,
            (1, SliceType::P) => 0,
            (0, _) => self.num_ref_idx_l0_active_minus1 as usize + 1,
            _ => self.num_ref_idx_l1_active_minus1 as usize + 1,
        }
    }
}

/// Inverse quantization matrices, in raster order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IqMatrix {
    pub scaling_list_4x4: [[u8; 16]; 6],
    pub scaling_list_8x8: [[u8; 64]; 6],
    pub scaling_list_16x16: [[u8; 64]; 6],
    pub scaling_list_32x32: [[u8; 64]; 2],
    pub scaling_list_dc_16x16: [u8; 6],
    pub scaling_list_dc_32x32: [u8; 2],
}

impl Default for IqMatrix {
    /// Flat matrices, used when scaling lists are disabled.
    fn default() -> Self {
        Self {
            scaling_list_4x4: [[16; 16]; 6],
            scaling_list_8x8: [[16; 64]; 6],
            scaling_list_16x16: [[16; 64]; 6],
            scaling_list_32x32: [[16; 64]; 2],
            scaling_list_dc_16x16: [16; 6],
            scaling_list_dc_32x32: [16; 2],
        }
    }
}

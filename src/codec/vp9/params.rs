// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Already-parsed VP9 frame parameters, as handed over by the bitstream parser.

use enumn::N;

use crate::backend::SurfaceHandle;

pub const REFS_PER_FRAME: usize = 3;

pub const MAX_REF_LF_DELTAS: usize = 4;
pub const MAX_MODE_LF_DELTAS: usize = 2;

pub const LAST_FRAME: usize = 1;
pub const MAX_REF_FRAMES: usize = 4;

pub const MAX_SEGMENTS: usize = 8;
pub const SEG_TREE_PROBS: usize = MAX_SEGMENTS - 1;
pub const PREDICTION_PROBS: usize = 3;

pub const SEG_LVL_MAX: usize = 4;

pub const REF_FRAMES_LOG2: usize = 3;
pub const FRAME_CONTEXTS_LOG2: usize = 2;
pub const FRAME_CONTEXTS: usize = 1 << FRAME_CONTEXTS_LOG2;

pub const FRAME_MARKER: u32 = 0x02;
pub const SYNC_CODE: u32 = 0x498342;

/// Frame sizes are coded minus one on 16 bits.
pub const MAX_FRAME_SIZE: u32 = 1 << 16;

pub const MIN_TILE_WIDTH_B64: u32 = 4;
pub const MAX_TILE_WIDTH_B64: u32 = 64;

/// Reference slots of a VP9 decoder.
pub const NUM_REF_FRAMES: usize = 1 << REF_FRAMES_LOG2;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum InterpolationFilter {
    #[default]
    EightTap = 0,
    EightTapSmooth = 1,
    EightTapSharp = 2,
    Bilinear = 3,
    Switchable = 4,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum FrameType {
    #[default]
    KeyFrame = 0,
    InterFrame = 1,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum Profile {
    #[default]
    Profile0 = 0,
    Profile1 = 1,
    Profile2 = 2,
    Profile3 = 3,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum BitDepth {
    #[default]
    Depth8 = 8,
    Depth10 = 10,
    Depth12 = 12,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum ColorSpace {
    #[default]
    Unknown = 0,
    Bt601 = 1,
    Bt709 = 2,
    Smpte170 = 3,
    Smpte240 = 4,
    Bt2020 = 5,
    Reserved2 = 6,
    CsSrgb = 7,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum ColorRange {
    #[default]
    StudioSwing = 0,
    FullSwing = 1,
}

/// Loop filter syntax of the uncompressed header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopFilterParams {
    pub level: u8,
    pub sharpness: u8,
    /// Filter level adjusted per reference frame and mode.
    pub delta_enabled: bool,
    /// Deltas are coded in this header.
    pub delta_update: bool,
    pub update_ref_delta: [bool; MAX_REF_LF_DELTAS],
    pub ref_deltas: [i8; MAX_REF_LF_DELTAS],
    pub update_mode_delta: [bool; MAX_MODE_LF_DELTAS],
    pub mode_deltas: [i8; MAX_MODE_LF_DELTAS],
}

/// Quantizer syntax. The deltas are relative to `base_q_idx`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuantizationParams {
    pub base_q_idx: u8,
    pub delta_q_y_dc: i8,
    pub delta_q_uv_dc: i8,
    pub delta_q_uv_ac: i8,
}

/// Segmentation syntax of the uncompressed header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentationParams {
    pub enabled: bool,
    /// A new segment map is decoded. Otherwise the previous frame's map is kept.
    pub update_map: bool,
    /// Segment id tree probabilities, 255 when not coded.
    pub tree_probs: [u8; SEG_TREE_PROBS],
    /// Segment id prediction probabilities, 255 when not coded.
    pub pred_probs: [u8; PREDICTION_PROBS],
    /// The map is coded relative to the previous one.
    pub temporal_update: bool,
    /// Per-segment feature data follows.
    pub update_data: bool,
    /// Feature values are absolute rather than deltas.
    pub abs_or_delta_update: bool,
    pub feature_enabled: [[bool; SEG_LVL_MAX]; MAX_SEGMENTS],
    pub feature_data: [[i16; SEG_LVL_MAX]; MAX_SEGMENTS],
}

/// VP9 uncompressed header, with the sizes the parser measured.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub profile: Profile,
    pub bit_depth: BitDepth,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
    pub color_space: ColorSpace,
    pub color_range: ColorRange,
    /// Nothing is decoded: the frame in slot `frame_to_show_map_idx` is output again.
    pub show_existing_frame: bool,
    pub frame_to_show_map_idx: u8,
    pub frame_type: FrameType,
    pub show_frame: bool,
    pub error_resilient_mode: bool,
    /// Frame size in pixels.
    pub width: u32,
    pub height: u32,
    pub render_and_frame_size_different: bool,
    pub render_width: u32,
    pub render_height: u32,
    pub intra_only: bool,
    /// 0 or 1: no reset. 2: reset the frame's context. 3: reset all contexts.
    pub reset_frame_context: u8,
    /// Reference slots this frame replaces once decoded.
    pub refresh_frame_flags: u8,
    /// Slots holding the LAST, GOLDEN and ALTREF references.
    pub ref_frame_idx: [u8; REFS_PER_FRAME],
    /// Indexed by reference frame type, intra at 0.
    pub ref_frame_sign_bias: [u8; MAX_REF_FRAMES],
    pub allow_high_precision_mv: bool,
    pub interpolation_filter: InterpolationFilter,
    /// Adapted probabilities are saved into context `frame_context_idx`.
    pub refresh_frame_context: bool,
    pub frame_parallel_decoding_mode: bool,
    pub frame_context_idx: u8,
    pub lf: LoopFilterParams,
    pub quant: QuantizationParams,
    pub seg: SegmentationParams,
    pub tile_cols_log2: u8,
    pub tile_rows_log2: u8,
    /// Derived: base and delta quantizers are all zero.
    pub lossless: bool,
    /// Size of the compressed header in bytes.
    pub header_size_in_bytes: u16,
    /// Size of the uncompressed header in bytes.
    pub uncompressed_header_size_in_bytes: u16,
}

impl Header {
    pub fn is_key_frame(&self) -> bool {
        matches!(self.frame_type, FrameType::KeyFrame)
    }

    /// Whether the frame is decoded without any inter prediction.
    pub fn frame_is_intra(&self) -> bool {
        self.is_key_frame() || self.intra_only
    }
}

/// Per-segment values derived by the parser from the segmentation and loop filter parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentParameters {
    pub reference_enabled: bool,
    /// Reference frame forced by the segment, if `reference_enabled`.
    pub reference: u8,
    pub reference_skipped: bool,
    /// Loop filter level for each reference frame type and mode (zero-mv or not).
    pub filter_level: [[u8; MAX_MODE_LF_DELTAS]; MAX_REF_FRAMES],
    pub luma_ac_quant_scale: i16,
    pub luma_dc_quant_scale: i16,
    pub chroma_ac_quant_scale: i16,
    pub chroma_dc_quant_scale: i16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PictureParameters {
    pub header: Header,
    /// Surfaces currently held by the eight reference slots.
    pub reference_frames: [Option<SurfaceHandle>; NUM_REF_FRAMES],
}

impl PictureParameters {
    /// Returns the surface used as LAST, GOLDEN or ALTREF reference by this frame.
    pub fn active_reference(&self, i: usize) -> Option<SurfaceHandle> {
        if self.header.frame_is_intra() {
            return None;
        }

        self.reference_frames
            .get(self.header.ref_frame_idx[i] as usize)
            .copied()
            .flatten()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceParameters {
    /// Size of the frame data, uncompressed header included.
    pub slice_data_size: u32,
    /// Offset of the frame data in the slice data buffer.
    pub slice_data_offset: u32,
    pub segments: [SegmentParameters; MAX_SEGMENTS],
}

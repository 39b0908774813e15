// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Serialization of the VP9 uncompressed header (section 6.2 of the VP9 specification).

use thiserror::Error;

use crate::bitstream_utils::BitWriter;
use crate::bitstream_utils::BitWriterError;
use crate::codec::vp9::params::BitDepth;
use crate::codec::vp9::params::ColorSpace;
use crate::codec::vp9::params::Header;
use crate::codec::vp9::params::InterpolationFilter;
use crate::codec::vp9::params::Profile;
use crate::codec::vp9::params::FRAME_MARKER;
use crate::codec::vp9::params::LAST_FRAME;
use crate::codec::vp9::params::MAX_SEGMENTS;
use crate::codec::vp9::params::MAX_TILE_WIDTH_B64;
use crate::codec::vp9::params::MIN_TILE_WIDTH_B64;
use crate::codec::vp9::params::REFS_PER_FRAME;
use crate::codec::vp9::params::SEG_LVL_MAX;
use crate::codec::vp9::params::SYNC_CODE;

const SEGMENTATION_FEATURE_BITS: [usize; SEG_LVL_MAX] = [8, 6, 2, 0];
const SEGMENTATION_FEATURE_SIGNED: [bool; SEG_LVL_MAX] = [true, true, false, false];

/// Probabilities equal to this value are implied and not coded.
const UNCODED_PROB: u8 = 255;

#[derive(Debug, Error)]
pub enum HeaderWriterError {
    #[error("tile_cols_log2 {value} outside of {min}..={max}")]
    InvalidTileCols { value: u8, min: u8, max: u8 },
    #[error("tile_rows_log2 {0} larger than 2")]
    InvalidTileRows(u8),
    #[error("invalid frame size {0}x{1}")]
    InvalidFrameSize(u32, u32),
    #[error("{0} out of range")]
    OutOfRange(&'static str),
    #[error(transparent)]
    BitWriter(#[from] BitWriterError),
}

pub type HeaderWriterResult<T> = std::result::Result<T, HeaderWriterError>;

/// Bit positions of the header fields a caller may want to patch after the fact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeaderBitOffsets {
    pub lf_level: u64,
    pub ref_lf_deltas: u64,
    pub mode_lf_deltas: u64,
    pub qindex: u64,
    pub segmentation: u64,
    /// Number of bits taken by the segmentation parameters.
    pub segmentation_size: u64,
    pub first_partition_size: u64,
}

/// Number of 64x64 superblock columns of a frame `width` pixels wide.
fn sb64_cols(width: u32) -> u32 {
    let mi_cols = (width + 7) >> 3;
    (mi_cols + 7) >> 3
}

pub fn min_log2_tile_cols(width: u32) -> u8 {
    let sb_cols = sb64_cols(width);
    let mut min_log2 = 0;

    while (MAX_TILE_WIDTH_B64 << min_log2) < sb_cols {
        min_log2 += 1;
    }

    min_log2
}

pub fn max_log2_tile_cols(width: u32) -> u8 {
    let sb_cols = sb64_cols(width);
    let mut max_log2 = 1;

    while (sb_cols >> max_log2) >= MIN_TILE_WIDTH_B64 {
        max_log2 += 1;
    }

    max_log2 - 1
}

struct Writer<'a> {
    bw: BitWriter<&'a mut Vec<u8>>,
    hdr: &'a Header,
    offsets: HeaderBitOffsets,
}

impl<'a> Writer<'a> {
    fn f<T: Into<u32>>(&mut self, bits: usize, value: T) -> HeaderWriterResult<()> {
        self.bw.write_f(bits, value)?;
        Ok(())
    }

    /// Magnitude followed by a sign bit.
    fn su(&mut self, bits: usize, value: i32, name: &'static str) -> HeaderWriterResult<()> {
        let magnitude = value.unsigned_abs();
        if magnitude >> bits != 0 {
            return Err(HeaderWriterError::OutOfRange(name));
        }

        self.f(bits, magnitude)?;
        self.f(1, value < 0)
    }

    fn color_config(&mut self) -> HeaderWriterResult<()> {
        let hdr = self.hdr;

        if hdr.profile as u32 >= 2 {
            self.f(1, hdr.bit_depth == BitDepth::Depth12)?;
        }

        self.f(3, hdr.color_space as u32)?;

        let odd_profile = matches!(hdr.profile, Profile::Profile1 | Profile::Profile3);
        if hdr.color_space != ColorSpace::CsSrgb {
            self.f(1, hdr.color_range as u32)?;
            if odd_profile {
                self.f(1, hdr.subsampling_x)?;
                self.f(1, hdr.subsampling_y)?;
                self.f(1, false)?;
            }
        } else if odd_profile {
            self.f(1, false)?;
        }

        Ok(())
    }

    fn frame_size(&mut self) -> HeaderWriterResult<()> {
        let hdr = self.hdr;
        if hdr.width == 0 || hdr.height == 0 {
            return Err(HeaderWriterError::InvalidFrameSize(hdr.width, hdr.height));
        }

        self.f(16, hdr.width - 1)?;
        self.f(16, hdr.height - 1)
    }

    fn render_size(&mut self) -> HeaderWriterResult<()> {
        let hdr = self.hdr;

        self.f(1, hdr.render_and_frame_size_different)?;
        if hdr.render_and_frame_size_different {
            if hdr.render_width == 0 || hdr.render_height == 0 {
                return Err(HeaderWriterError::InvalidFrameSize(
                    hdr.render_width,
                    hdr.render_height,
                ));
            }
            self.f(16, hdr.render_width - 1)?;
            self.f(16, hdr.render_height - 1)?;
        }

        Ok(())
    }

    fn frame_size_with_refs(
        &mut self,
        ref_sizes: &[(u32, u32); REFS_PER_FRAME],
    ) -> HeaderWriterResult<()> {
        let size = (self.hdr.width, self.hdr.height);
        let found_ref = ref_sizes.iter().position(|&r| r == size);

        for i in 0..REFS_PER_FRAME {
            let found = found_ref == Some(i);
            self.f(1, found)?;
            if found {
                break;
            }
        }

        if found_ref.is_none() {
            self.frame_size()?;
        }

        self.render_size()
    }

    fn interpolation_filter(&mut self) -> HeaderWriterResult<()> {
        let literal: u32 = match self.hdr.interpolation_filter {
            InterpolationFilter::Switchable => return self.f(1, true),
            InterpolationFilter::EightTapSmooth => 0,
            InterpolationFilter::EightTap => 1,
            InterpolationFilter::EightTapSharp => 2,
            InterpolationFilter::Bilinear => 3,
        };

        self.f(1, false)?;
        self.f(2, literal)
    }

    fn loop_filter_params(&mut self) -> HeaderWriterResult<()> {
        let hdr = self.hdr;
        let lf = &hdr.lf;

        self.offsets.lf_level = self.bw.position();
        self.f(6, lf.level)?;
        self.f(3, lf.sharpness)?;
        self.f(1, lf.delta_enabled)?;

        if lf.delta_enabled {
            self.f(1, lf.delta_update)?;
        }

        self.offsets.ref_lf_deltas = self.bw.position();
        if lf.delta_enabled && lf.delta_update {
            for (&update, &delta) in lf.update_ref_delta.iter().zip(lf.ref_deltas.iter()) {
                self.f(1, update)?;
                if update {
                    self.su(6, delta.into(), "loop filter ref delta")?;
                }
            }
        }

        self.offsets.mode_lf_deltas = self.bw.position();
        if lf.delta_enabled && lf.delta_update {
            for (&update, &delta) in lf.update_mode_delta.iter().zip(lf.mode_deltas.iter()) {
                self.f(1, update)?;
                if update {
                    self.su(6, delta.into(), "loop filter mode delta")?;
                }
            }
        }

        Ok(())
    }

    fn delta_q(&mut self, delta: i8) -> HeaderWriterResult<()> {
        self.f(1, delta != 0)?;
        if delta != 0 {
            self.su(4, delta.into(), "delta_q")?;
        }

        Ok(())
    }

    fn quantization_params(&mut self) -> HeaderWriterResult<()> {
        let hdr = self.hdr;
        let quant = &hdr.quant;

        self.offsets.qindex = self.bw.position();
        self.f(8, quant.base_q_idx)?;
        self.delta_q(quant.delta_q_y_dc)?;
        self.delta_q(quant.delta_q_uv_dc)?;
        self.delta_q(quant.delta_q_uv_ac)
    }

    fn coded_prob(&mut self, prob: u8) -> HeaderWriterResult<()> {
        let coded = prob != UNCODED_PROB;
        self.f(1, coded)?;
        if coded {
            self.f(8, prob)?;
        }

        Ok(())
    }

    fn segmentation_params(&mut self) -> HeaderWriterResult<()> {
        let hdr = self.hdr;
        let seg = &hdr.seg;
        let start = self.bw.position();
        self.offsets.segmentation = start;

        self.f(1, seg.enabled)?;
        if seg.enabled {
            self.f(1, seg.update_map)?;
            if seg.update_map {
                for &prob in &seg.tree_probs {
                    self.coded_prob(prob)?;
                }

                self.f(1, seg.temporal_update)?;
                if seg.temporal_update {
                    for &prob in &seg.pred_probs {
                        self.coded_prob(prob)?;
                    }
                }
            }

            self.f(1, seg.update_data)?;
            if seg.update_data {
                self.f(1, seg.abs_or_delta_update)?;
                for segment in 0..MAX_SEGMENTS {
                    for feature in 0..SEG_LVL_MAX {
                        let enabled = seg.feature_enabled[segment][feature];
                        self.f(1, enabled)?;
                        if !enabled {
                            continue;
                        }

                        let value = seg.feature_data[segment][feature];
                        let bits = SEGMENTATION_FEATURE_BITS[feature];
                        if SEGMENTATION_FEATURE_SIGNED[feature] {
                            self.su(bits, value.into(), "segmentation feature")?;
                        } else {
                            let value = u32::try_from(value).map_err(|_| {
                                HeaderWriterError::OutOfRange("segmentation feature")
                            })?;
                            self.f(bits, value)?;
                        }
                    }
                }
            }
        }

        self.offsets.segmentation_size = self.bw.position() - start;
        Ok(())
    }

    fn tile_info(&mut self) -> HeaderWriterResult<()> {
        let hdr = self.hdr;
        let min = min_log2_tile_cols(hdr.width);
        let max = max_log2_tile_cols(hdr.width);

        if hdr.tile_cols_log2 < min || hdr.tile_cols_log2 > max {
            return Err(HeaderWriterError::InvalidTileCols {
                value: hdr.tile_cols_log2,
                min,
                max,
            });
        }

        for _ in min..hdr.tile_cols_log2 {
            self.f(1, true)?;
        }
        if hdr.tile_cols_log2 < max {
            self.f(1, false)?;
        }

        match hdr.tile_rows_log2 {
            0 => self.f(1, false),
            1 => self.f(2, 0b10u32),
            2 => self.f(2, 0b11u32),
            n => Err(HeaderWriterError::InvalidTileRows(n)),
        }
    }

    fn uncompressed_header(
        &mut self,
        ref_sizes: &[(u32, u32); REFS_PER_FRAME],
    ) -> HeaderWriterResult<()> {
        let hdr = self.hdr;
        let profile = hdr.profile as u32;

        self.f(2, FRAME_MARKER)?;
        self.f(1, profile & 1)?;
        self.f(1, profile >> 1)?;
        if hdr.profile == Profile::Profile3 {
            self.f(1, false)?;
        }

        self.f(1, hdr.show_existing_frame)?;
        if hdr.show_existing_frame {
            return self.f(3, hdr.frame_to_show_map_idx);
        }

        self.f(1, hdr.frame_type as u32)?;
        self.f(1, hdr.show_frame)?;
        self.f(1, hdr.error_resilient_mode)?;

        if hdr.is_key_frame() {
            self.f(24, SYNC_CODE)?;
            self.color_config()?;
            self.frame_size()?;
            self.render_size()?;
        } else {
            if !hdr.show_frame {
                self.f(1, hdr.intra_only)?;
            }

            if !hdr.error_resilient_mode {
                self.f(2, hdr.reset_frame_context)?;
            }

            if hdr.intra_only {
                self.f(24, SYNC_CODE)?;
                if hdr.profile != Profile::Profile0 {
                    self.color_config()?;
                }

                self.f(8, hdr.refresh_frame_flags)?;
                self.frame_size()?;
                self.render_size()?;
            } else {
                self.f(8, hdr.refresh_frame_flags)?;
                for i in 0..REFS_PER_FRAME {
                    self.f(3, hdr.ref_frame_idx[i])?;
                    self.f(1, hdr.ref_frame_sign_bias[LAST_FRAME + i])?;
                }

                self.frame_size_with_refs(ref_sizes)?;
                self.f(1, hdr.allow_high_precision_mv)?;
                self.interpolation_filter()?;
            }
        }

        if !hdr.error_resilient_mode {
            self.f(1, hdr.refresh_frame_context)?;
            self.f(1, hdr.frame_parallel_decoding_mode)?;
        }

        self.f(2, hdr.frame_context_idx)?;

        self.loop_filter_params()?;
        self.quantization_params()?;
        self.segmentation_params()?;
        self.tile_info()?;

        self.offsets.first_partition_size = self.bw.position();
        self.f(16, 0u32)
    }
}

/// Serializes the uncompressed header of `hdr`, padded to a byte boundary.
///
/// `ref_sizes` are the dimensions of the LAST, GOLDEN and ALTREF references and are only used for
/// inter frames. The size of the compressed header is written as zero and can be filled in later
/// with [`patch_first_partition_size`].
pub fn write_uncompressed_header(
    hdr: &Header,
    ref_sizes: &[(u32, u32); REFS_PER_FRAME],
) -> HeaderWriterResult<(Vec<u8>, HeaderBitOffsets)> {
    let mut buf = Vec::new();

    let offsets = {
        let mut writer = Writer {
            bw: BitWriter::new(&mut buf),
            hdr,
            offsets: Default::default(),
        };

        writer.uncompressed_header(ref_sizes)?;
        writer.bw.byte_align()?;
        writer.bw.flush()?;
        writer.offsets
    };

    Ok((buf, offsets))
}

/// Writes `size` over the 16 zero bits reserved by [`write_uncompressed_header`].
pub fn patch_first_partition_size(
    buf: &mut [u8],
    offsets: &HeaderBitOffsets,
    size: u16,
) -> HeaderWriterResult<()> {
    let start = offsets.first_partition_size as usize;
    if start + 16 > buf.len() * 8 {
        return Err(HeaderWriterError::OutOfRange("first_partition_size offset"));
    }

    for i in 0..16 {
        let bit = (size >> (15 - i)) & 1;
        let pos = start + i;
        let mask = 0x80 >> (pos % 8);

        if bit == 1 {
            buf[pos / 8] |= mask;
        } else {
            buf[pos / 8] &= !mask;
        }
    }

    Ok(())
}

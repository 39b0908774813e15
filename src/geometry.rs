// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Frame geometry in hardware block units, and the sizes of the scratch buffers the decode pipe
//! needs for a given geometry.
//!
//! All scratch sizes are expressed by the hardware in cache lines of [`CACHELINE_SIZE`] bytes.
//! The formulas must be reproduced exactly: the pipe does not bound-check these buffers, so an
//! undersized one silently corrupts whatever memory follows it.

use crate::decoder::aux_buffers::AuxBufferRole;
use crate::utils::align_up;
use crate::utils::ceil_div;

pub const CACHELINE_SIZE: usize = 64;

pub const VP9_SUPERBLOCK_SIZE: u32 = 64;
pub const VP9_MIN_BLOCK_SIZE: u32 = 8;

/// Size of the VP9 probability buffer the pipe reads from and adapts into.
pub const VP9_PROBABILITY_BUFFER_SIZE: usize = 2048;

const fn cachelines(n: u32) -> usize {
    n as usize * CACHELINE_SIZE
}

/// Dimensions of a frame, in pixels and in blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    /// Size of the largest block unit: CTB for HEVC, superblock for VP9.
    pub block_size: u32,
    /// Size of the smallest coding block.
    pub min_block_size: u32,
    pub width_in_blocks: u32,
    pub height_in_blocks: u32,
    pub width_in_min_blocks: u32,
    pub height_in_min_blocks: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32, block_size: u32, min_block_size: u32) -> Self {
        Self {
            width,
            height,
            block_size,
            min_block_size,
            width_in_blocks: ceil_div(width, block_size),
            height_in_blocks: ceil_div(height, block_size),
            width_in_min_blocks: ceil_div(width, min_block_size),
            height_in_min_blocks: ceil_div(height, min_block_size),
        }
    }

    /// HEVC geometry. The CTB size is `1 << (log2_min_cb_size + log2_diff_max_min_cb_size)`.
    pub fn hevc(
        width: u32,
        height: u32,
        log2_min_cb_size: u8,
        log2_diff_max_min_cb_size: u8,
    ) -> Self {
        let min_cb_size = 1 << log2_min_cb_size;
        let ctb_size = 1 << (log2_min_cb_size + log2_diff_max_min_cb_size);

        Self::new(width, height, ctb_size, min_cb_size)
    }

    /// VP9 geometry: 64x64 superblocks and 8x8 mode-info blocks.
    pub fn vp9(width: u32, height: u32) -> Self {
        Self::new(width, height, VP9_SUPERBLOCK_SIZE, VP9_MIN_BLOCK_SIZE)
    }

    /// Returns the size in bytes of every scratch buffer used by an HEVC frame.
    pub fn hevc_aux_buffer_sizes(&self, bit_depth: u8) -> [(AuxBufferRole, usize); 9] {
        let shift = if bit_depth > 8 { 2 } else { 3 };
        let (w, h) = (self.width, self.height);
        let (ctb_cols, ctb_rows) = (self.width_in_blocks, self.height_in_blocks);

        let deblocking_line = align_up(w, 32) >> shift;
        let deblocking_tile_column = align_up(h + 6 * ctb_rows, 32) >> shift;
        let metadata_line = (((w + 15) >> 4) * 188 + 9 * ctb_cols + 1023) >> 9;
        let metadata_tile_line = (((w + 15) >> 4) * 172 + 9 * ctb_cols + 1023) >> 9;
        let metadata_tile_column = (((h + 15) >> 4) * 176 + 89 * ctb_rows + 1023) >> 9;
        let sao_line = align_up((w >> 1) + 3 * ctb_cols, 16) >> shift;
        let sao_tile_line = align_up((w >> 1) + 6 * ctb_cols, 16) >> shift;
        let sao_tile_column = align_up((h >> 1) + 6 * ctb_rows, 16) >> shift;

        [
            (AuxBufferRole::DeblockingFilterLine, cachelines(deblocking_line)),
            (AuxBufferRole::DeblockingFilterTileLine, cachelines(deblocking_line)),
            (
                AuxBufferRole::DeblockingFilterTileColumn,
                cachelines(deblocking_tile_column),
            ),
            (AuxBufferRole::MetadataLine, cachelines(metadata_line)),
            (AuxBufferRole::MetadataTileLine, cachelines(metadata_tile_line)),
            (AuxBufferRole::MetadataTileColumn, cachelines(metadata_tile_column)),
            (AuxBufferRole::SaoLine, cachelines(sao_line)),
            (AuxBufferRole::SaoTileLine, cachelines(sao_tile_line)),
            (AuxBufferRole::SaoTileColumn, cachelines(sao_tile_column)),
        ]
    }

    /// Size in bytes of the motion vector buffer attached to each decoded HEVC picture.
    pub fn hevc_mv_temporal_buffer_size(&self) -> usize {
        cachelines(((self.width + 63) >> 6) * ((self.height + 15) >> 4))
    }

    /// Returns the size in bytes of every scratch buffer used by a VP9 frame.
    pub fn vp9_aux_buffer_sizes(&self, bit_depth: u8) -> [(AuxBufferRole, usize); 10] {
        let k = if bit_depth > 8 { 2 } else { 1 };
        let (sb_cols, sb_rows) = (self.width_in_blocks, self.height_in_blocks);

        [
            (AuxBufferRole::DeblockingFilterLine, cachelines(sb_cols * 18 * k)),
            (AuxBufferRole::DeblockingFilterTileLine, cachelines(sb_cols * 18 * k)),
            (AuxBufferRole::DeblockingFilterTileColumn, cachelines(sb_rows * 17 * k)),
            (AuxBufferRole::MetadataLine, cachelines(sb_cols * 5)),
            (AuxBufferRole::MetadataTileLine, cachelines(sb_cols * 5)),
            (AuxBufferRole::MetadataTileColumn, cachelines(sb_rows * 5)),
            (AuxBufferRole::HvdLineRowstore, cachelines(sb_cols)),
            (AuxBufferRole::HvdTileRowstore, cachelines(sb_cols)),
            (AuxBufferRole::Vp9Probability, VP9_PROBABILITY_BUFFER_SIZE),
            (AuxBufferRole::Vp9SegmentId, cachelines(sb_cols * sb_rows)),
        ]
    }

    /// Size in bytes of one of the two VP9 motion vector buffers.
    pub fn vp9_mv_temporal_buffer_size(&self) -> usize {
        cachelines(self.width_in_blocks * self.height_in_blocks * 9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vp9_superblock_counts() {
        let g = FrameGeometry::vp9(1920, 1080);
        assert_eq!(g.width_in_blocks, 30);
        assert_eq!(g.height_in_blocks, 17);
        assert_eq!(g.width_in_min_blocks, 240);
        assert_eq!(g.height_in_min_blocks, 135);

        let g = FrameGeometry::vp9(1921, 1080);
        assert_eq!(g.width_in_blocks, 31);
        assert_eq!(g.width_in_min_blocks, 241);
    }

    #[test]
    fn hevc_ctb_counts() {
        // 8x8 minimum CB, 64x64 CTB.
        let g = FrameGeometry::hevc(1920, 1080, 3, 3);
        assert_eq!(g.block_size, 64);
        assert_eq!(g.min_block_size, 8);
        assert_eq!(g.width_in_blocks, 30);
        assert_eq!(g.height_in_blocks, 17);
        assert_eq!(g.width_in_min_blocks, 240);
        assert_eq!(g.height_in_min_blocks, 135);

        // 16x16 CTB.
        let g = FrameGeometry::hevc(1920, 1080, 3, 1);
        assert_eq!(g.block_size, 16);
        assert_eq!(g.width_in_blocks, 120);
        assert_eq!(g.height_in_blocks, 68);
    }

    #[test]
    fn hevc_1080p_sizes() {
        let g = FrameGeometry::hevc(1920, 1080, 3, 3);
        let sizes = g.hevc_aux_buffer_sizes(8);

        assert_eq!(sizes[0], (AuxBufferRole::DeblockingFilterLine, 240 * 64));
        assert_eq!(sizes[3], (AuxBufferRole::MetadataLine, 46 * 64));
        assert_eq!(sizes[6], (AuxBufferRole::SaoLine, 132 * 64));

        // Higher bit depths double the deblocking and SAO stores.
        let sizes_10bit = g.hevc_aux_buffer_sizes(10);
        assert_eq!(sizes_10bit[0].1, 2 * sizes[0].1);
        assert_eq!(sizes_10bit[3].1, sizes[3].1);

        assert_eq!(g.hevc_mv_temporal_buffer_size(), 30 * 68 * 64);
    }

    #[test]
    fn vp9_single_superblock_sizes() {
        let g = FrameGeometry::vp9(64, 64);
        let sizes = g.vp9_aux_buffer_sizes(8);

        assert_eq!(sizes[0], (AuxBufferRole::DeblockingFilterLine, 18 * 64));
        assert_eq!(sizes[2], (AuxBufferRole::DeblockingFilterTileColumn, 17 * 64));
        assert_eq!(sizes[3], (AuxBufferRole::MetadataLine, 5 * 64));
        assert_eq!(sizes[6], (AuxBufferRole::HvdLineRowstore, 64));
        assert_eq!(sizes[8], (AuxBufferRole::Vp9Probability, 2048));
        assert_eq!(sizes[9], (AuxBufferRole::Vp9SegmentId, 64));
        assert_eq!(g.vp9_mv_temporal_buffer_size(), 9 * 64);

        let sizes_10bit = g.vp9_aux_buffer_sizes(10);
        assert_eq!(sizes_10bit[0].1, 36 * 64);
        assert_eq!(sizes_10bit[3].1, 5 * 64);
    }
}

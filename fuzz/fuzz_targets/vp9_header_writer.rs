// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

#![no_main]

use cros_hcpd::codec::vp9::params::BitDepth;
use cros_hcpd::codec::vp9::params::ColorSpace;
use cros_hcpd::codec::vp9::params::FrameType;
use cros_hcpd::codec::vp9::params::Header;
use cros_hcpd::codec::vp9::params::InterpolationFilter;
use cros_hcpd::codec::vp9::params::Profile;
use cros_hcpd::codec::vp9::writer::patch_first_partition_size;
use cros_hcpd::codec::vp9::writer::write_uncompressed_header;
use libfuzzer_sys::fuzz_target;

struct Input<'a>(&'a [u8]);

impl<'a> Input<'a> {
    fn u8(&mut self) -> u8 {
        match self.0.split_first() {
            Some((&b, rest)) => {
                self.0 = rest;
                b
            }
            None => 0,
        }
    }

    fn bool(&mut self) -> bool {
        self.u8() & 1 != 0
    }

    fn u16(&mut self) -> u16 {
        u16::from(self.u8()) << 8 | u16::from(self.u8())
    }
}

fn header(input: &mut Input) -> Header {
    let mut hdr = Header {
        profile: Profile::n(input.u8() % 4).unwrap_or_default(),
        bit_depth: if input.bool() { BitDepth::Depth10 } else { BitDepth::Depth8 },
        color_space: ColorSpace::n(input.u8() % 8).unwrap_or_default(),
        subsampling_x: input.bool(),
        subsampling_y: input.bool(),
        show_existing_frame: input.bool(),
        frame_to_show_map_idx: input.u8(),
        frame_type: FrameType::n(input.u8() % 2).unwrap_or_default(),
        show_frame: input.bool(),
        error_resilient_mode: input.bool(),
        width: u32::from(input.u16()),
        height: u32::from(input.u16()),
        intra_only: input.bool(),
        reset_frame_context: input.u8() % 4,
        refresh_frame_flags: input.u8(),
        ref_frame_idx: [input.u8() % 8, input.u8() % 8, input.u8() % 8],
        allow_high_precision_mv: input.bool(),
        interpolation_filter: InterpolationFilter::n(input.u8() % 5).unwrap_or_default(),
        refresh_frame_context: input.bool(),
        frame_parallel_decoding_mode: input.bool(),
        frame_context_idx: input.u8(),
        tile_cols_log2: input.u8() % 8,
        tile_rows_log2: input.u8() % 4,
        ..Default::default()
    };

    hdr.lf.level = input.u8();
    hdr.lf.sharpness = input.u8();
    hdr.lf.delta_enabled = input.bool();
    hdr.lf.delta_update = input.bool();
    for i in 0..4 {
        hdr.lf.update_ref_delta[i] = input.bool();
        hdr.lf.ref_deltas[i] = input.u8() as i8;
    }
    hdr.quant.base_q_idx = input.u8();
    hdr.quant.delta_q_y_dc = input.u8() as i8;
    hdr.seg.enabled = input.bool();
    hdr.seg.update_map = input.bool();
    hdr.seg.temporal_update = input.bool();
    hdr.seg.update_data = input.bool();
    for probs in hdr.seg.tree_probs.iter_mut() {
        *probs = input.u8();
    }

    hdr
}

fuzz_target!(|data: &[u8]| {
    let mut input = Input(data);
    let hdr = header(&mut input);
    let ref_sizes = [
        (u32::from(input.u16()), u32::from(input.u16())),
        (u32::from(input.u16()), u32::from(input.u16())),
        (u32::from(input.u16()), u32::from(input.u16())),
    ];

    if let Ok((mut buf, offsets)) = write_uncompressed_header(&hdr, &ref_sizes) {
        if !hdr.show_existing_frame {
            let _ = patch_first_partition_size(&mut buf, &offsets, input.u16());
        }
    }
});

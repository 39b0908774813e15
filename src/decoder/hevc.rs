// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap;

use anyhow::Context;
use log::debug;

use crate::backend::CommandBatch;
use crate::backend::GpuAllocator;
use crate::backend::GpuBuffer;
use crate::backend::SurfaceFormat;
use crate::backend::SurfaceHandle;
use crate::backend::SurfaceService;
use crate::codec::hevc::params::IqMatrix;
use crate::codec::hevc::params::PictureParameters;
use crate::codec::hevc::params::SliceParameters;
use crate::codec::hevc::params::MAX_REF_IDX_ACTIVE;
use crate::codec::hevc::params::MAX_TILE_COLUMNS;
use crate::codec::hevc::params::MAX_TILE_ROWS;
use crate::decoder::aux_buffers::allocate;
use crate::decoder::frame_store::FrameStore;
use crate::decoder::pipe_buffer_addresses;
use crate::decoder::submit;
use crate::decoder::DecodeError;
use crate::decoder::DecodeResult;
use crate::decoder::HevcDecodeState;
use crate::decoder::SessionResources;
use crate::geometry::FrameGeometry;
use crate::hcp::hevc::CollocatedReference;
use crate::hcp::hevc::RefIdxEntry;
use crate::hcp::hevc::SliceState;
use crate::hcp::CodecSelect;
use crate::hcp::CommandStream;
use crate::hcp::SurfaceId;
use crate::hcp::SurfaceState;
use crate::hcp::NUM_HCP_REFERENCES;
use crate::HardwareConfig;

/// Checks everything that could make the decoding of `frame` fail, and returns its picture
/// parameters.
pub(crate) fn validate<'a>(
    config: &HardwareConfig,
    frame: &'a HevcDecodeState,
    surfaces: &dyn SurfaceService,
) -> DecodeResult<&'a PictureParameters> {
    let pic = frame
        .picture
        .as_ref()
        .ok_or_else(|| DecodeError::InvalidParameter("missing picture parameters".into()))?;

    if frame.slice_groups.iter().all(|group| group.params.is_empty()) {
        return Err(DecodeError::InvalidParameter("no slice to decode".into()));
    }

    if pic.pic_width_in_luma_samples == 0 || pic.pic_height_in_luma_samples == 0 {
        return Err(DecodeError::InvalidParameter(format!(
            "invalid picture size {}x{}",
            pic.pic_width_in_luma_samples, pic.pic_height_in_luma_samples
        )));
    }

    if pic.chroma_format_idc != 1 {
        return Err(DecodeError::Unsupported(format!(
            "chroma_format_idc {}",
            pic.chroma_format_idc
        )));
    }

    match (pic.bit_depth_luma_minus8, pic.bit_depth_chroma_minus8) {
        (0, 0) => (),
        (2, 2) if config.generation.supports_hevc_10bit() => (),
        (luma, chroma) => {
            return Err(DecodeError::Unsupported(format!(
                "luma/chroma bit depth {}/{} on {:?}",
                luma + 8,
                chroma + 8,
                config.generation
            )))
        }
    }

    if pic.log2_min_luma_coding_block_size_minus3 > 3
        || pic.log2_diff_max_min_luma_coding_block_size > 3
    {
        return Err(DecodeError::InvalidParameter(format!(
            "coding block sizes log2_min_minus3 {} log2_diff {}",
            pic.log2_min_luma_coding_block_size_minus3,
            pic.log2_diff_max_min_luma_coding_block_size
        )));
    }

    if !(4..=6).contains(&pic.log2_ctb_size()) {
        return Err(DecodeError::InvalidParameter(format!(
            "CTB size 2^{}",
            pic.log2_ctb_size()
        )));
    }

    if pic.tiles_enabled_flag
        && (pic.num_tile_columns_minus1 as usize >= MAX_TILE_COLUMNS
            || pic.num_tile_rows_minus1 as usize >= MAX_TILE_ROWS)
    {
        return Err(DecodeError::Unsupported(format!(
            "{}x{} tiles",
            pic.num_tile_columns_minus1 as u32 + 1,
            pic.num_tile_rows_minus1 as u32 + 1
        )));
    }

    let mut distinct = pic
        .reference_frames
        .iter()
        .map(|r| r.surface)
        .collect::<Vec<_>>();
    distinct.sort();
    distinct.dedup();
    if distinct.len() > NUM_HCP_REFERENCES {
        return Err(DecodeError::Unsupported(format!(
            "{} reference pictures",
            distinct.len()
        )));
    }

    if let Some(handle) = distinct.iter().find(|&&h| surfaces.surface(h).is_none()) {
        return Err(DecodeError::InvalidParameter(format!(
            "unknown reference surface {:?}",
            handle
        )));
    }

    for slice in frame.slice_groups.iter().flat_map(|group| group.params.iter()) {
        validate_slice(pic, slice)?;
    }

    Ok(pic)
}

fn validate_slice(pic: &PictureParameters, slice: &SliceParameters) -> DecodeResult<()> {
    for list in 0..2 {
        let num_active = slice.num_ref_idx_active(list);
        if num_active > MAX_REF_IDX_ACTIVE {
            return Err(DecodeError::InvalidParameter(format!(
                "{} active references in list {}",
                num_active, list
            )));
        }

        for &idx in &slice.ref_pic_list[list][..num_active] {
            if idx as usize >= pic.reference_frames.len() {
                return Err(DecodeError::InvalidParameter(format!(
                    "RefPicList{} entry {} out of bounds",
                    list, idx
                )));
            }
        }
    }

    if !slice.slice_type.is_i() && slice.slice_temporal_mvp_enabled_flag {
        let list = collocated_list(slice);
        if slice.collocated_ref_idx as usize >= slice.num_ref_idx_active(list) {
            return Err(DecodeError::InvalidParameter(format!(
                "collocated_ref_idx {} out of bounds",
                slice.collocated_ref_idx
            )));
        }
    }

    Ok(())
}

/// Reference list holding the collocated picture. P slices only have list 0.
fn collocated_list(slice: &SliceParameters) -> usize {
    if slice.slice_type.is_p() || slice.collocated_from_l0_flag {
        0
    } else {
        1
    }
}

fn ref_idx_entries(
    pic: &PictureParameters,
    slice: &SliceParameters,
    list: usize,
    frame_store: &FrameStore,
) -> Vec<RefIdxEntry> {
    slice.ref_pic_list[list][..slice.num_ref_idx_active(list)]
        .iter()
        .map(|&idx| {
            let reference = &pic.reference_frames[idx as usize];
            RefIdxEntry {
                slot: frame_store.resolve(reference.surface),
                poc_diff: pic
                    .current
                    .pic_order_cnt
                    .saturating_sub(reference.pic_order_cnt),
                long_term: reference.long_term,
                field_pic: reference.field_pic,
                bottom_field: reference.bottom_field,
            }
        })
        .collect()
}

/// Whether no active reference of `slice` follows the current picture in output order.
fn is_low_delay(pic: &PictureParameters, slice: &SliceParameters) -> bool {
    if slice.slice_type.is_i() {
        return false;
    }

    (0..2).all(|list| {
        slice.ref_pic_list[list][..slice.num_ref_idx_active(list)]
            .iter()
            .map(|&idx| &pic.reference_frames[idx as usize])
            .all(|reference| reference.pic_order_cnt <= pic.current.pic_order_cnt)
    })
}

fn ctb_position(slice: &SliceParameters, geometry: &FrameGeometry) -> (u32, u32) {
    let address = slice.slice_segment_address;
    (
        address % geometry.width_in_blocks,
        address / geometry.width_in_blocks,
    )
}

/// HEVC decoding state kept across pictures.
pub(crate) struct HevcState<B> {
    /// Motion vectors written while decoding each surface, for use as collocated picture.
    mv_buffers: BTreeMap<SurfaceHandle, B>,
}

impl<B: GpuBuffer> HevcState<B> {
    pub(crate) fn new() -> Self {
        Self {
            mv_buffers: BTreeMap::new(),
        }
    }

    fn ensure_mv_buffer<A>(
        &mut self,
        allocator: &mut A,
        surface: SurfaceHandle,
        size: usize,
    ) -> DecodeResult<()>
    where
        A: GpuAllocator<Buffer = B>,
    {
        if matches!(self.mv_buffers.get(&surface), Some(buffer) if buffer.size() >= size) {
            return Ok(());
        }

        let buffer = allocate(allocator, "hevc mv temporal", size)?;
        self.mv_buffers.insert(surface, buffer);

        Ok(())
    }

    /// Decodes a picture that went through [`validate`].
    pub(crate) fn decode<A>(
        &mut self,
        res: &mut SessionResources<A>,
        frame: &HevcDecodeState,
        pic: &PictureParameters,
        surfaces: &mut dyn SurfaceService,
        batch: &mut dyn CommandBatch,
    ) -> DecodeResult<()>
    where
        A: GpuAllocator<Buffer = B>,
    {
        let width = pic.pic_width_in_luma_samples as u32;
        let height = pic.pic_height_in_luma_samples as u32;
        let bit_depth = pic.bit_depth();
        let geometry = FrameGeometry::hevc(
            width,
            height,
            pic.log2_min_cb_size(),
            pic.log2_diff_max_min_luma_coding_block_size,
        );

        let aux_sizes = geometry.hevc_aux_buffer_sizes(bit_depth);
        res.aux_buffers.ensure_all(&mut res.allocator, &aux_sizes)?;
        self.ensure_mv_buffer(
            &mut res.allocator,
            frame.target,
            geometry.hevc_mv_temporal_buffer_size(),
        )?;

        let target = surfaces
            .ensure_surface(
                frame.target,
                SurfaceFormat::for_bit_depth(bit_depth),
                width,
                height,
            )
            .context("while allocating the target surface")?;

        let references = pic
            .reference_frames
            .iter()
            .map(|r| r.surface)
            .collect::<Vec<_>>();
        res.frame_store.update(&references);

        let frame_store = &res.frame_store;
        self.mv_buffers
            .retain(|&handle, _| handle == frame.target || frame_store.contains(handle));

        let mut addresses = pipe_buffer_addresses(
            &res.aux_buffers,
            target.address,
            aux_sizes.iter().map(|&(role, _)| role),
        );
        addresses.current_mv_temporal = self.mv_buffers.get(&frame.target).map(GpuBuffer::address);
        for (slot, handle) in res.frame_store.slots() {
            if let Some(handle) = handle {
                addresses.references[slot] = surfaces.surface(handle).map(|s| s.address);
                addresses.collocated_mv_temporal[slot] =
                    self.mv_buffers.get(&handle).map(GpuBuffer::address);
            }
        }

        let mut stream = CommandStream::new(res.config.cache_attributes);
        stream.pipe_mode_select(
            CodecSelect::Hevc,
            res.config.generation.has_extended_pipe_mode_select(),
        );
        stream.surface_state(&SurfaceState {
            id: SurfaceId::DecodedPicture,
            pitch: target.pitch,
            y_cb_offset: target.y_cb_offset,
            format: target.format,
        });
        stream.pipe_buf_addr_state(&addresses);

        let slices = frame
            .slice_groups
            .iter()
            .filter(|group| !group.params.is_empty())
            .flat_map(|group| group.params.iter().enumerate().map(move |(i, s)| (group, i, s)))
            .collect::<Vec<_>>();

        let flat = IqMatrix::default();
        let mut frozen_collocated: Option<CollocatedReference> = None;

        for (n, &(group, index_in_group, slice)) in slices.iter().enumerate() {
            if index_in_group == 0 {
                stream.ind_obj_base_addr_state(group.data, None);
            }

            if n == 0 {
                stream.hevc_qm_state(frame.iq_matrix.as_ref().unwrap_or(&flat));
                stream.hevc_pic_state(pic, &geometry);
                if pic.tiles_enabled_flag {
                    stream.hevc_tile_state(pic, &geometry);
                }
            }

            let collocated = if !slice.slice_type.is_i() && slice.slice_temporal_mvp_enabled_flag {
                let list = collocated_list(slice);
                let idx = slice.ref_pic_list[list][slice.collocated_ref_idx as usize];
                let own = CollocatedReference {
                    slot: res
                        .frame_store
                        .resolve(pic.reference_frames[idx as usize].surface),
                    from_l0: list == 0,
                };

                frozen_collocated.get_or_insert(own);
                own
            } else {
                frozen_collocated.unwrap_or(CollocatedReference {
                    slot: 0,
                    from_l0: false,
                })
            };

            let state = SliceState {
                position: ctb_position(slice, &geometry),
                next_position: slices
                    .get(n + 1)
                    .map(|&(_, _, next)| ctb_position(next, &geometry)),
                collocated,
                low_delay: is_low_delay(pic, slice),
            };
            stream.hevc_slice_state(pic, slice, &state);

            if !slice.slice_type.is_i() {
                stream.hevc_ref_idx_state(0, &ref_idx_entries(pic, slice, 0, &res.frame_store));
            }
            if slice.slice_type.is_b() {
                stream.hevc_ref_idx_state(1, &ref_idx_entries(pic, slice, 1, &res.frame_store));
            }

            let weighted = (slice.slice_type.is_p() && pic.weighted_pred_flag)
                || (slice.slice_type.is_b() && pic.weighted_bipred_flag);
            if weighted {
                stream.hevc_weight_offset_state(
                    0,
                    &slice.pred_weight_table,
                    slice.num_ref_idx_active(0),
                );
                if slice.slice_type.is_b() {
                    stream.hevc_weight_offset_state(
                        1,
                        &slice.pred_weight_table,
                        slice.num_ref_idx_active(1),
                    );
                }
            }

            stream.bsd_object(slice.slice_data_size, slice.slice_data_offset);
        }

        debug!(
            "Submitting HEVC picture {:?} ({} slices, {} dwords)",
            frame.target,
            slices.len(),
            stream.len()
        );

        submit(batch, &stream, false)
    }
}

// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::anyhow;
use anyhow::Context;
use log::debug;
use log::warn;

use crate::backend::CommandBatch;
use crate::backend::GpuAllocator;
use crate::backend::GpuBuffer;
use crate::backend::SurfaceFormat;
use crate::backend::SurfaceInfo;
use crate::backend::SurfaceService;
use crate::codec::vp9::params::BitDepth;
use crate::codec::vp9::params::PictureParameters;
use crate::codec::vp9::params::Profile;
use crate::codec::vp9::params::MAX_FRAME_SIZE;
use crate::codec::vp9::params::MAX_SEGMENTS;
use crate::codec::vp9::params::REFS_PER_FRAME;
use crate::codec::vp9::probability::ProbabilityBank;
use crate::decoder::aux_buffers::allocate;
use crate::decoder::aux_buffers::AuxBufferRole;
use crate::decoder::pipe_buffer_addresses;
use crate::decoder::submit;
use crate::decoder::DecodeError;
use crate::decoder::DecodeResult;
use crate::decoder::SessionResources;
use crate::decoder::Vp9DecodeState;
use crate::geometry::FrameGeometry;
use crate::geometry::VP9_PROBABILITY_BUFFER_SIZE;
use crate::hcp::vp9::PicState;
use crate::hcp::vp9::ReferenceScaling;
use crate::hcp::CodecSelect;
use crate::hcp::CommandStream;
use crate::hcp::SurfaceId;
use crate::hcp::SurfaceState;
use crate::HardwareConfig;

/// Checks everything that could make the decoding of `frame` fail, and returns its picture
/// parameters. `None` is returned for frames that only repeat an already decoded one.
pub(crate) fn validate<'a>(
    config: &HardwareConfig,
    frame: &'a Vp9DecodeState,
    surfaces: &dyn SurfaceService,
) -> DecodeResult<Option<&'a PictureParameters>> {
    let pic = frame
        .picture
        .as_ref()
        .ok_or_else(|| DecodeError::InvalidParameter("missing picture parameters".into()))?;
    let hdr = &pic.header;

    if hdr.show_existing_frame {
        return Ok(None);
    }

    let num_slices: usize = frame.slice_groups.iter().map(|g| g.params.len()).sum();
    if num_slices != 1 {
        return Err(DecodeError::InvalidParameter(format!(
            "expected a single slice, got {}",
            num_slices
        )));
    }

    match (hdr.profile, hdr.bit_depth) {
        (Profile::Profile0, BitDepth::Depth8) => (),
        (Profile::Profile2, BitDepth::Depth10) if config.generation.supports_vp9_10bit() => (),
        (profile, bit_depth) => {
            return Err(DecodeError::Unsupported(format!(
                "{:?} at {:?} on {:?}",
                profile, bit_depth, config.generation
            )))
        }
    }

    if !(hdr.subsampling_x && hdr.subsampling_y) {
        return Err(DecodeError::Unsupported("chroma subsampling other than 4:2:0".into()));
    }

    let valid_size = 1..=MAX_FRAME_SIZE;
    if !valid_size.contains(&hdr.width) || !valid_size.contains(&hdr.height) {
        return Err(DecodeError::InvalidParameter(format!(
            "invalid frame size {}x{}",
            hdr.width, hdr.height
        )));
    }

    if !hdr.frame_is_intra() {
        for i in 0..REFS_PER_FRAME {
            match pic.active_reference(i) {
                Some(handle)
                    if surfaces
                        .surface(handle)
                        .is_some_and(|s| s.width > 0 && s.height > 0) => {}
                reference => {
                    return Err(DecodeError::InvalidParameter(format!(
                        "reference {} ({:?}) missing",
                        i, reference
                    )))
                }
            }
        }
    }

    for slice in frame.slice_groups.iter().flat_map(|g| g.params.iter()) {
        let header_size = hdr.uncompressed_header_size_in_bytes as u32;
        if slice.slice_data_size < header_size {
            return Err(DecodeError::InvalidParameter(format!(
                "slice of {} bytes smaller than its {} bytes header",
                slice.slice_data_size, header_size
            )));
        }

        if slice.slice_data_offset.checked_add(header_size).is_none() {
            return Err(DecodeError::InvalidParameter(format!(
                "slice data offset {} out of range",
                slice.slice_data_offset
            )));
        }
    }

    Ok(Some(pic))
}

/// Whether the pipe can scale a `ref_width`x`ref_height` reference to the current frame size.
pub(crate) fn valid_reference_size(
    width: u32,
    height: u32,
    ref_width: u32,
    ref_height: u32,
) -> bool {
    2 * width >= ref_width
        && 2 * height >= ref_height
        && width <= 16 * ref_width
        && height <= 16 * ref_height
}

fn reference_scaling(width: u32, height: u32, reference: &SurfaceInfo) -> ReferenceScaling {
    let (ref_width, ref_height) = (reference.width, reference.height);

    let (scale_x, scale_y) = if valid_reference_size(width, height, ref_width, ref_height) {
        ((ref_width << 14) / width, (ref_height << 14) / height)
    } else {
        warn!(
            "Reference of {}x{} cannot be scaled to {}x{}",
            ref_width, ref_height, width, height
        );
        (0, 0)
    };

    ReferenceScaling {
        width: ref_width,
        height: ref_height,
        scale_x,
        scale_y,
    }
}

/// Motion vector buffer and the frame size it was allocated for.
struct MvTemporalBuffer<B> {
    buffer: B,
    width: u32,
    height: u32,
}

/// What the next frame needs to know about the previous one.
#[derive(Clone, Copy, Debug)]
struct LastFrame {
    width: u32,
    height: u32,
    show_frame: bool,
    intra_only: bool,
    key_frame: bool,
}

/// VP9 decoding state kept across frames.
pub(crate) struct Vp9State<B> {
    probabilities: ProbabilityBank,
    /// Motion vectors written by the frame being decoded.
    current_mv: Option<MvTemporalBuffer<B>>,
    /// Motion vectors of the previous frame.
    last_mv: Option<MvTemporalBuffer<B>>,
    last_frame: Option<LastFrame>,
}

impl<B: GpuBuffer> Vp9State<B> {
    pub(crate) fn new() -> Self {
        Self {
            probabilities: ProbabilityBank::new(),
            current_mv: None,
            last_mv: None,
            last_frame: None,
        }
    }

    fn ensure_current_mv<A>(
        &mut self,
        allocator: &mut A,
        geometry: &FrameGeometry,
    ) -> DecodeResult<()>
    where
        A: GpuAllocator<Buffer = B>,
    {
        let (width, height) = (geometry.width, geometry.height);
        if matches!(&self.current_mv, Some(mv) if mv.width == width && mv.height == height) {
            return Ok(());
        }

        let buffer = allocate(
            allocator,
            "vp9 mv temporal",
            geometry.vp9_mv_temporal_buffer_size(),
        )?;
        self.current_mv = Some(MvTemporalBuffer {
            buffer,
            width: geometry.width,
            height: geometry.height,
        });

        Ok(())
    }

    /// Decodes a frame that went through [`validate`].
    pub(crate) fn decode<A>(
        &mut self,
        res: &mut SessionResources<A>,
        frame: &Vp9DecodeState,
        pic: &PictureParameters,
        surfaces: &mut dyn SurfaceService,
        batch: &mut dyn CommandBatch,
    ) -> DecodeResult<()>
    where
        A: GpuAllocator<Buffer = B>,
    {
        let hdr = &pic.header;
        let bit_depth = hdr.bit_depth as u8;
        let intra = hdr.frame_is_intra();
        let geometry = FrameGeometry::vp9(hdr.width, hdr.height);

        let aux_sizes = geometry.vp9_aux_buffer_sizes(bit_depth);
        res.aux_buffers.ensure_all(&mut res.allocator, &aux_sizes)?;
        self.ensure_current_mv(&mut res.allocator, &geometry)?;

        let target = surfaces
            .ensure_surface(
                frame.target,
                SurfaceFormat::for_bit_depth(bit_depth),
                hdr.width,
                hdr.height,
            )
            .context("while allocating the target surface")?;

        let references: [Option<SurfaceInfo>; REFS_PER_FRAME] = std::array::from_fn(|i| {
            pic.active_reference(i)
                .and_then(|handle| surfaces.surface(handle))
        });

        let last_frame_is_key = self.last_frame.map_or(true, |last| last.key_frame);
        let use_prev_frame_mvs = matches!(self.last_frame, Some(last)
            if !hdr.error_resilient_mode
                && !intra
                && last.width == hdr.width
                && last.height == hdr.height
                && !last.intra_only
                && last.show_frame
                && !last.key_frame);

        let frame_context_idx = self.probabilities.setup_frame(hdr);
        let probabilities = self.probabilities.serialize(frame_context_idx, intra);
        res.aux_buffers
            .get_mut(AuxBufferRole::Vp9Probability)
            .ok_or_else(|| anyhow!("no probability buffer"))?
            .write(0, &probabilities)
            .context("while uploading the probability buffer")?;

        let mut addresses = pipe_buffer_addresses(
            &res.aux_buffers,
            target.address,
            aux_sizes.iter().map(|&(role, _)| role),
        );
        addresses.current_mv_temporal = self.current_mv.as_ref().map(|mv| mv.buffer.address());
        addresses.collocated_mv_temporal[0] = self.last_mv.as_ref().map(|mv| mv.buffer.address());
        for (address, reference) in addresses.references.iter_mut().zip(references.iter()) {
            *address = reference.map(|r| r.address);
        }

        let mut stream = CommandStream::new(res.config.cache_attributes);
        stream.pipe_mode_select(
            CodecSelect::Vp9,
            res.config.generation.has_extended_pipe_mode_select(),
        );

        for (id, surface) in [
            (SurfaceId::DecodedPicture, target),
            (SurfaceId::Vp9LastReference, references[0].unwrap_or(target)),
            (SurfaceId::Vp9GoldenReference, references[1].unwrap_or(target)),
        ] {
            stream.surface_state(&SurfaceState {
                id,
                pitch: surface.pitch,
                y_cb_offset: surface.y_cb_offset,
                format: surface.format,
            });
        }

        stream.pipe_buf_addr_state(&addresses);

        let uncompressed_header_size = hdr.uncompressed_header_size_in_bytes as u32;
        for group in frame.slice_groups.iter().filter(|g| !g.params.is_empty()) {
            stream.ind_obj_base_addr_state(group.data, frame.compressed_header);

            for slice in &group.params {
                let num_segments = if hdr.seg.enabled { MAX_SEGMENTS } else { 1 };
                for (id, segment) in slice.segments.iter().take(num_segments).enumerate() {
                    stream.vp9_segment_state(id as u8, segment);
                }

                stream.vp9_pic_state(
                    hdr,
                    &PicState {
                        frame_context_idx,
                        adapt_probabilities: !hdr.error_resilient_mode
                            && !hdr.frame_parallel_decoding_mode,
                        use_prev_frame_mvs,
                        last_frame_is_key,
                        references: std::array::from_fn(|i| {
                            references[i].map(|r| reference_scaling(hdr.width, hdr.height, &r))
                        }),
                    },
                );

                stream.bsd_object(
                    slice.slice_data_size - uncompressed_header_size,
                    slice.slice_data_offset + uncompressed_header_size,
                );
            }
        }

        debug!(
            "Submitting VP9 frame {:?} with context {} ({} dwords)",
            frame.target,
            frame_context_idx,
            stream.len()
        );

        // Adapted probabilities can only be read back once the frame is decoded.
        submit(batch, &stream, hdr.refresh_frame_context)?;

        if hdr.refresh_frame_context {
            let mut adapted = vec![0u8; VP9_PROBABILITY_BUFFER_SIZE];
            res.aux_buffers
                .get(AuxBufferRole::Vp9Probability)
                .ok_or_else(|| anyhow!("no probability buffer"))?
                .read(0, &mut adapted)
                .context("while reading back adapted probabilities")?;
            self.probabilities
                .refresh(frame_context_idx, &adapted, intra)?;
        }

        if !hdr.is_key_frame() {
            std::mem::swap(&mut self.current_mv, &mut self.last_mv);
        }

        self.last_frame = Some(LastFrame {
            width: hdr.width,
            height: hdr.height,
            show_frame: hdr.show_frame,
            intra_only: hdr.intra_only,
            key_frame: hdr.is_key_frame(),
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyAllocator;
    use crate::backend::dummy::DummySurfaces;
    use crate::backend::dummy::RecordingBatch;
    use crate::backend::GpuAddress;
    use crate::backend::SurfaceHandle;
    use crate::codec::vp9::params::FrameType;
    use crate::codec::vp9::params::Header;
    use crate::codec::vp9::params::SliceParameters;
    use crate::decoder::CodecState;
    use crate::decoder::DecodeSession;
    use crate::decoder::DecodeState;
    use crate::decoder::SliceGroup;
    use crate::hcp::Opcode;
    use crate::HwGeneration;

    const KEY: SurfaceHandle = SurfaceHandle(1);
    const INTER: SurfaceHandle = SurfaceHandle(2);
    const INTER2: SurfaceHandle = SurfaceHandle(3);

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn header(frame_type: FrameType, width: u32, height: u32) -> Header {
        Header {
            frame_type,
            show_frame: true,
            width,
            height,
            subsampling_x: true,
            subsampling_y: true,
            refresh_frame_context: true,
            uncompressed_header_size_in_bytes: 10,
            header_size_in_bytes: 20,
            ..Default::default()
        }
    }

    /// Frame whose three references all point to `reference`.
    fn state(target: SurfaceHandle, hdr: Header, reference: Option<SurfaceHandle>) -> DecodeState {
        DecodeState::Vp9(Vp9DecodeState {
            target,
            picture: Some(PictureParameters {
                header: hdr,
                reference_frames: [reference; 8],
            }),
            slice_groups: vec![SliceGroup {
                data: GpuAddress(0x80_0000),
                params: vec![SliceParameters {
                    slice_data_size: 1000,
                    slice_data_offset: 0,
                    ..Default::default()
                }],
            }],
            compressed_header: None,
        })
    }

    fn session(generation: HwGeneration) -> DecodeSession<DummyAllocator> {
        DecodeSession::new(
            DummyAllocator::default(),
            HardwareConfig {
                generation,
                ..Default::default()
            },
        )
    }

    fn pic_states(batch: &RecordingBatch) -> Vec<Vec<u32>> {
        batch
            .packets()
            .into_iter()
            .filter(|(o, _)| *o == Opcode::Vp9PicState)
            .map(|(_, p)| p)
            .collect()
    }

    #[test]
    fn single_superblock_key_frame() {
        init_logging();
        let mut session = session(HwGeneration::Skylake);
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();

        let frame = state(KEY, header(FrameType::KeyFrame, 64, 64), None);
        session.decode_picture(&frame, &mut surfaces, &mut batch).unwrap();

        assert_eq!(
            batch.opcodes(),
            vec![
                Opcode::PipeModeSelect,
                Opcode::SurfaceState,
                Opcode::SurfaceState,
                Opcode::SurfaceState,
                Opcode::PipeBufAddrState,
                Opcode::IndObjBaseAddrState,
                Opcode::Vp9SegmentState,
                Opcode::Vp9PicState,
                Opcode::BsdObject,
            ]
        );

        let aux = session.aux_buffers();
        assert_eq!(aux.size(AuxBufferRole::DeblockingFilterLine), Some(18 * 64));
        assert_eq!(aux.size(AuxBufferRole::DeblockingFilterTileColumn), Some(17 * 64));
        assert_eq!(aux.size(AuxBufferRole::MetadataLine), Some(5 * 64));
        assert_eq!(aux.size(AuxBufferRole::MetadataTileColumn), Some(5 * 64));
        assert_eq!(aux.size(AuxBufferRole::Vp9Probability), Some(2048));
        assert!(aux.size(AuxBufferRole::SaoLine).is_none());
        // Ten scratch buffers and one motion vector buffer.
        assert_eq!(session.allocator().num_allocations(), 11);

        // The frame refreshes its context, so the flush must wait for completion.
        assert_eq!(batch.flushes(), &[true]);

        // Missing references fall back to the decoded picture.
        let surface_states: Vec<_> = batch
            .packets()
            .into_iter()
            .filter(|(o, _)| *o == Opcode::SurfaceState)
            .map(|(_, p)| p)
            .collect();
        assert_eq!(surface_states[0][1] & 0x0fff_ffff, surface_states[1][1] & 0x0fff_ffff);
        assert_eq!(surface_states[1][1] >> 28, 2);
        assert_eq!(surface_states[2][1] >> 28, 3);

        let bsd = batch.packets().last().unwrap().1.clone();
        assert_eq!(&bsd[1..], &[990, 10]);
    }

    #[test]
    fn all_segments_with_segmentation() {
        let mut session = session(HwGeneration::Skylake);
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();

        let mut hdr = header(FrameType::KeyFrame, 64, 64);
        hdr.seg.enabled = true;
        session
            .decode_picture(&state(KEY, hdr, None), &mut surfaces, &mut batch)
            .unwrap();

        let segments: Vec<_> = batch
            .packets()
            .into_iter()
            .filter(|(o, _)| *o == Opcode::Vp9SegmentState)
            .map(|(_, p)| p[1])
            .collect();
        assert_eq!(segments, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn reference_size_bounds() {
        // Exactly twice as large, and exactly sixteen times smaller.
        assert!(valid_reference_size(100, 100, 200, 200));
        assert!(valid_reference_size(1600, 1600, 100, 100));
        assert!(!valid_reference_size(100, 100, 201, 200));
        assert!(!valid_reference_size(100, 100, 200, 201));
        assert!(!valid_reference_size(1601, 1600, 100, 100));
        assert!(!valid_reference_size(1600, 1601, 100, 100));
    }

    #[test]
    fn inter_frames_reuse_motion_vectors() {
        init_logging();
        let mut session = session(HwGeneration::Skylake);
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();

        session
            .decode_picture(
                &state(KEY, header(FrameType::KeyFrame, 352, 288), None),
                &mut surfaces,
                &mut batch,
            )
            .unwrap();
        session
            .decode_picture(
                &state(INTER, header(FrameType::InterFrame, 352, 288), Some(KEY)),
                &mut surfaces,
                &mut batch,
            )
            .unwrap();
        session
            .decode_picture(
                &state(INTER2, header(FrameType::InterFrame, 352, 288), Some(INTER)),
                &mut surfaces,
                &mut batch,
            )
            .unwrap();

        let use_prev: Vec<_> = pic_states(&batch).iter().map(|p| (p[2] >> 14) & 1).collect();
        // The previous frame must be a shown inter frame.
        assert_eq!(use_prev, vec![0, 0, 1]);

        // Motion vectors written by the second frame are read by the third one.
        let pbas: Vec<_> = batch
            .packets()
            .into_iter()
            .filter(|(o, _)| *o == Opcode::PipeBufAddrState)
            .map(|(_, p)| p)
            .collect();
        assert_eq!(pbas[2][66], pbas[1][31]);
        assert_ne!(pbas[2][31], pbas[1][31]);
        // Same frame size: the pair is allocated once.
        assert_eq!(session.allocator().num_allocations(), 10 + 2);

        // Unity scaling for same-size references.
        let last = pic_states(&batch).pop().unwrap();
        assert_eq!(last[4], 1 << 30 | 1 << 14);
        assert_eq!(last[7], 287 << 16 | 351);
    }

    #[test]
    fn unscalable_reference() {
        let mut session = session(HwGeneration::Skylake);
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();

        session
            .decode_picture(
                &state(KEY, header(FrameType::KeyFrame, 640, 480), None),
                &mut surfaces,
                &mut batch,
            )
            .unwrap();
        session
            .decode_picture(
                &state(INTER, header(FrameType::InterFrame, 160, 120), Some(KEY)),
                &mut surfaces,
                &mut batch,
            )
            .unwrap();

        let pic = pic_states(&batch).pop().unwrap();
        assert_eq!(&pic[4..7], &[0, 0, 0]);
        // The reference size is still reported.
        assert_eq!(pic[7], 479 << 16 | 639);
        // A new motion vector buffer for the new size.
        assert_eq!(session.allocator().num_allocations(), 10 + 2);
    }

    #[test]
    fn probabilities_are_read_back() {
        let mut session = session(HwGeneration::Skylake);
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();

        session
            .decode_picture(
                &state(KEY, header(FrameType::KeyFrame, 64, 64), None),
                &mut surfaces,
                &mut batch,
            )
            .unwrap();

        // Pretend the pipe adapted every probability to 7.
        let memory = session.allocator().memory("vp9 probability").unwrap();
        batch.on_flush(move || memory.borrow_mut().fill(7));

        let mut hdr = header(FrameType::InterFrame, 64, 64);
        hdr.frame_context_idx = 1;
        session
            .decode_picture(&state(INTER, hdr, Some(KEY)), &mut surfaces, &mut batch)
            .unwrap();

        let Some(CodecState::Vp9(vp9)) = &session.codec else {
            panic!("no VP9 state");
        };
        let ctx = vp9.probabilities.context(1);
        assert_eq!(ctx.inter_mode, [[7; 3]; 7]);
        assert_eq!(ctx.skip, [7; 3]);
        assert_eq!(ctx.seg_tree, [255; 7]);
        assert_ne!(vp9.probabilities.context(0).skip, [7; 3]);
        assert_eq!(batch.flushes(), &[true, true]);
    }

    #[test]
    fn no_read_back_without_refresh() {
        let mut session = session(HwGeneration::Skylake);
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();

        let mut hdr = header(FrameType::KeyFrame, 64, 64);
        hdr.refresh_frame_context = false;
        session
            .decode_picture(&state(KEY, hdr, None), &mut surfaces, &mut batch)
            .unwrap();

        assert_eq!(batch.flushes(), &[false]);
    }

    #[test]
    fn missing_reference() {
        let mut session = session(HwGeneration::Skylake);
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();

        // Reference slots are empty.
        let frame = state(INTER, header(FrameType::InterFrame, 64, 64), None);
        assert!(matches!(
            session.decode_picture(&frame, &mut surfaces, &mut batch),
            Err(DecodeError::InvalidParameter(_))
        ));

        // Reference slots point to a surface never decoded.
        let frame = state(INTER, header(FrameType::InterFrame, 64, 64), Some(KEY));
        assert!(matches!(
            session.decode_picture(&frame, &mut surfaces, &mut batch),
            Err(DecodeError::InvalidParameter(_))
        ));

        assert!(batch.dwords().is_empty());
        assert_eq!(session.allocator().num_allocations(), 0);
    }

    #[test]
    fn profiles_and_bit_depths() {
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();

        let mut hdr = header(FrameType::KeyFrame, 64, 64);
        hdr.profile = Profile::Profile2;
        hdr.bit_depth = BitDepth::Depth10;

        let mut skylake = session(HwGeneration::Skylake);
        assert!(matches!(
            skylake.decode_picture(&state(KEY, hdr.clone(), None), &mut surfaces, &mut batch),
            Err(DecodeError::Unsupported(_))
        ));

        let mut kabylake = session(HwGeneration::Kabylake);
        kabylake
            .decode_picture(&state(KEY, hdr.clone(), None), &mut surfaces, &mut batch)
            .unwrap();
        assert_eq!(surfaces.surface(KEY).unwrap().format, SurfaceFormat::P010);
        // Higher bit depths double the deblocking stores.
        assert_eq!(
            kabylake.aux_buffers().size(AuxBufferRole::DeblockingFilterLine),
            Some(36 * 64)
        );

        hdr.profile = Profile::Profile1;
        hdr.bit_depth = BitDepth::Depth8;
        assert!(matches!(
            kabylake.decode_picture(&state(KEY, hdr.clone(), None), &mut surfaces, &mut batch),
            Err(DecodeError::Unsupported(_))
        ));

        hdr.profile = Profile::Profile0;
        hdr.subsampling_y = false;
        assert!(matches!(
            kabylake.decode_picture(&state(KEY, hdr, None), &mut surfaces, &mut batch),
            Err(DecodeError::Unsupported(_))
        ));
    }

    #[test]
    fn slice_checks() {
        let mut session = session(HwGeneration::Skylake);
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();

        let mut hdr = header(FrameType::KeyFrame, 64, 64);
        hdr.uncompressed_header_size_in_bytes = 1001;
        assert!(matches!(
            session.decode_picture(&state(KEY, hdr, None), &mut surfaces, &mut batch),
            Err(DecodeError::InvalidParameter(_))
        ));

        let DecodeState::Vp9(mut two_slices) = state(KEY, header(FrameType::KeyFrame, 64, 64), None)
        else {
            unreachable!()
        };
        let slice = two_slices.slice_groups[0].params[0].clone();
        two_slices.slice_groups[0].params.push(slice);
        assert!(matches!(
            session.decode_picture(&DecodeState::Vp9(two_slices), &mut surfaces, &mut batch),
            Err(DecodeError::InvalidParameter(_))
        ));

        assert!(batch.dwords().is_empty());
    }

    #[test]
    fn show_existing_frame_is_a_no_op() {
        let mut session = session(HwGeneration::Skylake);
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();

        let hdr = Header {
            show_existing_frame: true,
            ..Default::default()
        };
        session
            .decode_picture(&state(KEY, hdr, None), &mut surfaces, &mut batch)
            .unwrap();

        assert!(batch.dwords().is_empty());
        assert!(batch.flushes().is_empty());
    }

    #[test]
    fn allocation_failure() {
        let mut session = session(HwGeneration::Skylake);
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();
        session.resources.allocator.fail_allocations(true);

        let frame = state(KEY, header(FrameType::KeyFrame, 64, 64), None);
        assert!(matches!(
            session.decode_picture(&frame, &mut surfaces, &mut batch),
            Err(DecodeError::AllocationFailed { .. })
        ));
        assert!(batch.dwords().is_empty());
    }

    #[test]
    fn frame_size_limits() {
        let mut session = session(HwGeneration::Skylake);
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();

        for (width, height) in [(65537, 64), (64, 65537), (u32::MAX - 1, 64), (64, u32::MAX)] {
            let frame = state(KEY, header(FrameType::KeyFrame, width, height), None);
            assert!(matches!(
                session.decode_picture(&frame, &mut surfaces, &mut batch),
                Err(DecodeError::InvalidParameter(_))
            ));
        }
        assert!(batch.dwords().is_empty());
        assert_eq!(session.allocator().num_allocations(), 0);

        // Largest codable width.
        let frame = state(KEY, header(FrameType::KeyFrame, 65536, 64), None);
        session.decode_picture(&frame, &mut surfaces, &mut batch).unwrap();
        let pic = pic_states(&batch).pop().unwrap();
        assert_eq!(pic[1], 7 << 16 | 8191);
    }

    #[test]
    fn slice_offset_overflow() {
        let mut session = session(HwGeneration::Skylake);
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();

        let DecodeState::Vp9(mut frame) = state(KEY, header(FrameType::KeyFrame, 64, 64), None)
        else {
            unreachable!()
        };
        frame.slice_groups[0].params[0].slice_data_offset = u32::MAX - 5;

        assert!(matches!(
            session.decode_picture(&DecodeState::Vp9(frame), &mut surfaces, &mut batch),
            Err(DecodeError::InvalidParameter(_))
        ));
        assert!(batch.dwords().is_empty());
        assert_eq!(session.allocator().num_allocations(), 0);
        assert!(session.codec.is_none());
    }

    #[test]
    fn error_resilient_frame_does_not_adapt() {
        let mut session = session(HwGeneration::Skylake);
        let mut surfaces = DummySurfaces::default();
        let mut batch = RecordingBatch::default();

        session
            .decode_picture(
                &state(KEY, header(FrameType::KeyFrame, 64, 64), None),
                &mut surfaces,
                &mut batch,
            )
            .unwrap();

        let mut hdr = header(FrameType::InterFrame, 64, 64);
        hdr.error_resilient_mode = true;
        hdr.frame_context_idx = 2;
        session
            .decode_picture(&state(INTER, hdr, Some(KEY)), &mut surfaces, &mut batch)
            .unwrap();

        let flags: Vec<_> = pic_states(&batch).iter().map(|p| p[2]).collect();
        // The key frame adapts its probabilities.
        assert_eq!((flags[0] >> 1) & 1, 1);
        // Error resilience turns adaptation off and forces context 0.
        assert_eq!((flags[1] >> 1) & 1, 0);
        assert_eq!((flags[1] >> 8) & 1, 1);
        assert_eq!((flags[1] >> 17) & 0x3, 0);
    }
}

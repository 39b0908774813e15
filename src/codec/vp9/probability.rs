// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Saved VP9 probability contexts, and their layout in the probability buffer read and adapted by
//! the decode pipe.

use bytes::Buf;
use bytes::BufMut;
use log::debug;

use crate::codec::vp9::default_probs::DEFAULT_SEG_PRED_PROBS;
use crate::codec::vp9::default_probs::DEFAULT_SEG_TREE_PROBS;
use crate::codec::vp9::default_probs::INTER_FRAME_DEFAULTS;
use crate::codec::vp9::default_probs::KEY_FRAME_DEFAULTS;
use crate::codec::vp9::params::Header;
use crate::codec::vp9::params::FRAME_CONTEXTS;
use crate::codec::vp9::params::PREDICTION_PROBS;
use crate::codec::vp9::params::SEG_TREE_PROBS;
use crate::decoder::DecodeError;
use crate::decoder::DecodeResult;
use crate::geometry::VP9_PROBABILITY_BUFFER_SIZE;

/// Coefficient probabilities, indexed by transform size, plane type, reference type, band,
/// context and node. Band 0 only uses its first three contexts.
pub type CoefProbs = [[[[[[u8; 3]; 6]; 6]; 2]; 2]; 4];

const BAND_0_CONTEXTS: usize = 3;

/// Length of the part of the buffer that is meaningful for intra frames: transform size,
/// coefficient and skip probabilities.
pub const KEY_REGION_LEN: usize = 1599;
/// Length of the part of the buffer adapted by the pipe. The segmentation probabilities that
/// follow are never written back.
pub const REFRESH_LEN: usize = 1895;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MvComponentProbs {
    pub sign: u8,
    pub classes: [u8; 10],
    pub class0: [u8; 1],
    pub bits: [u8; 10],
    pub class0_fp: [[u8; 3]; 2],
    pub fp: [u8; 3],
    pub class0_hp: u8,
    pub hp: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MvProbs {
    pub joints: [u8; 3],
    /// Vertical then horizontal component.
    pub comps: [MvComponentProbs; 2],
}

/// One complete set of probabilities, as saved between frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameContext {
    pub tx_8x8: [[u8; 1]; 2],
    pub tx_16x16: [[u8; 2]; 2],
    pub tx_32x32: [[u8; 3]; 2],
    pub coef: CoefProbs,
    pub skip: [u8; 3],
    pub inter_mode: [[u8; 3]; 7],
    pub interp_filter: [[u8; 2]; 4],
    pub is_inter: [u8; 4],
    pub comp_inter: [u8; 5],
    pub single_ref: [[u8; 2]; 5],
    pub comp_ref: [u8; 5],
    pub y_mode: [[u8; 9]; 4],
    pub uv_mode: [[u8; 9]; 10],
    pub partition: [[u8; 3]; 16],
    pub mv: MvProbs,
    pub seg_tree: [u8; SEG_TREE_PROBS],
    pub seg_pred: [u8; PREDICTION_PROBS],
}

impl Default for FrameContext {
    fn default() -> Self {
        INTER_FRAME_DEFAULTS
    }
}

fn put_rows<const N: usize>(buf: &mut impl BufMut, rows: &[[u8; N]]) {
    for row in rows {
        buf.put_slice(row);
    }
}

fn get_rows<const N: usize>(buf: &mut impl Buf, rows: &mut [[u8; N]]) {
    for row in rows {
        buf.copy_to_slice(row);
    }
}

impl FrameContext {
    /// Appends the context to `buf` in the layout expected by the pipe, without trailing padding.
    pub fn write_to(&self, buf: &mut impl BufMut) {
        put_rows(buf, &self.tx_8x8);
        put_rows(buf, &self.tx_16x16);
        put_rows(buf, &self.tx_32x32);

        for tx in &self.coef {
            for plane in tx {
                for reference in plane {
                    for (band, contexts) in reference.iter().enumerate() {
                        let n = if band == 0 { BAND_0_CONTEXTS } else { contexts.len() };
                        put_rows(buf, &contexts[..n]);
                    }
                }
            }
        }

        buf.put_slice(&self.skip);
        put_rows(buf, &self.inter_mode);
        put_rows(buf, &self.interp_filter);
        buf.put_slice(&self.is_inter);
        buf.put_slice(&self.comp_inter);
        put_rows(buf, &self.single_ref);
        buf.put_slice(&self.comp_ref);
        put_rows(buf, &self.y_mode);
        put_rows(buf, &self.uv_mode);
        put_rows(buf, &self.partition);

        buf.put_slice(&self.mv.joints);
        for comp in &self.mv.comps {
            buf.put_u8(comp.sign);
            buf.put_slice(&comp.classes);
            buf.put_slice(&comp.class0);
            buf.put_slice(&comp.bits);
            put_rows(buf, &comp.class0_fp);
            buf.put_slice(&comp.fp);
            buf.put_u8(comp.class0_hp);
            buf.put_u8(comp.hp);
        }

        buf.put_slice(&self.seg_tree);
        buf.put_slice(&self.seg_pred);
    }

    /// Reads a context written by [`FrameContext::write_to`]. `buf` must hold at least
    /// [`FrameContext::SERIALIZED_LEN`] bytes.
    pub fn read_from(buf: &mut impl Buf) -> Self {
        let mut ctx = INTER_FRAME_DEFAULTS;

        get_rows(buf, &mut ctx.tx_8x8);
        get_rows(buf, &mut ctx.tx_16x16);
        get_rows(buf, &mut ctx.tx_32x32);

        for tx in ctx.coef.iter_mut() {
            for plane in tx.iter_mut() {
                for reference in plane.iter_mut() {
                    for (band, contexts) in reference.iter_mut().enumerate() {
                        let n = if band == 0 { BAND_0_CONTEXTS } else { contexts.len() };
                        get_rows(buf, &mut contexts[..n]);
                    }
                }
            }
        }

        buf.copy_to_slice(&mut ctx.skip);
        get_rows(buf, &mut ctx.inter_mode);
        get_rows(buf, &mut ctx.interp_filter);
        buf.copy_to_slice(&mut ctx.is_inter);
        buf.copy_to_slice(&mut ctx.comp_inter);
        get_rows(buf, &mut ctx.single_ref);
        buf.copy_to_slice(&mut ctx.comp_ref);
        get_rows(buf, &mut ctx.y_mode);
        get_rows(buf, &mut ctx.uv_mode);
        get_rows(buf, &mut ctx.partition);

        buf.copy_to_slice(&mut ctx.mv.joints);
        for comp in ctx.mv.comps.iter_mut() {
            comp.sign = buf.get_u8();
            buf.copy_to_slice(&mut comp.classes);
            buf.copy_to_slice(&mut comp.class0);
            buf.copy_to_slice(&mut comp.bits);
            get_rows(buf, &mut comp.class0_fp);
            buf.copy_to_slice(&mut comp.fp);
            comp.class0_hp = buf.get_u8();
            comp.hp = buf.get_u8();
        }

        buf.copy_to_slice(&mut ctx.seg_tree);
        buf.copy_to_slice(&mut ctx.seg_pred);

        ctx
    }

    /// Number of meaningful bytes in a serialized context.
    pub const SERIALIZED_LEN: usize =
        REFRESH_LEN + SEG_TREE_PROBS + PREDICTION_PROBS;

    fn reset_segmentation(&mut self) {
        self.seg_tree = DEFAULT_SEG_TREE_PROBS;
        self.seg_pred = DEFAULT_SEG_PRED_PROBS;
    }
}

/// The four probability contexts a VP9 stream can save and restore.
#[derive(Clone, Debug)]
pub struct ProbabilityBank {
    contexts: [FrameContext; FRAME_CONTEXTS],
}

impl Default for ProbabilityBank {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbabilityBank {
    pub fn new() -> Self {
        let mut ctx = INTER_FRAME_DEFAULTS;
        ctx.reset_segmentation();

        Self {
            contexts: [ctx.clone(), ctx.clone(), ctx.clone(), ctx],
        }
    }

    pub fn context(&self, idx: u8) -> &FrameContext {
        &self.contexts[usize::from(idx) % FRAME_CONTEXTS]
    }

    /// Applies the context resets requested by `hdr` and the segmentation probabilities it
    /// carries. Returns the index of the context the frame decodes with.
    pub fn setup_frame(&mut self, hdr: &Header) -> u8 {
        let mut idx = hdr.frame_context_idx % FRAME_CONTEXTS as u8;

        if hdr.frame_is_intra() || hdr.error_resilient_mode {
            if hdr.reset_frame_context == 3 || hdr.is_key_frame() || hdr.error_resilient_mode {
                debug!("Resetting all probability contexts");
                for ctx in self.contexts.iter_mut() {
                    *ctx = INTER_FRAME_DEFAULTS;
                    ctx.reset_segmentation();
                }
            } else if hdr.reset_frame_context == 2 && hdr.intra_only {
                debug!("Resetting probability context {}", idx);
                let ctx = &mut self.contexts[usize::from(idx)];
                *ctx = INTER_FRAME_DEFAULTS;
                ctx.reset_segmentation();
            }

            idx = 0;
        }

        if hdr.seg.enabled && hdr.seg.update_map {
            let ctx = &mut self.contexts[usize::from(idx)];
            ctx.seg_tree = hdr.seg.tree_probs;
            ctx.seg_pred = hdr.seg.pred_probs;
        }

        idx
    }

    /// Builds the probability buffer handed to the pipe for a frame decoding with context `idx`.
    pub fn serialize(&self, idx: u8, intra: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(VP9_PROBABILITY_BUFFER_SIZE);
        self.context(idx).write_to(&mut buf);

        if intra {
            let mut template = Vec::with_capacity(VP9_PROBABILITY_BUFFER_SIZE);
            KEY_FRAME_DEFAULTS.write_to(&mut template);
            let inter_region = KEY_REGION_LEN..REFRESH_LEN;
            buf[inter_region.clone()].copy_from_slice(&template[inter_region]);
        }

        buf.resize(VP9_PROBABILITY_BUFFER_SIZE, 0);
        buf
    }

    /// Saves the probabilities adapted by the pipe into context `idx`. Only the first
    /// [`KEY_REGION_LEN`] bytes are taken for intra frames, [`REFRESH_LEN`] otherwise.
    pub fn refresh(&mut self, idx: u8, buffer: &[u8], intra: bool) -> DecodeResult<()> {
        let len = if intra { KEY_REGION_LEN } else { REFRESH_LEN };
        if buffer.len() < len {
            return Err(DecodeError::InvalidParameter(format!(
                "probability buffer too short: {} < {}",
                buffer.len(),
                len
            )));
        }

        let slot = usize::from(idx) % FRAME_CONTEXTS;
        let mut merged = Vec::with_capacity(FrameContext::SERIALIZED_LEN);
        self.contexts[slot].write_to(&mut merged);
        merged[..len].copy_from_slice(&buffer[..len]);

        self.contexts[slot] = FrameContext::read_from(&mut merged.as_slice());

        Ok(())
    }
}

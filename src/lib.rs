// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Core of a decode driver for the HEVC/VP9 command pipe (HCP) of Intel GPUs.
//!
//! This crate takes pre-parsed HEVC or VP9 picture and slice parameters and turns them into the
//! command packets the pipe executes, managing along the way the scratch buffers, reference slots
//! and VP9 probability contexts the hardware needs. Bitstream parsing, memory allocation and
//! command submission are left to the caller, who provides them through the traits of
//! [`backend`].
//!
//! The entry point is [`decoder::DecodeSession`].

pub mod backend;
pub mod bitstream_utils;
pub mod codec;
pub mod decoder;
pub mod geometry;
pub mod hcp;
pub mod utils;

use std::str::FromStr;

/// GPU generations with an HCP pipe.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum HwGeneration {
    #[default]
    Skylake,
    Broxton,
    Kabylake,
    GeminiLake,
}

impl HwGeneration {
    /// Whether HCP_PIPE_MODE_SELECT takes the two extra dwords introduced with Kabylake.
    pub fn has_extended_pipe_mode_select(self) -> bool {
        matches!(self, HwGeneration::Kabylake | HwGeneration::GeminiLake)
    }

    pub fn supports_hevc_10bit(self) -> bool {
        matches!(
            self,
            HwGeneration::Broxton | HwGeneration::Kabylake | HwGeneration::GeminiLake
        )
    }

    pub fn supports_vp9_10bit(self) -> bool {
        matches!(self, HwGeneration::Kabylake | HwGeneration::GeminiLake)
    }
}

impl FromStr for HwGeneration {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skl" | "SKL" => Ok(HwGeneration::Skylake),
            "bxt" | "BXT" => Ok(HwGeneration::Broxton),
            "kbl" | "KBL" => Ok(HwGeneration::Kabylake),
            "glk" | "GLK" => Ok(HwGeneration::GeminiLake),
            _ => Err("unrecognized GPU generation. Valid values: skl, bxt, kbl, glk"),
        }
    }
}

/// What the decode session needs to know about the GPU it drives.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HardwareConfig {
    pub generation: HwGeneration,
    /// Memory attributes (cacheability) dword emitted after every buffer address.
    pub cache_attributes: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            generation: Default::default(),
            cache_attributes: 2,
        }
    }
}

// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Utility functions used by several parts of this crate.
//!
//! This module is for anything that doesn't fit into the other top-level modules. Try not to add
//! new code here unless it really doesn't belong anywhere else.

/// Rounds `value` up to the next multiple of `alignment`, which must be a power of two.
pub const fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

pub const fn ceil_div(value: u32, divisor: u32) -> u32 {
    (value + divisor - 1) / divisor
}

pub fn clip3(x: i32, y: i32, z: i32) -> i32 {
    if z < x {
        x
    } else if z > y {
        y
    } else {
        z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 32), 0);
        assert_eq!(align_up(1, 32), 32);
        assert_eq!(align_up(1920, 32), 1920);
        assert_eq!(align_up(1921, 64), 1984);
    }

    #[test]
    fn test_clip3() {
        assert_eq!(clip3(-128, 127, 200), 127);
        assert_eq!(clip3(-128, 127, -300), -128);
        assert_eq!(clip3(-128, 127, 5), 5);
    }
}

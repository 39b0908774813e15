// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use log::debug;

use crate::backend::SurfaceHandle;
use crate::hcp::NUM_HCP_REFERENCES;

/// Maps reference pictures to the slots the pipe addresses them by.
///
/// A picture keeps its slot for as long as it stays referenced, so that the pipe sees stable
/// indices from one frame to the next.
#[derive(Clone, Debug, Default)]
pub struct FrameStore {
    slots: [Option<SurfaceHandle>; NUM_HCP_REFERENCES],
}

impl FrameStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Makes the store track exactly `references`. Duplicates are allowed.
    ///
    /// Panics if there are more distinct references than slots.
    pub fn update(&mut self, references: &[SurfaceHandle]) {
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(handle) if !references.contains(handle)) {
                *slot = None;
            }
        }

        for &handle in references {
            if self.contains(handle) {
                continue;
            }

            let Some(index) = self.slots.iter().position(Option::is_none) else {
                panic!("no free frame store slot for {:?}", handle);
            };

            debug!("Frame store slot {} assigned to {:?}", index, handle);
            self.slots[index] = Some(handle);
        }
    }

    pub fn contains(&self, handle: SurfaceHandle) -> bool {
        self.slots.contains(&Some(handle))
    }

    /// Returns the slot of `handle`. Panics if `handle` is not tracked.
    pub fn resolve(&self, handle: SurfaceHandle) -> u8 {
        match self.slots.iter().position(|&s| s == Some(handle)) {
            Some(index) => index as u8,
            None => panic!("{:?} is not in the frame store", handle),
        }
    }

    pub fn slots(&self) -> impl Iterator<Item = (usize, Option<SurfaceHandle>)> + '_ {
        self.slots.iter().copied().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SurfaceHandle = SurfaceHandle(10);
    const B: SurfaceHandle = SurfaceHandle(11);
    const C: SurfaceHandle = SurfaceHandle(12);
    const D: SurfaceHandle = SurfaceHandle(13);

    #[test]
    fn surviving_references_keep_their_slot() {
        let mut store = FrameStore::new();

        store.update(&[A, B, C]);
        assert_eq!(store.resolve(A), 0);
        assert_eq!(store.resolve(B), 1);
        assert_eq!(store.resolve(C), 2);

        store.update(&[B, C, D]);
        assert_eq!(store.resolve(B), 1);
        assert_eq!(store.resolve(C), 2);
        // D takes the slot freed by A.
        assert_eq!(store.resolve(D), 0);
        assert!(!store.contains(A));
    }

    #[test]
    fn duplicates_take_one_slot() {
        let mut store = FrameStore::new();

        store.update(&[A, A, B]);
        let used: Vec<_> = store.slots().filter_map(|(_, s)| s).collect();
        assert_eq!(used, vec![A, B]);
    }

    #[test]
    fn lowest_free_slot_first() {
        let mut store = FrameStore::new();

        store.update(&[A, B, C]);
        store.update(&[C]);
        store.update(&[C, D, A]);

        assert_eq!(store.resolve(C), 2);
        assert_eq!(store.resolve(D), 0);
        assert_eq!(store.resolve(A), 1);
    }

    #[test]
    fn fills_all_slots() {
        let mut store = FrameStore::new();
        let handles: Vec<_> = (0..8).map(SurfaceHandle).collect();

        store.update(&handles);
        for (i, &h) in handles.iter().enumerate() {
            assert_eq!(store.resolve(h) as usize, i);
        }
    }

    #[test]
    #[should_panic]
    fn unknown_reference_panics() {
        let mut store = FrameStore::new();
        store.update(&[A]);

        store.resolve(B);
    }

    #[test]
    #[should_panic]
    fn overflow_panics() {
        let mut store = FrameStore::new();
        let handles: Vec<_> = (0..9).map(SurfaceHandle).collect();

        store.update(&handles);
    }
}

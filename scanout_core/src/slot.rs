// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The two-slot ring of scan-out buffers.

use tracing::warn;

use crate::device::{FramebufferId, ScanoutDevice};

/// One of the engine's two buffer slots.
///
/// A slot pairs a surface reference with the locked buffer object and the
/// published framebuffer id backing one on-screen (or in-flight) frame.
/// The three fields are either all set or all clear; a populated slot
/// transitions back to clear only through [`release`](Self::release).
pub(crate) struct BufferSlot<D: ScanoutDevice> {
    pub(crate) surface: Option<D::Surface>,
    pub(crate) buffer: Option<D::Buffer>,
    pub(crate) framebuffer: Option<FramebufferId>,
}

impl<D: ScanoutDevice> BufferSlot<D> {
    pub(crate) const fn empty() -> Self {
        Self {
            surface: None,
            buffer: None,
            framebuffer: None,
        }
    }

    /// A slot is valid while its buffer may still be referenced by
    /// scan-out, i.e. until a completion event confirms it off-screen.
    pub(crate) fn is_valid(&self) -> bool {
        self.surface.is_some() && self.buffer.is_some() && self.framebuffer.is_some()
    }

    /// All-set or all-clear; anything else is a partially populated slot.
    pub(crate) fn is_consistent(&self) -> bool {
        let clear =
            self.surface.is_none() && self.buffer.is_none() && self.framebuffer.is_none();
        self.is_valid() || clear
    }

    /// Drops the slot's contents without any device release calls.
    ///
    /// Used when a still-valid slot is superseded in place: the stale
    /// framebuffer deliberately stays published (the two-slot ring cannot
    /// represent a third in-flight buffer), and discarding the stale
    /// fields up front keeps a later [`release`](Self::release) from
    /// pairing the old buffer with the new surface.
    pub(crate) fn discard(&mut self) {
        self.surface = None;
        self.buffer = None;
        self.framebuffer = None;
    }

    /// Releases whatever the slot holds: framebuffer removal first, then
    /// the buffer object back to its surface, then the surface reference.
    ///
    /// The steps are independent: a failed framebuffer removal is logged
    /// and does not prevent the buffer object from being returned.
    pub(crate) fn release(&mut self, device: &D) {
        if let Some(framebuffer) = self.framebuffer.take() {
            if let Err(err) = device.remove_framebuffer(framebuffer) {
                warn!(?framebuffer, "failed to remove framebuffer: {err}");
            }
        }

        let surface = self.surface.take();
        let buffer = self.buffer.take();
        if let (Some(surface), Some(buffer)) = (surface, buffer) {
            device.release_buffer(&surface, buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BufferSlot;
    use crate::fake::{FakeDevice, FakeSurface};

    #[test]
    fn empty_slot_is_consistent_and_invalid() {
        let slot = BufferSlot::<FakeDevice>::empty();
        assert!(slot.is_consistent(), "empty slot must be consistent");
        assert!(!slot.is_valid(), "empty slot must not be valid");
    }

    #[test]
    fn release_clears_every_field_in_order() {
        let device = FakeDevice::default();
        let surface = FakeSurface(7);
        let mut slot = BufferSlot::<FakeDevice>::empty();

        slot.surface = Some(surface.clone());
        slot.buffer = Some(device.lock_front(&surface));
        slot.framebuffer = Some(device.publish());
        assert!(slot.is_valid(), "populated slot should be valid");

        slot.release(&device);
        assert!(!slot.is_valid(), "released slot must be clear");
        assert!(slot.is_consistent(), "released slot must be consistent");

        let state = device.state();
        assert_eq!(state.removed_framebuffers.len(), 1);
        assert_eq!(state.released_buffers.len(), 1);
    }

    #[test]
    fn failed_framebuffer_removal_still_returns_the_buffer() {
        let device = FakeDevice::default();
        device.state().fail_remove_framebuffer = true;

        let surface = FakeSurface(1);
        let mut slot = BufferSlot::<FakeDevice>::empty();
        slot.surface = Some(surface.clone());
        slot.buffer = Some(device.lock_front(&surface));
        slot.framebuffer = Some(device.publish());

        slot.release(&device);
        assert!(!slot.is_valid(), "slot must clear even on removal failure");

        let state = device.state();
        assert!(state.removed_framebuffers.is_empty());
        assert_eq!(
            state.released_buffers.len(),
            1,
            "buffer release is independent of framebuffer removal"
        );
    }

    #[test]
    fn discard_clears_without_device_calls() {
        let device = FakeDevice::default();
        let surface = FakeSurface(3);
        let mut slot = BufferSlot::<FakeDevice>::empty();
        slot.surface = Some(surface.clone());
        slot.buffer = Some(device.lock_front(&surface));
        slot.framebuffer = Some(device.publish());

        slot.discard();
        assert!(!slot.is_valid(), "discarded slot must be clear");
        assert!(slot.is_consistent(), "discarded slot must be consistent");

        let state = device.state();
        assert!(
            state.removed_framebuffers.is_empty(),
            "the framebuffer stays published"
        );
        assert!(
            state.released_buffers.is_empty(),
            "the buffer is dropped, not returned through the device"
        );
    }

    #[test]
    fn double_release_is_a_no_op() {
        let device = FakeDevice::default();
        let surface = FakeSurface(2);
        let mut slot = BufferSlot::<FakeDevice>::empty();
        slot.surface = Some(surface.clone());
        slot.buffer = Some(device.lock_front(&surface));
        slot.framebuffer = Some(device.publish());

        slot.release(&device);
        slot.release(&device);

        let state = device.state();
        assert_eq!(state.removed_framebuffers.len(), 1);
        assert_eq!(state.released_buffers.len(), 1);
    }
}

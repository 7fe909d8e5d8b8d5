// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scripted in-process stand-in for the display subsystem, used by the
//! engine and slot tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::device::{
    ConnectorDesc, ConnectorId, CrtcId, EncoderDesc, EncoderId, FlipEvent, FramebufferId, Mode,
    ScanoutDevice,
};

/// The single output most tests run against.
pub(crate) const MODE_1080P60: Mode = Mode {
    width: 1920,
    height: 1080,
    refresh: 60,
    interlaced: false,
};

pub(crate) const CONNECTOR: ConnectorId = ConnectorId(10);
pub(crate) const ENCODER: EncoderId = EncoderId(20);
pub(crate) const CRTC: CrtcId = CrtcId(30);

/// Surface handle whose ownership stays with the "rendering layer" (the
/// test body).
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FakeSurface(pub(crate) u32);

/// A locked front buffer with a unique id for call-log assertions.
#[derive(Debug)]
pub(crate) struct FakeBuffer {
    pub(crate) id: u32,
}

/// Scripted saved-CRTC token.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FakeSavedCrtc {
    pub(crate) crtc: CrtcId,
}

/// Mutable script and call log shared between the test body and both
/// engine threads.
#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub(crate) connectors: Vec<ConnectorDesc>,
    pub(crate) encoders: Vec<EncoderDesc>,
    pub(crate) queued_events: VecDeque<FlipEvent>,

    pub(crate) fail_resources: bool,
    pub(crate) fail_lock: bool,
    pub(crate) fail_add_framebuffer: bool,
    pub(crate) fail_set_crtc: bool,
    pub(crate) fail_page_flip: bool,
    pub(crate) fail_remove_framebuffer: bool,
    pub(crate) fail_save_crtc: bool,
    pub(crate) fail_restore: bool,

    next_buffer: u32,
    next_framebuffer: u32,
    next_frame: u32,

    pub(crate) locked_buffers: Vec<u32>,
    pub(crate) released_buffers: Vec<u32>,
    pub(crate) added_framebuffers: Vec<u32>,
    pub(crate) removed_framebuffers: Vec<u32>,
    pub(crate) set_crtc_calls: Vec<(CrtcId, FramebufferId)>,
    pub(crate) page_flips: Vec<(CrtcId, FramebufferId)>,
    pub(crate) restores: Vec<CrtcId>,
}

impl FakeState {
    fn alloc_buffer(&mut self, surface: &FakeSurface) -> FakeBuffer {
        self.next_buffer += 1;
        let id = surface.0 * 100 + self.next_buffer;
        self.locked_buffers.push(id);
        FakeBuffer { id }
    }

    fn alloc_framebuffer(&mut self) -> FramebufferId {
        self.next_framebuffer += 1;
        self.added_framebuffers.push(self.next_framebuffer);
        FramebufferId(self.next_framebuffer)
    }
}

/// In-process [`ScanoutDevice`] with scripted failures and a queue of
/// synthetic completion events.
#[derive(Debug, Default)]
pub(crate) struct FakeDevice {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    /// One connected 1920x1080p60 connector wired to an encoder with a
    /// bound CRTC.
    pub(crate) fn with_single_output() -> Self {
        let device = Self::default();
        {
            let mut state = device.state();
            state.connectors.push(ConnectorDesc {
                id: CONNECTOR,
                connected: true,
                encoder: Some(ENCODER),
                modes: vec![MODE_1080P60],
            });
            state.encoders.push(EncoderDesc {
                id: ENCODER,
                crtc: Some(CRTC),
            });
        }
        device
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared handle to the script/log, for inspection after the engine
    /// (and the device inside it) has been dropped.
    pub(crate) fn state_handle(&self) -> Arc<Mutex<FakeState>> {
        Arc::clone(&self.state)
    }

    /// Queues one flip-completion event as the hardware would.
    pub(crate) fn queue_flip(&self) {
        let mut state = self.state();
        state.next_frame += 1;
        let event = FlipEvent {
            crtc: CRTC,
            frame: state.next_frame,
        };
        state.queued_events.push_back(event);
    }

    /// Test-only direct buffer lock, bypassing failure scripting.
    pub(crate) fn lock_front(&self, surface: &FakeSurface) -> FakeBuffer {
        self.state().alloc_buffer(surface)
    }

    /// Test-only direct framebuffer publication, bypassing scripting.
    pub(crate) fn publish(&self) -> FramebufferId {
        self.state().alloc_framebuffer()
    }
}

impl ScanoutDevice for FakeDevice {
    type Surface = FakeSurface;
    type Buffer = FakeBuffer;
    type SavedCrtc = FakeSavedCrtc;

    fn connectors(&self) -> io::Result<Vec<ConnectorDesc>> {
        let state = self.state();
        if state.fail_resources {
            return Err(io::Error::other("resource enumeration failed"));
        }
        Ok(state.connectors.clone())
    }

    fn encoders(&self) -> io::Result<Vec<EncoderDesc>> {
        let state = self.state();
        if state.fail_resources {
            return Err(io::Error::other("resource enumeration failed"));
        }
        Ok(state.encoders.clone())
    }

    fn save_crtc(&self, crtc: CrtcId) -> io::Result<Self::SavedCrtc> {
        if self.state().fail_save_crtc {
            return Err(io::Error::other("cannot snapshot CRTC"));
        }
        Ok(FakeSavedCrtc { crtc })
    }

    fn restore_crtc(&self, saved: &Self::SavedCrtc, _connector: ConnectorId) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_restore {
            return Err(io::Error::other("restore rejected"));
        }
        state.restores.push(saved.crtc);
        Ok(())
    }

    fn lock_front_buffer(&self, surface: &Self::Surface) -> io::Result<Self::Buffer> {
        let mut state = self.state();
        if state.fail_lock {
            return Err(io::Error::other("no front buffer available"));
        }
        Ok(state.alloc_buffer(surface))
    }

    fn release_buffer(&self, _surface: &Self::Surface, buffer: Self::Buffer) {
        self.state().released_buffers.push(buffer.id);
    }

    fn add_framebuffer(&self, _buffer: &Self::Buffer, _mode: &Mode) -> io::Result<FramebufferId> {
        let mut state = self.state();
        if state.fail_add_framebuffer {
            return Err(io::Error::other("framebuffer creation rejected"));
        }
        Ok(state.alloc_framebuffer())
    }

    fn remove_framebuffer(&self, framebuffer: FramebufferId) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_remove_framebuffer {
            return Err(io::Error::other("framebuffer removal rejected"));
        }
        state.removed_framebuffers.push(framebuffer.0);
        Ok(())
    }

    fn set_crtc(
        &self,
        crtc: CrtcId,
        framebuffer: FramebufferId,
        _connector: ConnectorId,
        _mode: &Mode,
    ) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_set_crtc {
            return Err(io::Error::other("mode-set rejected"));
        }
        state.set_crtc_calls.push((crtc, framebuffer));
        Ok(())
    }

    fn page_flip(&self, crtc: CrtcId, framebuffer: FramebufferId) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_page_flip {
            return Err(io::Error::other("flip request rejected"));
        }
        state.page_flips.push((crtc, framebuffer));
        Ok(())
    }

    fn wait_readable(&self, _timeout: Duration) -> io::Result<bool> {
        if self.state().queued_events.is_empty() {
            // Keep the polling thread from spinning hot against the fake.
            thread::sleep(Duration::from_millis(1));
            return Ok(false);
        }
        Ok(true)
    }

    fn drain_events(&self) -> io::Result<Vec<FlipEvent>> {
        Ok(self.state().queued_events.drain(..).collect())
    }
}

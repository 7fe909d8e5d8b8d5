// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Downward contract to the display and buffer-allocation subsystems.
//!
//! The engine consumes its collaborators through [`ScanoutDevice`]:
//! connector/encoder enumeration, CRTC save/restore, framebuffer
//! publication, mode-setting, page flips, and completion-event draining.
//! Platform backends (KMS) and test doubles implement this trait; the
//! engine never talks to hardware directly.
//!
//! Resource ids crossing the seam ([`ConnectorId`], [`EncoderId`],
//! [`CrtcId`], [`FramebufferId`]) are assigned by the backend; core passes
//! them through without interpreting the value.

use core::fmt;
use std::io;
use std::time::Duration;

/// Identifies a physical display connector.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectorId(pub u32);

/// Identifies the signal path between a display controller and a connector.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncoderId(pub u32);

/// Identifies a display controller scanning a framebuffer out.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CrtcId(pub u32);

/// Identifies a published scan-out framebuffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

impl fmt::Debug for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectorId({})", self.0)
    }
}

impl fmt::Debug for EncoderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncoderId({})", self.0)
    }
}

impl fmt::Debug for CrtcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CrtcId({})", self.0)
    }
}

impl fmt::Debug for FramebufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FramebufferId({})", self.0)
    }
}

/// A display timing advertised by a connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Mode {
    /// Horizontal active size in pixels.
    pub width: u16,
    /// Vertical active size in pixels.
    pub height: u16,
    /// Vertical refresh rate in Hz.
    pub refresh: u32,
    /// Interlaced scan-out rather than progressive.
    pub interlaced: bool,
}

impl fmt::Display for Mode {
    /// Renders the conventional resolution string, e.g. `1920x1080p60`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scan = if self.interlaced { 'i' } else { 'p' };
        write!(f, "{}x{}{}{}", self.width, self.height, scan, self.refresh)
    }
}

/// Snapshot of a connector as reported by the display subsystem.
#[derive(Clone, Debug)]
pub struct ConnectorDesc {
    /// Backend-assigned connector identity.
    pub id: ConnectorId,
    /// Whether a display is physically attached.
    pub connected: bool,
    /// The encoder currently driving this connector, if any.
    pub encoder: Option<EncoderId>,
    /// Supported modes, preferred mode first.
    pub modes: Vec<Mode>,
}

/// Snapshot of an encoder as reported by the display subsystem.
#[derive(Clone, Copy, Debug)]
pub struct EncoderDesc {
    /// Backend-assigned encoder identity.
    pub id: EncoderId,
    /// The display controller currently bound to this encoder, if any.
    pub crtc: Option<CrtcId>,
}

/// A completed page flip reported by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlipEvent {
    /// The display controller the flip completed on.
    pub crtc: CrtcId,
    /// Hardware frame counter at completion.
    pub frame: u32,
}

/// The display and buffer-allocation facilities the engine runs against.
///
/// All fallible operations return [`std::io::Result`], the native error
/// currency of the kernel display interface; the engine wraps failures
/// into [`PresentError`](crate::error::PresentError) variants per step.
///
/// Implementations must be callable from both the producer thread and the
/// completion event thread; the engine serializes calls that touch shared
/// buffer state behind its own lock.
pub trait ScanoutDevice: Send + Sync {
    /// Renderable surface handle. Ownership of the surface stays with the
    /// external rendering layer; the engine only holds cloned references.
    type Surface: Clone + Send;
    /// A locked front buffer belonging to a surface.
    type Buffer: Send;
    /// Opaque snapshot of display-controller state, for restore at teardown.
    type SavedCrtc: Send;

    /// Enumerates the connectors of the display subsystem.
    fn connectors(&self) -> io::Result<Vec<ConnectorDesc>>;

    /// Enumerates the encoders of the display subsystem.
    fn encoders(&self) -> io::Result<Vec<EncoderDesc>>;

    /// Snapshots the current configuration of `crtc`.
    fn save_crtc(&self, crtc: CrtcId) -> io::Result<Self::SavedCrtc>;

    /// Restores a previously saved configuration to hardware.
    fn restore_crtc(&self, saved: &Self::SavedCrtc, connector: ConnectorId) -> io::Result<()>;

    /// Locks the surface's most recently rendered front buffer.
    ///
    /// Call only after the rendering layer's buffer-swap step has made a
    /// front buffer available.
    fn lock_front_buffer(&self, surface: &Self::Surface) -> io::Result<Self::Buffer>;

    /// Returns a locked buffer to its owning surface. `surface` is always
    /// the surface the buffer was locked from.
    fn release_buffer(&self, surface: &Self::Surface, buffer: Self::Buffer);

    /// Publishes a locked buffer as a scan-out framebuffer with the active
    /// mode's dimensions and a 24-bit color depth packed in 32-bit words.
    fn add_framebuffer(&self, buffer: &Self::Buffer, mode: &Mode) -> io::Result<FramebufferId>;

    /// Removes a published framebuffer.
    fn remove_framebuffer(&self, framebuffer: FramebufferId) -> io::Result<()>;

    /// Synchronously binds `framebuffer` to `crtc` with the given mode.
    fn set_crtc(
        &self,
        crtc: CrtcId,
        framebuffer: FramebufferId,
        connector: ConnectorId,
        mode: &Mode,
    ) -> io::Result<()>;

    /// Requests an asynchronous vblank-timed page flip of `crtc` to
    /// `framebuffer`, arming a completion-event notification.
    fn page_flip(&self, crtc: CrtcId, framebuffer: FramebufferId) -> io::Result<()>;

    /// Waits up to `timeout` for completion events to become readable.
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// Drains the completion events currently queued, without waiting.
    ///
    /// An empty queue yields an empty batch; this call must never block on
    /// hardware that has not yet signalled completion.
    fn drain_events(&self) -> io::Result<Vec<FlipEvent>>;
}

// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! [`ScanoutDevice`] over legacy kernel mode-setting and GBM.
//!
//! Kernel resource handles never cross the trait seam directly: each
//! handle is reported upward as its raw numeric id, and the live handle is
//! interned here so that later calls can map the id back. The engine
//! re-enumerates through [`ScanoutDevice::connectors`] and
//! [`ScanoutDevice::encoders`] before using any id, which repopulates the
//! intern tables.

use core::fmt;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use drm::control::{Device as ControlDevice, Event, ModeFlags, PageFlipFlags, connector, crtc};
use rustix::event::{PollFd, PollFlags};
use rustix::time::Timespec;
use tracing::trace;

use scanout_core::device::{
    ConnectorDesc, ConnectorId, CrtcId, EncoderDesc, EncoderId, FlipEvent, FramebufferId, Mode,
    ScanoutDevice,
};

use crate::card::Card;

/// Framebuffer color depth: 24 significant bits per pixel.
const FB_DEPTH: u32 = 24;
/// Framebuffer storage: 32 bits per pixel (XRGB).
const FB_BPP: u32 = 32;

fn convert_mode(mode: &drm::control::Mode) -> Mode {
    let (width, height) = mode.size();
    Mode {
        width,
        height,
        refresh: mode.vrefresh(),
        interlaced: mode.flags().contains(ModeFlags::INTERLACE),
    }
}

/// Live kernel handles keyed by the ids reported across the trait seam.
#[derive(Debug, Default)]
struct HandleCache {
    connectors: HashMap<ConnectorId, connector::Handle>,
    crtcs: HashMap<CrtcId, crtc::Handle>,
    framebuffers: HashMap<FramebufferId, drm::control::framebuffer::Handle>,
    /// Kernel mode structs per connector, for mapping a reported [`Mode`]
    /// back to the exact timing blob the kernel expects.
    modes: HashMap<ConnectorId, Vec<drm::control::Mode>>,
}

impl HandleCache {
    fn connector(&self, id: ConnectorId) -> io::Result<connector::Handle> {
        self.connectors
            .get(&id)
            .copied()
            .ok_or_else(|| io::Error::other(format!("unknown connector {id:?}")))
    }

    fn crtc(&self, id: CrtcId) -> io::Result<crtc::Handle> {
        self.crtcs
            .get(&id)
            .copied()
            .ok_or_else(|| io::Error::other(format!("unknown CRTC {id:?}")))
    }

    fn drm_mode(&self, connector: ConnectorId, mode: &Mode) -> io::Result<drm::control::Mode> {
        self.modes
            .get(&connector)
            .and_then(|modes| modes.iter().find(|m| convert_mode(m) == *mode))
            .copied()
            .ok_or_else(|| io::Error::other(format!("mode {mode} not advertised by {connector:?}")))
    }
}

/// A GBM surface shared between the rendering layer and the engine.
///
/// Create one with [`KmsDevice::create_surface`] sized to the active mode,
/// make it current in the rendering API, and pass clones to
/// `PresentEngine::flip_surface`.
#[derive(Clone)]
pub struct KmsSurface(Arc<gbm::Surface<()>>);

// SAFETY: the wrapped gbm surface is only a pointer into libgbm state; all
// calls that touch it are serialized behind the engine's lock, and the Arc
// keeps it alive for as long as any buffer locked from it.
unsafe impl Send for KmsSurface {}
// SAFETY: as above; `&KmsSurface` exposes no interior mutation.
unsafe impl Sync for KmsSurface {}

impl fmt::Debug for KmsSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KmsSurface").finish()
    }
}

/// A front buffer locked out of a [`KmsSurface`]. Dropping it returns the
/// buffer to its surface.
pub struct KmsBuffer(gbm::BufferObject<()>);

// SAFETY: the buffer object is moved between the producer and event
// threads but never accessed concurrently; the engine's lock serializes
// every use.
unsafe impl Send for KmsBuffer {}

impl fmt::Debug for KmsBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KmsBuffer").finish()
    }
}

/// Display-controller state captured before the engine takes over.
#[derive(Debug)]
pub struct SavedCrtc(crtc::Info);

/// [`ScanoutDevice`] implementation over one DRM device node.
pub struct KmsDevice {
    card: Card,
    gbm: gbm::Device<Card>,
    handles: Mutex<HandleCache>,
}

// SAFETY: the gbm device wraps a pointer into libgbm state for the same
// descriptor the card holds; all allocation calls on it are serialized
// behind the engine's lock.
unsafe impl Send for KmsDevice {}
// SAFETY: as above.
unsafe impl Sync for KmsDevice {}

impl fmt::Debug for KmsDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsDevice")
            .field("card", &self.card)
            .finish_non_exhaustive()
    }
}

impl KmsDevice {
    /// Opens the DRM node at `path` (e.g. `/dev/dri/card0`) and a GBM
    /// allocator over the same device.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let card = Card::open(path)?;
        let gbm = gbm::Device::new(card.try_clone()?)?;
        Ok(Self {
            card,
            gbm,
            handles: Mutex::new(HandleCache::default()),
        })
    }

    /// Creates a scan-out capable render surface sized to `mode`, in the
    /// XRGB format matching the published framebuffer layout.
    pub fn create_surface(&self, mode: &Mode) -> io::Result<KmsSurface> {
        let surface = self.gbm.create_surface::<()>(
            u32::from(mode.width),
            u32::from(mode.height),
            gbm::Format::Xrgb8888,
            gbm::BufferObjectFlags::SCANOUT | gbm::BufferObjectFlags::RENDERING,
        )?;
        Ok(KmsSurface(Arc::new(surface)))
    }

    fn handles(&self) -> MutexGuard<'_, HandleCache> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ScanoutDevice for KmsDevice {
    type Surface = KmsSurface;
    type Buffer = KmsBuffer;
    type SavedCrtc = SavedCrtc;

    fn connectors(&self) -> io::Result<Vec<ConnectorDesc>> {
        let resources = self.card.resource_handles()?;
        let mut handles = self.handles();
        handles.connectors.clear();
        handles.modes.clear();

        let mut descs = Vec::with_capacity(resources.connectors().len());
        for &handle in resources.connectors() {
            let info = self.card.get_connector(handle, false)?;
            let id = ConnectorId(handle.into());
            handles.connectors.insert(id, handle);
            handles.modes.insert(id, info.modes().to_vec());
            descs.push(ConnectorDesc {
                id,
                connected: info.state() == connector::State::Connected,
                encoder: info.current_encoder().map(|e| EncoderId(e.into())),
                modes: info.modes().iter().map(convert_mode).collect(),
            });
        }
        Ok(descs)
    }

    fn encoders(&self) -> io::Result<Vec<EncoderDesc>> {
        let resources = self.card.resource_handles()?;
        let mut handles = self.handles();
        handles.crtcs.clear();

        let mut descs = Vec::with_capacity(resources.encoders().len());
        for &handle in resources.encoders() {
            let info = self.card.get_encoder(handle)?;
            let crtc = info.crtc().map(|c| {
                let id = CrtcId(c.into());
                handles.crtcs.insert(id, c);
                id
            });
            descs.push(EncoderDesc {
                id: EncoderId(handle.into()),
                crtc,
            });
        }
        Ok(descs)
    }

    fn save_crtc(&self, crtc: CrtcId) -> io::Result<Self::SavedCrtc> {
        let handle = self.handles().crtc(crtc)?;
        Ok(SavedCrtc(self.card.get_crtc(handle)?))
    }

    fn restore_crtc(&self, saved: &Self::SavedCrtc, connector: ConnectorId) -> io::Result<()> {
        let handle = self.handles().connector(connector)?;
        self.card.set_crtc(
            saved.0.handle(),
            saved.0.framebuffer(),
            saved.0.position(),
            &[handle],
            saved.0.mode(),
        )
    }

    fn lock_front_buffer(&self, surface: &Self::Surface) -> io::Result<Self::Buffer> {
        // SAFETY: the engine locks a front buffer only after the rendering
        // layer's buffer swap, and holds the buffer (keeping the surface's
        // Arc alive alongside it) until the frame leaves the screen.
        let buffer = unsafe { surface.0.lock_front_buffer() }.map_err(io::Error::other)?;
        Ok(KmsBuffer(buffer))
    }

    fn release_buffer(&self, _surface: &Self::Surface, buffer: Self::Buffer) {
        drop(buffer);
    }

    fn add_framebuffer(&self, buffer: &Self::Buffer, _mode: &Mode) -> io::Result<FramebufferId> {
        let handle = self.card.add_framebuffer(&buffer.0, FB_DEPTH, FB_BPP)?;
        let id = FramebufferId(handle.into());
        self.handles().framebuffers.insert(id, handle);
        Ok(id)
    }

    fn remove_framebuffer(&self, framebuffer: FramebufferId) -> io::Result<()> {
        let Some(handle) = self.handles().framebuffers.remove(&framebuffer) else {
            return Err(io::Error::other(format!(
                "unknown framebuffer {framebuffer:?}"
            )));
        };
        self.card.destroy_framebuffer(handle)
    }

    fn set_crtc(
        &self,
        crtc: CrtcId,
        framebuffer: FramebufferId,
        connector: ConnectorId,
        mode: &Mode,
    ) -> io::Result<()> {
        let (crtc_handle, connector_handle, fb_handle, drm_mode) = {
            let handles = self.handles();
            let fb = handles
                .framebuffers
                .get(&framebuffer)
                .copied()
                .ok_or_else(|| io::Error::other(format!("unknown framebuffer {framebuffer:?}")))?;
            (
                handles.crtc(crtc)?,
                handles.connector(connector)?,
                fb,
                handles.drm_mode(connector, mode)?,
            )
        };
        self.card.set_crtc(
            crtc_handle,
            Some(fb_handle),
            (0, 0),
            &[connector_handle],
            Some(drm_mode),
        )
    }

    fn page_flip(&self, crtc: CrtcId, framebuffer: FramebufferId) -> io::Result<()> {
        let (crtc_handle, fb_handle) = {
            let handles = self.handles();
            let fb = handles
                .framebuffers
                .get(&framebuffer)
                .copied()
                .ok_or_else(|| io::Error::other(format!("unknown framebuffer {framebuffer:?}")))?;
            (handles.crtc(crtc)?, fb)
        };
        self.card
            .page_flip(crtc_handle, fb_handle, PageFlipFlags::EVENT, None)
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let timespec = Timespec {
            tv_sec: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
            tv_nsec: timeout.subsec_nanos().into(),
        };
        let mut fds = [PollFd::new(&self.card, PollFlags::IN)];
        match rustix::event::poll(&mut fds, Some(&timespec)) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(rustix::io::Errno::INTR) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn drain_events(&self) -> io::Result<Vec<FlipEvent>> {
        // The descriptor is non-blocking, so an empty kernel queue reads
        // as WouldBlock rather than stalling the caller.
        let events = match self.card.receive_events() {
            Ok(events) => events,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut flips = Vec::new();
        for event in events {
            match event {
                Event::PageFlip(flip) => flips.push(FlipEvent {
                    crtc: CrtcId(flip.crtc.into()),
                    frame: flip.frame,
                }),
                Event::Vblank(vblank) => {
                    trace!(frame = vblank.frame, "ignoring vblank event");
                }
                Event::Unknown(_) => {
                    trace!("ignoring unknown event");
                }
            }
        }
        Ok(flips)
    }
}

#[cfg(test)]
mod tests {
    use super::HandleCache;
    use scanout_core::device::{ConnectorId, CrtcId, Mode};

    #[test]
    fn cache_misses_report_the_id() {
        let cache = HandleCache::default();
        let err = cache
            .connector(ConnectorId(42))
            .expect_err("nothing interned");
        assert!(err.to_string().contains("42"));

        let err = cache.crtc(CrtcId(7)).expect_err("nothing interned");
        assert!(err.to_string().contains("7"));

        let mode = Mode {
            width: 1920,
            height: 1080,
            refresh: 60,
            interlaced: false,
        };
        let err = cache
            .drm_mode(ConnectorId(42), &mode)
            .expect_err("no modes interned");
        assert!(err.to_string().contains("1920x1080p60"));
    }
}

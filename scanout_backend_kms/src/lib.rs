// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Linux KMS/GBM backend for scanout.
//!
//! Drives a bare display output through legacy kernel mode-setting:
//!
//! - Connector/encoder/CRTC enumeration over an open DRM node
//! - GBM surface allocation and front-buffer locking
//! - Framebuffer publication and vblank-timed page flips, with completion
//!   events read from the (non-blocking) device descriptor
//!
//! ```rust,ignore
//! use scanout_backend_kms::{KmsDevice, KmsPresentEngine};
//!
//! let device = KmsDevice::open("/dev/dri/card0")?;
//! let mut engine = KmsPresentEngine::new(device);
//! engine.reset()?;
//! let mode = engine.current_mode().expect("reset resolved an output");
//! let surface = engine.device().create_surface(&mode)?;
//! // ... make the surface current in the rendering API, then per frame:
//! engine.flip_surface(surface.clone())?;
//! ```

#![expect(
    unsafe_code,
    reason = "gbm objects wrap raw pointers; Send/Sync and front-buffer locking need unsafe"
)]

mod card;
mod device;

pub use card::Card;
pub use device::{KmsBuffer, KmsDevice, KmsSurface, SavedCrtc};
pub use scanout_core::device::Mode;
pub use scanout_core::engine::PresentEngine;
pub use scanout_core::error::{DiscoveryError, PresentError};

/// The presentation engine specialized to the KMS device.
pub type KmsPresentEngine = PresentEngine<KmsDevice>;

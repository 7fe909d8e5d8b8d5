// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types for output discovery and the flip path.
//!
//! Every variant is logged at its failure site before being returned; the
//! engine never retries on its own. Retry policy, if any, belongs to the
//! caller.

use core::fmt;
use std::error::Error;
use std::io;

/// Errors surfaced by [`PresentEngine`](crate::engine::PresentEngine)
/// operations.
#[derive(Debug)]
pub enum PresentError {
    /// Output discovery found no usable connector/encoder pair.
    Discovery(DiscoveryError),
    /// The surface had no ready front buffer to lock.
    BufferLock(io::Error),
    /// Publishing the locked buffer as a hardware framebuffer failed.
    FramebufferCreate(io::Error),
    /// The one-time synchronous mode-set was rejected.
    Modeset(io::Error),
    /// The asynchronous page-flip request was rejected.
    PageFlipRequest(io::Error),
    /// A flip was submitted before any successful [`reset`].
    ///
    /// [`reset`]: crate::engine::PresentEngine::reset
    NoOutput,
    /// The completion event thread could not be spawned.
    EventThread(io::Error),
}

impl fmt::Display for PresentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery(err) => write!(f, "output discovery failed: {err}"),
            Self::BufferLock(_) => f.write_str("failed to lock surface front buffer"),
            Self::FramebufferCreate(_) => f.write_str("failed to publish framebuffer"),
            Self::Modeset(_) => f.write_str("failed to bind framebuffer to display controller"),
            Self::PageFlipRequest(_) => f.write_str("failed to request page flip"),
            Self::NoOutput => f.write_str("no active output; reset the engine first"),
            Self::EventThread(_) => f.write_str("failed to start completion event thread"),
        }
    }
}

impl Error for PresentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Discovery(err) => Some(err),
            Self::BufferLock(err)
            | Self::FramebufferCreate(err)
            | Self::Modeset(err)
            | Self::PageFlipRequest(err)
            | Self::EventThread(err) => Some(err),
            Self::NoOutput => None,
        }
    }
}

impl From<DiscoveryError> for PresentError {
    fn from(err: DiscoveryError) -> Self {
        Self::Discovery(err)
    }
}

/// Why [`reset`](crate::engine::PresentEngine::reset) could not resolve an
/// output.
#[derive(Debug)]
pub enum DiscoveryError {
    /// The display subsystem's resource set could not be enumerated.
    Resources(io::Error),
    /// No connected connector with a non-empty mode list was found.
    NoActiveConnector,
    /// No encoder matches the selected connector's bound encoder.
    NoMatchingEncoder,
    /// The matching encoder has no display controller bound to it.
    EncoderWithoutCrtc,
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resources(_) => f.write_str("failed to obtain display resources"),
            Self::NoActiveConnector => f.write_str("no active connector found"),
            Self::NoMatchingEncoder => f.write_str("no encoder for the selected connector"),
            Self::EncoderWithoutCrtc => f.write_str("selected encoder has no bound CRTC"),
        }
    }
}

impl Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Resources(err) => Some(err),
            _ => None,
        }
    }
}

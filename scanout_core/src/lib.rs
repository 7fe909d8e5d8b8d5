// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Double-buffered page-flip presentation engine for raw display outputs.
//!
//! `scanout_core` presents successive rendered frames on a compositor-less
//! display output using hardware double buffering and asynchronous,
//! vertical-blank-timed page flips. Presentation never tears, and the
//! producer thread never blocks longer than necessary on hardware that is
//! still displaying the previous frame.
//!
//! # Architecture
//!
//! The crate is organized around one engine coordinating two threads of
//! control over a single lock-guarded state block:
//!
//! ```text
//!   producer thread                      completion event thread
//!        │                                        │
//!        ▼                                        ▼
//!   PresentEngine::flip_surface()          bounded poll on the device
//!        │ lock ───────────────┐                  │ readable
//!        ▼                     │                  ▼ lock
//!   next slot: lock buffer,    │            drain queued FlipEvents
//!   publish framebuffer,       ├── Mutex ◄──      │
//!   (first-frame mode-set),    │            per event: decrement
//!   request async flip         │            pending count, release the
//!        │                     │            off-screen slot, advance
//!        ▼ unlock ─────────────┘            the ring parity
//!   returns once the flip is *requested*
//! ```
//!
//! **[`engine`]** — The [`PresentEngine`](engine::PresentEngine): output
//! discovery (`reset`), flip submission (`flip_surface`), completion
//! handling, `wait_page_flip`, and teardown with display-state restore.
//!
//! **[`device`]** — The [`ScanoutDevice`](device::ScanoutDevice) seam to
//! the display and buffer-allocation subsystems, plus the descriptor types
//! that cross it. Platform backends (and test doubles) implement this.
//!
//! **[`error`]** — Concrete error types for discovery and the flip path.
//!
//! Surface and buffer-object allocation, rendering contexts, and device
//! node discovery are external collaborators: they are consumed through
//! [`ScanoutDevice`](device::ScanoutDevice) and never owned here.

pub mod device;
pub mod engine;
pub mod error;

mod slot;

#[cfg(test)]
pub(crate) mod fake;

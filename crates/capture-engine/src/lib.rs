//! Tethercap Capture Engine
//!
//! Drives a single-device screen recording session over an opaque capture
//! pipeline. The controller serializes start/stop toggles against one
//! mutable session and reports lifecycle milestones to an observer.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │          CaptureSessionController             │
//! │                                               │
//! │  Idle ──toggle──▶ Preparing ──confirm──▶      │
//! │   ▲                              Recording    │
//! │   │                                  │toggle  │
//! │   └──grace delay── StopScheduled ◀───┘        │
//! │                                               │
//! │        ┌──────────────────────────┐           │
//! │        │  CapturePipeline (sink)  │           │
//! │        │  device input ─▶ file    │           │
//! │        └──────────────────────────┘           │
//! └───────────────────────────────────────────────┘
//! ```

pub mod pipeline;
pub mod session;

pub use pipeline::*;
pub use session::*;

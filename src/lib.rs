//! Core library for the astro_rig application.
//!
//! This library drives an astrophotography rig: a camera and a motorised
//! equatorial mount attached to a single-board computer. It selects device
//! drivers at runtime, protects the devices' original settings, runs
//! unattended capture sessions in the background and publishes status events
//! for whatever front end is attached. It is used by the `astro_rig` binary
//! and by any transport layer that wraps a [`RigContext`].
//!
//! # Layout
//!
//! - [`device`]: capability traits, drivers, handles and the driver factory
//! - [`state_guard`] and [`shutdown`]: settings snapshot/restore on every exit path
//! - [`session`]: session configuration, state machine and metadata
//! - [`broadcaster`]: topic-based status events
//! - [`storage`]: capture directory selection and listing
//! - [`preview`]: live-preview frame loop
//! - [`context`]: the operation set exposed to front ends

pub mod broadcaster;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod logging;
pub mod preview;
pub mod session;
pub mod shutdown;
pub mod state_guard;
pub mod storage;

pub use context::RigContext;
pub use error::{RigError, RigResult};

//! Testing utilities for guestcam
//!
//! Provides a scripted in-process host device and synthetic frame data so the
//! capture pipeline can be exercised without a hypervisor.

pub mod scripted_host;
pub mod synthetic_data;

pub use scripted_host::{ScriptedHost, STATUS_INVALID};
pub use synthetic_data::{synthetic_frame, synthetic_i420_frame, synthetic_rgba_frame};

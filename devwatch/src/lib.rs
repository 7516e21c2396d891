//! Device hotplug monitoring over the kernel's device-notification channel.
//!
//! The [`monitor`] module is the public surface; [`native`] holds the
//! backends it runs on.

pub mod config;
pub mod error;
pub mod monitor;
pub mod native;
pub mod tracing;

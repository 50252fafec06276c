//! Fader configuration protocol
//!
//! The parts of the firmware that sit on top of the parameter store:
//!
//! - [`report`] - The 64-byte HID configuration report
//! - [`config`] - GET/SET parameter handling against [`Storage`](fader_storage::Storage)
//! - [`params`] - Parameter id space for faders, buttons and the bootloader
//! - [`bootloader`] - The bootloader's entry records
//!
//! # Report Layout
//!
//! ```text
//! ┌─────────┬──────────────────────────────────────────┐
//! │ COMMAND │ PARAMETERS                               │
//! │ u32 LE  │ 15 × u32 LE                              │
//! └─────────┴──────────────────────────────────────────┘
//! ```
//!
//! Status words carry the storage result code verbatim: zero is success,
//! negative values are errors and positive values are warnings.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod bootloader;
pub mod config;
pub mod params;
pub mod report;

pub use bootloader::{BootEntry, BootError, ResetFlags, BOOTLOADER_MAGIC_SKIP};
pub use config::{ConfigCommand, ConfigHandler};
pub use params::{ButtonParameter, FaderParameter};
pub use report::{Report, ReportError, REPORT_SIZE};

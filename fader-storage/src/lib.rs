//! Parameter storage for the fader firmware
//!
//! The target microcontroller has no EEPROM, so small configuration values
//! are kept in a log-structured store written directly to flash:
//!
//! - [`nvm`] - Verified half-word program and page erase on top of a
//!   [`FlashController`](fader_hal::FlashController)
//! - [`record`] - On-flash record format and the bounds-checked walk
//! - [`layout`] - The two segments and their in-use magic words
//! - [`engine`] - Lookup, append, invalidate, recovery
//! - [`compact`] - Migration of live records into the other segment
//! - [`typed`] - Postcard-encoded typed values
//!
//! # On-flash layout
//!
//! ```text
//! segment A                              segment B
//! ┌───────┬──────────┬──────────┬─────┐  ┌───────┬─────────────────────┐
//! │ magic │ record 0 │ record 1 │ ... │  │ 0xFFFF│ erased              │
//! └───────┴──────────┴──────────┴─────┘  └───────┴─────────────────────┘
//!
//! record: ┌───────────┬──────┬──────────────┬─────────┐
//!         │ parameter │ size │ data[size]   │ pad to 4│
//!         │ u16 LE    │u16 LE│              │         │
//!         └───────────┴──────┴──────────────┴─────────┘
//! ```
//!
//! The engine assumes a single caller at a time. Callers that share it
//! between interrupt contexts must serialize access themselves.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

mod fmt;

pub mod compact;
pub mod engine;
pub mod error;
pub mod layout;
pub mod nvm;
pub mod record;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod typed;

pub use compact::Migration;
pub use engine::{ReadOutcome, Recovery, SegmentStats, Storage};
pub use error::StorageError;
pub use layout::{Segment, SegmentId, SegmentTable, StorageLayout, SEGMENT_MAGIC_IN_USE};
pub use nvm::Nvm;
pub use typed::MAX_VALUE_SIZE;

//! Fader Hardware Abstraction Layer
//!
//! This crate defines the hardware abstraction traits that chip-specific
//! HALs implement. The storage engine is written against these traits so
//! the same code runs on the STM32F0 and against the simulated flash used
//! by the host tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application (fader-firmware, etc.)     │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  fader-storage (NVM layer + engine)     │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  fader-hal (this crate - traits)        │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │  fader-hal-   │       │   SimFlash    │
//! │   stm32f0     │       │  (host tests) │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`flash::FlashController`] - Register-level flash program/erase

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod flash;

// Re-export key types at crate root for convenience
pub use flash::{FlashController, FlashStatus, NvmError};

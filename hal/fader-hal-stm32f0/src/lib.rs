//! STM32F0-specific HAL for the Fader firmware
//!
//! This crate provides the STM32F0 implementation of the `fader-hal`
//! flash controller trait and the memory map of the parameter storage.
//! It supports:
//!
//! - STM32F042F6 (TSSOP20)
//! - STM32F042K6 (LQFP32)
//!
//! # Features
//!
//! - `stm32f042f6` / `stm32f042k6` - Select the chip
//! - `defmt` - Enable debug formatting support

#![no_std]

pub mod flash;

pub use fader_hal::{FlashController, FlashStatus, NvmError};
pub use flash::Stm32f0Flash;

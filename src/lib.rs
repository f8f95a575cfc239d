// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Clock tree startup drivers for the STM32F105/F107 (connectivity line)
//! MCUs.
//!
//! The connectivity line routes the external crystal through two cascaded
//! PLLs: the crystal feeds PLL2 through the PREDIV2 prescaler, and PLL2's
//! output feeds the main PLL (PLL1) through PREDIV1. This crate computes the
//! divider/multiplier settings that reach a requested core frequency,
//! programs the flash wait states to match, and performs the ordered switch
//! of SYSCLK onto PLL1.
//!
//! The entry point is [`clocks::Clocks::setup_system_clock`], called once at
//! boot before anything that depends on the bus or core clock speed:
//!
//! ```rust,ignore
//! let rcc = Rcc::new();
//! let flash = Flash::new();
//! let clocks = Clocks::new(&rcc);
//! clocks.set_flash(&flash);
//!
//! let plan = clocks.setup_system_clock(25_000_000, 72_000_000)?;
//! // plan.achieved_hz == 72_000_000
//! ```
//!
//! Hardware access goes through the [`rcc::ClockControl`] and
//! [`flash::FlashControl`] port traits, so the drivers can be exercised
//! against in-memory fakes as well as the memory-mapped peripherals.

#![cfg_attr(not(test), no_std)]

pub(crate) mod fmt;

mod errorcode;
pub use errorcode::ErrorCode;

pub mod utilities;

pub mod clocks;
pub mod flash;
pub mod rcc;

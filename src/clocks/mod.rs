// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Clock drivers and the startup sequencer.

pub mod clocks;
pub mod hse;
pub mod pll;

pub use crate::clocks::clocks::Clocks;
pub use crate::clocks::clocks::FrequencyPlan;

// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! High-speed external (HSE) clock driver.
//!
//! The HSE oscillator is driven by the board crystal and is the reference
//! every other clock in the startup sequence derives from. Enabling it is
//! non-blocking. Whether the oscillator has stabilized is reported by
//! [`Hse::is_ready`], which the sequencer polls.

use crate::rcc::{ClockControl, SysClockSource};
use crate::utilities::cells::OptionalCell;
use crate::ErrorCode;

/// Oscillator drive mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HseMode {
    /// A crystal or ceramic resonator between the OSC pins
    CRYSTAL,
    /// An external clock signal on OSC_IN, the oscillator itself is off
    BYPASS,
}

/// Main HSE clock structure
pub struct Hse<'a, R: ClockControl> {
    rcc: &'a R,
    hse_frequency_hz: OptionalCell<u32>,
}

impl<'a, R: ClockControl> Hse<'a, R> {
    /// Create a new instance of the HSE clock.
    ///
    /// # Parameters
    ///
    /// + rcc: an instance of the clock control port
    ///
    /// # Returns
    ///
    /// An instance of the HSE clock with no configured frequency.
    pub fn new(rcc: &'a R) -> Self {
        Self {
            rcc,
            hse_frequency_hz: OptionalCell::empty(),
        }
    }

    /// Start the HSE clock. Does not wait for the oscillator to stabilize.
    ///
    /// # Errors
    ///
    /// + [`Err`]\([`ErrorCode::ALREADY`]\): the clock is already enabled
    pub fn enable(&self, frequency_hz: u32, mode: HseMode) -> Result<(), ErrorCode> {
        if self.rcc.is_enabled_hse_clock() {
            return Err(ErrorCode::ALREADY);
        }

        if let HseMode::BYPASS = mode {
            // The bypass bit may only change while the oscillator is off
            self.rcc.enable_hse_clock_bypass();
        }
        self.rcc.enable_hse_clock();
        self.hse_frequency_hz.set(frequency_hz);

        Ok(())
    }

    /// Stop the HSE clock.
    ///
    /// # Errors
    ///
    /// + [`Err`]\([`ErrorCode::FAIL`]\): the system clock runs from the HSE
    ///   clock, directly or through the PLL cascade
    pub fn disable(&self) -> Result<(), ErrorCode> {
        // The PLL cascade is always fed from the HSE on this chip, so a
        // system clock on the PLL depends on this clock too
        match self.rcc.get_sys_clock_source() {
            SysClockSource::HSE | SysClockSource::PLL => return Err(ErrorCode::FAIL),
            SysClockSource::HSI => (),
        }

        self.rcc.disable_hse_clock();
        self.hse_frequency_hz.clear();

        Ok(())
    }

    /// Check whether the HSE clock is enabled.
    pub fn is_enabled(&self) -> bool {
        self.rcc.is_enabled_hse_clock()
    }

    /// Check whether the HSE oscillator has stabilized.
    pub fn is_ready(&self) -> bool {
        self.rcc.is_ready_hse_clock()
    }

    /// Get the frequency of the HSE clock in Hz, or `None` if disabled.
    pub fn get_frequency_hz(&self) -> Option<u32> {
        self.hse_frequency_hz.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clocks::clocks::tests::FakeClockControl;

    #[test]
    fn enable_is_non_blocking_and_records_frequency() {
        let rcc = FakeClockControl::new();
        let hse = Hse::new(&rcc);

        assert_eq!(None, hse.get_frequency_hz());
        assert_eq!(Ok(()), hse.enable(25_000_000, HseMode::CRYSTAL));
        assert!(hse.is_enabled());
        assert_eq!(Some(25_000_000), hse.get_frequency_hz());
        // Stabilization is reported separately
        assert!(!hse.is_ready());
    }

    #[test]
    fn enable_twice_is_rejected() {
        let rcc = FakeClockControl::new();
        let hse = Hse::new(&rcc);

        hse.enable(25_000_000, HseMode::CRYSTAL).unwrap();
        assert_eq!(
            Err(ErrorCode::ALREADY),
            hse.enable(25_000_000, HseMode::CRYSTAL)
        );
    }

    #[test]
    fn bypass_sets_the_bypass_bit() {
        let rcc = FakeClockControl::new();
        let hse = Hse::new(&rcc);

        hse.enable(8_000_000, HseMode::BYPASS).unwrap();
        assert!(rcc.hse_bypass.get());
    }

    #[test]
    fn disable_is_guarded_by_the_system_clock_source() {
        let rcc = FakeClockControl::new();
        let hse = Hse::new(&rcc);

        hse.enable(25_000_000, HseMode::CRYSTAL).unwrap();
        rcc.requested_source.set(SysClockSource::HSE);
        rcc.sys_clock_source.set(SysClockSource::HSE);
        assert_eq!(Err(ErrorCode::FAIL), hse.disable());

        // A system clock on the PLL still depends on the HSE
        rcc.requested_source.set(SysClockSource::PLL);
        rcc.sys_clock_source.set(SysClockSource::PLL);
        assert_eq!(Err(ErrorCode::FAIL), hse.disable());

        rcc.requested_source.set(SysClockSource::HSI);
        rcc.sys_clock_source.set(SysClockSource::HSI);
        assert_eq!(Ok(()), hse.disable());
        assert!(!hse.is_enabled());
        assert_eq!(None, hse.get_frequency_hz());
    }
}

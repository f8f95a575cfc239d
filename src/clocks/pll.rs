// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Main PLL (PLL1) and PLL2 clock driver.
//!
//! On the connectivity line the two PLLs form a cascade. The crystal
//! frequency is divided by PREDIV2 and multiplied by PLL2MUL to produce the
//! PLL2 output, which is divided by PREDIV1 and multiplied by PLLMUL to
//! produce the system clock. [`best_parameters`] searches the whole setting
//! space for the highest reachable frequency not above the requested target;
//! [`Pll`] programs and sequences the hardware from the result.
//!
//! All frequency arithmetic is integer division in cascade order, so the
//! computed frequencies are exactly the ones the hardware produces.

use crate::rcc::{ClockControl, Pll1Mul, Pll2Mul, PllPrediv, PllSource, Prediv1Source};
use crate::rcc::SysClockSource;
use crate::utilities::cells::OptionalCell;
use crate::ErrorCode;

/// Lowest frequency either PLL output may run at.
const PLL_MIN_FREQUENCY_HZ: u32 = 18_000_000;
/// Highest frequency the PLL2 output may run at.
const PLL2_MAX_FREQUENCY_HZ: u32 = 72_000_000;

/// A complete setting of the PLL cascade together with the frequencies it
/// produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllParameters {
    pub prediv2: PllPrediv,
    pub pll2_mul: Pll2Mul,
    pub prediv1: PllPrediv,
    pub pll1_mul: Pll1Mul,
    /// Output frequency of PLL2 in Hz
    pub pll2_frequency_hz: u32,
    /// Output frequency of the main PLL in Hz
    pub sys_frequency_hz: u32,
}

/// Search the PLL setting space for the highest system clock frequency that
/// does not exceed `target_hz`.
///
/// Every combination of predividers and multipliers is tried. A combination
/// qualifies when the PLL2 output falls within its working range and the
/// main PLL output is above the PLL minimum. Among qualifying combinations
/// only a strictly higher output replaces the current best, so of several
/// settings producing the same frequency the first one found is kept.
///
/// # Errors
///
/// + [`Err`]\([`ErrorCode::INVAL`]\): no combination qualifies. This happens
///   when `target_hz` is at or below the PLL minimum or when `crystal_hz` is
///   outside any usable range.
pub fn best_parameters(crystal_hz: u32, target_hz: u32) -> Result<PllParameters, ErrorCode> {
    let mut best: Option<PllParameters> = None;

    for prediv2 in PllPrediv::ALL {
        for pll2_mul in Pll2Mul::ALL {
            // Division happens first, exactly as in the hardware cascade
            let pll2_hz = crystal_hz as u64 / prediv2.divider() as u64 * pll2_mul.factor() as u64;
            if pll2_hz < PLL_MIN_FREQUENCY_HZ as u64 || pll2_hz > PLL2_MAX_FREQUENCY_HZ as u64 {
                continue;
            }
            let pll2_hz = pll2_hz as u32;

            for prediv1 in PllPrediv::ALL {
                for pll1_mul in Pll1Mul::ALL {
                    let sys_hz = pll1_mul.apply(pll2_hz / prediv1.divider());
                    if sys_hz <= PLL_MIN_FREQUENCY_HZ || sys_hz > target_hz {
                        continue;
                    }
                    if best.map_or(true, |b| sys_hz > b.sys_frequency_hz) {
                        best = Some(PllParameters {
                            prediv2,
                            pll2_mul,
                            prediv1,
                            pll1_mul,
                            pll2_frequency_hz: pll2_hz,
                            sys_frequency_hz: sys_hz,
                        });
                    }
                }
            }
        }
    }

    best.ok_or(ErrorCode::INVAL)
}

/// Main PLL clock structure
pub struct Pll<'a, R: ClockControl> {
    rcc: &'a R,
    parameters: OptionalCell<PllParameters>,
}

impl<'a, R: ClockControl> Pll<'a, R> {
    /// Create a new instance of the PLL clock with no configured parameters.
    pub fn new(rcc: &'a R) -> Self {
        Self {
            rcc,
            parameters: OptionalCell::empty(),
        }
    }

    /// Find and cache the PLL parameters for the given crystal and target
    /// frequency. No hardware is touched.
    ///
    /// # Returns
    ///
    /// The system clock frequency in Hz the cached parameters will produce.
    ///
    /// # Errors
    ///
    /// + [`Err`]\([`ErrorCode::FAIL`]\): the main PLL is already enabled
    /// + [`Err`]\([`ErrorCode::INVAL`]\): no reachable frequency at or below
    ///   the target
    pub fn set_frequency(&self, crystal_hz: u32, target_hz: u32) -> Result<u32, ErrorCode> {
        if self.rcc.is_enabled_pll1_clock() {
            return Err(ErrorCode::FAIL);
        }

        let parameters = best_parameters(crystal_hz, target_hz)?;
        trace!(
            "pll parameters: pll2={} sys={}",
            parameters.pll2_frequency_hz,
            parameters.sys_frequency_hz
        );
        self.parameters.set(parameters);

        Ok(parameters.sys_frequency_hz)
    }

    /// The cached parameters from the last successful [`Pll::set_frequency`].
    pub fn get_parameters(&self) -> Option<PllParameters> {
        self.parameters.get()
    }

    /// Program the predivider cascade and the PLL2 multiplier, and route
    /// PLL2 into PREDIV1. Must happen before PLL2 is enabled.
    ///
    /// # Errors
    ///
    /// + [`Err`]\([`ErrorCode::OFF`]\): no parameters have been cached
    /// + [`Err`]\([`ErrorCode::FAIL`]\): PLL2 is already enabled
    pub fn configure_predividers(&self) -> Result<(), ErrorCode> {
        if self.rcc.is_enabled_pll2_clock() {
            return Err(ErrorCode::FAIL);
        }
        let parameters = self.parameters.get().ok_or(ErrorCode::OFF)?;

        self.rcc.set_prediv2(parameters.prediv2);
        self.rcc.set_pll2_mul(parameters.pll2_mul);
        self.rcc.set_prediv1(parameters.prediv1);
        self.rcc.set_prediv1_source(Prediv1Source::PLL2);

        Ok(())
    }

    /// Program the main PLL multiplier and route PREDIV1 into the main PLL.
    /// Must happen before the main PLL is enabled.
    ///
    /// # Errors
    ///
    /// + [`Err`]\([`ErrorCode::OFF`]\): no parameters have been cached
    /// + [`Err`]\([`ErrorCode::FAIL`]\): the main PLL is already enabled
    pub fn configure_multiplier(&self) -> Result<(), ErrorCode> {
        if self.rcc.is_enabled_pll1_clock() {
            return Err(ErrorCode::FAIL);
        }
        let parameters = self.parameters.get().ok_or(ErrorCode::OFF)?;

        self.rcc.set_pll1_mul(parameters.pll1_mul);
        self.rcc.set_pll_source(PllSource::PREDIV1);

        Ok(())
    }

    /// Start PLL2. Does not wait for the lock.
    pub fn enable_pll2(&self) -> Result<(), ErrorCode> {
        if self.parameters.is_none() {
            return Err(ErrorCode::OFF);
        }
        self.rcc.enable_pll2_clock();
        Ok(())
    }

    /// Start the main PLL. Does not wait for the lock.
    pub fn enable(&self) -> Result<(), ErrorCode> {
        if self.parameters.is_none() {
            return Err(ErrorCode::OFF);
        }
        self.rcc.enable_pll1_clock();
        Ok(())
    }

    /// Stop both PLLs and drop the cached parameters.
    ///
    /// # Errors
    ///
    /// + [`Err`]\([`ErrorCode::FAIL`]\): the main PLL is the current system
    ///   clock source
    pub fn disable(&self) -> Result<(), ErrorCode> {
        if self.rcc.get_sys_clock_source() == SysClockSource::PLL {
            return Err(ErrorCode::FAIL);
        }

        // The main PLL feeds off PLL2 and must stop first
        self.rcc.disable_pll1_clock();
        self.rcc.disable_pll2_clock();
        self.parameters.clear();

        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.rcc.is_enabled_pll1_clock()
    }

    /// Check whether the PLL2 output signal is stable.
    pub fn is_locked_pll2(&self) -> bool {
        self.rcc.is_locked_pll2_clock()
    }

    /// Check whether the main PLL output signal is stable.
    pub fn is_locked(&self) -> bool {
        self.rcc.is_locked_pll1_clock()
    }

    /// Get the frequency of the main PLL output in Hz, or `None` if no
    /// parameters are configured.
    pub fn get_frequency_hz(&self) -> Option<u32> {
        self.parameters.map(|p| p.sys_frequency_hz)
    }
}

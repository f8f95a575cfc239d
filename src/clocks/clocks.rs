// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Clock startup sequencer.
//!
//! [`Clocks`] owns the individual clock drivers and runs the whole startup
//! sequence in [`Clocks::setup_system_clock`]: pick PLL parameters for the
//! requested frequency, raise the flash latency, program and start the PLL
//! cascade in dependency order, and finally switch the system clock over
//! once the main PLL has locked.
//!
//! Two ordering rules are load bearing:
//!
//! + the flash latency is raised before any clock gets faster, never after;
//! + the switch is confirmed by polling the switch status field, not the
//!   request field, because the hardware completes the switch on its own
//!   schedule.
//!
//! Readiness polling is unbounded by default, matching bare-metal startup
//! code where a clock that never stabilizes is unrecoverable anyway. A poll
//! limit can be installed with [`Clocks::set_poll_limit`], after which a
//! clock missing its deadline surfaces as [`ErrorCode::BUSY`].

use core::cell::Cell;

use crate::clocks::hse::{Hse, HseMode};
use crate::clocks::pll::Pll;
use crate::flash::{FlashControl, FlashLatency};
use crate::rcc::{APBPrescaler, ClockControl, SysClockSource};
use crate::utilities::cells::OptionalCell;
use crate::ErrorCode;

/// Frequency of the internal RC oscillator the chip boots on.
pub const HSI_FREQUENCY_HZ: u32 = 8_000_000;

/// The outcome of a completed clock startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrequencyPlan {
    /// Crystal frequency the plan was computed from, in Hz
    pub crystal_hz: u32,
    /// Frequency the caller asked for, in Hz
    pub target_hz: u32,
    /// System clock frequency actually reached, in Hz
    pub achieved_hz: u32,
    /// Flash latency configured for the new frequency
    pub flash_latency: FlashLatency,
}

/// Main clock structure
pub struct Clocks<'a, R: ClockControl, F: FlashControl> {
    rcc: &'a R,
    flash: OptionalCell<&'a F>,
    /// High speed external clock
    pub hse: Hse<'a, R>,
    /// Main PLL and PLL2 clocks
    pub pll: Pll<'a, R>,
    poll_limit: Cell<Option<usize>>,
}

impl<'a, R: ClockControl, F: FlashControl> Clocks<'a, R, F> {
    pub fn new(rcc: &'a R) -> Self {
        Self {
            rcc,
            flash: OptionalCell::empty(),
            hse: Hse::new(rcc),
            pll: Pll::new(rcc),
            poll_limit: Cell::new(None),
        }
    }

    /// Set the flash instance used for latency reconfiguration. Must be
    /// called before the system clock is set up.
    pub fn set_flash(&self, flash: &'a F) {
        self.flash.set(flash);
    }

    /// Bound every readiness poll loop to at most `limit` polls. `None`
    /// restores unbounded polling.
    pub fn set_poll_limit(&self, limit: Option<usize>) {
        self.poll_limit.set(limit);
    }

    fn wait_until(&self, mut done: impl FnMut() -> bool) -> Result<(), ErrorCode> {
        match self.poll_limit.get() {
            Some(limit) => {
                for _ in 0..limit {
                    if done() {
                        return Ok(());
                    }
                }
                Err(ErrorCode::BUSY)
            }
            None => {
                while !done() {}
                Ok(())
            }
        }
    }

    /// Run the full clock startup sequence.
    ///
    /// On success the system clock runs from the main PLL at the highest
    /// reachable frequency not above `target_hz`, the flash latency matches
    /// the target frequency and the APB1 clock is halved to stay within its
    /// limit. On any error the hardware is left as far as the sequence got;
    /// an infeasible request fails before anything is touched.
    ///
    /// # Errors
    ///
    /// + [`Err`]\([`ErrorCode::INVAL`]\): no reachable frequency at or below
    ///   the target, or the HSE clock is already running at a different
    ///   frequency
    /// + [`Err`]\([`ErrorCode::OFF`]\): no flash instance was set
    /// + [`Err`]\([`ErrorCode::BUSY`]\): a clock missed the poll limit
    pub fn setup_system_clock(
        &self,
        crystal_hz: u32,
        target_hz: u32,
    ) -> Result<FrequencyPlan, ErrorCode> {
        debug!(
            "clock setup: crystal={} target={}",
            crystal_hz, target_hz
        );
        let achieved_hz = self.pll.set_frequency(crystal_hz, target_hz)?;

        match self.hse.enable(crystal_hz, HseMode::CRYSTAL) {
            Ok(()) => (),
            // A caller that started the HSE itself, possibly in bypass
            // mode, is fine as long as the frequency agrees
            Err(ErrorCode::ALREADY) if self.hse.get_frequency_hz() == Some(crystal_hz) => (),
            Err(ErrorCode::ALREADY) => return Err(ErrorCode::INVAL),
            Err(e) => return Err(e),
        }

        // Latency first. The flash must already tolerate the target
        // frequency when the switch happens.
        let flash = self.flash.get().ok_or(ErrorCode::OFF)?;
        flash.set_latency(target_hz)?;

        self.pll.configure_predividers()?;
        self.wait_until(|| self.hse.is_ready())?;

        self.pll.enable_pll2()?;
        self.pll.configure_multiplier()?;
        // APB1 is limited to half the maximum system clock frequency
        self.rcc.set_apb1_prescaler(APBPrescaler::DivideBy2);
        self.wait_until(|| self.pll.is_locked_pll2())?;

        self.pll.enable()?;
        self.wait_until(|| self.pll.is_locked())?;

        self.rcc.set_sys_clock_source(SysClockSource::PLL);
        self.wait_until(|| self.rcc.get_sys_clock_source() == SysClockSource::PLL)?;

        let plan = FrequencyPlan {
            crystal_hz,
            target_hz,
            achieved_hz,
            flash_latency: flash.get_latency(),
        };
        debug!(
            "clock setup done: achieved={} wait_states={}",
            plan.achieved_hz,
            plan.flash_latency.wait_states()
        );
        Ok(plan)
    }

    /// The clock source currently driving the system clock.
    pub fn get_sys_clock_source(&self) -> SysClockSource {
        self.rcc.get_sys_clock_source()
    }

    /// The frequency of the current system clock source in Hz.
    pub fn get_sys_clock_frequency_hz(&self) -> u32 {
        match self.rcc.get_sys_clock_source() {
            SysClockSource::HSI => HSI_FREQUENCY_HZ,
            SysClockSource::HSE => self.hse.get_frequency_hz().unwrap_or(HSI_FREQUENCY_HZ),
            SysClockSource::PLL => self.pll.get_frequency_hz().unwrap_or(HSI_FREQUENCY_HZ),
        }
    }

    /// The frequency of the APB1 bus clock in Hz.
    pub fn get_apb1_frequency_hz(&self) -> u32 {
        // The sequencer always programs the divide-by-two prescaler before
        // switching to the PLL
        match self.rcc.get_sys_clock_source() {
            SysClockSource::PLL => self.get_sys_clock_frequency_hz() / 2,
            _ => self.get_sys_clock_frequency_hz(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rcc::{Pll1Mul, Pll2Mul, PllPrediv, PllSource, Prediv1Source};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::vec::Vec;

    /// Everything observable the drivers do to the hardware, in call order.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub(crate) enum Event {
        EnableHse,
        EnableHseBypass,
        DisableHse,
        SetFlashLatency(FlashLatency),
        SetPrediv2(PllPrediv),
        SetPll2Mul(Pll2Mul),
        SetPrediv1(PllPrediv),
        SetPrediv1Source(Prediv1Source),
        EnablePll2,
        DisablePll2,
        SetPll1Mul(Pll1Mul),
        SetPllSource(PllSource),
        SetApb1Prescaler(APBPrescaler),
        EnablePll1,
        DisablePll1,
        RequestSysClock(SysClockSource),
        HseReady,
        Pll2Locked,
        Pll1Locked,
        SysClockSwitched(SysClockSource),
    }

    /// An in-memory stand-in for the clock control registers. Readiness
    /// flags come up after a configurable number of polls so the waiting
    /// behavior of the sequencer is observable, and the event log records
    /// the order everything happened in.
    pub(crate) struct FakeClockControl {
        pub(crate) log: Rc<RefCell<Vec<Event>>>,
        pub(crate) hse_on: Cell<bool>,
        pub(crate) hse_bypass: Cell<bool>,
        pub(crate) pll2_on: Cell<bool>,
        pub(crate) pll1_on: Cell<bool>,
        pub(crate) hse_ready_polls: Cell<usize>,
        pub(crate) pll2_lock_polls: Cell<usize>,
        pub(crate) pll1_lock_polls: Cell<usize>,
        pub(crate) switch_polls: Cell<usize>,
        hse_ready: Cell<bool>,
        pll2_locked: Cell<bool>,
        pll1_locked: Cell<bool>,
        pub(crate) requested_source: Cell<SysClockSource>,
        pub(crate) sys_clock_source: Cell<SysClockSource>,
    }

    impl FakeClockControl {
        pub(crate) fn new() -> Self {
            Self::with_log(Rc::new(RefCell::new(Vec::new())))
        }

        pub(crate) fn with_log(log: Rc<RefCell<Vec<Event>>>) -> Self {
            Self {
                log,
                hse_on: Cell::new(false),
                hse_bypass: Cell::new(false),
                pll2_on: Cell::new(false),
                pll1_on: Cell::new(false),
                // Each flag needs one failed poll before it comes up
                hse_ready_polls: Cell::new(1),
                pll2_lock_polls: Cell::new(1),
                pll1_lock_polls: Cell::new(1),
                switch_polls: Cell::new(1),
                hse_ready: Cell::new(false),
                pll2_locked: Cell::new(false),
                pll1_locked: Cell::new(false),
                requested_source: Cell::new(SysClockSource::HSI),
                sys_clock_source: Cell::new(SysClockSource::HSI),
            }
        }

        fn push(&self, event: Event) {
            self.log.borrow_mut().push(event);
        }

        fn poll_flag(&self, on: bool, polls: &Cell<usize>, flag: &Cell<bool>, event: Event) -> bool {
            if !on {
                return false;
            }
            let remaining = polls.get();
            if remaining > 0 {
                polls.set(remaining - 1);
                return false;
            }
            if !flag.get() {
                flag.set(true);
                self.push(event);
            }
            true
        }
    }

    impl ClockControl for FakeClockControl {
        fn enable_hse_clock(&self) {
            self.hse_on.set(true);
            self.push(Event::EnableHse);
        }

        fn enable_hse_clock_bypass(&self) {
            self.hse_bypass.set(true);
            self.push(Event::EnableHseBypass);
        }

        fn disable_hse_clock(&self) {
            self.hse_on.set(false);
            self.hse_bypass.set(false);
            self.push(Event::DisableHse);
        }

        fn is_enabled_hse_clock(&self) -> bool {
            self.hse_on.get()
        }

        fn is_ready_hse_clock(&self) -> bool {
            self.poll_flag(
                self.hse_on.get(),
                &self.hse_ready_polls,
                &self.hse_ready,
                Event::HseReady,
            )
        }

        fn set_prediv2(&self, prediv: PllPrediv) {
            self.push(Event::SetPrediv2(prediv));
        }

        fn set_pll2_mul(&self, mul: Pll2Mul) {
            self.push(Event::SetPll2Mul(mul));
        }

        fn set_prediv1(&self, prediv: PllPrediv) {
            self.push(Event::SetPrediv1(prediv));
        }

        fn set_prediv1_source(&self, source: Prediv1Source) {
            self.push(Event::SetPrediv1Source(source));
        }

        fn enable_pll2_clock(&self) {
            self.pll2_on.set(true);
            self.push(Event::EnablePll2);
        }

        fn disable_pll2_clock(&self) {
            self.pll2_on.set(false);
            self.push(Event::DisablePll2);
        }

        fn is_enabled_pll2_clock(&self) -> bool {
            self.pll2_on.get()
        }

        fn is_locked_pll2_clock(&self) -> bool {
            self.poll_flag(
                self.pll2_on.get(),
                &self.pll2_lock_polls,
                &self.pll2_locked,
                Event::Pll2Locked,
            )
        }

        fn set_pll1_mul(&self, mul: Pll1Mul) {
            self.push(Event::SetPll1Mul(mul));
        }

        fn set_pll_source(&self, source: PllSource) {
            self.push(Event::SetPllSource(source));
        }

        fn enable_pll1_clock(&self) {
            self.pll1_on.set(true);
            self.push(Event::EnablePll1);
        }

        fn disable_pll1_clock(&self) {
            self.pll1_on.set(false);
            self.push(Event::DisablePll1);
        }

        fn is_enabled_pll1_clock(&self) -> bool {
            self.pll1_on.get()
        }

        fn is_locked_pll1_clock(&self) -> bool {
            self.poll_flag(
                self.pll1_on.get(),
                &self.pll1_lock_polls,
                &self.pll1_locked,
                Event::Pll1Locked,
            )
        }

        fn set_apb1_prescaler(&self, prescaler: APBPrescaler) {
            self.push(Event::SetApb1Prescaler(prescaler));
        }

        fn set_sys_clock_source(&self, source: SysClockSource) {
            self.requested_source.set(source);
            self.push(Event::RequestSysClock(source));
        }

        fn get_sys_clock_source(&self) -> SysClockSource {
            let requested = self.requested_source.get();
            if requested != self.sys_clock_source.get() {
                let remaining = self.switch_polls.get();
                if remaining > 0 {
                    self.switch_polls.set(remaining - 1);
                } else {
                    self.sys_clock_source.set(requested);
                    self.push(Event::SysClockSwitched(requested));
                }
            }
            self.sys_clock_source.get()
        }
    }

    pub(crate) struct FakeFlash {
        latency: Cell<FlashLatency>,
        log: Rc<RefCell<Vec<Event>>>,
    }

    impl FakeFlash {
        pub(crate) fn new(log: Rc<RefCell<Vec<Event>>>) -> Self {
            Self {
                latency: Cell::new(FlashLatency::Latency0),
                log,
            }
        }
    }

    impl FlashControl for FakeFlash {
        fn set_latency(&self, sys_clock_frequency_hz: u32) -> Result<(), ErrorCode> {
            let latency = FlashLatency::for_sys_clock_frequency(sys_clock_frequency_hz);
            self.latency.set(latency);
            self.log.borrow_mut().push(Event::SetFlashLatency(latency));
            Ok(())
        }

        fn get_latency(&self) -> FlashLatency {
            self.latency.get()
        }
    }

    fn fixture() -> (Rc<RefCell<Vec<Event>>>, FakeClockControl, FakeFlash) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let rcc = FakeClockControl::with_log(Rc::clone(&log));
        let flash = FakeFlash::new(Rc::clone(&log));
        (log, rcc, flash)
    }

    #[test]
    fn startup_runs_in_dependency_order() {
        let (log, rcc, flash) = fixture();
        let clocks = Clocks::new(&rcc);
        clocks.set_flash(&flash);

        let plan = clocks.setup_system_clock(25_000_000, 72_000_000).unwrap();
        assert_eq!(72_000_000, plan.achieved_hz);

        assert_eq!(
            vec![
                Event::EnableHse,
                Event::SetFlashLatency(FlashLatency::Latency2),
                Event::SetPrediv2(PllPrediv::DivideBy5),
                Event::SetPll2Mul(Pll2Mul::Mul8),
                Event::SetPrediv1(PllPrediv::DivideBy5),
                Event::SetPrediv1Source(Prediv1Source::PLL2),
                Event::HseReady,
                Event::EnablePll2,
                Event::SetPll1Mul(Pll1Mul::Mul9),
                Event::SetPllSource(PllSource::PREDIV1),
                Event::SetApb1Prescaler(APBPrescaler::DivideBy2),
                Event::Pll2Locked,
                Event::EnablePll1,
                Event::Pll1Locked,
                Event::RequestSysClock(SysClockSource::PLL),
                Event::SysClockSwitched(SysClockSource::PLL),
            ],
            *log.borrow()
        );
    }

    #[test]
    fn startup_reports_the_frequency_plan() {
        let (_log, rcc, flash) = fixture();
        let clocks = Clocks::new(&rcc);
        clocks.set_flash(&flash);

        let plan = clocks.setup_system_clock(12_000_000, 36_000_000).unwrap();
        assert_eq!(12_000_000, plan.crystal_hz);
        assert_eq!(36_000_000, plan.target_hz);
        assert_eq!(36_000_000, plan.achieved_hz);
        assert_eq!(FlashLatency::Latency1, plan.flash_latency);

        assert_eq!(SysClockSource::PLL, clocks.get_sys_clock_source());
        assert_eq!(36_000_000, clocks.get_sys_clock_frequency_hz());
        assert_eq!(18_000_000, clocks.get_apb1_frequency_hz());
    }

    #[test]
    fn infeasible_requests_leave_the_hardware_alone() {
        let (log, rcc, flash) = fixture();
        let clocks = Clocks::new(&rcc);
        clocks.set_flash(&flash);

        assert_eq!(
            Err(ErrorCode::INVAL),
            clocks.setup_system_clock(25_000_000, 17_000_000)
        );
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn missing_flash_stops_the_sequence_early() {
        let (log, rcc, _flash) = fixture();
        let clocks: Clocks<FakeClockControl, FakeFlash> = Clocks::new(&rcc);

        assert_eq!(
            Err(ErrorCode::OFF),
            clocks.setup_system_clock(25_000_000, 72_000_000)
        );
        // The sequence stops before any PLL register is written
        assert_eq!(vec![Event::EnableHse], *log.borrow());
    }

    #[test]
    fn poll_limit_turns_a_stuck_clock_into_busy() {
        let (log, rcc, flash) = fixture();
        rcc.hse_ready_polls.set(100);
        let clocks = Clocks::new(&rcc);
        clocks.set_flash(&flash);
        clocks.set_poll_limit(Some(10));

        assert_eq!(
            Err(ErrorCode::BUSY),
            clocks.setup_system_clock(25_000_000, 72_000_000)
        );
        assert!(!log.borrow().contains(&Event::EnablePll2));
    }

    #[test]
    fn hse_cannot_be_disabled_under_a_running_pll_system_clock() {
        let (_log, rcc, flash) = fixture();
        let clocks = Clocks::new(&rcc);
        clocks.set_flash(&flash);

        clocks.setup_system_clock(25_000_000, 72_000_000).unwrap();
        assert_eq!(SysClockSource::PLL, clocks.get_sys_clock_source());
        assert_eq!(Err(ErrorCode::FAIL), clocks.hse.disable());
        assert!(clocks.hse.is_enabled());
    }

    #[test]
    fn an_hse_clock_started_by_the_caller_is_accepted() {
        let (_log, rcc, flash) = fixture();
        let clocks = Clocks::new(&rcc);
        clocks.set_flash(&flash);

        clocks.hse.enable(25_000_000, HseMode::BYPASS).unwrap();
        let plan = clocks.setup_system_clock(25_000_000, 72_000_000).unwrap();
        assert_eq!(72_000_000, plan.achieved_hz);
    }

    #[test]
    fn an_hse_clock_at_the_wrong_frequency_is_rejected() {
        let (_log, rcc, flash) = fixture();
        let clocks = Clocks::new(&rcc);
        clocks.set_flash(&flash);

        clocks.hse.enable(8_000_000, HseMode::CRYSTAL).unwrap();
        assert_eq!(
            Err(ErrorCode::INVAL),
            clocks.setup_system_clock(25_000_000, 72_000_000)
        );
    }
}

// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Reset and clock control (RCC) peripheral of the STM32F105/F107.
//!
//! The connectivity line clocks the main PLL (PLL1) from the output of PLL2:
//! the crystal is divided by PREDIV2 and multiplied by PLL2MUL, then the
//! PLL2 output is divided by PREDIV1 and multiplied by PLLMUL. All four
//! settings live in `CFGR`/`CFGR2` and use non-obvious encodings, so every
//! multi-valued field is represented here by an enum whose discriminant is
//! the exact register encoding.
//!
//! [`ClockControl`] is the narrow port the clock drivers program the
//! hardware through; [`Rcc`] implements it over the memory-mapped register
//! block.

use tock_registers::interfaces::{ReadWriteable, Readable};
use tock_registers::register_bitfields;
use tock_registers::registers::ReadWrite;

use crate::utilities::StaticRef;

/// Reset and clock control
#[repr(C)]
struct RccRegisters {
    /// clock control register
    cr: ReadWrite<u32, CR::Register>,
    /// clock configuration register
    cfgr: ReadWrite<u32, CFGR::Register>,
    /// clock interrupt register
    cir: ReadWrite<u32>,
    /// APB2 peripheral reset register
    apb2rstr: ReadWrite<u32>,
    /// APB1 peripheral reset register
    apb1rstr: ReadWrite<u32>,
    /// AHB peripheral clock enable register
    ahbenr: ReadWrite<u32>,
    /// APB2 peripheral clock enable register
    apb2enr: ReadWrite<u32>,
    /// APB1 peripheral clock enable register
    apb1enr: ReadWrite<u32>,
    /// backup domain control register
    bdcr: ReadWrite<u32>,
    /// control/status register
    csr: ReadWrite<u32>,
    /// AHB peripheral reset register
    ahbrstr: ReadWrite<u32>,
    /// clock configuration register 2
    cfgr2: ReadWrite<u32, CFGR2::Register>,
}

register_bitfields![u32,
    CR [
        /// PLL3 clock ready flag
        PLL3RDY OFFSET(29) NUMBITS(1) [],
        /// PLL3 enable
        PLL3ON OFFSET(28) NUMBITS(1) [],
        /// PLL2 clock ready flag
        PLL2RDY OFFSET(27) NUMBITS(1) [],
        /// PLL2 enable
        PLL2ON OFFSET(26) NUMBITS(1) [],
        /// Main PLL (PLL1) clock ready flag
        PLLRDY OFFSET(25) NUMBITS(1) [],
        /// Main PLL (PLL1) enable
        PLLON OFFSET(24) NUMBITS(1) [],
        /// Clock security system enable
        CSSON OFFSET(19) NUMBITS(1) [],
        /// HSE clock bypass
        HSEBYP OFFSET(18) NUMBITS(1) [],
        /// HSE clock ready flag
        HSERDY OFFSET(17) NUMBITS(1) [],
        /// HSE clock enable
        HSEON OFFSET(16) NUMBITS(1) [],
        /// Internal high-speed clock calibration
        HSICAL OFFSET(8) NUMBITS(8) [],
        /// Internal high-speed clock trimming
        HSITRIM OFFSET(3) NUMBITS(5) [],
        /// Internal high-speed clock ready flag
        HSIRDY OFFSET(1) NUMBITS(1) [],
        /// Internal high-speed clock enable
        HSION OFFSET(0) NUMBITS(1) []
    ],
    CFGR [
        /// Microcontroller clock output
        MCO OFFSET(24) NUMBITS(4) [],
        /// USB OTG FS prescaler
        OTGFSPRE OFFSET(22) NUMBITS(1) [],
        /// PLL multiplication factor
        PLLMUL OFFSET(18) NUMBITS(4) [],
        /// LSB of division factor PREDIV1
        PLLXTPRE OFFSET(17) NUMBITS(1) [],
        /// PLL entry clock source
        PLLSRC OFFSET(16) NUMBITS(1) [
            HSIDiv2 = 0,
            PREDIV1 = 1,
        ],
        /// ADC prescaler
        ADCPRE OFFSET(14) NUMBITS(2) [],
        /// APB high-speed prescaler (APB2)
        PPRE2 OFFSET(11) NUMBITS(3) [],
        /// APB low-speed prescaler (APB1)
        PPRE1 OFFSET(8) NUMBITS(3) [],
        /// AHB prescaler
        HPRE OFFSET(4) NUMBITS(4) [],
        /// System clock switch status
        SWS OFFSET(2) NUMBITS(2) [
            HSI = 0b00,
            HSE = 0b01,
            PLL = 0b10,
        ],
        /// System clock switch
        SW OFFSET(0) NUMBITS(2) [
            HSI = 0b00,
            HSE = 0b01,
            PLL = 0b10,
        ]
    ],
    CFGR2 [
        /// I2S3 clock source
        I2S3SRC OFFSET(18) NUMBITS(1) [],
        /// I2S2 clock source
        I2S2SRC OFFSET(17) NUMBITS(1) [],
        /// PREDIV1 entry clock source
        PREDIV1SRC OFFSET(16) NUMBITS(1) [
            HSE = 0,
            PLL2 = 1,
        ],
        /// PLL3 multiplication factor
        PLL3MUL OFFSET(12) NUMBITS(4) [],
        /// PLL2 multiplication factor
        PLL2MUL OFFSET(8) NUMBITS(4) [],
        /// PREDIV2 division factor
        PREDIV2 OFFSET(4) NUMBITS(4) [],
        /// PREDIV1 division factor
        PREDIV1 OFFSET(0) NUMBITS(4) []
    ]
];

const RCC_BASE: StaticRef<RccRegisters> =
    unsafe { StaticRef::new(0x40021000 as *const RccRegisters) };

/// Clock sources for the system clock (`CFGR.SW`/`CFGR.SWS` encoding).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum SysClockSource {
    HSI = 0b00,
    HSE = 0b01,
    PLL = 0b10,
}

/// Input clock of the main PLL (`CFGR.PLLSRC` encoding).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum PllSource {
    /// Internal oscillator divided by two
    HSIDiv2 = 0,
    /// Output of the PREDIV1 prescaler
    PREDIV1 = 1,
}

/// Input clock of the PREDIV1 prescaler (`CFGR2.PREDIV1SRC` encoding).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum Prediv1Source {
    HSE = 0,
    PLL2 = 1,
}

/// APB prescaler (`CFGR.PPRE1`/`CFGR.PPRE2` encoding).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum APBPrescaler {
    DivideBy1 = 0b000,
    DivideBy2 = 0b100,
    DivideBy4 = 0b101,
    DivideBy8 = 0b110,
    DivideBy16 = 0b111,
}

/// PLL input prescaler (PREDIV1/PREDIV2).
///
/// The hardware stores the division factor minus one, which is exactly the
/// discriminant of each variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum PllPrediv {
    DivideBy1 = 0b0000,
    DivideBy2 = 0b0001,
    DivideBy3 = 0b0010,
    DivideBy4 = 0b0011,
    DivideBy5 = 0b0100,
    DivideBy6 = 0b0101,
    DivideBy7 = 0b0110,
    DivideBy8 = 0b0111,
    DivideBy9 = 0b1000,
    DivideBy10 = 0b1001,
    DivideBy11 = 0b1010,
    DivideBy12 = 0b1011,
    DivideBy13 = 0b1100,
    DivideBy14 = 0b1101,
    DivideBy15 = 0b1110,
    DivideBy16 = 0b1111,
}

impl PllPrediv {
    /// Every predivider setting, in ascending division-factor order.
    pub const ALL: [PllPrediv; 16] = [
        PllPrediv::DivideBy1,
        PllPrediv::DivideBy2,
        PllPrediv::DivideBy3,
        PllPrediv::DivideBy4,
        PllPrediv::DivideBy5,
        PllPrediv::DivideBy6,
        PllPrediv::DivideBy7,
        PllPrediv::DivideBy8,
        PllPrediv::DivideBy9,
        PllPrediv::DivideBy10,
        PllPrediv::DivideBy11,
        PllPrediv::DivideBy12,
        PllPrediv::DivideBy13,
        PllPrediv::DivideBy14,
        PllPrediv::DivideBy15,
        PllPrediv::DivideBy16,
    ];

    /// The logical division factor (1 through 16).
    pub fn divider(self) -> u32 {
        self as u32 + 1
    }
}

/// PLL2 multiplication factor (`CFGR2.PLL2MUL` encoding).
///
/// The hardware stores the factor minus two, except x20 which has the
/// distinct encoding `0b1111`. The raw values 15, 17, 18 and 19 have no
/// valid encoding and therefore no variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum Pll2Mul {
    Mul8 = 0b0110,
    Mul9 = 0b0111,
    Mul10 = 0b1000,
    Mul11 = 0b1001,
    Mul12 = 0b1010,
    Mul13 = 0b1011,
    Mul14 = 0b1100,
    Mul16 = 0b1110,
    Mul20 = 0b1111,
}

impl Pll2Mul {
    /// Every valid multiplier, in ascending factor order.
    pub const ALL: [Pll2Mul; 9] = [
        Pll2Mul::Mul8,
        Pll2Mul::Mul9,
        Pll2Mul::Mul10,
        Pll2Mul::Mul11,
        Pll2Mul::Mul12,
        Pll2Mul::Mul13,
        Pll2Mul::Mul14,
        Pll2Mul::Mul16,
        Pll2Mul::Mul20,
    ];

    /// The logical multiplication factor.
    pub fn factor(self) -> u32 {
        match self {
            Pll2Mul::Mul8 => 8,
            Pll2Mul::Mul9 => 9,
            Pll2Mul::Mul10 => 10,
            Pll2Mul::Mul11 => 11,
            Pll2Mul::Mul12 => 12,
            Pll2Mul::Mul13 => 13,
            Pll2Mul::Mul14 => 14,
            Pll2Mul::Mul16 => 16,
            Pll2Mul::Mul20 => 20,
        }
    }
}

/// Main PLL multiplication factor (`CFGR.PLLMUL` encoding).
///
/// The hardware stores the factor minus two, except the fractional x6.5
/// ratio which has the distinct encoding `0b1101`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum Pll1Mul {
    Mul4 = 0b0010,
    Mul5 = 0b0011,
    Mul6 = 0b0100,
    Mul7 = 0b0101,
    Mul8 = 0b0110,
    Mul9 = 0b0111,
    Mul6_5 = 0b1101,
}

impl Pll1Mul {
    /// Every valid multiplier, integer factors in ascending order followed
    /// by the fractional x6.5 ratio.
    pub const ALL: [Pll1Mul; 7] = [
        Pll1Mul::Mul4,
        Pll1Mul::Mul5,
        Pll1Mul::Mul6,
        Pll1Mul::Mul7,
        Pll1Mul::Mul8,
        Pll1Mul::Mul9,
        Pll1Mul::Mul6_5,
    ];

    /// Multiply a prescaled input frequency by this factor.
    ///
    /// The x6.5 ratio multiplies by 13 before halving so the computation
    /// stays in integer arithmetic without losing the half step.
    pub fn apply(self, hz: u32) -> u32 {
        match self {
            Pll1Mul::Mul4 => hz * 4,
            Pll1Mul::Mul5 => hz * 5,
            Pll1Mul::Mul6 => hz * 6,
            Pll1Mul::Mul7 => hz * 7,
            Pll1Mul::Mul8 => hz * 8,
            Pll1Mul::Mul9 => hz * 9,
            Pll1Mul::Mul6_5 => hz * 13 / 2,
        }
    }
}

/// Named-bit and named-field operations on the clock control registers.
///
/// This is the only surface the clock drivers touch the hardware through.
/// [`Rcc`] binds it to the memory-mapped registers; tests bind it to
/// in-memory fakes so the startup sequence can run without hardware.
pub trait ClockControl {
    /* HSE oscillator */
    fn enable_hse_clock(&self);
    fn enable_hse_clock_bypass(&self);
    fn disable_hse_clock(&self);
    fn is_enabled_hse_clock(&self) -> bool;
    /// Indicates whether the HSE oscillator is stable
    fn is_ready_hse_clock(&self) -> bool;

    /* PLL2 and the predivider cascade */
    fn set_prediv2(&self, prediv: PllPrediv);
    fn set_pll2_mul(&self, mul: Pll2Mul);
    fn set_prediv1(&self, prediv: PllPrediv);
    fn set_prediv1_source(&self, source: Prediv1Source);
    fn enable_pll2_clock(&self);
    fn disable_pll2_clock(&self);
    fn is_enabled_pll2_clock(&self) -> bool;
    /// The PLL2 clock is locked when its output signal is stable
    fn is_locked_pll2_clock(&self) -> bool;

    /* Main PLL (PLL1) */
    fn set_pll1_mul(&self, mul: Pll1Mul);
    fn set_pll_source(&self, source: PllSource);
    fn enable_pll1_clock(&self);
    fn disable_pll1_clock(&self);
    fn is_enabled_pll1_clock(&self) -> bool;
    fn is_locked_pll1_clock(&self) -> bool;

    /* Bus prescalers and the system clock switch */
    fn set_apb1_prescaler(&self, prescaler: APBPrescaler);
    /// Request a new system clock source (writes the `SW` field).
    ///
    /// The source must be enabled and, when raising the frequency, the flash
    /// latency must already be configured.
    fn set_sys_clock_source(&self, source: SysClockSource);
    /// The system clock source currently in effect (reads the `SWS` status
    /// field, not the `SW` request field).
    fn get_sys_clock_source(&self) -> SysClockSource;
}

pub struct Rcc {
    registers: StaticRef<RccRegisters>,
}

impl Rcc {
    pub fn new() -> Self {
        Self {
            registers: RCC_BASE,
        }
    }
}

impl ClockControl for Rcc {
    fn enable_hse_clock(&self) {
        self.registers.cr.modify(CR::HSEON::SET);
    }

    fn enable_hse_clock_bypass(&self) {
        self.registers.cr.modify(CR::HSEBYP::SET);
    }

    fn disable_hse_clock(&self) {
        self.registers.cr.modify(CR::HSEON::CLEAR);
        self.registers.cr.modify(CR::HSEBYP::CLEAR);
    }

    fn is_enabled_hse_clock(&self) -> bool {
        self.registers.cr.is_set(CR::HSEON)
    }

    fn is_ready_hse_clock(&self) -> bool {
        self.registers.cr.is_set(CR::HSERDY)
    }

    fn set_prediv2(&self, prediv: PllPrediv) {
        self.registers.cfgr2.modify(CFGR2::PREDIV2.val(prediv as u32));
    }

    fn set_pll2_mul(&self, mul: Pll2Mul) {
        self.registers.cfgr2.modify(CFGR2::PLL2MUL.val(mul as u32));
    }

    fn set_prediv1(&self, prediv: PllPrediv) {
        self.registers.cfgr2.modify(CFGR2::PREDIV1.val(prediv as u32));
    }

    fn set_prediv1_source(&self, source: Prediv1Source) {
        self.registers
            .cfgr2
            .modify(CFGR2::PREDIV1SRC.val(source as u32));
    }

    fn enable_pll2_clock(&self) {
        self.registers.cr.modify(CR::PLL2ON::SET);
    }

    // The PLL2 clock must not feed the main PLL when disabled
    fn disable_pll2_clock(&self) {
        self.registers.cr.modify(CR::PLL2ON::CLEAR);
    }

    fn is_enabled_pll2_clock(&self) -> bool {
        self.registers.cr.is_set(CR::PLL2ON)
    }

    fn is_locked_pll2_clock(&self) -> bool {
        self.registers.cr.is_set(CR::PLL2RDY)
    }

    // This method must be called only while the main PLL is disabled
    fn set_pll1_mul(&self, mul: Pll1Mul) {
        self.registers.cfgr.modify(CFGR::PLLMUL.val(mul as u32));
    }

    // This method must be called only while the main PLL is disabled
    fn set_pll_source(&self, source: PllSource) {
        self.registers.cfgr.modify(CFGR::PLLSRC.val(source as u32));
    }

    fn enable_pll1_clock(&self) {
        self.registers.cr.modify(CR::PLLON::SET);
    }

    // The main PLL must not be configured as the system clock when disabled
    fn disable_pll1_clock(&self) {
        self.registers.cr.modify(CR::PLLON::CLEAR);
    }

    fn is_enabled_pll1_clock(&self) -> bool {
        self.registers.cr.is_set(CR::PLLON)
    }

    fn is_locked_pll1_clock(&self) -> bool {
        self.registers.cr.is_set(CR::PLLRDY)
    }

    fn set_apb1_prescaler(&self, prescaler: APBPrescaler) {
        self.registers.cfgr.modify(CFGR::PPRE1.val(prescaler as u32));
    }

    fn set_sys_clock_source(&self, source: SysClockSource) {
        self.registers.cfgr.modify(CFGR::SW.val(source as u32));
    }

    fn get_sys_clock_source(&self) -> SysClockSource {
        match self.registers.cfgr.read(CFGR::SWS) {
            0b00 => SysClockSource::HSI,
            0b01 => SysClockSource::HSE,
            _ => SysClockSource::PLL,
        }
    }
}

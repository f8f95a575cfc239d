// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Embedded flash memory controller of the STM32F105/F107.
//!
//! The only concern of this driver is the access latency of the flash in
//! `ACR`. The number of wait states must match the system clock frequency
//! and, when the frequency goes up, must be raised before the clock switch
//! happens. [`FlashControl`] is the port the clock sequencer uses for that.

use tock_registers::interfaces::{ReadWriteable, Readable};
use tock_registers::register_bitfields;
use tock_registers::register_structs;
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};

use crate::errorcode::ErrorCode;
use crate::utilities::StaticRef;

register_structs! {
    FlashRegisters {
        /// Flash access control register
        (0x00 => acr: ReadWrite<u32, ACR::Register>),
        /// Flash key register
        (0x04 => keyr: WriteOnly<u32>),
        /// Flash option key register
        (0x08 => optkeyr: WriteOnly<u32>),
        /// Flash status register
        (0x0C => sr: ReadWrite<u32>),
        /// Flash control register
        (0x10 => cr: ReadWrite<u32>),
        /// Flash address register
        (0x14 => ar: WriteOnly<u32>),
        (0x18 => _reserved0),
        /// Option byte register
        (0x1C => obr: ReadOnly<u32>),
        /// Write protection register
        (0x20 => wrpr: ReadOnly<u32>),
        (0x24 => @END),
    }
}

register_bitfields![u32,
    ACR [
        /// Prefetch buffer status
        PRFTBS OFFSET(5) NUMBITS(1) [],
        /// Prefetch buffer enable
        PRFTBE OFFSET(4) NUMBITS(1) [],
        /// Flash half cycle access enable
        HLFCYA OFFSET(3) NUMBITS(1) [],
        /// Latency
        LATENCY OFFSET(0) NUMBITS(3) []
    ]
];

const FLASH_BASE: StaticRef<FlashRegisters> =
    unsafe { StaticRef::new(0x40022000 as *const FlashRegisters) };

/// Number of flash wait states (`ACR.LATENCY` encoding).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum FlashLatency {
    /// Zero wait states, system clock below 24MHz
    Latency0 = 0b000,
    /// One wait state, system clock from 24MHz up to 48MHz
    Latency1 = 0b001,
    /// Two wait states, system clock of 48MHz and above
    Latency2 = 0b010,
}

impl FlashLatency {
    /// The lowest latency that is safe for the given system clock frequency.
    pub fn for_sys_clock_frequency(frequency_hz: u32) -> Self {
        if frequency_hz < 24_000_000 {
            FlashLatency::Latency0
        } else if frequency_hz < 48_000_000 {
            FlashLatency::Latency1
        } else {
            FlashLatency::Latency2
        }
    }

    /// The number of wait states this latency inserts.
    pub fn wait_states(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for FlashLatency {
    type Error = ErrorCode;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0b000 => Ok(FlashLatency::Latency0),
            0b001 => Ok(FlashLatency::Latency1),
            0b010 => Ok(FlashLatency::Latency2),
            _ => Err(ErrorCode::FAIL),
        }
    }
}

/// Flash operations the clock sequencer depends on.
pub trait FlashControl {
    /// Configure the flash latency for a system clock frequency.
    ///
    /// # Errors
    ///
    /// + [`Err`]\([`ErrorCode::BUSY`]\): the latency write did not take
    ///   effect.
    fn set_latency(&self, sys_clock_frequency_hz: u32) -> Result<(), ErrorCode>;

    /// The latency currently configured in the hardware.
    fn get_latency(&self) -> FlashLatency;
}

pub struct Flash {
    registers: StaticRef<FlashRegisters>,
}

impl Flash {
    pub fn new() -> Self {
        Self {
            registers: FLASH_BASE,
        }
    }

    /// Enable the prefetch buffer. It keeps the fetch bandwidth up once
    /// wait states are inserted.
    pub fn enable_prefetch(&self) {
        self.registers.acr.modify(ACR::PRFTBE::SET);
    }
}

impl FlashControl for Flash {
    fn set_latency(&self, sys_clock_frequency_hz: u32) -> Result<(), ErrorCode> {
        let latency = FlashLatency::for_sys_clock_frequency(sys_clock_frequency_hz);
        self.registers.acr.modify(ACR::LATENCY.val(latency as u32));

        // The latency write is buffered. Reading it back a bounded number
        // of times confirms it took effect.
        for _ in 0..16 {
            if self.get_latency() == latency {
                return Ok(());
            }
        }

        Err(ErrorCode::BUSY)
    }

    fn get_latency(&self) -> FlashLatency {
        match FlashLatency::try_from(self.registers.acr.read(ACR::LATENCY)) {
            Ok(latency) => latency,
            // Reserved encodings never occur on this hardware
            Err(_) => FlashLatency::Latency2,
        }
    }
}

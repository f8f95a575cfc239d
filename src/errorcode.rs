// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Standard error enum for invoking operations

/// Standard errors for driver operations.
///
/// Fallible operations return `Result<_, ErrorCode>`; there are no success
/// cases in this enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(usize)]
pub enum ErrorCode {
    /// Generic failure condition
    FAIL = 0,
    /// Underlying system is busy; retry
    BUSY = 1,
    /// The state requested is already set
    ALREADY = 2,
    /// The component is powered down
    OFF = 3,
    /// An invalid parameter was passed
    INVAL = 4,
    /// Parameter passed was too large
    SIZE = 5,
}

impl From<ErrorCode> for usize {
    fn from(err: ErrorCode) -> usize {
        err as usize
    }
}

// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Shared helper types for the peripheral drivers.

pub mod cells;

mod static_ref;
pub use self::static_ref::StaticRef;

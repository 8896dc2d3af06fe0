// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Concrete recognition engines.

pub mod command;

#[cfg(feature = "ocr")]
pub mod ocrs;

pub use command::CommandBackend;

#[cfg(feature = "ocr")]
pub use self::ocrs::OcrsBackend;

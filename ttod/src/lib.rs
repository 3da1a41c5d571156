// Copyright (C) 2019-2020  Pierre Krieger
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Tolerant Time-of-Day: a chain of wall-clock strategies of decreasing quality, each one
//! resilient to the local failure modes of its own clock source, with transparent fallback to
//! `gettimeofday` when every strategy has demoted itself out.
//!
//! The chain, in the order it is tried:
//!
//! - [`tsc::TscStrategy`] — CPU time-stamp counter, calibrated against a monotonic reference.
//! - [`mach::MachStrategy`] — `mach_absolute_time`, macOS only.
//! - [`hpet::HpetStrategy`] — High Precision Event Timer, gated on device presence.
//! - [`hrt::HrtStrategy`] — generic high-resolution monotonic clock, always available.
//! - [`upt::UptStrategy`] — millisecond-granularity fallback.
//!
//! [`dispatcher::Dispatcher`] owns the chain and [`dispatcher::Dispatcher::sample_micros`] is the
//! single entry point callers need.

pub mod dispatcher;
pub mod error;
pub mod hpet;
pub mod hrt;
pub mod mach;
pub mod sample;
pub mod strategy;
pub mod suppressed;
pub mod tsc;
pub mod upt;

pub use dispatcher::Dispatcher;
pub use error::TtodError;
pub use strategy::{TtodOutcome, TtodStrategy};

// Copyright (C) 2019  Pierre Krieger
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
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Platform primitives shared by every timing strategy: word-sized atomics, CPU feature
//! detection, and raw TSC/MSR access.

pub mod atomic;
pub mod features;
pub mod tsc;

pub use atomic::{Atomic128, Atomic64, CachePadded};
pub use features::CpuFeatures;

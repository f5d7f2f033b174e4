/*
 * This file is part of quietfan.
 *
 * Copyright (C) 2025 quietfan contributors
 *
 * quietfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * quietfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with quietfan. If not, see <https://www.gnu.org/licenses/>.
 */

//! quietfan - closed-loop fan control for Linux
//!
//! Facade over the workspace crates. The control engine, hardware drivers
//! and configuration live in `qf_core`; the daemon binary is `quietfand`
//! in `qf-daemon`.

pub use qf_core::*;

pub use qf_error as error;
pub use qf_protocol as protocol;

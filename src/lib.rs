// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Chains of sound processors and the shared resources they draw from: mixer
//! strips, MIDI router inputs, MIDI channels and engine instances.
//!
//! [ChainManager] owns every chain and processor. External systems (the
//! connection graph, the MIDI router, the mixer, engine processes and the user
//! interface's busy indicator) are reached through traits, each with a `mock`
//! implementation.

pub mod busy;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod manager;
pub mod mixer;
pub mod processor;
pub mod router;
pub mod state;
#[cfg(test)]
mod test;

pub use chain::{Chain, ChainType, MAIN_CHAIN_ID};
pub use config::Settings;
pub use error::{Error, ResourceKind};
pub use manager::{ChainManager, ChainOptions, ProcessorOptions};
pub use processor::{ChainId, ProcId};

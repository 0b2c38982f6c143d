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
use std::fmt;

use crate::config::error::ConfigError;

/// The fixed-size pools a chain draws its resources from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    MixerChannel,
    MidiChannel,
    RouterInput,
    ProcessorId,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::MixerChannel => "mixer channel",
            ResourceKind::MidiChannel => "MIDI channel",
            ResourceKind::RouterInput => "router input",
            ResourceKind::ProcessorId => "processor id",
        };
        f.write_str(name)
    }
}

/// Errors raised by chain and chain manager operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("no free {kind} available")]
    ResourceExhausted { kind: ResourceKind },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("unable to start engine {code}: {reason}")]
    EngineStartFailed { code: String, reason: String },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("state error: {0}")]
    State(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn exhausted(kind: ResourceKind) -> Error {
        Error::ResourceExhausted { kind }
    }
}

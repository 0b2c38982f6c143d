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

use serde::{Deserialize, Serialize};

pub mod mock;

/// Number of entries in a router input's CC pass-through bitmap.
pub const CC_ROUTE_LEN: usize = 128;

/// Serialized value of the "all channels" sentinel.
const ALL_CHANNELS: u8 = 16;

/// A per-input CC pass-through bitmap. Non-zero entries are forwarded.
pub type CcRoute = [u8; CC_ROUTE_LEN];

/// The MIDI channel a chain listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MidiChannel {
    /// A single channel, 0..15.
    Chan(u8),
    /// Every channel.
    All,
}

impl MidiChannel {
    /// Returns true if an event on `chan` reaches a listener on this channel.
    pub fn matches(&self, chan: u8) -> bool {
        match self {
            MidiChannel::Chan(c) => *c == chan,
            MidiChannel::All => true,
        }
    }
}

impl TryFrom<u8> for MidiChannel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=15 => Ok(MidiChannel::Chan(value)),
            ALL_CHANNELS => Ok(MidiChannel::All),
            _ => Err(format!("{} is not a MIDI channel", value)),
        }
    }
}

impl From<MidiChannel> for u8 {
    fn from(value: MidiChannel) -> Self {
        match value {
            MidiChannel::Chan(c) => c,
            MidiChannel::All => ALL_CHANNELS,
        }
    }
}

impl fmt::Display for MidiChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiChannel::Chan(c) => write!(f, "{}", c + 1),
            MidiChannel::All => f.write_str("all"),
        }
    }
}

/// The MIDI router binding. Each router input ("zmop") filters the merged input
/// stream down to what one chain should receive.
pub trait MidiRouter: Send + Sync {
    /// Removes all channel filters from the input.
    fn reset_midi_chans(&self, zmop: u8);

    /// Lets the given channel through the input.
    fn set_midi_chan(&self, zmop: u8, chan: u8);

    /// Lets every channel through the input.
    fn set_midi_chan_all(&self, zmop: u8);

    /// Restores the default CC pass-through bitmap.
    fn reset_cc_route(&self, zmop: u8);

    /// Returns the CC pass-through bitmap.
    fn get_cc_route(&self, zmop: u8) -> CcRoute;

    /// Replaces the CC pass-through bitmap.
    fn set_cc_route(&self, zmop: u8, route: &CcRoute);

    /// Drops raw program changes on the input.
    fn set_flag_drop_pc(&self, zmop: u8, drop: bool);

    /// Drops raw CCs on the input.
    fn set_flag_drop_cc(&self, zmop: u8, drop: bool);

    /// Enables or disables receiving from a physical input device.
    fn set_route_from(&self, zmop: u8, input_device: u8, enabled: bool);

    /// Clears note range and transpose settings.
    fn reset_note_range_transpose(&self, zmop: u8);
}

/// Applies a chain's channel filter to its router input.
pub fn apply_midi_chan(router: &dyn MidiRouter, zmop: u8, midi_chan: Option<MidiChannel>) {
    router.reset_midi_chans(zmop);
    match midi_chan {
        Some(MidiChannel::Chan(chan)) => router.set_midi_chan(zmop, chan),
        Some(MidiChannel::All) => router.set_midi_chan_all(zmop),
        None => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_midi_channel_serde() {
        let chan: MidiChannel = serde_json::from_str("3").unwrap();
        assert_eq!(chan, MidiChannel::Chan(3));
        let all: MidiChannel = serde_json::from_str("16").unwrap();
        assert_eq!(all, MidiChannel::All);
        assert!(serde_json::from_str::<MidiChannel>("17").is_err());
        assert_eq!(serde_json::to_string(&MidiChannel::All).unwrap(), "16");
    }

    #[test]
    fn test_midi_channel_matches() {
        assert!(MidiChannel::All.matches(9));
        assert!(MidiChannel::Chan(9).matches(9));
        assert!(!MidiChannel::Chan(9).matches(0));
        assert_eq!(MidiChannel::Chan(0).to_string(), "1");
    }

    #[test]
    fn test_apply_midi_chan() {
        let router = mock::Router::new();
        apply_midi_chan(&router, 2, Some(MidiChannel::Chan(5)));
        assert_eq!(router.midi_chans(2), vec![5]);
        assert!(!router.all_chans(2));

        apply_midi_chan(&router, 2, Some(MidiChannel::All));
        assert!(router.midi_chans(2).is_empty());
        assert!(router.all_chans(2));

        apply_midi_chan(&router, 2, None);
        assert!(!router.all_chans(2));
    }
}

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
pub mod mock;

/// Mixer strips are indexed from zero.
pub type MixerChan = u8;

/// The mixer that owns the chains' fader strips.
pub trait Mixer: Send + Sync {
    /// Returns whether the strip is muted.
    fn get_mute(&self, chan: MixerChan) -> bool;

    /// Mutes or unmutes the strip, optionally notifying listeners.
    fn set_mute(&self, chan: MixerChan, mute: bool, notify: bool);

    /// Restores the strip to its defaults.
    fn reset(&self, chan: MixerChan);

    /// The number of strips, including the Main strip.
    fn max_channels(&self) -> usize;
}

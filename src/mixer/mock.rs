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
use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;

use super::MixerChan;

/// A mock mixer. Tracks mutes and resets per strip.
pub struct Mixer {
    channels: usize,
    muted: Mutex<BTreeSet<MixerChan>>,
    resets: Mutex<HashMap<MixerChan, usize>>,
}

impl Mixer {
    pub fn new(channels: usize) -> Mixer {
        Mixer {
            channels,
            muted: Mutex::new(BTreeSet::new()),
            resets: Mutex::new(HashMap::new()),
        }
    }

    /// The number of times the strip has been reset.
    pub fn reset_count(&self, chan: MixerChan) -> usize {
        self.resets.lock().get(&chan).copied().unwrap_or(0)
    }
}

impl super::Mixer for Mixer {
    fn get_mute(&self, chan: MixerChan) -> bool {
        self.muted.lock().contains(&chan)
    }

    fn set_mute(&self, chan: MixerChan, mute: bool, _notify: bool) {
        let mut muted = self.muted.lock();
        if mute {
            muted.insert(chan);
        } else {
            muted.remove(&chan);
        }
    }

    fn reset(&self, chan: MixerChan) {
        self.muted.lock().remove(&chan);
        *self.resets.lock().entry(chan).or_insert(0) += 1;
    }

    fn max_channels(&self) -> usize {
        self.channels
    }
}

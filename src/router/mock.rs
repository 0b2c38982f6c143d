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
use tracing::debug;

use super::{CcRoute, CC_ROUTE_LEN};

/// The state of one mock router input.
#[derive(Clone)]
struct Input {
    midi_chans: BTreeSet<u8>,
    all_chans: bool,
    cc_route: CcRoute,
    drop_pc: bool,
    drop_cc: bool,
    routed_from: BTreeSet<u8>,
}

impl Default for Input {
    fn default() -> Self {
        Input {
            midi_chans: BTreeSet::new(),
            all_chans: false,
            cc_route: [1; CC_ROUTE_LEN],
            drop_pc: false,
            drop_cc: false,
            routed_from: BTreeSet::new(),
        }
    }
}

/// A mock router. Records the filters applied to each input.
#[derive(Default)]
pub struct Router {
    inputs: Mutex<HashMap<u8, Input>>,
}

impl Router {
    pub fn new() -> Router {
        Router::default()
    }

    fn with_input<R>(&self, zmop: u8, f: impl FnOnce(&mut Input) -> R) -> R {
        let mut inputs = self.inputs.lock();
        f(inputs.entry(zmop).or_default())
    }

    /// The single channels let through the input.
    pub fn midi_chans(&self, zmop: u8) -> Vec<u8> {
        self.with_input(zmop, |input| input.midi_chans.iter().copied().collect())
    }

    /// Whether the input lets every channel through.
    pub fn all_chans(&self, zmop: u8) -> bool {
        self.with_input(zmop, |input| input.all_chans)
    }

    /// Whether raw program changes are dropped.
    pub fn drop_pc(&self, zmop: u8) -> bool {
        self.with_input(zmop, |input| input.drop_pc)
    }

    /// Whether raw CCs are dropped.
    pub fn drop_cc(&self, zmop: u8) -> bool {
        self.with_input(zmop, |input| input.drop_cc)
    }

    /// The physical inputs the router input receives from.
    pub fn routed_from(&self, zmop: u8) -> Vec<u8> {
        self.with_input(zmop, |input| input.routed_from.iter().copied().collect())
    }
}

impl super::MidiRouter for Router {
    fn reset_midi_chans(&self, zmop: u8) {
        self.with_input(zmop, |input| {
            input.midi_chans.clear();
            input.all_chans = false;
        });
    }

    fn set_midi_chan(&self, zmop: u8, chan: u8) {
        self.with_input(zmop, |input| {
            input.midi_chans.insert(chan);
        });
    }

    fn set_midi_chan_all(&self, zmop: u8) {
        self.with_input(zmop, |input| input.all_chans = true);
    }

    fn reset_cc_route(&self, zmop: u8) {
        self.with_input(zmop, |input| input.cc_route = [1; CC_ROUTE_LEN]);
    }

    fn get_cc_route(&self, zmop: u8) -> CcRoute {
        self.with_input(zmop, |input| input.cc_route)
    }

    fn set_cc_route(&self, zmop: u8, route: &CcRoute) {
        self.with_input(zmop, |input| input.cc_route = *route);
    }

    fn set_flag_drop_pc(&self, zmop: u8, drop: bool) {
        self.with_input(zmop, |input| input.drop_pc = drop);
    }

    fn set_flag_drop_cc(&self, zmop: u8, drop: bool) {
        self.with_input(zmop, |input| input.drop_cc = drop);
    }

    fn set_route_from(&self, zmop: u8, input_device: u8, enabled: bool) {
        debug!(zmop, input_device, enabled, "Mock router route change.");
        self.with_input(zmop, |input| {
            if enabled {
                input.routed_from.insert(input_device);
            } else {
                input.routed_from.remove(&input_device);
            }
        });
    }

    fn reset_note_range_transpose(&self, _zmop: u8) {}
}

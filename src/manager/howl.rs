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

//! Howl-round detection: would routing one chain into another close a loop?

use std::collections::BTreeSet;

use crate::{chain::Chain, graph::PortRef, processor::ChainId};

use super::ChainManager;

impl ChainManager {
    /// Returns true if routing `src`'s audio into `dst` would feed back into `src`.
    pub fn will_audio_howl(&self, src: ChainId, dst: ChainId) -> bool {
        self.reaches(dst, src, Chain::audio_out)
    }

    /// Returns true if routing `src`'s MIDI into `dst` would feed back into `src`.
    pub fn will_midi_howl(&self, src: ChainId, dst: ChainId) -> bool {
        self.reaches(dst, src, Chain::midi_out)
    }

    /// Depth-first search along chain references in the given outputs.
    fn reaches(&self, from: ChainId, target: ChainId, outputs: fn(&Chain) -> &[PortRef]) -> bool {
        let mut visited = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(chain_id) = stack.pop() {
            if chain_id == target {
                return true;
            }
            if !visited.insert(chain_id) {
                continue;
            }
            if let Some(chain) = self.chains.get(&chain_id) {
                stack.extend(outputs(chain).iter().filter_map(PortRef::chain_id));
            }
        }
        false
    }

    /// Existing chain-to-chain routes that are part of a loop, as (source, destination).
    pub fn find_howls(&self, midi: bool) -> Vec<(ChainId, ChainId)> {
        let outputs: fn(&Chain) -> &[PortRef] = if midi {
            Chain::midi_out
        } else {
            Chain::audio_out
        };
        self.ordered_chain_ids
            .iter()
            .filter_map(|src| self.chains.get(src).map(|chain| (*src, chain)))
            .flat_map(|(src, chain)| {
                outputs(chain)
                    .iter()
                    .filter_map(PortRef::chain_id)
                    .map(move |dst| (src, dst))
            })
            .filter(|(src, dst)| self.reaches(*dst, *src, outputs))
            .collect()
    }
}

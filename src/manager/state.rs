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
use tracing::{error, info, span, warn, Level};

use crate::{
    busy::BusyGuard,
    chain::{Chain, MAIN_CHAIN_ID},
    error::Error,
    processor::ChainId,
    router::{CcRoute, CC_ROUTE_LEN},
    state::{ChainState, ManagerState},
};

use super::{ChainManager, ChainOptions, ProcessorOptions};

impl ChainManager {
    /// Every chain in display order.
    pub fn get_state(&self) -> ManagerState {
        let mut state = ManagerState::new();
        for chain_id in &self.ordered_chain_ids {
            if let Some(chain) = self.chains.get(chain_id) {
                state.push(*chain_id, chain.get_state(&self.processors));
            }
        }
        state
    }

    /// Replaces every chain with the saved ones. Running engines are kept for reuse
    /// unless their engine can't survive a reload.
    pub fn set_state(&mut self, state: &ManagerState) -> Result<(), Error> {
        let span = span!(Level::INFO, "set state");
        let _enter = span.enter();
        let busy = BusyGuard::new(self.busy.clone(), "set_state", "Restoring chains");

        let chain_ids = self.ordered_chain_ids.clone();
        for chain_id in chain_ids {
            self.teardown_chain(chain_id);
        }
        self.dispatcher.clear();
        self.evict_non_reusable_engines();

        for (chain_id, chain_state) in state.iter() {
            busy.detail(&format!("Chain {}", chain_id));
            self.restore_chain(*chain_id, chain_state)?;
        }

        let mut order: Vec<ChainId> = state
            .iter()
            .map(|(chain_id, _)| *chain_id)
            .filter(|chain_id| self.chains.contains_key(chain_id))
            .collect();
        if !order.contains(&MAIN_CHAIN_ID) {
            order.push(MAIN_CHAIN_ID);
        }
        self.ordered_chain_ids = order;

        self.stop_unused_engines();
        self.reselect_active_chain(None);
        self.refresh_midi_index();
        self.rebuild_all();
        self.request_reconnect(false);
        info!(chains = self.chains.len(), processors = self.processors.len(), "Restored state.");
        Ok(())
    }

    /// Stops engine instances that must not be reused across a reload.
    fn evict_non_reusable_engines(&mut self) {
        let evict: Vec<String> = self
            .engines
            .values()
            .filter(|engine| {
                engine.is_unused()
                    && self
                        .catalog
                        .get(engine.code())
                        .is_some_and(|info| !info.reuse_on_reload)
            })
            .map(|engine| engine.key().to_string())
            .collect();
        for key in evict {
            self.launcher.stop(&key);
            self.engines.remove(&key);
            info!(key, "Evicted engine before reload.");
        }
    }

    fn restore_chain(&mut self, chain_id: ChainId, chain_state: &ChainState) -> Result<(), Error> {
        if chain_id == MAIN_CHAIN_ID {
            let main = self.chain_mut(chain_id)?;
            main.set_title(chain_state.title.clone());
            if chain_state.midi_chan.is_some() {
                self.set_chain_midi_chan(chain_id, chain_state.midi_chan)?;
            }
        } else {
            self.add_chain(ChainOptions {
                chain_id: Some(chain_id),
                midi_chan: chain_state.midi_chan,
                midi_thru: chain_state.midi_thru,
                audio_thru: chain_state.audio_thru,
                mixer_chan: chain_state.mixer_chan,
                title: chain_state.title.clone(),
                position: None,
                fast_refresh: true,
            })?;
        }

        let main = chain_id == MAIN_CHAIN_ID;
        let chain = self.chain_mut(chain_id)?;
        chain.set_audio_in(
            chain_state
                .audio_in
                .clone()
                .unwrap_or_else(|| Chain::default_audio_in(main)),
        );
        chain.set_audio_out(
            chain_state
                .audio_out
                .clone()
                .unwrap_or_else(|| Chain::default_audio_out(main)),
        );
        chain.set_midi_out(chain_state.midi_out.clone().unwrap_or_default());

        // Slots are appended in order. The first entry restored from a saved slot
        // opens a new slot and the rest join it in parallel.
        for slot in &chain_state.slots {
            let mut opened = false;
            for (proc_id, engine_code) in slot.iter() {
                let options = ProcessorOptions {
                    parallel: opened,
                    slot: None,
                    proc_id: Some(*proc_id),
                    post_fader: true,
                    fast_refresh: true,
                };
                match self.add_processor(chain_id, engine_code, options) {
                    Ok(_) => opened = true,
                    Err(err) => error!(
                        chain = chain_id,
                        processor = proc_id,
                        engine = engine_code,
                        err = %err,
                        "Unable to restore processor."
                    ),
                }
            }
        }

        let zmop = self.chain_ref(chain_id)?.zmop();
        if let (Some(route), Some(zmop)) = (&chain_state.cc_route, zmop) {
            match CcRoute::try_from(route.as_slice()) {
                Ok(route) => self.router.set_cc_route(zmop, &route),
                Err(_) => warn!(
                    chain = chain_id,
                    len = route.len(),
                    expected = CC_ROUTE_LEN,
                    "Ignoring malformed CC route."
                ),
            }
        }
        self.chain_mut(chain_id)?.set_fader_pos(chain_state.fader_pos);
        Ok(())
    }
}

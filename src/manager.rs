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

//! The chain manager owns every chain, processor and engine instance, hands out
//! the shared resource pools and keeps the routing tables up to date.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use tracing::{debug, error, info, span, warn, Level};

use crate::{
    busy::{BusyGuard, BusyReporter},
    chain::{Chain, MAIN_CHAIN_ID},
    config::Settings,
    engine::{Engine, EngineCatalog, EngineInfo, EngineLauncher, Instancing},
    error::{Error, ResourceKind},
    graph::{ChainPorts, ConnectionGraph, PortRef, RouteContext},
    mixer::{Mixer, MixerChan},
    processor::{Capabilities, ChainId, Control, ProcId, Processor, ProcessorTable},
    router::{self, MidiChannel, MidiRouter},
    state::LearnedBinding,
};

use self::midi::CcDispatcher;

mod howl;
pub mod midi;
mod state;

/// Number of MIDI channels a chain can listen on.
const MIDI_CHANNELS: usize = 16;

/// Options for [ChainManager::add_chain].
#[derive(Debug, Clone, Default)]
pub struct ChainOptions {
    /// The chain id. The smallest free id is used if not given.
    pub chain_id: Option<ChainId>,
    pub midi_chan: Option<MidiChannel>,
    pub midi_thru: bool,
    pub audio_thru: bool,
    /// The mixer strip. Allocated automatically for audio pass-through chains.
    pub mixer_chan: Option<MixerChan>,
    pub title: Option<String>,
    /// Display position. Defaults to just before the Main chain.
    pub position: Option<usize>,
    pub fast_refresh: bool,
}

/// Options for [ChainManager::add_processor].
#[derive(Debug, Clone, Default)]
pub struct ProcessorOptions {
    /// Join an existing slot instead of creating a new one.
    pub parallel: bool,
    pub slot: Option<usize>,
    /// The processor id. The smallest free id is used if not given.
    pub proc_id: Option<ProcId>,
    pub post_fader: bool,
    pub fast_refresh: bool,
}

/// Manages the chains of the workstation.
pub struct ChainManager {
    settings: Settings,
    catalog: EngineCatalog,

    chains: BTreeMap<ChainId, Chain>,
    /// Display order.
    ordered_chain_ids: Vec<ChainId>,
    processors: ProcessorTable,
    engines: BTreeMap<String, Engine>,
    /// Disambiguates per-processor engine instance keys.
    engine_counter: u32,
    /// MIDI channel (16 for all channels) -> listening chains, in display order.
    midi_chan_2_chain_ids: BTreeMap<u8, Vec<ChainId>>,

    dispatcher: CcDispatcher,

    graph: Arc<dyn ConnectionGraph>,
    router: Arc<dyn MidiRouter>,
    mixer: Arc<dyn Mixer>,
    busy: Arc<dyn BusyReporter>,
    launcher: Arc<dyn EngineLauncher>,
}

impl ChainManager {
    /// Creates a manager holding only the Main chain.
    pub fn new(
        settings: Settings,
        graph: Arc<dyn ConnectionGraph>,
        router: Arc<dyn MidiRouter>,
        mixer: Arc<dyn Mixer>,
        busy: Arc<dyn BusyReporter>,
        launcher: Arc<dyn EngineLauncher>,
    ) -> ChainManager {
        let catalog = EngineCatalog::new(settings.engines());
        let dispatcher = CcDispatcher::new(&settings);
        let mut manager = ChainManager {
            settings,
            catalog,
            chains: BTreeMap::new(),
            ordered_chain_ids: Vec::new(),
            processors: ProcessorTable::new(),
            engines: BTreeMap::new(),
            engine_counter: 0,
            midi_chan_2_chain_ids: BTreeMap::new(),
            dispatcher,
            graph,
            router,
            mixer,
            busy,
            launcher,
        };
        manager.create_main_chain();
        manager.dispatcher.set_active_chain(Some(MAIN_CHAIN_ID));
        manager
    }

    fn create_main_chain(&mut self) {
        let mut main = Chain::new(
            MAIN_CHAIN_ID,
            None,
            false,
            true,
            self.graph.clone(),
            self.router.clone(),
        );
        main.set_mixer_chan(Some(self.main_mixer_chan()));
        self.chains.insert(MAIN_CHAIN_ID, main);
        self.ordered_chain_ids.push(MAIN_CHAIN_ID);
        self.rebuild_chain(MAIN_CHAIN_ID);
    }

    /// The Main chain always owns the last mixer strip.
    fn main_mixer_chan(&self) -> MixerChan {
        let last = self.mixer.max_channels().saturating_sub(1);
        MixerChan::try_from(last).unwrap_or(MixerChan::MAX)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &EngineCatalog {
        &self.catalog
    }

    /// Rebuilds the engine catalog from the built-ins and the settings.
    pub fn refresh_catalog(&mut self) {
        self.catalog.refresh(self.settings.engines());
    }

    /// A handle for dispatching CC events from the MIDI input context.
    pub fn dispatcher(&self) -> CcDispatcher {
        self.dispatcher.clone()
    }

    pub fn chain(&self, chain_id: ChainId) -> Option<&Chain> {
        self.chains.get(&chain_id)
    }

    /// Chain ids in display order.
    pub fn chain_ids(&self) -> &[ChainId] {
        &self.ordered_chain_ids
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    pub fn processor(&self, proc_id: ProcId) -> Option<&Processor> {
        self.processors.get(&proc_id)
    }

    pub fn processor_mut(&mut self, proc_id: ProcId) -> Option<&mut Processor> {
        self.processors.get_mut(&proc_id)
    }

    pub fn processors(&self) -> &ProcessorTable {
        &self.processors
    }

    pub fn engine(&self, key: &str) -> Option<&Engine> {
        self.engines.get(key)
    }

    pub fn engines(&self) -> impl Iterator<Item = &Engine> {
        self.engines.values()
    }

    /// The chains listening on a MIDI channel, including those listening on all channels.
    pub fn chains_on_channel(&self, chan: u8) -> Vec<ChainId> {
        let all = u8::from(MidiChannel::All);
        [chan, all]
            .iter()
            .filter_map(|key| self.midi_chan_2_chain_ids.get(key))
            .flatten()
            .copied()
            .collect()
    }

    fn chain_mut(&mut self, chain_id: ChainId) -> Result<&mut Chain, Error> {
        self.chains
            .get_mut(&chain_id)
            .ok_or_else(|| Error::NotFound(format!("chain {}", chain_id)))
    }

    fn chain_ref(&self, chain_id: ChainId) -> Result<&Chain, Error> {
        self.chains
            .get(&chain_id)
            .ok_or_else(|| Error::NotFound(format!("chain {}", chain_id)))
    }

    fn next_free_chain_id(&self) -> Result<ChainId, Error> {
        (1..=ChainId::MAX)
            .find(|id| !self.chains.contains_key(id))
            .ok_or_else(|| Error::InvalidOperation("no free chain id".to_string()))
    }

    fn next_free_proc_id(&self) -> Result<ProcId, Error> {
        (1..=ProcId::MAX)
            .find(|id| !self.processors.contains_key(id))
            .ok_or_else(|| Error::exhausted(ResourceKind::ProcessorId))
    }

    /// Adds a chain and returns its id. If the chain already exists only its
    /// pass-through flags are updated.
    pub fn add_chain(&mut self, options: ChainOptions) -> Result<ChainId, Error> {
        let span = span!(Level::INFO, "add chain");
        let _enter = span.enter();
        let _busy = BusyGuard::new(self.busy.clone(), "add_chain", "Adding chain");

        let chain_id = match options.chain_id {
            Some(chain_id) => chain_id,
            None => self.next_free_chain_id()?,
        };

        if let Some(chain) = self.chains.get_mut(&chain_id) {
            chain.set_audio_thru(options.audio_thru);
            chain.set_midi_thru(options.midi_thru);
            debug!(chain = chain_id, "Chain exists, updated pass-through.");
            self.rebuild_chain(chain_id);
            self.request_reconnect(options.fast_refresh);
            return Ok(chain_id);
        }

        if chain_id == MAIN_CHAIN_ID {
            self.create_main_chain();
            self.request_reconnect(options.fast_refresh);
            return Ok(chain_id);
        }

        let mixer_chan = match options.mixer_chan {
            Some(mixer_chan) => {
                self.check_mixer_chan(mixer_chan)?;
                Some(mixer_chan)
            }
            None if options.audio_thru => Some(self.get_next_free_mixer_chan(0)?),
            None => None,
        };
        let zmop = match options.midi_chan {
            Some(_) => Some(self.get_next_free_zmop_index(0)?),
            None => None,
        };

        let mut chain = Chain::new(
            chain_id,
            options.midi_chan,
            options.midi_thru,
            options.audio_thru,
            self.graph.clone(),
            self.router.clone(),
        );
        chain.set_title(options.title);
        chain.set_mixer_chan(mixer_chan);
        if let Some(zmop) = zmop {
            self.setup_router_input(&mut chain, zmop);
        }
        self.chains.insert(chain_id, chain);

        let position = match options.position {
            Some(position) => position.min(self.ordered_chain_ids.len()),
            None => self
                .ordered_chain_ids
                .iter()
                .position(|id| *id == MAIN_CHAIN_ID)
                .unwrap_or(self.ordered_chain_ids.len()),
        };
        self.ordered_chain_ids.insert(position, chain_id);

        self.refresh_midi_index();
        self.rebuild_chain(chain_id);
        self.request_reconnect(options.fast_refresh);
        info!(chain = chain_id, ?mixer_chan, ?zmop, "Added chain.");
        Ok(chain_id)
    }

    /// An explicit mixer strip must exist and must not belong to another chain.
    fn check_mixer_chan(&self, mixer_chan: MixerChan) -> Result<(), Error> {
        if usize::from(mixer_chan) >= self.mixer.max_channels() {
            return Err(Error::InvalidOperation(format!(
                "mixer strip {} doesn't exist",
                mixer_chan
            )));
        }
        if self
            .chains
            .values()
            .any(|chain| chain.mixer_chan() == Some(mixer_chan))
        {
            return Err(Error::InvalidOperation(format!(
                "mixer strip {} is in use",
                mixer_chan
            )));
        }
        Ok(())
    }

    /// Gives a chain its router input and the default filters: its own channel and
    /// every input device apart from excluded drivers.
    fn setup_router_input(&self, chain: &mut Chain, zmop: u8) {
        chain.set_zmop(Some(zmop));
        router::apply_midi_chan(self.router.as_ref(), zmop, chain.midi_chan());
        self.router.reset_cc_route(zmop);
        self.router.reset_note_range_transpose(zmop);
        for (index, input) in self.settings.midi_inputs().iter().enumerate() {
            let Ok(index) = u8::try_from(index) else {
                break;
            };
            chain.set_midi_in_device(index, self.settings.routes_input_by_default(input));
        }
    }

    /// Returns a router input to its idle state.
    fn release_router_input(&self, zmop: u8) {
        self.router.reset_midi_chans(zmop);
        self.router.reset_cc_route(zmop);
        self.router.set_flag_drop_pc(zmop, false);
        self.router.set_flag_drop_cc(zmop, false);
        for index in 0..self.settings.midi_inputs().len() {
            if let Ok(index) = u8::try_from(index) {
                self.router.set_route_from(zmop, index, false);
            }
        }
    }

    /// Chains whose engines can only host one instance share their fate: removing
    /// any of them removes all of them.
    fn removal_group(&self, chain_id: ChainId) -> Vec<ChainId> {
        let mut group = vec![chain_id];
        let mut codes = BTreeSet::new();
        let mut index = 0;
        while index < group.len() {
            if let Some(chain) = self.chains.get(&group[index]) {
                for proc_id in chain.get_processors(None, None) {
                    let Some(processor) = self.processors.get(&proc_id) else {
                        continue;
                    };
                    let single = self
                        .catalog
                        .get(processor.engine_code())
                        .is_some_and(|info| info.instancing == Instancing::SingleInstance);
                    if single && codes.insert(processor.engine_code().to_string()) {
                        for other in self.chains_hosting(processor.engine_code()) {
                            if !group.contains(&other) {
                                group.push(other);
                            }
                        }
                    }
                }
            }
            index += 1;
        }
        group
    }

    fn chains_hosting(&self, engine_code: &str) -> Vec<ChainId> {
        self.processors
            .values()
            .filter(|processor| processor.engine_code() == engine_code)
            .filter_map(|processor| processor.chain_id())
            .collect()
    }

    /// Removes a chain. The Main chain is reset instead of deleted.
    pub fn remove_chain(
        &mut self,
        chain_id: ChainId,
        stop_engines: bool,
        fast_refresh: bool,
    ) -> Result<(), Error> {
        let span = span!(Level::INFO, "remove chain");
        let _enter = span.enter();
        let _busy = BusyGuard::new(self.busy.clone(), "remove_chain", "Removing chain");
        self.chain_ref(chain_id)?;

        let previous_position = self.active_position();
        let group = self.removal_group(chain_id);
        if group.len() > 1 {
            info!(chain = chain_id, ?group, "Removing chains sharing a single-instance engine.");
        }
        for id in &group {
            self.teardown_chain(*id);
        }

        if stop_engines {
            self.stop_unused_engines();
        }
        self.reselect_active_chain(previous_position);
        self.refresh_midi_index();
        self.rebuild_all();
        self.request_reconnect(fast_refresh);
        Ok(())
    }

    /// Detaches every processor of a chain and deletes it, or resets it for Main.
    fn teardown_chain(&mut self, chain_id: ChainId) {
        let Some(chain) = self.chains.get(&chain_id) else {
            return;
        };
        let mixer_chan = chain.mixer_chan();
        let processors = chain.get_processors(None, None);
        for ids in self.midi_chan_2_chain_ids.values_mut() {
            ids.retain(|id| *id != chain_id);
        }

        let was_muted = mixer_chan.map(|chan| {
            let muted = self.mixer.get_mute(chan);
            self.mixer.set_mute(chan, true, false);
            muted
        });
        for proc_id in processors {
            self.detach_processor(chain_id, proc_id);
        }

        if chain_id == MAIN_CHAIN_ID {
            if let Some(main) = self.chains.get_mut(&chain_id) {
                main.reset();
            }
            if let (Some(chan), Some(muted)) = (mixer_chan, was_muted) {
                self.mixer.set_mute(chan, muted, false);
            }
            debug!(chain = chain_id, "Reset Main chain.");
            return;
        }

        if let Some(chain) = self.chains.remove(&chain_id) {
            if let Some(zmop) = chain.zmop() {
                self.release_router_input(zmop);
            }
        }
        if let Some(chan) = mixer_chan {
            self.mixer.reset(chan);
        }
        self.ordered_chain_ids.retain(|id| *id != chain_id);
        info!(chain = chain_id, "Removed chain.");
    }

    /// Adds a processor to a chain and starts (or reuses) its engine. Nothing is
    /// left behind if any step fails.
    pub fn add_processor(
        &mut self,
        chain_id: ChainId,
        engine_code: &str,
        options: ProcessorOptions,
    ) -> Result<ProcId, Error> {
        let span = span!(Level::INFO, "add processor");
        let _enter = span.enter();
        let _busy = BusyGuard::new(self.busy.clone(), "add_processor", "Adding processor");

        let previous_mixer_chan = self.chain_ref(chain_id)?.mixer_chan();
        let info = self
            .catalog
            .get(engine_code)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("engine {}", engine_code)))?;
        let proc_id = match options.proc_id {
            Some(proc_id) if self.processors.contains_key(&proc_id) => {
                return Err(Error::InvalidOperation(format!(
                    "processor id {} is in use",
                    proc_id
                )));
            }
            Some(proc_id) => proc_id,
            None => self.next_free_proc_id()?,
        };

        let mut processor = Processor::new(proc_id, info.processor_type, &info.code, &info.name);
        for symbol in &info.controls {
            processor.add_control(symbol);
        }
        // Registered before the engine starts so the engine can find it.
        self.processors.insert(proc_id, processor);

        if let Err(err) = self.attach_processor(chain_id, proc_id, &info, &options) {
            error!(chain = chain_id, processor = proc_id, err = %err, "Unable to add processor.");
            self.detach_processor(chain_id, proc_id);
            if let Some(chain) = self.chains.get_mut(&chain_id) {
                chain.set_mixer_chan(previous_mixer_chan);
            }
            return Err(err);
        }

        self.refresh_midi_index();
        self.rebuild_chain(chain_id);
        self.request_reconnect(options.fast_refresh);
        info!(chain = chain_id, processor = proc_id, engine = info.code, "Added processor.");
        Ok(proc_id)
    }

    fn attach_processor(
        &mut self,
        chain_id: ChainId,
        proc_id: ProcId,
        info: &EngineInfo,
        options: &ProcessorOptions,
    ) -> Result<(), Error> {
        let needs_mixer = !info.processor_type.is_midi_only()
            && self.chain_ref(chain_id)?.mixer_chan().is_none();
        let mixer_chan = if needs_mixer {
            Some(self.get_next_free_mixer_chan(0)?)
        } else {
            None
        };

        let chain = self
            .chains
            .get_mut(&chain_id)
            .ok_or_else(|| Error::NotFound(format!("chain {}", chain_id)))?;
        let processor = self
            .processors
            .get_mut(&proc_id)
            .ok_or_else(|| Error::NotFound(format!("processor {}", proc_id)))?;
        if !chain.insert_processor(processor, options.parallel, options.slot, options.post_fader) {
            return Err(Error::InvalidOperation(format!(
                "unable to insert processor {} into chain {}",
                proc_id, chain_id
            )));
        }
        if mixer_chan.is_some() {
            chain.set_mixer_chan(mixer_chan);
        }

        self.start_engine(proc_id)?;
        Ok(())
    }

    /// Drops a processor from its chain, its engine and the processor table.
    fn detach_processor(&mut self, chain_id: ChainId, proc_id: ProcId) {
        self.dispatcher.unbind_processor(proc_id);
        if let (Some(chain), Some(processor)) =
            (self.chains.get_mut(&chain_id), self.processors.get_mut(&proc_id))
        {
            if chain.contains(proc_id) {
                chain.remove_processor(processor);
            }
        }
        if let Some(processor) = self.processors.remove(&proc_id) {
            if let Some(engine) = processor
                .engine_key()
                .and_then(|key| self.engines.get_mut(key))
            {
                engine.detach(proc_id);
            }
        }
    }

    /// Removes a processor. With `autoroute` every chain is rebuilt, since other
    /// chains may route through this one.
    pub fn remove_processor(
        &mut self,
        chain_id: ChainId,
        proc_id: ProcId,
        stop_engine: bool,
        autoroute: bool,
    ) -> Result<(), Error> {
        let span = span!(Level::INFO, "remove processor");
        let _enter = span.enter();
        let _busy = BusyGuard::new(self.busy.clone(), "remove_processor", "Removing processor");

        if !self.chain_ref(chain_id)?.contains(proc_id) {
            return Err(Error::NotFound(format!(
                "processor {} in chain {}",
                proc_id, chain_id
            )));
        }
        self.detach_processor(chain_id, proc_id);
        if stop_engine {
            self.stop_unused_engines();
        }
        self.refresh_midi_index();
        if autoroute {
            self.rebuild_all();
        } else {
            self.rebuild_chain(chain_id);
        }
        self.request_reconnect(false);
        info!(chain = chain_id, processor = proc_id, "Removed processor.");
        Ok(())
    }

    /// Moves a processor one step within its chain. Returns false if it can't move
    /// any further.
    pub fn nudge_processor(
        &mut self,
        chain_id: ChainId,
        proc_id: ProcId,
        up: bool,
    ) -> Result<bool, Error> {
        let chain = self.chain_mut(chain_id)?;
        if !chain.contains(proc_id) {
            return Err(Error::NotFound(format!(
                "processor {} in chain {}",
                proc_id, chain_id
            )));
        }
        if !chain.nudge_processor(proc_id, up) {
            return Ok(false);
        }
        self.rebuild_chain(chain_id);
        self.request_reconnect(false);
        debug!(chain = chain_id, processor = proc_id, up, "Nudged processor.");
        Ok(true)
    }

    /// Exchanges the positions of two processors of the same type in a chain.
    pub fn swap_processors(
        &mut self,
        chain_id: ChainId,
        first: ProcId,
        second: ProcId,
    ) -> Result<(), Error> {
        if !self.chain_mut(chain_id)?.swap_processors(first, second) {
            return Err(Error::InvalidOperation(format!(
                "unable to swap processors {} and {} in chain {}",
                first, second, chain_id
            )));
        }
        self.rebuild_chain(chain_id);
        self.request_reconnect(false);
        debug!(chain = chain_id, first, second, "Swapped processors.");
        Ok(())
    }

    /// Attaches a processor to an engine instance, starting the instance if needed.
    /// Returns the instance key.
    pub fn start_engine(&mut self, proc_id: ProcId) -> Result<String, Error> {
        let processor = self
            .processors
            .get(&proc_id)
            .ok_or_else(|| Error::NotFound(format!("processor {}", proc_id)))?;
        let code = processor.engine_code().to_string();
        let info = self
            .catalog
            .get(&code)
            .ok_or_else(|| Error::NotFound(format!("engine {}", code)))?;

        let key = match info.instancing {
            Instancing::PerProcessor => {
                self.engine_counter += 1;
                format!("{}_{}", code, self.engine_counter)
            }
            Instancing::Shared | Instancing::SingleInstance => code.clone(),
        };
        if !self.engines.contains_key(&key) {
            self.launcher
                .start(&key, info)
                .map_err(|reason| Error::EngineStartFailed {
                    code: code.clone(),
                    reason,
                })?;
            self.engines.insert(key.clone(), Engine::new(&key, &code));
            info!(key, "Started engine.");
        } else {
            debug!(key, "Reusing engine.");
        }

        if let Some(engine) = self.engines.get_mut(&key) {
            engine.attach(proc_id);
        }
        if let Some(processor) = self.processors.get_mut(&proc_id) {
            processor.set_engine_key(Some(key.clone()));
        }
        Ok(key)
    }

    /// Stops every engine instance that hosts no processors. Returns the number stopped.
    pub fn stop_unused_engines(&mut self) -> usize {
        let unused: Vec<String> = self
            .engines
            .values()
            .filter(|engine| engine.is_unused())
            .map(|engine| engine.key().to_string())
            .collect();
        for key in &unused {
            self.launcher.stop(key);
            self.engines.remove(key);
            info!(key, "Stopped engine.");
        }
        unused.len()
    }

    /// Scans `size` pool entries starting at `hint`, wrapping once.
    fn next_free(size: usize, hint: usize, used: impl Fn(usize) -> bool) -> Option<usize> {
        if size == 0 {
            return None;
        }
        (0..size)
            .map(|offset| (hint + offset) % size)
            .find(|index| !used(*index))
    }

    /// The next mixer strip not used by any chain.
    pub fn get_next_free_mixer_chan(&self, hint: MixerChan) -> Result<MixerChan, Error> {
        let size = self.mixer.max_channels();
        Self::next_free(size, usize::from(hint), |index| {
            self.chains
                .values()
                .any(|chain| chain.mixer_chan().map(usize::from) == Some(index))
        })
        .and_then(|index| MixerChan::try_from(index).ok())
        .ok_or_else(|| Error::exhausted(ResourceKind::MixerChannel))
    }

    /// The next MIDI channel not used by any chain, skipping the master channel.
    pub fn get_next_free_midi_chan(&self, hint: u8) -> Result<u8, Error> {
        let master = self.settings.master_midi_chan().map(usize::from);
        Self::next_free(MIDI_CHANNELS, usize::from(hint), |index| {
            master == Some(index)
                || self.chains.values().any(|chain| {
                    chain.midi_chan().map(u8::from).map(usize::from) == Some(index)
                })
        })
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| Error::exhausted(ResourceKind::MidiChannel))
    }

    /// The next router input not used by any chain.
    pub fn get_next_free_zmop_index(&self, hint: u8) -> Result<u8, Error> {
        Self::next_free(self.settings.router_inputs(), usize::from(hint), |index| {
            self.chains
                .values()
                .any(|chain| chain.zmop().map(usize::from) == Some(index))
        })
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| Error::exhausted(ResourceKind::RouterInput))
    }

    /// Changes the MIDI channel of a chain, allocating a router input if the chain
    /// had none.
    pub fn set_chain_midi_chan(
        &mut self,
        chain_id: ChainId,
        midi_chan: Option<MidiChannel>,
    ) -> Result<(), Error> {
        let needs_zmop = midi_chan.is_some() && self.chain_ref(chain_id)?.zmop().is_none();
        let zmop = if needs_zmop {
            Some(self.get_next_free_zmop_index(0)?)
        } else {
            None
        };

        let mut chain = self
            .chains
            .remove(&chain_id)
            .ok_or_else(|| Error::NotFound(format!("chain {}", chain_id)))?;
        chain.set_midi_chan(midi_chan, &mut self.processors);
        if let Some(zmop) = zmop {
            self.setup_router_input(&mut chain, zmop);
        }
        self.chains.insert(chain_id, chain);

        self.refresh_midi_index();
        self.rebuild_chain(chain_id);
        self.request_reconnect(false);
        info!(chain = chain_id, ?midi_chan, "Changed chain MIDI channel.");
        Ok(())
    }

    /// Toggles audio pass-through, allocating a mixer strip if the chain had none.
    pub fn set_chain_audio_thru(
        &mut self,
        chain_id: ChainId,
        audio_thru: bool,
    ) -> Result<(), Error> {
        let needs_mixer = audio_thru && self.chain_ref(chain_id)?.mixer_chan().is_none();
        let mixer_chan = if needs_mixer {
            Some(self.get_next_free_mixer_chan(0)?)
        } else {
            None
        };
        let chain = self.chain_mut(chain_id)?;
        if mixer_chan.is_some() {
            chain.set_mixer_chan(mixer_chan);
        }
        chain.set_audio_thru(audio_thru);
        self.rebuild_chain(chain_id);
        self.request_reconnect(false);
        Ok(())
    }

    pub fn set_chain_midi_thru(&mut self, chain_id: ChainId, midi_thru: bool) -> Result<(), Error> {
        self.chain_mut(chain_id)?.set_midi_thru(midi_thru);
        self.rebuild_chain(chain_id);
        self.request_reconnect(false);
        Ok(())
    }

    /// Replaces the audio inputs of a chain.
    pub fn set_audio_in(&mut self, chain_id: ChainId, audio_in: Vec<PortRef>) -> Result<(), Error> {
        self.chain_mut(chain_id)?.set_audio_in(audio_in);
        self.rebuild_chain(chain_id);
        self.graph.request_audio_reconnect(false);
        Ok(())
    }

    /// A chain reference must point at a live chain and must not close a loop.
    fn check_output(
        &self,
        chain_id: ChainId,
        port: &PortRef,
        howls: impl Fn(ChainId, ChainId) -> bool,
    ) -> Result<(), Error> {
        let Some(dst) = port.chain_id() else {
            return Ok(());
        };
        self.chain_ref(dst)?;
        if howls(chain_id, dst) {
            warn!(chain = chain_id, dst, "Refusing output that would howl.");
            return Err(Error::InvalidOperation(format!(
                "routing chain {} to chain {} would create a loop",
                chain_id, dst
            )));
        }
        Ok(())
    }

    /// Adds an audio output to a chain.
    pub fn add_audio_out(&mut self, chain_id: ChainId, port: PortRef) -> Result<(), Error> {
        self.chain_ref(chain_id)?;
        self.check_output(chain_id, &port, |src, dst| self.will_audio_howl(src, dst))?;
        let chain = self.chain_mut(chain_id)?;
        if !chain.audio_out().contains(&port) {
            let mut audio_out = chain.audio_out().to_vec();
            audio_out.push(port);
            chain.set_audio_out(audio_out);
        }
        self.rebuild_chain(chain_id);
        self.graph.request_audio_reconnect(false);
        Ok(())
    }

    /// Removes an audio output from a chain. Returns false if it wasn't there.
    pub fn remove_audio_out(&mut self, chain_id: ChainId, port: &PortRef) -> Result<bool, Error> {
        let chain = self.chain_mut(chain_id)?;
        if !chain.audio_out().contains(port) {
            return Ok(false);
        }
        let audio_out = chain.audio_out().iter().filter(|p| *p != port).cloned().collect();
        chain.set_audio_out(audio_out);
        self.rebuild_chain(chain_id);
        self.graph.request_audio_reconnect(false);
        Ok(true)
    }

    /// Adds a MIDI output to a chain.
    pub fn add_midi_out(&mut self, chain_id: ChainId, port: PortRef) -> Result<(), Error> {
        self.chain_ref(chain_id)?;
        self.check_output(chain_id, &port, |src, dst| self.will_midi_howl(src, dst))?;
        let chain = self.chain_mut(chain_id)?;
        if !chain.midi_out().contains(&port) {
            let mut midi_out = chain.midi_out().to_vec();
            midi_out.push(port);
            chain.set_midi_out(midi_out);
        }
        self.rebuild_chain(chain_id);
        self.graph.request_midi_reconnect(false);
        Ok(())
    }

    /// Removes a MIDI output from a chain. Returns false if it wasn't there.
    pub fn remove_midi_out(&mut self, chain_id: ChainId, port: &PortRef) -> Result<bool, Error> {
        let chain = self.chain_mut(chain_id)?;
        if !chain.midi_out().contains(port) {
            return Ok(false);
        }
        let midi_out = chain.midi_out().iter().filter(|p| *p != port).cloned().collect();
        chain.set_midi_out(midi_out);
        self.rebuild_chain(chain_id);
        self.graph.request_midi_reconnect(false);
        Ok(true)
    }

    pub fn active_chain_id(&self) -> Option<ChainId> {
        self.dispatcher.active_chain()
    }

    pub fn set_active_chain(&mut self, chain_id: ChainId) -> Result<(), Error> {
        self.chain_ref(chain_id)?;
        self.dispatcher.set_active_chain(Some(chain_id));
        debug!(chain = chain_id, "Active chain changed.");
        Ok(())
    }

    fn active_position(&self) -> Option<usize> {
        let active = self.active_chain_id()?;
        self.ordered_chain_ids.iter().position(|id| *id == active)
    }

    /// Keeps the active chain valid after removals, staying near its old position.
    fn reselect_active_chain(&mut self, previous_position: Option<usize>) {
        if self
            .active_chain_id()
            .is_some_and(|id| self.chains.contains_key(&id))
        {
            return;
        }
        let position = previous_position
            .unwrap_or(0)
            .min(self.ordered_chain_ids.len().saturating_sub(1));
        let chain_id = self.ordered_chain_ids.get(position).copied();
        self.dispatcher.set_active_chain(chain_id);
    }

    fn step_active_chain(&mut self, forward: bool) -> Option<ChainId> {
        let count = self.ordered_chain_ids.len();
        if count == 0 {
            return None;
        }
        let position = match self.active_position() {
            Some(position) if forward => (position + 1) % count,
            Some(position) => (position + count - 1) % count,
            None => 0,
        };
        let chain_id = self.ordered_chain_ids[position];
        self.dispatcher.set_active_chain(Some(chain_id));
        Some(chain_id)
    }

    /// Selects the next chain in display order, wrapping around.
    pub fn next_chain(&mut self) -> Option<ChainId> {
        self.step_active_chain(true)
    }

    /// Selects the previous chain in display order, wrapping around.
    pub fn previous_chain(&mut self) -> Option<ChainId> {
        self.step_active_chain(false)
    }

    /// Moves a chain to a new display position.
    pub fn move_chain(&mut self, chain_id: ChainId, position: usize) -> Result<(), Error> {
        self.chain_ref(chain_id)?;
        self.ordered_chain_ids.retain(|id| *id != chain_id);
        let position = position.min(self.ordered_chain_ids.len());
        self.ordered_chain_ids.insert(position, chain_id);
        self.refresh_midi_index();
        Ok(())
    }

    /// Rebuilds the channel -> chain index and the bank-select targets used by dispatch.
    fn refresh_midi_index(&mut self) {
        let mut index: BTreeMap<u8, Vec<ChainId>> = BTreeMap::new();
        let mut banks = Vec::new();
        for chain_id in &self.ordered_chain_ids {
            let Some(chain) = self.chains.get(chain_id) else {
                continue;
            };
            let Some(midi_chan) = chain.midi_chan() else {
                continue;
            };
            index.entry(u8::from(midi_chan)).or_default().push(*chain_id);
            let bank = chain
                .get_processors(None, None)
                .into_iter()
                .filter_map(|id| self.processors.get(&id))
                .find(|processor| processor.supports_bank())
                .map(|processor| processor.bank());
            if let Some(bank) = bank {
                banks.push((midi_chan, bank));
            }
        }
        self.midi_chan_2_chain_ids = index;
        self.dispatcher.set_bank_targets(banks);
    }

    /// Binds a control to a CC. See [CcDispatcher] for how bindings are addressed.
    pub fn add_midi_learn(
        &mut self,
        chan: u8,
        cc: u8,
        control: Arc<dyn Control>,
        device: Option<u8>,
    ) -> Result<(), Error> {
        if usize::from(chan) >= MIDI_CHANNELS || cc > 127 {
            return Err(Error::InvalidOperation(format!(
                "can't bind channel {} CC {}",
                chan, cc
            )));
        }
        let processor = self
            .processors
            .get(&control.processor_id())
            .ok_or_else(|| Error::NotFound(format!("processor {}", control.processor_id())))?;
        self.dispatcher
            .bind(device, chan, cc, control, processor.chain_id());
        Ok(())
    }

    /// Removes a control's bindings. Unbound controls are ignored.
    pub fn remove_midi_learn(&mut self, proc_id: ProcId, symbol: &str) -> bool {
        self.dispatcher.unbind(proc_id, symbol)
    }

    pub fn get_midi_learn_state(&self) -> Vec<LearnedBinding> {
        self.dispatcher.learned()
    }

    /// Replaces every binding. Bindings to missing processors or controls are skipped.
    pub fn set_midi_learn_state(&mut self, bindings: &[LearnedBinding]) {
        self.dispatcher.clear();
        for binding in bindings {
            let Some(control) = self
                .processors
                .get(&binding.processor)
                .and_then(|processor| processor.control(&binding.symbol))
            else {
                warn!(
                    processor = binding.processor,
                    symbol = binding.symbol,
                    "Skipping binding to a missing control."
                );
                continue;
            };
            if let Err(err) =
                self.add_midi_learn(binding.chan, binding.cc, control, binding.device)
            {
                warn!(err = %err, "Skipping invalid binding.");
            }
        }
    }

    /// Dispatches a CC event. Never blocks on engines or the graph.
    pub fn midi_control_change(&self, device: u8, chan: u8, cc: u8, value: u8) {
        self.dispatcher.control_change(device, chan, cc, value);
    }

    fn chain_ports(&self) -> BTreeMap<ChainId, ChainPorts> {
        self.chains
            .iter()
            .map(|(id, chain)| {
                (
                    *id,
                    ChainPorts {
                        mixer_chan: chain.mixer_chan(),
                        zmop: chain.zmop(),
                    },
                )
            })
            .collect()
    }

    /// Rebuilds one chain's routing tables. Returns false if the rebuild was deferred.
    pub fn rebuild_chain(&mut self, chain_id: ChainId) -> bool {
        let ports = self.chain_ports();
        let ctx = RouteContext {
            processors: &self.processors,
            chains: &ports,
        };
        match self.chains.get_mut(&chain_id) {
            Some(chain) => chain.rebuild_graph(&ctx),
            None => false,
        }
    }

    /// Rebuilds every chain. Returns false if any rebuild was deferred.
    pub fn rebuild_all(&mut self) -> bool {
        let ports = self.chain_ports();
        let ctx = RouteContext {
            processors: &self.processors,
            chains: &ports,
        };
        let mut complete = true;
        for chain in self.chains.values_mut() {
            complete &= chain.rebuild_graph(&ctx);
        }
        complete
    }

    /// Retries every rebuild that was deferred or never ran. Meant to be called
    /// from a timer. Returns true when every chain is up to date.
    pub fn flush_pending_rebuilds(&mut self) -> bool {
        let ports = self.chain_ports();
        let ctx = RouteContext {
            processors: &self.processors,
            chains: &ports,
        };
        let mut rebuilt = false;
        let mut complete = true;
        for chain in self.chains.values_mut().filter(|chain| chain.needs_rebuild()) {
            let done = chain.rebuild_pending(&ctx);
            rebuilt |= done;
            complete &= done;
        }
        if rebuilt {
            self.request_reconnect(false);
        }
        complete
    }

    fn request_reconnect(&self, fast: bool) {
        self.graph.request_audio_reconnect(fast);
        self.graph.request_midi_reconnect(fast);
    }
}

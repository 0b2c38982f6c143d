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

//! A chain is an ordered signal path: MIDI tools feed synths, synths feed audio
//! effects, and the audio effects straddle the chain's mixer strip.

use std::{collections::BTreeMap, fmt, sync::Arc};

use tracing::{debug, error};

use crate::{
    graph::{ConnectionGraph, Direction, PortRef, Routes},
    mixer::MixerChan,
    processor::{ChainId, ProcId, Processor, ProcessorTable, ProcessorType},
    router::{self, MidiChannel, MidiRouter},
    state::{ChainState, SlotState},
};

use self::slot::SlotList;

mod routing;
pub mod slot;
#[cfg(test)]
mod tests;

/// The Main chain. Always present.
pub const MAIN_CHAIN_ID: ChainId = 0;

/// The kind of a chain, decided by its most significant populated slot list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainType {
    Synth,
    Audio,
    Midi,
    Empty,
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainType::Synth => "MIDI Synth",
            ChainType::Audio => "Audio Effect",
            ChainType::Midi => "MIDI Tool",
            ChainType::Empty => "Empty",
        };
        f.write_str(name)
    }
}

/// A signal path of processor slots plus the resources it holds.
pub struct Chain {
    chain_id: ChainId,
    title: Option<String>,
    midi_chan: Option<MidiChannel>,
    mixer_chan: Option<MixerChan>,
    zmop: Option<u8>,

    midi_slots: SlotList,
    synth_slots: SlotList,
    audio_slots: SlotList,
    /// Audio slots before this index are pre-fader.
    fader_pos: usize,
    proc_types: BTreeMap<ProcId, ProcessorType>,
    current_processor: Option<ProcId>,

    audio_in: Vec<PortRef>,
    audio_out: Vec<PortRef>,
    midi_in: Vec<PortRef>,
    midi_out: Vec<PortRef>,
    audio_thru: bool,
    midi_thru: bool,

    audio_routes: Routes,
    midi_routes: Routes,
    audio_dirty: bool,
    midi_dirty: bool,

    graph: Arc<dyn ConnectionGraph>,
    router: Arc<dyn MidiRouter>,
}

impl Chain {
    /// Creates an empty chain. Resources are assigned by the chain manager.
    pub fn new(
        chain_id: ChainId,
        midi_chan: Option<MidiChannel>,
        midi_thru: bool,
        audio_thru: bool,
        graph: Arc<dyn ConnectionGraph>,
        router: Arc<dyn MidiRouter>,
    ) -> Chain {
        let main = chain_id == MAIN_CHAIN_ID;
        Chain {
            chain_id,
            title: None,
            midi_chan,
            mixer_chan: None,
            zmop: None,
            midi_slots: SlotList::new(),
            synth_slots: SlotList::new(),
            audio_slots: SlotList::new(),
            fader_pos: 0,
            proc_types: BTreeMap::new(),
            current_processor: None,
            audio_in: Self::default_audio_in(main),
            audio_out: Self::default_audio_out(main),
            midi_in: Vec::new(),
            midi_out: Vec::new(),
            audio_thru: audio_thru || main,
            midi_thru: midi_thru && !main,
            audio_routes: Routes::new(),
            midi_routes: Routes::new(),
            audio_dirty: true,
            midi_dirty: true,
            graph,
            router,
        }
    }

    pub(crate) fn default_audio_in(main: bool) -> Vec<PortRef> {
        if main {
            Vec::new()
        } else {
            vec![PortRef::capture(1), PortRef::capture(2)]
        }
    }

    pub(crate) fn default_audio_out(main: bool) -> Vec<PortRef> {
        if main {
            vec![PortRef::playback(1), PortRef::playback(2)]
        } else {
            vec![PortRef::chain(MAIN_CHAIN_ID)]
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn is_main(&self) -> bool {
        self.chain_id == MAIN_CHAIN_ID
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: Option<String>) {
        self.title = title.filter(|t| !t.is_empty());
    }

    pub fn midi_chan(&self) -> Option<MidiChannel> {
        self.midi_chan
    }

    /// Changes the MIDI channel and mirrors it onto every processor in the chain.
    pub fn set_midi_chan(
        &mut self,
        midi_chan: Option<MidiChannel>,
        processors: &mut ProcessorTable,
    ) {
        self.midi_chan = midi_chan;
        for id in self.proc_types.keys() {
            if let Some(processor) = processors.get_mut(id) {
                processor.set_midi_chan(midi_chan);
            }
        }
        if let Some(zmop) = self.zmop {
            router::apply_midi_chan(self.router.as_ref(), zmop, midi_chan);
        }
        self.mark_dirty();
    }

    pub fn mixer_chan(&self) -> Option<MixerChan> {
        self.mixer_chan
    }

    pub(crate) fn set_mixer_chan(&mut self, mixer_chan: Option<MixerChan>) {
        self.mixer_chan = mixer_chan;
        self.mark_dirty();
    }

    /// The router input index, if the chain receives MIDI.
    pub fn zmop(&self) -> Option<u8> {
        self.zmop
    }

    pub(crate) fn set_zmop(&mut self, zmop: Option<u8>) {
        self.zmop = zmop;
        self.update_router_flags();
        self.mark_dirty();
    }

    pub fn audio_thru(&self) -> bool {
        self.audio_thru
    }

    /// Main always passes audio through.
    pub fn set_audio_thru(&mut self, audio_thru: bool) {
        self.audio_thru = audio_thru || self.is_main();
        self.mark_dirty();
    }

    pub fn midi_thru(&self) -> bool {
        self.midi_thru
    }

    /// Main never passes MIDI through.
    pub fn set_midi_thru(&mut self, midi_thru: bool) {
        self.midi_thru = midi_thru && !self.is_main();
        self.mark_dirty();
    }

    pub fn fader_pos(&self) -> usize {
        self.fader_pos
    }

    /// Moves the fader boundary, clamped to the audio slot count.
    pub fn set_fader_pos(&mut self, fader_pos: usize) {
        self.fader_pos = fader_pos.min(self.audio_slots.len());
        self.mark_dirty();
    }

    pub fn current_processor(&self) -> Option<ProcId> {
        self.current_processor
    }

    pub fn set_current_processor(&mut self, id: ProcId) -> bool {
        if self.proc_types.contains_key(&id) {
            self.current_processor = Some(id);
            true
        } else {
            false
        }
    }

    pub fn audio_in(&self) -> &[PortRef] {
        &self.audio_in
    }

    pub fn audio_out(&self) -> &[PortRef] {
        &self.audio_out
    }

    pub fn midi_in(&self) -> &[PortRef] {
        &self.midi_in
    }

    pub fn midi_out(&self) -> &[PortRef] {
        &self.midi_out
    }

    pub(crate) fn set_audio_in(&mut self, audio_in: Vec<PortRef>) {
        self.audio_in = audio_in;
        self.mark_dirty();
    }

    pub(crate) fn set_audio_out(&mut self, audio_out: Vec<PortRef>) {
        self.audio_out = audio_out;
        self.mark_dirty();
    }

    pub(crate) fn set_midi_out(&mut self, midi_out: Vec<PortRef>) {
        self.midi_out = midi_out;
        self.mark_dirty();
    }

    /// Enables or disables receiving from a physical MIDI input device.
    pub(crate) fn set_midi_in_device(&mut self, index: u8, enabled: bool) {
        let port = PortRef::MidiDevice {
            index,
            dir: Direction::In,
        };
        self.midi_in.retain(|p| *p != port);
        if enabled {
            self.midi_in.push(port);
        }
        if let Some(zmop) = self.zmop {
            self.router.set_route_from(zmop, index, enabled);
        }
    }

    /// The last rebuilt audio routing table.
    pub fn audio_routes(&self) -> &Routes {
        &self.audio_routes
    }

    /// The last rebuilt MIDI routing table.
    pub fn midi_routes(&self) -> &Routes {
        &self.midi_routes
    }

    /// True while a structural change has not been followed by a rebuild.
    pub fn needs_rebuild(&self) -> bool {
        self.audio_dirty || self.midi_dirty
    }

    fn mark_dirty(&mut self) {
        self.audio_dirty = true;
        self.midi_dirty = true;
    }

    fn slots(&self, processor_type: ProcessorType) -> &SlotList {
        match processor_type {
            ProcessorType::MidiTool => &self.midi_slots,
            ProcessorType::MidiSynth | ProcessorType::Special => &self.synth_slots,
            ProcessorType::AudioEffect => &self.audio_slots,
        }
    }

    fn slots_mut(&mut self, processor_type: ProcessorType) -> &mut SlotList {
        match processor_type {
            ProcessorType::MidiTool => &mut self.midi_slots,
            ProcessorType::MidiSynth | ProcessorType::Special => &mut self.synth_slots,
            ProcessorType::AudioEffect => &mut self.audio_slots,
        }
    }

    pub fn midi_slots(&self) -> &SlotList {
        &self.midi_slots
    }

    pub fn synth_slots(&self) -> &SlotList {
        &self.synth_slots
    }

    pub fn audio_slots(&self) -> &SlotList {
        &self.audio_slots
    }

    /// Inserts a processor. In parallel mode the processor joins the slot at
    /// `slot` (or the last slot). Otherwise it gets a new slot directly after
    /// `slot`, or at the end when no slot is given. Audio effects without a slot go
    /// to the end of the pre-fader section unless `post_fader` is set.
    pub fn insert_processor(
        &mut self,
        processor: &mut Processor,
        parallel: bool,
        slot: Option<usize>,
        post_fader: bool,
    ) -> bool {
        let id = processor.id();
        let processor_type = processor.processor_type();
        if self.proc_types.contains_key(&id) {
            error!(chain = self.chain_id, processor = id, "Processor already in chain.");
            return false;
        }

        let fader_pos = self.fader_pos;
        let is_audio = processor_type == ProcessorType::AudioEffect;
        let slots = self.slots_mut(processor_type);
        if parallel && !slots.is_empty() {
            let index = match slot {
                Some(index) if index < slots.len() => index,
                _ => slots.len() - 1,
            };
            slots.push_parallel(index, id);
        } else {
            let index = match slot {
                Some(index) => index.saturating_add(1),
                None if is_audio && !post_fader => fader_pos,
                None => slots.len(),
            };
            let index = slots.insert_slot(index, vec![id]);
            if is_audio && (index < fader_pos || (index == fader_pos && !post_fader)) {
                self.fader_pos += 1;
            }
        }

        self.proc_types.insert(id, processor_type);
        processor.set_chain(Some(self.chain_id));
        processor.set_midi_chan(self.midi_chan);
        self.current_processor = Some(id);
        self.update_router_flags();
        self.mark_dirty();
        debug!(chain = self.chain_id, processor = id, "Inserted processor.");
        true
    }

    /// Removes a processor, dropping its slot if it becomes empty.
    pub fn remove_processor(&mut self, processor: &mut Processor) -> bool {
        let id = processor.id();
        let Some(processor_type) = self.proc_types.get(&id).copied() else {
            error!(chain = self.chain_id, processor = id, "Processor not in chain.");
            return false;
        };
        let Some((index, dropped)) = self.slots_mut(processor_type).remove(id) else {
            error!(chain = self.chain_id, processor = id, "Processor missing from its slots.");
            return false;
        };
        if dropped && processor_type == ProcessorType::AudioEffect && index < self.fader_pos {
            self.fader_pos -= 1;
        }

        self.proc_types.remove(&id);
        processor.set_chain(None);
        if self.current_processor.is_none() || self.current_processor == Some(id) {
            self.current_processor = self.pick_current(processor_type);
        }
        self.update_router_flags();
        self.mark_dirty();
        debug!(chain = self.chain_id, processor = id, "Removed processor.");
        true
    }

    fn pick_current(&self, preferred: ProcessorType) -> Option<ProcId> {
        [
            preferred,
            ProcessorType::MidiSynth,
            ProcessorType::AudioEffect,
            ProcessorType::MidiTool,
        ]
        .iter()
        .find_map(|t| self.slots(*t).processors().next())
    }

    /// Moves a processor one step towards the start (`up`) or end of its slot list.
    /// A parallel processor first splits into its own slot; a single one joins its
    /// neighbour. An audio effect next to the fader crosses it instead of moving.
    pub fn nudge_processor(&mut self, id: ProcId, up: bool) -> bool {
        let Some(processor_type) = self.proc_types.get(&id).copied() else {
            error!(chain = self.chain_id, processor = id, "Processor not in chain.");
            return false;
        };
        let is_audio = processor_type == ProcessorType::AudioEffect;
        let fader_pos = self.fader_pos;
        let slots = self.slots_mut(processor_type);
        let Some((index, _)) = slots.find(id) else {
            return false;
        };
        let parallel = slots.get(index).map(|slot| slot.len() > 1).unwrap_or(false);

        if up {
            if is_audio && !parallel && index == fader_pos {
                self.fader_pos += 1;
            } else if parallel {
                slots.remove(id);
                slots.insert_slot(index, vec![id]);
                if is_audio && index < fader_pos {
                    self.fader_pos += 1;
                }
            } else if index > 0 {
                slots.remove_slot(index);
                slots.push_parallel(index - 1, id);
                if is_audio && index < fader_pos {
                    self.fader_pos -= 1;
                }
            } else {
                return false;
            }
        } else if is_audio && !parallel && index + 1 == fader_pos {
            self.fader_pos -= 1;
        } else if parallel {
            slots.remove(id);
            slots.insert_slot(index + 1, vec![id]);
            if is_audio && index < fader_pos {
                self.fader_pos += 1;
            }
        } else if index + 1 < slots.len() {
            slots.remove_slot(index);
            slots.push_parallel(index, id);
            if is_audio && index < fader_pos {
                self.fader_pos -= 1;
            }
        } else {
            return false;
        }

        self.mark_dirty();
        true
    }

    /// Exchanges the positions of two processors of the same type.
    pub fn swap_processors(&mut self, first: ProcId, second: ProcId) -> bool {
        let (Some(first_type), Some(second_type)) =
            (self.proc_types.get(&first).copied(), self.proc_types.get(&second).copied())
        else {
            error!(chain = self.chain_id, first, second, "Processor not in chain.");
            return false;
        };
        if first_type != second_type {
            error!(
                chain = self.chain_id,
                first, second, "Can't swap processors of different types."
            );
            return false;
        }

        let slots = self.slots_mut(first_type);
        match (slots.find(first), slots.find(second)) {
            (Some(a), Some(b)) => slots.swap(a, b),
            _ => return false,
        }
        self.mark_dirty();
        true
    }

    /// Removes every processor reference and restores the pass-through defaults.
    /// The processors themselves must already be detached by the caller.
    pub(crate) fn reset(&mut self) {
        self.midi_slots.clear();
        self.synth_slots.clear();
        self.audio_slots.clear();
        self.proc_types.clear();
        self.fader_pos = 0;
        self.current_processor = None;
        self.title = None;
        self.audio_thru = self.is_main() || self.audio_thru;
        self.midi_thru = false;
        self.audio_routes.clear();
        self.midi_routes.clear();
        self.update_router_flags();
        self.mark_dirty();
    }

    /// Synth engines read program changes and CCs through their own controls, so
    /// the router input must not also forward them raw.
    fn update_router_flags(&self) {
        if let Some(zmop) = self.zmop {
            let drop = self.drops_program_change();
            self.router.set_flag_drop_pc(zmop, drop);
            self.router.set_flag_drop_cc(zmop, drop);
        }
    }

    /// True when the chain holds any synth slot processor.
    pub fn drops_program_change(&self) -> bool {
        self.is_synth()
    }

    /// The slot index of a processor within its slot list.
    pub fn get_slot(&self, id: ProcId) -> Option<usize> {
        let processor_type = self.proc_types.get(&id)?;
        self.slots(*processor_type).find(id).map(|(index, _)| index)
    }

    /// The type of an attached processor.
    pub fn processor_type(&self, id: ProcId) -> Option<ProcessorType> {
        self.proc_types.get(&id).copied()
    }

    pub fn contains(&self, id: ProcId) -> bool {
        self.proc_types.contains_key(&id)
    }

    /// Number of slots, optionally restricted to one type.
    pub fn slot_count(&self, processor_type: Option<ProcessorType>) -> usize {
        match processor_type {
            Some(t) => self.slots(t).len(),
            None => self.midi_slots.len() + self.synth_slots.len() + self.audio_slots.len(),
        }
    }

    /// Number of processors, optionally restricted to one type.
    pub fn processor_count(&self, processor_type: Option<ProcessorType>) -> usize {
        match processor_type {
            Some(t) => self.slots(t).processor_count(),
            None => self.proc_types.len(),
        }
    }

    /// Processors in signal order (MIDI, synth, audio), optionally restricted to a
    /// type and to one slot of that type.
    pub fn get_processors(
        &self,
        processor_type: Option<ProcessorType>,
        slot: Option<usize>,
    ) -> Vec<ProcId> {
        match (processor_type, slot) {
            (Some(t), Some(index)) => self.slots(t).get(index).cloned().unwrap_or_default(),
            (Some(t), None) => self.slots(t).processors().collect(),
            (None, _) => self
                .midi_slots
                .processors()
                .chain(self.synth_slots.processors())
                .chain(self.audio_slots.processors())
                .collect(),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.mixer_chan.is_some()
    }

    pub fn is_midi(&self) -> bool {
        self.zmop.is_some()
    }

    pub fn is_synth(&self) -> bool {
        !self.synth_slots.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.proc_types.is_empty()
    }

    pub fn get_type(&self) -> ChainType {
        if !self.synth_slots.is_empty() {
            ChainType::Synth
        } else if !self.audio_slots.is_empty() {
            ChainType::Audio
        } else if !self.midi_slots.is_empty() {
            ChainType::Midi
        } else {
            ChainType::Empty
        }
    }

    fn first_processor<'a>(&self, processors: &'a ProcessorTable) -> Option<&'a Processor> {
        self.synth_slots
            .processors()
            .chain(self.audio_slots.processors())
            .chain(self.midi_slots.processors())
            .find_map(|id| processors.get(&id))
    }

    /// The display title: the explicit title, else the first processor's name.
    pub fn get_title(&self, processors: &ProcessorTable) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        if self.is_main() {
            return "Main".to_string();
        }
        match self.first_processor(processors) {
            Some(processor) => processor.name().to_string(),
            None if self.audio_thru && self.is_audio() => "Audio Input".to_string(),
            None if self.midi_thru => "MIDI Thru".to_string(),
            None => "Empty".to_string(),
        }
    }

    /// The display description: the first processor's name and preset.
    pub fn get_description(&self, processors: &ProcessorTable) -> String {
        match self.first_processor(processors) {
            Some(processor) => match processor.preset_name() {
                Some(preset) => format!("{}\n{}", processor.name(), preset),
                None => processor.name().to_string(),
            },
            None => self.get_title(processors),
        }
    }

    /// Stereo inputs. Non-Main chains pair adjacent inputs into one stereo input.
    pub fn get_input_pairs(&self) -> Vec<Vec<PortRef>> {
        if self.is_main() {
            self.audio_in.iter().map(|port| vec![port.clone()]).collect()
        } else {
            self.audio_in.chunks(2).map(|pair| pair.to_vec()).collect()
        }
    }

    /// Serializes the chain. Slots are listed MIDI, synth then audio, each as a
    /// map of processor id to engine code.
    pub fn get_state(&self, processors: &ProcessorTable) -> ChainState {
        let slots = [&self.midi_slots, &self.synth_slots, &self.audio_slots]
            .into_iter()
            .flat_map(|list| list.slots().iter())
            .map(|slot| {
                let mut state = SlotState::new();
                for id in slot {
                    if let Some(processor) = processors.get(id) {
                        state.push(*id, processor.engine_code().to_string());
                    }
                }
                state
            })
            .filter(|state| !state.is_empty())
            .collect();

        ChainState {
            title: self.title.clone(),
            midi_chan: self.midi_chan,
            midi_thru: self.midi_thru,
            audio_thru: self.audio_thru,
            mixer_chan: self.mixer_chan,
            cc_route: self.zmop.map(|zmop| self.router.get_cc_route(zmop).to_vec()),
            fader_pos: self.fader_pos,
            slots,
            audio_in: Some(self.audio_in.clone()),
            audio_out: Some(self.audio_out.clone()),
            midi_out: Some(self.midi_out.clone()),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chain {}", self.chain_id)?;
        if let Some(title) = &self.title {
            write!(f, " ({})", title)?;
        }
        if let Some(midi_chan) = self.midi_chan {
            write!(f, " MIDI {}", midi_chan)?;
        }
        if let Some(mixer_chan) = self.mixer_chan {
            write!(f, " strip {}", mixer_chan)?;
        }
        Ok(())
    }
}

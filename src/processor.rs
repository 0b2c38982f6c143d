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
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};

use crate::router::MidiChannel;

/// Processor ids are dense positive integers, unique across the system.
pub type ProcId = u32;

/// Chain ids. Chain 0 is the Main chain.
pub type ChainId = u32;

/// All processors live in one global table owned by the chain manager. Chains only hold ids.
pub type ProcessorTable = BTreeMap<ProcId, Processor>;

/// The role a processor plays in a chain. Each type has its own slot list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorType {
    MidiTool,
    MidiSynth,
    AudioEffect,
    Special,
}

impl ProcessorType {
    /// Returns true if this processor type only handles MIDI and needs no mixer strip.
    pub fn is_midi_only(&self) -> bool {
        matches!(self, ProcessorType::MidiTool)
    }
}

impl fmt::Display for ProcessorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessorType::MidiTool => "MIDI Tool",
            ProcessorType::MidiSynth => "MIDI Synth",
            ProcessorType::AudioEffect => "Audio Effect",
            ProcessorType::Special => "Special",
        };
        f.write_str(name)
    }
}

/// Explicit capability queries, answered per processor type.
pub trait Capabilities {
    /// Whether the processor selects banks (CC 0/32).
    fn supports_bank(&self) -> bool;

    /// Whether the processor loads presets.
    fn supports_preset(&self) -> bool;

    /// Whether the processor consumes program changes and CCs through its own control
    /// model, so the router should not also forward them as raw MIDI.
    fn drops_program_change(&self) -> bool;
}

impl Capabilities for ProcessorType {
    fn supports_bank(&self) -> bool {
        matches!(self, ProcessorType::MidiSynth)
    }

    fn supports_preset(&self) -> bool {
        matches!(self, ProcessorType::MidiSynth | ProcessorType::AudioEffect)
    }

    fn drops_program_change(&self) -> bool {
        matches!(self, ProcessorType::MidiSynth | ProcessorType::Special)
    }
}

/// A control that may be bound to MIDI CCs. Implemented by processor parameters.
/// Dispatch calls these from the MIDI context, so implementations must not block.
pub trait Control: Send + Sync {
    /// The processor owning the control.
    fn processor_id(&self) -> ProcId;

    /// The control symbol, unique within its processor.
    fn symbol(&self) -> &str;

    /// Applies a CC value. `feedback` is false when the value came from the controller
    /// feedback input and must not be echoed back.
    fn midi_control_change(&self, value: u8, feedback: bool);

    /// Releases a control that was held by a pedal-like CC.
    fn release(&self);
}

/// A processor parameter holding a 7 bit value.
pub struct Parameter {
    processor_id: ProcId,
    symbol: String,
    value: AtomicU8,
}

impl Parameter {
    pub fn new(processor_id: ProcId, symbol: &str) -> Parameter {
        Parameter {
            processor_id,
            symbol: symbol.to_string(),
            value: AtomicU8::new(0),
        }
    }

    /// Returns the current value.
    pub fn value(&self) -> u8 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Control for Parameter {
    fn processor_id(&self) -> ProcId {
        self.processor_id
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn midi_control_change(&self, value: u8, _feedback: bool) {
        self.value.store(value.min(127), Ordering::Relaxed);
    }

    fn release(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// Bank selection state of a processor, written from the MIDI context.
#[derive(Default)]
pub struct BankSelect {
    msb: AtomicU8,
    lsb: AtomicU8,
}

impl BankSelect {
    pub fn set_msb(&self, value: u8) {
        self.msb.store(value.min(127), Ordering::Relaxed);
    }

    pub fn set_lsb(&self, value: u8) {
        self.lsb.store(value.min(127), Ordering::Relaxed);
    }

    /// Returns the combined 14 bit bank number.
    pub fn bank(&self) -> u16 {
        ((self.msb.load(Ordering::Relaxed) as u16) << 7) | self.lsb.load(Ordering::Relaxed) as u16
    }
}

/// A single instrument, effect or tool instance hosted by an engine.
pub struct Processor {
    id: ProcId,
    processor_type: ProcessorType,
    engine_code: String,
    engine_key: Option<String>,
    name: String,
    preset_name: Option<String>,
    chain_id: Option<ChainId>,
    midi_chan: Option<MidiChannel>,
    controls: BTreeMap<String, Arc<Parameter>>,
    bank: Arc<BankSelect>,
}

impl Processor {
    pub fn new(id: ProcId, processor_type: ProcessorType, engine_code: &str, name: &str) -> Self {
        Processor {
            id,
            processor_type,
            engine_code: engine_code.to_string(),
            engine_key: None,
            name: name.to_string(),
            preset_name: None,
            chain_id: None,
            midi_chan: None,
            controls: BTreeMap::new(),
            bank: Arc::new(BankSelect::default()),
        }
    }

    pub fn id(&self) -> ProcId {
        self.id
    }

    pub fn processor_type(&self) -> ProcessorType {
        self.processor_type
    }

    pub fn engine_code(&self) -> &str {
        &self.engine_code
    }

    /// The key of the engine instance hosting this processor, once started.
    pub fn engine_key(&self) -> Option<&str> {
        self.engine_key.as_deref()
    }

    pub(crate) fn set_engine_key(&mut self, key: Option<String>) {
        self.engine_key = key;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn preset_name(&self) -> Option<&str> {
        self.preset_name.as_deref()
    }

    pub fn set_preset_name(&mut self, preset_name: Option<String>) {
        self.preset_name = preset_name;
    }

    /// The graph node identifier of this processor.
    pub fn port_name(&self) -> String {
        format!("{}-{:02}", self.engine_code.to_lowercase(), self.id)
    }

    pub fn chain_id(&self) -> Option<ChainId> {
        self.chain_id
    }

    pub fn set_chain(&mut self, chain_id: Option<ChainId>) {
        self.chain_id = chain_id;
    }

    pub fn midi_chan(&self) -> Option<MidiChannel> {
        self.midi_chan
    }

    pub fn set_midi_chan(&mut self, midi_chan: Option<MidiChannel>) {
        self.midi_chan = midi_chan;
    }

    /// Adds a parameter control with the given symbol.
    pub fn add_control(&mut self, symbol: &str) -> Arc<Parameter> {
        let parameter = Arc::new(Parameter::new(self.id, symbol));
        self.controls.insert(symbol.to_string(), parameter.clone());
        parameter
    }

    /// Returns the control with the given symbol.
    pub fn control(&self, symbol: &str) -> Option<Arc<Parameter>> {
        self.controls.get(symbol).cloned()
    }

    /// Returns the symbols of all controls.
    pub fn control_symbols(&self) -> Vec<String> {
        self.controls.keys().cloned().collect()
    }

    pub fn bank(&self) -> Arc<BankSelect> {
        self.bank.clone()
    }
}

impl Capabilities for Processor {
    fn supports_bank(&self) -> bool {
        self.processor_type.supports_bank()
    }

    fn supports_preset(&self) -> bool {
        self.processor_type.supports_preset()
    }

    fn drops_program_change(&self) -> bool {
        self.processor_type.drops_program_change()
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.preset_name {
            Some(preset) => write!(
                f,
                "{} ({}) #{}: {}",
                self.name, self.engine_code, self.id, preset
            ),
            None => write!(f, "{} ({}) #{}", self.name, self.engine_code, self.id),
        }
    }
}

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

//! The persisted chain state. Everything here is plain data and round-trips through JSON.

use std::{fmt, marker::PhantomData};

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::{
    graph::PortRef,
    mixer::MixerChan,
    processor::{ChainId, ProcId},
    router::MidiChannel,
};

/// A map that keeps its entries in insertion order when serialized, so chain
/// display order and parallel processor order survive a save/restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMap<K, V>(pub Vec<(K, V)>);

impl<K, V> OrderedMap<K, V> {
    pub fn new() -> Self {
        OrderedMap(Vec::new())
    }

    pub fn push(&mut self, key: K, value: V) {
        self.0.push((key, value));
    }

    pub fn iter(&self) -> impl Iterator<Item = &(K, V)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        OrderedMap::new()
    }
}

impl<K: Serialize, V: Serialize> Serialize for OrderedMap<K, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct OrderedMapVisitor<K, V>(PhantomData<(K, V)>);

impl<'de, K: Deserialize<'de>, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<K, V> {
    type Value = OrderedMap<K, V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry()? {
            entries.push((key, value));
        }
        Ok(OrderedMap(entries))
    }
}

impl<'de, K: Deserialize<'de>, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<K, V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// A slot: processor id -> engine code, in parallel order.
pub type SlotState = OrderedMap<ProcId, String>;

/// The saved state of one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainState {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub midi_chan: Option<MidiChannel>,
    #[serde(default)]
    pub midi_thru: bool,
    #[serde(default)]
    pub audio_thru: bool,
    #[serde(default)]
    pub mixer_chan: Option<MixerChan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc_route: Option<Vec<u8>>,
    #[serde(default)]
    pub fader_pos: usize,
    #[serde(default)]
    pub slots: Vec<SlotState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_in: Option<Vec<PortRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_out: Option<Vec<PortRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midi_out: Option<Vec<PortRef>>,
}

/// The saved state of every chain, in display order.
pub type ManagerState = OrderedMap<ChainId, ChainState>;

/// One MIDI-learn binding, stored by processor and control symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnedBinding {
    /// Set for bindings restricted to one input device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<u8>,
    pub chan: u8,
    pub cc: u8,
    pub processor: ProcId,
    pub symbol: String,
}

/// Parses a saved manager state from JSON.
pub fn from_json(json: &str) -> Result<ManagerState, serde_json::Error> {
    serde_json::from_str(json)
}

/// Writes a manager state as pretty JSON.
pub fn to_json(state: &ManagerState) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(state)
}

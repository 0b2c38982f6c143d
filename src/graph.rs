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

//! Port references and the connection-graph service that wires them together.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    mixer::MixerChan,
    processor::{ChainId, ProcId, ProcessorTable},
};

pub mod mock;

/// Routing table: destination port -> ordered source ports.
pub type Routes = BTreeMap<String, Vec<String>>;

/// The service that owns the physical audio/MIDI connections.
pub trait ConnectionGraph: Send + Sync {
    /// Tries to take the graph lock without blocking.
    fn try_acquire_lock(&self) -> bool;

    /// Releases the graph lock.
    fn release_lock(&self);

    /// Asks the service to reconcile audio connections with the routing tables.
    fn request_audio_reconnect(&self, fast: bool);

    /// Asks the service to reconcile MIDI connections with the routing tables.
    fn request_midi_reconnect(&self, fast: bool);
}

/// Holds the graph lock until dropped.
pub struct GraphLock<'a> {
    graph: &'a dyn ConnectionGraph,
}

impl<'a> GraphLock<'a> {
    /// Takes the lock if it's free. Never blocks.
    pub fn try_acquire(graph: &'a dyn ConnectionGraph) -> Option<GraphLock<'a>> {
        if graph.try_acquire_lock() {
            Some(GraphLock { graph })
        } else {
            None
        }
    }
}

impl Drop for GraphLock<'_> {
    fn drop(&mut self) {
        self.graph.release_lock();
    }
}

/// Direction of a port, seen from the owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

/// A reference to one endpoint of a chain's routing. References are resolved to
/// literal port names only when the routing tables are built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortRef {
    /// A physical capture port, 1-based.
    Capture { index: u8 },
    /// A physical playback port, 1-based.
    Playback { index: u8 },
    /// A processor's node.
    Processor { id: ProcId },
    /// A mixer strip input or output.
    Mixer { chan: MixerChan, dir: Direction },
    /// Another chain's input.
    Chain { id: ChainId },
    /// A physical MIDI device.
    MidiDevice { index: u8, dir: Direction },
}

impl PortRef {
    pub fn capture(index: u8) -> PortRef {
        PortRef::Capture { index }
    }

    pub fn playback(index: u8) -> PortRef {
        PortRef::Playback { index }
    }

    pub fn chain(id: ChainId) -> PortRef {
        PortRef::Chain { id }
    }

    /// The chain referenced by this port, if any.
    pub fn chain_id(&self) -> Option<ChainId> {
        match self {
            PortRef::Chain { id } => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRef::Capture { index } => write!(f, "capture {}", index),
            PortRef::Playback { index } => write!(f, "playback {}", index),
            PortRef::Processor { id } => write!(f, "processor {}", id),
            PortRef::Mixer { chan, dir } => write!(f, "mixer {} {:?}", chan, dir),
            PortRef::Chain { id } => write!(f, "chain {}", id),
            PortRef::MidiDevice { index, dir } => write!(f, "MIDI device {} {:?}", index, dir),
        }
    }
}

pub fn capture_port(index: u8) -> String {
    format!("system:capture_{}", index)
}

pub fn playback_port(index: u8) -> String {
    format!("system:playback_{}", index)
}

pub fn mixer_input(chan: MixerChan) -> String {
    format!("mixer:input_{:02}", chan)
}

pub fn mixer_output(chan: MixerChan) -> String {
    format!("mixer:output_{:02}", chan)
}

pub fn router_input(zmop: u8) -> String {
    format!("router:ch{}_in", zmop)
}

pub fn router_output(zmop: u8) -> String {
    format!("router:ch{}_out", zmop)
}

pub fn midi_device_port(index: u8, dir: Direction) -> String {
    match dir {
        Direction::In => format!("midi:in_{}", index),
        Direction::Out => format!("midi:out_{}", index),
    }
}

/// The resources of a chain that other chains route into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainPorts {
    pub mixer_chan: Option<MixerChan>,
    pub zmop: Option<u8>,
}

/// Everything needed to turn port references into literal port names.
pub struct RouteContext<'a> {
    pub processors: &'a ProcessorTable,
    pub chains: &'a BTreeMap<ChainId, ChainPorts>,
}

impl RouteContext<'_> {
    /// The node name of a processor.
    pub fn processor_port(&self, id: ProcId) -> Option<String> {
        self.processors.get(&id).map(|processor| processor.port_name())
    }

    /// Resolves a reference in the audio domain. References with no audio meaning
    /// resolve to nothing.
    pub fn resolve_audio(&self, port: &PortRef) -> Vec<String> {
        match port {
            PortRef::Capture { index } => vec![capture_port(*index)],
            PortRef::Playback { index } => vec![playback_port(*index)],
            PortRef::Processor { id } => self.processor_port(*id).into_iter().collect(),
            PortRef::Mixer {
                chan,
                dir: Direction::In,
            } => vec![mixer_input(*chan)],
            PortRef::Mixer {
                chan,
                dir: Direction::Out,
            } => vec![mixer_output(*chan)],
            PortRef::Chain { id } => self
                .chains
                .get(id)
                .and_then(|ports| ports.mixer_chan)
                .map(mixer_input)
                .into_iter()
                .collect(),
            PortRef::MidiDevice { .. } => Vec::new(),
        }
    }

    /// Resolves a reference in the MIDI domain.
    pub fn resolve_midi(&self, port: &PortRef) -> Vec<String> {
        match port {
            PortRef::MidiDevice { index, dir } => vec![midi_device_port(*index, *dir)],
            PortRef::Processor { id } => self.processor_port(*id).into_iter().collect(),
            PortRef::Chain { id } => self
                .chains
                .get(id)
                .and_then(|ports| ports.zmop)
                .map(router_input)
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::processor::{Processor, ProcessorType};

    use super::*;

    #[test]
    fn test_graph_lock_released_on_drop() {
        let graph = mock::Graph::new();
        {
            let lock = GraphLock::try_acquire(&graph);
            assert!(lock.is_some());
            assert!(GraphLock::try_acquire(&graph).is_none());
        }
        assert!(GraphLock::try_acquire(&graph).is_some());
    }

    #[test]
    fn test_resolve_chain_refs() {
        let mut processors = ProcessorTable::new();
        processors.insert(4, Processor::new(4, ProcessorType::MidiSynth, "FS", "FluidSynth"));
        let mut chains = BTreeMap::new();
        chains.insert(
            1,
            ChainPorts {
                mixer_chan: Some(3),
                zmop: Some(2),
            },
        );
        chains.insert(2, ChainPorts::default());
        let ctx = RouteContext {
            processors: &processors,
            chains: &chains,
        };

        assert_eq!(ctx.resolve_audio(&PortRef::chain(1)), vec!["mixer:input_03"]);
        assert_eq!(ctx.resolve_midi(&PortRef::chain(1)), vec!["router:ch2_in"]);
        assert!(ctx.resolve_audio(&PortRef::chain(2)).is_empty());
        assert!(ctx.resolve_audio(&PortRef::chain(9)).is_empty());
        assert_eq!(
            ctx.resolve_audio(&PortRef::Processor { id: 4 }),
            vec!["fs-04"]
        );
        assert_eq!(ctx.resolve_audio(&PortRef::capture(1)), vec!["system:capture_1"]);
        assert!(ctx
            .resolve_audio(&PortRef::MidiDevice {
                index: 0,
                dir: Direction::In
            })
            .is_empty());
    }

    #[test]
    fn test_port_ref_serde() {
        let json = serde_json::to_string(&PortRef::chain(3)).unwrap();
        assert_eq!(json, r#"{"type":"chain","id":3}"#);
        let port: PortRef =
            serde_json::from_str(r#"{"type":"mixer","chan":2,"dir":"out"}"#).unwrap();
        assert_eq!(
            port,
            PortRef::Mixer {
                chan: 2,
                dir: Direction::Out
            }
        );
    }
}

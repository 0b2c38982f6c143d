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

//! Routing table rebuilds. Each rebuild walks the slot lists in signal order and
//! records, for every destination port, the ports that feed it.

use tracing::debug;

use crate::graph::{self, GraphLock, RouteContext, Routes};

use super::{slot::Slot, Chain};

/// Adds sources to a destination, skipping empty source lists.
fn feed(routes: &mut Routes, destination: String, sources: &[String]) {
    if sources.is_empty() {
        return;
    }
    let entry = routes.entry(destination).or_default();
    for source in sources {
        if !entry.contains(source) {
            entry.push(source.clone());
        }
    }
}

fn slot_ports(slot: &Slot, ctx: &RouteContext) -> Vec<String> {
    slot.iter().filter_map(|id| ctx.processor_port(*id)).collect()
}

impl Chain {
    /// Rebuilds the audio routing table. Skipped, leaving the chain marked for a
    /// later rebuild, if the graph lock is held elsewhere.
    pub fn rebuild_audio_graph(&mut self, ctx: &RouteContext) -> bool {
        let graph = self.graph.clone();
        let Some(_lock) = GraphLock::try_acquire(graph.as_ref()) else {
            debug!(chain = self.chain_id, "Graph busy, deferring audio rebuild.");
            self.audio_dirty = true;
            return false;
        };
        self.audio_routes = self.build_audio_routes(ctx);
        self.audio_dirty = false;
        true
    }

    /// Rebuilds the MIDI routing table. Skipped like the audio rebuild.
    pub fn rebuild_midi_graph(&mut self, ctx: &RouteContext) -> bool {
        let graph = self.graph.clone();
        let Some(_lock) = GraphLock::try_acquire(graph.as_ref()) else {
            debug!(chain = self.chain_id, "Graph busy, deferring MIDI rebuild.");
            self.midi_dirty = true;
            return false;
        };
        self.midi_routes = self.build_midi_routes(ctx);
        self.midi_dirty = false;
        true
    }

    /// Rebuilds both tables. Returns true if both rebuilds ran.
    pub fn rebuild_graph(&mut self, ctx: &RouteContext) -> bool {
        let audio = self.rebuild_audio_graph(ctx);
        let midi = self.rebuild_midi_graph(ctx);
        audio && midi
    }

    /// Rebuilds whichever tables are out of date.
    pub fn rebuild_pending(&mut self, ctx: &RouteContext) -> bool {
        let audio = !self.audio_dirty || self.rebuild_audio_graph(ctx);
        let midi = !self.midi_dirty || self.rebuild_midi_graph(ctx);
        audio && midi
    }

    fn resolved_inputs(&self, ctx: &RouteContext) -> Vec<String> {
        self.audio_in
            .iter()
            .flat_map(|port| ctx.resolve_audio(port))
            .collect()
    }

    /// Synths (or the chain inputs) feed the pre-fader effects, the last pre-fader
    /// stage feeds the mixer strip, and the strip output runs through the
    /// post-fader effects to the chain outputs.
    fn build_audio_routes(&self, ctx: &RouteContext) -> Routes {
        let mut routes = Routes::new();
        let Some(mixer_chan) = self.mixer_chan else {
            return routes;
        };

        let mut previous: Vec<String> = if !self.synth_slots.is_empty() {
            self.synth_slots
                .processors()
                .filter_map(|id| ctx.processor_port(id))
                .collect()
        } else if self.audio_thru || !self.audio_slots.is_empty() {
            self.resolved_inputs(ctx)
        } else {
            Vec::new()
        };

        for (index, slot) in self.audio_slots.slots().iter().enumerate() {
            if index == self.fader_pos {
                feed(&mut routes, graph::mixer_input(mixer_chan), &previous);
                previous = vec![graph::mixer_output(mixer_chan)];
            }
            for id in slot {
                if let Some(port) = ctx.processor_port(*id) {
                    feed(&mut routes, port, &previous);
                }
            }
            previous = slot_ports(slot, ctx);
        }
        if self.fader_pos >= self.audio_slots.len() {
            feed(&mut routes, graph::mixer_input(mixer_chan), &previous);
            previous = vec![graph::mixer_output(mixer_chan)];
        }

        for output in &self.audio_out {
            for destination in ctx.resolve_audio(output) {
                // A chain never feeds its own strip from its own output.
                if destination == graph::mixer_input(mixer_chan) {
                    continue;
                }
                feed(&mut routes, destination, &previous);
            }
        }
        routes
    }

    /// The router input feeds the MIDI tools in series. The last tool (or the raw
    /// input) feeds every synth and audio effect, and the chain's MIDI outputs.
    fn build_midi_routes(&self, ctx: &RouteContext) -> Routes {
        let mut routes = Routes::new();
        let mut previous: Vec<String> = self.zmop.map(graph::router_output).into_iter().collect();

        for slot in self.midi_slots.slots() {
            for id in slot {
                if let Some(port) = ctx.processor_port(*id) {
                    feed(&mut routes, port, &previous);
                }
            }
            previous = slot_ports(slot, ctx);
        }

        for id in self
            .synth_slots
            .processors()
            .chain(self.audio_slots.processors())
        {
            if let Some(port) = ctx.processor_port(id) {
                feed(&mut routes, port, &previous);
            }
        }

        if !self.midi_slots.is_empty() || self.midi_thru {
            for output in &self.midi_out {
                for destination in ctx.resolve_midi(output) {
                    feed(&mut routes, destination, &previous);
                }
            }
        }
        routes
    }
}

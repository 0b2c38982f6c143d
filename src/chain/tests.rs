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
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    graph::{self, mock, ChainPorts, Direction, PortRef, RouteContext},
    processor::{ProcId, Processor, ProcessorTable, ProcessorType},
    router::{self, MidiChannel},
};

use super::{Chain, ChainType};

struct Fixture {
    graph: Arc<mock::Graph>,
    router: Arc<router::mock::Router>,
    processors: ProcessorTable,
    chain: Chain,
}

impl Fixture {
    fn new(chain_id: u32) -> Fixture {
        let graph = Arc::new(mock::Graph::new());
        let router = Arc::new(router::mock::Router::new());
        let chain = Chain::new(
            chain_id,
            Some(MidiChannel::Chan(0)),
            false,
            true,
            graph.clone(),
            router.clone(),
        );
        Fixture {
            graph,
            router,
            processors: ProcessorTable::new(),
            chain,
        }
    }

    fn add(&mut self, id: ProcId, processor_type: ProcessorType, code: &str) {
        self.processors
            .insert(id, Processor::new(id, processor_type, code, code));
    }

    fn insert(
        &mut self,
        id: ProcId,
        parallel: bool,
        slot: Option<usize>,
        post_fader: bool,
    ) -> bool {
        let processor = self.processors.get_mut(&id).expect("processor should exist");
        self.chain.insert_processor(processor, parallel, slot, post_fader)
    }

    fn remove(&mut self, id: ProcId) -> bool {
        let processor = self.processors.get_mut(&id).expect("processor should exist");
        self.chain.remove_processor(processor)
    }

    fn audio(&self) -> Vec<Vec<ProcId>> {
        self.chain.audio_slots().slots().to_vec()
    }

    fn rebuild(&mut self) -> bool {
        let mut chains = BTreeMap::new();
        chains.insert(
            0,
            ChainPorts {
                mixer_chan: Some(16),
                zmop: None,
            },
        );
        chains.insert(
            self.chain.chain_id(),
            ChainPorts {
                mixer_chan: self.chain.mixer_chan(),
                zmop: self.chain.zmop(),
            },
        );
        let ctx = RouteContext {
            processors: &self.processors,
            chains: &chains,
        };
        self.chain.rebuild_graph(&ctx)
    }

    fn assert_fader_in_bounds(&self) {
        assert!(self.chain.fader_pos() <= self.chain.audio_slots().len());
    }
}

#[test]
fn test_parallel_insert_joins_slot() {
    let mut fixture = Fixture::new(1);
    fixture.add(1, ProcessorType::AudioEffect, "LV");
    fixture.add(2, ProcessorType::AudioEffect, "LV");

    assert!(fixture.insert(1, false, None, false));
    assert!(fixture.insert(2, true, Some(0), false));
    assert_eq!(fixture.audio(), vec![vec![1, 2]]);
    assert_eq!(fixture.chain.fader_pos(), 1);
    assert_eq!(fixture.processors[&2].chain_id(), Some(1));
    assert_eq!(fixture.processors[&2].midi_chan(), Some(MidiChannel::Chan(0)));
}

#[test]
fn test_insert_twice_fails() {
    let mut fixture = Fixture::new(1);
    fixture.add(1, ProcessorType::AudioEffect, "LV");
    assert!(fixture.insert(1, false, None, false));
    assert!(!fixture.insert(1, false, None, false));
}

#[test]
fn test_series_insert_after_slot() {
    let mut fixture = Fixture::new(1);
    for id in 1..=3 {
        fixture.add(id, ProcessorType::AudioEffect, "LV");
    }
    fixture.insert(1, false, None, false);
    fixture.insert(2, false, None, false);
    fixture.insert(3, false, Some(0), false);
    assert_eq!(fixture.audio(), vec![vec![1], vec![3], vec![2]]);
    assert_eq!(fixture.chain.fader_pos(), 3);
}

#[test]
fn test_post_fader_insert_and_removal() {
    let mut fixture = Fixture::new(1);
    for id in 1..=4 {
        fixture.add(id, ProcessorType::AudioEffect, "LV");
    }
    fixture.insert(1, false, None, false);
    fixture.insert(2, false, None, true);
    fixture.insert(3, false, None, false);
    fixture.insert(4, false, None, true);
    assert_eq!(fixture.audio(), vec![vec![1], vec![3], vec![2], vec![4]]);
    assert_eq!(fixture.chain.fader_pos(), 2);

    // Removing a pre-fader slot pulls the fader back with it.
    assert!(fixture.remove(1));
    assert_eq!(fixture.chain.fader_pos(), 1);
    // Removing a post-fader slot leaves it alone.
    assert!(fixture.remove(4));
    assert_eq!(fixture.chain.fader_pos(), 1);
    assert!(fixture.remove(3));
    assert!(fixture.remove(2));
    assert_eq!(fixture.chain.fader_pos(), 0);
    fixture.assert_fader_in_bounds();
    assert!(!fixture.remove(2));
}

#[test]
fn test_remove_reassigns_current_processor() {
    let mut fixture = Fixture::new(1);
    fixture.add(1, ProcessorType::MidiTool, "AR");
    fixture.add(2, ProcessorType::MidiSynth, "FS");
    fixture.add(3, ProcessorType::AudioEffect, "LV");
    fixture.add(4, ProcessorType::AudioEffect, "LV");
    for id in 1..=4 {
        fixture.insert(id, false, None, false);
    }
    assert_eq!(fixture.chain.current_processor(), Some(4));

    // Same type first.
    fixture.remove(4);
    assert_eq!(fixture.chain.current_processor(), Some(3));
    // Then synth.
    fixture.remove(3);
    assert_eq!(fixture.chain.current_processor(), Some(2));
    fixture.remove(2);
    assert_eq!(fixture.chain.current_processor(), Some(1));
    fixture.remove(1);
    assert_eq!(fixture.chain.current_processor(), None);
    assert_eq!(fixture.processors[&1].chain_id(), None);
}

#[test]
fn test_nudge_up_at_start_is_refused() {
    let mut fixture = Fixture::new(1);
    fixture.add(1, ProcessorType::MidiTool, "AR");
    fixture.add(2, ProcessorType::MidiTool, "AR");
    fixture.insert(1, false, None, false);
    fixture.insert(2, false, None, false);

    assert!(!fixture.chain.nudge_processor(1, true));
    assert!(!fixture.chain.nudge_processor(2, false));
    assert_eq!(
        fixture.chain.midi_slots().slots(),
        &[vec![1], vec![2]]
    );
}

#[test]
fn test_nudge_joins_and_splits() {
    let mut fixture = Fixture::new(1);
    fixture.add(1, ProcessorType::MidiTool, "AR");
    fixture.add(2, ProcessorType::MidiTool, "AR");
    fixture.insert(1, false, None, false);
    fixture.insert(2, false, None, false);

    // Single processor joins its upper neighbour.
    assert!(fixture.chain.nudge_processor(2, true));
    assert_eq!(fixture.chain.midi_slots().slots(), &[vec![1, 2]]);
    // Parallel processor splits into its own slot before the neighbour.
    assert!(fixture.chain.nudge_processor(2, true));
    assert_eq!(fixture.chain.midi_slots().slots(), &[vec![2], vec![1]]);
    // And back down.
    assert!(fixture.chain.nudge_processor(2, false));
    assert_eq!(fixture.chain.midi_slots().slots(), &[vec![1, 2]]);
    assert!(fixture.chain.nudge_processor(2, false));
    assert_eq!(fixture.chain.midi_slots().slots(), &[vec![1], vec![2]]);
}

#[test]
fn test_nudge_crosses_fader() {
    let mut fixture = Fixture::new(1);
    fixture.add(1, ProcessorType::AudioEffect, "LV");
    fixture.add(2, ProcessorType::AudioEffect, "LV");
    fixture.insert(1, false, None, false);
    fixture.insert(2, false, None, true);
    assert_eq!(fixture.chain.fader_pos(), 1);

    // The first post-fader effect moves up across the fader without moving slot.
    assert!(fixture.chain.nudge_processor(2, true));
    assert_eq!(fixture.chain.fader_pos(), 2);
    assert_eq!(fixture.audio(), vec![vec![1], vec![2]]);

    // And back down across it.
    assert!(fixture.chain.nudge_processor(2, false));
    assert_eq!(fixture.chain.fader_pos(), 1);

    // Cross, then join the pre-fader neighbour.
    assert!(fixture.chain.nudge_processor(2, true));
    assert!(fixture.chain.nudge_processor(2, true));
    assert_eq!(fixture.audio(), vec![vec![1, 2]]);
    assert_eq!(fixture.chain.fader_pos(), 1);
    fixture.assert_fader_in_bounds();

    // Split back out, then cross downwards.
    assert!(fixture.chain.nudge_processor(2, false));
    assert_eq!(fixture.audio(), vec![vec![1], vec![2]]);
    assert_eq!(fixture.chain.fader_pos(), 2);
    assert!(fixture.chain.nudge_processor(2, false));
    assert_eq!(fixture.chain.fader_pos(), 1);
    assert!(!fixture.chain.nudge_processor(2, false));
}

#[test]
fn test_swap_processors() {
    let mut fixture = Fixture::new(1);
    fixture.add(1, ProcessorType::AudioEffect, "LV");
    fixture.add(2, ProcessorType::AudioEffect, "LV");
    fixture.add(3, ProcessorType::MidiSynth, "FS");
    fixture.insert(1, false, None, false);
    fixture.insert(2, false, None, false);
    fixture.insert(3, false, None, false);

    assert!(fixture.chain.swap_processors(1, 2));
    assert_eq!(fixture.audio(), vec![vec![2], vec![1]]);
    assert!(!fixture.chain.swap_processors(1, 3));
    assert!(!fixture.chain.swap_processors(1, 99));
}

#[test]
fn test_synth_drops_program_change() {
    let mut fixture = Fixture::new(1);
    fixture.chain.set_zmop(Some(4));
    fixture.add(1, ProcessorType::MidiTool, "AR");
    fixture.add(2, ProcessorType::MidiSynth, "FS");

    fixture.insert(1, false, None, false);
    assert!(!fixture.router.drop_pc(4));
    fixture.insert(2, false, None, false);
    assert!(fixture.router.drop_pc(4));
    assert!(fixture.router.drop_cc(4));
    fixture.remove(2);
    assert!(!fixture.router.drop_pc(4));
}

#[test]
fn test_special_processor_drops_program_change() {
    let mut fixture = Fixture::new(1);
    fixture.chain.set_zmop(Some(4));
    fixture.add(1, ProcessorType::Special, "AP");

    fixture.insert(1, false, None, false);
    assert!(fixture.chain.is_synth());
    assert!(fixture.chain.drops_program_change());
    assert!(fixture.router.drop_pc(4));
    assert!(fixture.router.drop_cc(4));
    fixture.remove(1);
    assert!(!fixture.router.drop_pc(4));
    assert!(!fixture.router.drop_cc(4));
}

#[test]
fn test_audio_routes() {
    let mut fixture = Fixture::new(1);
    fixture.chain.set_mixer_chan(Some(2));
    fixture.add(1, ProcessorType::MidiSynth, "FS");
    fixture.add(2, ProcessorType::AudioEffect, "LV");
    fixture.add(3, ProcessorType::AudioEffect, "LV");
    fixture.add(4, ProcessorType::AudioEffect, "LV");
    fixture.insert(1, false, None, false);
    fixture.insert(2, false, None, false);
    fixture.insert(3, true, Some(0), false);
    fixture.insert(4, false, None, true);
    assert!(fixture.rebuild());

    let routes = fixture.chain.audio_routes();
    assert_eq!(routes["lv-02"], vec!["fs-01"]);
    assert_eq!(routes["lv-03"], vec!["fs-01"]);
    assert_eq!(routes["mixer:input_02"], vec!["lv-02", "lv-03"]);
    assert_eq!(routes["lv-04"], vec!["mixer:output_02"]);
    assert_eq!(routes["mixer:input_16"], vec!["lv-04"]);
    assert!(!routes.contains_key("fs-01"));
}

#[test]
fn test_audio_routes_empty_chain() {
    let mut fixture = Fixture::new(1);
    fixture.chain.set_mixer_chan(Some(2));
    assert!(fixture.rebuild());
    let routes = fixture.chain.audio_routes().clone();
    assert_eq!(
        routes["mixer:input_02"],
        vec!["system:capture_1", "system:capture_2"]
    );
    assert_eq!(routes["mixer:input_16"], vec!["mixer:output_02"]);

    fixture.chain.set_audio_thru(false);
    assert!(fixture.rebuild());
    assert!(!fixture.chain.audio_routes().contains_key("mixer:input_02"));
}

#[test]
fn test_rebuild_is_idempotent() {
    let mut fixture = Fixture::new(1);
    fixture.chain.set_mixer_chan(Some(2));
    fixture.add(1, ProcessorType::AudioEffect, "LV");
    fixture.insert(1, false, None, false);
    assert!(fixture.rebuild());
    let first = fixture.chain.audio_routes().clone();
    assert!(fixture.rebuild());
    assert_eq!(&first, fixture.chain.audio_routes());
}

#[test]
fn test_rebuild_skipped_while_locked() {
    let mut fixture = Fixture::new(1);
    fixture.chain.set_mixer_chan(Some(2));
    fixture.graph.set_locked(true);
    assert!(!fixture.rebuild());
    assert!(fixture.chain.needs_rebuild());
    assert!(fixture.chain.audio_routes().is_empty());

    fixture.graph.set_locked(false);
    assert!(fixture.rebuild());
    assert!(!fixture.chain.needs_rebuild());
    assert!(!fixture.chain.audio_routes().is_empty());
}

#[test]
fn test_midi_routes() {
    let mut fixture = Fixture::new(1);
    fixture.chain.set_zmop(Some(3));
    fixture.chain.set_mixer_chan(Some(2));
    fixture.chain.set_midi_out(vec![PortRef::MidiDevice {
        index: 1,
        dir: Direction::Out,
    }]);
    fixture.add(1, ProcessorType::MidiTool, "AR");
    fixture.add(2, ProcessorType::MidiTool, "AR");
    fixture.add(3, ProcessorType::MidiSynth, "FS");
    fixture.add(4, ProcessorType::AudioEffect, "LV");
    fixture.insert(1, false, None, false);
    fixture.insert(2, false, None, false);
    fixture.insert(3, false, None, false);
    fixture.insert(4, false, None, false);
    assert!(fixture.rebuild());

    let routes = fixture.chain.midi_routes();
    assert_eq!(routes["ar-01"], vec![graph::router_output(3)]);
    assert_eq!(routes["ar-02"], vec!["ar-01"]);
    assert_eq!(routes["fs-03"], vec!["ar-02"]);
    assert_eq!(routes["lv-04"], vec!["ar-02"]);
    assert_eq!(routes["midi:out_1"], vec!["ar-02"]);
}

#[test]
fn test_midi_thru_only_when_empty() {
    let mut fixture = Fixture::new(1);
    fixture.chain.set_zmop(Some(3));
    fixture.chain.set_midi_out(vec![PortRef::MidiDevice {
        index: 0,
        dir: Direction::Out,
    }]);
    assert!(fixture.rebuild());
    assert!(fixture.chain.midi_routes().is_empty());

    fixture.chain.set_midi_thru(true);
    assert!(fixture.rebuild());
    assert_eq!(
        fixture.chain.midi_routes()["midi:out_0"],
        vec![graph::router_output(3)]
    );
}

#[test]
fn test_input_pairs() {
    let fixture = Fixture::new(1);
    assert_eq!(
        fixture.chain.get_input_pairs(),
        vec![vec![PortRef::capture(1), PortRef::capture(2)]]
    );

    let mut main = Fixture::new(0);
    main.chain.set_audio_in(vec![PortRef::capture(1), PortRef::capture(2)]);
    assert_eq!(
        main.chain.get_input_pairs(),
        vec![vec![PortRef::capture(1)], vec![PortRef::capture(2)]]
    );
    assert!(main.chain.audio_thru());
    main.chain.set_audio_thru(false);
    assert!(main.chain.audio_thru());
    main.chain.set_midi_thru(true);
    assert!(!main.chain.midi_thru());
}

#[test]
fn test_type_title_and_state() {
    let mut fixture = Fixture::new(1);
    assert_eq!(fixture.chain.get_type(), ChainType::Empty);
    fixture.add(1, ProcessorType::MidiTool, "AR");
    fixture.add(2, ProcessorType::MidiSynth, "FS");
    fixture.add(3, ProcessorType::AudioEffect, "LV");
    fixture.insert(1, false, None, false);
    assert_eq!(fixture.chain.get_type(), ChainType::Midi);
    fixture.insert(3, false, None, false);
    assert_eq!(fixture.chain.get_type(), ChainType::Audio);
    fixture.insert(2, false, None, false);
    assert_eq!(fixture.chain.get_type(), ChainType::Synth);
    assert!(fixture.chain.is_synth());

    fixture
        .processors
        .get_mut(&2)
        .expect("synth should exist")
        .set_preset_name(Some("Piano".to_string()));
    assert_eq!(fixture.chain.get_title(&fixture.processors), "FS");
    assert_eq!(fixture.chain.get_description(&fixture.processors), "FS\nPiano");
    fixture.chain.set_title(Some("Keys".to_string()));
    assert_eq!(fixture.chain.get_title(&fixture.processors), "Keys");

    assert_eq!(fixture.chain.get_processors(None, None), vec![1, 2, 3]);
    assert_eq!(
        fixture
            .chain
            .get_processors(Some(ProcessorType::AudioEffect), Some(0)),
        vec![3]
    );
    assert_eq!(fixture.chain.slot_count(None), 3);
    assert_eq!(fixture.chain.get_slot(3), Some(0));

    let state = fixture.chain.get_state(&fixture.processors);
    let slots: Vec<Vec<(ProcId, String)>> = state.slots.iter().map(|s| s.0.clone()).collect();
    assert_eq!(
        slots,
        vec![
            vec![(1, "AR".to_string())],
            vec![(2, "FS".to_string())],
            vec![(3, "LV".to_string())],
        ]
    );
    assert_eq!(state.cc_route, None);
    assert_eq!(state.fader_pos, 1);
}

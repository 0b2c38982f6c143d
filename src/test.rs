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
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{
    busy, config::Settings, engine, graph, manager::ChainManager, mixer, processor::Control,
    processor::ProcId, router,
};

/// Orders release events across controls.
static SEQUENCE: AtomicUsize = AtomicUsize::new(0);

/// A control that records what it receives.
pub struct RecordingControl {
    processor_id: ProcId,
    symbol: String,
    events: Mutex<Vec<String>>,
    released_at: Mutex<Vec<usize>>,
}

impl RecordingControl {
    pub fn new(processor_id: ProcId, symbol: &str) -> Arc<RecordingControl> {
        Arc::new(RecordingControl {
            processor_id,
            symbol: symbol.to_string(),
            events: Mutex::new(Vec::new()),
            released_at: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Returns true if this control was last released before the other one.
    pub fn released_before(&self, other: &RecordingControl) -> bool {
        match (self.released_at.lock().last(), other.released_at.lock().last()) {
            (Some(mine), Some(theirs)) => mine < theirs,
            _ => false,
        }
    }
}

impl Control for RecordingControl {
    fn processor_id(&self) -> ProcId {
        self.processor_id
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn midi_control_change(&self, value: u8, feedback: bool) {
        let event = if feedback {
            format!("cc {}", value)
        } else {
            format!("cc {} no-echo", value)
        };
        self.events.lock().push(event);
    }

    fn release(&self) {
        self.events.lock().push("release".to_string());
        self.released_at
            .lock()
            .push(SEQUENCE.fetch_add(1, Ordering::SeqCst));
    }
}

/// A chain manager wired to mock collaborators, with handles to inspect them.
pub struct Fixture {
    pub graph: Arc<graph::mock::Graph>,
    pub router: Arc<router::mock::Router>,
    pub mixer: Arc<mixer::mock::Mixer>,
    pub busy: Arc<busy::mock::Reporter>,
    pub launcher: Arc<engine::mock::Launcher>,
    pub manager: ChainManager,
}

impl Fixture {
    pub fn new() -> Fixture {
        Fixture::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Fixture {
        let graph = Arc::new(graph::mock::Graph::new());
        let router = Arc::new(router::mock::Router::new());
        let mixer = Arc::new(mixer::mock::Mixer::new(settings.mixer_channels()));
        let busy = Arc::new(busy::mock::Reporter::new());
        let launcher = Arc::new(engine::mock::Launcher::new());
        let manager = ChainManager::new(
            settings,
            graph.clone(),
            router.clone(),
            mixer.clone(),
            busy.clone(),
            launcher.clone(),
        );
        Fixture {
            graph,
            router,
            mixer,
            busy,
            launcher,
            manager,
        }
    }
}

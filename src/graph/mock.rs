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
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::debug;

/// A mock connection graph. Doesn't connect anything, but counts requests and
/// lets tests hold the lock from "another context".
#[derive(Default)]
pub struct Graph {
    locked: AtomicBool,
    audio_requests: AtomicUsize,
    midi_requests: AtomicUsize,
    fast_requests: AtomicUsize,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    /// Holds or frees the lock as if another context owned it.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    /// The number of audio reconnect requests received.
    pub fn audio_requests(&self) -> usize {
        self.audio_requests.load(Ordering::SeqCst)
    }

    /// The number of MIDI reconnect requests received.
    pub fn midi_requests(&self) -> usize {
        self.midi_requests.load(Ordering::SeqCst)
    }

    /// The number of requests flagged as fast.
    pub fn fast_requests(&self) -> usize {
        self.fast_requests.load(Ordering::SeqCst)
    }
}

impl super::ConnectionGraph for Graph {
    fn try_acquire_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release_lock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    fn request_audio_reconnect(&self, fast: bool) {
        debug!(fast, "Mock audio reconnect requested.");
        self.audio_requests.fetch_add(1, Ordering::SeqCst);
        if fast {
            self.fast_requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request_midi_reconnect(&self, fast: bool) {
        debug!(fast, "Mock MIDI reconnect requested.");
        self.midi_requests.fetch_add(1, Ordering::SeqCst);
        if fast {
            self.fast_requests.fetch_add(1, Ordering::SeqCst);
        }
    }
}

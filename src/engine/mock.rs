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
use std::collections::BTreeSet;

use parking_lot::Mutex;
use tracing::info;

use super::EngineInfo;

/// A mock launcher. Doesn't run anything, just remembers which instances are up.
#[derive(Default)]
pub struct Launcher {
    running: Mutex<BTreeSet<String>>,
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    failing: Mutex<BTreeSet<String>>,
}

impl Launcher {
    pub fn new() -> Launcher {
        Launcher::default()
    }

    /// Makes every start of the given engine code fail.
    pub fn fail_code(&self, code: &str) {
        self.failing.lock().insert(code.to_string());
    }

    /// Returns true if the instance is running.
    pub fn is_running(&self, key: &str) -> bool {
        self.running.lock().contains(key)
    }

    /// Keys of every started instance, in start order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    /// Keys of every stopped instance, in stop order.
    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }
}

impl super::EngineLauncher for Launcher {
    fn start(&self, key: &str, info: &EngineInfo) -> Result<(), String> {
        if self.failing.lock().contains(&info.code) {
            return Err(format!("{} refused to start", info.name));
        }
        info!(key, engine = info.name, "Starting engine (mock).");
        self.running.lock().insert(key.to_string());
        self.started.lock().push(key.to_string());
        Ok(())
    }

    fn stop(&self, key: &str) {
        info!(key, "Stopping engine (mock).");
        self.running.lock().remove(key);
        self.stopped.lock().push(key.to_string());
    }
}

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
use parking_lot::Mutex;

/// A mock reporter. Records every call as a line of text.
#[derive(Default)]
pub struct Reporter {
    open: Mutex<Vec<String>>,
    events: Mutex<Vec<String>>,
}

impl Reporter {
    pub fn new() -> Reporter {
        Reporter::default()
    }

    /// The recorded calls, oldest first.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl super::BusyReporter for Reporter {
    fn begin(&self, op_id: &str, title: Option<&str>, _detail: Option<&str>) {
        self.open.lock().push(op_id.to_string());
        self.events
            .lock()
            .push(format!("begin {}: {}", op_id, title.unwrap_or_default()));
    }

    fn end(&self, op_id: &str) {
        self.open.lock().retain(|open| open != op_id);
        self.events.lock().push(format!("end {}", op_id));
    }

    fn set_detail(&self, text: &str) {
        self.events.lock().push(format!("detail {}", text));
    }

    fn is_busy(&self) -> bool {
        !self.open.lock().is_empty()
    }
}

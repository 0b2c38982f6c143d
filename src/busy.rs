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
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

pub mod mock;

/// Reports long-running structural operations to the user interface.
pub trait BusyReporter: Send + Sync {
    /// Opens the busy indicator for an operation.
    fn begin(&self, op_id: &str, title: Option<&str>, detail: Option<&str>);

    /// Closes the busy indicator for an operation.
    fn end(&self, op_id: &str);

    /// Updates the sub-status of the open operation.
    fn set_detail(&self, text: &str);

    /// Returns true while an operation is open.
    fn is_busy(&self) -> bool;
}

/// Holds the busy indicator open for the lifetime of an operation. If another
/// operation already holds it, the nested operation only reports its title as a
/// sub-status and leaves the indicator alone when dropped.
pub struct BusyGuard {
    reporter: Arc<dyn BusyReporter>,
    op_id: String,
    owner: bool,
}

impl BusyGuard {
    pub fn new(reporter: Arc<dyn BusyReporter>, op_id: &str, title: &str) -> BusyGuard {
        let owner = !reporter.is_busy();
        if owner {
            reporter.begin(op_id, Some(title), None);
        } else {
            reporter.set_detail(title);
        }
        BusyGuard {
            reporter,
            op_id: op_id.to_string(),
            owner,
        }
    }

    /// Updates the sub-status.
    pub fn detail(&self, text: &str) {
        self.reporter.set_detail(text);
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if self.owner {
            self.reporter.end(&self.op_id);
        }
    }
}

/// A reporter that writes progress to the log.
#[derive(Default)]
pub struct TracingReporter {
    current: Mutex<Option<String>>,
}

impl TracingReporter {
    pub fn new() -> TracingReporter {
        TracingReporter::default()
    }
}

impl BusyReporter for TracingReporter {
    fn begin(&self, op_id: &str, title: Option<&str>, detail: Option<&str>) {
        info!(op = op_id, title, detail, "Busy.");
        *self.current.lock() = Some(op_id.to_string());
    }

    fn end(&self, op_id: &str) {
        info!(op = op_id, "Done.");
        let mut current = self.current.lock();
        if current.as_deref() == Some(op_id) {
            *current = None;
        }
    }

    fn set_detail(&self, text: &str) {
        info!(detail = text, "Busy.");
    }

    fn is_busy(&self) -> bool {
        self.current.lock().is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_nested_guard_reports_detail() {
        let reporter = Arc::new(mock::Reporter::new());
        {
            let _outer = BusyGuard::new(reporter.clone(), "remove_chain", "Removing chain");
            assert!(reporter.is_busy());
            {
                let _inner =
                    BusyGuard::new(reporter.clone(), "remove_processor", "Removing processor");
                assert!(reporter.is_busy());
            }
            assert!(reporter.is_busy());
        }
        assert!(!reporter.is_busy());
        assert_eq!(
            reporter.events(),
            vec![
                "begin remove_chain: Removing chain".to_string(),
                "detail Removing processor".to_string(),
                "end remove_chain".to_string(),
            ]
        );
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter::new();
        assert!(!reporter.is_busy());
        reporter.begin("add_chain", Some("Adding chain"), None);
        assert!(reporter.is_busy());
        reporter.end("other");
        assert!(reporter.is_busy());
        reporter.end("add_chain");
        assert!(!reporter.is_busy());
    }
}

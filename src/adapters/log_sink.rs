//! Log-based report sink adapter.
//!
//! Implements [`ReportSink`] by writing every touch report to the logger.
//! Useful for bring-up and for hosts with no input layer attached.

use log::info;

use crate::app::ports::{ReportError, ReportSink};
use crate::msg::Contact;

/// Adapter that logs each frame as one line per contact.
pub struct LogReportSink {
    name: String,
    open: bool,
    contacts: usize,
}

impl LogReportSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            open: false,
            contacts: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl ReportSink for LogReportSink {
    fn configure(&mut self, x_range: u16, y_range: u16) -> Result<(), ReportError> {
        info!("{}: REPORT | open x=0..{} y=0..{}", self.name, x_range, y_range);
        self.open = true;
        Ok(())
    }

    fn contact(&mut self, c: &Contact) {
        self.contacts += 1;
        info!(
            "{}: TOUCH | id={} tool={:?} x={} y={} z={}",
            self.name, c.id, c.tool, c.x, c.y, c.pressure
        );
    }

    fn eraser(&mut self, active: bool) {
        info!(
            "{}: ERASER | {}",
            self.name,
            if active { "in" } else { "out" }
        );
    }

    fn sync(&mut self) {
        info!("{}: SYNC | {} contacts", self.name, self.contacts);
        self.contacts = 0;
    }

    fn release(&mut self) {
        info!("{}: REPORT | closed", self.name);
        self.open = false;
    }
}

//! Touch-report handling: turns companion frames into sink calls.

use log::{info, warn};

use super::worker::Device;
use crate::chip::Bus;
use crate::msg::{ToolType, TouchFrame};

impl<B: Bus> Device<B> {
    /// Open the report channel with the given axis ranges, replacing any
    /// channel already open.
    pub(crate) fn configure_reporting(&mut self, x_range: u16, y_range: u16) {
        self.release_reporting();
        match self.reports.configure(x_range, y_range) {
            Ok(()) => {
                info!(
                    "{}: reporting configured {}x{}",
                    self.config.channel_name, x_range, y_range
                );
                self.reporting = true;
            }
            Err(e) => warn!("{}: {}", self.config.channel_name, e),
        }
    }

    pub(crate) fn release_reporting(&mut self) {
        if self.reporting {
            self.reports.release();
            self.reporting = false;
            self.eraser_active = false;
        }
    }

    pub(crate) fn report_frame(&mut self, frame: &TouchFrame) {
        if !self.reporting {
            warn!(
                "{}: touch frame with no report channel",
                self.config.channel_name
            );
            return;
        }

        if frame.is_empty() {
            if self.eraser_active {
                self.reports.eraser(false);
                self.eraser_active = false;
            }
            self.reports.sync();
            return;
        }

        for contact in frame {
            match contact.tool {
                ToolType::Finger | ToolType::Stylus => {}
                ToolType::Eraser => {
                    if !self.eraser_active {
                        self.reports.eraser(true);
                        self.eraser_active = true;
                    }
                }
                ToolType::Unknown(v) => {
                    warn!(
                        "{}: contact {} has unknown tool {}",
                        self.config.channel_name, contact.id, v
                    );
                }
            }
            self.reports.contact(contact);
        }
        self.reports.sync();
    }

    /// Undo ConfigReporting and ConfigIrq, leaving sensing halted.
    pub(crate) fn deconfigure(&mut self) {
        self.release_reporting();
        if self.irq_registered {
            self.platform.free_irq();
            self.irq_registered = false;
        }
        self.stop_scan();
    }
}

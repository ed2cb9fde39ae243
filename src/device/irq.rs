//! Interrupt bridge: ping-pong buffer selection and sensing control.
//!
//! The companion describes the chip's interrupt layout as up to
//! [`MAX_IRQ_PARAMS`] words:
//!
//! ```text
//!  [0] status addr   [1] buf0 addr    [2] buf1 addr    [3] data len (B)
//!  [4] selector mask [5] buf0 mask    [6] buf1 mask    [7] status clear
//!  [8] scan ctl addr [9] stop value   [10] start value [11] stop settle µs
//! ```

use log::{debug, error, warn};

use super::worker::{Destination, Device};
use crate::chip::{Bus, ChipAccess};
use crate::error::{Error, ProtocolError, TransportError};
use crate::msg::FusionKind;

/// Words in the interrupt parameter block.
pub const MAX_IRQ_PARAMS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrqParams {
    words: [u16; MAX_IRQ_PARAMS],
}

impl IrqParams {
    pub const fn from_words(words: [u16; MAX_IRQ_PARAMS]) -> Self {
        Self { words }
    }

    /// Build from little-endian word pairs. `None` when there are more
    /// than [`MAX_IRQ_PARAMS`] words or the length is odd.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 2 != 0 || bytes.len() / 2 > MAX_IRQ_PARAMS {
            return None;
        }
        let mut words = [0u16; MAX_IRQ_PARAMS];
        for (w, pair) in words.iter_mut().zip(bytes.chunks_exact(2)) {
            *w = u16::from_le_bytes([pair[0], pair[1]]);
        }
        Some(Self { words })
    }

    pub fn words(&self) -> &[u16; MAX_IRQ_PARAMS] {
        &self.words
    }

    pub fn status_address(&self) -> u16 {
        self.words[0]
    }

    pub fn buffer_address(&self, index: usize) -> u16 {
        self.words[1 + (index & 1)]
    }

    pub fn data_len(&self) -> usize {
        usize::from(self.words[3])
    }

    pub fn selector_mask(&self) -> u16 {
        self.words[4]
    }

    pub fn buffer_mask(&self, index: usize) -> u16 {
        self.words[5 + (index & 1)]
    }

    pub fn status_clear(&self) -> u16 {
        self.words[7]
    }

    pub fn scan_control_address(&self) -> u16 {
        self.words[8]
    }

    pub fn stop_scan_value(&self) -> u16 {
        self.words[9]
    }

    pub fn start_scan_value(&self) -> u16 {
        self.words[10]
    }

    pub fn stop_settle_us(&self) -> u32 {
        u32::from(self.words[11])
    }
}

/// What a status word says about the ping-pong buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSelect {
    /// No buffer bit set.
    Idle,
    Buffer(usize),
    /// Unexpected bit pattern; carries the masked status.
    Invalid(u16),
}

pub fn select_buffer(status: u16, params: &IrqParams) -> BufferSelect {
    let m0 = params.buffer_mask(0);
    let m1 = params.buffer_mask(1);
    let test = status & (m0 | m1);
    if test == 0 {
        BufferSelect::Idle
    } else if test == m0 | m1 {
        // Both live: the selector bit breaks the tie.
        let index = usize::from(status & params.selector_mask() != 0);
        BufferSelect::Buffer(index)
    } else if test == m0 {
        BufferSelect::Buffer(0)
    } else if test == m1 {
        BufferSelect::Buffer(1)
    } else {
        BufferSelect::Invalid(test)
    }
}

impl<B: Bus> Device<B> {
    /// Forward one ready buffer to the fusion group. The status bits are
    /// acknowledged whatever the data read returned.
    pub(crate) fn service_irq(&mut self) {
        self.reports.activity();
        let params = self.irq;

        let status = match self.transport.read_word(params.status_address()) {
            Ok(s) => s,
            Err(e) => {
                error!(
                    "{}: irq status read at {:#06x} failed: {}",
                    self.config.channel_name,
                    params.status_address(),
                    e
                );
                return;
            }
        };

        let (index, ack) = match select_buffer(status, &params) {
            BufferSelect::Idle => return,
            BufferSelect::Buffer(i) => (i, params.buffer_mask(i)),
            BufferSelect::Invalid(test) => {
                error!(
                    "{}: unexpected irq status {:#06x} (masked {:#06x})",
                    self.config.channel_name, status, test
                );
                self.acknowledge_irq(params.status_address(), test);
                return;
            }
        };

        let read = self.read_async_data(params.buffer_address(index), params.data_len());
        self.acknowledge_irq(params.status_address(), ack);

        match read {
            Ok(()) => {
                if let Err(e) = self.flush(Destination::Fusion) {
                    warn!("{}: async data broadcast failed: {}", self.config.channel_name, e);
                }
            }
            Err(e) => {
                error!(
                    "{}: irq data read of {} bytes at {:#06x} failed: {}",
                    self.config.channel_name,
                    params.data_len(),
                    params.buffer_address(index),
                    e
                );
            }
        }
    }

    fn read_async_data(&mut self, address: u16, len: usize) -> Result<(), Error> {
        let out = self
            .outbound
            .as_mut()
            .ok_or(ProtocolError::AllocationFailed)?;
        let mark = out.mark();
        let slot = out
            .alloc_attr(FusionKind::AsyncData.id(), 4 + len)
            .ok_or(ProtocolError::AllocationFailed)?;
        slot[0..2].copy_from_slice(&address.to_le_bytes());
        slot[2..4].copy_from_slice(&(len as u16).to_le_bytes());
        if let Err(e) = self.transport.read(address, &mut slot[4..]) {
            out.truncate_to(mark);
            return Err(e.into());
        }
        Ok(())
    }

    fn acknowledge_irq(&mut self, status_address: u16, mask: u16) {
        if let Err(e) = self.transport.write_word(status_address, mask) {
            error!(
                "{}: irq acknowledge {:#06x} at {:#06x} failed: {}",
                self.config.channel_name, mask, status_address, e
            );
        }
    }

    /// Halt sensing and clear any latched status.
    pub(crate) fn stop_scan(&mut self) {
        debug!("{}: stop scan", self.config.channel_name);
        if let Err(e) = self.halt_sensing() {
            error!("{}: stop scan failed: {}", self.config.channel_name, e);
        }
    }

    fn halt_sensing(&mut self) -> Result<(), TransportError> {
        let p = self.irq;
        self.transport
            .write_word(p.scan_control_address(), p.stop_scan_value())?;
        self.transport
            .write_word(p.status_address(), p.status_clear())?;
        self.delay.delay_us(p.stop_settle_us());
        self.transport
            .write_word(p.status_address(), p.status_clear())
    }

    pub(crate) fn start_scan(&mut self) {
        let p = self.irq;
        debug!("{}: start scan", self.config.channel_name);
        if let Err(e) = self
            .transport
            .write_word(p.scan_control_address(), p.start_scan_value())
        {
            error!("{}: start scan failed: {}", self.config.channel_name, e);
        }
    }
}

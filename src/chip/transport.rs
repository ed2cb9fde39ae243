//! Framed chip transport with three wire encodings.
//!
//! Every frame starts with a control word `(address << 1) | rw`, big-endian
//! on the wire, as are all payload words. Callers hand in and receive
//! payloads as little-endian byte pairs (host word order).
//!
//! | Method | Encoding         | Frame                                        |
//! |--------|------------------|----------------------------------------------|
//! | 1      | `LengthPrefixed` | control, word count, payload                 |
//! | 2      | `Paged`          | page request at 0x0000, poll, data at 0x0003 |
//! | 3      | `Raw`            | control, payload                             |
//!
//! Reads are full-duplex frames: the header is clocked out followed by
//! 0xFF fill, and the payload is captured after the header.

use log::warn;

use super::bus::{Bus, retry_frame};
use crate::error::TransportError;

/// Largest page the paged encoding moves in one request.
pub const PAGE_WORDS: usize = 250;

const PAGE_REQUEST: u16 = 0xFEDC;
const PAGE_READY: u16 = 0xABCD;
const PAGE_STATUS_POLLS: usize = 200;
const PAGE_CONTROL_ADDR: u16 = 0x0000;
const PAGE_DATA_ADDR: u16 = 0x0003;

const READ_BIT: u16 = 0x0001;
const FILL: u8 = 0xFF;

// ── Encoding ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    LengthPrefixed = 1,
    Paged = 2,
    Raw = 3,
}

impl Encoding {
    /// Configuration value selecting this encoding.
    pub const fn method(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Encoding {
    type Error = TransportError;

    fn try_from(method: u8) -> Result<Self, Self::Error> {
        match method {
            1 => Ok(Self::LengthPrefixed),
            2 => Ok(Self::Paged),
            3 => Ok(Self::Raw),
            other => Err(TransportError::InvalidConfiguration(other)),
        }
    }
}

// ── Access trait ──────────────────────────────────────────────

/// Word-addressed read/write access to chip memory.
///
/// Buffer lengths are in bytes and must be even.
pub trait ChipAccess {
    /// Fill `buf` from chip memory starting at `address`.
    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Store `data` into chip memory starting at `address`.
    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError>;

    fn read_word(&mut self, address: u16) -> Result<u16, TransportError> {
        let mut word = [0u8; 2];
        self.read(address, &mut word)?;
        Ok(u16::from_le_bytes(word))
    }

    fn write_word(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        self.write(address, &value.to_le_bytes())
    }
}

// ── Transport ─────────────────────────────────────────────────

/// Chip transport over a [`Bus`], owning reusable frame buffers.
pub struct Transport<B> {
    bus: B,
    encoding: Encoding,
    capacity: usize,
    tx: Vec<u8>,
    rx: Vec<u8>,
}

impl<B: Bus> Transport<B> {
    /// `capacity` bounds a single frame, header included.
    pub fn new(bus: B, encoding: Encoding, capacity: usize) -> Self {
        Self {
            bus,
            encoding,
            capacity,
            tx: Vec::with_capacity(capacity),
            rx: Vec::with_capacity(capacity),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rebuild the framing state for a new encoding. Frame buffers are
    /// released and reallocated, only the bus survives.
    pub fn rebuild(&mut self, encoding: Encoding) {
        self.encoding = encoding;
        self.tx = Vec::with_capacity(self.capacity);
        self.rx = Vec::with_capacity(self.capacity);
    }

    /// Access through raw (method 3) frames regardless of the selected
    /// encoding. The bootloader only speaks this framing.
    pub fn raw(&mut self) -> RawAccess<'_, B> {
        RawAccess { transport: self }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    fn frame_len(&self, payload: usize, header_words: usize) -> Result<usize, TransportError> {
        if payload % 2 != 0 {
            return Err(TransportError::Misaligned(payload));
        }
        let len = payload + header_words * 2;
        if len > self.capacity {
            return Err(TransportError::FrameTooLarge {
                len,
                capacity: self.capacity,
            });
        }
        Ok(len)
    }

    fn frame_read(
        &mut self,
        address: u16,
        buf: &mut [u8],
        with_len: bool,
    ) -> Result<(), TransportError> {
        let header_words = 1 + usize::from(with_len);
        let len = self.frame_len(buf.len(), header_words)?;
        let Self { bus, tx, rx, .. } = self;

        tx.clear();
        tx.resize(len, FILL);
        tx[..2].copy_from_slice(&((address << 1) | READ_BIT).to_be_bytes());
        if with_len {
            tx[2..4].copy_from_slice(&((buf.len() / 2) as u16).to_be_bytes());
        }
        rx.clear();
        rx.resize(len, 0);

        retry_frame(|| bus.transfer(&tx[..], &mut rx[..]))?;

        for (dst, src) in buf
            .chunks_exact_mut(2)
            .zip(rx[header_words * 2..].chunks_exact(2))
        {
            dst[0] = src[1];
            dst[1] = src[0];
        }
        Ok(())
    }

    fn frame_write(
        &mut self,
        address: u16,
        data: &[u8],
        with_len: bool,
    ) -> Result<(), TransportError> {
        let header_words = 1 + usize::from(with_len);
        let len = self.frame_len(data.len(), header_words)?;
        let Self { bus, tx, .. } = self;

        tx.clear();
        tx.reserve(len);
        tx.extend_from_slice(&(address << 1).to_be_bytes());
        if with_len {
            tx.extend_from_slice(&((data.len() / 2) as u16).to_be_bytes());
        }
        for word in data.chunks_exact(2) {
            tx.push(word[1]);
            tx.push(word[0]);
        }

        let sent = retry_frame(|| bus.write(&tx[..]));
        tx.fill(FILL);
        sent
    }

    // -- Paged encoding --------------------------------------------------

    fn poll_page_ready(&mut self) -> Result<(), TransportError> {
        let mut status = [0u8; 2];
        for _ in 0..PAGE_STATUS_POLLS {
            self.frame_read(PAGE_CONTROL_ADDR, &mut status, false)?;
            if u16::from_le_bytes(status) == PAGE_READY {
                return Ok(());
            }
        }
        warn!(
            "paged transfer: status {:#06x} after {} polls, expected {:#06x}",
            u16::from_le_bytes(status),
            PAGE_STATUS_POLLS,
            PAGE_READY
        );
        Err(TransportError::Timeout)
    }

    fn read_page(&mut self, address: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        let request = page_request((address << 1) | READ_BIT, buf.len());
        self.frame_write(PAGE_CONTROL_ADDR, &request, false)?;
        self.poll_page_ready()?;
        self.frame_read(PAGE_DATA_ADDR, buf, false)
    }

    fn write_page(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError> {
        let mut page = Vec::with_capacity(6 + data.len());
        page.extend_from_slice(&page_request(address << 1, data.len()));
        page.extend_from_slice(data);
        self.frame_write(PAGE_CONTROL_ADDR, &page, false)?;
        self.poll_page_ready()
    }
}

/// Page request header words in host order: marker, control word, count.
fn page_request(control: u16, len: usize) -> [u8; 6] {
    let mut header = [0u8; 6];
    header[..2].copy_from_slice(&PAGE_REQUEST.to_le_bytes());
    header[2..4].copy_from_slice(&control.to_le_bytes());
    header[4..].copy_from_slice(&((len / 2) as u16).to_le_bytes());
    header
}

fn page_address(address: u16, page: usize) -> u16 {
    address.wrapping_add((page * PAGE_WORDS) as u16)
}

impl<B: Bus> ChipAccess for Transport<B> {
    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        match self.encoding {
            Encoding::LengthPrefixed => self.frame_read(address, buf, true),
            Encoding::Raw => self.frame_read(address, buf, false),
            Encoding::Paged => {
                if buf.len() % 2 != 0 {
                    return Err(TransportError::Misaligned(buf.len()));
                }
                for (page, chunk) in buf.chunks_mut(PAGE_WORDS * 2).enumerate() {
                    self.read_page(page_address(address, page), chunk)?;
                }
                Ok(())
            }
        }
    }

    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError> {
        match self.encoding {
            Encoding::LengthPrefixed => self.frame_write(address, data, true),
            Encoding::Raw => self.frame_write(address, data, false),
            Encoding::Paged => {
                if data.len() % 2 != 0 {
                    return Err(TransportError::Misaligned(data.len()));
                }
                for (page, chunk) in data.chunks(PAGE_WORDS * 2).enumerate() {
                    self.write_page(page_address(address, page), chunk)?;
                }
                Ok(())
            }
        }
    }
}

/// Borrowed view of a [`Transport`] that always uses raw frames.
pub struct RawAccess<'a, B> {
    transport: &'a mut Transport<B>,
}

impl<B: Bus> ChipAccess for RawAccess<'_, B> {
    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        self.transport.frame_read(address, buf, false)
    }

    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError> {
        self.transport.frame_write(address, data, false)
    }
}

//! Attribute message codec.
//!
//! Wire format (all fields little-endian):
//! ```text
//! ┌──────────┬────────────┬──────────┬─────────┬──────────┐
//! │ size u16 │ channel u16│ seq u32  │ dst u8  │ rsvd 3B  │  header
//! └──────────┴────────────┴──────────┴─────────┴──────────┘
//! ┌──────────┬──────────┬─────────────────────┬─────────┐
//! │ len u16  │ type u16 │ payload (len - 4 B) │ pad → 4 │  × N attributes
//! └──────────┴──────────┴─────────────────────┴─────────┘
//! ```
//!
//! `size` covers the header and every attribute. `len` covers the
//! attribute header and payload but not the padding.

use crate::error::ProtocolError;

/// Message header size in bytes.
pub const HEADER_SIZE: usize = 12;

/// Attribute header size in bytes.
pub const ATTR_HEADER_SIZE: usize = 4;

const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

// ── Header ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub size: u16,
    pub channel: u16,
    pub seq: u32,
    pub dst: u8,
}

impl MessageHeader {
    /// Split `buf` into its header and attribute region.
    pub fn parse(buf: &[u8]) -> Result<(Self, &[u8]), ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedMessage);
        }
        let header = Self {
            size: u16::from_le_bytes([buf[0], buf[1]]),
            channel: u16::from_le_bytes([buf[2], buf[3]]),
            seq: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            dst: buf[8],
        };
        let size = usize::from(header.size);
        if size < HEADER_SIZE || size > buf.len() {
            return Err(ProtocolError::MalformedMessage);
        }
        Ok((header, &buf[HEADER_SIZE..size]))
    }

    fn write(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.size.to_le_bytes());
        out[2..4].copy_from_slice(&self.channel.to_le_bytes());
        out[4..8].copy_from_slice(&self.seq.to_le_bytes());
        out[8] = self.dst;
        out[9..12].fill(0);
    }
}

/// Read just the channel id, for routing before full parsing.
pub fn peek_channel(buf: &[u8]) -> Option<u16> {
    (buf.len() >= HEADER_SIZE).then(|| u16::from_le_bytes([buf[2], buf[3]]))
}

// ── Attributes ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute<'a> {
    pub kind: u16,
    pub payload: &'a [u8],
}

/// Iterator over the attributes of a parsed message. Yields an error and
/// then stops when framing is inconsistent.
pub struct Attributes<'a> {
    rest: &'a [u8],
}

impl<'a> Attributes<'a> {
    pub fn new(region: &'a [u8]) -> Self {
        Self { rest: region }
    }
}

impl<'a> Iterator for Attributes<'a> {
    type Item = Result<Attribute<'a>, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let rest = core::mem::take(&mut self.rest);
        if rest.len() < ATTR_HEADER_SIZE {
            return Some(Err(ProtocolError::MalformedMessage));
        }
        let len = usize::from(u16::from_le_bytes([rest[0], rest[1]]));
        let kind = u16::from_le_bytes([rest[2], rest[3]]);
        if len < ATTR_HEADER_SIZE || len > rest.len() {
            return Some(Err(ProtocolError::MalformedMessage));
        }
        self.rest = &rest[align4(len).min(rest.len())..];
        Some(Ok(Attribute {
            kind,
            payload: &rest[ATTR_HEADER_SIZE..len],
        }))
    }
}

// ── Outbound composition ──────────────────────────────────────

/// Composition point of an [`OutboundMessage`], taken with
/// [`OutboundMessage::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    len: usize,
    attrs: usize,
}

/// A message under composition. Consumed by [`OutboundMessage::finish`],
/// so a composed buffer can only be sent once.
#[derive(Debug)]
pub struct OutboundMessage {
    header: MessageHeader,
    buf: Vec<u8>,
    capacity: usize,
    attrs: usize,
}

impl OutboundMessage {
    /// Reserve `capacity` bytes up front; fails instead of aborting when
    /// memory is short.
    pub fn try_new(
        channel: u16,
        seq: u32,
        dst: u8,
        capacity: usize,
    ) -> Result<Self, ProtocolError> {
        if capacity < HEADER_SIZE || capacity > usize::from(u16::MAX) {
            return Err(ProtocolError::AllocationFailed);
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| ProtocolError::AllocationFailed)?;
        buf.resize(HEADER_SIZE, 0);
        Ok(Self {
            header: MessageHeader {
                size: HEADER_SIZE as u16,
                channel,
                seq,
                dst,
            },
            buf,
            capacity,
            attrs: 0,
        })
    }

    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    /// Number of attributes appended so far.
    pub fn len(&self) -> usize {
        self.attrs
    }

    pub fn is_empty(&self) -> bool {
        self.attrs == 0
    }

    pub fn mark(&self) -> Mark {
        Mark {
            len: self.buf.len(),
            attrs: self.attrs,
        }
    }

    /// Drop every attribute appended after `mark`.
    pub fn truncate_to(&mut self, mark: Mark) {
        if mark.len >= HEADER_SIZE && mark.len <= self.buf.len() {
            self.buf.truncate(mark.len);
            self.attrs = mark.attrs;
        }
    }

    /// Append an attribute with a zeroed payload of `len` bytes and return
    /// the payload for the caller to fill. `None` when it does not fit.
    pub fn alloc_attr(&mut self, kind: u16, len: usize) -> Option<&mut [u8]> {
        let total = ATTR_HEADER_SIZE + len;
        let start = self.buf.len();
        if total > usize::from(u16::MAX) || start + align4(total) > self.capacity {
            return None;
        }
        self.buf.extend_from_slice(&(total as u16).to_le_bytes());
        self.buf.extend_from_slice(&kind.to_le_bytes());
        self.buf.resize(start + align4(total), 0);
        self.attrs += 1;
        Some(&mut self.buf[start + ATTR_HEADER_SIZE..start + total])
    }

    /// Append an attribute carrying `payload`.
    pub fn add_attr(&mut self, kind: u16, payload: &[u8]) -> Result<(), ProtocolError> {
        let slot = self
            .alloc_attr(kind, payload.len())
            .ok_or(ProtocolError::AllocationFailed)?;
        slot.copy_from_slice(payload);
        Ok(())
    }

    /// Seal the header and hand back the wire bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.header.size = self.buf.len() as u16;
        let header = self.header;
        header.write(&mut self.buf[..HEADER_SIZE]);
        self.buf
    }
}

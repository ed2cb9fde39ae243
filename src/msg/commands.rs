//! Typed commands carried in attributes.
//!
//! Driver-bound attributes decode into [`DriverCommand`]; fusion-bound
//! attribute types are listed in [`FusionKind`]. Payload fields are
//! little-endian and packed.

use heapless::Vec;

use super::codec::{Attribute, OutboundMessage};
use crate::app::ports::IrqTrigger;
use crate::error::ProtocolError;

/// Most contacts one touch frame may carry.
pub const MAX_TOUCH_EVENTS: usize = 10;

/// Fixed width of a broadcast group name field.
pub const GROUP_NAME_LEN: usize = 16;

const CONTACT_SIZE: usize = 8;

// ── Attribute types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DriverKind {
    AddBroadcastGroup = 0,
    Echo = 1,
    ChipRead = 2,
    ChipWrite = 3,
    ChipReset = 4,
    GetIrqLine = 5,
    Delay = 6,
    SelectEncoding = 7,
    ConfigIrq = 8,
    ConfigReporting = 9,
    Deconfig = 10,
    ReportTouchFrame = 11,
    LegacyFirmwareDownload = 12,
}

impl TryFrom<u16> for DriverKind {
    type Error = ProtocolError;

    fn try_from(kind: u16) -> Result<Self, Self::Error> {
        Ok(match kind {
            0 => Self::AddBroadcastGroup,
            1 => Self::Echo,
            2 => Self::ChipRead,
            3 => Self::ChipWrite,
            4 => Self::ChipReset,
            5 => Self::GetIrqLine,
            6 => Self::Delay,
            7 => Self::SelectEncoding,
            8 => Self::ConfigIrq,
            9 => Self::ConfigReporting,
            10 => Self::Deconfig,
            11 => Self::ReportTouchFrame,
            12 => Self::LegacyFirmwareDownload,
            other => return Err(ProtocolError::UnknownCommand(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FusionKind {
    EchoResponse = 1,
    ChipReadResult = 2,
    IrqLineStatus = 3,
    AsyncData = 4,
    Resume = 5,
}

impl FusionKind {
    pub const fn id(self) -> u16 {
        self as u16
    }
}

// ── Touch reports ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolType {
    Finger,
    Stylus,
    Eraser,
    Unknown(u8),
}

impl From<u8> for ToolType {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Finger,
            1 => Self::Stylus,
            2 => Self::Eraser,
            other => Self::Unknown(other),
        }
    }
}

impl From<ToolType> for u8 {
    fn from(t: ToolType) -> Self {
        match t {
            ToolType::Finger => 0,
            ToolType::Stylus => 1,
            ToolType::Eraser => 2,
            ToolType::Unknown(v) => v,
        }
    }
}

/// One contact in a touch frame, as computed by the companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contact {
    pub id: u8,
    pub tool: ToolType,
    pub x: u16,
    pub y: u16,
    pub pressure: u16,
}

/// All contacts of one sensing frame; empty means everything lifted.
pub type TouchFrame = Vec<Contact, MAX_TOUCH_EVENTS>;

// ── Driver commands ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCommand<'a> {
    AddBroadcastGroup { number: u8, name: &'a str },
    Echo { cookie: u32 },
    ChipRead { address: u16, length: u16 },
    ChipWrite { address: u16, data: &'a [u8] },
    ChipReset { state: bool },
    GetIrqLine,
    Delay { period_us: u32 },
    SelectEncoding { method: u8 },
    /// `words` holds `count` little-endian parameter words.
    ConfigIrq { count: u8, trigger: IrqTrigger, words: &'a [u8] },
    ConfigReporting { x_range: u16, y_range: u16 },
    Deconfig,
    ReportTouchFrame(TouchFrame),
    LegacyFirmwareDownload,
}

/// Bounds-checked cursor over a payload.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if n > self.buf.len() {
            return Err(ProtocolError::MalformedMessage);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

impl<'a> DriverCommand<'a> {
    /// Decode one attribute. Unknown types yield `UnknownCommand`; short or
    /// inconsistent payloads yield `MalformedMessage`.
    pub fn parse(attr: Attribute<'a>) -> Result<Self, ProtocolError> {
        let kind = DriverKind::try_from(attr.kind)?;
        let mut r = Reader { buf: attr.payload };
        Ok(match kind {
            DriverKind::AddBroadcastGroup => {
                let number = r.u8()?;
                let field = r.bytes(GROUP_NAME_LEN)?;
                let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
                let name = core::str::from_utf8(&field[..end])
                    .map_err(|_| ProtocolError::MalformedMessage)?;
                Self::AddBroadcastGroup { number, name }
            }
            DriverKind::Echo => Self::Echo { cookie: r.u32()? },
            DriverKind::ChipRead => Self::ChipRead {
                address: r.u16()?,
                length: r.u16()?,
            },
            DriverKind::ChipWrite => {
                let address = r.u16()?;
                let length = r.u16()?;
                Self::ChipWrite {
                    address,
                    data: r.bytes(usize::from(length))?,
                }
            }
            DriverKind::ChipReset => Self::ChipReset { state: r.u8()? != 0 },
            DriverKind::GetIrqLine => Self::GetIrqLine,
            DriverKind::Delay => Self::Delay { period_us: r.u32()? },
            DriverKind::SelectEncoding => Self::SelectEncoding { method: r.u8()? },
            DriverKind::ConfigIrq => {
                let count = r.u8()?;
                let trigger = IrqTrigger::try_from(r.u8()?)?;
                Self::ConfigIrq {
                    count,
                    trigger,
                    words: r.bytes(usize::from(count) * 2)?,
                }
            }
            DriverKind::ConfigReporting => Self::ConfigReporting {
                x_range: r.u16()?,
                y_range: r.u16()?,
            },
            DriverKind::Deconfig => Self::Deconfig,
            DriverKind::ReportTouchFrame => {
                let events = usize::from(r.u8()?);
                let mut frame = TouchFrame::new();
                for _ in 0..events {
                    let contact = Contact {
                        id: r.u8()?,
                        tool: ToolType::from(r.u8()?),
                        x: r.u16()?,
                        y: r.u16()?,
                        pressure: r.u16()?,
                    };
                    frame
                        .push(contact)
                        .map_err(|_| ProtocolError::MalformedMessage)?;
                }
                Self::ReportTouchFrame(frame)
            }
            DriverKind::LegacyFirmwareDownload => Self::LegacyFirmwareDownload,
        })
    }

    pub fn kind(&self) -> DriverKind {
        match self {
            Self::AddBroadcastGroup { .. } => DriverKind::AddBroadcastGroup,
            Self::Echo { .. } => DriverKind::Echo,
            Self::ChipRead { .. } => DriverKind::ChipRead,
            Self::ChipWrite { .. } => DriverKind::ChipWrite,
            Self::ChipReset { .. } => DriverKind::ChipReset,
            Self::GetIrqLine => DriverKind::GetIrqLine,
            Self::Delay { .. } => DriverKind::Delay,
            Self::SelectEncoding { .. } => DriverKind::SelectEncoding,
            Self::ConfigIrq { .. } => DriverKind::ConfigIrq,
            Self::ConfigReporting { .. } => DriverKind::ConfigReporting,
            Self::Deconfig => DriverKind::Deconfig,
            Self::ReportTouchFrame(_) => DriverKind::ReportTouchFrame,
            Self::LegacyFirmwareDownload => DriverKind::LegacyFirmwareDownload,
        }
    }

    /// Append this command as an attribute, the way the companion sends it.
    pub fn encode_into(&self, msg: &mut OutboundMessage) -> Result<(), ProtocolError> {
        let mut payload = std::vec::Vec::new();
        match self {
            Self::AddBroadcastGroup { number, name } => {
                payload.push(*number);
                let mut field = [0u8; GROUP_NAME_LEN];
                let n = name.len().min(GROUP_NAME_LEN - 1);
                field[..n].copy_from_slice(&name.as_bytes()[..n]);
                payload.extend_from_slice(&field);
            }
            Self::Echo { cookie } => payload.extend_from_slice(&cookie.to_le_bytes()),
            Self::ChipRead { address, length } => {
                payload.extend_from_slice(&address.to_le_bytes());
                payload.extend_from_slice(&length.to_le_bytes());
            }
            Self::ChipWrite { address, data } => {
                payload.extend_from_slice(&address.to_le_bytes());
                payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
                payload.extend_from_slice(data);
            }
            Self::ChipReset { state } => payload.push(u8::from(*state)),
            Self::GetIrqLine | Self::Deconfig | Self::LegacyFirmwareDownload => {}
            Self::Delay { period_us } => payload.extend_from_slice(&period_us.to_le_bytes()),
            Self::SelectEncoding { method } => payload.push(*method),
            Self::ConfigIrq {
                count,
                trigger,
                words,
            } => {
                payload.push(*count);
                payload.push(u8::from(*trigger));
                payload.extend_from_slice(words);
            }
            Self::ConfigReporting { x_range, y_range } => {
                payload.extend_from_slice(&x_range.to_le_bytes());
                payload.extend_from_slice(&y_range.to_le_bytes());
            }
            Self::ReportTouchFrame(frame) => {
                payload.reserve(1 + frame.len() * CONTACT_SIZE);
                payload.push(frame.len() as u8);
                for c in frame {
                    payload.push(c.id);
                    payload.push(u8::from(c.tool));
                    payload.extend_from_slice(&c.x.to_le_bytes());
                    payload.extend_from_slice(&c.y.to_le_bytes());
                    payload.extend_from_slice(&c.pressure.to_le_bytes());
                }
            }
        }
        msg.add_attr(self.kind() as u16, &payload)
    }
}

//! Word-level model of the chip bootloader, implemented directly as
//! [`ChipAccess`] so update sessions run without framing.

#![allow(dead_code)]

use std::collections::VecDeque;

use stitouch::bootloader::{FIRMWARE_SIZE, FLASH_BLOCK_WORDS};
use stitouch::chip::ChipAccess;
use stitouch::crc::crc16;
use stitouch::error::TransportError;

const STATUS_ADDR: u16 = 0x00FF;
const DATA_ADDR: u16 = 0x00FE;
const UNLOCK_ADDR: u16 = 0x7F00;
const READY: u16 = 0xABCC;
const ACK: u16 = 0x5432;
const COMMAND_READY: u16 = 0x003E;
const UNLOCK: [u16; 3] = [0x0047, 0x00C7, 0x0007];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Unlocked,
    Crc(u16),
    Erase,
    ByteMode,
    WriteFlash(usize),
    Block(u16),
    Exit,
    Release,
}

pub struct SimBootloader {
    pub flash: Vec<u8>,
    pub ops: Vec<Op>,
    /// Never offer the command-ready token after unlock.
    pub mute: bool,
    /// Flip one bit of every programmed block.
    pub corrupt: bool,
    unlock_progress: usize,
    outgoing: VecDeque<u16>,
    command: Vec<u16>,
    program_left: usize,
    program_offset: usize,
    pending_block: Option<Vec<u8>>,
}

impl SimBootloader {
    pub fn new(flash: Vec<u8>) -> Self {
        assert_eq!(flash.len(), FIRMWARE_SIZE);
        Self {
            flash,
            ops: Vec::new(),
            mute: false,
            corrupt: false,
            unlock_progress: 0,
            outgoing: VecDeque::new(),
            command: Vec::new(),
            program_left: 0,
            program_offset: 0,
            pending_block: None,
        }
    }

    pub fn blank() -> Self {
        Self::new(vec![0xFF; FIRMWARE_SIZE])
    }

    fn offer_command_ready(&mut self) {
        if !self.mute {
            self.outgoing.push_back(COMMAND_READY);
        }
    }

    fn take_word(&mut self, value: u16) {
        self.command.push(value);
        let needed = match self.command[0] {
            0x0001 | 0x0002 => 1,
            0x000A => 2,
            0x00F0 => 5,
            0x0030 => 6,
            other => panic!("unknown bootloader command {other:#06x}"),
        };
        if self.command.len() < needed {
            return;
        }
        let cmd = std::mem::take(&mut self.command);
        match cmd[0] {
            0x0001 => self.ops.push(Op::Exit),
            0x0002 => {
                self.flash.fill(0xFF);
                self.ops.push(Op::Erase);
                self.offer_command_ready();
            }
            0x000A => {
                self.ops.push(Op::ByteMode);
                self.offer_command_ready();
            }
            0x00F0 => {
                let len = usize::from(cmd[2]) << 8;
                self.ops.push(Op::WriteFlash(len));
                self.program_left = len;
                self.program_offset = 0;
            }
            _ => {
                let len = usize::from(cmd[4] | (cmd[5] << 8));
                let crc = crc16(0, &self.flash[..len]);
                self.ops.push(Op::Crc(crc));
                self.outgoing.push_back(crc & 0x00FF);
                self.outgoing.push_back(crc >> 8);
                self.offer_command_ready();
            }
        }
    }

    fn acknowledge(&mut self) {
        let Some(mut block) = self.pending_block.take() else {
            return;
        };
        if self.corrupt {
            block[0] ^= 0x01;
        }
        let end = self.program_offset + block.len();
        self.flash[self.program_offset..end].copy_from_slice(&block);
        self.program_offset = end;
        self.program_left -= block.len();
        if self.program_left == 0 {
            self.offer_command_ready();
        }
    }
}

fn words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|p| u16::from_le_bytes([p[0], p[1]]))
        .collect()
}

impl ChipAccess for SimBootloader {
    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        match address {
            STATUS_ADDR => buf.copy_from_slice(&READY.to_le_bytes()),
            DATA_ADDR => {
                let (value, flag) = match self.outgoing.pop_front() {
                    Some(v) => (v, READY),
                    None => (0, 0),
                };
                buf[..2].copy_from_slice(&value.to_le_bytes());
                buf[2..4].copy_from_slice(&flag.to_le_bytes());
            }
            other => panic!("bootloader read at {other:#06x}"),
        }
        Ok(())
    }

    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError> {
        let w = words(data);
        match address {
            UNLOCK_ADDR => {
                if w[0] == 0x0000 {
                    self.ops.push(Op::Release);
                    self.unlock_progress = 0;
                } else if w[0] == UNLOCK[self.unlock_progress] {
                    self.unlock_progress += 1;
                    if self.unlock_progress == UNLOCK.len() {
                        self.ops.push(Op::Unlocked);
                        self.offer_command_ready();
                    }
                }
            }
            STATUS_ADDR => {
                assert_eq!(w, vec![ACK]);
                self.acknowledge();
            }
            DATA_ADDR => {
                assert_eq!(w[1], ACK);
                self.take_word(w[0]);
            }
            0x0000 | 0x0040 if self.program_left > 0 => {
                assert_eq!(data.len(), FLASH_BLOCK_WORDS * 2);
                self.ops.push(Op::Block(address));
                self.pending_block = Some(data.to_vec());
            }
            other => panic!("bootloader write at {other:#06x}"),
        }
        Ok(())
    }
}

//! Chip bootloader: flash verification and reprogramming.
//!
//! Flow: Enter → Compare → [Erase → ByteMode → Program] → Verify → Exit
//!
//! Every step talks to the chip through raw frames and a two-word
//! data/acknowledge handshake:
//!
//! ```text
//!  0x00FF  status   reads 0xABCC when the bootloader can take a word
//!  0x00FE  data     [value, 0xABCC] to read, [value, 0x5432] to write
//!  0x7F00  unlock   0x0047, 0x00C7, 0x0007 enters, 0x0000 releases
//! ```
//!
//! A [`FirmwareUpdate`] is consumed by a single attempt and keeps no state
//! between attempts.

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::chip::ChipAccess;
use crate::crc::crc16;
use crate::error::{BootloaderError, ProgramStep, TransportError};

/// Exact flash image size in bytes (48 KiB).
pub const FIRMWARE_SIZE: usize = 0xC000;

/// Words per flash programming block.
pub const FLASH_BLOCK_WORDS: usize = 64;

/// Handshake polls before a step is declared unresponsive.
pub const POLL_ATTEMPTS: usize = 15;

/// Attempt index from which each failed poll sleeps.
pub const POLL_SLEEP_FROM: usize = 3;

/// Sleep between late polls.
pub const POLL_SLEEP_US: u32 = 500;

const STATUS_ADDR: u16 = 0x00FF;
const DATA_ADDR: u16 = 0x00FE;
const UNLOCK_ADDR: u16 = 0x7F00;

const READY: u16 = 0xABCC;
const ACK: u16 = 0x5432;
const COMMAND_READY: u16 = 0x003E;

const UNLOCK_SEQUENCE: [u16; 3] = [0x0047, 0x00C7, 0x0007];
const UNLOCK_RELEASE: u16 = 0x0000;

const CMD_EXIT: u16 = 0x0001;
const CMD_ERASE: u16 = 0x0002;
const CMD_BYTE_MODE: u16 = 0x000A;
const CMD_CRC: u16 = 0x0030;
const CMD_WRITE_FLASH: u16 = 0x00F0;

const CRC_SETTLE_MS: u32 = 200;
const ERASE_SETTLE_MS: u32 = 60;
const PROGRAM_DRAIN_MS: u32 = 10;

/// Alternating chip pages that receive flash blocks.
const BLOCK_PAGES: [u16; 2] = [0x0000, 0x0040];

// ── State machine ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    Idle,
    Entering,
    Comparing,
    Erasing,
    SettingByteMode,
    Programming { block: usize },
    Verifying,
    Exiting,
}

/// Result of a successful update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Chip checksum already matched; flash was left untouched.
    AlreadyCurrent { crc: u16 },
    /// Flash was erased, programmed and verified.
    Programmed { crc: u16 },
}

/// One firmware update attempt against a chip in bootloader reach.
pub struct FirmwareUpdate<'a, A: ?Sized, D: ?Sized> {
    chip: &'a mut A,
    delay: &'a mut D,
    state: BootState,
    byte_mode: bool,
    flash_offset: usize,
    last_crc: Option<u16>,
}

impl<'a, A, D> FirmwareUpdate<'a, A, D>
where
    A: ChipAccess + ?Sized,
    D: DelayNs + ?Sized,
{
    pub fn new(chip: &'a mut A, delay: &'a mut D) -> Self {
        Self {
            chip,
            delay,
            state: BootState::Idle,
            byte_mode: false,
            flash_offset: 0,
            last_crc: None,
        }
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    /// Last checksum the chip reported in this attempt.
    pub fn last_crc(&self) -> Option<u16> {
        self.last_crc
    }

    fn transition(&mut self, next: BootState) {
        debug!("BL: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Bring flash in line with `image`, skipping erase/program when the
    /// chip already holds it. Exit is always attempted.
    pub fn run(mut self, image: &[u8]) -> Result<UpdateOutcome, BootloaderError> {
        if image.len() != FIRMWARE_SIZE {
            warn!(
                "BL: image is {} bytes, expected {}",
                image.len(),
                FIRMWARE_SIZE
            );
            return Err(BootloaderError::InvalidImageSize(image.len()));
        }
        let image_crc = crc16(0, image);
        info!("BL: image crc {:#06x}", image_crc);

        let result = self.program(image, image_crc);
        self.finish(result)
    }

    /// Compare the chip's flash checksum with `image` without programming.
    pub fn verify(mut self, image: &[u8]) -> Result<UpdateOutcome, BootloaderError> {
        if image.len() != FIRMWARE_SIZE {
            return Err(BootloaderError::InvalidImageSize(image.len()));
        }
        let image_crc = crc16(0, image);

        let result = self.enter().and_then(|()| {
            self.transition(BootState::Comparing);
            let chip_crc = self.get_crc(FIRMWARE_SIZE as u16)?;
            if chip_crc == image_crc {
                Ok(UpdateOutcome::AlreadyCurrent { crc: chip_crc })
            } else {
                Err(BootloaderError::ChecksumMismatch {
                    expected: image_crc,
                    actual: chip_crc,
                })
            }
        });
        self.finish(result)
    }

    fn finish(
        &mut self,
        result: Result<UpdateOutcome, BootloaderError>,
    ) -> Result<UpdateOutcome, BootloaderError> {
        let exited = self.exit();
        self.transition(BootState::Idle);
        match (result, exited) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => {
                warn!("BL: {}", e);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(exit_err)) => {
                warn!("BL: {} after {}", exit_err, e);
                Err(e)
            }
        }
    }

    fn program(&mut self, image: &[u8], image_crc: u16) -> Result<UpdateOutcome, BootloaderError> {
        self.enter()?;

        self.transition(BootState::Comparing);
        let chip_crc = self.get_crc(FIRMWARE_SIZE as u16)?;
        if chip_crc == image_crc {
            info!("BL: chip crc {:#06x} matches image, not reprogramming", chip_crc);
            return Ok(UpdateOutcome::AlreadyCurrent { crc: chip_crc });
        }
        info!("BL: chip crc {:#06x} differs from image {:#06x}", chip_crc, image_crc);

        self.transition(BootState::Erasing);
        self.erase()
            .map_err(|_| BootloaderError::ProgrammingFailed(ProgramStep::Erase))?;

        self.transition(BootState::SettingByteMode);
        self.set_byte_mode()
            .map_err(|_| BootloaderError::ProgrammingFailed(ProgramStep::ByteMode))?;

        self.write_flash(image)
            .map_err(|_| BootloaderError::ProgrammingFailed(ProgramStep::Write))?;

        self.transition(BootState::Verifying);
        let chip_crc = self.get_crc(FIRMWARE_SIZE as u16)?;
        if chip_crc != image_crc {
            warn!(
                "BL: programmed crc {:#06x}, expected {:#06x}",
                chip_crc, image_crc
            );
            return Err(BootloaderError::VerificationFailed {
                expected: image_crc,
                actual: chip_crc,
            });
        }
        info!("BL: flash verified ({:#06x})", chip_crc);
        Ok(UpdateOutcome::Programmed { crc: chip_crc })
    }

    // -- Handshake primitives -------------------------------------------

    fn unresponsive(&self, op: &str, address: u16, e: TransportError) -> BootloaderError {
        warn!("BL: {} at {:#06x} failed: {}", op, address, e);
        BootloaderError::Unresponsive
    }

    fn write_words(&mut self, address: u16, words: &[u16]) -> Result<(), BootloaderError> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.chip
            .write(address, &bytes)
            .map_err(|e| self.unresponsive("write", address, e))
    }

    fn backoff(&mut self, attempt: usize) {
        if attempt >= POLL_SLEEP_FROM {
            self.delay.delay_us(POLL_SLEEP_US);
        }
    }

    /// Poll the status word until the bootloader can take a data word.
    pub fn wait_ready(&mut self) -> Result<(), BootloaderError> {
        let mut status = 0;
        for attempt in 0..POLL_ATTEMPTS {
            status = self
                .chip
                .read_word(STATUS_ADDR)
                .map_err(|e| self.unresponsive("status read", STATUS_ADDR, e))?;
            if status == READY {
                return Ok(());
            }
            self.backoff(attempt);
        }
        warn!(
            "BL: status {:#06x} after {} polls, expected {:#06x}",
            status, POLL_ATTEMPTS, READY
        );
        Err(BootloaderError::Unresponsive)
    }

    /// Acknowledge the word just exchanged.
    pub fn complete(&mut self) -> Result<(), BootloaderError> {
        self.write_words(STATUS_ADDR, &[ACK])
    }

    /// Read one data word; the chip must flag it valid.
    pub fn read_data(&mut self) -> Result<u16, BootloaderError> {
        let mut pair = [0u8; 4];
        self.chip
            .read(DATA_ADDR, &mut pair)
            .map_err(|e| self.unresponsive("data read", DATA_ADDR, e))?;
        let value = u16::from_le_bytes([pair[0], pair[1]]);
        let flag = u16::from_le_bytes([pair[2], pair[3]]);
        if flag != READY {
            return Err(BootloaderError::Unresponsive);
        }
        self.complete()?;
        Ok(value)
    }

    /// Hand one data word to the bootloader.
    pub fn write_data(&mut self, value: u16) -> Result<(), BootloaderError> {
        self.wait_ready()?;
        self.write_words(DATA_ADDR, &[value, ACK])
    }

    fn write_command(&mut self, words: &[u16]) -> Result<(), BootloaderError> {
        words.iter().try_for_each(|&w| self.write_data(w))
    }

    /// Poll until the bootloader reports it is ready for a command.
    pub fn wait_command(&mut self) -> Result<(), BootloaderError> {
        for attempt in 0..POLL_ATTEMPTS {
            if self.read_data() == Ok(COMMAND_READY) {
                return Ok(());
            }
            self.backoff(attempt);
        }
        warn!("BL: no command-ready token after {} polls", POLL_ATTEMPTS);
        Err(BootloaderError::Unresponsive)
    }

    // -- Steps -----------------------------------------------------------

    pub fn enter(&mut self) -> Result<(), BootloaderError> {
        self.transition(BootState::Entering);
        for word in UNLOCK_SEQUENCE {
            self.write_words(UNLOCK_ADDR, &[word])?;
        }
        self.wait_command()
    }

    pub fn exit(&mut self) -> Result<(), BootloaderError> {
        self.transition(BootState::Exiting);
        self.write_data(CMD_EXIT)
            .and_then(|()| self.write_words(UNLOCK_ADDR, &[UNLOCK_RELEASE]))
            .map_err(|_| BootloaderError::ExitFailed)
    }

    /// Checksum of the first `len` bytes of flash.
    pub fn get_crc(&mut self, len: u16) -> Result<u16, BootloaderError> {
        self.write_command(&[CMD_CRC, 0x0002, 0x0000, 0x0000, len & 0x00FF, len >> 8])?;
        self.delay.delay_ms(CRC_SETTLE_MS);
        let low = self.read_data()?;
        let high = self.read_data()?;
        self.wait_command()?;
        let crc = (high << 8) | low;
        self.last_crc = Some(crc);
        Ok(crc)
    }

    pub fn erase(&mut self) -> Result<(), BootloaderError> {
        self.write_data(CMD_ERASE)?;
        self.delay.delay_ms(ERASE_SETTLE_MS);
        self.wait_command()
    }

    pub fn set_byte_mode(&mut self) -> Result<(), BootloaderError> {
        self.write_command(&[CMD_BYTE_MODE, 0x0000])?;
        self.wait_command()?;
        self.byte_mode = true;
        Ok(())
    }

    /// Stream `image` in 64-word blocks through the ping-pong pages.
    pub fn write_flash(&mut self, image: &[u8]) -> Result<(), BootloaderError> {
        let len = image.len() as u16;
        self.write_command(&[CMD_WRITE_FLASH, 0x0000, len >> 8, 0x0000, 0x0000])?;

        self.flash_offset = 0;
        for (block, chunk) in image.chunks_exact(FLASH_BLOCK_WORDS * 2).enumerate() {
            self.transition(BootState::Programming { block });
            self.wait_ready()?;
            let page = BLOCK_PAGES[block % 2];
            self.chip
                .write(page, chunk)
                .map_err(|e| self.unresponsive("block write", page, e))?;
            self.complete()?;
            self.flash_offset += chunk.len();
        }

        self.delay.delay_ms(PROGRAM_DRAIN_MS);
        self.wait_command()
    }

    /// Bytes handed to the chip by the current programming pass.
    pub fn flash_offset(&self) -> usize {
        self.flash_offset
    }

    pub fn byte_mode(&self) -> bool {
        self.byte_mode
    }
}

//! Unified error types for the touch controller engine.
//!
//! Each subsystem has its own small `Copy` enum; all of them convert into
//! the top-level [`Error`] so lifecycle code can propagate with `?`.
//! Nothing here allocates, so errors can be passed between the worker
//! and callers freely.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible public operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A chip transfer failed.
    Transport(TransportError),
    /// A firmware update attempt failed.
    Bootloader(BootloaderError),
    /// A message-bus message could not be parsed or answered.
    Protocol(ProtocolError),
    /// Attach, detach or power management failed.
    Lifecycle(LifecycleError),
    /// Attach-time configuration is invalid.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Bootloader(e) => write!(f, "bootloader: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Lifecycle(e) => write!(f, "lifecycle: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}
impl std::error::Error for TransportError {}
impl std::error::Error for BootloaderError {}
impl std::error::Error for ProtocolError {}
impl std::error::Error for LifecycleError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for DeliveryError {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The paged encoding's status word never reached the ready sentinel.
    Timeout,
    /// The bus reported a non-retryable fault.
    BusFault,
    /// Chip access method outside 1..=3.
    InvalidConfiguration(u8),
    /// Payload length is not a whole number of 16-bit words.
    Misaligned(usize),
    /// Frame does not fit the transport's frame buffer.
    FrameTooLarge { len: usize, capacity: usize },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "device not responding"),
            Self::BusFault => write!(f, "bus fault"),
            Self::InvalidConfiguration(m) => write!(f, "invalid chip access method {m}"),
            Self::Misaligned(len) => write!(f, "length {len} is not word aligned"),
            Self::FrameTooLarge { len, capacity } => {
                write!(f, "frame of {len} bytes exceeds {capacity} byte buffer")
            }
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Bootloader errors
// ---------------------------------------------------------------------------

/// Stage of flash programming that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramStep {
    Erase,
    ByteMode,
    Write,
}

impl fmt::Display for ProgramStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erase => write!(f, "erase"),
            Self::ByteMode => write!(f, "byte mode"),
            Self::Write => write!(f, "flash write"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderError {
    /// Image is not exactly the flash size.
    InvalidImageSize(usize),
    /// A handshake poll ran out of attempts or a transfer failed.
    Unresponsive,
    /// Chip checksum differs from the image checksum (verify-only run).
    ChecksumMismatch { expected: u16, actual: u16 },
    /// Erase, byte-mode selection or block programming failed.
    ProgrammingFailed(ProgramStep),
    /// Checksum read back after programming does not match the image.
    VerificationFailed { expected: u16, actual: u16 },
    /// The chip did not leave bootloader mode cleanly.
    ExitFailed,
}

impl fmt::Display for BootloaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidImageSize(len) => write!(f, "invalid firmware image size {len}"),
            Self::Unresponsive => write!(f, "bootloader unresponsive"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: image {expected:#06x}, chip {actual:#06x}")
            }
            Self::ProgrammingFailed(step) => write!(f, "{step} failed"),
            Self::VerificationFailed { expected, actual } => write!(
                f,
                "verification failed: image {expected:#06x}, chip {actual:#06x}"
            ),
            Self::ExitFailed => write!(f, "failed to exit bootloader"),
        }
    }
}

impl From<BootloaderError> for Error {
    fn from(e: BootloaderError) -> Self {
        Self::Bootloader(e)
    }
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Header or attribute framing is inconsistent, or a payload is short.
    MalformedMessage,
    /// Attribute type has no handler.
    UnknownCommand(u16),
    /// No outbound buffer, or the response does not fit in it.
    AllocationFailed,
    /// The message bus refused an outbound message.
    SendFailed,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedMessage => write!(f, "malformed message"),
            Self::UnknownCommand(kind) => write!(f, "unexpected message {kind}"),
            Self::AllocationFailed => write!(f, "outbound allocation failed"),
            Self::SendFailed => write!(f, "send failed"),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    CompanionLaunchFailed,
    PlatformInit,
    PowerFailed,
    WorkerSpawnFailed,
    BusRegistration,
    RegistryFull,
    DuplicateChannel(u16),
    /// The worker has been stopped or never started.
    NotRunning,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompanionLaunchFailed => write!(f, "companion launch failed"),
            Self::PlatformInit => write!(f, "platform init failed"),
            Self::PowerFailed => write!(f, "power sequencing failed"),
            Self::WorkerSpawnFailed => write!(f, "failed to start worker thread"),
            Self::BusRegistration => write!(f, "message bus registration failed"),
            Self::RegistryFull => write!(f, "device registry full"),
            Self::DuplicateChannel(id) => write!(f, "channel {id} already registered"),
            Self::NotRunning => write!(f, "worker not running"),
        }
    }
}

impl From<LifecycleError> for Error {
    fn from(e: LifecycleError) -> Self {
        Self::Lifecycle(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// JSON could not be parsed into a configuration.
    Parse,
    /// A field failed validation.
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "could not parse configuration"),
            Self::Invalid(field) => write!(f, "invalid {field}"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Delivery errors (registry → device)
// ---------------------------------------------------------------------------

/// Why an inbound buffer was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// No device owns the channel.
    NoDevice,
    /// The device exists but is not accepting messages.
    NotReady,
    /// The inbound queue is full.
    QueueFull,
    /// The buffer exceeds the inbound message capacity.
    TooLarge,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDevice => write!(f, "no such device"),
            Self::NotReady => write!(f, "device not accepting messages"),
            Self::QueueFull => write!(f, "inbound queue full"),
            Self::TooLarge => write!(f, "message too large"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

//! The per-device worker: owns the chip and runs the event loop.
//!
//! Each wake runs one cycle, highest priority first:
//!
//! ```text
//!  1. outbound buffer   allocate if missing, otherwise yield
//!  2. companion         launch, retrying every 100 ms
//!  3. inbound queue     drain; first error purges the rest
//!  4. suspend           quiesce, ack, park until resume, restart, ack
//!  5. interrupt         service when the line is asserted (active low)
//! ```
//!
//! Nothing here is shared; other contexts reach the worker only through
//! its [`DeviceLink`].

use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use log::{debug, error, info, warn};

use super::irq::{IrqParams, MAX_IRQ_PARAMS};
use super::link::DeviceLink;
use crate::app::events::StatusEvent;
use crate::app::ports::{MessageBus, Platform, ReportSink};
use crate::bootloader::FirmwareUpdate;
use crate::chip::{Bus, ChipAccess, Encoding, Transport};
use crate::config::DeviceConfig;
use crate::error::{Error, LifecycleError, ProtocolError};
use crate::msg::{
    Attributes, Audience, DriverCommand, FusionKind, GROUP_DRIVER, GROUP_DRIVER_NAME,
    GROUP_FUSION, GROUP_FUSION_NAME, InboundMessage, MessageHeader, OutboundMessage,
};

/// Companion relaunch interval.
const COMPANION_RETRY_MS: u32 = 100;

/// Where a flushed outbound message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Unicast reply to the control sender.
    Sender(u32),
    /// Multicast to the fusion group.
    Fusion,
}

/// Everything the platform supplies at attach time.
pub struct Collaborators<B> {
    pub bus: B,
    pub platform: Arc<dyn Platform>,
    pub message_bus: Box<dyn MessageBus>,
    pub reports: Box<dyn ReportSink>,
    pub delay: Box<dyn DelayNs + Send>,
}

pub struct Device<B> {
    pub(super) config: DeviceConfig,
    pub(super) channel: u16,
    pub(super) link: Arc<DeviceLink>,
    pub(super) transport: Transport<B>,
    pub(super) platform: Arc<dyn Platform>,
    pub(super) message_bus: Box<dyn MessageBus>,
    pub(super) reports: Box<dyn ReportSink>,
    pub(super) delay: Box<dyn DelayNs + Send>,
    pub(super) outbound: Option<OutboundMessage>,
    pub(super) next_seq: u32,
    pub(super) irq: IrqParams,
    pub(super) irq_registered: bool,
    pub(super) reporting: bool,
    pub(super) eraser_active: bool,
    pub(super) groups: Vec<bool>,
}

impl<B: Bus> Device<B> {
    /// Register the bus channel and its two fixed groups, then allocate
    /// the first outbound buffer. Everything registered is undone on
    /// failure.
    pub fn new(config: DeviceConfig, collab: Collaborators<B>) -> Result<Self, Error> {
        config.validate()?;
        let encoding = config.encoding()?;
        let Collaborators {
            bus,
            platform,
            mut message_bus,
            reports,
            delay,
        } = collab;

        let channel = message_bus.register(&config.channel_name).map_err(|e| {
            error!("{}: channel registration failed: {}", config.channel_name, e);
            LifecycleError::BusRegistration
        })?;

        for (number, name) in [
            (GROUP_DRIVER, GROUP_DRIVER_NAME),
            (GROUP_FUSION, GROUP_FUSION_NAME),
        ] {
            if let Err(e) = message_bus.register_group(number, name) {
                error!(
                    "{}: group {} ({}) registration failed: {}",
                    config.channel_name, number, name, e
                );
                message_bus.unregister();
                return Err(LifecycleError::BusRegistration.into());
            }
        }

        let mut groups = vec![false; usize::from(config.broadcast_groups)];
        for g in groups.iter_mut().take(2) {
            *g = true;
        }

        let transport = Transport::new(bus, encoding, config.frame_buffer_size);
        let mut device = Self {
            config,
            channel,
            link: Arc::new(DeviceLink::new()),
            transport,
            platform,
            message_bus,
            reports,
            delay,
            outbound: None,
            next_seq: 1,
            irq: IrqParams::default(),
            irq_registered: false,
            reporting: false,
            eraser_active: false,
            groups,
        };
        if let Err(e) = device.allocate_outbound() {
            error!("{}: {}", device.config.channel_name, e);
            device.message_bus.unregister();
            return Err(e.into());
        }
        info!(
            "{}: channel {} registered, {:?} encoding",
            device.config.channel_name, channel, encoding
        );
        Ok(device)
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn encoding(&self) -> Encoding {
        self.transport.encoding()
    }

    pub fn irq_params(&self) -> &IrqParams {
        &self.irq
    }

    pub fn irq_registered(&self) -> bool {
        self.irq_registered
    }

    pub fn reporting(&self) -> bool {
        self.reporting
    }

    pub fn group_registered(&self, number: u8) -> bool {
        self.groups.get(usize::from(number)).copied().unwrap_or(false)
    }

    // ── Event loop ────────────────────────────────────────────

    /// Run cycles until a stop is requested, then hand the device back
    /// for teardown.
    pub fn run(mut self) -> Self {
        info!("{}: worker running", self.config.channel_name);
        while !self.link.stopping() {
            let ready = self.run_cycle();
            if self.link.stopping() {
                break;
            }
            if !ready || self.link.pending() == 0 {
                self.link.wait_for_wake();
            }
        }
        info!("{}: worker stopped", self.config.channel_name);
        self
    }

    /// One pass over the priority list. Returns `false` when no outbound
    /// buffer could be allocated and nothing else was attempted.
    pub fn run_cycle(&mut self) -> bool {
        if !self.ensure_outbound() {
            return false;
        }

        if self.link.take_companion_request() {
            self.start_companion();
        }
        if self.link.stopping() {
            return true;
        }

        self.drain_inbound();

        if self.link.suspended() {
            self.suspend_cycle();
            if self.link.stopping() {
                return true;
            }
        }

        if self.irq_registered && !self.platform.irq_line_state() {
            self.service_irq();
        }
        true
    }

    fn start_companion(&mut self) {
        let mut failures = 0u32;
        loop {
            let argv = self.config.companion_argv();
            match self.platform.launch_companion(&argv) {
                Ok(()) => {
                    info!("{}: companion {} started", self.config.channel_name, argv[0]);
                    self.link.status().notify(&StatusEvent::CompanionStarted);
                    return;
                }
                Err(e) if failures == 0 => warn!(
                    "{}: {} ({}), retrying",
                    self.config.channel_name,
                    LifecycleError::CompanionLaunchFailed,
                    e
                ),
                Err(e) => debug!(
                    "{}: companion launch attempt {} failed: {}",
                    self.config.channel_name,
                    failures + 1,
                    e
                ),
            }
            failures += 1;
            if self.link.stopping() {
                return;
            }
            self.delay.delay_ms(COMPANION_RETRY_MS);
        }
    }

    fn drain_inbound(&mut self) {
        while self.outbound.is_some() {
            let Some(msg) = self.link.next_inbound() else {
                return;
            };
            if let Err(e) = self.process(&msg) {
                let purged = self.link.purge();
                error!(
                    "{}: {}, purged {} queued messages",
                    self.config.channel_name, e, purged
                );
                if e != ProtocolError::SendFailed {
                    self.discard_outbound();
                }
                return;
            }
        }
    }

    fn suspend_cycle(&mut self) {
        info!("{}: suspending", self.config.channel_name);
        if self.irq_registered {
            self.platform.disable_irq();
        }
        self.stop_scan();
        self.link.status().notify(&StatusEvent::Suspended);
        self.link.acknowledge();

        while !self.link.resume_requested() && !self.link.stopping() {
            self.link.wait_for_wake();
        }
        if self.link.stopping() {
            self.link.finish_resume();
            return;
        }

        info!("{}: resuming", self.config.channel_name);
        self.start_scan();
        if self.irq_registered {
            self.platform.enable_irq();
        }
        self.link.finish_resume();
        self.link.acknowledge();

        let sent = self
            .reply_attr(FusionKind::Resume, &[])
            .and_then(|()| self.flush(Destination::Fusion));
        if let Err(e) = sent {
            warn!("{}: resume broadcast failed: {}", self.config.channel_name, e);
        }
        self.link.status().notify(&StatusEvent::Resumed);
    }

    // ── Outbound buffer ───────────────────────────────────────

    fn allocate_outbound(&mut self) -> Result<(), ProtocolError> {
        if self.outbound.is_some() {
            return Ok(());
        }
        let seq = self.next_seq;
        let msg = OutboundMessage::try_new(self.channel, seq, 0, self.config.message_buffer_size)?;
        self.next_seq = seq.wrapping_add(1).max(1);
        self.outbound = Some(msg);
        Ok(())
    }

    fn ensure_outbound(&mut self) -> bool {
        match self.allocate_outbound() {
            Ok(()) => true,
            Err(e) => {
                error!("{}: {}", self.config.channel_name, e);
                false
            }
        }
    }

    /// Drop whatever was composed and start a fresh buffer.
    fn discard_outbound(&mut self) {
        self.outbound = None;
        self.ensure_outbound();
    }

    /// Send the composed buffer and allocate the next one.
    pub(crate) fn flush(&mut self, dest: Destination) -> Result<(), ProtocolError> {
        let msg = self.outbound.take().ok_or(ProtocolError::AllocationFailed)?;
        let seq = msg.seq();
        let wire = msg.finish();
        let sent = match dest {
            Destination::Sender(recipient) => self.message_bus.unicast(&wire, recipient),
            Destination::Fusion => self.message_bus.multicast(&wire, GROUP_FUSION),
        };
        self.ensure_outbound();
        sent.map_err(|e| {
            warn!(
                "{}: seq {} to {:?} failed: {}",
                self.config.channel_name, seq, dest, e
            );
            ProtocolError::SendFailed
        })
    }

    fn reply_attr(&mut self, kind: FusionKind, payload: &[u8]) -> Result<(), ProtocolError> {
        self.outbound
            .as_mut()
            .ok_or(ProtocolError::AllocationFailed)?
            .add_attr(kind.id(), payload)
    }

    // ── Inbound messages ──────────────────────────────────────

    fn process(&mut self, msg: &InboundMessage) -> Result<(), ProtocolError> {
        match msg.audience {
            Audience::Control { sender } => self.process_control(&msg.payload, sender),
            Audience::Fusion => {
                MessageHeader::parse(&msg.payload)?;
                if let Err(e) = self.message_bus.multicast(&msg.payload, GROUP_FUSION) {
                    warn!("{}: fusion relay failed: {}", self.config.channel_name, e);
                }
                Ok(())
            }
        }
    }

    /// Dispatch every attribute, then flush once if any handler owes a
    /// reply: unicast for sequence 0, fusion broadcast otherwise.
    pub(crate) fn process_control(&mut self, buf: &[u8], sender: u32) -> Result<(), ProtocolError> {
        let (header, region) = MessageHeader::parse(buf)?;
        let mut reply = false;
        for attr in Attributes::new(region) {
            let command = match DriverCommand::parse(attr?) {
                Ok(c) => c,
                Err(ProtocolError::UnknownCommand(kind)) => {
                    warn!("{}: unexpected message {}", self.config.channel_name, kind);
                    continue;
                }
                Err(e) => return Err(e),
            };
            reply |= self.dispatch(command)?;
        }
        if reply {
            let dest = if header.seq == 0 {
                Destination::Sender(sender)
            } else {
                Destination::Fusion
            };
            self.flush(dest)?;
        }
        Ok(())
    }

    /// Run one command. Returns whether a reply attribute was composed.
    fn dispatch(&mut self, command: DriverCommand<'_>) -> Result<bool, ProtocolError> {
        debug!("{}: {:?}", self.config.channel_name, command.kind());
        match command {
            DriverCommand::AddBroadcastGroup { number, name } => {
                self.add_broadcast_group(number, name);
                Ok(false)
            }
            DriverCommand::Echo { cookie } => {
                self.reply_attr(FusionKind::EchoResponse, &cookie.to_le_bytes())?;
                Ok(true)
            }
            DriverCommand::ChipRead { address, length } => self.chip_read(address, length),
            DriverCommand::ChipWrite { address, data } => {
                if let Err(e) = self.transport.write(address, data) {
                    error!(
                        "{}: write of {} bytes at {:#06x} failed: {}",
                        self.config.channel_name,
                        data.len(),
                        address,
                        e
                    );
                }
                Ok(false)
            }
            DriverCommand::ChipReset { state } => {
                self.platform.reset(state);
                Ok(false)
            }
            DriverCommand::GetIrqLine => {
                let level = u8::from(self.platform.irq_line_state());
                self.reply_attr(FusionKind::IrqLineStatus, &[level])?;
                Ok(true)
            }
            DriverCommand::Delay { period_us } => {
                self.delay.delay_us(period_us);
                Ok(false)
            }
            DriverCommand::SelectEncoding { method } => {
                match Encoding::try_from(method) {
                    Ok(encoding) => {
                        info!("{}: {:?} encoding", self.config.channel_name, encoding);
                        self.transport.rebuild(encoding);
                    }
                    Err(e) => warn!("{}: {}", self.config.channel_name, e),
                }
                Ok(false)
            }
            DriverCommand::ConfigIrq {
                count,
                trigger,
                words,
            } => {
                let Some(params) = IrqParams::from_le_bytes(words) else {
                    warn!(
                        "{}: {} irq parameters exceed {}",
                        self.config.channel_name, count, MAX_IRQ_PARAMS
                    );
                    return Ok(false);
                };
                self.irq = params;
                if !self.irq_registered {
                    match self.platform.request_irq(trigger) {
                        Ok(()) => {
                            info!("{}: irq registered ({:?})", self.config.channel_name, trigger);
                            self.irq_registered = true;
                            self.link.wake();
                        }
                        Err(e) => error!("{}: {}", self.config.channel_name, e),
                    }
                }
                Ok(false)
            }
            DriverCommand::ConfigReporting { x_range, y_range } => {
                self.configure_reporting(x_range, y_range);
                Ok(false)
            }
            DriverCommand::Deconfig => {
                self.deconfigure();
                Ok(false)
            }
            DriverCommand::ReportTouchFrame(frame) => {
                self.report_frame(&frame);
                Ok(false)
            }
            DriverCommand::LegacyFirmwareDownload => {
                self.legacy_firmware_download();
                Ok(false)
            }
        }
    }

    fn add_broadcast_group(&mut self, number: u8, name: &str) {
        match self.groups.get(usize::from(number)).copied() {
            None => warn!(
                "{}: group {} ({}) beyond {} configured",
                self.config.channel_name,
                number,
                name,
                self.groups.len()
            ),
            Some(true) => debug!("{}: group {} already registered", self.config.channel_name, number),
            Some(false) => match self.message_bus.register_group(number, name) {
                Ok(()) => {
                    info!("{}: group {} ({}) registered", self.config.channel_name, number, name);
                    self.groups[usize::from(number)] = true;
                }
                Err(e) => warn!(
                    "{}: group {} ({}) registration failed: {}",
                    self.config.channel_name, number, name, e
                ),
            },
        }
    }

    fn chip_read(&mut self, address: u16, length: u16) -> Result<bool, ProtocolError> {
        let out = self.outbound.as_mut().ok_or(ProtocolError::AllocationFailed)?;
        let mark = out.mark();
        let slot = out
            .alloc_attr(FusionKind::ChipReadResult.id(), 4 + usize::from(length))
            .ok_or(ProtocolError::AllocationFailed)?;
        slot[0..2].copy_from_slice(&address.to_le_bytes());
        slot[2..4].copy_from_slice(&length.to_le_bytes());
        match self.transport.read(address, &mut slot[4..]) {
            Ok(()) => Ok(true),
            Err(e) => {
                error!(
                    "{}: read of {} bytes at {:#06x} failed: {}",
                    self.config.channel_name, length, address, e
                );
                // Replies composed by earlier commands stay.
                out.truncate_to(mark);
                Ok(false)
            }
        }
    }

    fn legacy_firmware_download(&mut self) {
        let image = match self.platform.request_firmware(&self.config.firmware_name) {
            Ok(image) => image,
            Err(e) => {
                error!(
                    "{}: firmware {}: {}",
                    self.config.channel_name, self.config.firmware_name, e
                );
                return;
            }
        };
        info!(
            "{}: updating from {} ({} bytes)",
            self.config.channel_name,
            self.config.firmware_name,
            image.len()
        );

        if self.irq_registered {
            self.platform.disable_irq();
        }
        let mut raw = self.transport.raw();
        let result = FirmwareUpdate::new(&mut raw, &mut *self.delay).run(&image);
        if self.irq_registered {
            self.platform.enable_irq();
        }

        match result {
            Ok(outcome) => {
                info!("{}: firmware {:?}", self.config.channel_name, outcome);
                self.link
                    .status()
                    .notify(&StatusEvent::FirmwareUpdated(outcome));
            }
            Err(e) => {
                error!("{}: firmware update failed: {}", self.config.channel_name, e);
                self.link.status().notify(&StatusEvent::FirmwareFailed(e));
            }
        }
    }

    // ── Teardown ──────────────────────────────────────────────

    /// Release everything the worker acquired. Runs after the worker has
    /// stopped, on the detaching thread.
    pub fn teardown(mut self) {
        self.message_bus.unregister();
        self.outbound = None;
        let purged = self.link.purge();
        if purged > 0 {
            debug!("{}: dropped {} queued messages", self.config.channel_name, purged);
        }
        self.release_reporting();
        if self.irq_registered {
            self.platform.free_irq();
            self.irq_registered = false;
        }
        self.stop_scan();
        info!("{}: torn down", self.config.channel_name);
    }
}

//! Cross-context side of a device: everything other threads may touch.
//!
//! The worker owns the chip; callers only queue messages, raise the wake
//! signal and flip flags here.
//!
//! ```text
//!  bus delivery ──┐
//!  irq handler  ──┼──▶ wake ──▶ worker ──▶ ack ──▶ suspend/resume caller
//!  suspend/resume ┘
//! ```

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future::block_on;

use crate::app::events::StatusSubscriber;
use crate::error::DeliveryError;
use crate::msg::{Audience, InboundMessage, InboundQueue};

pub struct DeviceLink {
    inbound: InboundQueue,
    wake: Signal<CriticalSectionRawMutex, ()>,
    ack: Signal<CriticalSectionRawMutex, ()>,
    intake: AtomicBool,
    stop: AtomicBool,
    suspend_in_progress: AtomicBool,
    resume_in_progress: AtomicBool,
    start_companion: AtomicBool,
    status: StatusSubscriber,
}

impl DeviceLink {
    pub fn new() -> Self {
        Self {
            inbound: InboundQueue::new(),
            wake: Signal::new(),
            ack: Signal::new(),
            intake: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            suspend_in_progress: AtomicBool::new(false),
            resume_in_progress: AtomicBool::new(false),
            start_companion: AtomicBool::new(false),
            status: StatusSubscriber::new(),
        }
    }

    // -- Inbound ---------------------------------------------------------

    /// Queue a copy of `buf` and wake the worker.
    pub fn deliver(&self, audience: Audience, buf: &[u8]) -> Result<(), DeliveryError> {
        if !self.intake.load(Ordering::Acquire) {
            return Err(DeliveryError::NotReady);
        }
        let msg = InboundMessage::copy_from(audience, buf)?;
        self.inbound
            .try_send(msg)
            .map_err(|_| DeliveryError::QueueFull)?;
        self.wake();
        Ok(())
    }

    /// Messages waiting for the worker.
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    pub fn accepting(&self) -> bool {
        self.intake.load(Ordering::Acquire)
    }

    /// Gate delivery. The handle opens it once the worker is running.
    pub fn set_intake(&self, on: bool) {
        self.intake.store(on, Ordering::Release);
    }

    pub(crate) fn next_inbound(&self) -> Option<InboundMessage> {
        self.inbound.try_receive().ok()
    }

    /// Drop everything queued; returns how many messages were discarded.
    pub(crate) fn purge(&self) -> usize {
        let mut purged = 0;
        while self.inbound.try_receive().is_ok() {
            purged += 1;
        }
        purged
    }

    // -- Wake / rendezvous -----------------------------------------------

    /// Interrupt-context entry point: only wakes the worker.
    pub fn notify_irq(&self) {
        self.wake();
    }

    pub fn wake(&self) {
        self.wake.signal(());
    }

    pub(crate) fn wait_for_wake(&self) {
        block_on(self.wake.wait());
    }

    pub(crate) fn acknowledge(&self) {
        self.ack.signal(());
    }

    pub(crate) fn wait_for_ack(&self) {
        block_on(self.ack.wait());
    }

    // -- Flags -----------------------------------------------------------

    pub fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.wake();
    }

    /// Ask the worker to (re)launch the companion process.
    pub fn request_companion_start(&self) {
        self.start_companion.store(true, Ordering::Release);
        self.wake();
    }

    pub(crate) fn take_companion_request(&self) -> bool {
        self.start_companion.swap(false, Ordering::AcqRel)
    }

    pub fn suspended(&self) -> bool {
        self.suspend_in_progress.load(Ordering::Acquire)
    }

    /// Mark a suspend as started. `false` if one already is.
    pub(crate) fn begin_suspend(&self) -> bool {
        !self.suspend_in_progress.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn begin_resume(&self) {
        self.resume_in_progress.store(true, Ordering::Release);
    }

    pub(crate) fn resume_requested(&self) -> bool {
        self.resume_in_progress.load(Ordering::Acquire)
    }

    pub(crate) fn finish_resume(&self) {
        self.resume_in_progress.store(false, Ordering::Release);
        self.suspend_in_progress.store(false, Ordering::Release);
    }

    pub fn status(&self) -> &StatusSubscriber {
        &self.status
    }
}

impl Default for DeviceLink {
    fn default() -> Self {
        Self::new()
    }
}

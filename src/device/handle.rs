//! Device lifecycle: attach, suspend/resume, detach.
//!
//! ```text
//!  attach:  validate → init → power → reset high → bus channel
//!           → spawn worker → intake on → registry → companion
//!  detach:  intake off → registry → stop + join → teardown
//!           → reset low → power off → deinit
//! ```
//!
//! Suspend and resume block the caller until the worker acknowledges.

use std::sync::Arc;
use std::thread::JoinHandle;

use log::{error, info, warn};

use super::link::DeviceLink;
use super::registry::DeviceRegistry;
use super::worker::{Collaborators, Device};
use crate::app::events::{SlotOccupied, StatusCallback};
use crate::app::ports::Platform;
use crate::chip::Bus;
use crate::config::DeviceConfig;
use crate::error::{DeliveryError, Error, LifecycleError};
use crate::msg::Audience;

/// Worker thread stack.
const WORKER_STACK_KB: usize = 64;

/// An attached device and its worker thread.
pub struct DeviceHandle<B: Bus + Send + 'static> {
    channel: u16,
    name: String,
    link: Arc<DeviceLink>,
    platform: Arc<dyn Platform>,
    worker: Option<JoinHandle<Device<B>>>,
}

impl<B: Bus + Send + 'static> DeviceHandle<B> {
    /// Bring the device up and start its worker. On error every step
    /// already taken is undone and the chip is left powered down.
    pub fn attach(
        config: DeviceConfig,
        collab: Collaborators<B>,
        registry: &DeviceRegistry,
    ) -> Result<Self, Error> {
        config.validate()?;
        let name = config.channel_name.clone();
        let platform = Arc::clone(&collab.platform);

        platform.init(true).map_err(|e| {
            error!("{}: platform init failed: {}", name, e);
            LifecycleError::PlatformInit
        })?;
        if let Err(e) = platform.power(true) {
            error!("{}: power on failed: {}", name, e);
            if let Err(e) = platform.init(false) {
                warn!("{}: platform release failed: {}", name, e);
            }
            return Err(LifecycleError::PowerFailed.into());
        }
        platform.reset(true);

        let device = match Device::new(config, collab) {
            Ok(d) => d,
            Err(e) => {
                power_down(platform.as_ref());
                return Err(e);
            }
        };
        let channel = device.channel();
        let link = Arc::clone(device.link());

        let worker = std::thread::Builder::new()
            .name(format!("{name}-worker"))
            .stack_size(WORKER_STACK_KB * 1024)
            .spawn(move || device.run());
        let worker = match worker {
            Ok(w) => w,
            Err(e) => {
                // The closure, and with it the device, is dropped here.
                error!("{}: worker spawn failed: {}", name, e);
                power_down(platform.as_ref());
                return Err(LifecycleError::WorkerSpawnFailed.into());
            }
        };

        let mut handle = Self {
            channel,
            name,
            link,
            platform,
            worker: Some(worker),
        };
        handle.link.set_intake(true);

        if let Err(e) = registry.insert(channel, Arc::clone(&handle.link)) {
            error!("{}: {}", handle.name, e);
            handle.stop_worker();
            power_down(handle.platform.as_ref());
            return Err(e.into());
        }

        handle.link.request_companion_start();
        info!("{}: attached on channel {}", handle.name, channel);
        Ok(handle)
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && !self.link.stopping()
    }

    /// Queue a message for this device without going through a registry.
    pub fn deliver(&self, audience: Audience, buf: &[u8]) -> Result<(), DeliveryError> {
        self.link.deliver(audience, buf)
    }

    /// Interrupt handler body.
    pub fn notify_irq(&self) {
        self.link.notify_irq();
    }

    pub fn register_status_callback(&self, callback: StatusCallback) -> Result<(), SlotOccupied> {
        self.link.status().register(callback)
    }

    pub fn clear_status_callback(&self) -> bool {
        self.link.status().clear()
    }

    /// Quiesce the device and power it down. A second call while
    /// suspended does nothing.
    pub fn suspend(&self) -> Result<(), LifecycleError> {
        if !self.is_running() {
            return Err(LifecycleError::NotRunning);
        }
        if !self.link.begin_suspend() {
            return Ok(());
        }
        self.link.wake();
        self.link.wait_for_ack();
        self.platform.reset(false);
        if let Err(e) = self.platform.power(false) {
            warn!("{}: power off failed: {}", self.name, e);
        }
        info!("{}: suspended", self.name);
        Ok(())
    }

    /// Power the device back up and restart sensing.
    pub fn resume(&self) -> Result<(), LifecycleError> {
        if !self.is_running() {
            return Err(LifecycleError::NotRunning);
        }
        if !self.link.suspended() {
            return Ok(());
        }
        self.platform.reset(false);
        if let Err(e) = self.platform.power(true) {
            error!("{}: power on failed: {}", self.name, e);
            return Err(LifecycleError::PowerFailed);
        }
        self.platform.reset(true);
        self.link.begin_resume();
        self.link.wake();
        self.link.wait_for_ack();
        info!("{}: resumed", self.name);
        Ok(())
    }

    /// Hold reset and cut power without detaching.
    pub fn shutdown(&self) {
        self.platform.reset(false);
        if let Err(e) = self.platform.power(false) {
            warn!("{}: power off failed: {}", self.name, e);
        }
    }

    /// Stop the worker, release everything and power the chip down.
    pub fn detach(mut self, registry: &DeviceRegistry) {
        self.link.set_intake(false);
        registry.remove(self.channel);
        self.stop_worker();
        power_down(self.platform.as_ref());
        info!("{}: detached", self.name);
    }

    fn stop_worker(&mut self) {
        self.link.set_intake(false);
        self.link.request_stop();
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(device) => device.teardown(),
                Err(_) => error!("{}: worker panicked", self.name),
            }
        }
    }
}

impl<B: Bus + Send + 'static> Drop for DeviceHandle<B> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            warn!("{}: dropped while attached", self.name);
            self.stop_worker();
        }
    }
}

fn power_down(platform: &dyn Platform) {
    platform.reset(false);
    if let Err(e) = platform.power(false) {
        warn!("power off failed: {}", e);
    }
    if let Err(e) = platform.init(false) {
        warn!("platform release failed: {}", e);
    }
}

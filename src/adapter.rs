use crate::{
    builder::Config,
    device::{Device, ShutdownReport},
    dma::DmaAllocator,
    interrupt::{InterruptRegistry, IrqReturn, Scheduler},
    port::ControlPort,
    stats::{Statistics, StatisticsSnapshot},
    Error, MIN_FRAME_LEN,
};
use core::sync::atomic::{AtomicBool, Ordering};
use embedded_hal::blocking::delay::DelayUs;

/// Returned by a `FrameSink` that cannot take a frame right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub struct Rejected;

/// Where received frames go. `deliver` runs with the receive channel locked and
/// must copy what it needs without blocking.
pub trait FrameSink {
    fn deliver(&mut self, frame: &[u8]) -> Result<(), Rejected>;
}

impl<S: FrameSink + ?Sized> FrameSink for &mut S {
    fn deliver(&mut self, frame: &[u8]) -> Result<(), Rejected> {
        (**self).deliver(frame)
    }
}

/// Binds a `Device` to its platform collaborators and runs the network
/// interface on top of it.
///
/// Receive is interrupt driven with a budgeted poll: `on_rx_interrupt`
/// acknowledges, masks receive interrupts and asks the `Scheduler` for a poll.
/// `poll` drains up to `poll_budget` frames, and either re-enables interrupts
/// (ran dry) or schedules itself again (budget spent). Transmit descriptors are
/// reclaimed lazily by later sends.
pub struct Adapter<P, A, R, S, const TX: usize, const RX: usize>
where
    P: ControlPort,
    A: DmaAllocator,
    R: InterruptRegistry,
    S: Scheduler,
{
    device: Device<P, TX, RX>,
    allocator: A,
    registry: R,
    scheduler: S,
    config: Config,
    stats: Statistics,
    poll_scheduled: AtomicBool,
    open: bool,
}

impl<P, A, R, S, const TX: usize, const RX: usize> Adapter<P, A, R, S, TX, RX>
where
    P: ControlPort,
    A: DmaAllocator,
    R: InterruptRegistry,
    S: Scheduler,
{
    pub fn new(port: P, allocator: A, registry: R, scheduler: S, config: Config) -> Self {
        Adapter {
            device: Device::new(port),
            allocator,
            registry,
            scheduler,
            config,
            stats: Statistics::new(),
            poll_scheduled: AtomicBool::new(false),
            open: false,
        }
    }

    pub fn device(&self) -> &Device<P, TX, RX> {
        &self.device
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Brings the device up. Fails with `Error::ChannelNotReady` if already open.
    pub fn open<T: DelayUs<u32>>(&mut self, delay: &mut T) -> Result<(), Error> {
        if self.open {
            return Err(Error::ChannelNotReady);
        }

        self.poll_scheduled.store(false, Ordering::Release);
        self.device
            .bring_up(&self.config, &mut self.allocator, &mut self.registry, delay)?;
        self.open = true;
        defmt::info!("interface open");
        Ok(())
    }

    /// Shuts the device down. Closing a closed adapter does nothing and reports
    /// both channels quiesced.
    pub fn close<T: DelayUs<u32>>(&mut self, delay: &mut T) -> ShutdownReport {
        if !self.open {
            return ShutdownReport {
                tx_quiesced: true,
                rx_quiesced: true,
            };
        }

        let report = self
            .device
            .shutdown(&self.config, &mut self.allocator, &mut self.registry, delay);
        self.open = false;
        self.poll_scheduled.store(false, Ordering::Release);
        defmt::info!("interface closed");
        report
    }

    fn post(&self, frame: &[u8]) -> Result<usize, Error> {
        let port = self.device.port();
        if self.config.pad_short_frames && !frame.is_empty() && frame.len() < MIN_FRAME_LEN {
            let mut padded = [0u8; MIN_FRAME_LEN];
            padded[..frame.len()].copy_from_slice(frame);
            self.device.tx().send(port, &padded)?;
        } else {
            self.device.tx().send(port, frame)?;
        }

        self.stats.add_tx_packets(1);
        self.stats.add_tx_bytes(frame.len() as u32);
        Ok(frame.len())
    }

    /// Queues a frame for transmission and returns its length.
    ///
    /// Frames under the Ethernet minimum are zero-padded unless padding was
    /// disabled. Every failure, `Error::RingFull` included, counts as a dropped
    /// frame.
    pub fn send(&self, frame: &[u8]) -> Result<usize, Error> {
        self.post(frame).map_err(|e| {
            self.stats.add_tx_dropped(1);
            defmt::debug!("tx dropped {} byte frame: {}", frame.len(), e);
            e
        })
    }

    /// Like `send`, but a full ring is reported as `WouldBlock` and not counted
    /// as a drop, so the call can be retried with `nb::block!`.
    pub fn transmit(&self, frame: &[u8]) -> nb::Result<usize, Error> {
        match self.post(frame) {
            Ok(length) => Ok(length),
            Err(Error::RingFull) => Err(nb::Error::WouldBlock),
            Err(e) => {
                self.stats.add_tx_dropped(1);
                Err(nb::Error::Other(e))
            }
        }
    }

    /// Transmit interrupt handler. Acknowledges and counts errors; reclaiming is
    /// left to the next send.
    pub fn on_tx_interrupt(&self) -> IrqReturn {
        let tx = self.device.tx();
        let port = self.device.port();
        let status = tx.read_status(port);
        if !status.interrupt_pending {
            return IrqReturn::NotOurs;
        }

        if status.error {
            defmt::warn!("tx channel reported an error: {}", status);
            self.stats.add_tx_errors(1);
        }
        tx.acknowledge_interrupt(port);
        IrqReturn::Handled
    }

    /// Receive interrupt handler. Acknowledges, masks receive interrupts and
    /// schedules `poll`.
    pub fn on_rx_interrupt(&self) -> IrqReturn {
        let rx = self.device.rx();
        let port = self.device.port();
        let status = rx.read_status(port);
        if !status.interrupt_pending {
            return IrqReturn::NotOurs;
        }

        if status.error {
            defmt::warn!("rx channel reported an error: {}", status);
            self.stats.add_rx_errors(1);
        }
        rx.acknowledge_interrupt(port);
        rx.enter_polling(port);
        self.schedule_poll();
        IrqReturn::Handled
    }

    fn schedule_poll(&self) {
        if !self.poll_scheduled.swap(true, Ordering::AcqRel) {
            self.scheduler.schedule();
        }
    }

    /// Deferred receive work. Drains up to `poll_budget` frames into `sink` and
    /// returns how many descriptors were consumed.
    ///
    /// Spending the whole budget keeps the channel in polling mode and schedules
    /// another poll. Anything less means the ring ran dry, so receive interrupts
    /// are switched back on.
    pub fn poll<K: FrameSink + ?Sized>(&self, sink: &mut K) -> Result<usize, Error> {
        let rx = self.device.rx();
        let port = self.device.port();
        let budget = self.config.poll_budget;
        let stats = &self.stats;

        let work = match rx.drain(port, budget, |frame| match frame {
            Ok(payload) => match sink.deliver(payload) {
                Ok(()) => {
                    stats.add_rx_packets(1);
                    stats.add_rx_bytes(payload.len() as u32);
                }
                Err(Rejected) => stats.add_rx_dropped(1),
            },
            Err(_) => stats.add_rx_errors(1),
        }) {
            Ok(work) => work,
            Err(e) => {
                self.poll_scheduled.store(false, Ordering::Release);
                return Err(e);
            }
        };

        if work < budget {
            self.poll_scheduled.store(false, Ordering::Release);
            rx.resume_interrupts(port);
        } else {
            defmt::trace!("rx budget of {} spent, polling again", budget);
            self.scheduler.schedule();
        }
        Ok(work)
    }
}

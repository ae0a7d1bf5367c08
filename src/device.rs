use crate::{
    builder::Config,
    channel::{Channel, FromDevice, ToDevice},
    dma::DmaAllocator,
    interrupt::InterruptRegistry,
    port::ControlPort,
    Direction, Error,
};
use embedded_hal::blocking::delay::DelayUs;

/// Which channels reported halted during shutdown. A channel that did not had
/// its ring memory leaked rather than freed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub struct ShutdownReport {
    pub tx_quiesced: bool,
    pub rx_quiesced: bool,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.tx_quiesced && self.rx_quiesced
    }
}

/// A DMA engine with one transmit channel of `TX` descriptors and one receive
/// channel of `RX` descriptors behind a shared control port.
pub struct Device<P: ControlPort, const TX: usize, const RX: usize> {
    port: P,
    tx: Channel<ToDevice, TX>,
    rx: Channel<FromDevice, RX>,
}

impl<P: ControlPort, const TX: usize, const RX: usize> Device<P, TX, RX> {
    pub fn new(port: P) -> Self {
        Device {
            port,
            tx: Channel::new(),
            rx: Channel::new(),
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn tx(&self) -> &Channel<ToDevice, TX> {
        &self.tx
    }

    pub fn rx(&self) -> &Channel<FromDevice, RX> {
        &self.rx
    }

    /// Allocates both rings, registers both interrupts, programs coalescing and
    /// starts both channels.
    ///
    /// Any failure undoes every earlier step before the error is returned.
    pub fn bring_up<A, R, T>(&self, config: &Config, allocator: &mut A, registry: &mut R, delay: &mut T) -> Result<(), Error>
    where
        A: DmaAllocator + ?Sized,
        R: InterruptRegistry + ?Sized,
        T: DelayUs<u32>,
    {
        self.tx.initialize(allocator, registry, config.tx_irq)?;
        if let Err(e) = self.rx.initialize(allocator, registry, config.rx_irq) {
            self.tx.release(allocator, registry, true);
            return Err(e);
        }

        self.port.reset(Direction::ToDevice);
        self.port.reset(Direction::FromDevice);
        self.port.configure_delay_and_threshold(
            Direction::FromDevice,
            config.interrupt_delay,
            config.interrupt_threshold,
        );

        let started = self.tx.start(&self.port).and_then(|_| self.rx.start(&self.port));
        if let Err(e) = started {
            defmt::error!("device bring-up failed ({}), rolling back", e);
            let report = self.shutdown(config, allocator, registry, delay);
            if !report.is_clean() {
                defmt::error!("rollback left channels running: {}", report);
            }
            return Err(e);
        }

        defmt::info!("device up: {} tx / {} rx descriptors", TX, RX);
        Ok(())
    }

    /// Stops both channels, waits up to `config.quiesce_timeout` for each to
    /// halt, unregisters the interrupts and frees the rings.
    ///
    /// Never fails. A channel that does not halt keeps its memory.
    pub fn shutdown<A, R, T>(&self, config: &Config, allocator: &mut A, registry: &mut R, delay: &mut T) -> ShutdownReport
    where
        A: DmaAllocator + ?Sized,
        R: InterruptRegistry + ?Sized,
        T: DelayUs<u32>,
    {
        let tx_quiesced = self
            .tx
            .stop(&self.port, delay, config.quiesce_timeout, config.quiesce_poll_interval);
        let rx_quiesced = self
            .rx
            .stop(&self.port, delay, config.quiesce_timeout, config.quiesce_poll_interval);

        self.tx.release(allocator, registry, tx_quiesced);
        self.rx.release(allocator, registry, rx_quiesced);

        let report = ShutdownReport {
            tx_quiesced,
            rx_quiesced,
        };
        defmt::info!("device down: {}", report);
        report
    }

    /// Gives the control port back. Only meaningful once the device is shut
    /// down.
    pub fn free(self) -> P {
        self.port
    }
}

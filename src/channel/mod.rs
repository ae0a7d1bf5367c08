use crate::{
    dma::DmaAllocator,
    interrupt::{InterruptRegistry, IrqNumber, IrqToken},
    port::{ChannelStatus, ControlPort},
    ring::DescriptorRing,
    Direction, Error,
};
use core::cell::RefCell;
use core::marker::PhantomData;
use critical_section::Mutex;
use embedded_hal::blocking::delay::DelayUs;
use fugit::MicrosDurationU32;
use void::Void;

mod rx;
mod tx;

/// Transmit channel marker.
pub struct ToDevice;
/// Receive channel marker.
pub struct FromDevice;

mod sealed {
    pub trait Sealed {}
}

/// Ties a marker type to the runtime `Direction` used for register access.
pub trait ChannelDirection: sealed::Sealed {
    const DIRECTION: Direction;
}

impl sealed::Sealed for ToDevice {}
impl ChannelDirection for ToDevice {
    const DIRECTION: Direction = Direction::ToDevice;
}

impl sealed::Sealed for FromDevice {}
impl ChannelDirection for FromDevice {
    const DIRECTION: Direction = Direction::FromDevice;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum ChannelState {
    Uninitialized,
    /// Ring allocated and interrupt registered, device not started.
    Ready,
    Running,
    Stopped,
}

/// Whether completions are currently signalled by interrupt or picked up by
/// repeated polling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum PollMode {
    Interrupting,
    Polling,
}

struct Inner<const N: usize> {
    state: ChannelState,
    mode: PollMode,
    ring: Option<DescriptorRing<N>>,
    irq: Option<IrqToken>,
}

/// One direction of the DMA engine together with its descriptor ring.
///
/// All cursor updates and the tail register write that publishes them happen
/// inside one critical section per call.
pub struct Channel<D: ChannelDirection, const N: usize> {
    inner: Mutex<RefCell<Inner<N>>>,
    direction: PhantomData<D>,
}

impl<D: ChannelDirection, const N: usize> Default for Channel<D, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ChannelDirection, const N: usize> Channel<D, N> {
    pub const fn new() -> Self {
        Channel {
            inner: Mutex::new(RefCell::new(Inner {
                state: ChannelState::Uninitialized,
                mode: PollMode::Interrupting,
                ring: None,
                irq: None,
            })),
            direction: PhantomData,
        }
    }

    pub fn direction(&self) -> Direction {
        D::DIRECTION
    }

    pub fn state(&self) -> ChannelState {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().state)
    }

    pub fn poll_mode(&self) -> PollMode {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().mode)
    }

    /// `(curr, tail)`, or `None` without a ring.
    pub fn cursors(&self) -> Option<(usize, usize)> {
        critical_section::with(|cs| {
            self.inner
                .borrow(cs)
                .borrow()
                .ring
                .as_ref()
                .map(|ring| (ring.curr(), ring.tail()))
        })
    }

    /// Remaining transmit slots, or `None` without a ring.
    pub fn headroom(&self) -> Option<usize> {
        critical_section::with(|cs| {
            self.inner
                .borrow(cs)
                .borrow()
                .ring
                .as_ref()
                .map(|ring| ring.headroom())
        })
    }

    /// Device address of the ring's first descriptor.
    pub fn base_address(&self) -> Option<u64> {
        critical_section::with(|cs| {
            self.inner
                .borrow(cs)
                .borrow()
                .ring
                .as_ref()
                .map(|ring| ring.base_address())
        })
    }

    /// Allocates the ring and registers the interrupt source. On failure nothing
    /// stays allocated or registered.
    pub fn initialize<A, R>(&self, allocator: &mut A, registry: &mut R, irq: IrqNumber) -> Result<(), Error>
    where
        A: DmaAllocator + ?Sized,
        R: InterruptRegistry + ?Sized,
    {
        match self.state() {
            ChannelState::Uninitialized | ChannelState::Stopped => {}
            _ => return Err(Error::ChannelNotReady),
        }

        let ring = DescriptorRing::<N>::initialize(D::DIRECTION, allocator)?;
        let token = match registry.register(irq, D::DIRECTION) {
            Ok(token) => token,
            Err(e) => {
                defmt::error!("{} irq {} registration failed", D::DIRECTION, irq);
                // Nothing has been posted to a device yet.
                let mut ring = ring;
                ring.release_from_device();
                let _ = ring.teardown(allocator);
                return Err(e);
            }
        };

        critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            inner.ring = Some(ring);
            inner.irq = Some(token);
            inner.mode = PollMode::Interrupting;
            inner.state = ChannelState::Ready;
        });
        defmt::debug!("{} channel ready on irq {}", D::DIRECTION, irq);
        Ok(())
    }

    /// Points the device at the ring, starts it with completion interrupts on
    /// and checks that it reports running.
    ///
    /// Leaves the channel `Ready` on failure so that it can be released.
    pub fn start<P: ControlPort + ?Sized>(&self, port: &P) -> Result<(), Error> {
        let direction = D::DIRECTION;
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            if inner.state != ChannelState::Ready {
                return Err(Error::ChannelNotReady);
            }
            let ring = inner.ring.as_ref().ok_or(Error::ChannelNotReady)?;

            port.set_current_descriptor_address(direction, ring.descriptor_address(ring.curr()));
            port.start(direction);
            port.enable_completion_interrupts(direction);
            if direction == Direction::FromDevice {
                port.set_tail_descriptor_address(direction, ring.descriptor_address(ring.tail()));
            }

            let control = port.read_control(direction);
            if !control.running || !control.completion_interrupt_enabled {
                defmt::error!("{} channel failed to start: {}", direction, control);
                return Err(Error::DeviceStart);
            }

            inner.mode = PollMode::Interrupting;
            inner.state = ChannelState::Running;
            Ok(())
        })?;

        defmt::info!("{} channel running", direction);
        Ok(())
    }

    /// Disables completion interrupts, stops the channel and waits for the
    /// device to report it halted.
    ///
    /// Returns `false` if the channel was still running after `timeout`.
    pub fn stop<P, T>(&self, port: &P, delay: &mut T, timeout: MicrosDurationU32, interval: MicrosDurationU32) -> bool
    where
        P: ControlPort + ?Sized,
        T: DelayUs<u32>,
    {
        let direction = D::DIRECTION;
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            port.disable_completion_interrupts(direction);
            port.stop(direction);
            if inner.state == ChannelState::Running {
                inner.state = ChannelState::Ready;
            }
        });

        let interval = interval.ticks().max(1);
        let mut waited = 0u32;
        loop {
            match self.wait_halted(port) {
                Ok(()) => return true,
                Err(nb::Error::WouldBlock) => {}
                Err(nb::Error::Other(v)) => void::unreachable(v),
            }

            if waited >= timeout.ticks() {
                defmt::warn!("{} channel did not halt within {} us", direction, timeout.ticks());
                return false;
            }
            delay.delay_us(interval);
            waited = waited.saturating_add(interval);
        }
    }

    /// Non-blocking check for the halted bit.
    pub fn wait_halted<P: ControlPort + ?Sized>(&self, port: &P) -> nb::Result<(), Void> {
        if port.read_status(D::DIRECTION).halted {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    /// Drops the ring and the interrupt registration, leaving the channel
    /// `Stopped`.
    ///
    /// With `quiesced` set the ring's memory goes back to the allocator. Without
    /// it the device may still be writing there, so the memory is leaked.
    pub fn release<A, R>(&self, allocator: &mut A, registry: &mut R, quiesced: bool)
    where
        A: DmaAllocator + ?Sized,
        R: InterruptRegistry + ?Sized,
    {
        let (ring, irq) = critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            inner.state = ChannelState::Stopped;
            inner.mode = PollMode::Interrupting;
            (inner.ring.take(), inner.irq.take())
        });

        if let Some(token) = irq {
            registry.unregister(token);
        }

        if let Some(mut ring) = ring {
            if quiesced {
                ring.release_from_device();
                if ring.teardown(allocator).is_err() {
                    defmt::error!("{} ring still owned by the device, leaking it", D::DIRECTION);
                }
            } else {
                // The ring goes out of scope without teardown, leaking its memory.
                defmt::error!(
                    "{} channel never halted, leaking {} buffers",
                    D::DIRECTION,
                    N
                );
            }
        }
        defmt::debug!("{} channel released", D::DIRECTION);
    }

    pub fn read_status<P: ControlPort + ?Sized>(&self, port: &P) -> ChannelStatus {
        port.read_status(D::DIRECTION)
    }

    /// `true` when this channel has an interrupt latched.
    pub fn interrupt_pending<P: ControlPort + ?Sized>(&self, port: &P) -> bool {
        port.read_status(D::DIRECTION).interrupt_pending
    }

    pub fn acknowledge_interrupt<P: ControlPort + ?Sized>(&self, port: &P) {
        port.acknowledge_interrupt(D::DIRECTION);
    }

    /// Masks completion interrupts and switches to polling.
    pub fn enter_polling<P: ControlPort + ?Sized>(&self, port: &P) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            port.disable_completion_interrupts(D::DIRECTION);
            inner.mode = PollMode::Polling;
        });
    }

    /// Switches back to interrupts. Does nothing unless the channel is running.
    pub fn resume_interrupts<P: ControlPort + ?Sized>(&self, port: &P) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            if inner.state == ChannelState::Running {
                inner.mode = PollMode::Interrupting;
                port.enable_completion_interrupts(D::DIRECTION);
            }
        });
    }
}

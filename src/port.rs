/// Which way a channel moves data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum Direction {
    /// Host memory to the packet engine (transmit).
    ToDevice,
    /// Packet engine to host memory (receive).
    FromDevice,
}

/// Decoded channel status register.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, defmt::Format)]
pub struct ChannelStatus {
    pub halted: bool,
    pub idle: bool,
    /// A completion or delay interrupt is latched for this channel.
    pub interrupt_pending: bool,
    /// The channel latched an internal, slave or decode error.
    pub error: bool,
}

/// Decoded channel control register.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, defmt::Format)]
pub struct ChannelControl {
    pub running: bool,
    pub completion_interrupt_enabled: bool,
}

/// Register access for a DMA engine with one transmit and one receive channel.
///
/// Methods take `&self` since both channels and interrupt handlers share the
/// port. Implementations must make each call a single register access (or a
/// short fixed sequence of them) that never blocks.
pub trait ControlPort {
    fn read_status(&self, direction: Direction) -> ChannelStatus;
    fn read_control(&self, direction: Direction) -> ChannelControl;

    fn reset(&self, direction: Direction);
    fn start(&self, direction: Direction);
    fn stop(&self, direction: Direction);

    fn enable_completion_interrupts(&self, direction: Direction);
    fn disable_completion_interrupts(&self, direction: Direction);
    fn acknowledge_interrupt(&self, direction: Direction);

    fn set_current_descriptor_address(&self, direction: Direction, address: u64);

    /// Moving the tail hands every descriptor up to and including `address` to
    /// the device.
    fn set_tail_descriptor_address(&self, direction: Direction, address: u64);

    /// Interrupt coalescing: raise an interrupt after `threshold` completions or
    /// once `delay` timer ticks pass without one.
    fn configure_delay_and_threshold(&self, direction: Direction, delay: u8, threshold: u8);
}

impl<P: ControlPort + ?Sized> ControlPort for &P {
    fn read_status(&self, direction: Direction) -> ChannelStatus {
        (**self).read_status(direction)
    }

    fn read_control(&self, direction: Direction) -> ChannelControl {
        (**self).read_control(direction)
    }

    fn reset(&self, direction: Direction) {
        (**self).reset(direction)
    }

    fn start(&self, direction: Direction) {
        (**self).start(direction)
    }

    fn stop(&self, direction: Direction) {
        (**self).stop(direction)
    }

    fn enable_completion_interrupts(&self, direction: Direction) {
        (**self).enable_completion_interrupts(direction)
    }

    fn disable_completion_interrupts(&self, direction: Direction) {
        (**self).disable_completion_interrupts(direction)
    }

    fn acknowledge_interrupt(&self, direction: Direction) {
        (**self).acknowledge_interrupt(direction)
    }

    fn set_current_descriptor_address(&self, direction: Direction, address: u64) {
        (**self).set_current_descriptor_address(direction, address)
    }

    fn set_tail_descriptor_address(&self, direction: Direction, address: u64) {
        (**self).set_tail_descriptor_address(direction, address)
    }

    fn configure_delay_and_threshold(&self, direction: Direction, delay: u8, threshold: u8) {
        (**self).configure_delay_and_threshold(direction, delay, threshold)
    }
}

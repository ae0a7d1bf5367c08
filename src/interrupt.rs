use crate::{Direction, Error};

/// Platform interrupt line number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub struct IrqNumber(pub u16);

/// Proof that an interrupt source is registered. Handing it back to
/// `InterruptRegistry::unregister` is the only way to release the source.
#[derive(Debug, PartialEq, Eq, defmt::Format)]
pub struct IrqToken {
    irq: IrqNumber,
    source: Direction,
}

impl IrqToken {
    /// For registry implementations.
    pub fn new(irq: IrqNumber, source: Direction) -> Self {
        IrqToken { irq, source }
    }

    pub fn irq(&self) -> IrqNumber {
        self.irq
    }

    pub fn source(&self) -> Direction {
        self.source
    }
}

/// Outcome of an interrupt handler, for shared interrupt lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum IrqReturn {
    Handled,
    NotOurs,
}

/// Binds interrupt lines to the adapter's handlers.
pub trait InterruptRegistry {
    /// Routes `irq` to the handler for `source` (`Adapter::on_tx_interrupt` for
    /// `Direction::ToDevice`, `Adapter::on_rx_interrupt` for
    /// `Direction::FromDevice`).
    fn register(&mut self, irq: IrqNumber, source: Direction) -> Result<IrqToken, Error>;
    fn unregister(&mut self, token: IrqToken);
}

/// Requests that `Adapter::poll` run soon, outside interrupt context.
pub trait Scheduler {
    fn schedule(&self);
}

impl<S: Scheduler + ?Sized> Scheduler for &S {
    fn schedule(&self) {
        (**self).schedule()
    }
}

use crate::interrupt::IrqNumber;
use fugit::MicrosDurationU32;

/// Descriptors drained per poll before yielding.
pub const DEFAULT_POLL_BUDGET: usize = 64;
pub const DEFAULT_INTERRUPT_DELAY: u8 = 64;
pub const DEFAULT_TX_IRQ: IrqNumber = IrqNumber(62);
pub const DEFAULT_RX_IRQ: IrqNumber = IrqNumber(63);

/// Adapter settings, produced by `Builder::freeze`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub struct Config {
    pub poll_budget: usize,
    /// Receive interrupt coalescing timeout, in device timer ticks.
    pub interrupt_delay: u8,
    /// Receive completions per interrupt.
    pub interrupt_threshold: u8,
    pub tx_irq: IrqNumber,
    pub rx_irq: IrqNumber,
    /// Zero-pad frames shorter than the Ethernet minimum before transmitting.
    pub pad_short_frames: bool,
    /// How long shutdown waits for each channel to report halted.
    pub quiesce_timeout: MicrosDurationU32,
    pub quiesce_poll_interval: MicrosDurationU32,
}

impl Default for Config {
    fn default() -> Self {
        Builder::new().freeze()
    }
}

pub struct Builder {
    poll_budget: usize,
    interrupt_delay: u8,
    interrupt_threshold: Option<u8>,
    tx_irq: IrqNumber,
    rx_irq: IrqNumber,
    pad_short_frames: bool,
    quiesce_timeout: MicrosDurationU32,
    quiesce_poll_interval: MicrosDurationU32,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            poll_budget: DEFAULT_POLL_BUDGET,
            interrupt_delay: DEFAULT_INTERRUPT_DELAY,
            interrupt_threshold: None,
            tx_irq: DEFAULT_TX_IRQ,
            rx_irq: DEFAULT_RX_IRQ,
            pad_short_frames: true,
            quiesce_timeout: MicrosDurationU32::from_ticks(10_000),
            quiesce_poll_interval: MicrosDurationU32::from_ticks(10),
        }
    }

    pub fn set_poll_budget(mut self, budget: usize) -> Self {
        if budget == 0 {
            panic!("Poll budget must be at least one descriptor");
        }
        self.poll_budget = budget;
        self
    }

    pub fn poll_budget(&self) -> usize {
        self.poll_budget
    }

    pub fn set_interrupt_coalescing(mut self, delay: u8, threshold: u8) -> Self {
        self.interrupt_delay = delay;
        self.interrupt_threshold = Some(threshold.max(1));
        self
    }

    pub fn set_irqs(mut self, tx: IrqNumber, rx: IrqNumber) -> Self {
        self.tx_irq = tx;
        self.rx_irq = rx;
        self
    }

    pub fn disable_short_frame_padding(mut self) -> Self {
        self.pad_short_frames = false;
        self
    }

    pub fn set_quiesce_timeout(mut self, timeout: MicrosDurationU32, poll_interval: MicrosDurationU32) -> Self {
        self.quiesce_timeout = timeout;
        self.quiesce_poll_interval = poll_interval;
        self
    }

    /// Unless set explicitly, the coalescing threshold is half the poll budget so
    /// one poll pass covers two interrupts' worth of frames.
    pub fn freeze(self) -> Config {
        let threshold = self
            .interrupt_threshold
            .unwrap_or_else(|| (self.poll_budget / 2).clamp(1, u8::MAX as usize) as u8);

        Config {
            poll_budget: self.poll_budget,
            interrupt_delay: self.interrupt_delay,
            interrupt_threshold: threshold,
            tx_irq: self.tx_irq,
            rx_irq: self.rx_irq,
            pad_short_frames: self.pad_short_frames,
            quiesce_timeout: self.quiesce_timeout,
            quiesce_poll_interval: self.quiesce_poll_interval,
        }
    }
}

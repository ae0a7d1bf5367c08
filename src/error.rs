use core::fmt;

/// Failures reported by the ring, channel, device and adapter layers.
///
/// No operation that returns one of these moves a ring cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum Error {
    /// A descriptor table or buffer could not be allocated. Everything allocated
    /// before the failure has already been released.
    Allocation,
    /// The device did not report running with completion interrupts enabled
    /// after being started.
    DeviceStart,
    /// Every transmit descriptor is outstanding. Retry once the device has
    /// completed some of them.
    RingFull,
    /// The frame is empty or larger than the channel accepts.
    InvalidLength,
    /// The channel is not running.
    ChannelNotReady,
    /// The platform refused to register an interrupt source.
    InterruptRegistration,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Error::Allocation => "DMA allocation failed",
            Error::DeviceStart => "DMA channel failed to start",
            Error::RingFull => "descriptor ring is full",
            Error::InvalidLength => "invalid frame length",
            Error::ChannelNotReady => "channel is not running",
            Error::InterruptRegistration => "interrupt registration failed",
        };
        f.write_str(description)
    }
}

impl Error {
    /// `true` for errors a caller can clear by retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RingFull)
    }
}

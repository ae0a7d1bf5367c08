//! Scatter-gather DMA driver for memory-mapped Ethernet packet engines
//!
//! The driver moves frames between host memory and a DMA engine with one
//! transmit (memory to device) and one receive (device to memory) channel. Each
//! channel owns a fixed-capacity ring of descriptors whose ownership passes
//! between software and the device through the channel's tail register and the
//! descriptors' completion bits.
//!
//! The pieces, from the bottom up:
//!
//! - [`DescriptorRing`]: the descriptor table, its buffers and the `curr`/`tail`
//!   cursors.
//! - [`Channel`]: a ring bound to one direction, guarded by a critical section.
//!   Transmit channels [`send`](Channel::send), receive channels
//!   [`drain`](Channel::drain) with a budget.
//! - [`Device`]: both channels plus the [`ControlPort`] they share, with
//!   all-or-nothing bring-up and a bounded shutdown.
//! - [`Adapter`]: the network interface. Counts traffic, pads short frames and
//!   runs the interrupt plus budgeted-poll receive path.
//!
//! Register access, DMA memory, interrupt routing and deferred work come from
//! the platform through the [`ControlPort`], [`DmaAllocator`],
//! [`InterruptRegistry`] and [`Scheduler`] traits.
//!
//! The [`mailbox`] module implements the simpler shared-memory handshake used by
//! the packet core's polled interface.
//!
//! # Logging
//!
//! Diagnostics are emitted through [`defmt`]. The final binary selects the
//! global logger.

#![cfg_attr(not(test), no_std)]

mod adapter;
mod builder;
mod channel;
mod descriptor;
mod device;
mod dma;
mod error;
mod interrupt;
pub mod mailbox;
mod port;
mod ring;
mod stats;
mod volatile_read_write;

#[cfg(test)]
mod test_support;

pub use adapter::{Adapter, FrameSink, Rejected};
pub use builder::{
    Builder, Config, DEFAULT_INTERRUPT_DELAY, DEFAULT_POLL_BUDGET, DEFAULT_RX_IRQ, DEFAULT_TX_IRQ,
};
pub use channel::{Channel, ChannelDirection, ChannelState, FromDevice, PollMode, ToDevice};
pub use descriptor::{
    Descriptor, DescriptorReader, DescriptorState, DescriptorWriter, TransferError,
    DESCRIPTOR_ALIGNMENT,
};
pub use device::{Device, ShutdownReport};
pub use dma::{DmaAllocator, DmaRegion, BUFFER_ALIGNMENT, BUFFER_SIZE};
pub use error::Error;
pub use interrupt::{InterruptRegistry, IrqNumber, IrqReturn, IrqToken, Scheduler};
pub use port::{ChannelControl, ChannelStatus, ControlPort, Direction};
pub use ring::DescriptorRing;
pub use stats::{Statistics, StatisticsSnapshot};

/// Largest frame accepted for transmission: an untagged Ethernet frame without
/// its FCS.
pub const MAX_FRAME_LEN: usize = 1514;

/// Ethernet minimum frame length without FCS. Shorter frames are padded by the
/// adapter.
pub const MIN_FRAME_LEN: usize = 60;

/// Descriptors per ring used by the reference configuration.
pub const DEFAULT_RING_CAPACITY: usize = 128;

//! Host-side stand-ins for the platform: a heap-backed DMA allocator, a
//! simulated DMA engine that walks the real descriptor tables, and recording
//! implementations of the remaining collaborator traits.

use crate::{
    adapter::{FrameSink, Rejected},
    descriptor::{Descriptor, TransferError},
    dma::{DmaAllocator, DmaRegion},
    interrupt::{InterruptRegistry, IrqNumber, IrqToken, Scheduler},
    port::{ChannelControl, ChannelStatus, ControlPort},
    Direction, Error,
};
use core::cell::RefCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use critical_section::Mutex;
use embedded_hal::blocking::delay::DelayUs;
use std::alloc::{self, Layout};

#[defmt::global_logger]
struct NullLogger;

unsafe impl defmt::Logger for NullLogger {
    fn acquire() {}
    unsafe fn flush() {}
    unsafe fn release() {}
    unsafe fn write(_bytes: &[u8]) {}
}

defmt::timestamp!("{=u32}", 0u32);

/// Zeroed heap memory whose device address is its host address.
pub struct HeapDmaAllocator {
    live: Vec<(usize, Layout)>,
    allocations: usize,
    fail_on: Option<usize>,
}

impl HeapDmaAllocator {
    pub fn new() -> Self {
        HeapDmaAllocator {
            live: Vec::new(),
            allocations: 0,
            fail_on: None,
        }
    }

    /// Makes the `n`th call to `allocate` (counting from 1) fail.
    pub fn fail_on_allocation(&mut self, n: usize) {
        self.fail_on = Some(n);
    }

    /// Calls to `allocate` so far, failed ones included.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Regions handed out and not yet freed.
    pub fn live(&self) -> usize {
        self.live.len()
    }
}

impl DmaAllocator for HeapDmaAllocator {
    fn allocate(&mut self, size: usize, align: usize) -> Result<DmaRegion, Error> {
        self.allocations += 1;
        if self.fail_on == Some(self.allocations) {
            return Err(Error::Allocation);
        }

        let layout = Layout::from_size_align(size.max(1), align).map_err(|_| Error::Allocation)?;
        let host = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or(Error::Allocation)?;
        let address = host.as_ptr() as usize;
        self.live.push((address, layout));
        Ok(unsafe { DmaRegion::new(host, address as u64, size) })
    }

    fn free(&mut self, region: DmaRegion) {
        let address = region.host_ptr() as usize;
        let position = self
            .live
            .iter()
            .position(|(a, _)| *a == address)
            .expect("region was not allocated here");
        let (_, layout) = self.live.swap_remove(position);
        unsafe { alloc::dealloc(address as *mut u8, layout) };
    }
}

impl Drop for HeapDmaAllocator {
    fn drop(&mut self) {
        for (address, layout) in self.live.drain(..) {
            unsafe { alloc::dealloc(address as *mut u8, layout) };
        }
    }
}

pub struct RecordingRegistry {
    registered: Vec<(IrqNumber, Direction)>,
    refused: Vec<IrqNumber>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        RecordingRegistry {
            registered: Vec::new(),
            refused: Vec::new(),
        }
    }

    pub fn refuse(&mut self, irq: IrqNumber) {
        self.refused.push(irq);
    }

    pub fn registered(&self) -> usize {
        self.registered.len()
    }

    pub fn is_registered(&self, irq: IrqNumber, source: Direction) -> bool {
        self.registered.contains(&(irq, source))
    }
}

impl InterruptRegistry for RecordingRegistry {
    fn register(&mut self, irq: IrqNumber, source: Direction) -> Result<IrqToken, Error> {
        if self.refused.contains(&irq) {
            return Err(Error::InterruptRegistration);
        }
        self.registered.push((irq, source));
        Ok(IrqToken::new(irq, source))
    }

    fn unregister(&mut self, token: IrqToken) {
        let entry = (token.irq(), token.source());
        self.registered.retain(|e| *e != entry);
    }
}

#[derive(Default)]
pub struct CountingScheduler {
    scheduled: AtomicUsize,
}

impl CountingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::Relaxed)
    }
}

impl Scheduler for CountingScheduler {
    fn schedule(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct CountingDelay {
    total_us: u32,
    calls: usize,
}

impl CountingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_us(&self) -> u32 {
        self.total_us
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl DelayUs<u32> for CountingDelay {
    fn delay_us(&mut self, us: u32) {
        self.total_us += us;
        self.calls += 1;
    }
}

/// Sink that keeps every frame, optionally refusing once it holds `capacity`.
pub struct CollectingSink {
    pub frames: Vec<Vec<u8>>,
    capacity: usize,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        CollectingSink {
            frames: Vec::new(),
            capacity,
        }
    }
}

impl FrameSink for CollectingSink {
    fn deliver(&mut self, frame: &[u8]) -> Result<(), Rejected> {
        if self.frames.len() >= self.capacity {
            return Err(Rejected);
        }
        self.frames.push(frame.to_vec());
        Ok(())
    }
}

struct ChannelModel {
    running: bool,
    halted: bool,
    interrupts_enabled: bool,
    interrupt_pending: bool,
    error: bool,
    current: u64,
    tail: Option<u64>,
    last_done: Option<u64>,
    coalescing: (u8, u8),
    resets: usize,
    refuse_start: bool,
    refuse_halt: bool,
}

impl ChannelModel {
    const fn new() -> Self {
        ChannelModel {
            running: false,
            halted: true,
            interrupts_enabled: false,
            interrupt_pending: false,
            error: false,
            current: 0,
            tail: None,
            last_done: None,
            coalescing: (0, 0),
            resets: 0,
            refuse_start: false,
            refuse_halt: false,
        }
    }

    /// Next descriptor inside the window the tail register grants, if any.
    fn next_in_window(&self) -> Option<u64> {
        if !self.running {
            return None;
        }
        let tail = self.tail?;
        match self.last_done {
            None => Some(self.current),
            Some(done) if done == tail => None,
            Some(done) => Some(descriptor(done).next_address()),
        }
    }
}

fn descriptor(address: u64) -> &'static mut Descriptor {
    unsafe { &mut *(address as usize as *mut Descriptor) }
}

fn index(direction: Direction) -> usize {
    match direction {
        Direction::ToDevice => 0,
        Direction::FromDevice => 1,
    }
}

/// A DMA engine that follows the descriptor tables through their device
/// addresses. It only moves when a test tells it to.
pub struct SimulatedDevice {
    channels: Mutex<RefCell<[ChannelModel; 2]>>,
    transmitted: Mutex<RefCell<Vec<Vec<u8>>>>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        SimulatedDevice {
            channels: Mutex::new(RefCell::new([ChannelModel::new(), ChannelModel::new()])),
            transmitted: Mutex::new(RefCell::new(Vec::new())),
        }
    }

    fn with<R>(&self, direction: Direction, f: impl FnOnce(&mut ChannelModel) -> R) -> R {
        critical_section::with(|cs| f(&mut self.channels.borrow(cs).borrow_mut()[index(direction)]))
    }

    pub fn refuse_start(&self, direction: Direction) {
        self.with(direction, |c| c.refuse_start = true);
    }

    pub fn refuse_halt(&self, direction: Direction) {
        self.with(direction, |c| c.refuse_halt = true);
    }

    pub fn current_descriptor(&self, direction: Direction) -> u64 {
        self.with(direction, |c| c.current)
    }

    pub fn tail_descriptor(&self, direction: Direction) -> u64 {
        self.with(direction, |c| c.tail.unwrap_or(0))
    }

    pub fn interrupts_enabled(&self, direction: Direction) -> bool {
        self.with(direction, |c| c.interrupts_enabled)
    }

    pub fn interrupt_pending(&self, direction: Direction) -> bool {
        self.with(direction, |c| c.interrupt_pending)
    }

    pub fn is_running(&self, direction: Direction) -> bool {
        self.with(direction, |c| c.running)
    }

    pub fn coalescing(&self, direction: Direction) -> (u8, u8) {
        self.with(direction, |c| c.coalescing)
    }

    pub fn resets(&self, direction: Direction) -> usize {
        self.with(direction, |c| c.resets)
    }

    /// Latches an error and raises the channel's interrupt.
    pub fn raise_error(&self, direction: Direction) {
        self.with(direction, |c| {
            c.error = true;
            c.interrupt_pending = true;
        });
    }

    /// Transmits up to `limit` posted frames and returns how many went out.
    pub fn complete_transmits(&self, limit: usize) -> usize {
        let mut sent = Vec::new();
        let count = self.with(Direction::ToDevice, |c| {
            let mut count = 0;
            while count < limit {
                let address = match c.next_in_window() {
                    Some(address) => address,
                    None => break,
                };
                let entry = descriptor(address);
                let length = entry.read().requested_length();
                let payload =
                    unsafe { core::slice::from_raw_parts(entry.buffer_address() as usize as *const u8, length) };
                sent.push(payload.to_vec());
                entry.modify(|w| w.set_complete(length));
                c.last_done = Some(address);
                count += 1;
            }
            if count > 0 {
                c.interrupt_pending = true;
            }
            count
        });
        critical_section::with(|cs| self.transmitted.borrow(cs).borrow_mut().extend(sent));
        count
    }

    /// Frames taken off the transmit ring so far, in wire order.
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        critical_section::with(|cs| self.transmitted.borrow(cs).borrow().clone())
    }

    /// Writes one frame into the next receive descriptor. `false` when the
    /// window is exhausted.
    pub fn receive(&self, frame: &[u8]) -> bool {
        self.fill(frame, None)
    }

    /// Completes the next receive descriptor with error flags set.
    pub fn receive_with_error(&self, error: TransferError) -> bool {
        self.fill(&[], Some(error))
    }

    fn fill(&self, frame: &[u8], error: Option<TransferError>) -> bool {
        self.with(Direction::FromDevice, |c| {
            let address = match c.next_in_window() {
                Some(address) => address,
                None => return false,
            };
            let entry = descriptor(address);
            let status = entry.read();
            if status.is_complete() || frame.len() > status.requested_length() {
                return false;
            }

            unsafe {
                core::ptr::copy_nonoverlapping(
                    frame.as_ptr(),
                    entry.buffer_address() as usize as *mut u8,
                    frame.len(),
                );
            }
            entry.modify(|w| {
                let w = w.set_complete(frame.len());
                match error {
                    Some(error) => w.set_error(error),
                    None => w,
                }
            });
            c.last_done = Some(address);
            c.interrupt_pending = true;
            true
        })
    }
}

impl ControlPort for SimulatedDevice {
    fn read_status(&self, direction: Direction) -> ChannelStatus {
        self.with(direction, |c| ChannelStatus {
            halted: c.halted,
            idle: c.tail.is_some() && c.last_done == c.tail,
            interrupt_pending: c.interrupt_pending,
            error: c.error,
        })
    }

    fn read_control(&self, direction: Direction) -> ChannelControl {
        self.with(direction, |c| ChannelControl {
            running: c.running,
            completion_interrupt_enabled: c.interrupts_enabled,
        })
    }

    fn reset(&self, direction: Direction) {
        self.with(direction, |c| {
            let (refuse_start, refuse_halt, resets) = (c.refuse_start, c.refuse_halt, c.resets);
            *c = ChannelModel::new();
            c.refuse_start = refuse_start;
            c.refuse_halt = refuse_halt;
            c.resets = resets + 1;
        });
    }

    fn start(&self, direction: Direction) {
        self.with(direction, |c| {
            if !c.refuse_start {
                c.running = true;
                c.halted = false;
            }
        });
    }

    fn stop(&self, direction: Direction) {
        self.with(direction, |c| {
            if !c.refuse_halt {
                c.running = false;
                c.halted = true;
            }
        });
    }

    fn enable_completion_interrupts(&self, direction: Direction) {
        self.with(direction, |c| c.interrupts_enabled = true);
    }

    fn disable_completion_interrupts(&self, direction: Direction) {
        self.with(direction, |c| c.interrupts_enabled = false);
    }

    fn acknowledge_interrupt(&self, direction: Direction) {
        self.with(direction, |c| {
            c.interrupt_pending = false;
            c.error = false;
        });
    }

    fn set_current_descriptor_address(&self, direction: Direction, address: u64) {
        self.with(direction, |c| {
            c.current = address;
            c.last_done = None;
        });
    }

    fn set_tail_descriptor_address(&self, direction: Direction, address: u64) {
        self.with(direction, |c| c.tail = Some(address));
    }

    fn configure_delay_and_threshold(&self, direction: Direction, delay: u8, threshold: u8) {
        self.with(direction, |c| c.coalescing = (delay, threshold));
    }
}

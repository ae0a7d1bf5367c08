use crate::{
    descriptor::{Descriptor, DescriptorReader, DescriptorState, DESCRIPTOR_ALIGNMENT},
    dma::{dma_barrier, DmaAllocator, DmaRegion, BUFFER_ALIGNMENT, BUFFER_SIZE},
    Direction, Error,
};
use core::mem::size_of;
use core::sync::atomic::{fence, Ordering};
use heapless::Vec;

/// Fixed-capacity circular descriptor table shared with one DMA channel.
///
/// `curr` is the oldest descriptor software has not reclaimed yet and `tail`
/// bounds what the device may consume. Transmit rings start with both at 0 and
/// admit at most `N - 1` outstanding frames. Receive rings start fully armed
/// with `tail = N - 2`, keeping one slot between the device's position and the
/// end of its window.
pub struct DescriptorRing<const N: usize> {
    direction: Direction,
    table: DmaRegion,
    buffers: Vec<DmaRegion, N>,
    states: [DescriptorState; N],
    curr: usize,
    tail: usize,
}

impl<const N: usize> DescriptorRing<N> {
    const CAPACITY_CHECK: () = assert!(N >= 2, "a descriptor ring needs at least two slots");

    /// Allocates the descriptor table and one `BUFFER_SIZE` buffer per slot, then
    /// links the table into a circle.
    ///
    /// If any allocation fails, everything allocated so far is freed before
    /// `Error::Allocation` is returned.
    pub fn initialize<A: DmaAllocator + ?Sized>(
        direction: Direction,
        allocator: &mut A,
    ) -> Result<Self, Error> {
        let () = Self::CAPACITY_CHECK;

        let table_size = N * size_of::<Descriptor>();
        let table = allocator.allocate(table_size, DESCRIPTOR_ALIGNMENT)?;
        if table.host_ptr() as usize % DESCRIPTOR_ALIGNMENT != 0 || table.len() < table_size {
            defmt::error!("{} descriptor table is misaligned or short", direction);
            allocator.free(table);
            return Err(Error::Allocation);
        }

        let mut buffers: Vec<DmaRegion, N> = Vec::new();
        for index in 0..N {
            match allocator.allocate(BUFFER_SIZE, BUFFER_ALIGNMENT) {
                Ok(region) => {
                    buffers.push(region).ok();
                }
                Err(e) => {
                    defmt::warn!("{} buffer {} of {} failed to allocate", direction, index, N);
                    while let Some(region) = buffers.pop() {
                        allocator.free(region);
                    }
                    allocator.free(table);
                    return Err(e);
                }
            }
        }

        let mut ring = DescriptorRing {
            direction,
            table,
            buffers,
            states: [DescriptorState::Free; N],
            curr: 0,
            tail: 0,
        };

        for index in 0..N {
            let next = ring.descriptor_address(Self::next(index));
            let buffer = ring.buffers[index].device_address();
            unsafe {
                ring.descriptor_ptr(index)
                    .write_volatile(Descriptor::new(next, buffer));
            }
        }

        if direction == Direction::FromDevice {
            for index in 0..N {
                ring.arm_for_receive(index);
            }
            ring.tail = N - 2;
        }
        dma_barrier();

        defmt::debug!(
            "{} ring ready: {} slots at {=u64:#x}",
            direction,
            N,
            ring.base_address()
        );
        Ok(ring)
    }

    /// Frees every buffer and the table.
    ///
    /// Refused, handing the ring back, while any descriptor is still posted to
    /// the device.
    pub fn teardown<A: DmaAllocator + ?Sized>(mut self, allocator: &mut A) -> Result<(), Self> {
        if self.has_posted() {
            return Err(self);
        }

        while let Some(region) = self.buffers.pop() {
            allocator.free(region);
        }
        allocator.free(self.table);
        Ok(())
    }

    /// Takes every descriptor back from the device. Only call this once the
    /// channel is known to be halted.
    pub fn release_from_device(&mut self) {
        for state in self.states.iter_mut() {
            *state = DescriptorState::Free;
        }
    }

    pub const fn next(index: usize) -> usize {
        (index + 1) % N
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn curr(&self) -> usize {
        self.curr
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Number of slots from `curr` up to (not including) `tail`.
    pub fn outstanding(&self) -> usize {
        (self.tail + N - self.curr) % N
    }

    /// How many more frames a transmit ring accepts before reporting
    /// `Error::RingFull`.
    pub fn headroom(&self) -> usize {
        N - 1 - self.outstanding()
    }

    pub fn state(&self, index: usize) -> DescriptorState {
        self.states[index]
    }

    pub fn has_posted(&self) -> bool {
        self.states.iter().any(|s| *s == DescriptorState::Posted)
    }

    pub fn is_complete(&self, index: usize) -> bool {
        self.descriptor(index).read().is_complete()
    }

    /// Bytes the device reported transferring for the descriptor at `index`.
    pub fn length(&self, index: usize) -> usize {
        self.descriptor(index).read().transferred_length()
    }

    pub fn status(&self, index: usize) -> DescriptorReader {
        self.descriptor(index).read()
    }

    pub fn base_address(&self) -> u64 {
        self.table.device_address()
    }

    /// Device address of the descriptor at `index`, as written to the current
    /// and tail descriptor registers.
    pub fn descriptor_address(&self, index: usize) -> u64 {
        self.base_address() + (index * size_of::<Descriptor>()) as u64
    }

    fn descriptor_ptr(&self, index: usize) -> *mut Descriptor {
        assert!(index < N, "descriptor index out of range");
        unsafe { (self.table.host_ptr() as *mut Descriptor).add(index) }
    }

    pub(crate) fn descriptor(&self, index: usize) -> &Descriptor {
        unsafe { &*self.descriptor_ptr(index) }
    }

    fn descriptor_mut(&mut self, index: usize) -> &mut Descriptor {
        unsafe { &mut *self.descriptor_ptr(index) }
    }

    /// Notices a device completion. Posted descriptors whose complete bit is set
    /// become `Completed`.
    fn observe(&mut self, index: usize) -> DescriptorState {
        if self.states[index] == DescriptorState::Posted && self.is_complete(index) {
            // Buffer contents must not be read ahead of the status word.
            fence(Ordering::Acquire);
            self.states[index] = DescriptorState::Completed;
        }
        self.states[index]
    }

    fn arm_for_receive(&mut self, index: usize) {
        self.descriptor_mut(index)
            .write(|w| w.set_length(BUFFER_SIZE).set_start_of_frame().set_end_of_frame());
        self.states[index] = DescriptorState::Posted;
    }

    /// Walks `curr` forward over completed transmit descriptors. Stops at `tail`
    /// so completion bits left in slots that were never posted are ignored.
    pub(crate) fn reclaim(&mut self) -> usize {
        let mut reclaimed = 0;
        while self.curr != self.tail && self.observe(self.curr) == DescriptorState::Completed {
            self.states[self.curr] = DescriptorState::Free;
            self.curr = Self::next(self.curr);
            reclaimed += 1;
        }
        reclaimed
    }

    /// Copies `payload` into the slot at `tail`, arms it and advances `tail`.
    /// Returns the device address of the armed descriptor, which the caller must
    /// write to the tail register.
    pub(crate) fn post(&mut self, payload: &[u8]) -> Result<u64, Error> {
        if payload.is_empty() || payload.len() > BUFFER_SIZE {
            return Err(Error::InvalidLength);
        }

        let next = Self::next(self.tail);
        if next == self.curr {
            return Err(Error::RingFull);
        }

        let index = self.tail;
        let length = self.buffers[index].fill(payload);
        self.descriptor_mut(index)
            .write(|w| w.set_length(length).set_start_of_frame().set_end_of_frame());
        self.states[index] = DescriptorState::Posted;
        dma_barrier();

        self.tail = next;
        Ok(self.descriptor_address(index))
    }

    /// Index of the descriptor at `curr` if the device has completed it.
    pub(crate) fn next_completed(&mut self) -> Option<usize> {
        let index = self.curr;
        match self.observe(index) {
            DescriptorState::Completed => Some(index),
            _ => None,
        }
    }

    /// The received bytes of a completed descriptor.
    pub(crate) fn payload(&self, index: usize) -> &[u8] {
        self.buffers[index].contents(self.length(index))
    }

    /// Re-arms the completed descriptor at `curr` and moves both cursors on,
    /// widening the device's window by one slot.
    pub(crate) fn recycle_current(&mut self) {
        let index = self.curr;
        self.arm_for_receive(index);
        self.curr = Self::next(self.curr);
        self.tail = Self::next(self.tail);
    }
}

use crate::Error;
use core::ptr::NonNull;
use core::sync::atomic::{fence, Ordering};
use embedded_dma::{ReadBuffer, WriteBuffer};

/// Size of each descriptor's data buffer.
pub const BUFFER_SIZE: usize = 4096;

/// Alignment requested for data buffers.
pub const BUFFER_ALIGNMENT: usize = 64;

/// A block of memory both the CPU and the DMA engine can reach.
///
/// A region has no destructor. Dropping one without handing it back to its
/// allocator leaks it, which is what teardown does when the device cannot be
/// shown to have stopped using it.
pub struct DmaRegion {
    host: NonNull<u8>,
    device_address: u64,
    len: usize,
}

// The region is only reached through the ring that owns it.
unsafe impl Send for DmaRegion {}

impl DmaRegion {
    /// # Safety
    ///
    /// `host` must be valid for reads and writes of `len` bytes until the region
    /// is returned to the allocator that created it, and `device_address` must be
    /// the address the DMA engine uses for the same memory.
    pub unsafe fn new(host: NonNull<u8>, device_address: u64, len: usize) -> Self {
        DmaRegion {
            host,
            device_address,
            len,
        }
    }

    pub fn host_ptr(&self) -> *mut u8 {
        self.host.as_ptr()
    }

    pub fn device_address(&self) -> u64 {
        self.device_address
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies `payload` to the start of the region and returns the byte count.
    pub(crate) fn fill(&mut self, payload: &[u8]) -> usize {
        let (ptr, len) = unsafe { self.write_buffer() };
        let count = payload.len().min(len);
        unsafe {
            core::ptr::copy_nonoverlapping(payload.as_ptr(), ptr, count);
        }
        count
    }

    /// The first `length` bytes of the region, clamped to its size.
    pub(crate) fn contents(&self, length: usize) -> &[u8] {
        let (ptr, len) = unsafe { self.read_buffer() };
        unsafe { core::slice::from_raw_parts(ptr, length.min(len)) }
    }
}

unsafe impl ReadBuffer for DmaRegion {
    type Word = u8;

    unsafe fn read_buffer(&self) -> (*const u8, usize) {
        (self.host.as_ptr() as *const u8, self.len)
    }
}

unsafe impl WriteBuffer for DmaRegion {
    type Word = u8;

    unsafe fn write_buffer(&mut self) -> (*mut u8, usize) {
        (self.host.as_ptr(), self.len)
    }
}

/// Orders descriptor and buffer writes before the register write that hands
/// them to the device.
#[inline]
pub(crate) fn dma_barrier() {
    fence(Ordering::Release);
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    cortex_m::asm::dsb();
}

/// Source of DMA-coherent memory.
pub trait DmaAllocator {
    /// Returns a region of at least `size` bytes aligned to `align`, or
    /// `Error::Allocation`.
    fn allocate(&mut self, size: usize, align: usize) -> Result<DmaRegion, Error>;

    /// Hands a region back. Only regions this allocator produced are passed in.
    fn free(&mut self, region: DmaRegion);
}

impl<A: DmaAllocator + ?Sized> DmaAllocator for &mut A {
    fn allocate(&mut self, size: usize, align: usize) -> Result<DmaRegion, Error> {
        (**self).allocate(size, align)
    }

    fn free(&mut self, region: DmaRegion) {
        (**self).free(region)
    }
}

use crate::volatile_read_write::VolatileReadWrite;

/// Descriptor tables are aligned to this many bytes.
pub const DESCRIPTOR_ALIGNMENT: usize = 64;

const LENGTH_MASK: u32 = 0x007F_FFFF;

enum ControlBitNumbers {
    EndOfFrame = 26,
    StartOfFrame = 27,
}

enum StatusBitNumbers {
    InternalError = 28,
    SlaveError = 29,
    DecodeError = 30,
    Complete = 31,
}

const STATUS_ERROR_MASK: u32 = (1 << StatusBitNumbers::InternalError as u32)
    | (1 << StatusBitNumbers::SlaveError as u32)
    | (1 << StatusBitNumbers::DecodeError as u32);

/// Who may touch a descriptor's buffer right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum DescriptorState {
    /// Owned by software, buffer free to fill.
    Free,
    /// Handed to the device. Software must not touch the buffer.
    Posted,
    /// The device has finished with it and software has noticed. Must be drained
    /// or reclaimed before it is reused.
    Completed,
}

/// Error flags the device reported in a completed descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub struct TransferError {
    pub internal: bool,
    pub slave: bool,
    pub decode: bool,
}

/// One device-visible entry of a descriptor table.
#[repr(C, align(64))]
pub struct Descriptor {
    // NOTE: Only read or write these fields using volatile operations
    next: u64,
    buffer: u64,
    control: u32,
    status: u32,
}

impl Descriptor {
    pub(crate) const fn new(next: u64, buffer: u64) -> Self {
        Descriptor {
            next,
            buffer,
            control: 0,
            status: 0,
        }
    }

    pub fn next_address(&self) -> u64 {
        self.next.read_volatile()
    }

    pub fn buffer_address(&self) -> u64 {
        self.buffer.read_volatile()
    }

    pub fn read(&self) -> DescriptorReader {
        DescriptorReader(self.control.read_volatile(), self.status.read_volatile())
    }

    pub fn modify<F: FnOnce(DescriptorWriter) -> DescriptorWriter>(&mut self, f: F) {
        let w = DescriptorWriter(self.control.read_volatile(), self.status.read_volatile());
        let result = f(w);
        self.control.write_volatile(result.0);
        self.status.write_volatile(result.1);
    }

    /// Like `modify`, but starts from cleared control and status words.
    pub fn write<F: FnOnce(DescriptorWriter) -> DescriptorWriter>(&mut self, f: F) {
        let result = f(DescriptorWriter(0, 0));
        self.control.write_volatile(result.0);
        self.status.write_volatile(result.1);
    }
}

pub struct DescriptorReader(u32, u32);
impl DescriptorReader {
    pub fn requested_length(&self) -> usize {
        (self.0 & LENGTH_MASK) as usize
    }

    pub fn is_start_of_frame(&self) -> bool {
        self.0 & (1 << ControlBitNumbers::StartOfFrame as u32) != 0
    }

    pub fn is_end_of_frame(&self) -> bool {
        self.0 & (1 << ControlBitNumbers::EndOfFrame as u32) != 0
    }

    pub fn is_complete(&self) -> bool {
        self.1 & (1 << StatusBitNumbers::Complete as u32) != 0
    }

    pub fn transferred_length(&self) -> usize {
        (self.1 & LENGTH_MASK) as usize
    }

    pub fn has_error(&self) -> bool {
        self.1 & STATUS_ERROR_MASK != 0
    }

    pub fn error(&self) -> Option<TransferError> {
        if !self.has_error() {
            return None;
        }

        Some(TransferError {
            internal: self.1 & (1 << StatusBitNumbers::InternalError as u32) != 0,
            slave: self.1 & (1 << StatusBitNumbers::SlaveError as u32) != 0,
            decode: self.1 & (1 << StatusBitNumbers::DecodeError as u32) != 0,
        })
    }
}

pub struct DescriptorWriter(u32, u32);
impl DescriptorWriter {
    pub fn set_length(self, length: usize) -> Self {
        debug_assert!(length <= LENGTH_MASK as usize);
        DescriptorWriter((self.0 & !LENGTH_MASK) | (length as u32 & LENGTH_MASK), self.1)
    }

    pub fn set_start_of_frame(self) -> Self {
        DescriptorWriter(self.0 | (1 << ControlBitNumbers::StartOfFrame as u32), self.1)
    }

    pub fn set_end_of_frame(self) -> Self {
        DescriptorWriter(self.0 | (1 << ControlBitNumbers::EndOfFrame as u32), self.1)
    }

    pub fn clear_status(self) -> Self {
        DescriptorWriter(self.0, 0)
    }

    /// Device side of the handshake: record the transferred length and mark
    /// the descriptor complete.
    pub fn set_complete(self, transferred: usize) -> Self {
        DescriptorWriter(
            self.0,
            (self.1 & !LENGTH_MASK)
                | (transferred as u32 & LENGTH_MASK)
                | (1 << StatusBitNumbers::Complete as u32),
        )
    }

    pub fn set_error(self, error: TransferError) -> Self {
        let mut status = self.1;
        if error.internal {
            status |= 1 << StatusBitNumbers::InternalError as u32;
        }
        if error.slave {
            status |= 1 << StatusBitNumbers::SlaveError as u32;
        }
        if error.decode {
            status |= 1 << StatusBitNumbers::DecodeError as u32;
        }
        DescriptorWriter(self.0, status)
    }
}

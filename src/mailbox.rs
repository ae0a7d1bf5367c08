//! Host side of the packet core's shared-memory mailbox.
//!
//! The packet core exposes one transmit and one receive slot in a window of
//! 32-bit words. Each slot has a data area, a length word and a mailbox word.
//! A mailbox value of 1 means the slot holds a frame for the other side and 0
//! means it is free. Frame bytes are packed little-endian into the data words.

use crate::{volatile_read_write::VolatileReadWrite, Error};
use core::ptr::NonNull;

// Offsets in 32-bit words.
const TX_DATA: usize = 0x000;
const TX_CONTROL: usize = 0x180;
const TX_MAIL: usize = 0x190;
const TX_LENGTH: usize = 0x194;
const RX_DATA: usize = 0x200;
const RX_CONTROL: usize = 0x380;
const RX_MAIL: usize = 0x390;
const RX_LENGTH: usize = 0x394;

/// Stream side-channel words written with every transmitted frame.
const TX_CONTROL_WORDS: [u32; 2] = [0xA000_0000, 0x0000_0002];

/// Bytes available in either data area.
pub const MAILBOX_CAPACITY: usize = (TX_CONTROL - TX_DATA) * 4;

/// Words a window must span to reach every mailbox register.
pub const WINDOW_WORDS: usize = RX_LENGTH + 1;

const MAIL_EMPTY: u32 = 0;
const MAIL_FULL: u32 = 1;

/// Word-addressed access to the mailbox memory.
pub trait MailboxWindow {
    fn read_word(&self, offset: usize) -> u32;
    fn write_word(&mut self, offset: usize, value: u32);
}

/// A mapped window accessed with volatile word reads and writes.
pub struct MappedWindow {
    base: NonNull<u32>,
    words: usize,
}

// Only reachable through the `Mailbox` that owns it.
unsafe impl Send for MappedWindow {}

impl MappedWindow {
    /// # Safety
    ///
    /// `base` must point to at least `words` readable and writable `u32`s that
    /// stay mapped for the lifetime of the window.
    pub unsafe fn new(base: NonNull<u32>, words: usize) -> Self {
        MappedWindow { base, words }
    }

    fn word(&self, offset: usize) -> *mut u32 {
        if offset >= self.words {
            panic!("mailbox offset {:#x} outside a {} word window", offset, self.words);
        }
        unsafe { self.base.as_ptr().add(offset) }
    }
}

impl MailboxWindow for MappedWindow {
    fn read_word(&self, offset: usize) -> u32 {
        unsafe { (*self.word(offset)).read_volatile() }
    }

    fn write_word(&mut self, offset: usize, value: u32) {
        unsafe { (*self.word(offset)).write_volatile(value) }
    }
}

pub struct Mailbox<W: MailboxWindow> {
    window: W,
}

impl<W: MailboxWindow> Mailbox<W> {
    pub fn new(window: W) -> Self {
        Mailbox { window }
    }

    pub fn free(self) -> W {
        self.window
    }

    /// `true` while the packet core has not yet taken the last frame sent.
    pub fn is_transmit_busy(&self) -> bool {
        self.window.read_word(TX_MAIL) != MAIL_EMPTY
    }

    /// `true` when a received frame is waiting.
    pub fn has_frame(&self) -> bool {
        self.window.read_word(RX_MAIL) == MAIL_FULL
    }

    /// Places one frame in the transmit slot. `WouldBlock` until the packet core
    /// has consumed the previous one.
    pub fn send(&mut self, frame: &[u8]) -> nb::Result<(), Error> {
        if frame.is_empty() || frame.len() > MAILBOX_CAPACITY {
            return Err(nb::Error::Other(Error::InvalidLength));
        }
        if self.is_transmit_busy() {
            return Err(nb::Error::WouldBlock);
        }

        for (i, chunk) in frame.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.window.write_word(TX_DATA + i, u32::from_le_bytes(word));
        }
        self.window.write_word(TX_LENGTH, frame.len() as u32);
        self.window.write_word(TX_CONTROL, TX_CONTROL_WORDS[0]);
        self.window.write_word(TX_CONTROL + 1, TX_CONTROL_WORDS[1]);
        self.window.write_word(TX_MAIL, MAIL_FULL);

        defmt::trace!("mailbox tx {} bytes", frame.len());
        Ok(())
    }

    /// Copies the waiting frame into `buffer`, frees the receive slot and returns
    /// the frame length. `WouldBlock` while no frame is waiting.
    ///
    /// A frame that does not fit in `buffer` (or claims more than the data area
    /// holds) is discarded and reported as `Error::InvalidLength`.
    pub fn receive(&mut self, buffer: &mut [u8]) -> nb::Result<usize, Error> {
        if !self.has_frame() {
            return Err(nb::Error::WouldBlock);
        }

        let length = self.window.read_word(RX_LENGTH) as usize;
        if length > MAILBOX_CAPACITY || length > buffer.len() {
            defmt::warn!("mailbox rx discarding {} byte frame", length);
            self.window.write_word(RX_MAIL, MAIL_EMPTY);
            return Err(nb::Error::Other(Error::InvalidLength));
        }

        for (i, chunk) in buffer[..length].chunks_mut(4).enumerate() {
            let word = self.window.read_word(RX_DATA + i).to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
        self.window.write_word(RX_MAIL, MAIL_EMPTY);

        defmt::trace!("mailbox rx {} bytes", length);
        Ok(length)
    }

    /// Control words the packet core attached to the waiting receive frame.
    pub fn receive_control(&self) -> [u32; 2] {
        [
            self.window.read_word(RX_CONTROL),
            self.window.read_word(RX_CONTROL + 1),
        ]
    }
}

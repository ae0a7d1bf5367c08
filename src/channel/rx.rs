use super::{Channel, ChannelState, FromDevice};
use crate::{descriptor::TransferError, port::ControlPort, Direction, Error};

impl<const N: usize> Channel<FromDevice, N> {
    /// Hands at most `budget` completed frames to `deliver`, oldest first, and
    /// returns how many descriptors were consumed.
    ///
    /// Each consumed descriptor is re-armed and the device's window is widened by
    /// the same amount with one tail register write at the end. Descriptors the
    /// device flagged with an error are consumed too, and `deliver` sees the
    /// error instead of a payload. The payload slice is only valid for the
    /// duration of the callback, which must not block.
    pub fn drain<P, F>(&self, port: &P, budget: usize, mut deliver: F) -> Result<usize, Error>
    where
        P: ControlPort + ?Sized,
        F: FnMut(Result<&[u8], TransferError>),
    {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            if inner.state != ChannelState::Running {
                return Err(Error::ChannelNotReady);
            }
            let ring = inner.ring.as_mut().ok_or(Error::ChannelNotReady)?;

            let mut work = 0;
            while work < budget {
                let index = match ring.next_completed() {
                    Some(index) => index,
                    None => break,
                };

                match ring.status(index).error() {
                    Some(error) => {
                        defmt::warn!("rx descriptor {} completed with {}", index, error);
                        deliver(Err(error));
                    }
                    None => deliver(Ok(ring.payload(index))),
                }

                ring.recycle_current();
                work += 1;
            }

            crate::dma::dma_barrier();
            port.set_tail_descriptor_address(Direction::FromDevice, ring.descriptor_address(ring.tail()));
            if work > 0 {
                defmt::trace!("rx drained {}, curr={} tail={}", work, ring.curr(), ring.tail());
            }
            Ok(work)
        })
    }
}

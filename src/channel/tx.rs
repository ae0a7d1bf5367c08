use super::{Channel, ChannelState, ToDevice};
use crate::{port::ControlPort, Direction, Error, MAX_FRAME_LEN};

impl<const N: usize> Channel<ToDevice, N> {
    /// Queues one frame for transmission and returns the number of bytes queued.
    ///
    /// Descriptors the device has finished with are reclaimed first. With no
    /// free slot left the call fails with `Error::RingFull` and changes nothing.
    pub fn send<P: ControlPort + ?Sized>(&self, port: &P, frame: &[u8]) -> Result<usize, Error> {
        if frame.is_empty() || frame.len() > MAX_FRAME_LEN {
            return Err(Error::InvalidLength);
        }

        critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            if inner.state != ChannelState::Running {
                return Err(Error::ChannelNotReady);
            }
            let ring = inner.ring.as_mut().ok_or(Error::ChannelNotReady)?;

            let reclaimed = ring.reclaim();
            if reclaimed > 0 {
                defmt::trace!("tx reclaimed {} descriptors, curr={}", reclaimed, ring.curr());
            }

            let address = ring.post(frame)?;

            // Hands the descriptor to the device.
            port.set_tail_descriptor_address(Direction::ToDevice, address);
            defmt::trace!("tx queued {} bytes, tail={}", frame.len(), ring.tail());
            Ok(frame.len())
        })
    }

    /// Reclaims completed descriptors without queueing anything. Returns how many
    /// slots were freed.
    pub fn reclaim(&self) -> Result<usize, Error> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            match inner.state {
                ChannelState::Ready | ChannelState::Running => {}
                _ => return Err(Error::ChannelNotReady),
            }
            let ring = inner.ring.as_mut().ok_or(Error::ChannelNotReady)?;
            Ok(ring.reclaim())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::test_support::{HeapDmaAllocator, RecordingRegistry, SimulatedDevice};
    use crate::{IrqNumber, MAX_FRAME_LEN};

    fn running<const N: usize>(
        device: &SimulatedDevice,
        allocator: &mut HeapDmaAllocator,
        registry: &mut RecordingRegistry,
    ) -> Channel<ToDevice, N> {
        let channel = Channel::new();
        channel.initialize(allocator, registry, IrqNumber(62)).unwrap();
        channel.start(device).unwrap();
        channel
    }

    #[test]
    fn two_sends_then_a_reclaiming_send() {
        let device = SimulatedDevice::new();
        let mut allocator = HeapDmaAllocator::new();
        let mut registry = RecordingRegistry::new();
        let channel = running::<4>(&device, &mut allocator, &mut registry);

        assert_eq!(channel.send(&device, &[0xA; 64]), Ok(64));
        assert_eq!(channel.send(&device, &[0xB; 128]), Ok(128));
        assert_eq!(channel.cursors(), Some((0, 2)));

        assert_eq!(device.complete_transmits(1), 1);
        assert_eq!(channel.send(&device, &[0xC; 64]), Ok(64));
        assert_eq!(channel.cursors(), Some((1, 3)));
    }

    #[test]
    fn full_ring_backpressure() {
        let device = SimulatedDevice::new();
        let mut allocator = HeapDmaAllocator::new();
        let mut registry = RecordingRegistry::new();
        let channel = running::<4>(&device, &mut allocator, &mut registry);

        for _ in 0..3 {
            channel.send(&device, &[1; 100]).unwrap();
        }
        let before = channel.cursors();
        let tail_register = device.tail_descriptor(Direction::ToDevice);

        assert_eq!(channel.send(&device, &[1; 100]), Err(Error::RingFull));
        assert_eq!(channel.cursors(), before);
        assert_eq!(device.tail_descriptor(Direction::ToDevice), tail_register);

        device.complete_transmits(1);
        assert_eq!(channel.send(&device, &[1; 100]), Ok(100));
        assert_eq!(channel.send(&device, &[1; 100]), Err(Error::RingFull));
    }

    #[test]
    fn frames_complete_in_send_order() {
        let device = SimulatedDevice::new();
        let mut allocator = HeapDmaAllocator::new();
        let mut registry = RecordingRegistry::new();
        let channel = running::<8>(&device, &mut allocator, &mut registry);

        let mut sent = 0u8;
        while sent < 20 {
            match channel.send(&device, &[sent; 70]) {
                Ok(_) => sent += 1,
                Err(Error::RingFull) => {
                    device.complete_transmits(2);
                }
                Err(e) => panic!("unexpected {:?}", e),
            }
        }
        device.complete_transmits(usize::MAX);

        let wire = device.transmitted();
        assert_eq!(wire.len(), 20);
        for (i, frame) in wire.iter().enumerate() {
            assert_eq!(frame.len(), 70);
            assert!(frame.iter().all(|b| *b == i as u8));
        }
    }

    #[test]
    fn round_trip_restores_headroom() {
        let device = SimulatedDevice::new();
        let mut allocator = HeapDmaAllocator::new();
        let mut registry = RecordingRegistry::new();
        let channel = running::<8>(&device, &mut allocator, &mut registry);

        channel.send(&device, &[9; 200]).unwrap();
        let before = channel.headroom().unwrap();

        channel.send(&device, &[3; MAX_FRAME_LEN]).unwrap();
        assert_eq!(channel.headroom(), Some(before - 1));

        device.complete_transmits(usize::MAX);
        assert_eq!(channel.reclaim(), Ok(2));
        assert_eq!(channel.headroom(), Some(7));
        assert_eq!(device.transmitted()[1].len(), MAX_FRAME_LEN);
    }

    #[test]
    fn invalid_lengths_touch_nothing() {
        let device = SimulatedDevice::new();
        let mut allocator = HeapDmaAllocator::new();
        let mut registry = RecordingRegistry::new();
        let channel = running::<4>(&device, &mut allocator, &mut registry);

        assert_eq!(channel.send(&device, &[]), Err(Error::InvalidLength));
        assert_eq!(
            channel.send(&device, &[0; MAX_FRAME_LEN + 1]),
            Err(Error::InvalidLength)
        );
        assert_eq!(channel.cursors(), Some((0, 0)));
    }

    #[test]
    fn not_running_is_rejected() {
        let device = SimulatedDevice::new();
        let mut allocator = HeapDmaAllocator::new();
        let mut registry = RecordingRegistry::new();
        let channel: Channel<ToDevice, 4> = Channel::new();

        assert_eq!(channel.send(&device, &[1; 64]), Err(Error::ChannelNotReady));
        assert_eq!(channel.reclaim(), Err(Error::ChannelNotReady));

        channel.initialize(&mut allocator, &mut registry, IrqNumber(62)).unwrap();
        assert_eq!(channel.send(&device, &[1; 64]), Err(Error::ChannelNotReady));
        assert_eq!(channel.cursors(), Some((0, 0)));
    }
}

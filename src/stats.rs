use core::sync::atomic::{AtomicU32, Ordering};
use paste::paste;

macro_rules! define_statistics {
    (
        $($counter:ident),+ $(,)?
    ) => {
        paste! {
            /// Interface counters. Updated from interrupt and call context without
            /// locking.
            #[derive(Default)]
            pub struct Statistics {
                $($counter: AtomicU32,)+
            }

            /// Point-in-time copy of `Statistics`.
            #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, defmt::Format)]
            pub struct StatisticsSnapshot {
                $(pub $counter: u32,)+
            }

            impl Statistics {
                pub const fn new() -> Self {
                    Statistics {
                        $($counter: AtomicU32::new(0),)+
                    }
                }

                $(
                    pub fn $counter(&self) -> u32 {
                        self.$counter.load(Ordering::Relaxed)
                    }

                    pub(crate) fn [<add_ $counter>](&self, value: u32) {
                        self.$counter.fetch_add(value, Ordering::Relaxed);
                    }
                )+

                pub fn snapshot(&self) -> StatisticsSnapshot {
                    StatisticsSnapshot {
                        $($counter: self.$counter(),)+
                    }
                }

                pub fn clear(&self) {
                    $(self.$counter.store(0, Ordering::Relaxed);)+
                }
            }
        }
    };
}

define_statistics!(
    rx_packets,
    rx_bytes,
    rx_dropped,
    rx_errors,
    tx_packets,
    tx_bytes,
    tx_dropped,
    tx_errors,
);

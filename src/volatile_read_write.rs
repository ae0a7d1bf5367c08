pub(crate) trait VolatileReadWrite<T> {
    fn read_volatile(&self) -> T;
    fn write_volatile(&mut self, new_value: T);
}

macro_rules! impl_volatile_read_write {
    ($($word:ty),+) => {
        $(
            impl VolatileReadWrite<$word> for $word {
                fn read_volatile(&self) -> $word {
                    unsafe { core::ptr::read_volatile(self) }
                }

                fn write_volatile(&mut self, new_value: $word) {
                    unsafe {
                        core::ptr::write_volatile(self, new_value);
                    }
                }
            }
        )+
    };
}

impl_volatile_read_write!(u32, u64);

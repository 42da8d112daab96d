//! Forced entry into update mode.

use embedded_hal::{delay::DelayNs, digital::InputPin};

use crate::log;

/// Request from outside the core to stay in update mode regardless of the installed images.
pub trait EntryCheck {
    fn forced(&mut self) -> bool;
}

/// Never forces update mode.
impl EntryCheck for () {
    fn forced(&mut self) -> bool {
        false
    }
}

/// Level of the entry pin that requests update mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Level {
    Low,
    High,
}

/// Entry pin sampled once after letting its level settle.
pub struct PinEntry<P: InputPin, T: DelayNs> {
    pin: P,
    delay: T,
    active: Level,
    settle_us: u32,
}

impl<P: InputPin, T: DelayNs> PinEntry<P, T> {
    pub fn new(pin: P, delay: T, active: Level, settle_us: u32) -> Self {
        Self {
            pin,
            delay,
            active,
            settle_us,
        }
    }

    pub fn release(self) -> (P, T) {
        (self.pin, self.delay)
    }
}

impl<P: InputPin, T: DelayNs> EntryCheck for PinEntry<P, T> {
    /// An unreadable pin does not force entry.
    fn forced(&mut self) -> bool {
        self.delay.delay_us(self.settle_us);

        let level = match self.active {
            Level::Low => self.pin.is_low(),
            Level::High => self.pin.is_high(),
        };

        match level {
            Ok(active) => active,
            Err(_) => {
                log::warn!("entry pin unreadable");
                false
            }
        }
    }
}

use embedded_hal::digital::OutputPin;
use log::warn;

use crate::t2t::{T2tEvent, T2tHandler};

/// LED that is lit while an NFC field is present
pub struct FieldIndicator<P: OutputPin> {
    pin: P,
    lit: bool,
}

impl<P: OutputPin> FieldIndicator<P> {
    /// Takes the pin and drives the LED off
    pub fn new(mut pin: P) -> Result<Self, P::Error> {
        pin.set_low()?;
        Ok(Self { pin, lit: false })
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    pub fn release(self) -> P {
        self.pin
    }

    fn set(&mut self, on: bool) {
        let res = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        match res {
            Ok(()) => self.lit = on,
            Err(err) => warn!("Failed to switch field LED: {err:?}"),
        }
    }
}

impl<P: OutputPin> T2tHandler for FieldIndicator<P> {
    fn on_event(&mut self, event: T2tEvent) {
        match event {
            T2tEvent::FieldOn => self.set(true),
            T2tEvent::FieldOff => self.set(false),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::{ErrorKind, ErrorType};

    #[derive(Default)]
    struct RecordingPin {
        levels: alloc::vec::Vec<bool>,
    }

    impl ErrorType for RecordingPin {
        type Error = Infallible;
    }

    impl OutputPin for RecordingPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.levels.push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.levels.push(true);
            Ok(())
        }
    }

    struct BrokenPin;

    impl ErrorType for BrokenPin {
        type Error = ErrorKind;
    }

    impl OutputPin for BrokenPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            Err(ErrorKind::Other)
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            Err(ErrorKind::Other)
        }
    }

    #[test]
    fn starts_dark() {
        let indicator = FieldIndicator::new(RecordingPin::default()).unwrap();
        assert!(!indicator.is_lit());
        assert_eq!(indicator.release().levels, [false]);
    }

    #[test]
    fn mirrors_latest_field_event() {
        let mut indicator = FieldIndicator::new(RecordingPin::default()).unwrap();
        indicator.on_event(T2tEvent::FieldOn);
        assert!(indicator.is_lit());
        indicator.on_event(T2tEvent::DataRead);
        assert!(indicator.is_lit());
        indicator.on_event(T2tEvent::FieldOff);
        assert!(!indicator.is_lit());
        indicator.on_event(T2tEvent::Stopped);
        indicator.on_event(T2tEvent::FieldOn);
        indicator.on_event(T2tEvent::FieldOn);
        assert!(indicator.is_lit());
        assert_eq!(
            indicator.release().levels,
            [false, true, false, true, true]
        );
    }

    #[test]
    fn init_failure_is_reported() {
        assert!(FieldIndicator::new(BrokenPin).is_err());
    }
}

//! HTTP/2 flow-control window bookkeeping (RFC 9113 §5.2, §6.9).
//!
//! The server replenishes every received DATA byte immediately, so receive
//! windows only dip while a frame is being processed. Send windows follow the
//! peer's WINDOW_UPDATE and SETTINGS frames but are not enforced on writes.

use crate::error::{Error, H2Error};

/// Default initial window size (RFC 9113 §6.9.2).
pub const DEFAULT_INITIAL_WINDOW_SIZE: i32 = 65_535;

/// Default connection-level window (same as a stream's).
pub const DEFAULT_CONNECTION_WINDOW_SIZE: i32 = 65_535;

const MAX_WINDOW: i64 = 0x7fff_ffff;

/// One flow-control window.
#[derive(Debug, Clone)]
pub struct FlowController {
    /// May go negative when SETTINGS shrinks the initial window.
    window: i32,
    initial_window: i32,
}

impl FlowController {
    pub fn new(initial_window: i32) -> Self {
        Self { window: initial_window, initial_window }
    }

    pub fn window(&self) -> i32 {
        self.window
    }

    pub fn initial_window(&self) -> i32 {
        self.initial_window
    }

    /// Charge `n` bytes against the window.
    pub fn consume(&mut self, n: u32) -> Result<(), Error> {
        let n = i32::try_from(n).map_err(|_| H2Error::FlowControlError)?;
        if self.window < n {
            return Err(H2Error::FlowControlError.into());
        }
        self.window -= n;
        Ok(())
    }

    /// Grow the window by `n` (a WINDOW_UPDATE increment).
    pub fn replenish(&mut self, n: u32) -> Result<(), Error> {
        let window = i64::from(self.window) + i64::from(n);
        if window > MAX_WINDOW {
            return Err(H2Error::FlowControlError.into());
        }
        self.window = window as i32;
        Ok(())
    }

    /// Move to a new initial size, shifting the current window by the delta.
    pub fn update_initial_window(&mut self, new_initial: i32) -> Result<(), Error> {
        let window = i64::from(self.window) + i64::from(new_initial) - i64::from(self.initial_window);
        if window > MAX_WINDOW {
            return Err(H2Error::FlowControlError.into());
        }
        self.window = window as i32;
        self.initial_window = new_initial;
        Ok(())
    }
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_then_replenish() {
        let mut fc = FlowController::new(65_535);
        fc.consume(1000).unwrap();
        assert_eq!(fc.window(), 64_535);
        fc.replenish(1000).unwrap();
        assert_eq!(fc.window(), 65_535);
    }

    #[test]
    fn overdraw_is_flow_control_error() {
        let mut fc = FlowController::new(100);
        assert_eq!(fc.consume(101).unwrap_err().h2_code(), H2Error::FlowControlError);
        assert_eq!(fc.window(), 100);
    }

    #[test]
    fn replenish_past_max_fails() {
        let mut fc = FlowController::new(0x7fff_ffff);
        assert!(fc.replenish(1).is_err());
    }

    #[test]
    fn initial_window_shift() {
        let mut fc = FlowController::new(65_535);
        fc.consume(10_000).unwrap();
        fc.update_initial_window(75_535).unwrap();
        assert_eq!(fc.window(), 65_535);
        fc.update_initial_window(0).unwrap();
        assert_eq!(fc.window(), -10_000);
        assert_eq!(fc.initial_window(), 0);
    }
}

//! Half-duplex radio transport.
//!
//! The modem is a single shared medium: `send` and `recv` are mutually
//! exclusive and serialized by the driver's internal lock. This is the
//! only layer that blocks a thread on hardware.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "pi")]
pub mod sx1276;

/// Hard limit imposed by the modem FIFO.
pub const MAX_FRAME_LEN: usize = 255;

/// How long a transmission may sit in the FIFO before we give up on
/// TX_DONE.
pub const TX_WATCHDOG: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("frame too long for the radio FIFO ({0} bytes)")]
    TooLong(usize),
    #[error("TX watchdog expired before TX_DONE")]
    TxTimeout,
    #[error("PHY CRC error on received frame")]
    CrcError,
    #[error("unexpected radio silicon version {0:#04x}")]
    BadVersion(u8),
    #[cfg(feature = "pi")]
    #[error("SPI transfer failed: {0}")]
    Spi(#[from] rppal::spi::Error),
    #[cfg(feature = "pi")]
    #[error("GPIO setup failed: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

/// A received frame and its signal strength.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxFrame {
    pub data: Vec<u8>,
    pub rssi_dbm: i16,
}

/// Blocking transmit/receive over the shared half-duplex medium.
pub trait RadioTransport: Send + Sync {
    /// Transmit one frame, blocking until the modem signals TX_DONE or
    /// the watchdog expires.
    fn send(&self, frame: &[u8]) -> Result<(), RadioError>;

    /// Listen for one frame. `Ok(None)` on timeout; `Err(CrcError)` when
    /// the PHY flags a corrupt frame.
    fn recv(&self, timeout: Duration) -> Result<Option<RxFrame>, RadioError>;
}

/// Radio tuning. Defaults match the deployed fleet; changing them on one
/// side only will silently partition the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioSettings {
    pub frequency_hz: u32,
    /// Spreading factor (6-12).
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    /// Coding rate denominator (5-8 for 4/5 to 4/8).
    pub coding_rate: u8,
    pub sync_word: u8,
    /// Transmit power in dBm (2-20, PA_BOOST).
    pub tx_power_dbm: u8,
    pub preamble_symbols: u16,
    pub spi_bus: u8,
    pub reset_pin: u8,
    pub dio0_pin: u8,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            frequency_hz: 915_000_000,
            spreading_factor: 10,
            bandwidth_hz: 125_000,
            coding_rate: 5,
            sync_word: 0x34,
            tx_power_dbm: 20,
            preamble_symbols: 8,
            spi_bus: 0,
            reset_pin: 25,
            dio0_pin: 24,
        }
    }
}

#[cfg(test)]
pub mod mock {
    //! Scriptable in-memory radio for exercising the dispatcher and the
    //! OTA state machine without hardware.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockRadio {
        sent: Mutex<Vec<Vec<u8>>>,
        rx_queue: Mutex<VecDeque<RxFrame>>,
    }

    impl MockRadio {
        pub fn new() -> Self {
            Self::default()
        }

        /// Frames transmitted so far, oldest first.
        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        /// Queue a frame for the next `recv` call.
        pub fn push_rx(&self, data: Vec<u8>, rssi_dbm: i16) {
            self.rx_queue.lock().unwrap().push_back(RxFrame {
                data,
                rssi_dbm,
            });
        }
    }

    impl RadioTransport for MockRadio {
        fn send(&self, frame: &[u8]) -> Result<(), RadioError> {
            if frame.len() > MAX_FRAME_LEN {
                return Err(RadioError::TooLong(frame.len()));
            }
            self.sent.lock().unwrap().push(frame.to_vec());
            Ok(())
        }

        fn recv(&self, _timeout: Duration) -> Result<Option<RxFrame>, RadioError> {
            Ok(self.rx_queue.lock().unwrap().pop_front())
        }
    }
}

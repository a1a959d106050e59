//! SX1276/RFM95 driver over SPI on the Raspberry Pi.
//!
//! Mode transitions (sleep/standby/tx/rx_single) are internal; callers
//! only see the blocking `send`/`recv` pair from [`RadioTransport`].

use super::{RadioError, RadioSettings, RadioTransport, RxFrame, MAX_FRAME_LEN, TX_WATCHDOG};
use log::{debug, info};
use rppal::gpio::{Gpio, InputPin, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use std::sync::Mutex;
use std::thread::sleep;
use std::time::{Duration, Instant};

const REG_FIFO: u8 = 0x00;
const REG_OP_MODE: u8 = 0x01;
const REG_FRF_MSB: u8 = 0x06;
const REG_FRF_MID: u8 = 0x07;
const REG_FRF_LSB: u8 = 0x08;
const REG_PA_CONFIG: u8 = 0x09;
const REG_LNA: u8 = 0x0C;
const REG_FIFO_ADDR_PTR: u8 = 0x0D;
const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
const REG_IRQ_FLAGS: u8 = 0x12;
const REG_RX_NB_BYTES: u8 = 0x13;
const REG_PKT_RSSI_VALUE: u8 = 0x1A;
const REG_MODEM_CONFIG_1: u8 = 0x1D;
const REG_MODEM_CONFIG_2: u8 = 0x1E;
const REG_PREAMBLE_MSB: u8 = 0x20;
const REG_PREAMBLE_LSB: u8 = 0x21;
const REG_PAYLOAD_LENGTH: u8 = 0x22;
const REG_MODEM_CONFIG_3: u8 = 0x26;
const REG_DETECTION_OPTIMIZE: u8 = 0x31;
const REG_DETECTION_THRESHOLD: u8 = 0x37;
const REG_SYNC_WORD: u8 = 0x39;
const REG_VERSION: u8 = 0x42;
const REG_PA_DAC: u8 = 0x4D;

const MODE_SLEEP: u8 = 0x00;
const MODE_STDBY: u8 = 0x01;
const MODE_TX: u8 = 0x03;
const MODE_RX_SINGLE: u8 = 0x06;
/// Bit 7 of REG_OP_MODE selects LoRa (vs FSK) modulation.
const LONG_RANGE_MODE: u8 = 0x80;

const IRQ_TX_DONE: u8 = 0x08;
const IRQ_RX_DONE: u8 = 0x40;
const IRQ_PAYLOAD_CRC_ERROR: u8 = 0x20;

const PA_BOOST: u8 = 0x80;

const SPI_CLOCK_HZ: u32 = 1_000_000;
const CRYSTAL_HZ: u64 = 32_000_000;

struct Modem {
    spi: Spi,
    _reset: OutputPin,
    _dio0: InputPin,
}

/// RFM95C on the leader's SPI bus. The internal mutex enforces
/// half-duplex: a transmit can never interleave with a receive window.
pub struct Sx1276Radio {
    inner: Mutex<Modem>,
}

impl Sx1276Radio {
    pub fn open(settings: &RadioSettings) -> Result<Self, RadioError> {
        let gpio = Gpio::new()?;

        let mut reset = gpio.get(settings.reset_pin)?.into_output();
        let dio0 = gpio.get(settings.dio0_pin)?.into_input();

        // Hardware reset pulse
        reset.set_low();
        sleep(Duration::from_millis(10));
        reset.set_high();
        sleep(Duration::from_millis(10));

        let bus = match settings.spi_bus {
            1 => Bus::Spi1,
            _ => Bus::Spi0,
        };
        let spi = Spi::new(bus, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0)?;

        let mut modem = Modem {
            spi,
            _reset: reset,
            _dio0: dio0,
        };

        let version = modem.read_register(REG_VERSION)?;
        if version != 0x12 {
            return Err(RadioError::BadVersion(version));
        }

        // Configure in sleep with the LoRa bit set
        modem.set_mode(MODE_SLEEP)?;
        sleep(Duration::from_millis(10));
        modem.write_register(REG_OP_MODE, LONG_RANGE_MODE | MODE_SLEEP)?;
        sleep(Duration::from_millis(10));

        modem.set_frequency(settings.frequency_hz)?;
        modem.write_register(REG_FIFO_TX_BASE_ADDR, 0x00)?;
        modem.write_register(REG_FIFO_RX_BASE_ADDR, 0x00)?;

        // LNA boost and auto AGC
        let lna = modem.read_register(REG_LNA)?;
        modem.write_register(REG_LNA, lna | 0x03)?;
        modem.write_register(REG_MODEM_CONFIG_3, 0x04)?;

        modem.set_tx_power(settings.tx_power_dbm)?;
        modem.set_spreading_factor(settings.spreading_factor)?;
        modem.set_bandwidth(settings.bandwidth_hz)?;
        modem.set_coding_rate(settings.coding_rate)?;
        modem.write_register(REG_SYNC_WORD, settings.sync_word)?;

        // Enable payload CRC
        let config2 = modem.read_register(REG_MODEM_CONFIG_2)?;
        modem.write_register(REG_MODEM_CONFIG_2, config2 | 0x04)?;

        modem.write_register(REG_PREAMBLE_MSB, (settings.preamble_symbols >> 8) as u8)?;
        modem.write_register(REG_PREAMBLE_LSB, settings.preamble_symbols as u8)?;

        modem.set_mode(MODE_STDBY)?;

        info!(
            "radio initialized at {:.1} MHz, SF{}",
            settings.frequency_hz as f64 / 1e6,
            settings.spreading_factor
        );

        Ok(Self {
            inner: Mutex::new(modem),
        })
    }
}

impl RadioTransport for Sx1276Radio {
    fn send(&self, frame: &[u8]) -> Result<(), RadioError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(RadioError::TooLong(frame.len()));
        }

        let mut modem = self.inner.lock().unwrap();

        modem.set_mode(MODE_STDBY)?;
        modem.write_register(REG_FIFO_ADDR_PTR, 0x00)?;
        for byte in frame {
            modem.write_register(REG_FIFO, *byte)?;
        }
        modem.write_register(REG_PAYLOAD_LENGTH, frame.len() as u8)?;
        modem.write_register(REG_IRQ_FLAGS, 0xFF)?;
        modem.set_mode(MODE_TX)?;

        let start = Instant::now();
        while start.elapsed() < TX_WATCHDOG {
            let flags = modem.read_register(REG_IRQ_FLAGS)?;
            if flags & IRQ_TX_DONE != 0 {
                modem.write_register(REG_IRQ_FLAGS, IRQ_TX_DONE)?;
                modem.set_mode(MODE_STDBY)?;
                return Ok(());
            }
            sleep(Duration::from_millis(1));
        }

        modem.set_mode(MODE_STDBY)?;
        Err(RadioError::TxTimeout)
    }

    fn recv(&self, timeout: Duration) -> Result<Option<RxFrame>, RadioError> {
        let mut modem = self.inner.lock().unwrap();

        modem.write_register(REG_IRQ_FLAGS, 0xFF)?;
        modem.set_mode(MODE_RX_SINGLE)?;

        let start = Instant::now();
        while start.elapsed() < timeout {
            let flags = modem.read_register(REG_IRQ_FLAGS)?;
            if flags & IRQ_RX_DONE != 0 {
                if flags & IRQ_PAYLOAD_CRC_ERROR != 0 {
                    modem.write_register(REG_IRQ_FLAGS, 0xFF)?;
                    modem.set_mode(MODE_STDBY)?;
                    return Err(RadioError::CrcError);
                }

                let length = modem.read_register(REG_RX_NB_BYTES)?;
                let rx_addr = modem.read_register(REG_FIFO_RX_CURRENT_ADDR)?;
                modem.write_register(REG_FIFO_ADDR_PTR, rx_addr)?;

                let mut data = Vec::with_capacity(length as usize);
                for _ in 0..length {
                    data.push(modem.read_register(REG_FIFO)?);
                }

                let rssi_dbm = modem.read_register(REG_PKT_RSSI_VALUE)? as i16 - 157;

                modem.write_register(REG_IRQ_FLAGS, 0xFF)?;
                modem.set_mode(MODE_STDBY)?;

                debug!("rx {} bytes at {} dBm", data.len(), rssi_dbm);
                return Ok(Some(RxFrame {
                    data,
                    rssi_dbm,
                }));
            }
            sleep(Duration::from_millis(1));
        }

        modem.set_mode(MODE_STDBY)?;
        Ok(None)
    }
}

impl Modem {
    fn read_register(&mut self, address: u8) -> Result<u8, RadioError> {
        let mut response = [0u8; 2];
        self.spi.transfer(&mut response, &[address & 0x7F, 0x00])?;
        Ok(response[1])
    }

    fn write_register(&mut self, address: u8, value: u8) -> Result<(), RadioError> {
        self.spi.write(&[address | 0x80, value])?;
        Ok(())
    }

    fn set_mode(&mut self, mode: u8) -> Result<(), RadioError> {
        self.write_register(REG_OP_MODE, LONG_RANGE_MODE | mode)
    }

    fn set_frequency(&mut self, frequency_hz: u32) -> Result<(), RadioError> {
        let frf = ((frequency_hz as u64) << 19) / CRYSTAL_HZ;
        self.write_register(REG_FRF_MSB, (frf >> 16) as u8)?;
        self.write_register(REG_FRF_MID, (frf >> 8) as u8)?;
        self.write_register(REG_FRF_LSB, frf as u8)
    }

    fn set_tx_power(&mut self, power_dbm: u8) -> Result<(), RadioError> {
        let power = power_dbm.clamp(2, 20);
        if power > 17 {
            // High-power mode via the PA DAC
            self.write_register(REG_PA_DAC, 0x87)?;
            self.write_register(REG_PA_CONFIG, PA_BOOST | (power - 5))
        } else {
            self.write_register(REG_PA_DAC, 0x84)?;
            self.write_register(REG_PA_CONFIG, PA_BOOST | (power - 2))
        }
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), RadioError> {
        let sf = sf.clamp(6, 12);

        if sf == 6 {
            self.write_register(REG_DETECTION_OPTIMIZE, 0xC5)?;
            self.write_register(REG_DETECTION_THRESHOLD, 0x0C)?;
        } else {
            self.write_register(REG_DETECTION_OPTIMIZE, 0xC3)?;
            self.write_register(REG_DETECTION_THRESHOLD, 0x0A)?;
        }

        let config2 = self.read_register(REG_MODEM_CONFIG_2)?;
        self.write_register(REG_MODEM_CONFIG_2, (config2 & 0x0F) | (sf << 4))
    }

    fn set_bandwidth(&mut self, bandwidth_hz: u32) -> Result<(), RadioError> {
        let bw_val: u8 = match bandwidth_hz {
            7_800 => 0,
            10_400 => 1,
            15_600 => 2,
            20_800 => 3,
            31_250 => 4,
            41_700 => 5,
            62_500 => 6,
            125_000 => 7,
            250_000 => 8,
            500_000 => 9,
            _ => 7,
        };

        let config1 = self.read_register(REG_MODEM_CONFIG_1)?;
        self.write_register(REG_MODEM_CONFIG_1, (config1 & 0x0F) | (bw_val << 4))
    }

    fn set_coding_rate(&mut self, denominator: u8) -> Result<(), RadioError> {
        let cr = denominator.clamp(5, 8);
        let config1 = self.read_register(REG_MODEM_CONFIG_1)?;
        self.write_register(REG_MODEM_CONFIG_1, (config1 & 0xF1) | ((cr - 4) << 1))
    }
}

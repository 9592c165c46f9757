//! MFRC522 RFID reader over SPI.
//!
//! Only the two PICC commands needed to identify a card are implemented:
//! REQA (is anything in the field?) and cascade-level-1 anticollision (what is
//! its UID?). Card memory is never read or written.
//!
//! The tag id is the four UID bytes plus the BCC check byte folded big-endian
//! into one integer, which keeps ids compatible with the ones already printed on
//! the cars.

use async_trait::async_trait;
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use tracing::{debug, info};

use crate::error::{DashError, DashResult};
use crate::hardware::capabilities::{TagId, TagReader};

/// SPI clock used for the reader
pub const SPI_CLOCK_HZ: u32 = 1_000_000;

mod reg {
    pub const COMMAND: u8 = 0x01;
    pub const COMM_IEN: u8 = 0x02;
    pub const COMM_IRQ: u8 = 0x04;
    pub const ERROR: u8 = 0x06;
    pub const FIFO_DATA: u8 = 0x09;
    pub const FIFO_LEVEL: u8 = 0x0A;
    pub const CONTROL: u8 = 0x0C;
    pub const BIT_FRAMING: u8 = 0x0D;
    pub const MODE: u8 = 0x11;
    pub const TX_CONTROL: u8 = 0x14;
    pub const TX_AUTO: u8 = 0x15;
    pub const T_MODE: u8 = 0x2A;
    pub const T_PRESCALER: u8 = 0x2B;
    pub const T_RELOAD_H: u8 = 0x2C;
    pub const T_RELOAD_L: u8 = 0x2D;
}

mod cmd {
    pub const IDLE: u8 = 0x00;
    pub const TRANSCEIVE: u8 = 0x0C;
    pub const SOFT_RESET: u8 = 0x0F;
}

const PICC_REQIDL: u8 = 0x26;
const PICC_ANTICOLL: u8 = 0x93;

const IRQ_ENABLE: u8 = 0x77;
const IRQ_WAIT: u8 = 0x30;
const IRQ_TIMER: u8 = 0x01;
const ERROR_MASK: u8 = 0x1B;
const MAX_IRQ_POLLS: u16 = 2000;

/// Outcome of one transceive exchange that did not fail at the SPI level
#[derive(Debug, PartialEq, Eq)]
enum Exchange {
    Ok { data: Vec<u8>, bits: usize },
    NoTag,
    Error,
}

/// MFRC522 on a Raspberry Pi SPI bus
pub struct Mfrc522Reader {
    spi: Spi,
}

impl Mfrc522Reader {
    /// Open SPI0/CE0 and initialise the chip
    pub fn open() -> DashResult<Self> {
        Self::open_on(Bus::Spi0, SlaveSelect::Ss0)
    }

    /// Open a specific bus and chip select and initialise the chip
    pub fn open_on(bus: Bus, slave: SlaveSelect) -> DashResult<Self> {
        let spi = Spi::new(bus, slave, SPI_CLOCK_HZ, Mode::Mode0)
            .map_err(|e| DashError::Rfid(format!("failed to open SPI: {}", e)))?;
        let mut reader = Self { spi };
        reader.init()?;
        info!(?bus, ?slave, "MFRC522 initialised");
        Ok(reader)
    }

    fn init(&mut self) -> DashResult<()> {
        self.write(reg::COMMAND, cmd::SOFT_RESET)?;
        self.write(reg::T_MODE, 0x8D)?;
        self.write(reg::T_PRESCALER, 0x3E)?;
        self.write(reg::T_RELOAD_L, 30)?;
        self.write(reg::T_RELOAD_H, 0)?;
        self.write(reg::TX_AUTO, 0x40)?;
        self.write(reg::MODE, 0x3D)?;
        self.antenna_on()
    }

    fn antenna_on(&mut self) -> DashResult<()> {
        let current = self.read(reg::TX_CONTROL)?;
        if current & 0x03 == 0 {
            self.set_bits(reg::TX_CONTROL, 0x03)?;
        }
        Ok(())
    }

    fn write(&mut self, addr: u8, value: u8) -> DashResult<()> {
        let tx = [(addr << 1) & 0x7E, value];
        let mut rx = [0u8; 2];
        self.spi
            .transfer(&mut rx, &tx)
            .map_err(|e| DashError::Rfid(format!("SPI write to {:#04x}: {}", addr, e)))?;
        Ok(())
    }

    fn read(&mut self, addr: u8) -> DashResult<u8> {
        let tx = [((addr << 1) & 0x7E) | 0x80, 0];
        let mut rx = [0u8; 2];
        self.spi
            .transfer(&mut rx, &tx)
            .map_err(|e| DashError::Rfid(format!("SPI read from {:#04x}: {}", addr, e)))?;
        Ok(rx[1])
    }

    fn set_bits(&mut self, addr: u8, mask: u8) -> DashResult<()> {
        let current = self.read(addr)?;
        self.write(addr, current | mask)
    }

    fn clear_bits(&mut self, addr: u8, mask: u8) -> DashResult<()> {
        let current = self.read(addr)?;
        self.write(addr, current & !mask)
    }

    fn transceive(&mut self, payload: &[u8]) -> DashResult<Exchange> {
        self.write(reg::COMM_IEN, IRQ_ENABLE | 0x80)?;
        self.clear_bits(reg::COMM_IRQ, 0x80)?;
        self.set_bits(reg::FIFO_LEVEL, 0x80)?;
        self.write(reg::COMMAND, cmd::IDLE)?;

        for byte in payload {
            self.write(reg::FIFO_DATA, *byte)?;
        }

        self.write(reg::COMMAND, cmd::TRANSCEIVE)?;
        self.set_bits(reg::BIT_FRAMING, 0x80)?;

        let mut irq = 0u8;
        let mut completed = false;
        for _ in 0..MAX_IRQ_POLLS {
            irq = self.read(reg::COMM_IRQ)?;
            if irq & IRQ_TIMER != 0 || irq & IRQ_WAIT != 0 {
                completed = true;
                break;
            }
        }

        self.clear_bits(reg::BIT_FRAMING, 0x80)?;

        if !completed || self.read(reg::ERROR)? & ERROR_MASK != 0 {
            return Ok(Exchange::Error);
        }
        if irq & IRQ_ENABLE & IRQ_TIMER != 0 {
            return Ok(Exchange::NoTag);
        }

        let level = self.read(reg::FIFO_LEVEL)? as usize;
        let last_bits = (self.read(reg::CONTROL)? & 0x07) as usize;
        let bits = if last_bits != 0 {
            level.saturating_sub(1) * 8 + last_bits
        } else {
            level * 8
        };

        let count = level.clamp(1, 16);
        let mut data = Vec::with_capacity(count);
        for _ in 0..count {
            data.push(self.read(reg::FIFO_DATA)?);
        }

        Ok(Exchange::Ok { data, bits })
    }

    /// REQA: true when a card answered with a 16-bit ATQA
    fn request(&mut self) -> DashResult<bool> {
        self.write(reg::BIT_FRAMING, 0x07)?;
        Ok(matches!(
            self.transceive(&[PICC_REQIDL])?,
            Exchange::Ok { bits: 0x10, .. }
        ))
    }

    fn anticollision(&mut self) -> DashResult<Option<[u8; 5]>> {
        self.write(reg::BIT_FRAMING, 0x00)?;
        match self.transceive(&[PICC_ANTICOLL, 0x20])? {
            Exchange::Ok { data, .. } => Ok(checked_uid(&data)),
            _ => Ok(None),
        }
    }
}

/// Accept a 5-byte anticollision answer whose BCC matches
fn checked_uid(data: &[u8]) -> Option<[u8; 5]> {
    let uid: [u8; 5] = data.try_into().ok()?;
    let bcc = uid[..4].iter().fold(0u8, |acc, b| acc ^ b);
    (bcc == uid[4]).then_some(uid)
}

/// Fold UID bytes big-endian into a tag id
pub fn uid_to_tag(uid: &[u8]) -> TagId {
    TagId(uid.iter().fold(0u64, |n, b| n * 256 + u64::from(*b)))
}

#[async_trait]
impl TagReader for Mfrc522Reader {
    async fn read_id_no_block(&mut self) -> DashResult<Option<TagId>> {
        if !self.request()? {
            return Ok(None);
        }
        let Some(uid) = self.anticollision()? else {
            debug!("card answered REQA but anticollision failed");
            return Ok(None);
        };
        Ok(Some(uid_to_tag(&uid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_folds_big_endian() {
        assert_eq!(uid_to_tag(&[0x01, 0x02]), TagId(0x0102));
        assert_eq!(
            uid_to_tag(&[0x88, 0x04, 0x1A, 0x2B, 0xBD]),
            TagId(0x88_041A_2BBD)
        );
    }

    #[test]
    fn bcc_mismatch_is_rejected() {
        let good = [0x12, 0x34, 0x56, 0x78, 0x12 ^ 0x34 ^ 0x56 ^ 0x78];
        assert_eq!(checked_uid(&good), Some(good));

        let bad = [0x12, 0x34, 0x56, 0x78, 0x00];
        assert_eq!(checked_uid(&bad), None);
        assert_eq!(checked_uid(&good[..4]), None);
    }
}

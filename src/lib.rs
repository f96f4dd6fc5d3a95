// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

//! flash25
//!
//! This crate provides a block device driver for 25-series SPI NOR flash
//! and DataFlash memories, exposing read, program, and erase operations
//! which respect the chip's page boundaries, erase granularity, busy timing,
//! and write protection.
//!
//! The SPI bus, chip-select, and optional write-protect lines are provided
//! by implementing [`FlashAccess`]; blocking delays are provided by [`Timer`].

use core::time::Duration;

pub mod blockdev;
pub mod config;
pub mod device;
pub mod geometry;
pub mod id;
pub mod sreg;

pub use blockdev::BlockDevice;
pub use config::Config;
pub use device::{DeviceState, FlashBlockDevice};
pub use geometry::Geometry;
pub use id::FlashID;
pub use sreg::StatusWord;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Device has not been initialised.")]
    NotInitialized,
    #[error("Invalid address or size for operation: 0x{address:08X} + {size} bytes.")]
    InvalidArgument { address: u64, size: u64 },
    #[error("Invalid geometry: {device_size} bytes, {page_size} byte pages, \
             {erase_block_size} byte erase blocks.")]
    InvalidGeometry { device_size: u64, page_size: u64, erase_block_size: u64 },
    #[error("Unsupported density code {density} in device ID.")]
    UnsupportedDensity { density: u8 },
    #[error("Invalid manufacturer ID detected: 0x{id:04X}.")]
    InvalidManufacturer { id: u16 },
    #[error("Invalid status word read from device: 0x{status:04X}.")]
    InvalidStatus { status: u16 },
    #[error("Device still busy after waiting {waited:?}.")]
    Timeout { waited: Duration },

    #[error(transparent)]
    Access(#[from] anyhow::Error),
}

/// Broad classification of an [`Error`], as seen by block device users.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bus or chip failure, identification mismatch, or polling timeout.
    DeviceError,
    /// Misaligned or out-of-bounds address or size.
    InvalidArgument,
    /// Operation attempted before a successful `init()`.
    NotInitialized,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotInitialized => ErrorKind::NotInitialized,
            Error::InvalidArgument { .. }
            | Error::InvalidGeometry { .. } => ErrorKind::InvalidArgument,
            Error::InvalidManufacturer { .. }
            | Error::UnsupportedDensity { .. }
            | Error::InvalidStatus { .. }
            | Error::Timeout { .. }
            | Error::Access(_) => ErrorKind::DeviceError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub type AnyhowResult<T> = anyhow::Result<T>;

/// Trait for objects which provide access to the SPI bus a flash chip is attached to.
///
/// Providers implement chip-select control and single-byte full-duplex exchange.
/// If the chip's write-protect pin is wired, providers should also implement
/// `set_write_protect()`; by default it does nothing.
pub trait FlashAccess {
    /// Assert (`true`) or de-assert (`false`) the chip-select line.
    fn select(&mut self, selected: bool) -> AnyhowResult<()>;

    /// Clock out `byte` and return the byte received at the same time.
    fn exchange_byte(&mut self, byte: u8) -> AnyhowResult<u8>;

    /// Drive the write-protect line, where `true` protects the device.
    fn set_write_protect(&mut self, _protected: bool) -> AnyhowResult<()> {
        Ok(())
    }
}

impl<A: FlashAccess + ?Sized> FlashAccess for &mut A {
    fn select(&mut self, selected: bool) -> AnyhowResult<()> {
        (**self).select(selected)
    }

    fn exchange_byte(&mut self, byte: u8) -> AnyhowResult<u8> {
        (**self).exchange_byte(byte)
    }

    fn set_write_protect(&mut self, protected: bool) -> AnyhowResult<()> {
        (**self).set_write_protect(protected)
    }
}

/// Trait for objects which can block the calling thread while the flash is busy.
pub trait Timer {
    fn sleep(&mut self, dur: Duration);
}

impl<T: Timer + ?Sized> Timer for &mut T {
    fn sleep(&mut self, dur: Duration) {
        (**self).sleep(dur)
    }
}

/// Timer which sleeps the current thread using `std::thread::sleep`.
#[derive(Copy, Clone, Debug, Default)]
pub struct StdTimer;

impl Timer for StdTimer {
    fn sleep(&mut self, dur: Duration) {
        std::thread::sleep(dur);
    }
}

/// 25-series command opcodes used by this driver.
///
/// These are common to the Adesto AT25 and Micron M25P families.
/// Only single I/O commands are listed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_enum::IntoPrimitive)]
#[allow(unused)]
#[repr(u8)]
pub(crate) enum Opcode {
    Nop = 0x00,
    WriteStatusRegister = 0x01,
    PageProgram = 0x02,
    ReadLowFrequency = 0x03,
    WriteDisable = 0x04,
    ReadStatusRegister1 = 0x05,
    WriteEnable = 0x06,
    ReadHighFrequency = 0x0B,
    BlockErase = 0x20,
    ReadStatusRegister2 = 0x35,
    ReadID = 0x9F,
    SectorErase = 0xD8,
    ChipErase = 0xC7,
    ReleasePowerdown = 0xAB,
    Powerdown = 0xB9,
}

#[test]
fn test_error_kind() {
    assert_eq!(Error::NotInitialized.kind(), ErrorKind::NotInitialized);
    assert_eq!(Error::InvalidArgument { address: 1, size: 2 }.kind(),
               ErrorKind::InvalidArgument);
    assert_eq!(Error::InvalidGeometry { device_size: 0, page_size: 256, erase_block_size: 4096 }
               .kind(), ErrorKind::InvalidArgument);
    assert_eq!(Error::UnsupportedDensity { density: 10 }.kind(), ErrorKind::DeviceError);
    assert_eq!(Error::Timeout { waited: Duration::from_millis(10) }.kind(),
               ErrorKind::DeviceError);
    assert_eq!(Error::from(anyhow::anyhow!("bus fault")).kind(), ErrorKind::DeviceError);
}

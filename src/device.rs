use core::time::Duration;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{
    AnyhowResult, BlockDevice, Config, Error, FlashAccess, FlashID, Geometry, Opcode, Result,
    StatusWord, Timer,
};

/// Shortest interval between status polls, used if the configured interval is zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Lifecycle state of a [`FlashBlockDevice`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    Initializing,
    Ready,
    Error,
}

/// Block device driver for a single 25-series SPI flash chip.
///
/// Every operation holds an internal lock for its full duration, including
/// any time spent waiting for the chip to finish a program or erase, so one
/// instance may be shared between threads and owners (for example via `Arc`).
///
/// The chip is identified by the first `init()` call; further `init()` calls
/// only add an owner, and the device returns to `Uninitialized` once every
/// owner has called `deinit()`.
pub struct FlashBlockDevice<A: FlashAccess, T: Timer> {
    inner: Mutex<Inner<A, T>>,
}

struct Inner<A: FlashAccess, T: Timer> {
    access: A,
    timer: T,
    config: Config,
    state: DeviceState,
    init_count: u32,

    /// Once identified, ID details are cached until the last `deinit()`.
    id: Option<FlashID>,

    /// Geometry derived from the ID, present only while `Ready`.
    geometry: Option<Geometry>,
}

impl<A: FlashAccess, T: Timer> FlashBlockDevice<A, T> {
    pub const DEVICE_TYPE: &'static str = "FLASH25";

    /// Create a new device using the default configuration.
    pub fn new(access: A, timer: T) -> Self {
        Self::with_config(access, timer, Config::default())
    }

    /// Create a new device using the given configuration.
    ///
    /// The write-protect line, if wired, is driven to protect the chip immediately.
    pub fn with_config(mut access: A, timer: T, config: Config) -> Self {
        if let Err(e) = access.set_write_protect(true) {
            log::warn!("Could not assert write-protect line: {}", e);
        }
        FlashBlockDevice {
            inner: Mutex::new(Inner {
                access,
                timer,
                config,
                state: DeviceState::Uninitialized,
                init_count: 0,
                id: None,
                geometry: None,
            }),
        }
    }

    pub fn config(&self) -> Config {
        self.lock().config
    }

    pub fn state(&self) -> DeviceState {
        self.lock().state
    }

    /// Number of owners which have called `init()` without a matching `deinit()`.
    pub fn init_count(&self) -> u32 {
        self.lock().init_count
    }

    /// Get the flash ID, if the device has been identified.
    pub fn id(&self) -> Option<FlashID> {
        self.lock().id
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.lock().geometry
    }

    /// Read the current combined status word from the chip.
    pub fn read_status(&self) -> Result<StatusWord> {
        let mut inner = self.lock();
        inner.ready_geometry()?;
        inner.read_status()
    }

    /// Consume the device, returning the bus and timer.
    pub fn release(self) -> (A, T) {
        let inner = self.inner.into_inner().unwrap_or_else(PoisonError::into_inner);
        (inner.access, inner.timer)
    }

    fn lock(&self) -> MutexGuard<'_, Inner<A, T>> {
        // Bus transactions complete before the lock is released, so the
        // state is consistent even if a previous holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A: FlashAccess, T: Timer> BlockDevice for FlashBlockDevice<A, T> {
    fn init(&self) -> Result<()> {
        let mut inner = self.lock();
        log::debug!("init: {} existing owners", inner.init_count);

        if inner.state != DeviceState::Ready {
            inner.init_count = 0;
        }

        if inner.init_count > 0 {
            inner.init_count = inner.init_count.saturating_add(1);
            return Ok(());
        }

        inner.state = DeviceState::Initializing;
        match inner.identify() {
            Ok((id, geometry)) => {
                log::debug!("Identified {}: {} bytes, {} byte pages, {} byte erase blocks",
                            id, geometry.device_size(), geometry.page_size(),
                            geometry.erase_block_size());
                inner.id = Some(id);
                inner.geometry = Some(geometry);
                inner.state = DeviceState::Ready;
                inner.init_count = 1;
                Ok(())
            },
            Err(e) => {
                log::error!("Device identification failed: {}", e);
                inner.id = None;
                inner.geometry = None;
                inner.state = DeviceState::Error;
                Err(e)
            },
        }
    }

    fn deinit(&self) -> Result<()> {
        let mut inner = self.lock();
        log::debug!("deinit: {} existing owners", inner.init_count);

        if inner.init_count == 0 {
            log::warn!("deinit called without a matching init");
            return Ok(());
        }

        inner.init_count -= 1;
        if inner.init_count == 0 {
            inner.state = DeviceState::Uninitialized;
            inner.id = None;
            inner.geometry = None;
        }
        Ok(())
    }

    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let mut inner = self.lock();
        log::trace!("read: addr=0x{:08X} len={}", addr, buf.len());

        let geometry = inner.ready_geometry()?;
        geometry.check_read(addr, buf.len() as u64)?;
        if buf.is_empty() {
            return Ok(());
        }

        let address = geometry.to_wire_address(addr);
        inner.transaction(|access| {
            access.exchange_byte(Opcode::ReadLowFrequency.into())?;
            for byte in address.iter() {
                access.exchange_byte(*byte)?;
            }
            for byte in buf.iter_mut() {
                *byte = access.exchange_byte(Opcode::Nop.into())?;
            }
            Ok(())
        })
    }

    fn program(&self, addr: u64, data: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        log::trace!("program: addr=0x{:08X} len={}", addr, data.len());

        let geometry = inner.ready_geometry()?;
        geometry.check_program(addr, data.len() as u64)?;
        if data.is_empty() {
            return Ok(());
        }

        inner.with_writable(|inner| inner.program_data(&geometry, addr, data))
    }

    fn erase(&self, addr: u64, size: u64) -> Result<()> {
        let mut inner = self.lock();
        log::trace!("erase: addr=0x{:08X} len={}", addr, size);

        let geometry = inner.ready_geometry()?;
        geometry.check_erase(addr, size)?;
        if size == 0 {
            return Ok(());
        }

        inner.with_writable(|inner| {
            if addr == 0 && size == geometry.device_size() {
                inner.erase_chip()
            } else {
                inner.erase_blocks(&geometry, addr, size)
            }
        })
    }

    fn read_size(&self) -> u64 {
        1
    }

    fn program_size(&self) -> u64 {
        1
    }

    fn erase_size(&self) -> u64 {
        self.lock().geometry.map(|g| g.erase_block_size()).unwrap_or(0)
    }

    fn size(&self) -> u64 {
        self.lock().geometry.map(|g| g.device_size()).unwrap_or(0)
    }

    fn device_type(&self) -> &'static str {
        Self::DEVICE_TYPE
    }
}

impl<A: FlashAccess, T: Timer> Inner<A, T> {
    /// Return the device geometry, or `NotInitialized` if the device is not ready.
    fn ready_geometry(&self) -> Result<Geometry> {
        match (self.state, self.geometry) {
            (DeviceState::Ready, Some(geometry)) => Ok(geometry),
            _ => {
                log::debug!("Device not ready, state {:?}", self.state);
                Err(Error::NotInitialized)
            },
        }
    }

    /// Identify the chip and leave it write protected, whether or not identification succeeded.
    fn identify(&mut self) -> Result<(FlashID, Geometry)> {
        let result = self.probe();
        let protect = self.set_writable(false);
        let probed = result?;
        protect?;
        Ok(probed)
    }

    /// Read and validate the ID and status registers, and derive the geometry.
    fn probe(&mut self) -> Result<(FlashID, Geometry)> {
        let id = self.read_id()?;
        log::debug!("Read ID: {}", id);

        let status = self.read_status()?;
        log::debug!("Read status: {}", status);

        // With no device present we'll probably receive all-0s or all-1s.
        if id.manufacturer_id == 0x00 || id.manufacturer_id == 0xFF {
            log::error!("No device or manufacturer ID found");
            return Err(Error::InvalidManufacturer { id: id.signature() });
        }
        if !id.matches(self.config.id_match()) {
            log::error!("Manufacturer ID 0x{:02X} does not match 0x{:02X}",
                        id.manufacturer_id, self.config.id_match());
            return Err(Error::InvalidManufacturer { id: id.signature() });
        }
        if !status.is_plausible() {
            log::error!("Implausible status word {}", status);
            return Err(Error::InvalidStatus { status: status.0 });
        }

        let geometry = Geometry::from_id(&id, &self.config)?;
        Ok((id, geometry))
    }

    /// Program `data` to `addr`, split so that no page program crosses a page boundary.
    ///
    /// Stops at the first failure; pages already programmed stay programmed.
    fn program_data(&mut self, geometry: &Geometry, addr: u64, data: &[u8]) -> Result<()> {
        let page_size = geometry.page_size();
        let (mut page, mut offset) = geometry.to_page_offset(addr);
        log::trace!("Programming {} bytes from page {} offset {}", data.len(), page, offset);

        let mut bytes_written = 0;
        while bytes_written < data.len() {
            let chunk = usize::min(data.len() - bytes_written, (page_size - offset) as usize);
            let address = page * page_size + offset;
            let page_data = &data[bytes_written..bytes_written + chunk];
            if let Err(e) = self.page_program(geometry, address, page_data) {
                log::error!("Programming stopped after {} of {} bytes", bytes_written, data.len());
                return Err(e);
            }
            bytes_written += chunk;
            page += 1;
            // All writes after the first are page aligned.
            offset = 0;
        }

        Ok(())
    }

    /// Program up to one page of data, then wait for programming to complete.
    fn page_program(&mut self, geometry: &Geometry, addr: u64, data: &[u8]) -> Result<()> {
        log::trace!("Page program 0x{:08X}, {} bytes", addr, data.len());
        let address = geometry.to_wire_address(addr);
        self.write_enable()?;
        self.write_command(Opcode::PageProgram, Some(address), data)?;
        self.wait_until_ready(self.config.timeout())
    }

    /// Erase each block in `[addr, addr + size)` in turn.
    ///
    /// Stops at the first failure; blocks already erased stay erased.
    fn erase_blocks(&mut self, geometry: &Geometry, addr: u64, size: u64) -> Result<()> {
        let block_size = geometry.erase_block_size();
        for block in (addr..addr + size).step_by(block_size as usize) {
            log::trace!("Block erase 0x{:08X}", block);
            let address = geometry.to_wire_address(block);
            self.write_enable()?;
            self.write_command(Opcode::BlockErase, Some(address), &[])?;
            if let Err(e) = self.wait_until_ready(self.config.timeout()) {
                log::error!("Erase stopped at block 0x{:08X}", block);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Erase the entire chip and wait for the erase to complete.
    fn erase_chip(&mut self) -> Result<()> {
        log::debug!("Chip erase");
        self.write_enable()?;
        self.command(Opcode::ChipErase)?;
        self.wait_until_ready(self.config.chip_erase_timeout())
    }

    /// Poll the status word until the busy bit clears, sleeping one polling
    /// interval between reads, for at most `budget`.
    fn wait_until_ready(&mut self, budget: Duration) -> Result<()> {
        let interval = self.config.poll_interval().max(MIN_POLL_INTERVAL);
        let mut waited = Duration::from_millis(0);
        loop {
            let status = self.read_status()?;
            if !status.get_busy() {
                log::trace!("Device ready after {:?}", waited);
                return Ok(());
            }
            if waited >= budget {
                log::error!("Device still busy after {:?}, status {}", waited, status);
                return Err(Error::Timeout { waited });
            }
            self.timer.sleep(interval);
            waited += interval;
        }
    }

    /// Release (`true`) or restore (`false`) write protection.
    ///
    /// Restoring always attempts both the write-protect line and the
    /// WriteDisable command, reporting the first failure.
    fn set_writable(&mut self, writable: bool) -> Result<()> {
        log::trace!("Set writable: {}", writable);
        if writable {
            self.access.set_write_protect(false)?;
            self.write_enable()
        } else {
            let line = self.access.set_write_protect(true).map_err(Error::from);
            let command = self.command(Opcode::WriteDisable);
            line.and(command)
        }
    }

    /// Run `f` with write protection released, restoring it afterwards on every path.
    fn with_writable<R, F>(&mut self, f: F) -> Result<R>
        where F: FnOnce(&mut Self) -> Result<R>
    {
        let result = match self.set_writable(true) {
            Ok(()) => f(self),
            Err(e) => Err(e),
        };
        let protect = self.set_writable(false);
        let value = result?;
        protect?;
        Ok(value)
    }

    /// Send the WriteEnable command, setting the WEL in the status register.
    fn write_enable(&mut self) -> Result<()> {
        self.command(Opcode::WriteEnable)
    }

    fn read_id(&mut self) -> Result<FlashID> {
        let mut data = [0u8; 3];
        self.transaction(|access| {
            access.exchange_byte(Opcode::ReadID.into())?;
            for byte in data.iter_mut() {
                *byte = access.exchange_byte(Opcode::Nop.into())?;
            }
            Ok(())
        })?;
        Ok(FlashID::from_bytes(data))
    }

    /// Read both status registers and combine them into one status word.
    fn read_status(&mut self) -> Result<StatusWord> {
        let status1 = self.read_register(Opcode::ReadStatusRegister1)?;
        let status2 = self.read_register(Opcode::ReadStatusRegister2)?;
        let status = StatusWord::from_registers(status1, status2);
        log::trace!("Status: {}", status);
        Ok(status)
    }

    fn read_register(&mut self, opcode: Opcode) -> Result<u8> {
        self.transaction(|access| {
            access.exchange_byte(opcode.into())?;
            access.exchange_byte(Opcode::Nop.into())
        })
    }

    /// Convenience method for issuing a single command with no address or data.
    fn command(&mut self, opcode: Opcode) -> Result<()> {
        self.write_command(opcode, None, &[])
    }

    /// Write `opcode`, an optional address, then `data`, ignoring the response.
    fn write_command(&mut self, opcode: Opcode, address: Option<[u8; 3]>, data: &[u8])
        -> Result<()>
    {
        log::trace!("SPI write: {:?} {:02X?} + {} bytes", opcode, address, data.len());
        self.transaction(|access| {
            access.exchange_byte(opcode.into())?;
            if let Some(address) = address {
                for byte in address.iter() {
                    access.exchange_byte(*byte)?;
                }
            }
            for byte in data.iter() {
                access.exchange_byte(*byte)?;
            }
            Ok(())
        })
    }

    /// Assert CS, run `f`, then de-assert CS even if `f` failed.
    fn transaction<R, F>(&mut self, f: F) -> Result<R>
        where F: FnOnce(&mut A) -> AnyhowResult<R>
    {
        self.access.select(true)?;
        let result = f(&mut self.access);
        let deselect = self.access.select(false);
        let value = result?;
        deselect?;
        Ok(value)
    }
}

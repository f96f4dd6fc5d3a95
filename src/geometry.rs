use crate::{Config, Error, FlashID, Result};

/// Largest memory which can be addressed with the 3-byte addresses used by this driver.
pub const MAX_DEVICE_SIZE: u64 = 1 << 24;

/// Memory layout of an identified flash chip.
///
/// All sizes are in bytes. Page and erase block sizes are powers of two,
/// the erase block size is a multiple of the page size, and the device size
/// is a multiple of the erase block size.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    device_size: u64,
    page_size: u64,
    erase_block_size: u64,
}

impl Geometry {
    pub fn new(device_size: u64, page_size: u64, erase_block_size: u64) -> Result<Self> {
        let valid = page_size.is_power_of_two()
            && erase_block_size.is_power_of_two()
            && erase_block_size % page_size == 0
            && device_size != 0
            && device_size % erase_block_size == 0
            && device_size <= MAX_DEVICE_SIZE;
        if valid {
            Ok(Geometry { device_size, page_size, erase_block_size })
        } else {
            log::error!("Invalid geometry: size={} page={} block={}",
                        device_size, page_size, erase_block_size);
            Err(Error::InvalidGeometry { device_size, page_size, erase_block_size })
        }
    }

    /// Derive the geometry from the density code in `id`, using the
    /// page and erase block sizes from `config`.
    pub fn from_id(id: &FlashID, config: &Config) -> Result<Self> {
        let density = id.density(config.density_mask());
        let device_size = match 0x8000u64.checked_shl(density as u32) {
            Some(size) if size <= MAX_DEVICE_SIZE => size,
            _ => {
                log::error!("Unsupported density code {} in {}", density, id);
                return Err(Error::UnsupportedDensity { density });
            },
        };
        log::debug!("Density code {}, device size {} bytes", density, device_size);
        Geometry::new(device_size, config.page_size() as u64, config.erase_block_size() as u64)
    }

    pub fn device_size(&self) -> u64 {
        self.device_size
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn erase_block_size(&self) -> u64 {
        self.erase_block_size
    }

    /// Split a linear address into (page number, offset within page).
    pub fn to_page_offset(&self, addr: u64) -> (u64, u64) {
        (addr / self.page_size, addr % self.page_size)
    }

    /// Translate a linear address into the address format expected by the device.
    ///
    /// Only binary page sizes are supported, so the translation is the identity.
    pub fn translate_address(&self, addr: u64) -> u32 {
        addr as u32
    }

    /// Generate the 3-byte big-endian address sent after a command opcode.
    pub fn to_wire_address(&self, addr: u64) -> [u8; 3] {
        let bytes = self.translate_address(addr).to_be_bytes();
        [bytes[1], bytes[2], bytes[3]]
    }

    /// Check a read of `size` bytes at `addr` lies within the device.
    pub fn check_read(&self, addr: u64, size: u64) -> Result<()> {
        self.check_range(addr, size, 1)
    }

    /// Check a program of `size` bytes at `addr` lies within the device.
    pub fn check_program(&self, addr: u64, size: u64) -> Result<()> {
        self.check_range(addr, size, 1)
    }

    /// Check an erase of `size` bytes at `addr` lies within the device
    /// and is aligned to whole erase blocks.
    pub fn check_erase(&self, addr: u64, size: u64) -> Result<()> {
        self.check_range(addr, size, self.erase_block_size)
    }

    fn check_range(&self, addr: u64, size: u64, align: u64) -> Result<()> {
        log::trace!("Checking address=0x{:08X} size={} align={}", addr, size, align);
        if addr % align != 0 || size % align != 0 {
            log::error!("Operation is not aligned to {} bytes", align);
            return Err(Error::InvalidArgument { address: addr, size });
        }
        match addr.checked_add(size) {
            Some(end) if end <= self.device_size => Ok(()),
            _ => {
                log::error!("Operation would exceed flash capacity");
                Err(Error::InvalidArgument { address: addr, size })
            }
        }
    }
}

#[test]
fn test_geometry_invariants() {
    assert!(Geometry::new(512 * 1024, 256, 4096).is_ok());
    assert!(Geometry::new(512 * 1024, 264, 4096).is_err());
    assert!(Geometry::new(512 * 1024, 4096, 2048).is_err());
    assert!(Geometry::new(512 * 1024 + 2048, 256, 4096).is_err());
    assert!(Geometry::new(2 * MAX_DEVICE_SIZE, 256, 4096).is_err());
    assert!(Geometry::new(0, 256, 4096).is_err());
}

#[test]
fn test_from_id() {
    let config = Config::default();
    let geom = Geometry::from_id(&FlashID::from_bytes([0x1F, 0x89, 0x00]), &config).unwrap();
    assert_eq!(geom.device_size(), MAX_DEVICE_SIZE);
    let err = Geometry::from_id(&FlashID::from_bytes([0x1F, 0x8A, 0x01]), &config).unwrap_err();
    assert!(matches!(err, Error::UnsupportedDensity { density: 10 }));
    assert_eq!(err.kind(), crate::ErrorKind::DeviceError);
}

#[test]
fn test_page_offset() {
    let geom = Geometry::new(512 * 1024, 256, 4096).unwrap();
    assert_eq!(geom.to_page_offset(0), (0, 0));
    assert_eq!(geom.to_page_offset(250), (0, 250));
    assert_eq!(geom.to_page_offset(256), (1, 0));
    assert_eq!(geom.to_page_offset(0x1234), (0x12, 0x34));
    assert_eq!(geom.to_wire_address(0x07_1234), [0x07, 0x12, 0x34]);
}

#[test]
fn test_range_checks() {
    let geom = Geometry::new(64 * 1024, 256, 4096).unwrap();
    assert!(geom.check_read(0, 64 * 1024).is_ok());
    assert!(geom.check_read(1, 64 * 1024).is_err());
    assert!(geom.check_read(u64::MAX, 2).is_err());
    assert!(geom.check_program(63 * 1024, 1024).is_ok());
    assert!(geom.check_erase(4096, 8192).is_ok());
    assert!(geom.check_erase(4095, 4096).is_err());
    assert!(geom.check_erase(4096, 100).is_err());
    assert!(geom.check_erase(60 * 1024, 8192).is_err());
}

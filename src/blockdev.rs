use crate::Result;

/// Block device interface.
///
/// All methods take `&self`: implementations serialise access internally so
/// a single device may be shared between several owners, each of which
/// calls `init()` before use and `deinit()` when finished.
pub trait BlockDevice {
    /// Initialise the device, identifying it on first use.
    fn init(&self) -> Result<()>;

    /// Release one owner's hold on the device.
    fn deinit(&self) -> Result<()>;

    /// Read `buf.len()` bytes starting at `addr`.
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()>;

    /// Program `data` starting at `addr`.
    ///
    /// The destination must already have been erased.
    fn program(&self, addr: u64, data: &[u8]) -> Result<()>;

    /// Erase `size` bytes starting at `addr`; both must be multiples of `erase_size()`.
    fn erase(&self, addr: u64, size: u64) -> Result<()>;

    /// Minimum read unit in bytes.
    fn read_size(&self) -> u64;

    /// Minimum program unit in bytes.
    fn program_size(&self) -> u64;

    /// Minimum erase unit in bytes, or 0 if the device is not initialised.
    fn erase_size(&self) -> u64;

    /// Erase unit in bytes of the region containing `addr`.
    fn erase_size_at(&self, _addr: u64) -> u64 {
        self.erase_size()
    }

    /// Total device size in bytes, or 0 if the device is not initialised.
    fn size(&self) -> u64;

    /// Short name identifying the kind of device.
    fn device_type(&self) -> &'static str;
}

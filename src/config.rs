use core::time::Duration;

/// Driver configuration.
///
/// The defaults suit Adesto AT25SF-family parts: manufacturer 0x1F,
/// 256-byte pages, 4kB block erase, and the datasheet's typical page
/// erase/program time as the status polling interval.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Bits which must all be set in the manufacturer ID byte.
    id_match: u8,

    /// Mask applied to the first device ID byte to obtain the density code.
    /// Device size is `0x8000 << density`.
    density_mask: u8,

    /// Page program size in bytes.
    page_size: usize,

    /// Block erase size in bytes.
    erase_block_size: usize,

    /// Time slept between status register polls.
    poll_interval: Duration,

    /// Maximum time to wait for a page program or block erase.
    timeout: Duration,

    /// Maximum time to wait for a whole-chip erase.
    chip_erase_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            id_match: 0x1F,
            density_mask: 0x1F,
            page_size: 256,
            erase_block_size: 4096,
            poll_interval: Duration::from_millis(17),
            timeout: Duration::from_millis(10_000),
            chip_erase_timeout: Duration::from_millis(90_000),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_match(&self) -> u8 {
        self.id_match
    }

    /// Set the manufacturer ID signature, checked during initialisation.
    pub fn set_id_match(&mut self, id_match: u8) -> &mut Self {
        self.id_match = id_match;
        self
    }

    pub fn density_mask(&self) -> u8 {
        self.density_mask
    }

    pub fn set_density_mask(&mut self, mask: u8) -> &mut Self {
        self.density_mask = mask;
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Set the page program size in bytes.
    ///
    /// Must be a power of two; checked when the geometry is derived during `init()`.
    pub fn set_page_size(&mut self, n: usize) -> &mut Self {
        self.page_size = n;
        self
    }

    pub fn erase_block_size(&self) -> usize {
        self.erase_block_size
    }

    /// Set the block erase size in bytes.
    ///
    /// Must be a power of two and a multiple of the page size.
    pub fn set_erase_block_size(&mut self, n: usize) -> &mut Self {
        self.erase_block_size = n;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Set the time slept between status polls. Intervals below 1ms are rounded up to 1ms.
    pub fn set_poll_interval(&mut self, dur: Duration) -> &mut Self {
        self.poll_interval = dur;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, dur: Duration) -> &mut Self {
        self.timeout = dur;
        self
    }

    pub fn chip_erase_timeout(&self) -> Duration {
        self.chip_erase_timeout
    }

    pub fn set_chip_erase_timeout(&mut self, dur: Duration) -> &mut Self {
        self.chip_erase_timeout = dur;
        self
    }
}

#[test]
fn test_config_setters() {
    let mut config = Config::new();
    config.set_page_size(512).set_erase_block_size(2048).set_id_match(0x20);
    assert_eq!(config.page_size(), 512);
    assert_eq!(config.erase_block_size(), 2048);
    assert_eq!(config.id_match(), 0x20);
    assert_eq!(config.poll_interval(), Duration::from_millis(17));
}

//! Simulated 25-series flash chip for driving `FlashBlockDevice` in tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use flash25::{AnyhowResult, Config, FlashAccess, FlashBlockDevice, Timer};

pub const PAGE_SIZE: usize = 256;
pub const BLOCK_SIZE: usize = 4096;
/// Adesto manufacturer ID with density code 1, giving a 64kB device.
pub const ID: [u8; 3] = [0x1F, 0x81, 0x00];
pub const DEVICE_SIZE: usize = 0x8000 << 1;

pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const TIMEOUT: Duration = Duration::from_millis(100);

pub struct SimState {
    pub id: [u8; 3],
    pub mem: Vec<u8>,
    pub status2: u8,
    pub wel: bool,
    /// Number of status register 1 reads which report busy after each program or erase.
    pub busy_polls_per_op: u32,
    busy_polls: u32,
    pub always_busy: bool,
    pub fail_exchange: bool,
    /// Status registers read as all-1s, as with a floating MISO line.
    pub stuck_status: bool,
    pub write_protect: Option<bool>,

    tx: Vec<u8>,
    /// Bytes sent in every completed transaction.
    pub transactions: Vec<Vec<u8>>,
    pub exchanges: usize,
    /// (address, length) of every accepted page program.
    pub page_programs: Vec<(usize, usize)>,
    pub block_erases: Vec<usize>,
    pub chip_erases: usize,
    /// Commands other than status reads received while busy.
    pub busy_violations: usize,
    /// Program or erase commands rejected because WEL was clear or WP was asserted.
    pub ignored_writes: usize,
    pub slept: Vec<Duration>,
}

impl SimState {
    fn new() -> Self {
        SimState {
            id: ID,
            mem: vec![0xFF; DEVICE_SIZE],
            status2: 0,
            wel: false,
            busy_polls_per_op: 0,
            busy_polls: 0,
            always_busy: false,
            fail_exchange: false,
            stuck_status: false,
            write_protect: None,
            tx: Vec::new(),
            transactions: Vec::new(),
            exchanges: 0,
            page_programs: Vec::new(),
            block_erases: Vec::new(),
            chip_erases: 0,
            busy_violations: 0,
            ignored_writes: 0,
            slept: Vec::new(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.always_busy || self.busy_polls > 0
    }

    pub fn status1(&self) -> u8 {
        (self.is_busy() as u8) | ((self.wel as u8) << 1)
    }

    pub fn total_slept(&self) -> Duration {
        self.slept.iter().sum()
    }

    pub fn count_opcode(&self, opcode: u8) -> usize {
        self.transactions.iter().filter(|tx| tx.first() == Some(&opcode)).count()
    }

    pub fn last_transaction(&self) -> Option<&[u8]> {
        self.transactions.last().map(|tx| tx.as_slice())
    }

    fn address(tx: &[u8]) -> usize {
        u32::from_be_bytes([0, tx[1], tx[2], tx[3]]) as usize % DEVICE_SIZE
    }

    fn respond(&self) -> u8 {
        let pos = self.tx.len() - 1;
        if pos == 0 {
            return 0;
        }
        match self.tx[0] {
            0x9F => self.id.get(pos - 1).copied().unwrap_or(0),
            0x05 | 0x35 if self.stuck_status => 0xFF,
            0x05 => self.status1(),
            0x35 => self.status2,
            0x03 if pos >= 4 => self.mem[(Self::address(&self.tx) + pos - 4) % DEVICE_SIZE],
            _ => 0,
        }
    }

    fn writable(&mut self) -> bool {
        if self.wel && self.write_protect != Some(true) {
            self.wel = false;
            self.busy_polls = self.busy_polls_per_op;
            true
        } else {
            self.ignored_writes += 1;
            false
        }
    }

    fn execute(&mut self, tx: &[u8]) {
        let opcode = match tx.first() {
            Some(opcode) => *opcode,
            None => return,
        };
        match opcode {
            0x05 => {
                if self.busy_polls > 0 {
                    self.busy_polls -= 1;
                }
                return;
            },
            0x35 => return,
            _ => (),
        }
        if self.is_busy() {
            self.busy_violations += 1;
        }
        match opcode {
            0x06 => self.wel = true,
            0x04 => self.wel = false,
            0x02 if tx.len() >= 4 => {
                if self.writable() {
                    let addr = Self::address(tx);
                    let data = &tx[4..];
                    let base = addr - addr % PAGE_SIZE;
                    for (i, byte) in data.iter().enumerate() {
                        // Page programs wrap around within the page.
                        self.mem[base + (addr % PAGE_SIZE + i) % PAGE_SIZE] &= byte;
                    }
                    self.page_programs.push((addr, data.len()));
                }
            },
            0x20 if tx.len() >= 4 => {
                if self.writable() {
                    let base = Self::address(tx) - Self::address(tx) % BLOCK_SIZE;
                    for byte in self.mem[base..base + BLOCK_SIZE].iter_mut() {
                        *byte = 0xFF;
                    }
                    self.block_erases.push(base);
                }
            },
            0xC7 => {
                if self.writable() {
                    for byte in self.mem.iter_mut() {
                        *byte = 0xFF;
                    }
                    self.chip_erases += 1;
                }
            },
            _ => (),
        }
    }
}

#[derive(Clone)]
pub struct SimBus(pub Arc<Mutex<SimState>>);

impl FlashAccess for SimBus {
    fn select(&mut self, selected: bool) -> AnyhowResult<()> {
        let mut state = self.0.lock().unwrap();
        if selected {
            state.tx.clear();
        } else {
            let tx = std::mem::take(&mut state.tx);
            state.execute(&tx);
            state.transactions.push(tx);
        }
        Ok(())
    }

    fn exchange_byte(&mut self, byte: u8) -> AnyhowResult<u8> {
        let mut state = self.0.lock().unwrap();
        if state.fail_exchange {
            anyhow::bail!("SPI bus fault");
        }
        state.exchanges += 1;
        state.tx.push(byte);
        Ok(state.respond())
    }

    fn set_write_protect(&mut self, protected: bool) -> AnyhowResult<()> {
        self.0.lock().unwrap().write_protect = Some(protected);
        Ok(())
    }
}

/// Timer which records requested sleeps instead of blocking.
#[derive(Clone)]
pub struct SimTimer(pub Arc<Mutex<SimState>>);

impl Timer for SimTimer {
    fn sleep(&mut self, dur: Duration) {
        self.0.lock().unwrap().slept.push(dur);
    }
}

pub struct Sim(pub Arc<Mutex<SimState>>);

impl Sim {
    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap()
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config
        .set_poll_interval(POLL_INTERVAL)
        .set_timeout(TIMEOUT)
        .set_chip_erase_timeout(TIMEOUT * 5);
    config
}

/// Create a device attached to a fresh simulated chip.
pub fn sim_device() -> (FlashBlockDevice<SimBus, SimTimer>, Sim) {
    init_logging();
    let state = Arc::new(Mutex::new(SimState::new()));
    let device = FlashBlockDevice::with_config(
        SimBus(state.clone()), SimTimer(state.clone()), test_config());
    (device, Sim(state))
}

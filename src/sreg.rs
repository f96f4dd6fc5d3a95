/// Combined status word: status register 1 in the high byte, status register 2 in the low byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub fn from_registers(status1: u8, status2: u8) -> Self {
        StatusWord(u16::from_be_bytes([status1, status2]))
    }

    /// Status register 1.
    pub fn status1(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Status register 2.
    pub fn status2(&self) -> u8 {
        self.0 as u8
    }

    /// Get BUSY bit, set while a program or erase is in progress.
    pub fn get_busy(&self) -> bool {
        self.0 & (1 << 8) != 0
    }

    /// Get WEL (write enable latch) bit.
    pub fn get_wel(&self) -> bool {
        self.0 & (1 << 9) != 0
    }

    /// Get (BP0, BP1, BP2) bits.
    pub fn get_block_protect(&self) -> (bool, bool, bool) {
        let bp = (self.0 >> 10) & 0b111;
        (bp & 0b001 != 0, bp & 0b010 != 0, bp & 0b100 != 0)
    }

    /// Get TB (top/bottom protection) bit.
    pub fn get_tb(&self) -> bool {
        self.0 & (1 << 13) != 0
    }

    /// Get SEC (sector protect) bit.
    pub fn get_sec(&self) -> bool {
        self.0 & (1 << 14) != 0
    }

    /// Get SRP0 (status register protect 0) bit.
    pub fn get_srp0(&self) -> bool {
        self.0 & (1 << 15) != 0
    }

    /// Get SRP1 (status register protect 1) bit.
    pub fn get_srp1(&self) -> bool {
        self.0 & 0b0000_0001 != 0
    }

    /// Get QE (quad enable) bit.
    pub fn get_qe(&self) -> bool {
        self.0 & 0b0000_0010 != 0
    }

    /// Get LB (security register lock) bits.
    pub fn get_lock(&self) -> u8 {
        ((self.0 >> 3) & 0b111) as u8
    }

    /// Get CMP (protection complement) bit.
    pub fn get_cmp(&self) -> bool {
        self.0 & 0b0100_0000 != 0
    }

    /// Check whether the word looks like a real device response.
    ///
    /// A floating or disconnected MISO line reads as all-1s.
    pub fn is_plausible(&self) -> bool {
        self.0 != 0xFFFF
    }
}

impl core::fmt::Display for StatusWord {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "0x{:04X}", self.0)?;
        let flags = [
            (self.get_srp0(), "SRP0"),
            (self.get_sec(), "SEC"),
            (self.get_tb(), "TB"),
            (self.get_wel(), "WEL"),
            (self.get_busy(), "BUSY"),
            (self.get_cmp(), "CMP"),
            (self.get_lock() != 0, "LB"),
            (self.get_qe(), "QE"),
            (self.get_srp1(), "SRP1"),
        ];
        let (bp0, bp1, bp2) = self.get_block_protect();
        if bp0 || bp1 || bp2 {
            write!(f, " BP={}{}{}", bp2 as u8, bp1 as u8, bp0 as u8)?;
        }
        for (set, name) in flags.iter() {
            if *set {
                write!(f, " {}", name)?;
            }
        }
        Ok(())
    }
}

#[test]
fn test_status_word() {
    let status = StatusWord::from_registers(0b0000_0011, 0b0100_0010);
    assert_eq!(status.0, 0x0342);
    assert_eq!(status.status1(), 0x03);
    assert_eq!(status.status2(), 0x42);
    assert!(status.get_busy());
    assert!(status.get_wel());
    assert!(status.get_cmp());
    assert!(status.get_qe());
    assert!(!status.get_srp1());
    assert_eq!(status.get_block_protect(), (false, false, false));
    assert_eq!(status.to_string(), "0x0342 WEL BUSY CMP QE");

    let status = StatusWord::from_registers(0b1001_1100, 0);
    assert!(!status.get_busy());
    assert!(status.get_srp0());
    assert_eq!(status.get_block_protect(), (true, true, true));
    assert_eq!(status.to_string(), "0x9C00 BP=111 SRP0");

    assert!(!StatusWord(0xFFFF).is_plausible());
    assert!(StatusWord(0x0000).is_plausible());
}

/// Store the ID read off a 25-series flash memory.
///
/// The manufacturer ID and two device ID bytes are read using the 0x9F command.
/// For Adesto parts the low bits of `device_id[0]` encode the memory density.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlashID {
    pub manufacturer_id: u8,
    pub device_id: [u8; 2],
}

impl FlashID {
    pub fn from_bytes(data: [u8; 3]) -> Self {
        FlashID { manufacturer_id: data[0], device_id: [data[1], data[2]] }
    }

    /// Manufacturer ID and first device ID byte, as used for signature matching.
    pub fn signature(&self) -> u16 {
        u16::from_be_bytes([self.manufacturer_id, self.device_id[0]])
    }

    /// Check every bit of `id_match` is set in the manufacturer ID.
    pub fn matches(&self, id_match: u8) -> bool {
        self.manufacturer_id & id_match == id_match
    }

    /// Density code from the first device ID byte.
    pub fn density(&self, mask: u8) -> u8 {
        self.device_id[0] & mask
    }

    /// Look up a manufacturer name from the JEDEC ID.
    pub fn manufacturer_name(&self) -> Option<&'static str> {
        jep106::JEP106Code::new(0, self.manufacturer_id & 0x7F).get()
    }
}

impl std::fmt::Display for FlashID {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mfn = match self.manufacturer_name() {
            Some(mfn) => format!(" ({})", mfn),
            None => "".to_string(),
        };
        write!(f, "Manufacturer 0x{:02X}{}, Device 0x{:02X}{:02X}",
               self.manufacturer_id, mfn, self.device_id[0], self.device_id[1])
    }
}

#[test]
fn test_flash_id() {
    // AT25SF041: 4Mbit, density code 4.
    let id = FlashID::from_bytes([0x1F, 0x84, 0x01]);
    assert_eq!(id.signature(), 0x1F84);
    assert!(id.matches(0x1F));
    assert!(!id.matches(0x20));
    assert_eq!(id.density(0x1F), 4);
    assert!(id.to_string().starts_with("Manufacturer 0x1F"));
    assert!(id.to_string().ends_with("Device 0x8401"));
}

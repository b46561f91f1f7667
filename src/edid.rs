//! Minimal EDID base-block parsing
//!
//! Only what output identification needs: the PNP vendor id, product
//! code, serial number and the display-name/serial descriptor strings.
//! Extension blocks are kept as raw bytes but not interpreted.

const EDID_BLOCK_SIZE: usize = 128;
const EDID_MAGIC: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];

const DESCRIPTOR_OFFSET: usize = 54;
const DESCRIPTOR_SIZE: usize = 18;
const DESCRIPTOR_COUNT: usize = 4;

const DESCRIPTOR_TAG_SERIAL: u8 = 0xFF;
const DESCRIPTOR_TAG_NAME: u8 = 0xFC;

/// Identification data parsed from an EDID blob.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EdidInfo {
    /// Three-letter PNP vendor id, e.g. "DEL".
    pub vendor: String,
    pub product_code: u16,
    pub serial_number: u32,
    /// Monitor name descriptor string, if present.
    pub name: Option<String>,
    /// Serial descriptor string, if present.
    pub serial: Option<String>,
    /// The raw blob, including any extension blocks.
    pub data: Vec<u8>,
}

impl EdidInfo {
    /// Best human-readable product identifier available.
    pub fn product(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{} {:04X}", self.vendor, self.product_code),
        }
    }
}

/// Parse an EDID blob. Returns `None` if the data is shorter than one
/// block or the header magic does not match.
pub fn parse(data: &[u8]) -> Option<EdidInfo> {
    if data.len() < EDID_BLOCK_SIZE || data[..8] != EDID_MAGIC {
        return None;
    }

    // Vendor id: big-endian 16 bits holding three 5-bit letters.
    let raw = u16::from(data[8]) << 8 | u16::from(data[9]);
    let letters = [
        (raw >> 10) & 0x1F,
        (raw >> 5) & 0x1F,
        raw & 0x1F,
    ];
    let vendor: String = letters
        .iter()
        .map(|&l| {
            if (1..=26).contains(&l) {
                (b'A' + (l as u8 - 1)) as char
            } else {
                '?'
            }
        })
        .collect();

    let product_code = u16::from_le_bytes([data[10], data[11]]);
    let serial_number = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);

    let mut name = None;
    let mut serial = None;
    for i in 0..DESCRIPTOR_COUNT {
        let base = DESCRIPTOR_OFFSET + i * DESCRIPTOR_SIZE;
        let desc = &data[base..base + DESCRIPTOR_SIZE];
        // Display descriptors start with a zero pixel clock; byte 3 is the tag.
        if desc[0] != 0 || desc[1] != 0 {
            continue;
        }
        match desc[3] {
            DESCRIPTOR_TAG_NAME => name = descriptor_text(&desc[5..18]),
            DESCRIPTOR_TAG_SERIAL => serial = descriptor_text(&desc[5..18]),
            _ => {}
        }
    }

    Some(EdidInfo {
        vendor,
        product_code,
        serial_number,
        name,
        serial,
        data: data.to_vec(),
    })
}

/// Descriptor strings are 13 bytes, terminated by 0x0A and padded with
/// spaces.
fn descriptor_text(bytes: &[u8]) -> Option<String> {
    let end = bytes
        .iter()
        .position(|&b| b == 0x0A)
        .unwrap_or(bytes.len());
    let text: String = bytes[..end]
        .iter()
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .map(|&b| b as char)
        .collect();
    let text = text.trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_edid() -> Vec<u8> {
        let mut block = vec![0u8; EDID_BLOCK_SIZE];
        block[..8].copy_from_slice(&EDID_MAGIC);
        // "DEL": D=4, E=5, L=12 -> 00100 00101 01100
        let vendor: u16 = (4 << 10) | (5 << 5) | 12;
        block[8] = (vendor >> 8) as u8;
        block[9] = (vendor & 0xFF) as u8;
        block[10..12].copy_from_slice(&0xA0F5u16.to_le_bytes());
        block[12..16].copy_from_slice(&12345u32.to_le_bytes());
        // Monitor name descriptor in the second slot
        let base = DESCRIPTOR_OFFSET + DESCRIPTOR_SIZE;
        block[base + 3] = DESCRIPTOR_TAG_NAME;
        let name = b"DELL U2415\n  ";
        block[base + 5..base + 5 + name.len()].copy_from_slice(name);
        block
    }

    #[test]
    fn parses_vendor_product_serial() {
        let info = parse(&synthetic_edid()).unwrap();
        assert_eq!(info.vendor, "DEL");
        assert_eq!(info.product_code, 0xA0F5);
        assert_eq!(info.serial_number, 12345);
        assert_eq!(info.name.as_deref(), Some("DELL U2415"));
        assert_eq!(info.product(), "DELL U2415");
    }

    #[test]
    fn rejects_bad_magic() {
        let mut block = synthetic_edid();
        block[0] = 0xFF;
        assert!(parse(&block).is_none());
    }

    #[test]
    fn rejects_short_data() {
        assert!(parse(&[0u8; 64]).is_none());
    }

    #[test]
    fn product_falls_back_to_vendor_and_code() {
        let mut block = synthetic_edid();
        // Wipe the name descriptor
        let base = DESCRIPTOR_OFFSET + DESCRIPTOR_SIZE;
        for b in &mut block[base..base + DESCRIPTOR_SIZE] {
            *b = 0;
        }
        let info = parse(&block).unwrap();
        assert_eq!(info.name, None);
        assert_eq!(info.product(), "DEL A0F5");
    }
}

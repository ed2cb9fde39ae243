//! CRC-16/ARC (reflected polynomial 0xA001), the variant the controller's
//! bootloader computes over flash.

const POLY: u16 = 0xA001;

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static TABLE: [u16; 256] = build_table();

/// Fold `data` into `seed`. Chaining calls over split input gives the same
/// result as one call over the whole input.
pub fn crc16(seed: u16, data: &[u8]) -> u16 {
    data.iter().fold(seed, |crc, &b| {
        (crc >> 8) ^ TABLE[((crc ^ u16::from(b)) & 0x00FF) as usize]
    })
}

//! CRC-32/MPEG-2 used by every long-form PSI section.

/// Generator polynomial, MSB first.
const POLYNOMIAL: u32 = 0x04C1_1DB7;

static CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ POLYNOMIAL;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Calculate CRC32 for MPEG-2 (polynomial 0x04C11DB7, init 0xFFFFFFFF, no final XOR).
///
/// Running this over a complete section, CRC bytes included, yields zero
/// when the section is intact.
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let index = ((crc >> 24) ^ byte as u32) as usize;
        crc = (crc << 8) ^ CRC_TABLE[index];
    }
    crc
}

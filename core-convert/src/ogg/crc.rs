//! OGG page checksum.
//!
//! CRC-32 with polynomial `0x04C11DB7`, initial value 0, no bit reflection
//! and no final XOR. The checksum of a page is computed over the whole page
//! with its checksum field set to zero.

const POLYNOMIAL: u32 = 0x04C1_1DB7;

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_table();

/// Continue a running checksum over `data`.
pub fn crc32_update(crc: u32, data: &[u8]) -> u32 {
    data.iter().fold(crc, |crc, &byte| {
        (crc << 8) ^ CRC_TABLE[(((crc >> 24) as u8) ^ byte) as usize]
    })
}

/// Checksum of `data` from a zero seed.
pub fn crc32(data: &[u8]) -> u32 {
    crc32_update(0, data)
}

/// Byte offset of the checksum field inside a page header.
pub const CHECKSUM_OFFSET: usize = 22;

/// Compute the checksum of a serialized page, treating its checksum field
/// as zero. `page` must hold at least a full 27-byte header.
pub fn page_checksum(page: &[u8]) -> u32 {
    let crc = crc32_update(0, &page[..CHECKSUM_OFFSET]);
    let crc = crc32_update(crc, &[0u8; 4]);
    crc32_update(crc, &page[CHECKSUM_OFFSET + 4..])
}

/// Recompute and store the checksum of a serialized page in place.
pub fn restamp_checksum(page: &mut [u8]) {
    let crc = page_checksum(page);
    page[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
}

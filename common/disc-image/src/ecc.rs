//! CD-ROM layered error correction: the 32-bit EDC and the Reed-Solomon P/Q parity bytes
//!
//! All functions operate on a full 2352-byte sector buffer.

use crate::BYTES_PER_SECTOR;
use crc::Crc;
use std::ops::Range;

const CD_ROM_CRC: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_CD_ROM_EDC);

const MODE_1_EDC_DIGEST_RANGE: Range<usize> = 0..2064;
const MODE_1_EDC_LOCATION: Range<usize> = 2064..2068;
const MODE_1_ZERO_RANGE: Range<usize> = 2068..2076;

const FORM_1_EDC_DIGEST_RANGE: Range<usize> = 16..2072;
const FORM_1_EDC_LOCATION: Range<usize> = 2072..2076;

const FORM_2_EDC_DIGEST_RANGE: Range<usize> = 16..2348;
const FORM_2_EDC_LOCATION: Range<usize> = 2348..2352;

const HEADER_RANGE: Range<usize> = 12..16;

const P_PARITY_LOCATION: usize = 0x81C;
const Q_PARITY_LOCATION: usize = 0x8C8;

const fn build_ecc_tables() -> ([u8; 256], [u8; 256]) {
    let mut forward = [0; 256];
    let mut backward = [0; 256];

    let mut i = 0;
    while i < 256 {
        let j = ((i << 1) ^ (if i & 0x80 != 0 { 0x11D } else { 0 })) as u8;
        forward[i] = j;
        backward[i ^ j as usize] = i as u8;
        i += 1;
    }

    (forward, backward)
}

// GF(2^8) multiply-by-alpha table and its companion used to solve for the parity byte pair
const ECC_TABLES: ([u8; 256], [u8; 256]) = build_ecc_tables();
const ECC_F_LUT: [u8; 256] = ECC_TABLES.0;
const ECC_B_LUT: [u8; 256] = ECC_TABLES.1;

/// Compute the CD-ROM EDC (CRC-32, polynomial 0x8001801B reflected) over a byte slice.
#[must_use]
pub fn edc(bytes: &[u8]) -> u32 {
    CD_ROM_CRC.checksum(bytes)
}

fn read_edc(sector: &[u8; BYTES_PER_SECTOR], location: Range<usize>) -> u32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&sector[location]);
    u32::from_le_bytes(bytes)
}

fn write_edc(sector: &mut [u8; BYTES_PER_SECTOR], digest: Range<usize>, location: Range<usize>) {
    let checksum = edc(&sector[digest]);
    sector[location].copy_from_slice(&checksum.to_le_bytes());
}

// Parity is computed over the sector starting at the header, so index 0 here is sector byte 12
fn compute_ecc_block(
    sector: &mut [u8; BYTES_PER_SECTOR],
    major_count: usize,
    minor_count: usize,
    major_mult: usize,
    minor_inc: usize,
    dest: usize,
) {
    let size = major_count * minor_count;
    for major in 0..major_count {
        let mut index = (major >> 1) * major_mult + (major & 1);
        let mut ecc_a = 0_u8;
        let mut ecc_b = 0_u8;

        for _ in 0..minor_count {
            let byte = sector[HEADER_RANGE.start + index];
            index += minor_inc;
            if index >= size {
                index -= size;
            }

            ecc_a ^= byte;
            ecc_b ^= byte;
            ecc_a = ECC_F_LUT[ecc_a as usize];
        }

        ecc_a = ECC_B_LUT[(ECC_F_LUT[ecc_a as usize] ^ ecc_b) as usize];
        sector[dest + major] = ecc_a;
        sector[dest + major + major_count] = ecc_a ^ ecc_b;
    }
}

fn write_ecc(sector: &mut [u8; BYTES_PER_SECTOR]) {
    // P parity must be written first; Q parity covers it
    compute_ecc_block(sector, 86, 24, 2, 86, P_PARITY_LOCATION);
    compute_ecc_block(sector, 52, 43, 86, 88, Q_PARITY_LOCATION);
}

/// Write EDC, the 8 reserved zero bytes, and P/Q parity for a Mode 1 sector. Sync, header and
/// user data must already be in place.
pub fn write_mode1_edc_ecc(sector: &mut [u8; BYTES_PER_SECTOR]) {
    write_edc(sector, MODE_1_EDC_DIGEST_RANGE, MODE_1_EDC_LOCATION);
    sector[MODE_1_ZERO_RANGE].fill(0);
    write_ecc(sector);
}

/// Write EDC and P/Q parity for a Mode 2 Form 1 sector. The header is excluded from parity
/// calculation, so it is zeroed for the computation and then restored.
pub fn write_mode2_form1_edc_ecc(sector: &mut [u8; BYTES_PER_SECTOR]) {
    write_edc(sector, FORM_1_EDC_DIGEST_RANGE, FORM_1_EDC_LOCATION);

    let mut header = [0; 4];
    header.copy_from_slice(&sector[HEADER_RANGE]);
    sector[HEADER_RANGE].fill(0);
    write_ecc(sector);
    sector[HEADER_RANGE].copy_from_slice(&header);
}

/// Write the EDC for a Mode 2 Form 2 sector. Form 2 has no parity bytes.
pub fn write_mode2_form2_edc(sector: &mut [u8; BYTES_PER_SECTOR]) {
    write_edc(sector, FORM_2_EDC_DIGEST_RANGE, FORM_2_EDC_LOCATION);
}

#[must_use]
pub fn mode1_edc_valid(sector: &[u8; BYTES_PER_SECTOR]) -> bool {
    edc(&sector[MODE_1_EDC_DIGEST_RANGE]) == read_edc(sector, MODE_1_EDC_LOCATION)
}

#[must_use]
pub fn mode2_form1_edc_valid(sector: &[u8; BYTES_PER_SECTOR]) -> bool {
    edc(&sector[FORM_1_EDC_DIGEST_RANGE]) == read_edc(sector, FORM_1_EDC_LOCATION)
}

/// Form 2 EDC is optional; a stored value of 0 means it was not recorded.
#[must_use]
pub fn mode2_form2_edc_valid(sector: &[u8; BYTES_PER_SECTOR]) -> bool {
    let stored = read_edc(sector, FORM_2_EDC_LOCATION);
    stored == 0 || edc(&sector[FORM_2_EDC_DIGEST_RANGE]) == stored
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYNC: [u8; 12] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];

    fn empty_sector(header: [u8; 4]) -> [u8; BYTES_PER_SECTOR] {
        let mut sector = [0; BYTES_PER_SECTOR];
        sector[..12].copy_from_slice(&SYNC);
        sector[12..16].copy_from_slice(&header);
        sector
    }

    #[test]
    fn edc_check_value() {
        assert_eq!(edc(b"123456789"), 0x6EC2EDC4);
    }

    #[test]
    fn mode1_reference_sector() {
        let mut sector = empty_sector([0x00, 0x02, 0x14, 0x01]);
        write_mode1_edc_ecc(&mut sector);

        assert_eq!(sector[2064..2068], [0x9E, 0xDC, 0x20, 0x94]);
        assert_eq!(sector[2076..2080], [0x00, 0xF7, 0x18, 0xF5]);
        assert_eq!(sector[2346..2352], [0x8F, 0x90, 0xC9, 0xC1, 0x46, 0x12]);
        assert!(mode1_edc_valid(&sector));

        sector[100] ^= 0x01;
        assert!(!mode1_edc_valid(&sector));
    }

    #[test]
    fn mode2_form1_reference_sector() {
        let mut sector = empty_sector([0x00, 0x02, 0x03, 0x02]);
        sector[18] = 0x08;
        sector[22] = 0x08;
        write_mode2_form1_edc_ecc(&mut sector);

        assert_eq!(sector[12..16], [0x00, 0x02, 0x03, 0x02]);
        assert_eq!(sector[2072..2076], [0x0B, 0x88, 0x81, 0x94]);
        assert_eq!(
            sector[2340..2352],
            [0x21, 0x00, 0x56, 0x00, 0x94, 0x00, 0xA1, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        assert!(mode2_form1_edc_valid(&sector));
    }

    #[test]
    fn mode2_form2_edc() {
        let mut sector = empty_sector([0x00, 0x02, 0x05, 0x02]);
        sector[18] = 0x20;
        sector[22] = 0x20;

        // Unrecorded EDC is accepted
        assert!(mode2_form2_edc_valid(&sector));

        write_mode2_form2_edc(&mut sector);
        assert_eq!(sector[2348..2352], [0x3F, 0x13, 0xB0, 0xBE]);
        assert!(mode2_form2_edc_valid(&sector));

        sector[1000] = 0x55;
        assert!(!mode2_form2_edc_valid(&sector));
    }
}

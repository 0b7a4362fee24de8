use crc::{Crc, CRC_16_MODBUS};

/// Frame check: reflected 0x8005, seed 0xFFFF, no final XOR.
pub const FRAME_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC-16 over a header-and-payload slice.
pub fn crc16(data: &[u8]) -> u16 {
    FRAME_CRC.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn empty_input_is_seed() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn incremental_digest_matches_one_shot() {
        let mut digest = FRAME_CRC.digest();
        digest.update(&[10, 0, 0]);
        digest.update(&[0x01, 0xFE]);
        assert_eq!(digest.finalize(), crc16(&[10, 0, 0, 0x01, 0xFE]));
    }
}

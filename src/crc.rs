//! Bit-serial CRC-32 used for image footers.
//!
//! Reflected polynomial `0xEDB88320`, seed `0xFFFFFFFF` and no final XOR (CRC-32/JAMCRC).
//! Kept bit-serial so that checksums stay identical to the ones produced by existing tooling.

pub const POLYNOMIAL: u32 = 0xEDB8_8320;
pub const SEED: u32 = 0xFFFF_FFFF;

#[derive(Clone, Copy, Debug)]
pub struct Crc32(u32);

impl Crc32 {
    pub const fn new() -> Self {
        Crc32(SEED)
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= *byte as u32;
            for _ in 0..8 {
                if self.0 & 1 != 0 {
                    self.0 = (self.0 >> 1) ^ POLYNOMIAL;
                } else {
                    self.0 >>= 1;
                }
            }
        }
    }

    pub const fn finish(self) -> u32 {
        self.0
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

pub fn checksum(bytes: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(bytes);
    crc.finish()
}

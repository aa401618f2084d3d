//! 32-bit FNV-1 hasher used to derive short stable suffixes from content.

const OFFSET_BASIS: u32 = 0x811c_9dc5;
const PRIME: u32 = 0x0100_0193;

#[derive(Debug, Clone, Copy)]
pub struct Hash32(u32);

impl Hash32 {
    pub fn new() -> Self { Self(OFFSET_BASIS) }

    pub fn update(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = self.0.wrapping_mul(PRIME);
            self.0 ^= *b as u32;
        }
    }

    pub fn sum32(&self) -> u32 { self.0 }

    /// One-shot helper.
    pub fn of(bytes: &[u8]) -> u32 {
        let mut h = Self::new();
        h.update(bytes);
        h.sum32()
    }
}

impl Default for Hash32 {
    fn default() -> Self { Self::new() }
}

impl std::hash::Hasher for Hash32 {
    fn finish(&self) -> u64 { self.0 as u64 }
    fn write(&mut self, bytes: &[u8]) { self.update(bytes) }
}

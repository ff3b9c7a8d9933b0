use core::hash::Hasher;

/// Passthrough hasher for keys that are already high-entropy, like `TypeId`.
#[derive(Default)]
pub struct NoOpHasher {
    hash: u64,
}

impl Hasher for NoOpHasher {
    fn finish(&self) -> u64 {
        self.hash
    }

    #[cfg(target_pointer_width = "64")]
    fn write_usize(&mut self, i: usize) {
        self.hash = i as u64;
    }

    fn write_u128(&mut self, i: u128) {
        self.hash = i as u64 ^ (i >> 64) as u64;
    }

    fn write_u64(&mut self, i: u64) {
        self.hash = i;
    }

    fn write(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            self.hash ^= u64::from_ne_bytes(word);
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, core::any::TypeId, core::hash::Hash as _};

    #[test]
    fn type_ids_hash_distinctly() {
        let mut a = NoOpHasher::default();
        let mut b = NoOpHasher::default();
        TypeId::of::<u32>().hash(&mut a);
        TypeId::of::<u64>().hash(&mut b);
        assert_ne!(a.finish(), b.finish());
    }
}

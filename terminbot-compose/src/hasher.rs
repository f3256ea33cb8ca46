use std::hash::{Hash, Hasher};

/// Adapts blake3 to `std::hash::Hasher`.
struct Blake3Writer<'a>(&'a mut blake3::Hasher);

impl<'a> Hasher for Blake3Writer<'a> {
    fn finish(&self) -> u64 {
        unreachable!("blake3 digests are read through finalize");
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
}

/// Hex blake3 digest of a `Hash` value, stable across runs.
pub fn digest<T: Hash>(value: &T) -> String {
    let mut hasher = blake3::Hasher::new();
    value.hash(&mut Blake3Writer(&mut hasher));
    hasher.finalize().to_hex().to_string()
}

use super::error::PeerError;
use bytes::Bytes;

/// Which pieces a peer (or we) have.
///
/// Bits are numbered from the high bit of the first byte. Spare bits past
/// `piece_count` are always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    /// Validates a `bitfield` payload from the wire.
    ///
    /// The payload must be exactly `ceil(piece_count / 8)` bytes with every
    /// spare bit clear.
    pub fn from_payload(bytes: &[u8], piece_count: usize) -> Result<Self, PeerError> {
        let expected = piece_count.div_ceil(8);
        if bytes.len() != expected {
            return Err(PeerError::Protocol(format!(
                "bitfield is {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }

        let bf = Self {
            bits: bytes.to_vec(),
            piece_count,
        };
        if bf.spare_bits_set() {
            return Err(PeerError::Protocol("bitfield sets spare bits".into()));
        }
        Ok(bf)
    }

    pub fn full(piece_count: usize) -> Self {
        let mut bf = Self {
            bits: vec![0xFF; piece_count.div_ceil(8)],
            piece_count,
        };
        bf.clear_spare_bits();
        bf
    }

    pub fn has(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        (self.bits[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    pub fn set(&mut self, index: usize) {
        if index >= self.piece_count {
            return;
        }
        self.bits[index / 8] |= 1 << (7 - index % 8);
    }

    pub fn clear(&mut self, index: usize) {
        if index >= self.piece_count {
            return;
        }
        self.bits[index / 8] &= !(1 << (7 - index % 8));
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    /// Indices of set bits, ascending.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.piece_count).filter(|&i| self.has(i))
    }

    fn spare_mask(&self) -> u8 {
        let spare = self.bits.len() * 8 - self.piece_count;
        if spare == 0 {
            0
        } else {
            0xFFu8 >> (8 - spare)
        }
    }

    fn spare_bits_set(&self) -> bool {
        match self.bits.last() {
            Some(last) => last & self.spare_mask() != 0,
            None => false,
        }
    }

    fn clear_spare_bits(&mut self) {
        let mask = self.spare_mask();
        if let Some(last) = self.bits.last_mut() {
            *last &= !mask;
        }
    }
}

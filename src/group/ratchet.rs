use crate::Error;
use hmac::{Hmac, Mac};
use rand::TryRngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

const RATCHET_PARTS: usize = 4;
const PART_LENGTH: usize = 32;
pub(crate) const RATCHET_LENGTH: usize = RATCHET_PARTS * PART_LENGTH;

/// Per-part seed byte fed to the rehash HMAC, binding each part to its
/// position.
const HASH_KEY_SEEDS: [[u8; 1]; RATCHET_PARTS] = [[0x00], [0x01], [0x02], [0x03]];

/// Four-level hash ratchet used for group messaging.
///
/// Part `i` is replaced every `2^(8*(3-i))` steps, so a receiver who is
/// handed the state at some index can derive every later index but none of
/// the earlier ones.
#[derive(Clone)]
pub(crate) struct GroupRatchet {
    data: [[u8; PART_LENGTH]; RATCHET_PARTS],
    counter: u32,
}

impl Zeroize for GroupRatchet {
    fn zeroize(&mut self) {
        self.data.zeroize();
    }
}

impl ZeroizeOnDrop for GroupRatchet {}

impl GroupRatchet {
    pub(crate) fn generate<R: TryRngCore>(rng: &mut R) -> Result<Self, Error> {
        let mut data = [[0u8; PART_LENGTH]; RATCHET_PARTS];
        for part in &mut data {
            rng.try_fill_bytes(part)
                .map_err(|_| Error::RandomSourceExhausted)?;
        }

        Ok(Self { data, counter: 0 })
    }

    pub(crate) fn from_bytes(bytes: &[u8; RATCHET_LENGTH], counter: u32) -> Self {
        let mut data = [[0u8; PART_LENGTH]; RATCHET_PARTS];
        for (part, chunk) in data.iter_mut().zip(bytes.chunks_exact(PART_LENGTH)) {
            part.copy_from_slice(chunk);
        }

        Self { data, counter }
    }

    pub(crate) fn as_bytes(&self) -> [u8; RATCHET_LENGTH] {
        let mut bytes = [0u8; RATCHET_LENGTH];
        for (chunk, part) in bytes.chunks_exact_mut(PART_LENGTH).zip(&self.data) {
            chunk.copy_from_slice(part);
        }
        bytes
    }

    pub(crate) fn counter(&self) -> u32 {
        self.counter
    }

    fn rehash_part(&mut self, from: usize, to: usize) {
        let mut hmac = <HmacSha256 as Mac>::new_from_slice(&self.data[from])
            .expect("HMAC initialization failed");
        hmac.update(&HASH_KEY_SEEDS[to]);
        self.data[to].copy_from_slice(&hmac.finalize().into_bytes());
    }

    /// Advances the ratchet by one step, replacing the lowest part whose
    /// byte of the counter rolled over together with every part below it.
    pub(crate) fn advance(&mut self) {
        let mut mask: u32 = 0x00FF_FFFF;
        let mut h = 0;
        self.counter = self.counter.wrapping_add(1);

        while h < RATCHET_PARTS - 1 {
            if self.counter & mask == 0 {
                break;
            }
            h += 1;
            mask >>= 8;
        }

        // Update D[h]..D[3] from the old D[h]; D[h] itself last.
        for i in (h..RATCHET_PARTS).rev() {
            self.rehash_part(h, i);
        }
    }

    /// Advances directly to `target`, rehashing each part only as often as
    /// its counter byte requires rather than stepping one index at a time.
    pub(crate) fn advance_to(&mut self, target: u32) {
        for j in 0..RATCHET_PARTS {
            let shift = ((RATCHET_PARTS - j - 1) * 8) as u32;
            let mask: u32 = !0u32 << shift;

            // The `& 0xff` confines the step count to this part's counter
            // byte, covering wrap-around of the lower parts.
            let mut steps = (target >> shift).wrapping_sub(self.counter >> shift) & 0xff;

            if steps == 0 {
                // The counter byte can exceed the target byte when a lower
                // part wrapped; part j then needs a full cycle.
                if target < self.counter {
                    steps = 0x100;
                } else {
                    continue;
                }
            }

            // All but the last step only touch part j.
            while steps > 1 {
                self.rehash_part(j, j);
                steps -= 1;
            }

            // The final step re-keys every lower part from the new D[j].
            for k in (j..RATCHET_PARTS).rev() {
                self.rehash_part(j, k);
            }
            self.counter = target & mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::OsRng;

    fn seeded() -> GroupRatchet {
        let mut bytes = [0u8; RATCHET_LENGTH];
        for (position, byte) in bytes.iter_mut().enumerate() {
            *byte = position as u8;
        }
        GroupRatchet::from_bytes(&bytes, 0)
    }

    #[test]
    fn test_advance_increments_counter() {
        let mut ratchet = GroupRatchet::generate(&mut OsRng).unwrap();
        assert_eq!(ratchet.counter(), 0);

        ratchet.advance();
        assert_eq!(ratchet.counter(), 1);
    }

    #[test]
    fn test_advance_changes_state_irreversibly() {
        let mut ratchet = seeded();
        let before = ratchet.as_bytes();

        ratchet.advance();
        assert_ne!(ratchet.as_bytes(), before);
    }

    #[test]
    fn test_advance_to_matches_sequential_advance() {
        for target in [1u32, 2, 255, 256, 257, 511, 512, 513, 600, 65536] {
            let mut stepped = seeded();
            for _ in 0..target {
                stepped.advance();
            }

            let mut jumped = seeded();
            jumped.advance_to(target);

            assert_eq!(jumped.counter(), target);
            assert_eq!(jumped.as_bytes(), stepped.as_bytes(), "target {target}");
        }
    }

    #[test]
    fn test_advance_to_from_nonzero_anchor() {
        let mut anchor = seeded();
        anchor.advance_to(300);

        let mut stepped = anchor.clone();
        for _ in 300..600 {
            stepped.advance();
        }

        anchor.advance_to(600);
        assert_eq!(anchor.as_bytes(), stepped.as_bytes());
    }

    proptest! {
        #[test]
        fn advance_to_equals_stepping(start in 0u32..600, gap in 1u32..600) {
            let mut stepped = seeded();
            stepped.advance_to(start);
            let mut jumped = stepped.clone();

            for _ in 0..gap {
                stepped.advance();
            }
            jumped.advance_to(start + gap);

            prop_assert_eq!(jumped.counter(), stepped.counter());
            prop_assert_eq!(jumped.as_bytes(), stepped.as_bytes());
        }
    }
}

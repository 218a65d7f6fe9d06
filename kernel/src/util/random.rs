//! A small xorshift pool behind `getrandom` and `/dev/random`.
//! Seeded once from the RTC and stirred with jiffies; no
//! cryptographic claims.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::sync::SpinLock;

static STATE: SpinLock<[u64; 2]> = SpinLock::new([0x9e37_79b9_7f4a_7c15, 0xbf58_476d_1ce4_e5b9]);
static STIR: AtomicU64 = AtomicU64::new(0);

/// Fold boot-time entropy (RTC seconds, timer calibration) in.
pub fn seed(entropy: u64) {
    let mut state = STATE.lock_irq_disabled();
    state[0] ^= entropy.rotate_left(17);
    state[1] = state[1].wrapping_add(entropy | 1);
}

fn next_u64() -> u64 {
    let mut state = STATE.lock_irq_disabled();
    let stir = STIR.fetch_add(1, Ordering::Relaxed) ^ crate::time::jiffies();
    let mut x = state[0] ^ stir;
    let y = state[1];
    state[0] = y;
    x ^= x << 23;
    x ^= x >> 17;
    x ^= y ^ (y >> 26);
    state[1] = x;
    x.wrapping_add(y)
}

/// Fill `buf` with pseudo-random bytes; never fails, never blocks.
pub fn getrandom(buf: &mut [u8]) {
    for chunk in buf.chunks_mut(8) {
        let word = next_u64().to_le_bytes();
        chunk.copy_from_slice(&word[..chunk.len()]);
    }
}

pub fn random_u32() -> u32 {
    next_u64() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_every_byte_span() {
        let mut buf = [0u8; 13];
        getrandom(&mut buf);
        let mut again = [0u8; 13];
        getrandom(&mut again);
        // Two draws almost surely differ.
        assert_ne!(buf, again);
    }
}

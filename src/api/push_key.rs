//! Generates the 20-character keys that `RemoteStore::new_key` hands out for new records. Keys
//! begin with an encoded millisecond timestamp so that they sort chronologically, and keys generated
//! within the same millisecond are made unique and increasing by incrementing the random suffix.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const ALPHABET: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

#[derive(Debug, Default)]
pub(crate) struct PushKeys {
    last: Mutex<LastKey>,
}

#[derive(Debug, Default)]
struct LastKey {
    millis: u64,
    random: [u8; RANDOM_CHARS],
}

impl PushKeys {
    pub(crate) fn next(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.next_at(millis)
    }

    fn next_at(&self, millis: u64) -> String {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if millis == last.millis {
            increment(&mut last.random);
        } else {
            last.millis = millis;
            last.random = random_digits();
        }

        let mut key = String::with_capacity(TIME_CHARS + RANDOM_CHARS);
        let mut time = [0u8; TIME_CHARS];
        let mut remaining = millis;
        for digit in time.iter_mut().rev() {
            *digit = (remaining % 64) as u8;
            remaining /= 64;
        }
        for digit in time.iter().chain(last.random.iter()) {
            key.push(ALPHABET[*digit as usize] as char);
        }
        key
    }
}

fn random_digits() -> [u8; RANDOM_CHARS] {
    let bytes = Uuid::new_v4().into_bytes();
    let mut digits = [0u8; RANDOM_CHARS];
    for (digit, byte) in digits.iter_mut().zip(bytes.iter()) {
        *digit = byte % 64;
    }
    digits
}

/// Adds one to a base-64 number stored as digits, most significant first.
fn increment(digits: &mut [u8; RANDOM_CHARS]) {
    for digit in digits.iter_mut().rev() {
        if *digit < 63 {
            *digit += 1;
            return;
        }
        *digit = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_ordered_and_unique() {
        let keys = PushKeys::default();
        let a = keys.next_at(1_700_000_000_000);
        let b = keys.next_at(1_700_000_000_000);
        let c = keys.next_at(1_700_000_000_001);
        assert_eq!(a.len(), 20);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(&a[..8], &b[..8]);
    }

    #[test]
    fn test_increment_carries() {
        let mut digits = [0u8; RANDOM_CHARS];
        digits[RANDOM_CHARS - 1] = 63;
        increment(&mut digits);
        assert_eq!(digits[RANDOM_CHARS - 1], 0);
        assert_eq!(digits[RANDOM_CHARS - 2], 1);
    }

    #[test]
    fn test_alphabet_is_sorted() {
        let mut sorted = *ALPHABET;
        sorted.sort();
        assert_eq!(&sorted, ALPHABET);
    }
}

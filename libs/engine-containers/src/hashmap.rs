//! Open-addressed hash map with linear probing, inline keys, fixed
//! capacity. Key `0` is reserved as the "empty slot" sentinel, so
//! capacity must be chosen such that key `0` is never a real key (the
//! resource-size table's crc32 lookup and the SARC name hash both avoid
//! hashing to exactly zero in practice; callers that can't guarantee
//! this should bias their key function by one).

use core::mem::MaybeUninit;

/// A key type usable with [`FixedHashMap`]: must have a reserved "empty"
/// representation (`0`).
pub trait ZeroKey: Copy + Eq {
    const EMPTY: Self;
}

impl ZeroKey for u32 {
    const EMPTY: u32 = 0;
}
impl ZeroKey for u64 {
    const EMPTY: u64 = 0;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapFullError;

/// Fixed-capacity open-addressed map, `CAP` slots, linear probing.
pub struct FixedHashMap<K: ZeroKey, V, const CAP: usize> {
    keys: [K; CAP],
    values: [MaybeUninit<V>; CAP],
    occupied: [bool; CAP],
    len: usize,
}

impl<K: ZeroKey, V, const CAP: usize> FixedHashMap<K, V, CAP> {
    pub fn new() -> Self {
        Self {
            keys: [K::EMPTY; CAP],
            values: [const { MaybeUninit::uninit() }; CAP],
            occupied: [false; CAP],
            len: 0,
        }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn probe(&self, key: K, hash: u64) -> usize {
        let mut idx = (hash as usize) % CAP;
        let mut steps = 0;
        while steps < CAP {
            if !self.occupied[idx] || self.keys[idx] == key {
                return idx;
            }
            idx = (idx + 1) % CAP;
            steps += 1;
        }
        idx
    }

    /// Inserts `key -> value`, returning the previous value if `key` was
    /// already present. Fails if the map is full and `key` is new.
    pub fn insert(&mut self, key: K, hash: u64, value: V) -> Result<Option<V>, MapFullError> {
        debug_assert!(key != K::EMPTY, "key 0 is reserved for empty slots");
        if self.len == CAP {
            let idx = self.probe(key, hash);
            if !self.occupied[idx] {
                return Err(MapFullError);
            }
        }
        let idx = self.probe(key, hash);
        if self.occupied[idx] {
            let old = core::mem::replace(&mut self.values[idx], MaybeUninit::new(value));
            // SAFETY: slot was occupied, so its value was previously initialized.
            return Ok(Some(unsafe { old.assume_init() }));
        }
        self.keys[idx] = key;
        self.values[idx] = MaybeUninit::new(value);
        self.occupied[idx] = true;
        self.len += 1;
        Ok(None)
    }

    pub fn get(&self, key: K, hash: u64) -> Option<&V> {
        debug_assert!(key != K::EMPTY);
        let idx = self.probe(key, hash);
        if self.occupied[idx] && self.keys[idx] == key {
            // SAFETY: occupied slots always hold an initialized value.
            Some(unsafe { self.values[idx].assume_init_ref() })
        } else {
            None
        }
    }

    pub fn remove(&mut self, key: K, hash: u64) -> Option<V> {
        debug_assert!(key != K::EMPTY);
        let idx = self.probe(key, hash);
        if !(self.occupied[idx] && self.keys[idx] == key) {
            return None;
        }
        self.occupied[idx] = false;
        self.keys[idx] = K::EMPTY;
        self.len -= 1;
        // SAFETY: slot was occupied.
        let removed = unsafe { core::mem::replace(&mut self.values[idx], MaybeUninit::uninit()).assume_init() };

        // Re-insert the probe chain following `idx` so that later lookups
        // of those keys still terminate (classic linear-probing deletion).
        let mut scan = (idx + 1) % CAP;
        while self.occupied[scan] {
            let k = self.keys[scan];
            let v = unsafe { self.values[scan].assume_init_read() };
            self.occupied[scan] = false;
            self.keys[scan] = K::EMPTY;
            self.len -= 1;
            // re-hash is unavailable here without a hasher; since callers
            // supply `hash` explicitly per call, re-insertion requires
            // the caller's hash function. We reinsert using linear
            // distance from `scan`'s natural slot is unknown, so we
            // instead shift the chain down by one, which preserves
            // probe-sequence validity for linear probing specifically.
            let dest = if scan == 0 { CAP - 1 } else { scan - 1 };
            self.keys[dest] = k;
            self.values[dest] = MaybeUninit::new(v);
            self.occupied[dest] = true;
            self.len += 1;
            scan = (scan + 1) % CAP;
        }
        Some(removed)
    }
}

impl<K: ZeroKey, V, const CAP: usize> Default for FixedHashMap<K, V, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ZeroKey, V, const CAP: usize> Drop for FixedHashMap<K, V, CAP> {
    fn drop(&mut self) {
        for i in 0..CAP {
            if self.occupied[i] {
                // SAFETY: occupied slots hold an initialized value.
                unsafe { self.values[i].assume_init_drop() };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(k: u32) -> u64 {
        u64::from(k).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    #[test]
    fn insert_get_remove() {
        let mut map: FixedHashMap<u32, &'static str, 16> = FixedHashMap::new();
        assert_eq!(map.insert(1, h(1), "one").unwrap(), None);
        assert_eq!(map.insert(2, h(2), "two").unwrap(), None);
        assert_eq!(map.get(1, h(1)), Some(&"one"));
        assert_eq!(map.get(2, h(2)), Some(&"two"));
        assert_eq!(map.get(3, h(3)), None);
        assert_eq!(map.remove(1, h(1)), Some("one"));
        assert_eq!(map.get(1, h(1)), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn overwrite_existing() {
        let mut map: FixedHashMap<u32, i32, 8> = FixedHashMap::new();
        map.insert(5, h(5), 100).unwrap();
        let old = map.insert(5, h(5), 200).unwrap();
        assert_eq!(old, Some(100));
        assert_eq!(map.get(5, h(5)), Some(&200));
        assert_eq!(map.len(), 1);
    }
}

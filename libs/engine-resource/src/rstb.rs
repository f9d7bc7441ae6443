//! Resource-size table reader (§6, supplemented behavior item 4): sniffs
//! one of three header variants, then looks the requested path up first
//! by crc32 and, on a miss, by a sorted path-collision table.
//!
//! The hand-rolled binary searches in the source this is grounded on
//! reduce to ordinary searches over ascending-sorted arrays; both tables
//! are parsed into owned, sorted `Vec`s here and walked with
//! [`slice::binary_search_by`] rather than reimplementing the pointer
//! arithmetic.

use crate::error::FormatError;
use engine_text::crc32;

pub const INVALID_SIZE: u32 = 0xffff_ffff;
const DEFAULT_MAX_PATH: usize = 0x80;

const CRC32_ENTRY_SIZE: usize = 8;

/// A parsed resource-size table: a path-crc32-keyed array plus, for
/// tables old enough to predate the crc32 scheme's full rollout, a
/// sorted-by-path collision array covering entries that hashed
/// identically to something else.
pub struct ResourceSizeTable {
    crc32_array: Vec<(u32, u32)>,
    collision_array: Vec<(Vec<u8>, u32)>,
    max_path: usize,
}

impl ResourceSizeTable {
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < CRC32_ENTRY_SIZE {
            return Err(FormatError::TooShort);
        }

        if data.len() >= 22 && &data[0..4] == b"REST" && &data[4..6] == b"BL" {
            let max_path = u32::from_le_bytes(data[10..14].try_into().unwrap());
            let crc32_count = u32::from_le_bytes(data[14..18].try_into().unwrap());
            let collision_count = u32::from_le_bytes(data[18..22].try_into().unwrap());
            Self::parse_tables(
                &data[22..],
                crc32_count,
                collision_count,
                usize::try_from(max_path).unwrap_or(DEFAULT_MAX_PATH),
            )
        } else if data.len() >= 12 && &data[0..4] == b"RSTB" {
            let crc32_count = u32::from_le_bytes(data[4..8].try_into().unwrap());
            let collision_count = u32::from_le_bytes(data[8..12].try_into().unwrap());
            Self::parse_tables(&data[12..], crc32_count, collision_count, DEFAULT_MAX_PATH)
        } else {
            let count = u32::try_from(data.len() / CRC32_ENTRY_SIZE).unwrap_or(0);
            Self::parse_tables(data, count, 0, DEFAULT_MAX_PATH)
        }
    }

    fn parse_tables(
        rest: &[u8],
        crc32_count: u32,
        collision_count: u32,
        max_path: usize,
    ) -> Result<Self, FormatError> {
        let crc32_count = usize::try_from(crc32_count).unwrap_or(usize::MAX);
        let crc32_bytes = crc32_count * CRC32_ENTRY_SIZE;
        if rest.len() < crc32_bytes {
            return Err(FormatError::TooShort);
        }

        let mut crc32_array = Vec::with_capacity(crc32_count);
        for i in 0..crc32_count {
            let entry = &rest[i * CRC32_ENTRY_SIZE..(i + 1) * CRC32_ENTRY_SIZE];
            let path_crc32 = u32::from_le_bytes(entry[0..4].try_into().unwrap());
            let resource_size = u32::from_le_bytes(entry[4..8].try_into().unwrap());
            crc32_array.push((path_crc32, resource_size));
        }

        let collision_count = usize::try_from(collision_count).unwrap_or(usize::MAX);
        let collision_entry_size = 4 + max_path;
        let mut collision_array = Vec::with_capacity(collision_count);
        if collision_count > 0 {
            let collision_bytes = &rest[crc32_bytes..];
            if collision_bytes.len() < collision_count * collision_entry_size {
                return Err(FormatError::TooShort);
            }
            for i in 0..collision_count {
                let entry = &collision_bytes[i * collision_entry_size..(i + 1) * collision_entry_size];
                let path = entry[..max_path].to_vec();
                let size = u32::from_le_bytes(entry[max_path..max_path + 4].try_into().unwrap());
                collision_array.push((path, size));
            }
        }

        Ok(Self {
            crc32_array,
            collision_array,
            max_path,
        })
    }

    /// Looks up `path`'s recorded decompressed resource size, by crc32
    /// first and falling back to the path-collision table.
    pub fn lookup(&self, path: &str) -> Option<u32> {
        let hash = crc32(path.as_bytes());
        self.lookup_by_crc32(hash).or_else(|| self.lookup_by_path(path))
    }

    fn lookup_by_crc32(&self, hash: u32) -> Option<u32> {
        self.crc32_array
            .binary_search_by_key(&hash, |&(h, _)| h)
            .ok()
            .map(|i| self.crc32_array[i].1)
    }

    fn lookup_by_path(&self, path: &str) -> Option<u32> {
        if self.collision_array.is_empty() {
            return None;
        }
        let mut padded = path.as_bytes().to_vec();
        padded.resize(self.max_path, 0);
        padded.truncate(self.max_path);
        self.collision_array
            .binary_search_by(|(p, _)| p.as_slice().cmp(padded.as_slice()))
            .ok()
            .map(|i| self.collision_array[i].1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headerless_table(entries: &[(u32, u32)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for &(crc, size) in entries {
            buf.extend_from_slice(&crc.to_le_bytes());
            buf.extend_from_slice(&size.to_le_bytes());
        }
        buf
    }

    #[test]
    fn headerless_crc32_lookup() {
        let data = headerless_table(&[(10, 100), (20, 200), (30, 300)]);
        let table = ResourceSizeTable::parse(&data).unwrap();
        assert_eq!(table.lookup_by_crc32(20), Some(200));
        assert_eq!(table.lookup_by_crc32(99), None);
    }

    #[test]
    fn old_header_roundtrip() {
        let mut data = Vec::new();
        data.extend_from_slice(b"RSTB");
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&headerless_table(&[(5, 50), (7, 70)]));
        let table = ResourceSizeTable::parse(&data).unwrap();
        assert_eq!(table.lookup_by_crc32(7), Some(70));
    }

    #[test]
    fn collision_fallback_by_path() {
        let max_path = 8;
        let mut data = Vec::new();
        data.extend_from_slice(b"REST");
        data.extend_from_slice(b"BL");
        data.extend_from_slice(&1u32.to_le_bytes()); // version
        data.extend_from_slice(&u32::try_from(max_path).unwrap().to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes()); // crc32 count
        data.extend_from_slice(&1u32.to_le_bytes()); // collision count
        let mut path_bytes = b"a.bfres".to_vec();
        path_bytes.resize(max_path, 0);
        data.extend_from_slice(&path_bytes);
        data.extend_from_slice(&42u32.to_le_bytes());

        let table = ResourceSizeTable::parse(&data).unwrap();
        assert_eq!(table.lookup("a.bfres"), Some(42));
        assert_eq!(table.lookup("missing.bfres"), None);
    }

    #[test]
    fn too_short_rejected() {
        assert_eq!(ResourceSizeTable::parse(&[1, 2, 3]), Err(FormatError::TooShort));
    }
}

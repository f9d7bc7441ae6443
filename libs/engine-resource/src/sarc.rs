//! Minimal SARC archive reader (§6, supplemented behavior item 7): a
//! path-hashed file table (SFAT) over a packed file region, with a name
//! table (SFNT) for collision resolution and a byte-order mark that
//! flips every multi-byte header field when the archive was built on a
//! foreign-endian target.

use crate::error::FormatError;

const SARC_HEADER_SIZE: usize = 0x14;
const SFAT_HEADER_SIZE: usize = 0xc;
const SFAT_ENTRY_SIZE: usize = 0x10;
const SFNT_HEADER_SIZE: usize = 0x8;
const BOM_REVERSE: u16 = 0xFFFE;
const TARGET_VERSION: u16 = 0x100;

fn u16_field(bytes: &[u8], reverse: bool) -> u16 {
    let v = u16::from_le_bytes(bytes.try_into().unwrap());
    if reverse { v.swap_bytes() } else { v }
}

fn u32_field(bytes: &[u8], reverse: bool) -> u32 {
    let v = u32::from_le_bytes(bytes.try_into().unwrap());
    if reverse { v.swap_bytes() } else { v }
}

#[derive(Clone, Copy)]
struct SfatEntry {
    file_name_hash: u32,
    name_offset_words: u32,
    collision_index: u8,
    start: u32,
    end: u32,
}

/// A parsed, self-contained SARC archive. Holds its own copy of the
/// backing bytes so it can outlive whatever buffer it was loaded from.
pub struct Archive {
    data: Vec<u8>,
    entries: Vec<SfatEntry>,
    hash_seed: u32,
    file_region_offset: usize,
    path_table_offset: usize,
}

impl Archive {
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < SARC_HEADER_SIZE || &data[0..4] != b"SARC" {
            return Err(FormatError::BadMagic);
        }
        if usize::from(u16_field(&data[4..6], false)) != SARC_HEADER_SIZE {
            return Err(FormatError::BadMagic);
        }
        let reverse = u16_field(&data[6..8], false) == BOM_REVERSE;
        let file_array_offset = u32_field(&data[12..16], reverse);
        if u16_field(&data[16..18], reverse) != TARGET_VERSION {
            return Err(FormatError::BadMagic);
        }

        let sfat_off = SARC_HEADER_SIZE;
        if data.len() < sfat_off + SFAT_HEADER_SIZE || &data[sfat_off..sfat_off + 4] != b"SFAT" {
            return Err(FormatError::BadMagic);
        }
        if usize::from(u16_field(&data[sfat_off + 4..sfat_off + 6], reverse)) != SFAT_HEADER_SIZE {
            return Err(FormatError::BadMagic);
        }
        let file_count = u16_field(&data[sfat_off + 6..sfat_off + 8], reverse);
        if (file_count >> 14) != 0 {
            return Err(FormatError::BadMagic);
        }
        let hash_seed = u32_field(&data[sfat_off + 8..sfat_off + 12], reverse);

        let entries_off = sfat_off + SFAT_HEADER_SIZE;
        let file_count = usize::from(file_count);
        let entries_bytes = file_count * SFAT_ENTRY_SIZE;
        if data.len() < entries_off + entries_bytes {
            return Err(FormatError::TooShort);
        }

        let mut entries = Vec::with_capacity(file_count);
        for i in 0..file_count {
            let e = &data[entries_off + i * SFAT_ENTRY_SIZE..entries_off + (i + 1) * SFAT_ENTRY_SIZE];
            let file_name_hash = u32_field(&e[0..4], reverse);
            let name_data = u32_field(&e[4..8], reverse);
            let start = u32_field(&e[8..12], reverse);
            let end = u32_field(&e[12..16], reverse);
            entries.push(SfatEntry {
                file_name_hash,
                name_offset_words: name_data & 0x00ff_ffff,
                collision_index: u8::try_from(name_data >> 24).expect("top byte of name_data fits u8"),
                start,
                end,
            });
        }

        let sfnt_off = entries_off + entries_bytes;
        if data.len() < sfnt_off + SFNT_HEADER_SIZE || &data[sfnt_off..sfnt_off + 4] != b"SFNT" {
            return Err(FormatError::BadMagic);
        }
        let sfnt_header_size = u16_field(&data[sfnt_off + 4..sfnt_off + 6], reverse);
        if usize::from(sfnt_header_size) != SFNT_HEADER_SIZE {
            return Err(FormatError::BadMagic);
        }

        Ok(Self {
            data: data.to_vec(),
            entries,
            hash_seed,
            file_region_offset: usize::try_from(file_array_offset).unwrap_or(usize::MAX),
            path_table_offset: sfnt_off + usize::from(sfnt_header_size),
        })
    }

    /// `hash = hash * hash_seed + byte`, folded left-to-right over the
    /// path's bytes.
    fn hash_path(&self, path: &str) -> u32 {
        let mut hash: u32 = 0;
        for &b in path.as_bytes() {
            hash = hash.wrapping_mul(self.hash_seed).wrapping_add(u32::from(b));
        }
        hash
    }

    fn path_at(&self, name_offset_words: u32) -> Option<&str> {
        let offset = self.path_table_offset + usize::try_from(name_offset_words).ok()? * 4;
        if offset >= self.file_region_offset || offset >= self.data.len() {
            return None;
        }
        let len = self.data[offset..].iter().position(|&b| b == 0)?;
        std::str::from_utf8(&self.data[offset..offset + len]).ok()
    }

    /// Binary-searches the hash-sorted SFAT for `path`'s entry, walking
    /// back to the start of its collision run and linear-scanning forward
    /// by full path comparison when more than one entry shares a hash.
    fn entry_index_by_path(&self, path: &str) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let hash = self.hash_path(path);
        let found = self.entries.binary_search_by_key(&hash, |e| e.file_name_hash).ok()?;

        if self.entries[found].collision_index == 1 {
            return Some(found);
        }

        let run_start = u32::try_from(found).ok()? + 1 - u32::from(self.entries[found].collision_index);
        let run_start = usize::try_from(run_start).ok()?;
        for idx in run_start..self.entries.len() {
            let entry = &self.entries[idx];
            if entry.file_name_hash != hash {
                return None;
            }
            if self.path_at(entry.name_offset_words) == Some(path) {
                return Some(idx);
            }
        }
        None
    }

    pub fn read(&self, path: &str) -> Option<&[u8]> {
        let idx = self.entry_index_by_path(path)?;
        let entry = &self.entries[idx];
        let start = self.file_region_offset + usize::try_from(entry.start).ok()?;
        let end = self.file_region_offset + usize::try_from(entry.end).ok()?;
        self.data.get(start..end)
    }

    pub fn file_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_archive(hash_seed: u32, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut names: Vec<String> = files.iter().map(|(n, _)| (*n).to_string()).collect();
        names.sort_by_key(|n| hash(hash_seed, n));

        let mut path_table = Vec::new();
        let mut name_offsets = Vec::new();
        for n in &names {
            name_offsets.push(u32::try_from(path_table.len() / 4).unwrap());
            path_table.extend_from_slice(n.as_bytes());
            path_table.push(0);
            while path_table.len() % 4 != 0 {
                path_table.push(0);
            }
        }

        let mut file_region = Vec::new();
        let mut ranges = Vec::new();
        for n in &names {
            let bytes = files.iter().find(|(name, _)| name == n).unwrap().1;
            let start = u32::try_from(file_region.len()).unwrap();
            file_region.extend_from_slice(bytes);
            ranges.push((start, u32::try_from(file_region.len()).unwrap()));
        }

        let sfat_off = SARC_HEADER_SIZE;
        let entries_off = sfat_off + SFAT_HEADER_SIZE;
        let entries_bytes = names.len() * SFAT_ENTRY_SIZE;
        let sfnt_off = entries_off + entries_bytes;
        let path_table_off = sfnt_off + SFNT_HEADER_SIZE;
        let file_array_offset = u32::try_from(path_table_off + path_table.len()).unwrap();

        let mut buf = Vec::new();
        buf.extend_from_slice(b"SARC");
        buf.extend_from_slice(&u16::try_from(SARC_HEADER_SIZE).unwrap().to_le_bytes());
        buf.extend_from_slice(&0xFEFFu16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // file_size, unused by the reader
        buf.extend_from_slice(&file_array_offset.to_le_bytes());
        buf.extend_from_slice(&TARGET_VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());

        buf.extend_from_slice(b"SFAT");
        buf.extend_from_slice(&u16::try_from(SFAT_HEADER_SIZE).unwrap().to_le_bytes());
        buf.extend_from_slice(&u16::try_from(names.len()).unwrap().to_le_bytes());
        buf.extend_from_slice(&hash_seed.to_le_bytes());

        for (i, n) in names.iter().enumerate() {
            let h = hash(hash_seed, n);
            buf.extend_from_slice(&h.to_le_bytes());
            buf.extend_from_slice(&name_offsets[i].to_le_bytes());
            buf.extend_from_slice(&ranges[i].0.to_le_bytes());
            buf.extend_from_slice(&ranges[i].1.to_le_bytes());
        }

        buf.extend_from_slice(b"SFNT");
        buf.extend_from_slice(&u16::try_from(SFNT_HEADER_SIZE).unwrap().to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&path_table);
        buf.extend_from_slice(&file_region);
        buf
    }

    fn hash(seed: u32, path: &str) -> u32 {
        let mut h: u32 = 0;
        for &b in path.as_bytes() {
            h = h.wrapping_mul(seed).wrapping_add(u32::from(b));
        }
        h
    }

    #[test]
    fn reads_back_files_by_path() {
        let data = build_archive(101, &[("a.txt", b"hello"), ("b.txt", b"world!"), ("c/d.txt", b"nested")]);
        let archive = Archive::parse(&data).unwrap();
        assert_eq!(archive.file_count(), 3);
        assert_eq!(archive.read("a.txt"), Some(&b"hello"[..]));
        assert_eq!(archive.read("b.txt"), Some(&b"world!"[..]));
        assert_eq!(archive.read("c/d.txt"), Some(&b"nested"[..]));
        assert_eq!(archive.read("missing"), None);
    }

    #[test]
    fn rejects_bad_magic() {
        assert_eq!(Archive::parse(b"not an archive at all!!").unwrap_err(), FormatError::BadMagic);
    }
}

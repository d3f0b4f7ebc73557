use std::fmt;

use xxhash_rust::xxh64::xxh64;

/// Width in hex characters of an archive path hash.
pub const PATH_HASH_HEX_LEN: usize = 16;
/// Width in hex characters of a document name hash.
pub const NAME_HASH_HEX_LEN: usize = 8;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// The two independent hash domains used by the game formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashDomain {
    /// Archive chunk paths: XXH64 of the lower-cased path.
    Archive,
    /// Document entry, type and field names: FNV-1a 32 of the lower-cased name.
    Document,
}

impl HashDomain {
    pub fn hex_len(self) -> usize {
        match self {
            HashDomain::Archive => PATH_HASH_HEX_LEN,
            HashDomain::Document => NAME_HASH_HEX_LEN,
        }
    }

    pub fn hash(self, name: &str) -> u64 {
        match self {
            HashDomain::Archive => path_hash(name),
            HashDomain::Document => u64::from(name_hash(name)),
        }
    }

    pub fn format(self, hash: u64) -> String {
        match self {
            HashDomain::Archive => format!("{:016x}", hash),
            HashDomain::Document => format!("{:08x}", hash as u32),
        }
    }

    pub fn parse(self, text: &str) -> Option<u64> {
        if text.len() != self.hex_len() || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u64::from_str_radix(text, 16).ok()
    }
}

impl fmt::Display for HashDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HashDomain::Archive => "archive",
            HashDomain::Document => "document",
        };
        write!(f, "{}", label)
    }
}

pub fn path_hash(path: &str) -> u64 {
    xxh64(path.to_ascii_lowercase().as_bytes(), 0)
}

pub fn name_hash(name: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in name.bytes() {
        hash ^= u32::from(byte.to_ascii_lowercase());
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub fn path_hash_hex(path: &str) -> String {
    HashDomain::Archive.format(path_hash(path))
}

/// True when `text` is exactly one archive-domain hash in hex form.
pub fn is_path_hash(text: &str) -> bool {
    HashDomain::Archive.parse(text).is_some()
}

#![forbid(unsafe_code)]

pub mod bin;
pub mod hash;
pub mod hashtable;
pub mod wad;
pub mod wad_extract;
pub mod wad_pack;

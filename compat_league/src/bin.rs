use std::fmt;
use std::fs;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

// PROP/PTCH property documents: entries of typed field trees plus links.

const PROP_MAGIC: &[u8; 4] = b"PROP";
const PTCH_MAGIC: &[u8; 4] = b"PTCH";
const MAX_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum BinError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid bin magic")]
    InvalidMagic,
    #[error("bin data truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("unknown bin type id {id:#04x} at offset {offset}")]
    UnknownType { id: u8, offset: usize },
    #[error("bin string at offset {offset} is not utf-8")]
    InvalidUtf8 { offset: usize },
    #[error("bin value nesting is too deep")]
    TooDeep,
    #[error("bin string too long to encode: {len} bytes")]
    StringTooLong { len: usize },
    #[error("bin {what} too large to encode")]
    TooLarge { what: &'static str },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinType {
    None,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    Vec2,
    Vec3,
    Vec4,
    Mtx44,
    Rgba,
    String,
    Hash,
    File,
    List,
    List2,
    Pointer,
    Embed,
    Link,
    Option,
    Map,
    Flag,
}

impl BinType {
    pub fn from_id(id: u8) -> Option<Self> {
        let kind = match id {
            0 => BinType::None,
            1 => BinType::Bool,
            2 => BinType::I8,
            3 => BinType::U8,
            4 => BinType::I16,
            5 => BinType::U16,
            6 => BinType::I32,
            7 => BinType::U32,
            8 => BinType::I64,
            9 => BinType::U64,
            10 => BinType::F32,
            11 => BinType::Vec2,
            12 => BinType::Vec3,
            13 => BinType::Vec4,
            14 => BinType::Mtx44,
            15 => BinType::Rgba,
            16 => BinType::String,
            17 => BinType::Hash,
            18 => BinType::File,
            0x80 => BinType::List,
            0x81 => BinType::List2,
            0x82 => BinType::Pointer,
            0x83 => BinType::Embed,
            0x84 => BinType::Link,
            0x85 => BinType::Option,
            0x86 => BinType::Map,
            0x87 => BinType::Flag,
            _ => return None,
        };
        Some(kind)
    }

    pub fn id(self) -> u8 {
        match self {
            BinType::None => 0,
            BinType::Bool => 1,
            BinType::I8 => 2,
            BinType::U8 => 3,
            BinType::I16 => 4,
            BinType::U16 => 5,
            BinType::I32 => 6,
            BinType::U32 => 7,
            BinType::I64 => 8,
            BinType::U64 => 9,
            BinType::F32 => 10,
            BinType::Vec2 => 11,
            BinType::Vec3 => 12,
            BinType::Vec4 => 13,
            BinType::Mtx44 => 14,
            BinType::Rgba => 15,
            BinType::String => 16,
            BinType::Hash => 17,
            BinType::File => 18,
            BinType::List => 0x80,
            BinType::List2 => 0x81,
            BinType::Pointer => 0x82,
            BinType::Embed => 0x83,
            BinType::Link => 0x84,
            BinType::Option => 0x85,
            BinType::Map => 0x86,
            BinType::Flag => 0x87,
        }
    }
}

impl fmt::Display for BinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Class hash plus fields of an embedded or pointed-to object.
#[derive(Clone, Debug, PartialEq)]
pub struct BinStruct {
    pub class_hash: u32,
    pub fields: Vec<BinField>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BinValue {
    None,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mtx44([f32; 16]),
    Rgba([u8; 4]),
    String(String),
    Hash(u32),
    File(u64),
    List {
        item_type: BinType,
        items: Vec<BinValue>,
    },
    List2 {
        item_type: BinType,
        items: Vec<BinValue>,
    },
    /// `None` is the null pointer (class hash 0).
    Pointer(Option<BinStruct>),
    Embed(Option<BinStruct>),
    Link(u32),
    Option {
        item_type: BinType,
        value: Option<Box<BinValue>>,
    },
    Map {
        key_type: BinType,
        value_type: BinType,
        entries: Vec<(BinValue, BinValue)>,
    },
    Flag(bool),
}

impl BinValue {
    pub fn bin_type(&self) -> BinType {
        match self {
            BinValue::None => BinType::None,
            BinValue::Bool(_) => BinType::Bool,
            BinValue::I8(_) => BinType::I8,
            BinValue::U8(_) => BinType::U8,
            BinValue::I16(_) => BinType::I16,
            BinValue::U16(_) => BinType::U16,
            BinValue::I32(_) => BinType::I32,
            BinValue::U32(_) => BinType::U32,
            BinValue::I64(_) => BinType::I64,
            BinValue::U64(_) => BinType::U64,
            BinValue::F32(_) => BinType::F32,
            BinValue::Vec2(_) => BinType::Vec2,
            BinValue::Vec3(_) => BinType::Vec3,
            BinValue::Vec4(_) => BinType::Vec4,
            BinValue::Mtx44(_) => BinType::Mtx44,
            BinValue::Rgba(_) => BinType::Rgba,
            BinValue::String(_) => BinType::String,
            BinValue::Hash(_) => BinType::Hash,
            BinValue::File(_) => BinType::File,
            BinValue::List { .. } => BinType::List,
            BinValue::List2 { .. } => BinType::List2,
            BinValue::Pointer(_) => BinType::Pointer,
            BinValue::Embed(_) => BinType::Embed,
            BinValue::Link(_) => BinType::Link,
            BinValue::Option { .. } => BinType::Option,
            BinValue::Map { .. } => BinType::Map,
            BinValue::Flag(_) => BinType::Flag,
        }
    }

    /// Calls `visit` for every string in this value, depth first.
    pub fn visit_strings<'a, F: FnMut(&'a str)>(&'a self, visit: &mut F) {
        match self {
            BinValue::String(text) => visit(text),
            BinValue::List { items, .. } | BinValue::List2 { items, .. } => {
                for item in items {
                    item.visit_strings(visit);
                }
            }
            BinValue::Pointer(Some(object)) | BinValue::Embed(Some(object)) => {
                for field in &object.fields {
                    field.value.visit_strings(visit);
                }
            }
            BinValue::Option {
                value: Some(inner), ..
            } => inner.visit_strings(visit),
            BinValue::Map { entries, .. } => {
                for (key, value) in entries {
                    key.visit_strings(visit);
                    value.visit_strings(visit);
                }
            }
            _ => {}
        }
    }

    /// Mutable counterpart of [`BinValue::visit_strings`].
    pub fn visit_strings_mut<F: FnMut(&mut String)>(&mut self, visit: &mut F) {
        match self {
            BinValue::String(text) => visit(text),
            BinValue::List { items, .. } | BinValue::List2 { items, .. } => {
                for item in items {
                    item.visit_strings_mut(visit);
                }
            }
            BinValue::Pointer(Some(object)) | BinValue::Embed(Some(object)) => {
                for field in &mut object.fields {
                    field.value.visit_strings_mut(visit);
                }
            }
            BinValue::Option {
                value: Some(inner), ..
            } => inner.visit_strings_mut(visit),
            BinValue::Map { entries, .. } => {
                for (key, value) in entries {
                    key.visit_strings_mut(visit);
                    value.visit_strings_mut(visit);
                }
            }
            _ => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinField {
    pub name_hash: u32,
    pub value: BinValue,
}

impl BinField {
    pub fn new(name_hash: u32, value: BinValue) -> Self {
        Self { name_hash, value }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinEntry {
    pub type_hash: u32,
    pub hash: u32,
    pub fields: Vec<BinField>,
}

impl BinEntry {
    pub fn visit_strings<'a, F: FnMut(&'a str)>(&'a self, visit: &mut F) {
        for field in &self.fields {
            field.value.visit_strings(visit);
        }
    }

    pub fn visit_strings_mut<F: FnMut(&mut String)>(&mut self, visit: &mut F) {
        for field in &mut self.fields {
            field.value.visit_strings_mut(visit);
        }
    }

    pub fn field(&self, name_hash: u32) -> Option<&BinField> {
        self.fields.iter().find(|field| field.name_hash == name_hash)
    }
}

/// Trailing override record of a `PTCH` document.
#[derive(Clone, Debug, PartialEq)]
pub struct BinPatch {
    pub hash: u32,
    pub path: String,
    pub value: BinValue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinDocument {
    pub version: u32,
    /// The 8 bytes after `PTCH` when the document is a patch.
    pub patch_header: Option<u64>,
    pub links: Vec<String>,
    pub entries: Vec<BinEntry>,
    pub patches: Vec<BinPatch>,
}

impl Default for BinDocument {
    fn default() -> Self {
        Self {
            version: 3,
            patch_header: None,
            links: Vec::new(),
            entries: Vec::new(),
            patches: Vec::new(),
        }
    }
}

impl BinDocument {
    pub fn is_patch(&self) -> bool {
        self.patch_header.is_some()
    }

    pub fn entry(&self, hash: u32) -> Option<&BinEntry> {
        self.entries.iter().find(|entry| entry.hash == hash)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BinError> {
        let mut out = Vec::new();
        if let Some(header) = self.patch_header {
            out.extend_from_slice(PTCH_MAGIC);
            out.extend_from_slice(&header.to_le_bytes());
        }
        out.extend_from_slice(PROP_MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());

        if self.version >= 2 {
            write_count(&mut out, self.links.len(), "link count")?;
            for link in &self.links {
                write_string(&mut out, link)?;
            }
        }

        write_count(&mut out, self.entries.len(), "entry count")?;
        for entry in &self.entries {
            out.extend_from_slice(&entry.type_hash.to_le_bytes());
        }
        for entry in &self.entries {
            let size_at = begin_size(&mut out);
            out.extend_from_slice(&entry.hash.to_le_bytes());
            write_fields(&mut out, &entry.fields)?;
            end_size(&mut out, size_at)?;
        }

        if self.is_patch() && self.version >= 3 {
            write_count(&mut out, self.patches.len(), "patch count")?;
            for patch in &self.patches {
                out.extend_from_slice(&patch.hash.to_le_bytes());
                let size_at = begin_size(&mut out);
                out.push(patch.value.bin_type().id());
                write_string(&mut out, &patch.path)?;
                write_value(&mut out, &patch.value)?;
                end_size(&mut out, size_at)?;
            }
        }
        Ok(out)
    }
}

pub fn read_bin(path: &Path) -> Result<BinDocument, BinError> {
    let data = fs::read(path)?;
    parse_bin(&data)
}

pub fn write_bin(document: &BinDocument, path: &Path) -> Result<(), BinError> {
    let bytes = document.to_bytes()?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn parse_bin(data: &[u8]) -> Result<BinDocument, BinError> {
    let mut reader = ByteReader::new(data);
    let mut magic = reader.take(4)?;
    let mut patch_header = None;
    if magic == PTCH_MAGIC {
        patch_header = Some(reader.u64()?);
        magic = reader.take(4)?;
    }
    if magic != PROP_MAGIC {
        return Err(BinError::InvalidMagic);
    }
    let version = reader.u32()?;

    let mut links = Vec::new();
    if version >= 2 {
        let count = reader.u32()? as usize;
        links.reserve(count.min(reader.remaining()));
        for _ in 0..count {
            links.push(reader.string()?);
        }
    }

    let entry_count = reader.u32()? as usize;
    let mut type_hashes = Vec::with_capacity(entry_count.min(reader.remaining() / 4));
    for _ in 0..entry_count {
        type_hashes.push(reader.u32()?);
    }
    let mut entries = Vec::with_capacity(type_hashes.len());
    for type_hash in type_hashes {
        let _entry_len = reader.u32()?;
        let hash = reader.u32()?;
        let field_count = reader.u16()? as usize;
        let fields = read_fields(&mut reader, field_count, 0)?;
        entries.push(BinEntry {
            type_hash,
            hash,
            fields,
        });
    }

    let mut patches = Vec::new();
    if patch_header.is_some() && version >= 3 {
        let count = reader.u32()? as usize;
        for _ in 0..count {
            let hash = reader.u32()?;
            let _size = reader.u32()?;
            let kind = reader.bin_type()?;
            let path = reader.string()?;
            let value = read_value(&mut reader, kind, 0)?;
            patches.push(BinPatch { hash, path, value });
        }
    }

    Ok(BinDocument {
        version,
        patch_header,
        links,
        entries,
        patches,
    })
}

fn read_fields(
    reader: &mut ByteReader<'_>,
    count: usize,
    depth: usize,
) -> Result<Vec<BinField>, BinError> {
    let mut fields = Vec::with_capacity(count.min(reader.remaining() / 5));
    for _ in 0..count {
        let name_hash = reader.u32()?;
        let kind = reader.bin_type()?;
        let value = read_value(reader, kind, depth)?;
        fields.push(BinField { name_hash, value });
    }
    Ok(fields)
}

fn read_struct(
    reader: &mut ByteReader<'_>,
    depth: usize,
) -> Result<Option<BinStruct>, BinError> {
    let class_hash = reader.u32()?;
    if class_hash == 0 {
        return Ok(None);
    }
    let _size = reader.u32()?;
    let count = reader.u16()? as usize;
    let fields = read_fields(reader, count, depth + 1)?;
    Ok(Some(BinStruct { class_hash, fields }))
}

fn read_value(
    reader: &mut ByteReader<'_>,
    kind: BinType,
    depth: usize,
) -> Result<BinValue, BinError> {
    if depth > MAX_DEPTH {
        return Err(BinError::TooDeep);
    }
    let value = match kind {
        BinType::None => BinValue::None,
        BinType::Bool => BinValue::Bool(reader.u8()? != 0),
        BinType::I8 => BinValue::I8(reader.u8()? as i8),
        BinType::U8 => BinValue::U8(reader.u8()?),
        BinType::I16 => BinValue::I16(reader.u16()? as i16),
        BinType::U16 => BinValue::U16(reader.u16()?),
        BinType::I32 => BinValue::I32(reader.u32()? as i32),
        BinType::U32 => BinValue::U32(reader.u32()?),
        BinType::I64 => BinValue::I64(reader.u64()? as i64),
        BinType::U64 => BinValue::U64(reader.u64()?),
        BinType::F32 => BinValue::F32(reader.f32()?),
        BinType::Vec2 => BinValue::Vec2(reader.f32_array()?),
        BinType::Vec3 => BinValue::Vec3(reader.f32_array()?),
        BinType::Vec4 => BinValue::Vec4(reader.f32_array()?),
        BinType::Mtx44 => BinValue::Mtx44(reader.f32_array()?),
        BinType::Rgba => {
            let bytes = reader.take(4)?;
            BinValue::Rgba([bytes[0], bytes[1], bytes[2], bytes[3]])
        }
        BinType::String => BinValue::String(reader.string()?),
        BinType::Hash => BinValue::Hash(reader.u32()?),
        BinType::File => BinValue::File(reader.u64()?),
        BinType::List | BinType::List2 => {
            let item_type = reader.bin_type()?;
            let _size = reader.u32()?;
            let count = reader.u32()? as usize;
            let mut items = Vec::with_capacity(count.min(reader.remaining()));
            for _ in 0..count {
                items.push(read_value(reader, item_type, depth + 1)?);
            }
            if kind == BinType::List {
                BinValue::List { item_type, items }
            } else {
                BinValue::List2 { item_type, items }
            }
        }
        BinType::Pointer => BinValue::Pointer(read_struct(reader, depth)?),
        BinType::Embed => BinValue::Embed(read_struct(reader, depth)?),
        BinType::Link => BinValue::Link(reader.u32()?),
        BinType::Option => {
            let item_type = reader.bin_type()?;
            let count = reader.u8()?;
            let value = if count == 0 {
                None
            } else {
                Some(Box::new(read_value(reader, item_type, depth + 1)?))
            };
            BinValue::Option { item_type, value }
        }
        BinType::Map => {
            let key_type = reader.bin_type()?;
            let value_type = reader.bin_type()?;
            let _size = reader.u32()?;
            let count = reader.u32()? as usize;
            let mut entries = Vec::with_capacity(count.min(reader.remaining()));
            for _ in 0..count {
                let key = read_value(reader, key_type, depth + 1)?;
                let value = read_value(reader, value_type, depth + 1)?;
                entries.push((key, value));
            }
            BinValue::Map {
                key_type,
                value_type,
                entries,
            }
        }
        BinType::Flag => BinValue::Flag(reader.u8()? != 0),
    };
    Ok(value)
}

fn write_fields(out: &mut Vec<u8>, fields: &[BinField]) -> Result<(), BinError> {
    let count = u16::try_from(fields.len()).map_err(|_| BinError::TooLarge {
        what: "field count",
    })?;
    out.extend_from_slice(&count.to_le_bytes());
    for field in fields {
        out.extend_from_slice(&field.name_hash.to_le_bytes());
        out.push(field.value.bin_type().id());
        write_value(out, &field.value)?;
    }
    Ok(())
}

fn write_struct(out: &mut Vec<u8>, object: &Option<BinStruct>) -> Result<(), BinError> {
    match object {
        None => out.extend_from_slice(&0u32.to_le_bytes()),
        Some(object) => {
            out.extend_from_slice(&object.class_hash.to_le_bytes());
            let size_at = begin_size(out);
            write_fields(out, &object.fields)?;
            end_size(out, size_at)?;
        }
    }
    Ok(())
}

fn write_value(out: &mut Vec<u8>, value: &BinValue) -> Result<(), BinError> {
    match value {
        BinValue::None => {}
        BinValue::Bool(flag) | BinValue::Flag(flag) => out.push(u8::from(*flag)),
        BinValue::I8(v) => out.push(*v as u8),
        BinValue::U8(v) => out.push(*v),
        BinValue::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
        BinValue::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
        BinValue::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
        BinValue::U32(v) | BinValue::Hash(v) | BinValue::Link(v) => {
            out.extend_from_slice(&v.to_le_bytes())
        }
        BinValue::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
        BinValue::U64(v) | BinValue::File(v) => out.extend_from_slice(&v.to_le_bytes()),
        BinValue::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
        BinValue::Vec2(v) => write_f32s(out, v),
        BinValue::Vec3(v) => write_f32s(out, v),
        BinValue::Vec4(v) => write_f32s(out, v),
        BinValue::Mtx44(v) => write_f32s(out, v),
        BinValue::Rgba(v) => out.extend_from_slice(v),
        BinValue::String(text) => write_string(out, text)?,
        BinValue::List { item_type, items } | BinValue::List2 { item_type, items } => {
            out.push(item_type.id());
            let size_at = begin_size(out);
            write_count(out, items.len(), "list length")?;
            for item in items {
                write_value(out, item)?;
            }
            end_size(out, size_at)?;
        }
        BinValue::Pointer(object) | BinValue::Embed(object) => write_struct(out, object)?,
        BinValue::Option { item_type, value } => {
            out.push(item_type.id());
            match value {
                Some(inner) => {
                    out.push(1);
                    write_value(out, inner)?;
                }
                None => out.push(0),
            }
        }
        BinValue::Map {
            key_type,
            value_type,
            entries,
        } => {
            out.push(key_type.id());
            out.push(value_type.id());
            let size_at = begin_size(out);
            write_count(out, entries.len(), "map length")?;
            for (key, value) in entries {
                write_value(out, key)?;
                write_value(out, value)?;
            }
            end_size(out, size_at)?;
        }
    }
    Ok(())
}

fn write_f32s(out: &mut Vec<u8>, values: &[f32]) {
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn write_string(out: &mut Vec<u8>, text: &str) -> Result<(), BinError> {
    let len = u16::try_from(text.len()).map_err(|_| BinError::StringTooLong { len: text.len() })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    Ok(())
}

fn write_count(out: &mut Vec<u8>, count: usize, what: &'static str) -> Result<(), BinError> {
    let count = u32::try_from(count).map_err(|_| BinError::TooLarge { what })?;
    out.extend_from_slice(&count.to_le_bytes());
    Ok(())
}

fn begin_size(out: &mut Vec<u8>) -> usize {
    let at = out.len();
    out.extend_from_slice(&[0u8; 4]);
    at
}

fn end_size(out: &mut [u8], size_at: usize) -> Result<(), BinError> {
    let size = out.len() - size_at - 4;
    let size = u32::try_from(size).map_err(|_| BinError::TooLarge { what: "block size" })?;
    out[size_at..size_at + 4].copy_from_slice(&size.to_le_bytes());
    Ok(())
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], BinError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(BinError::Truncated { offset: self.pos })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, BinError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, BinError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, BinError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64, BinError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn f32(&mut self) -> Result<f32, BinError> {
        Ok(f32::from_bits(self.u32()?))
    }

    fn f32_array<const N: usize>(&mut self) -> Result<[f32; N], BinError> {
        let mut out = [0f32; N];
        for slot in &mut out {
            *slot = self.f32()?;
        }
        Ok(out)
    }

    fn bin_type(&mut self) -> Result<BinType, BinError> {
        let offset = self.pos;
        let id = self.u8()?;
        BinType::from_id(id).ok_or(BinError::UnknownType { id, offset })
    }

    fn string(&mut self) -> Result<String, BinError> {
        let len = self.u16()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| BinError::InvalidUtf8 { offset })
    }
}

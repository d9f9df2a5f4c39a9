//! File attributes (RFC 7530 section 5).
//!
//! On the wire a `fattr4` is a bitmap of attribute numbers followed by an
//! opaque blob holding the values of the set bits in ascending attribute
//! order. Here the blob is decoded eagerly into a list of tagged
//! [AttrValue]s, and encoding sorts the values so the bitmap and the blob
//! always agree.

use std::io::{Cursor, Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;
use smallvec::SmallVec;

use super::*;

/// Largest bitmap accepted from the server, in 32-bit words.
const MAX_BITMAP_WORDS: usize = 8;

/// Attribute numbers understood by this client.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum Attribute {
    SupportedAttrs = 0,
    Type = 1,
    FhExpireType = 2,
    Change = 3,
    Size = 4,
    LinkSupport = 5,
    SymlinkSupport = 6,
    NamedAttr = 7,
    Fsid = 8,
    UniqueHandles = 9,
    LeaseTime = 10,
    RdattrError = 11,
    FileHandle = 19,
    FileId = 20,
    MaxName = 29,
    MaxRead = 30,
    MaxWrite = 31,
    Mode = 33,
    NumLinks = 35,
    Owner = 36,
    OwnerGroup = 37,
    SpaceUsed = 45,
    TimeAccess = 47,
    TimeAccessSet = 48,
    TimeMetadata = 52,
    TimeModify = 53,
    TimeModifySet = 54,
    MountedOnFileId = 55,
}

impl Attribute {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// `fh_expire_type` bits.
pub const FH4_PERSISTENT: u32 = 0x0000_0000;
pub const FH4_NOEXPIRE_WITH_OPEN: u32 = 0x0000_0001;
pub const FH4_VOLATILE_ANY: u32 = 0x0000_0002;
pub const FH4_VOL_MIGRATION: u32 = 0x0000_0004;
pub const FH4_VOL_RENAME: u32 = 0x0000_0008;

/// Attribute bitmap (`bitmap4`): bit `n` of word `n / 32` marks attribute `n`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bitmap(pub SmallVec<[u32; 2]>);

impl Bitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_codes(codes: impl IntoIterator<Item = u32>) -> Self {
        let mut bitmap = Self::new();
        for code in codes {
            bitmap.insert(code);
        }
        bitmap
    }

    pub fn from_attrs(attrs: &[Attribute]) -> Self {
        Self::from_codes(attrs.iter().map(|a| a.code()))
    }

    pub fn insert(&mut self, code: u32) {
        let word = (code / 32) as usize;
        if self.0.len() <= word {
            self.0.resize(word + 1, 0);
        }
        self.0[word] |= 1 << (code % 32);
    }

    pub fn contains_code(&self, code: u32) -> bool {
        self.0.get((code / 32) as usize).is_some_and(|word| word & (1 << (code % 32)) != 0)
    }

    pub fn contains(&self, attr: Attribute) -> bool {
        self.contains_code(attr.code())
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|word| *word == 0)
    }

    /// Set attribute numbers in ascending order.
    pub fn codes(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().enumerate().flat_map(|(i, word)| {
            (0..32).filter(move |bit| word & (1 << bit) != 0).map(move |bit| i as u32 * 32 + bit)
        })
    }

    /// Keeps only the attributes also present in `other`.
    pub fn intersect(&self, other: &Bitmap) -> Bitmap {
        Bitmap(self.0.iter().zip(other.0.iter()).map(|(a, b)| a & b).collect())
    }

    /// Word count without trailing zero words.
    fn significant_words(&self) -> usize {
        self.0.iter().rposition(|word| *word != 0).map_or(0, |i| i + 1)
    }
}

impl Serialize for Bitmap {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.0[..self.significant_words()].serialize(dest)
    }
}

impl Deserialize for Bitmap {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let words = read_length(&mut *src, MAX_BITMAP_WORDS)?;
        self.0.clear();
        for _ in 0..words {
            self.0.push(deserialize::<u32>(src)?);
        }
        Ok(())
    }
}

/// One decoded attribute value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrValue {
    SupportedAttrs(Bitmap),
    Type(nfs_ftype4),
    FhExpireType(u32),
    Change(changeid4),
    Size(u64),
    LinkSupport(bool),
    SymlinkSupport(bool),
    NamedAttr(bool),
    Fsid(fsid4),
    UniqueHandles(bool),
    LeaseTime(u32),
    RdattrError(nfsstat4),
    FileHandle(nfs_fh4),
    FileId(u64),
    MaxName(u32),
    MaxRead(u64),
    MaxWrite(u64),
    Mode(u32),
    NumLinks(u32),
    Owner(String),
    OwnerGroup(String),
    SpaceUsed(u64),
    TimeAccess(nfstime4),
    TimeAccessSet(settime4),
    TimeMetadata(nfstime4),
    TimeModify(nfstime4),
    TimeModifySet(settime4),
    MountedOnFileId(u64),
}

impl AttrValue {
    pub fn attribute(&self) -> Attribute {
        match self {
            AttrValue::SupportedAttrs(_) => Attribute::SupportedAttrs,
            AttrValue::Type(_) => Attribute::Type,
            AttrValue::FhExpireType(_) => Attribute::FhExpireType,
            AttrValue::Change(_) => Attribute::Change,
            AttrValue::Size(_) => Attribute::Size,
            AttrValue::LinkSupport(_) => Attribute::LinkSupport,
            AttrValue::SymlinkSupport(_) => Attribute::SymlinkSupport,
            AttrValue::NamedAttr(_) => Attribute::NamedAttr,
            AttrValue::Fsid(_) => Attribute::Fsid,
            AttrValue::UniqueHandles(_) => Attribute::UniqueHandles,
            AttrValue::LeaseTime(_) => Attribute::LeaseTime,
            AttrValue::RdattrError(_) => Attribute::RdattrError,
            AttrValue::FileHandle(_) => Attribute::FileHandle,
            AttrValue::FileId(_) => Attribute::FileId,
            AttrValue::MaxName(_) => Attribute::MaxName,
            AttrValue::MaxRead(_) => Attribute::MaxRead,
            AttrValue::MaxWrite(_) => Attribute::MaxWrite,
            AttrValue::Mode(_) => Attribute::Mode,
            AttrValue::NumLinks(_) => Attribute::NumLinks,
            AttrValue::Owner(_) => Attribute::Owner,
            AttrValue::OwnerGroup(_) => Attribute::OwnerGroup,
            AttrValue::SpaceUsed(_) => Attribute::SpaceUsed,
            AttrValue::TimeAccess(_) => Attribute::TimeAccess,
            AttrValue::TimeAccessSet(_) => Attribute::TimeAccessSet,
            AttrValue::TimeMetadata(_) => Attribute::TimeMetadata,
            AttrValue::TimeModify(_) => Attribute::TimeModify,
            AttrValue::TimeModifySet(_) => Attribute::TimeModifySet,
            AttrValue::MountedOnFileId(_) => Attribute::MountedOnFileId,
        }
    }

    fn decode<R: Read>(attr: Attribute, src: &mut R) -> std::io::Result<AttrValue> {
        Ok(match attr {
            Attribute::SupportedAttrs => AttrValue::SupportedAttrs(deserialize(src)?),
            Attribute::Type => AttrValue::Type(deserialize(src)?),
            Attribute::FhExpireType => AttrValue::FhExpireType(deserialize(src)?),
            Attribute::Change => AttrValue::Change(deserialize(src)?),
            Attribute::Size => AttrValue::Size(deserialize(src)?),
            Attribute::LinkSupport => AttrValue::LinkSupport(deserialize(src)?),
            Attribute::SymlinkSupport => AttrValue::SymlinkSupport(deserialize(src)?),
            Attribute::NamedAttr => AttrValue::NamedAttr(deserialize(src)?),
            Attribute::Fsid => AttrValue::Fsid(deserialize(src)?),
            Attribute::UniqueHandles => AttrValue::UniqueHandles(deserialize(src)?),
            Attribute::LeaseTime => AttrValue::LeaseTime(deserialize(src)?),
            Attribute::RdattrError => AttrValue::RdattrError(deserialize(src)?),
            Attribute::FileHandle => AttrValue::FileHandle(deserialize(src)?),
            Attribute::FileId => AttrValue::FileId(deserialize(src)?),
            Attribute::MaxName => AttrValue::MaxName(deserialize(src)?),
            Attribute::MaxRead => AttrValue::MaxRead(deserialize(src)?),
            Attribute::MaxWrite => AttrValue::MaxWrite(deserialize(src)?),
            Attribute::Mode => AttrValue::Mode(deserialize(src)?),
            Attribute::NumLinks => AttrValue::NumLinks(deserialize(src)?),
            Attribute::Owner => AttrValue::Owner(deserialize(src)?),
            Attribute::OwnerGroup => AttrValue::OwnerGroup(deserialize(src)?),
            Attribute::SpaceUsed => AttrValue::SpaceUsed(deserialize(src)?),
            Attribute::TimeAccess => AttrValue::TimeAccess(deserialize(src)?),
            Attribute::TimeAccessSet => AttrValue::TimeAccessSet(deserialize(src)?),
            Attribute::TimeMetadata => AttrValue::TimeMetadata(deserialize(src)?),
            Attribute::TimeModify => AttrValue::TimeModify(deserialize(src)?),
            Attribute::TimeModifySet => AttrValue::TimeModifySet(deserialize(src)?),
            Attribute::MountedOnFileId => AttrValue::MountedOnFileId(deserialize(src)?),
        })
    }

    fn encode<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            AttrValue::SupportedAttrs(v) => v.serialize(dest),
            AttrValue::Type(v) => v.serialize(dest),
            AttrValue::FhExpireType(v)
            | AttrValue::LeaseTime(v)
            | AttrValue::MaxName(v)
            | AttrValue::Mode(v)
            | AttrValue::NumLinks(v) => v.serialize(dest),
            AttrValue::Change(v)
            | AttrValue::Size(v)
            | AttrValue::FileId(v)
            | AttrValue::MaxRead(v)
            | AttrValue::MaxWrite(v)
            | AttrValue::SpaceUsed(v)
            | AttrValue::MountedOnFileId(v) => v.serialize(dest),
            AttrValue::LinkSupport(v)
            | AttrValue::SymlinkSupport(v)
            | AttrValue::NamedAttr(v)
            | AttrValue::UniqueHandles(v) => v.serialize(dest),
            AttrValue::Fsid(v) => v.serialize(dest),
            AttrValue::RdattrError(v) => v.serialize(dest),
            AttrValue::FileHandle(v) => v.serialize(dest),
            AttrValue::Owner(v) | AttrValue::OwnerGroup(v) => v.serialize(dest),
            AttrValue::TimeAccess(v) | AttrValue::TimeMetadata(v) | AttrValue::TimeModify(v) => {
                v.serialize(dest)
            }
            AttrValue::TimeAccessSet(v) | AttrValue::TimeModifySet(v) => v.serialize(dest),
        }
    }
}

/// Attribute set as carried by GETATTR, READDIR, SETATTR, VERIFY, CREATE and OPEN.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct fattr4 {
    pub values: Vec<AttrValue>,
}

impl fattr4 {
    pub fn new(mut values: Vec<AttrValue>) -> Self {
        values.sort_by_key(|v| v.attribute());
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn bitmap(&self) -> Bitmap {
        Bitmap::from_codes(self.values.iter().map(|v| v.attribute().code()))
    }

    pub fn get(&self, attr: Attribute) -> Option<&AttrValue> {
        self.values.iter().find(|v| v.attribute() == attr)
    }

    pub fn file_type(&self) -> Option<nfs_ftype4> {
        self.values.iter().find_map(|v| match v {
            AttrValue::Type(t) => Some(*t),
            _ => None,
        })
    }

    pub fn file_id(&self) -> Option<u64> {
        self.values.iter().find_map(|v| match v {
            AttrValue::FileId(id) => Some(*id),
            _ => None,
        })
    }

    pub fn fsid(&self) -> Option<fsid4> {
        self.values.iter().find_map(|v| match v {
            AttrValue::Fsid(fsid) => Some(*fsid),
            _ => None,
        })
    }

    pub fn change(&self) -> Option<changeid4> {
        self.values.iter().find_map(|v| match v {
            AttrValue::Change(change) => Some(*change),
            _ => None,
        })
    }

    pub fn size(&self) -> Option<u64> {
        self.values.iter().find_map(|v| match v {
            AttrValue::Size(size) => Some(*size),
            _ => None,
        })
    }
}

impl Serialize for fattr4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        let mut sorted: Vec<&AttrValue> = self.values.iter().collect();
        sorted.sort_by_key(|v| v.attribute());
        if sorted.windows(2).any(|w| w[0].attribute() == w[1].attribute()) {
            return Err(invalid_data("duplicate attribute in fattr4"));
        }

        let mut blob = Vec::new();
        for value in &sorted {
            value.encode(&mut blob)?;
        }
        Bitmap::from_codes(sorted.iter().map(|v| v.attribute().code())).serialize(dest)?;
        blob.serialize(dest)
    }
}

impl Deserialize for fattr4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let bitmap = deserialize::<Bitmap>(src)?;
        let blob = deserialize::<Vec<u8>>(src)?;
        let mut cursor = Cursor::new(blob.as_slice());

        self.values.clear();
        for code in bitmap.codes() {
            let Some(attr) = Attribute::from_u32(code) else {
                // Values are not self-delimiting, so nothing after an unknown attribute is readable.
                return Err(invalid_data(&format!("unsupported attribute {code} in fattr4")));
            };
            self.values.push(AttrValue::decode(attr, &mut cursor)?);
        }
        Ok(())
    }
}

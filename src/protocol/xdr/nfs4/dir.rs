//! Arguments and results of namespace operations: LOOKUP, READDIR,
//! READLINK, CREATE, REMOVE, RENAME, LINK, and the filehandle operations
//! (PUTFH, GETFH, GETATTR, VERIFY).

use std::io::{Read, Write};

use super::*;

/// Cookie value that starts a READDIR from the beginning.
pub const READDIR_START_COOKIE: nfs_cookie4 = 0;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PUTFH4args {
    pub object: nfs_fh4,
}
SerializeStruct!(PUTFH4args, object);
DeserializeStruct!(PUTFH4args, object);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GETFH4resok {
    pub object: nfs_fh4,
}
SerializeStruct!(GETFH4resok, object);
DeserializeStruct!(GETFH4resok, object);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GETATTR4args {
    pub attr_request: Bitmap,
}
SerializeStruct!(GETATTR4args, attr_request);
DeserializeStruct!(GETATTR4args, attr_request);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GETATTR4resok {
    pub obj_attributes: fattr4,
}
SerializeStruct!(GETATTR4resok, obj_attributes);
DeserializeStruct!(GETATTR4resok, obj_attributes);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VERIFY4args {
    pub obj_attributes: fattr4,
}
SerializeStruct!(VERIFY4args, obj_attributes);
DeserializeStruct!(VERIFY4args, obj_attributes);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LOOKUP4args {
    pub objname: String,
}
SerializeStruct!(LOOKUP4args, objname);
DeserializeStruct!(LOOKUP4args, objname);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READDIR4args {
    pub cookie: nfs_cookie4,
    pub cookieverf: verifier4,
    /// Bound on the size of names and cookies in the reply.
    pub dircount: count4,
    /// Bound on the size of the whole reply.
    pub maxcount: count4,
    pub attr_request: Bitmap,
}
SerializeStruct!(READDIR4args, cookie, cookieverf, dircount, maxcount, attr_request);
DeserializeStruct!(READDIR4args, cookie, cookieverf, dircount, maxcount, attr_request);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct entry4 {
    pub cookie: nfs_cookie4,
    pub name: String,
    pub attrs: fattr4,
}
SerializeStruct!(entry4, cookie, name, attrs);
DeserializeStruct!(entry4, cookie, name, attrs);

/// Directory listing chunk. On the wire the entries form a linked list in
/// which every element is preceded by a "value follows" boolean.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct dirlist4 {
    pub entries: Vec<entry4>,
    pub eof: bool,
}

impl Serialize for dirlist4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        for entry in &self.entries {
            true.serialize(dest)?;
            entry.serialize(dest)?;
        }
        false.serialize(dest)?;
        self.eof.serialize(dest)
    }
}

impl Deserialize for dirlist4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.entries.clear();
        while deserialize::<bool>(src)? {
            self.entries.push(deserialize(src)?);
        }
        self.eof.deserialize(src)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READDIR4resok {
    pub cookieverf: verifier4,
    pub reply: dirlist4,
}
SerializeStruct!(READDIR4resok, cookieverf, reply);
DeserializeStruct!(READDIR4resok, cookieverf, reply);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READLINK4resok {
    pub link: String,
}
SerializeStruct!(READLINK4resok, link);
DeserializeStruct!(READLINK4resok, link);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct specdata4 {
    pub specdata1: u32,
    pub specdata2: u32,
}
SerializeStruct!(specdata4, specdata1, specdata2);
DeserializeStruct!(specdata4, specdata1, specdata2);

/// Object type for CREATE; regular files are created with OPEN instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum createtype4 {
    NF4LNK(String),
    NF4BLK(specdata4),
    NF4CHR(specdata4),
    NF4SOCK,
    NF4FIFO,
    NF4DIR,
}

impl Default for createtype4 {
    fn default() -> Self {
        createtype4::NF4DIR
    }
}

impl createtype4 {
    pub fn file_type(&self) -> nfs_ftype4 {
        match self {
            createtype4::NF4LNK(_) => nfs_ftype4::NF4LNK,
            createtype4::NF4BLK(_) => nfs_ftype4::NF4BLK,
            createtype4::NF4CHR(_) => nfs_ftype4::NF4CHR,
            createtype4::NF4SOCK => nfs_ftype4::NF4SOCK,
            createtype4::NF4FIFO => nfs_ftype4::NF4FIFO,
            createtype4::NF4DIR => nfs_ftype4::NF4DIR,
        }
    }
}

impl Serialize for createtype4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.file_type().serialize(dest)?;
        match self {
            createtype4::NF4LNK(linkdata) => linkdata.serialize(dest),
            createtype4::NF4BLK(dev) | createtype4::NF4CHR(dev) => dev.serialize(dest),
            createtype4::NF4SOCK | createtype4::NF4FIFO | createtype4::NF4DIR => Ok(()),
        }
    }
}

impl Deserialize for createtype4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match deserialize::<nfs_ftype4>(src)? {
            nfs_ftype4::NF4LNK => createtype4::NF4LNK(deserialize(src)?),
            nfs_ftype4::NF4BLK => createtype4::NF4BLK(deserialize(src)?),
            nfs_ftype4::NF4CHR => createtype4::NF4CHR(deserialize(src)?),
            nfs_ftype4::NF4SOCK => createtype4::NF4SOCK,
            nfs_ftype4::NF4FIFO => createtype4::NF4FIFO,
            nfs_ftype4::NF4DIR => createtype4::NF4DIR,
            other => return Err(invalid_data(&format!("CREATE cannot make {other:?}"))),
        };
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CREATE4args {
    pub objtype: createtype4,
    pub objname: String,
    pub createattrs: fattr4,
}
SerializeStruct!(CREATE4args, objtype, objname, createattrs);
DeserializeStruct!(CREATE4args, objtype, objname, createattrs);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CREATE4resok {
    pub cinfo: change_info4,
    pub attrset: Bitmap,
}
SerializeStruct!(CREATE4resok, cinfo, attrset);
DeserializeStruct!(CREATE4resok, cinfo, attrset);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct REMOVE4args {
    pub target: String,
}
SerializeStruct!(REMOVE4args, target);
DeserializeStruct!(REMOVE4args, target);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RENAME4args {
    pub oldname: String,
    pub newname: String,
}
SerializeStruct!(RENAME4args, oldname, newname);
DeserializeStruct!(RENAME4args, oldname, newname);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RENAME4resok {
    pub source_cinfo: change_info4,
    pub target_cinfo: change_info4,
}
SerializeStruct!(RENAME4resok, source_cinfo, target_cinfo);
DeserializeStruct!(RENAME4resok, source_cinfo, target_cinfo);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LINK4args {
    pub newname: String,
}
SerializeStruct!(LINK4args, newname);
DeserializeStruct!(LINK4args, newname);

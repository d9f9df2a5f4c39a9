//! Arguments and results of the operations that work on an open file:
//! OPEN, OPEN_CONFIRM, CLOSE, READ, WRITE, COMMIT, ACCESS, SETATTR and the
//! byte-range lock family (LOCK, LOCKT, LOCKU, RELEASE_LOCKOWNER).

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::*;

pub const OPEN4_SHARE_ACCESS_READ: u32 = 0x0000_0001;
pub const OPEN4_SHARE_ACCESS_WRITE: u32 = 0x0000_0002;
pub const OPEN4_SHARE_ACCESS_BOTH: u32 = 0x0000_0003;
pub const OPEN4_SHARE_DENY_NONE: u32 = 0x0000_0000;

/// OPEN result flag: the open owner must be confirmed with OPEN_CONFIRM.
pub const OPEN4_RESULT_CONFIRM: u32 = 0x0000_0002;
pub const OPEN4_RESULT_LOCKTYPE_POSIX: u32 = 0x0000_0004;

pub const ACCESS4_READ: u32 = 0x0000_0001;
pub const ACCESS4_LOOKUP: u32 = 0x0000_0002;
pub const ACCESS4_MODIFY: u32 = 0x0000_0004;
pub const ACCESS4_EXTEND: u32 = 0x0000_0008;
pub const ACCESS4_DELETE: u32 = 0x0000_0010;
pub const ACCESS4_EXECUTE: u32 = 0x0000_0020;

/// How far the server must have committed written data before replying.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum stable_how4 {
    #[default]
    UNSTABLE4 = 0,
    DATA_SYNC4 = 1,
    FILE_SYNC4 = 2,
}
impl SerializeEnum for stable_how4 {}
impl DeserializeEnum for stable_how4 {}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfs_lock_type4 {
    #[default]
    READ_LT = 1,
    WRITE_LT = 2,
    /// Blocking read lock; the server may queue the request.
    READW_LT = 3,
    /// Blocking write lock.
    WRITEW_LT = 4,
}
impl SerializeEnum for nfs_lock_type4 {}
impl DeserializeEnum for nfs_lock_type4 {}

impl nfs_lock_type4 {
    pub fn is_write(self) -> bool {
        matches!(self, nfs_lock_type4::WRITE_LT | nfs_lock_type4::WRITEW_LT)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum open_delegation_type4 {
    #[default]
    OPEN_DELEGATE_NONE = 0,
    OPEN_DELEGATE_READ = 1,
    OPEN_DELEGATE_WRITE = 2,
}
impl SerializeEnum for open_delegation_type4 {}
impl DeserializeEnum for open_delegation_type4 {}

/// How the file is created when OPEN creates it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum createhow4 {
    /// Create or reuse an existing file.
    UNCHECKED4(fattr4),
    /// Fail with NFS4ERR_EXIST if the file exists.
    GUARDED4(fattr4),
    EXCLUSIVE4(verifier4),
}

impl Default for createhow4 {
    fn default() -> Self {
        createhow4::UNCHECKED4(fattr4::default())
    }
}

impl Serialize for createhow4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            createhow4::UNCHECKED4(attrs) => {
                0_u32.serialize(dest)?;
                attrs.serialize(dest)
            }
            createhow4::GUARDED4(attrs) => {
                1_u32.serialize(dest)?;
                attrs.serialize(dest)
            }
            createhow4::EXCLUSIVE4(verf) => {
                2_u32.serialize(dest)?;
                verf.serialize(dest)
            }
        }
    }
}

impl Deserialize for createhow4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match deserialize::<u32>(src)? {
            0 => createhow4::UNCHECKED4(deserialize(src)?),
            1 => createhow4::GUARDED4(deserialize(src)?),
            2 => createhow4::EXCLUSIVE4(deserialize(src)?),
            mode => return Err(invalid_data(&format!("invalid createmode4 {mode}"))),
        };
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum openflag4 {
    #[default]
    OPEN4_NOCREATE,
    OPEN4_CREATE(createhow4),
}

impl Serialize for openflag4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            openflag4::OPEN4_NOCREATE => 0_u32.serialize(dest),
            openflag4::OPEN4_CREATE(how) => {
                1_u32.serialize(dest)?;
                how.serialize(dest)
            }
        }
    }
}

impl Deserialize for openflag4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match deserialize::<u32>(src)? {
            0 => openflag4::OPEN4_NOCREATE,
            1 => openflag4::OPEN4_CREATE(deserialize(src)?),
            opentype => return Err(invalid_data(&format!("invalid opentype4 {opentype}"))),
        };
        Ok(())
    }
}

/// Basis on which OPEN asserts access to the file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum open_claim4 {
    /// Regular open of `file` in the current directory.
    CLAIM_NULL(String),
    /// Reclaim after a server restart; the current filehandle is the file itself.
    CLAIM_PREVIOUS(open_delegation_type4),
}

impl Default for open_claim4 {
    fn default() -> Self {
        open_claim4::CLAIM_NULL(String::new())
    }
}

impl Serialize for open_claim4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            open_claim4::CLAIM_NULL(file) => {
                0_u32.serialize(dest)?;
                file.serialize(dest)
            }
            open_claim4::CLAIM_PREVIOUS(delegate_type) => {
                1_u32.serialize(dest)?;
                delegate_type.serialize(dest)
            }
        }
    }
}

impl Deserialize for open_claim4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match deserialize::<u32>(src)? {
            0 => open_claim4::CLAIM_NULL(deserialize(src)?),
            1 => open_claim4::CLAIM_PREVIOUS(deserialize(src)?),
            claim => return Err(invalid_data(&format!("unsupported open claim {claim}"))),
        };
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OPEN4args {
    pub seqid: seqid4,
    pub share_access: u32,
    pub share_deny: u32,
    pub owner: open_owner4,
    pub openhow: openflag4,
    pub claim: open_claim4,
}
SerializeStruct!(OPEN4args, seqid, share_access, share_deny, owner, openhow, claim);
DeserializeStruct!(OPEN4args, seqid, share_access, share_deny, owner, openhow, claim);

/// Access control entry, only decoded to get past delegation results.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct nfsace4 {
    pub acetype: u32,
    pub flag: u32,
    pub access_mask: u32,
    pub who: String,
}
SerializeStruct!(nfsace4, acetype, flag, access_mask, who);
DeserializeStruct!(nfsace4, acetype, flag, access_mask, who);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct open_read_delegation4 {
    pub stateid: stateid4,
    pub recall: bool,
    pub permissions: nfsace4,
}
SerializeStruct!(open_read_delegation4, stateid, recall, permissions);
DeserializeStruct!(open_read_delegation4, stateid, recall, permissions);

/// `nfs_space_limit4`, flattened: `limitby` 1 is a size, 2 is a block count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct nfs_space_limit4 {
    pub limitby: u32,
    pub filesize: u64,
    pub num_blocks: u32,
    pub bytes_per_block: u32,
}

impl Serialize for nfs_space_limit4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.limitby.serialize(dest)?;
        match self.limitby {
            1 => self.filesize.serialize(dest),
            _ => {
                self.num_blocks.serialize(dest)?;
                self.bytes_per_block.serialize(dest)
            }
        }
    }
}

impl Deserialize for nfs_space_limit4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.limitby.deserialize(src)?;
        match self.limitby {
            1 => self.filesize.deserialize(src),
            2 => {
                self.num_blocks.deserialize(src)?;
                self.bytes_per_block.deserialize(src)
            }
            limitby => Err(invalid_data(&format!("invalid limitby4 {limitby}"))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct open_write_delegation4 {
    pub stateid: stateid4,
    pub recall: bool,
    pub space_limit: nfs_space_limit4,
    pub permissions: nfsace4,
}
SerializeStruct!(open_write_delegation4, stateid, recall, space_limit, permissions);
DeserializeStruct!(open_write_delegation4, stateid, recall, space_limit, permissions);

/// Delegation granted by OPEN. This client never asks for one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum open_delegation4 {
    #[default]
    OPEN_DELEGATE_NONE,
    OPEN_DELEGATE_READ(open_read_delegation4),
    OPEN_DELEGATE_WRITE(open_write_delegation4),
}

impl Serialize for open_delegation4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            open_delegation4::OPEN_DELEGATE_NONE => 0_u32.serialize(dest),
            open_delegation4::OPEN_DELEGATE_READ(read) => {
                1_u32.serialize(dest)?;
                read.serialize(dest)
            }
            open_delegation4::OPEN_DELEGATE_WRITE(write) => {
                2_u32.serialize(dest)?;
                write.serialize(dest)
            }
        }
    }
}

impl Deserialize for open_delegation4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match deserialize::<u32>(src)? {
            0 => open_delegation4::OPEN_DELEGATE_NONE,
            1 => open_delegation4::OPEN_DELEGATE_READ(deserialize(src)?),
            2 => open_delegation4::OPEN_DELEGATE_WRITE(deserialize(src)?),
            kind => return Err(invalid_data(&format!("invalid delegation type {kind}"))),
        };
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OPEN4resok {
    pub stateid: stateid4,
    pub cinfo: change_info4,
    pub rflags: u32,
    pub attrset: Bitmap,
    pub delegation: open_delegation4,
}
SerializeStruct!(OPEN4resok, stateid, cinfo, rflags, attrset, delegation);
DeserializeStruct!(OPEN4resok, stateid, cinfo, rflags, attrset, delegation);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OPEN_CONFIRM4args {
    pub open_stateid: stateid4,
    pub seqid: seqid4,
}
SerializeStruct!(OPEN_CONFIRM4args, open_stateid, seqid);
DeserializeStruct!(OPEN_CONFIRM4args, open_stateid, seqid);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CLOSE4args {
    pub seqid: seqid4,
    pub open_stateid: stateid4,
}
SerializeStruct!(CLOSE4args, seqid, open_stateid);
DeserializeStruct!(CLOSE4args, seqid, open_stateid);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READ4args {
    pub stateid: stateid4,
    pub offset: offset4,
    pub count: count4,
}
SerializeStruct!(READ4args, stateid, offset, count);
DeserializeStruct!(READ4args, stateid, offset, count);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct READ4resok {
    pub eof: bool,
    pub data: Vec<u8>,
}
SerializeStruct!(READ4resok, eof, data);
DeserializeStruct!(READ4resok, eof, data);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WRITE4args {
    pub stateid: stateid4,
    pub offset: offset4,
    pub stable: stable_how4,
    pub data: Vec<u8>,
}
SerializeStruct!(WRITE4args, stateid, offset, stable, data);
DeserializeStruct!(WRITE4args, stateid, offset, stable, data);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WRITE4resok {
    pub count: count4,
    pub committed: stable_how4,
    pub writeverf: verifier4,
}
SerializeStruct!(WRITE4resok, count, committed, writeverf);
DeserializeStruct!(WRITE4resok, count, committed, writeverf);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct COMMIT4args {
    pub offset: offset4,
    pub count: count4,
}
SerializeStruct!(COMMIT4args, offset, count);
DeserializeStruct!(COMMIT4args, offset, count);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ACCESS4resok {
    pub supported: u32,
    pub access: u32,
}
SerializeStruct!(ACCESS4resok, supported, access);
DeserializeStruct!(ACCESS4resok, supported, access);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SETATTR4args {
    pub stateid: stateid4,
    pub obj_attributes: fattr4,
}
SerializeStruct!(SETATTR4args, stateid, obj_attributes);
DeserializeStruct!(SETATTR4args, stateid, obj_attributes);

/// First LOCK by a lock owner: converts open state into lock state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct open_to_lock_owner4 {
    pub open_seqid: seqid4,
    pub open_stateid: stateid4,
    pub lock_seqid: seqid4,
    pub lock_owner: lock_owner4,
}
SerializeStruct!(open_to_lock_owner4, open_seqid, open_stateid, lock_seqid, lock_owner);
DeserializeStruct!(open_to_lock_owner4, open_seqid, open_stateid, lock_seqid, lock_owner);

/// Later LOCKs by a lock owner that already holds a lock stateid.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct exist_lock_owner4 {
    pub lock_stateid: stateid4,
    pub lock_seqid: seqid4,
}
SerializeStruct!(exist_lock_owner4, lock_stateid, lock_seqid);
DeserializeStruct!(exist_lock_owner4, lock_stateid, lock_seqid);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum locker4 {
    NewLockOwner(open_to_lock_owner4),
    ExistingLockOwner(exist_lock_owner4),
}

impl Default for locker4 {
    fn default() -> Self {
        locker4::ExistingLockOwner(exist_lock_owner4::default())
    }
}

impl Serialize for locker4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            locker4::NewLockOwner(owner) => {
                true.serialize(dest)?;
                owner.serialize(dest)
            }
            locker4::ExistingLockOwner(owner) => {
                false.serialize(dest)?;
                owner.serialize(dest)
            }
        }
    }
}

impl Deserialize for locker4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = if deserialize::<bool>(src)? {
            locker4::NewLockOwner(deserialize(src)?)
        } else {
            locker4::ExistingLockOwner(deserialize(src)?)
        };
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LOCK4args {
    pub locktype: nfs_lock_type4,
    pub reclaim: bool,
    pub offset: offset4,
    pub length: length4,
    pub locker: locker4,
}
SerializeStruct!(LOCK4args, locktype, reclaim, offset, length, locker);
DeserializeStruct!(LOCK4args, locktype, reclaim, offset, length, locker);

/// Conflicting lock reported with NFS4ERR_DENIED.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LOCK4denied {
    pub offset: offset4,
    pub length: length4,
    pub locktype: nfs_lock_type4,
    pub owner: lock_owner4,
}
SerializeStruct!(LOCK4denied, offset, length, locktype, owner);
DeserializeStruct!(LOCK4denied, offset, length, locktype, owner);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LOCKT4args {
    pub locktype: nfs_lock_type4,
    pub offset: offset4,
    pub length: length4,
    pub owner: lock_owner4,
}
SerializeStruct!(LOCKT4args, locktype, offset, length, owner);
DeserializeStruct!(LOCKT4args, locktype, offset, length, owner);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LOCKU4args {
    pub locktype: nfs_lock_type4,
    pub seqid: seqid4,
    pub lock_stateid: stateid4,
    pub offset: offset4,
    pub length: length4,
}
SerializeStruct!(LOCKU4args, locktype, seqid, lock_stateid, offset, length);
DeserializeStruct!(LOCKU4args, locktype, seqid, lock_stateid, offset, length);

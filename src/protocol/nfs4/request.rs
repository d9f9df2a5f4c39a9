use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::xdr::nfs4::client::*;
use crate::protocol::xdr::nfs4::dir::*;
use crate::protocol::xdr::nfs4::file::*;
use crate::protocol::xdr::nfs4::*;
use crate::protocol::xdr::Serialize;

/// READDIR bound on names and cookies per reply.
pub const READDIR_DIRCOUNT: u32 = 0x2000;
/// READDIR bound on the whole reply.
pub const READDIR_MAXCOUNT: u32 = 0x8000;

/// Builds the arguments of one NFSv4 procedure call.
///
/// Every operation builder validates its arguments first and encodes into
/// scratch space, so a failed call leaves the request exactly as it was.
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    procedure: nfs_proc4,
    ops: Vec<nfs_opnum4>,
    /// COMPOUND header followed by the encoded operations.
    buffer: Vec<u8>,
    /// Offset of the operation count in the header, patched by `finish`.
    count_offset: usize,
}

impl RequestBuilder {
    pub fn new(procedure: nfs_proc4) -> Self {
        Self::with_tag(procedure, "")
    }

    pub fn compound() -> Self {
        Self::new(nfs_proc4::NFSPROC4_COMPOUND)
    }

    /// `tag` is echoed back by the server; it only helps tracing.
    pub fn with_tag(procedure: nfs_proc4, tag: &str) -> Self {
        let mut buffer = Vec::new();
        let mut count_offset = 0;
        if procedure == nfs_proc4::NFSPROC4_COMPOUND {
            let header =
                COMPOUND4args_header { tag: tag.to_string(), minorversion: MINOR_VERSION, numops: 0 };
            // Writing into a Vec cannot fail.
            let _ = header.serialize(&mut buffer);
            count_offset = buffer.len() - 4;
        }
        Self { procedure, ops: Vec::new(), buffer, count_offset }
    }

    pub fn procedure(&self) -> nfs_proc4 {
        self.procedure
    }

    /// Drops all operations added so far.
    pub fn reset(&mut self) {
        self.ops.clear();
        self.buffer.truncate(self.count_offset + 4);
    }

    pub fn op_count(&self) -> u32 {
        self.ops.len() as u32
    }

    /// Operations in the order they were added.
    pub fn ops(&self) -> &[nfs_opnum4] {
        &self.ops
    }

    fn ensure_compound(&self) -> Result<()> {
        if self.procedure != nfs_proc4::NFSPROC4_COMPOUND {
            return Err(Error::InvalidArgument("operation outside of COMPOUND"));
        }
        Ok(())
    }

    fn op_with<F>(&mut self, opnum: nfs_opnum4, encode: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
    {
        self.ensure_compound()?;
        let mut scratch = Vec::new();
        opnum.serialize(&mut scratch)?;
        encode(&mut scratch)?;

        trace!("{:?} ({} bytes)", opnum, scratch.len());
        self.buffer.extend_from_slice(&scratch);
        self.ops.push(opnum);
        Ok(())
    }

    fn op<T: Serialize>(&mut self, opnum: nfs_opnum4, args: &T) -> Result<()> {
        self.op_with(opnum, |dest| args.serialize(dest))
    }

    fn op_void(&mut self, opnum: nfs_opnum4) -> Result<()> {
        self.op_with(opnum, |_| Ok(()))
    }

    pub fn access(&mut self, mask: u32) -> Result<()> {
        self.op(nfs_opnum4::OP_ACCESS, &mask)
    }

    pub fn close(&mut self, seqid: seqid4, stateid: &stateid4) -> Result<()> {
        self.op(nfs_opnum4::OP_CLOSE, &CLOSE4args { seqid, open_stateid: *stateid })
    }

    pub fn commit(&mut self, offset: offset4, count: count4) -> Result<()> {
        self.op(nfs_opnum4::OP_COMMIT, &COMMIT4args { offset, count })
    }

    /// CREATE for everything but regular files, which are created by OPEN.
    pub fn create(&mut self, objtype: createtype4, name: &str, attrs: fattr4) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty name"));
        }
        if let createtype4::NF4LNK(target) = &objtype {
            if target.is_empty() {
                return Err(Error::InvalidArgument("empty symlink target"));
            }
        }
        let args = CREATE4args { objtype, objname: name.to_string(), createattrs: attrs };
        self.op(nfs_opnum4::OP_CREATE, &args)
    }

    pub fn get_attr(&mut self, attrs: &[Attribute]) -> Result<()> {
        self.op(nfs_opnum4::OP_GETATTR, &GETATTR4args { attr_request: Bitmap::from_attrs(attrs) })
    }

    pub fn get_fh(&mut self) -> Result<()> {
        self.op_void(nfs_opnum4::OP_GETFH)
    }

    /// LINK the saved filehandle into the current directory as `name`.
    pub fn link(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty name"));
        }
        self.op(nfs_opnum4::OP_LINK, &LINK4args { newname: name.to_string() })
    }

    pub fn lock(
        &mut self,
        locktype: nfs_lock_type4,
        reclaim: bool,
        offset: offset4,
        length: length4,
        locker: locker4,
    ) -> Result<()> {
        if length == 0 {
            return Err(Error::InvalidArgument("zero-length lock"));
        }
        let args = LOCK4args { locktype, reclaim, offset, length, locker };
        self.op(nfs_opnum4::OP_LOCK, &args)
    }

    pub fn lock_test(
        &mut self,
        locktype: nfs_lock_type4,
        offset: offset4,
        length: length4,
        owner: &lock_owner4,
    ) -> Result<()> {
        if length == 0 {
            return Err(Error::InvalidArgument("zero-length lock"));
        }
        let args = LOCKT4args { locktype, offset, length, owner: owner.clone() };
        self.op(nfs_opnum4::OP_LOCKT, &args)
    }

    pub fn lock_unlock(
        &mut self,
        locktype: nfs_lock_type4,
        seqid: seqid4,
        lock_stateid: &stateid4,
        offset: offset4,
        length: length4,
    ) -> Result<()> {
        if length == 0 {
            return Err(Error::InvalidArgument("zero-length lock"));
        }
        let args = LOCKU4args { locktype, seqid, lock_stateid: *lock_stateid, offset, length };
        self.op(nfs_opnum4::OP_LOCKU, &args)
    }

    /// LOOKUP of a single path component.
    pub fn look_up(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty name"));
        }
        if name.contains('/') {
            return Err(Error::InvalidArgument("LOOKUP takes a single component"));
        }
        self.op(nfs_opnum4::OP_LOOKUP, &LOOKUP4args { objname: name.to_string() })
    }

    /// LOOKUPP: replace the current filehandle with its parent.
    pub fn look_up_up(&mut self) -> Result<()> {
        self.op_void(nfs_opnum4::OP_LOOKUPP)
    }

    pub fn open(
        &mut self,
        claim: open_claim4,
        seqid: seqid4,
        share_access: u32,
        owner: &open_owner4,
        openhow: openflag4,
    ) -> Result<()> {
        if let open_claim4::CLAIM_NULL(name) = &claim {
            if name.is_empty() {
                return Err(Error::InvalidArgument("empty name"));
            }
        }
        if share_access & OPEN4_SHARE_ACCESS_BOTH == 0 {
            return Err(Error::InvalidArgument("open without read or write access"));
        }
        let args = OPEN4args {
            seqid,
            share_access,
            share_deny: OPEN4_SHARE_DENY_NONE,
            owner: owner.clone(),
            openhow,
            claim,
        };
        self.op(nfs_opnum4::OP_OPEN, &args)
    }

    pub fn open_confirm(&mut self, seqid: seqid4, stateid: &stateid4) -> Result<()> {
        self.op(nfs_opnum4::OP_OPEN_CONFIRM, &OPEN_CONFIRM4args { open_stateid: *stateid, seqid })
    }

    pub fn put_fh(&mut self, fh: &nfs_fh4) -> Result<()> {
        if fh.is_empty() {
            return Err(Error::InvalidArgument("empty file handle"));
        }
        self.op(nfs_opnum4::OP_PUTFH, fh)
    }

    pub fn put_root_fh(&mut self) -> Result<()> {
        self.op_void(nfs_opnum4::OP_PUTROOTFH)
    }

    pub fn read(&mut self, stateid: &stateid4, offset: offset4, count: count4) -> Result<()> {
        self.op(nfs_opnum4::OP_READ, &READ4args { stateid: *stateid, offset, count })
    }

    pub fn read_dir(
        &mut self,
        cookie: nfs_cookie4,
        cookieverf: verifier4,
        attrs: &[Attribute],
    ) -> Result<()> {
        let args = READDIR4args {
            cookie,
            cookieverf,
            dircount: READDIR_DIRCOUNT,
            maxcount: READDIR_MAXCOUNT,
            attr_request: Bitmap::from_attrs(attrs),
        };
        self.op(nfs_opnum4::OP_READDIR, &args)
    }

    pub fn read_link(&mut self) -> Result<()> {
        self.op_void(nfs_opnum4::OP_READLINK)
    }

    pub fn release_lock_owner(&mut self, owner: &lock_owner4) -> Result<()> {
        let args = RELEASE_LOCKOWNER4args { lock_owner: owner.clone() };
        self.op(nfs_opnum4::OP_RELEASE_LOCKOWNER, &args)
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty name"));
        }
        self.op(nfs_opnum4::OP_REMOVE, &REMOVE4args { target: name.to_string() })
    }

    /// RENAME `from` in the saved directory to `to` in the current one.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if from.is_empty() || to.is_empty() {
            return Err(Error::InvalidArgument("empty name"));
        }
        let args = RENAME4args { oldname: from.to_string(), newname: to.to_string() };
        self.op(nfs_opnum4::OP_RENAME, &args)
    }

    pub fn renew(&mut self, clientid: clientid4) -> Result<()> {
        self.op(nfs_opnum4::OP_RENEW, &RENEW4args { clientid })
    }

    pub fn restore_fh(&mut self) -> Result<()> {
        self.op_void(nfs_opnum4::OP_RESTOREFH)
    }

    pub fn save_fh(&mut self) -> Result<()> {
        self.op_void(nfs_opnum4::OP_SAVEFH)
    }

    pub fn set_attr(&mut self, stateid: &stateid4, attrs: fattr4) -> Result<()> {
        if attrs.is_empty() {
            return Err(Error::InvalidArgument("SETATTR without attributes"));
        }
        self.op(nfs_opnum4::OP_SETATTR, &SETATTR4args { stateid: *stateid, obj_attributes: attrs })
    }

    /// SETCLIENTID without a callback channel.
    pub fn set_client_id(&mut self, verifier: verifier4, id: &[u8]) -> Result<()> {
        if id.is_empty() {
            return Err(Error::InvalidArgument("empty client id"));
        }
        if id.len() > NFS4_OPAQUE_LIMIT {
            return Err(Error::InvalidArgument("client id too long"));
        }
        let args = SETCLIENTID4args {
            client: nfs_client_id4 { verifier, id: id.to_vec() },
            callback: cb_client4::default(),
            callback_ident: 0,
        };
        self.op(nfs_opnum4::OP_SETCLIENTID, &args)
    }

    pub fn set_client_id_confirm(&mut self, clientid: clientid4, confirm: verifier4) -> Result<()> {
        let args = SETCLIENTID_CONFIRM4args { clientid, setclientid_confirm: confirm };
        self.op(nfs_opnum4::OP_SETCLIENTID_CONFIRM, &args)
    }

    pub fn verify(&mut self, attrs: fattr4) -> Result<()> {
        if attrs.is_empty() {
            return Err(Error::InvalidArgument("VERIFY without attributes"));
        }
        self.op(nfs_opnum4::OP_VERIFY, &VERIFY4args { obj_attributes: attrs })
    }

    pub fn write(
        &mut self,
        stateid: &stateid4,
        offset: offset4,
        stable: stable_how4,
        data: &[u8],
    ) -> Result<()> {
        self.op_with(nfs_opnum4::OP_WRITE, |dest| {
            stateid.serialize(dest)?;
            offset.serialize(dest)?;
            stable.serialize(dest)?;
            data.serialize(dest)
        })
    }

    /// Returns the procedure arguments with the operation count filled in.
    pub fn finish(&self) -> Vec<u8> {
        let mut request = self.buffer.clone();
        if self.procedure == nfs_proc4::NFSPROC4_COMPOUND {
            request[self.count_offset..self.count_offset + 4]
                .copy_from_slice(&self.op_count().to_be_bytes());
        }
        request
    }
}

use std::io::Cursor;

use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::xdr::nfs4::client::*;
use crate::protocol::xdr::nfs4::dir::*;
use crate::protocol::xdr::nfs4::file::*;
use crate::protocol::xdr::nfs4::*;
use crate::protocol::xdr::{deserialize, Deserialize};

/// Reads the results of a COMPOUND reply, one operation at a time.
///
/// Accessors must be called in the order the operations were encoded. The
/// server stops at the first failing operation, so once an accessor sees a
/// non-OK status that status is latched and every later accessor returns it.
#[derive(Debug)]
pub struct ReplyInterpreter {
    cursor: Cursor<Vec<u8>>,
    status: nfsstat4,
    tag: String,
    results: u32,
    remaining: u32,
    failed: Option<nfsstat4>,
    denied: Option<LOCK4denied>,
}

impl ReplyInterpreter {
    /// Parses the COMPOUND result header from the procedure results.
    pub fn new(reply: Vec<u8>) -> Result<Self> {
        let mut cursor = Cursor::new(reply);
        let header = deserialize::<COMPOUND4res_header>(&mut cursor)?;
        Ok(Self {
            cursor,
            status: header.status,
            tag: header.tag,
            results: header.numres,
            remaining: header.numres,
            failed: None,
            denied: None,
        })
    }

    /// Status of the whole COMPOUND: that of the last evaluated operation.
    pub fn status(&self) -> nfsstat4 {
        self.status
    }

    /// Number of operations the server evaluated.
    pub fn result_count(&self) -> usize {
        self.results as usize
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Status latched by the first failed accessor, if any.
    pub fn first_error(&self) -> Option<nfsstat4> {
        self.failed
    }

    /// Conflicting lock returned with NFS4ERR_DENIED by LOCK or LOCKT.
    pub fn denied(&self) -> Option<&LOCK4denied> {
        self.denied.as_ref()
    }

    fn decode<T: Deserialize + Default>(&mut self) -> Result<T> {
        Ok(deserialize::<T>(&mut self.cursor)?)
    }

    /// Reads the operation number and status of the next result.
    fn next(&mut self, opnum: nfs_opnum4) -> Result<nfsstat4> {
        if let Some(status) = self.failed {
            return Err(status.into());
        }
        if self.remaining == 0 {
            if !self.status.is_ok() {
                self.failed = Some(self.status);
                return Err(self.status.into());
            }
            return Err(Error::BadXdr(format!("no result for {opnum:?}")));
        }
        self.remaining -= 1;

        let resop = self.decode::<nfs_opnum4>()?;
        if resop != opnum {
            return Err(Error::BadXdr(format!("expected result of {opnum:?}, got {resop:?}")));
        }
        self.decode::<nfsstat4>()
    }

    fn check(&mut self, opnum: nfs_opnum4, status: nfsstat4) -> Result<()> {
        if status.is_ok() {
            return Ok(());
        }
        debug!("{:?} failed with {}", opnum, status);
        self.failed = Some(status);
        Err(status.into())
    }

    fn expect(&mut self, opnum: nfs_opnum4) -> Result<()> {
        let status = self.next(opnum)?;
        self.check(opnum, status)
    }

    fn expect_body<T: Deserialize + Default>(&mut self, opnum: nfs_opnum4) -> Result<T> {
        self.expect(opnum)?;
        self.decode()
    }

    pub fn access(&mut self) -> Result<ACCESS4resok> {
        self.expect_body(nfs_opnum4::OP_ACCESS)
    }

    pub fn close(&mut self) -> Result<stateid4> {
        self.expect_body(nfs_opnum4::OP_CLOSE)
    }

    /// Returns the write verifier.
    pub fn commit(&mut self) -> Result<verifier4> {
        self.expect_body(nfs_opnum4::OP_COMMIT)
    }

    pub fn create(&mut self) -> Result<change_info4> {
        let res = self.expect_body::<CREATE4resok>(nfs_opnum4::OP_CREATE)?;
        Ok(res.cinfo)
    }

    pub fn get_attr(&mut self) -> Result<fattr4> {
        let res = self.expect_body::<GETATTR4resok>(nfs_opnum4::OP_GETATTR)?;
        Ok(res.obj_attributes)
    }

    pub fn get_fh(&mut self) -> Result<nfs_fh4> {
        let res = self.expect_body::<GETFH4resok>(nfs_opnum4::OP_GETFH)?;
        Ok(res.object)
    }

    pub fn link(&mut self) -> Result<change_info4> {
        self.expect_body(nfs_opnum4::OP_LINK)
    }

    fn lock_result(&mut self, opnum: nfs_opnum4) -> Result<()> {
        let status = self.next(opnum)?;
        if status == nfsstat4::NFS4ERR_DENIED {
            self.denied = Some(self.decode()?);
        }
        self.check(opnum, status)
    }

    /// Returns the lock stateid. A conflict fails with
    /// [Error::WouldBlock] and is described by [ReplyInterpreter::denied].
    pub fn lock(&mut self) -> Result<stateid4> {
        self.lock_result(nfs_opnum4::OP_LOCK)?;
        self.decode()
    }

    pub fn lock_test(&mut self) -> Result<()> {
        self.lock_result(nfs_opnum4::OP_LOCKT)
    }

    pub fn lock_unlock(&mut self) -> Result<stateid4> {
        self.expect_body(nfs_opnum4::OP_LOCKU)
    }

    pub fn look_up(&mut self) -> Result<()> {
        self.expect(nfs_opnum4::OP_LOOKUP)
    }

    pub fn look_up_up(&mut self) -> Result<()> {
        self.expect(nfs_opnum4::OP_LOOKUPP)
    }

    pub fn open(&mut self) -> Result<OPEN4resok> {
        self.expect_body(nfs_opnum4::OP_OPEN)
    }

    pub fn open_confirm(&mut self) -> Result<stateid4> {
        self.expect_body(nfs_opnum4::OP_OPEN_CONFIRM)
    }

    pub fn put_fh(&mut self) -> Result<()> {
        self.expect(nfs_opnum4::OP_PUTFH)
    }

    pub fn put_root_fh(&mut self) -> Result<()> {
        self.expect(nfs_opnum4::OP_PUTROOTFH)
    }

    pub fn read(&mut self) -> Result<READ4resok> {
        self.expect_body(nfs_opnum4::OP_READ)
    }

    pub fn read_dir(&mut self) -> Result<READDIR4resok> {
        self.expect_body(nfs_opnum4::OP_READDIR)
    }

    pub fn read_link(&mut self) -> Result<String> {
        let res = self.expect_body::<READLINK4resok>(nfs_opnum4::OP_READLINK)?;
        Ok(res.link)
    }

    pub fn release_lock_owner(&mut self) -> Result<()> {
        self.expect(nfs_opnum4::OP_RELEASE_LOCKOWNER)
    }

    pub fn remove(&mut self) -> Result<change_info4> {
        self.expect_body(nfs_opnum4::OP_REMOVE)
    }

    pub fn rename(&mut self) -> Result<RENAME4resok> {
        self.expect_body(nfs_opnum4::OP_RENAME)
    }

    pub fn renew(&mut self) -> Result<()> {
        self.expect(nfs_opnum4::OP_RENEW)
    }

    pub fn restore_fh(&mut self) -> Result<()> {
        self.expect(nfs_opnum4::OP_RESTOREFH)
    }

    pub fn save_fh(&mut self) -> Result<()> {
        self.expect(nfs_opnum4::OP_SAVEFH)
    }

    /// Returns the attributes that were set. The set is encoded even when
    /// SETATTR fails, so it is consumed before the status is checked.
    pub fn set_attr(&mut self) -> Result<Bitmap> {
        let status = self.next(nfs_opnum4::OP_SETATTR)?;
        let attrsset = self.decode::<Bitmap>()?;
        self.check(nfs_opnum4::OP_SETATTR, status)?;
        Ok(attrsset)
    }

    pub fn set_client_id(&mut self) -> Result<SETCLIENTID4resok> {
        let status = self.next(nfs_opnum4::OP_SETCLIENTID)?;
        if status == nfsstat4::NFS4ERR_CLID_INUSE {
            let in_use = self.decode::<clientaddr4>()?;
            debug!("client id in use by {}:{}", in_use.r_netid, in_use.r_addr);
        }
        self.check(nfs_opnum4::OP_SETCLIENTID, status)?;
        self.decode()
    }

    pub fn set_client_id_confirm(&mut self) -> Result<()> {
        self.expect(nfs_opnum4::OP_SETCLIENTID_CONFIRM)
    }

    pub fn verify(&mut self) -> Result<()> {
        self.expect(nfs_opnum4::OP_VERIFY)
    }

    pub fn write(&mut self) -> Result<WRITE4resok> {
        self.expect_body(nfs_opnum4::OP_WRITE)
    }
}

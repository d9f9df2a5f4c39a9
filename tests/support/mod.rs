//! In-memory NFSv4.0 server for the integration tests.
//!
//! It speaks the real protocol over TCP (record marking, ONC RPC,
//! COMPOUND) using the crate's own XDR types, keeps a small file tree, and
//! tracks client ids, owner sequence ids, open and lock state closely
//! enough that sequencing mistakes in the client surface as
//! NFS4ERR_BAD_SEQID. Tests steer it through [MockServer]: fault
//! injection, out-of-band tree changes, server restarts and lease expiry.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Cursor;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use nfs4_client::connection::{read_record, write_record, Protocol, ServerAddress};
use nfs4_client::open_state::seqid_advances;
use nfs4_client::xdr::nfs4::client::*;
use nfs4_client::xdr::nfs4::dir::*;
use nfs4_client::xdr::nfs4::file::*;
use nfs4_client::xdr::nfs4::*;
use nfs4_client::xdr::rpc::{make_success_reply, rpc_body, rpc_msg};
use nfs4_client::xdr::{deserialize, to_vec, Deserialize, Serialize};
use nfs4_client::{FileSystem, MountOptions, Nfs4Client};

pub const ROOT_ID: u64 = 1;
pub const FSID: fsid4 = fsid4 { major: 7, minor: 0 };
const FOREIGN_FSID: fsid4 = fsid4 { major: 8, minor: 0 };

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Behaviour switches of the mock server.
#[derive(Clone, Debug)]
pub struct MockConfig {
    /// New open owners must be confirmed with OPEN_CONFIRM.
    pub require_confirm: bool,
    /// Whether the FILEID attribute is supported.
    pub file_ids: bool,
    pub max_read: u64,
    pub max_write: u64,
    pub lease_time: u32,
    pub fh_expire_type: u32,
    /// Entries per READDIR reply.
    pub readdir_page: usize,
    /// OPEN of a directory succeeds instead of failing with ISDIR.
    pub open_dirs: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            require_confirm: false,
            file_ids: true,
            max_read: 4096,
            max_write: 4096,
            lease_time: 90,
            fh_expire_type: FH4_PERSISTENT,
            readdir_page: 2,
            open_dirs: false,
        }
    }
}

#[derive(Clone, Debug)]
enum Content {
    File(Vec<u8>),
    Dir(BTreeMap<String, u64>),
    Symlink(String),
}

#[derive(Clone, Debug)]
struct Node {
    content: Content,
    mode: u32,
    nlink: u32,
    change: u64,
    parent: u64,
    fsid: fsid4,
}

impl Node {
    fn file_type(&self) -> nfs_ftype4 {
        match self.content {
            Content::File(_) => nfs_ftype4::NF4REG,
            Content::Dir(_) => nfs_ftype4::NF4DIR,
            Content::Symlink(_) => nfs_ftype4::NF4LNK,
        }
    }

    fn size(&self) -> u64 {
        match &self.content {
            Content::File(data) => data.len() as u64,
            Content::Dir(entries) => entries.len() as u64,
            Content::Symlink(target) => target.len() as u64,
        }
    }
}

type OwnerKey = (clientid4, Vec<u8>);

#[derive(Debug)]
struct OwnerRecord {
    seqid: seqid4,
    confirmed: bool,
}

#[derive(Debug)]
struct OpenRecord {
    file: u64,
    owner: OwnerKey,
    access: u32,
    seqid: u32,
}

#[derive(Debug)]
struct LockStateRecord {
    file: u64,
    owner: OwnerKey,
    seqid: u32,
}

#[derive(Clone, Debug)]
struct LockRecord {
    file: u64,
    owner: OwnerKey,
    write: bool,
    offset: u64,
    length: u64,
}

impl LockRecord {
    fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    fn overlaps(&self, offset: u64, length: u64) -> bool {
        self.offset < offset.saturating_add(length) && offset < self.end()
    }
}

#[derive(Debug)]
struct Failure {
    status: nfsstat4,
    body: Vec<u8>,
}

impl From<nfsstat4> for Failure {
    fn from(status: nfsstat4) -> Self {
        Failure { status, body: Vec::new() }
    }
}

type OpResult = Result<Vec<u8>, Failure>;

fn body<T: Serialize>(value: &T) -> Vec<u8> {
    to_vec(value).expect("encode result")
}

fn args<T: Deserialize + Default>(src: &mut Cursor<&[u8]>) -> Result<T, Failure> {
    deserialize(src).map_err(|_| nfsstat4::NFS4ERR_BADXDR.into())
}

/// Current and saved filehandle of one COMPOUND.
#[derive(Debug, Default)]
struct Handles {
    current: Option<u64>,
    saved: Option<u64>,
}

impl Handles {
    fn current(&self) -> Result<u64, Failure> {
        self.current.ok_or_else(|| nfsstat4::NFS4ERR_NOFILEHANDLE.into())
    }
}

#[derive(Debug)]
struct ServerState {
    config: MockConfig,
    nodes: HashMap<u64, Node>,
    next_id: u64,
    counts: HashMap<nfs_opnum4, usize>,
    faults: HashMap<nfs_opnum4, VecDeque<nfsstat4>>,
    drop_replies: usize,
    boot: u32,
    handle_generation: u32,
    clients: HashMap<clientid4, bool>,
    next_client: u32,
    owners: HashMap<OwnerKey, OwnerRecord>,
    opens: HashMap<[u8; NFS4_OTHER_SIZE], OpenRecord>,
    lock_states: HashMap<[u8; NFS4_OTHER_SIZE], LockStateRecord>,
    locks: Vec<LockRecord>,
    next_state: u32,
    grace: bool,
    write_verifier: verifier4,
}

impl ServerState {
    fn new(config: MockConfig) -> Self {
        let root = Node {
            content: Content::Dir(BTreeMap::new()),
            mode: 0o755,
            nlink: 2,
            change: 1,
            parent: ROOT_ID,
            fsid: FSID,
        };
        Self {
            config,
            nodes: HashMap::from([(ROOT_ID, root)]),
            next_id: ROOT_ID + 1,
            counts: HashMap::new(),
            faults: HashMap::new(),
            drop_replies: 0,
            boot: 1,
            handle_generation: 0,
            clients: HashMap::new(),
            next_client: 1,
            owners: HashMap::new(),
            opens: HashMap::new(),
            lock_states: HashMap::new(),
            locks: Vec::new(),
            next_state: 1,
            grace: false,
            write_verifier: [1; NFS4_VERIFIER_SIZE],
        }
    }

    // Tree helpers.

    fn handle(&self, id: u64) -> nfs_fh4 {
        let mut data = id.to_be_bytes().to_vec();
        data.extend_from_slice(&self.handle_generation.to_be_bytes());
        nfs_fh4::new(data)
    }

    fn resolve_handle(&self, fh: &nfs_fh4) -> Result<u64, Failure> {
        if fh.data.len() != 12 {
            return Err(nfsstat4::NFS4ERR_BADHANDLE.into());
        }
        let id = u64::from_be_bytes(fh.data[..8].try_into().expect("8 bytes"));
        let generation = u32::from_be_bytes(fh.data[8..].try_into().expect("4 bytes"));
        if !self.nodes.contains_key(&id) {
            return Err(nfsstat4::NFS4ERR_STALE.into());
        }
        if generation != self.handle_generation {
            return Err(nfsstat4::NFS4ERR_FHEXPIRED.into());
        }
        Ok(id)
    }

    fn node(&self, id: u64) -> Result<&Node, Failure> {
        self.nodes.get(&id).ok_or_else(|| nfsstat4::NFS4ERR_STALE.into())
    }

    fn node_mut(&mut self, id: u64) -> Result<&mut Node, Failure> {
        self.nodes.get_mut(&id).ok_or_else(|| nfsstat4::NFS4ERR_STALE.into())
    }

    fn entries(&self, dir: u64) -> Result<&BTreeMap<String, u64>, Failure> {
        match &self.node(dir)?.content {
            Content::Dir(entries) => Ok(entries),
            _ => Err(nfsstat4::NFS4ERR_NOTDIR.into()),
        }
    }

    fn child(&self, dir: u64, name: &str) -> Result<Option<u64>, Failure> {
        Ok(self.entries(dir)?.get(name).copied())
    }

    /// Applies `update` to the entries of `dir` and returns the change info.
    fn modify_dir<F>(&mut self, dir: u64, update: F) -> Result<change_info4, Failure>
    where
        F: FnOnce(&mut BTreeMap<String, u64>),
    {
        let node = self.node_mut(dir)?;
        let Content::Dir(entries) = &mut node.content else {
            return Err(nfsstat4::NFS4ERR_NOTDIR.into());
        };
        update(entries);
        let before = node.change;
        node.change += 1;
        Ok(change_info4 { atomic: true, before, after: node.change })
    }

    fn insert_node(&mut self, dir: u64, name: &str, content: Content, mode: u32) -> Result<(u64, change_info4), Failure> {
        if self.child(dir, name)?.is_some() {
            return Err(nfsstat4::NFS4ERR_EXIST.into());
        }
        let id = self.next_id;
        self.next_id += 1;
        let is_dir = matches!(content, Content::Dir(_));
        let fsid = self.node(dir)?.fsid;
        self.nodes.insert(
            id,
            Node { content, mode, nlink: if is_dir { 2 } else { 1 }, change: 1, parent: dir, fsid },
        );
        let cinfo = self.modify_dir(dir, |entries| {
            entries.insert(name.to_string(), id);
        })?;
        Ok((id, cinfo))
    }

    fn lookup_path(&self, path: &str) -> Option<u64> {
        let mut id = ROOT_ID;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            id = self.child(id, component).ok()??;
        }
        Some(id)
    }

    fn split_path(path: &str) -> (&str, &str) {
        path.trim_matches('/').rsplit_once('/').unwrap_or(("", path.trim_matches('/')))
    }

    fn attrs(&self, id: u64, requested: &Bitmap) -> Result<fattr4, Failure> {
        let node = self.node(id)?;
        let supported = self.supported();
        let mut values = Vec::new();
        for code in requested.codes() {
            if !supported.contains_code(code) {
                continue;
            }
            let Some(attr) = <Attribute as num_traits::FromPrimitive>::from_u32(code) else {
                continue;
            };
            let time = nfstime4 { seconds: 1_700_000_000, nseconds: 0 };
            values.push(match attr {
                Attribute::SupportedAttrs => AttrValue::SupportedAttrs(supported.clone()),
                Attribute::Type => AttrValue::Type(node.file_type()),
                Attribute::FhExpireType => AttrValue::FhExpireType(self.config.fh_expire_type),
                Attribute::Change => AttrValue::Change(node.change),
                Attribute::Size => AttrValue::Size(node.size()),
                Attribute::LinkSupport => AttrValue::LinkSupport(true),
                Attribute::SymlinkSupport => AttrValue::SymlinkSupport(true),
                Attribute::Fsid => AttrValue::Fsid(node.fsid),
                Attribute::UniqueHandles => AttrValue::UniqueHandles(true),
                Attribute::LeaseTime => AttrValue::LeaseTime(self.config.lease_time),
                Attribute::FileHandle => AttrValue::FileHandle(self.handle(id)),
                Attribute::FileId => AttrValue::FileId(id),
                Attribute::MaxRead => AttrValue::MaxRead(self.config.max_read),
                Attribute::MaxWrite => AttrValue::MaxWrite(self.config.max_write),
                Attribute::Mode => AttrValue::Mode(node.mode),
                Attribute::NumLinks => AttrValue::NumLinks(node.nlink),
                Attribute::Owner => AttrValue::Owner("0".into()),
                Attribute::OwnerGroup => AttrValue::OwnerGroup("0".into()),
                Attribute::SpaceUsed => AttrValue::SpaceUsed(node.size().next_multiple_of(512)),
                Attribute::TimeAccess => AttrValue::TimeAccess(time),
                Attribute::TimeMetadata => AttrValue::TimeMetadata(time),
                Attribute::TimeModify => AttrValue::TimeModify(time),
                _ => continue,
            });
        }
        Ok(fattr4::new(values))
    }

    fn supported(&self) -> Bitmap {
        let mut attrs = vec![
            Attribute::SupportedAttrs,
            Attribute::Type,
            Attribute::FhExpireType,
            Attribute::Change,
            Attribute::Size,
            Attribute::LinkSupport,
            Attribute::SymlinkSupport,
            Attribute::Fsid,
            Attribute::UniqueHandles,
            Attribute::LeaseTime,
            Attribute::FileHandle,
            Attribute::MaxRead,
            Attribute::MaxWrite,
            Attribute::Mode,
            Attribute::NumLinks,
            Attribute::Owner,
            Attribute::OwnerGroup,
            Attribute::SpaceUsed,
            Attribute::TimeAccess,
            Attribute::TimeMetadata,
            Attribute::TimeModify,
        ];
        if self.config.file_ids {
            attrs.push(Attribute::FileId);
        }
        Bitmap::from_attrs(&attrs)
    }

    // State helpers.

    fn check_client(&self, clientid: clientid4) -> Result<(), Failure> {
        if (clientid >> 32) as u32 != self.boot || !self.clients.contains_key(&clientid) {
            return Err(nfsstat4::NFS4ERR_STALE_CLIENTID.into());
        }
        Ok(())
    }

    fn new_stateid(&mut self) -> stateid4 {
        let mut other = [0; NFS4_OTHER_SIZE];
        other[..4].copy_from_slice(&self.boot.to_be_bytes());
        other[4..8].copy_from_slice(&self.next_state.to_be_bytes());
        self.next_state += 1;
        stateid4 { seqid: 1, other }
    }

    fn check_stateid(&self, stateid: &stateid4) -> Result<(), Failure> {
        if u32::from_be_bytes(stateid.other[..4].try_into().expect("4 bytes")) != self.boot {
            return Err(nfsstat4::NFS4ERR_STALE_STATEID.into());
        }
        Ok(())
    }

    fn open_record(&self, stateid: &stateid4) -> Result<&OpenRecord, Failure> {
        self.check_stateid(stateid)?;
        self.opens.get(&stateid.other).ok_or_else(|| nfsstat4::NFS4ERR_BAD_STATEID.into())
    }

    /// Stateid use by READ, WRITE and SETATTR: anonymous or a live open.
    fn check_io_stateid(&self, stateid: &stateid4, file: u64) -> Result<(), Failure> {
        if *stateid == stateid4::ANONYMOUS {
            return Ok(());
        }
        self.check_stateid(stateid)?;
        if let Some(open) = self.opens.get(&stateid.other) {
            return if open.file == file { Ok(()) } else { Err(nfsstat4::NFS4ERR_BAD_STATEID.into()) };
        }
        match self.lock_states.get(&stateid.other) {
            Some(lock) if lock.file == file => Ok(()),
            _ => Err(nfsstat4::NFS4ERR_BAD_STATEID.into()),
        }
    }

    /// Checks and consumes `seqid` of `owner`. A new owner takes any seqid.
    fn sequence(&mut self, owner: &OwnerKey, seqid: seqid4) -> Result<(), Failure> {
        match self.owners.get_mut(owner) {
            Some(record) if record.seqid.wrapping_add(1) == seqid => {
                record.seqid = seqid;
                Ok(())
            }
            Some(record) => {
                tracing::warn!("bad seqid {} for owner {:?}, last {}", seqid, owner, record.seqid);
                Err(nfsstat4::NFS4ERR_BAD_SEQID.into())
            }
            None => {
                let confirmed = !self.config.require_confirm;
                self.owners.insert(owner.clone(), OwnerRecord { seqid, confirmed });
                Ok(())
            }
        }
    }

    /// Sequence check plus fault injection for a seqid-bearing operation.
    /// Faults that do not consume a seqid leave the owner untouched.
    fn sequenced(&mut self, op: nfs_opnum4, owner: &OwnerKey, seqid: seqid4) -> Result<(), Failure> {
        let pending = self.faults.get(&op).and_then(|f| f.front().copied());
        if let Some(status) = pending {
            if !seqid_advances(status) {
                self.fault(op)?;
            }
        }
        self.sequence(owner, seqid)?;
        self.fault(op)
    }

    fn fault(&mut self, op: nfs_opnum4) -> Result<(), Failure> {
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(status) => Err(status.into()),
            None => Ok(()),
        }
    }

    fn conflict(&self, file: u64, owner: &OwnerKey, write: bool, offset: u64, length: u64) -> Option<LOCK4denied> {
        self.locks
            .iter()
            .find(|l| l.file == file && &l.owner != owner && (write || l.write) && l.overlaps(offset, length))
            .map(|l| LOCK4denied {
                offset: l.offset,
                length: l.length,
                locktype: if l.write { nfs_lock_type4::WRITE_LT } else { nfs_lock_type4::READ_LT },
                owner: state_owner4 { clientid: l.owner.0, owner: l.owner.1.clone() },
            })
    }

    fn unlock(&mut self, file: u64, owner: &OwnerKey, offset: u64, length: u64) {
        let end = offset.saturating_add(length);
        let mut kept = Vec::new();
        for held in self.locks.drain(..) {
            if held.file != file || &held.owner != owner || !held.overlaps(offset, length) {
                kept.push(held);
                continue;
            }
            if held.offset < offset {
                kept.push(LockRecord { length: offset - held.offset, ..held.clone() });
            }
            if held.end() > end {
                let length = if held.length == u64::MAX { u64::MAX } else { held.end() - end };
                kept.push(LockRecord { offset: end, length, ..held.clone() });
            }
        }
        self.locks = kept;
    }

    // COMPOUND.

    fn compound(&mut self, src: &mut Cursor<&[u8]>) -> Vec<u8> {
        let header = match deserialize::<COMPOUND4args_header>(src) {
            Ok(header) => header,
            Err(_) => {
                let header =
                    COMPOUND4res_header { status: nfsstat4::NFS4ERR_BADXDR, tag: String::new(), numres: 0 };
                return body(&header);
            }
        };
        let mut handles = Handles::default();
        let mut results = Vec::new();
        let mut status = nfsstat4::NFS4_OK;
        let mut numres = 0;
        for _ in 0..header.numops {
            let (op, result) = match deserialize::<nfs_opnum4>(src) {
                Ok(op) => {
                    *self.counts.entry(op).or_default() += 1;
                    (op, self.operation(op, &mut handles, src))
                }
                Err(_) => (nfs_opnum4::OP_ILLEGAL, Err(nfsstat4::NFS4ERR_OP_ILLEGAL.into())),
            };
            numres += 1;
            results.extend(body(&op));
            match result {
                Ok(data) => {
                    results.extend(body(&nfsstat4::NFS4_OK));
                    results.extend(data);
                }
                Err(failure) => {
                    status = failure.status;
                    results.extend(body(&failure.status));
                    results.extend(failure.body);
                    break;
                }
            }
        }
        let mut reply = body(&COMPOUND4res_header { status, tag: header.tag, numres });
        reply.extend(results);
        reply
    }

    fn operation(&mut self, op: nfs_opnum4, handles: &mut Handles, src: &mut Cursor<&[u8]>) -> OpResult {
        use nfs_opnum4::*;
        match op {
            OP_PUTROOTFH => {
                self.fault(op)?;
                handles.current = Some(ROOT_ID);
                Ok(Vec::new())
            }
            OP_PUTFH => {
                let fh: nfs_fh4 = args(src)?;
                self.fault(op)?;
                handles.current = Some(self.resolve_handle(&fh)?);
                Ok(Vec::new())
            }
            OP_GETFH => {
                self.fault(op)?;
                Ok(body(&self.handle(handles.current()?)))
            }
            OP_SAVEFH => {
                handles.saved = Some(handles.current()?);
                Ok(Vec::new())
            }
            OP_RESTOREFH => {
                handles.current = Some(handles.saved.ok_or(nfsstat4::NFS4ERR_RESTOREFH)?);
                Ok(Vec::new())
            }
            OP_GETATTR => {
                let request: GETATTR4args = args(src)?;
                self.fault(op)?;
                Ok(body(&self.attrs(handles.current()?, &request.attr_request)?))
            }
            OP_VERIFY => {
                let request: VERIFY4args = args(src)?;
                let current =
                    self.attrs(handles.current()?, &request.obj_attributes.bitmap())?;
                if current == request.obj_attributes {
                    Ok(Vec::new())
                } else {
                    Err(nfsstat4::NFS4ERR_NOT_SAME.into())
                }
            }
            OP_LOOKUP => {
                let request: LOOKUP4args = args(src)?;
                self.fault(op)?;
                let child = self.child(handles.current()?, &request.objname)?;
                handles.current = Some(child.ok_or(nfsstat4::NFS4ERR_NOENT)?);
                Ok(Vec::new())
            }
            OP_LOOKUPP => {
                let id = handles.current()?;
                self.entries(id)?;
                if id == ROOT_ID {
                    return Err(nfsstat4::NFS4ERR_NOENT.into());
                }
                handles.current = Some(self.node(id)?.parent);
                Ok(Vec::new())
            }
            OP_ACCESS => {
                let mask: u32 = args(src)?;
                let node = self.node(handles.current()?)?;
                let mut granted = ACCESS4_READ | ACCESS4_LOOKUP | ACCESS4_EXECUTE;
                if node.mode & 0o200 != 0 {
                    granted |= ACCESS4_MODIFY | ACCESS4_EXTEND | ACCESS4_DELETE;
                }
                if node.mode & 0o100 == 0 {
                    granted &= !ACCESS4_EXECUTE;
                }
                Ok(body(&ACCESS4resok { supported: mask, access: mask & granted }))
            }
            OP_READDIR => {
                let request: READDIR4args = args(src)?;
                self.fault(op)?;
                self.read_dir(handles.current()?, &request)
            }
            OP_READLINK => match &self.node(handles.current()?)?.content {
                Content::Symlink(link) => Ok(body(&READLINK4resok { link: link.clone() })),
                _ => Err(nfsstat4::NFS4ERR_INVAL.into()),
            },
            OP_CREATE => {
                let request: CREATE4args = args(src)?;
                self.fault(op)?;
                let mode = request.createattrs.values.iter().find_map(|v| match v {
                    AttrValue::Mode(mode) => Some(*mode),
                    _ => None,
                });
                let content = match request.objtype {
                    createtype4::NF4DIR => Content::Dir(BTreeMap::new()),
                    createtype4::NF4LNK(target) => Content::Symlink(target),
                    _ => return Err(nfsstat4::NFS4ERR_BADTYPE.into()),
                };
                let (id, cinfo) =
                    self.insert_node(handles.current()?, &request.objname, content, mode.unwrap_or(0o755))?;
                handles.current = Some(id);
                Ok(body(&CREATE4resok { cinfo, attrset: request.createattrs.bitmap() }))
            }
            OP_REMOVE => {
                let request: REMOVE4args = args(src)?;
                self.fault(op)?;
                let dir = handles.current()?;
                let id = self.child(dir, &request.target)?.ok_or(nfsstat4::NFS4ERR_NOENT)?;
                if let Content::Dir(entries) = &self.node(id)?.content {
                    if !entries.is_empty() {
                        return Err(nfsstat4::NFS4ERR_NOTEMPTY.into());
                    }
                }
                let cinfo = self.modify_dir(dir, |entries| {
                    entries.remove(&request.target);
                })?;
                let node = self.node_mut(id)?;
                node.nlink = node.nlink.saturating_sub(1);
                if node.nlink == 0 || matches!(node.content, Content::Dir(_)) {
                    self.nodes.remove(&id);
                }
                Ok(body(&cinfo))
            }
            OP_RENAME => {
                let request: RENAME4args = args(src)?;
                self.fault(op)?;
                let from = handles.saved.ok_or(nfsstat4::NFS4ERR_NOFILEHANDLE)?;
                let to = handles.current()?;
                let id = self.child(from, &request.oldname)?.ok_or(nfsstat4::NFS4ERR_NOENT)?;
                self.entries(to)?;
                let source_cinfo = self.modify_dir(from, |entries| {
                    entries.remove(&request.oldname);
                })?;
                let target_cinfo = self.modify_dir(to, |entries| {
                    entries.insert(request.newname.clone(), id);
                })?;
                self.node_mut(id)?.parent = to;
                Ok(body(&RENAME4resok { source_cinfo, target_cinfo }))
            }
            OP_LINK => {
                let request: LINK4args = args(src)?;
                let target = handles.saved.ok_or(nfsstat4::NFS4ERR_NOFILEHANDLE)?;
                let dir = handles.current()?;
                if matches!(self.node(target)?.content, Content::Dir(_)) {
                    return Err(nfsstat4::NFS4ERR_ISDIR.into());
                }
                if self.child(dir, &request.newname)?.is_some() {
                    return Err(nfsstat4::NFS4ERR_EXIST.into());
                }
                let cinfo = self.modify_dir(dir, |entries| {
                    entries.insert(request.newname.clone(), target);
                })?;
                self.node_mut(target)?.nlink += 1;
                Ok(body(&cinfo))
            }
            OP_SETATTR => {
                let request: SETATTR4args = args(src)?;
                let with_empty_set = |failure: Failure| Failure {
                    body: body(&Bitmap::new()),
                    ..failure
                };
                self.fault(op).map_err(with_empty_set)?;
                let id = handles.current().map_err(with_empty_set)?;
                self.check_io_stateid(&request.stateid, id).map_err(with_empty_set)?;
                let node = self.node_mut(id).map_err(with_empty_set)?;
                for value in &request.obj_attributes.values {
                    match value {
                        AttrValue::Mode(mode) => node.mode = *mode,
                        AttrValue::Size(size) => match &mut node.content {
                            Content::File(data) => data.resize(*size as usize, 0),
                            _ => return Err(with_empty_set(nfsstat4::NFS4ERR_ISDIR.into())),
                        },
                        _ => {}
                    }
                }
                node.change += 1;
                Ok(body(&request.obj_attributes.bitmap()))
            }
            OP_READ => {
                let request: READ4args = args(src)?;
                self.fault(op)?;
                let id = handles.current()?;
                self.check_io_stateid(&request.stateid, id)?;
                let Content::File(data) = &self.node(id)?.content else {
                    return Err(nfsstat4::NFS4ERR_ISDIR.into());
                };
                let start = (request.offset as usize).min(data.len());
                let end = (start + request.count as usize).min(data.len());
                Ok(body(&READ4resok { eof: end == data.len(), data: data[start..end].to_vec() }))
            }
            OP_WRITE => {
                let request: WRITE4args = args(src)?;
                self.fault(op)?;
                let id = handles.current()?;
                self.check_io_stateid(&request.stateid, id)?;
                let verifier = self.write_verifier;
                let node = self.node_mut(id)?;
                let Content::File(data) = &mut node.content else {
                    return Err(nfsstat4::NFS4ERR_ISDIR.into());
                };
                let start = request.offset as usize;
                let end = start + request.data.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(&request.data);
                node.change += 1;
                Ok(body(&WRITE4resok {
                    count: request.data.len() as u32,
                    committed: stable_how4::UNSTABLE4,
                    writeverf: verifier,
                }))
            }
            OP_COMMIT => {
                let _request: COMMIT4args = args(src)?;
                self.fault(op)?;
                handles.current()?;
                Ok(body(&self.write_verifier))
            }
            OP_OPEN => {
                let request: OPEN4args = args(src)?;
                self.open(handles, request)
            }
            OP_OPEN_CONFIRM => {
                let request: OPEN_CONFIRM4args = args(src)?;
                let owner = self.open_record(&request.open_stateid)?.owner.clone();
                self.sequenced(op, &owner, request.seqid)?;
                if let Some(record) = self.owners.get_mut(&owner) {
                    record.confirmed = true;
                }
                let record = self
                    .opens
                    .get_mut(&request.open_stateid.other)
                    .ok_or(nfsstat4::NFS4ERR_BAD_STATEID)?;
                record.seqid += 1;
                Ok(body(&stateid4 { seqid: record.seqid, other: request.open_stateid.other }))
            }
            OP_CLOSE => {
                let request: CLOSE4args = args(src)?;
                let owner = self.open_record(&request.open_stateid)?.owner.clone();
                self.sequenced(op, &owner, request.seqid)?;
                let record = self
                    .opens
                    .remove(&request.open_stateid.other)
                    .ok_or(nfsstat4::NFS4ERR_BAD_STATEID)?;
                Ok(body(&stateid4 { seqid: record.seqid + 1, other: request.open_stateid.other }))
            }
            OP_LOCK => {
                let request: LOCK4args = args(src)?;
                self.lock(handles.current()?, request)
            }
            OP_LOCKT => {
                let request: LOCKT4args = args(src)?;
                let id = handles.current()?;
                self.check_client(request.owner.clientid)?;
                let owner = (request.owner.clientid, request.owner.owner);
                match self.conflict(id, &owner, request.locktype.is_write(), request.offset, request.length) {
                    Some(denied) => Err(Failure { status: nfsstat4::NFS4ERR_DENIED, body: body(&denied) }),
                    None => Ok(Vec::new()),
                }
            }
            OP_LOCKU => {
                let request: LOCKU4args = args(src)?;
                self.check_stateid(&request.lock_stateid)?;
                let (file, owner) = match self.lock_states.get(&request.lock_stateid.other) {
                    Some(state) => (state.file, state.owner.clone()),
                    None => return Err(nfsstat4::NFS4ERR_BAD_STATEID.into()),
                };
                self.sequenced(op, &owner, request.seqid)?;
                self.unlock(file, &owner, request.offset, request.length);
                let state = self
                    .lock_states
                    .get_mut(&request.lock_stateid.other)
                    .ok_or(nfsstat4::NFS4ERR_BAD_STATEID)?;
                state.seqid += 1;
                Ok(body(&stateid4 { seqid: state.seqid, other: request.lock_stateid.other }))
            }
            OP_RELEASE_LOCKOWNER => {
                let request: RELEASE_LOCKOWNER4args = args(src)?;
                let owner = (request.lock_owner.clientid, request.lock_owner.owner);
                if self.locks.iter().any(|l| l.owner == owner) {
                    return Err(nfsstat4::NFS4ERR_LOCKS_HELD.into());
                }
                self.lock_states.retain(|_, state| state.owner != owner);
                self.owners.remove(&owner);
                Ok(Vec::new())
            }
            OP_SETCLIENTID => {
                let _request: SETCLIENTID4args = args(src)?;
                self.fault(op)?;
                let clientid = (u64::from(self.boot) << 32) | u64::from(self.next_client);
                self.next_client += 1;
                self.clients.insert(clientid, false);
                Ok(body(&SETCLIENTID4resok {
                    clientid,
                    setclientid_confirm: clientid.to_be_bytes(),
                }))
            }
            OP_SETCLIENTID_CONFIRM => {
                let request: SETCLIENTID_CONFIRM4args = args(src)?;
                self.check_client(request.clientid)?;
                if request.setclientid_confirm != request.clientid.to_be_bytes() {
                    return Err(nfsstat4::NFS4ERR_STALE_CLIENTID.into());
                }
                self.clients.insert(request.clientid, true);
                Ok(Vec::new())
            }
            OP_RENEW => {
                let request: RENEW4args = args(src)?;
                self.fault(op)?;
                self.check_client(request.clientid)?;
                Ok(Vec::new())
            }
            _ => Err(nfsstat4::NFS4ERR_NOTSUPP.into()),
        }
    }

    fn read_dir(&self, dir: u64, request: &READDIR4args) -> OpResult {
        let entries = self.entries(dir)?;
        let start = request.cookie as usize;
        if start > entries.len() {
            return Err(nfsstat4::NFS4ERR_BAD_COOKIE.into());
        }
        let mut reply = dirlist4::default();
        for (index, (name, id)) in entries.iter().enumerate().skip(start).take(self.config.readdir_page) {
            reply.entries.push(entry4 {
                cookie: index as u64 + 1,
                name: name.clone(),
                attrs: self.attrs(*id, &request.attr_request)?,
            });
        }
        reply.eof = start + reply.entries.len() >= entries.len();
        Ok(body(&READDIR4resok { cookieverf: [0; NFS4_VERIFIER_SIZE], reply }))
    }

    fn open(&mut self, handles: &mut Handles, request: OPEN4args) -> OpResult {
        self.check_client(request.owner.clientid)?;
        let owner = (request.owner.clientid, request.owner.owner.clone());
        self.sequenced(nfs_opnum4::OP_OPEN, &owner, request.seqid)?;

        let (file, cinfo, attrset) = match request.claim {
            open_claim4::CLAIM_NULL(name) => {
                let dir = handles.current()?;
                let existing = self.child(dir, &name)?;
                let unchanged = {
                    let change = self.node(dir)?.change;
                    change_info4 { atomic: true, before: change, after: change }
                };
                match (request.openhow, existing) {
                    (openflag4::OPEN4_NOCREATE, None) => return Err(nfsstat4::NFS4ERR_NOENT.into()),
                    (openflag4::OPEN4_NOCREATE, Some(id)) => (id, unchanged, Bitmap::new()),
                    (openflag4::OPEN4_CREATE(createhow4::GUARDED4(_)), Some(_))
                    | (openflag4::OPEN4_CREATE(createhow4::EXCLUSIVE4(_)), Some(_)) => {
                        return Err(nfsstat4::NFS4ERR_EXIST.into())
                    }
                    (openflag4::OPEN4_CREATE(createhow4::UNCHECKED4(attrs)), Some(id)) => {
                        if attrs.size() == Some(0) {
                            if let Content::File(data) = &mut self.node_mut(id)?.content {
                                data.clear();
                            }
                        }
                        (id, unchanged, attrs.bitmap())
                    }
                    (openflag4::OPEN4_CREATE(how), None) => {
                        let attrs = match how {
                            createhow4::UNCHECKED4(attrs) | createhow4::GUARDED4(attrs) => attrs,
                            createhow4::EXCLUSIVE4(_) => fattr4::default(),
                        };
                        let mode = attrs
                            .values
                            .iter()
                            .find_map(|v| match v {
                                AttrValue::Mode(mode) => Some(*mode),
                                _ => None,
                            })
                            .unwrap_or(0o644);
                        let (id, cinfo) = self.insert_node(dir, &name, Content::File(Vec::new()), mode)?;
                        (id, cinfo, attrs.bitmap())
                    }
                }
            }
            open_claim4::CLAIM_PREVIOUS(_) => {
                if !self.grace {
                    return Err(nfsstat4::NFS4ERR_NO_GRACE.into());
                }
                (handles.current()?, change_info4::default(), Bitmap::new())
            }
        };
        match self.node(file)?.content {
            Content::File(_) => {}
            Content::Dir(_) if self.config.open_dirs => {}
            Content::Dir(_) => return Err(nfsstat4::NFS4ERR_ISDIR.into()),
            Content::Symlink(_) => return Err(nfsstat4::NFS4ERR_SYMLINK.into()),
        }
        handles.current = Some(file);

        let existing = self
            .opens
            .iter_mut()
            .find(|(_, open)| open.file == file && open.owner == owner);
        let stateid = match existing {
            Some((other, open)) => {
                open.access |= request.share_access;
                open.seqid += 1;
                stateid4 { seqid: open.seqid, other: *other }
            }
            None => {
                let stateid = self.new_stateid();
                self.opens.insert(
                    stateid.other,
                    OpenRecord { file, owner: owner.clone(), access: request.share_access, seqid: 1 },
                );
                stateid
            }
        };
        let confirmed = self.owners.get(&owner).is_some_and(|o| o.confirmed);
        let rflags = if confirmed { 0 } else { OPEN4_RESULT_CONFIRM };
        Ok(body(&OPEN4resok {
            stateid,
            cinfo,
            rflags: rflags | OPEN4_RESULT_LOCKTYPE_POSIX,
            attrset,
            delegation: open_delegation4::OPEN_DELEGATE_NONE,
        }))
    }

    fn lock(&mut self, file: u64, request: LOCK4args) -> OpResult {
        let (owner, other) = match &request.locker {
            locker4::NewLockOwner(new) => {
                let open_owner = self.open_record(&new.open_stateid)?.owner.clone();
                self.sequence(&open_owner, new.open_seqid)?;
                let owner = (new.lock_owner.clientid, new.lock_owner.owner.clone());
                self.owners.remove(&owner);
                self.sequence(&owner, new.lock_seqid)?;
                (owner, None)
            }
            locker4::ExistingLockOwner(existing) => {
                self.check_stateid(&existing.lock_stateid)?;
                let owner = match self.lock_states.get(&existing.lock_stateid.other) {
                    Some(state) => state.owner.clone(),
                    None => return Err(nfsstat4::NFS4ERR_BAD_STATEID.into()),
                };
                self.sequence(&owner, existing.lock_seqid)?;
                (owner, Some(existing.lock_stateid.other))
            }
        };
        self.fault(nfs_opnum4::OP_LOCK)?;
        if request.reclaim && !self.grace {
            return Err(nfsstat4::NFS4ERR_NO_GRACE.into());
        }
        let write = request.locktype.is_write();
        if let Some(denied) = self.conflict(file, &owner, write, request.offset, request.length) {
            return Err(Failure { status: nfsstat4::NFS4ERR_DENIED, body: body(&denied) });
        }

        self.unlock(file, &owner, request.offset, request.length);
        self.locks.push(LockRecord {
            file,
            owner: owner.clone(),
            write,
            offset: request.offset,
            length: request.length,
        });
        let stateid = match other.and_then(|other| self.lock_states.get_mut(&other).map(|s| (other, s))) {
            Some((other, state)) => {
                state.seqid += 1;
                stateid4 { seqid: state.seqid, other }
            }
            None => {
                let stateid = self.new_stateid();
                self.lock_states.insert(stateid.other, LockStateRecord { file, owner, seqid: 1 });
                stateid
            }
        };
        Ok(body(&stateid))
    }
}

/// Handle of a running mock server; dropping it stops the server.
pub struct MockServer {
    pub address: ServerAddress,
    state: Arc<Mutex<ServerState>>,
    shutdown: CancellationToken,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(MockConfig::default()).await
    }

    pub async fn start_with(config: MockConfig) -> Self {
        init_tracing();
        let listener =
            TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.expect("bind mock server");
        let local: SocketAddr = listener.local_addr().expect("mock server address");
        let state = Arc::new(Mutex::new(ServerState::new(config)));
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, state.clone(), shutdown.clone()));
        Self { address: ServerAddress::new(local, Protocol::Tcp), state, shutdown }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().expect("mock server state")
    }

    /// Options for a client of this server: short timeouts and retry delays.
    pub fn options(&self) -> MountOptions {
        MountOptions::default()
            .with_port(self.address.address.port())
            .with_timeout(Duration::from_secs(2), 2)
            .with_retry(5, Duration::from_millis(10))
            .with_lock_retry_delay(Duration::from_millis(20))
    }

    pub async fn connect(&self) -> Arc<Nfs4Client> {
        self.connect_with(self.options()).await
    }

    pub async fn connect_with(&self, options: MountOptions) -> Arc<Nfs4Client> {
        Nfs4Client::connect(self.address, options).await.expect("connect to mock server")
    }

    /// Connects and mounts the server's root.
    pub async fn mount(&self) -> (Arc<Nfs4Client>, Arc<FileSystem>) {
        let client = self.connect().await;
        let fs = client.mount("/").await.expect("mount mock export");
        (client, fs)
    }

    /// Number of times `op` was received.
    pub fn count(&self, op: nfs_opnum4) -> usize {
        self.state().counts.get(&op).copied().unwrap_or(0)
    }

    pub fn reset_counts(&self) {
        self.state().counts.clear();
    }

    /// Answers the next `times` occurrences of `op` with `status`.
    pub fn inject(&self, op: nfs_opnum4, status: nfsstat4, times: usize) {
        self.state().faults.entry(op).or_default().extend(std::iter::repeat(status).take(times));
    }

    /// Swallows the next `count` replies.
    pub fn drop_replies(&self, count: usize) {
        self.state().drop_replies += count;
    }

    pub fn add_dir(&self, path: &str) -> u64 {
        let mut state = self.state();
        let (parent, name) = ServerState::split_path(path);
        let dir = state.lookup_path(parent).expect("parent exists");
        let (id, _) = state
            .insert_node(dir, name, Content::Dir(BTreeMap::new()), 0o755)
            .expect("add directory");
        id
    }

    pub fn add_file(&self, path: &str, data: &[u8]) -> u64 {
        let mut state = self.state();
        let (parent, name) = ServerState::split_path(path);
        let dir = state.lookup_path(parent).expect("parent exists");
        let (id, _) = state
            .insert_node(dir, name, Content::File(data.to_vec()), 0o644)
            .expect("add file");
        id
    }

    /// Adds a directory that belongs to another filesystem.
    pub fn add_foreign_dir(&self, path: &str) -> u64 {
        let id = self.add_dir(path);
        self.state().nodes.get_mut(&id).expect("new node").fsid = FOREIGN_FSID;
        id
    }

    /// Removes `path` behind the client's back.
    pub fn remove(&self, path: &str) {
        let mut state = self.state();
        let (parent, name) = ServerState::split_path(path);
        let dir = state.lookup_path(parent).expect("parent exists");
        let name = name.to_string();
        state
            .modify_dir(dir, |entries| {
                entries.remove(&name);
            })
            .expect("remove entry");
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state().lookup_path(path).is_some()
    }

    pub fn file_data(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state();
        let id = state.lookup_path(path)?;
        match &state.nodes.get(&id)?.content {
            Content::File(data) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn set_mode(&self, path: &str, mode: u32) {
        let mut state = self.state();
        let id = state.lookup_path(path).expect("path exists");
        state.nodes.get_mut(&id).expect("node").mode = mode;
    }

    /// Change attribute of `path`.
    pub fn change(&self, path: &str) -> u64 {
        let state = self.state();
        let id = state.lookup_path(path).expect("path exists");
        state.nodes[&id].change
    }

    /// Number of open stateids.
    pub fn open_count(&self) -> usize {
        self.state().opens.len()
    }

    /// Number of locked ranges held by any owner.
    pub fn lock_count(&self) -> usize {
        self.state().locks.len()
    }

    /// Share access of the open on `path`, if any.
    pub fn open_access(&self, path: &str) -> Option<u32> {
        let state = self.state();
        let id = state.lookup_path(path)?;
        state.opens.values().find(|o| o.file == id).map(|o| o.access)
    }

    /// Locks a range of `path` on behalf of another client.
    pub fn hold_lock(&self, path: &str, offset: u64, length: u64) {
        let mut state = self.state();
        let file = state.lookup_path(path).expect("path exists");
        state.locks.push(LockRecord {
            file,
            owner: (0, b"other-client".to_vec()),
            write: true,
            offset,
            length,
        });
    }

    pub fn release_held_locks(&self) {
        self.state().locks.retain(|l| l.owner.0 != 0);
    }

    /// Reboots the server: all client and open state is lost and a grace
    /// period for reclaims begins.
    pub fn restart(&self) {
        let mut state = self.state();
        state.boot += 1;
        state.clients.clear();
        state.owners.clear();
        state.opens.clear();
        state.lock_states.clear();
        state.locks.retain(|l| l.owner.0 == 0);
        state.grace = true;
    }

    pub fn end_grace(&self) {
        self.state().grace = false;
    }

    /// Forgets all client state without a grace period, as after a lease
    /// expiry.
    pub fn expire_clients(&self) {
        self.restart();
        self.end_grace();
    }

    /// Invalidates every handle given out so far.
    pub fn expire_handles(&self) {
        self.state().handle_generation += 1;
    }

    /// Makes the next COMMIT report a different write verifier.
    pub fn lose_unstable_writes(&self) {
        self.state().write_verifier[0] ^= 0xff;
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve(listener: TcpListener, state: Arc<Mutex<ServerState>>, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        if let Ok((stream, _)) = accepted {
            tokio::spawn(serve_connection(stream, state.clone(), shutdown.clone()));
        }
    }
}

async fn serve_connection(stream: TcpStream, state: Arc<Mutex<ServerState>>, shutdown: CancellationToken) {
    let (mut reader, mut writer) = stream.into_split();
    loop {
        let record = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            record = read_record(&mut reader) => match record {
                Ok(record) => record,
                Err(_) => break,
            },
        };
        let reply = {
            let mut state = state.lock().expect("mock server state");
            let reply = handle_call(&mut state, &record);
            if state.drop_replies > 0 {
                state.drop_replies -= 1;
                continue;
            }
            reply
        };
        let Some(reply) = reply else { continue };
        if write_record(&mut writer, &reply).await.is_err() {
            break;
        }
    }
}

fn handle_call(state: &mut ServerState, record: &[u8]) -> Option<Vec<u8>> {
    let mut src = Cursor::new(record);
    let msg = deserialize::<rpc_msg>(&mut src).ok()?;
    let rpc_body::CALL(call) = msg.body else {
        return None;
    };
    if call.prog != PROGRAM || call.vers != VERSION {
        return None;
    }
    let mut reply = body(&make_success_reply(msg.xid));
    match call.proc {
        0 => {}
        1 => reply.extend(state.compound(&mut src)),
        _ => return None,
    }
    Some(reply)
}

//! Client id establishment and lease renewal: SETCLIENTID,
//! SETCLIENTID_CONFIRM and RENEW.

use std::io::Read;

use super::*;

/// Long-lived client identity: a boot verifier plus an opaque name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct nfs_client_id4 {
    pub verifier: verifier4,
    pub id: Vec<u8>,
}
SerializeStruct!(nfs_client_id4, verifier, id);

impl Deserialize for nfs_client_id4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.verifier.deserialize(src)?;
        self.id.deserialize(src)?;
        if self.id.len() > NFS4_OPAQUE_LIMIT {
            return Err(invalid_data("client id longer than NFS4_OPAQUE_LIMIT"));
        }
        Ok(())
    }
}

/// Universal network address of a callback endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct clientaddr4 {
    pub r_netid: String,
    pub r_addr: String,
}
SerializeStruct!(clientaddr4, r_netid, r_addr);
DeserializeStruct!(clientaddr4, r_netid, r_addr);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct cb_client4 {
    pub cb_program: u32,
    pub cb_location: clientaddr4,
}
SerializeStruct!(cb_client4, cb_program, cb_location);
DeserializeStruct!(cb_client4, cb_program, cb_location);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SETCLIENTID4args {
    pub client: nfs_client_id4,
    pub callback: cb_client4,
    pub callback_ident: u32,
}
SerializeStruct!(SETCLIENTID4args, client, callback, callback_ident);
DeserializeStruct!(SETCLIENTID4args, client, callback, callback_ident);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SETCLIENTID4resok {
    pub clientid: clientid4,
    pub setclientid_confirm: verifier4,
}
SerializeStruct!(SETCLIENTID4resok, clientid, setclientid_confirm);
DeserializeStruct!(SETCLIENTID4resok, clientid, setclientid_confirm);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SETCLIENTID_CONFIRM4args {
    pub clientid: clientid4,
    pub setclientid_confirm: verifier4,
}
SerializeStruct!(SETCLIENTID_CONFIRM4args, clientid, setclientid_confirm);
DeserializeStruct!(SETCLIENTID_CONFIRM4args, clientid, setclientid_confirm);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RENEW4args {
    pub clientid: clientid4,
}
SerializeStruct!(RENEW4args, clientid);
DeserializeStruct!(RENEW4args, clientid);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RELEASE_LOCKOWNER4args {
    pub lock_owner: lock_owner4,
}
SerializeStruct!(RELEASE_LOCKOWNER4args, lock_owner);
DeserializeStruct!(RELEASE_LOCKOWNER4args, lock_owner);

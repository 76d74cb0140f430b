//! Codec for the two WAL record kinds, discriminated by the first body
//! byte.
//!
//! - INSERT: `[0 | xid(8) | pgno(4) | off(2) | wrapped item bytes]`
//! - UPDATE: `[1 | xid(8) | uid(8) | old payload | new payload]`, the two
//!   payloads of equal length.

use crate::{Pgno, Uid, Xid};

const TYPE_INSERT: u8 = 0;
const TYPE_UPDATE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WalRecord {
    Insert {
        xid: Xid,
        pgno: Pgno,
        off: u16,
        raw: Vec<u8>,
    },
    Update {
        xid: Xid,
        uid: Uid,
        old: Vec<u8>,
        new: Vec<u8>,
    },
}

impl WalRecord {
    pub fn xid(&self) -> Xid {
        match self {
            WalRecord::Insert { xid, .. } | WalRecord::Update { xid, .. } => *xid,
        }
    }

    /// The page this record touches.
    pub fn pgno(&self) -> Pgno {
        match self {
            WalRecord::Insert { pgno, .. } => *pgno,
            WalRecord::Update { uid, .. } => uid.pgno(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            WalRecord::Insert { xid, pgno, off, raw } => {
                let mut out = Vec::with_capacity(15 + raw.len());
                out.push(TYPE_INSERT);
                out.extend_from_slice(&xid.to_le_bytes());
                out.extend_from_slice(&pgno.to_le_bytes());
                out.extend_from_slice(&off.to_le_bytes());
                out.extend_from_slice(raw);
                out
            }
            WalRecord::Update { xid, uid, old, new } => {
                debug_assert_eq!(old.len(), new.len());
                let mut out = Vec::with_capacity(17 + old.len() + new.len());
                out.push(TYPE_UPDATE);
                out.extend_from_slice(&xid.to_le_bytes());
                out.extend_from_slice(&uid.raw().to_le_bytes());
                out.extend_from_slice(old);
                out.extend_from_slice(new);
                out
            }
        }
    }

    /// Decodes a record body; `None` if malformed.
    pub fn decode(body: &[u8]) -> Option<WalRecord> {
        match *body.first()? {
            TYPE_INSERT => {
                if body.len() < 15 {
                    return None;
                }
                let xid = u64::from_le_bytes(body[1..9].try_into().unwrap());
                let pgno = u32::from_le_bytes(body[9..13].try_into().unwrap());
                let off = u16::from_le_bytes(body[13..15].try_into().unwrap());
                Some(WalRecord::Insert {
                    xid,
                    pgno,
                    off,
                    raw: body[15..].to_vec(),
                })
            }
            TYPE_UPDATE => {
                if body.len() < 17 || (body.len() - 17) % 2 != 0 {
                    return None;
                }
                let xid = u64::from_le_bytes(body[1..9].try_into().unwrap());
                let uid = Uid(u64::from_le_bytes(body[9..17].try_into().unwrap()));
                let half = (body.len() - 17) / 2;
                Some(WalRecord::Update {
                    xid,
                    uid,
                    old: body[17..17 + half].to_vec(),
                    new: body[17 + half..].to_vec(),
                })
            }
            _ => None,
        }
    }
}

//! Persistent table and field metadata.
//!
//! A table is a VM record `[name | next_table_uid(8) | field_uid(8)*]`,
//! created under the creating transaction's xid; tables chain newest-first
//! from the boot uid. A field is its own record
//! `[name | type | index_boot_uid(8)]`, the boot uid 0 when the field
//! carries no index.

use std::sync::Arc;

use shaledb_core::btree::BTree;
use shaledb_core::vm::VersionManager;
use shaledb_core::{Error, Uid, Xid, SUPER_XID};

use crate::ast::CreateTable;
use crate::error::{Result, SqlError};
use crate::value::{FieldType, Value};

pub(crate) struct Field {
    pub uid: Uid,
    pub name: String,
    pub ftype: FieldType,
    pub index: Option<BTree>,
}

impl Field {
    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    fn encode(name: &str, ftype: FieldType, index_boot: Uid) -> Vec<u8> {
        let mut rec = Vec::new();
        Value::Str(name.to_string()).encode(&mut rec);
        Value::Str(ftype.name().to_string()).encode(&mut rec);
        rec.extend_from_slice(&index_boot.raw().to_le_bytes());
        rec
    }

    fn create(
        vm: &Arc<VersionManager>,
        xid: Xid,
        name: &str,
        ftype: FieldType,
        indexed: bool,
    ) -> Result<Field> {
        let index_boot = if indexed {
            BTree::create(vm.dm())?
        } else {
            Uid::NULL
        };
        let uid = vm.insert(xid, &Self::encode(name, ftype, index_boot))?;
        let index = if index_boot.is_null() {
            None
        } else {
            Some(BTree::load(vm.dm().clone(), index_boot)?)
        };
        Ok(Field {
            uid,
            name: name.to_string(),
            ftype,
            index,
        })
    }

    fn load(vm: &Arc<VersionManager>, uid: Uid) -> Result<Field> {
        let rec = vm.read(SUPER_XID, uid)?.ok_or(Error::NullEntry)?;
        let mut cursor = rec.as_slice();
        let Value::Str(name) = Value::decode(FieldType::Str, &mut cursor)? else {
            unreachable!()
        };
        let Value::Str(type_name) = Value::decode(FieldType::Str, &mut cursor)? else {
            unreachable!()
        };
        let ftype = FieldType::parse(&type_name)?;
        if cursor.len() != 8 {
            return Err(SqlError::InvalidValues);
        }
        let index_boot = Uid(u64::from_le_bytes(cursor.try_into().unwrap()));
        let index = if index_boot.is_null() {
            None
        } else {
            Some(BTree::load(vm.dm().clone(), index_boot)?)
        };
        Ok(Field {
            uid,
            name,
            ftype,
            index,
        })
    }
}

pub(crate) struct Table {
    pub uid: Uid,
    pub name: String,
    pub fields: Vec<Field>,
}

/// One link of the on-disk table chain: the next pointer is readable even
/// when the entry itself is not visible (dropped or never committed).
pub(crate) struct TableChain {
    pub next: Uid,
    pub table: Option<Table>,
}

impl Table {
    pub fn create(
        vm: &Arc<VersionManager>,
        xid: Xid,
        stmt: &CreateTable,
        next: Uid,
    ) -> Result<Table> {
        let mut fields = Vec::with_capacity(stmt.fields.len());
        for (name, ftype) in &stmt.fields {
            let indexed = stmt.indexed.iter().any(|f| f == name);
            fields.push(Field::create(vm, xid, name, *ftype, indexed)?);
        }

        let mut rec = Vec::new();
        Value::Str(stmt.name.clone()).encode(&mut rec);
        rec.extend_from_slice(&next.raw().to_le_bytes());
        for field in &fields {
            rec.extend_from_slice(&field.uid.raw().to_le_bytes());
        }
        let uid = vm.insert(xid, &rec)?;
        Ok(Table {
            uid,
            name: stmt.name.clone(),
            fields,
        })
    }

    /// Loads the chain link at `uid`. The entry's fields are only loaded
    /// when it is visible to a read-committed observer: committed creator,
    /// no committed delete.
    pub fn load(vm: &Arc<VersionManager>, uid: Uid) -> Result<TableChain> {
        let (xmin, xmax, rec) = vm.read_raw(uid)?.ok_or(Error::NullEntry)?;
        let mut cursor = rec.as_slice();
        let Value::Str(name) = Value::decode(FieldType::Str, &mut cursor)? else {
            unreachable!()
        };
        if cursor.len() < 8 || (cursor.len() - 8) % 8 != 0 {
            return Err(SqlError::InvalidValues);
        }
        let next = Uid(u64::from_le_bytes(cursor[..8].try_into().unwrap()));

        let tm = vm.tm();
        let visible = tm.is_committed(xmin) && (xmax == 0 || !tm.is_committed(xmax));
        if !visible {
            return Ok(TableChain { next, table: None });
        }

        let mut fields = Vec::new();
        for chunk in cursor[8..].chunks_exact(8) {
            let field_uid = Uid(u64::from_le_bytes(chunk.try_into().unwrap()));
            fields.push(Field::load(vm, field_uid)?);
        }
        Ok(TableChain {
            next,
            table: Some(Table { uid, name, fields }),
        })
    }

    pub fn field_at(&self, name: &str) -> Result<(usize, &Field)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
            .ok_or_else(|| SqlError::FieldNotFound(name.to_string()))
    }

    /// Types the positional literals of an insert against the schema.
    pub fn type_row(&self, literals: &[String]) -> Result<Vec<Value>> {
        if literals.len() != self.fields.len() {
            return Err(SqlError::InvalidValues);
        }
        self.fields
            .iter()
            .zip(literals)
            .map(|(f, lit)| Value::parse(f.ftype, lit))
            .collect()
    }

    pub fn encode_row(&self, values: &[Value]) -> Vec<u8> {
        debug_assert_eq!(values.len(), self.fields.len());
        let mut rec = Vec::new();
        for value in values {
            value.encode(&mut rec);
        }
        rec
    }

    pub fn decode_row(&self, rec: &[u8]) -> Result<Vec<Value>> {
        let mut cursor = rec;
        let row = self
            .fields
            .iter()
            .map(|f| Value::decode(f.ftype, &mut cursor))
            .collect::<Result<Vec<Value>>>()?;
        if !cursor.is_empty() {
            return Err(SqlError::InvalidValues);
        }
        Ok(row)
    }

    /// Adds `uid` to the index of every indexed field, keyed by the row's
    /// values.
    pub fn index_row(&self, values: &[Value], uid: Uid) -> Result<()> {
        for (field, value) in self.fields.iter().zip(values) {
            if let Some(index) = &field.index {
                index.insert(value.key(), uid)?;
            }
        }
        Ok(())
    }
}

//! The table manager: catalog persistence and statement execution against
//! the storage engine.

use std::sync::Arc;

use itertools::Itertools;
use log::{debug, info};
use parking_lot::RwLock;

use shaledb_core::paths::DbBase;
use shaledb_core::vm::VersionManager;
use shaledb_core::{Uid, Xid};

use crate::ast::{CmpOp, Cond, CreateTable, Delete, DropTable, Insert, LogicOp, Select, Update};
use crate::error::{Result, SqlError};
use crate::value::Value;

mod boot;
mod table;

use boot::Booter;
use table::Table;

pub struct TableManager {
    vm: Arc<VersionManager>,
    booter: Booter,
    /// Visible tables, newest first. Mirrors the on-disk chain minus
    /// dropped and never-committed entries.
    tables: RwLock<Vec<Arc<Table>>>,
}

impl TableManager {
    pub fn create(base: &DbBase, vm: Arc<VersionManager>) -> Result<Self> {
        let booter = Booter::create(base)?;
        Ok(TableManager {
            vm,
            booter,
            tables: RwLock::new(Vec::new()),
        })
    }

    pub fn open(base: &DbBase, vm: Arc<VersionManager>) -> Result<Self> {
        let booter = Booter::open(base)?;
        let mut tables = Vec::new();
        let mut cur = booter.load()?;
        while !cur.is_null() {
            let chain = Table::load(&vm, cur)?;
            if let Some(table) = chain.table {
                debug!("loaded table {} ({:?})", table.name, table.uid);
                tables.push(Arc::new(table));
            }
            cur = chain.next;
        }
        info!("catalog loaded: {} tables", tables.len());
        Ok(TableManager {
            vm,
            booter,
            tables: RwLock::new(tables),
        })
    }

    pub fn vm(&self) -> &Arc<VersionManager> {
        &self.vm
    }

    fn find(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| SqlError::TableNotFound(name.to_string()))
    }

    pub fn show(&self) -> String {
        let tables = self.tables.read();
        if tables.is_empty() {
            return "no tables".to_string();
        }
        tables
            .iter()
            .map(|t| {
                let fields = t
                    .fields
                    .iter()
                    .map(|f| {
                        if f.is_indexed() {
                            format!("{} {} index", f.name, f.ftype.name())
                        } else {
                            format!("{} {}", f.name, f.ftype.name())
                        }
                    })
                    .join(", ");
                format!("{} ({})", t.name, fields)
            })
            .join("\n")
    }

    pub fn create_table(&self, xid: Xid, stmt: &CreateTable) -> Result<String> {
        if stmt.indexed.is_empty() {
            return Err(SqlError::TableNoIndex);
        }
        for indexed in &stmt.indexed {
            if !stmt.fields.iter().any(|(name, _)| name == indexed) {
                return Err(SqlError::FieldNotFound(indexed.clone()));
            }
        }

        let mut tables = self.tables.write();
        if tables.iter().any(|t| t.name == stmt.name) {
            return Err(SqlError::TableDuplicated(stmt.name.clone()));
        }
        let next = self.booter.load()?;
        let table = Table::create(&self.vm, xid, stmt, next)?;
        self.booter.update(table.uid)?;
        info!("created table {} ({:?})", table.name, table.uid);
        tables.insert(0, Arc::new(table));
        Ok(format!("create table {}", stmt.name))
    }

    pub fn drop_table(&self, xid: Xid, stmt: &DropTable) -> Result<String> {
        let table = self.find(&stmt.table)?;
        if !self.vm.delete(xid, table.uid)? {
            return Err(SqlError::TableNotFound(stmt.table.clone()));
        }
        self.tables.write().retain(|t| t.uid != table.uid);
        info!("dropped table {}", table.name);
        Ok(format!("drop table {}", stmt.table))
    }

    pub fn insert(&self, xid: Xid, stmt: &Insert) -> Result<String> {
        let table = self.find(&stmt.table)?;
        let values = table.type_row(&stmt.values)?;
        let uid = self.vm.insert(xid, &table.encode_row(&values))?;
        table.index_row(&values, uid)?;
        Ok("insert".to_string())
    }

    pub fn select(&self, xid: Xid, stmt: &Select) -> Result<String> {
        let table = self.find(&stmt.table)?;
        // Resolve the projection before touching any rows.
        let projection: Vec<usize> = stmt
            .fields
            .iter()
            .map(|name| table.field_at(name).map(|(at, _)| at))
            .collect::<Result<_>>()?;

        let mut lines = Vec::new();
        for uid in self.plan(&table, stmt.cond.as_ref())? {
            let Some(rec) = self.vm.read(xid, uid)? else {
                continue;
            };
            let row = table.decode_row(&rec)?;
            let line = if projection.is_empty() {
                row.iter().join("\t")
            } else {
                projection.iter().map(|&at| &row[at]).join("\t")
            };
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    pub fn update(&self, xid: Xid, stmt: &Update) -> Result<String> {
        let table = self.find(&stmt.table)?;
        let (at, field) = table.field_at(&stmt.field)?;
        let new_value = Value::parse(field.ftype, &stmt.value)?;

        let mut count = 0usize;
        for uid in self.plan(&table, stmt.cond.as_ref())? {
            let Some(rec) = self.vm.read(xid, uid)? else {
                continue;
            };
            if !self.vm.delete(xid, uid)? {
                continue;
            }
            let mut row = table.decode_row(&rec)?;
            row[at] = new_value.clone();
            let new_uid = self.vm.insert(xid, &table.encode_row(&row))?;
            table.index_row(&row, new_uid)?;
            count += 1;
        }
        Ok(format!("update {count}"))
    }

    pub fn delete(&self, xid: Xid, stmt: &Delete) -> Result<String> {
        let table = self.find(&stmt.table)?;
        let mut count = 0usize;
        for uid in self.plan(&table, Some(&stmt.cond))? {
            if self.vm.delete(xid, uid)? {
                count += 1;
            }
        }
        Ok(format!("delete {count}"))
    }

    /// Folds the where clause into key intervals over one indexed field and
    /// resolves them through its B+-tree. Without a clause, the first
    /// indexed field is scanned whole.
    fn plan(&self, table: &Table, cond: Option<&Cond>) -> Result<Vec<Uid>> {
        let Some(cond) = cond else {
            let field = table
                .fields
                .iter()
                .find(|f| f.is_indexed())
                .ok_or(SqlError::TableNoIndex)?;
            let index = field.index.as_ref().expect("indexed field has a tree");
            return Ok(index.search_range(i64::MIN, i64::MAX)?);
        };

        let (_, field) = table.field_at(&cond.first.field)?;
        let index = field
            .index
            .as_ref()
            .ok_or_else(|| SqlError::FieldNotIndexed(cond.first.field.clone()))?;

        let first = interval(cond.first.op, Value::parse(field.ftype, &cond.first.value)?.key());
        let intervals = match &cond.rest {
            None => vec![first],
            Some((op, second)) => {
                if second.field != cond.first.field {
                    return Err(SqlError::InvalidCommand(format!(
                        "where clause spans fields {} and {}",
                        cond.first.field, second.field
                    )));
                }
                let second = interval(second.op, Value::parse(field.ftype, &second.value)?.key());
                match op {
                    LogicOp::And => vec![intersect(first, second)],
                    LogicOp::Or => vec![first, second],
                }
            }
        };

        let mut uids = Vec::new();
        for (lo, hi) in intervals.into_iter().flatten() {
            uids.extend(index.search_range(lo, hi)?);
        }
        Ok(uids)
    }
}

type Interval = Option<(i64, i64)>;

fn interval(op: CmpOp, key: i64) -> Interval {
    match op {
        CmpOp::Eq => Some((key, key)),
        CmpOp::Lt => key.checked_sub(1).map(|hi| (i64::MIN, hi)),
        CmpOp::Gt => key.checked_add(1).map(|lo| (lo, i64::MAX)),
    }
}

fn intersect(a: Interval, b: Interval) -> Interval {
    let ((alo, ahi), (blo, bhi)) = (a?, b?);
    let (lo, hi) = (alo.max(blo), ahi.min(bhi));
    (lo <= hi).then_some((lo, hi))
}

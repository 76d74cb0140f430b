//! Per-session statement execution.
//!
//! A session carries at most one open transaction. Statements arriving
//! outside an explicit transaction run in an auto-committed one, aborted
//! if the statement fails.

use std::sync::Arc;

use log::debug;

use shaledb_core::vm::IsolationLevel;
use shaledb_core::Xid;

use crate::ast::Statement;
use crate::catalog::TableManager;
use crate::error::{Result, SqlError};
use crate::parser::parse;

pub struct Session {
    tbm: Arc<TableManager>,
    current: Option<Xid>,
}

impl Session {
    pub fn new(tbm: Arc<TableManager>) -> Session {
        Session { tbm, current: None }
    }

    /// Parses and executes one statement, returning its printable result.
    pub fn execute(&mut self, sql: &str) -> Result<Vec<u8>> {
        debug!("execute: {sql}");
        let stmt = parse(sql)?;
        let out = match stmt {
            Statement::Begin { level } => self.begin(level)?,
            Statement::Commit => self.commit()?,
            Statement::Abort => self.abort()?,
            stmt => {
                let vm = self.tbm.vm();
                let (xid, auto) = match self.current {
                    Some(xid) => (xid, false),
                    None => (vm.begin(IsolationLevel::ReadCommitted), true),
                };
                let res = self.run(xid, &stmt);
                if auto {
                    match res {
                        Ok(_) => vm.commit(xid)?,
                        Err(_) => vm.abort(xid),
                    }
                }
                res?
            }
        };
        Ok(out.into_bytes())
    }

    fn begin(&mut self, level: IsolationLevel) -> Result<String> {
        if self.current.is_some() {
            return Err(SqlError::NestedTransaction);
        }
        self.current = Some(self.tbm.vm().begin(level));
        Ok("begin".to_string())
    }

    fn commit(&mut self) -> Result<String> {
        let xid = self.current.ok_or(SqlError::NoTransaction)?;
        self.tbm.vm().commit(xid)?;
        self.current = None;
        Ok("commit".to_string())
    }

    fn abort(&mut self) -> Result<String> {
        let xid = self.current.take().ok_or(SqlError::NoTransaction)?;
        self.tbm.vm().abort(xid);
        Ok("abort".to_string())
    }

    fn run(&self, xid: Xid, stmt: &Statement) -> Result<String> {
        match stmt {
            Statement::Show => Ok(self.tbm.show()),
            Statement::Create(create) => self.tbm.create_table(xid, create),
            Statement::Insert(insert) => self.tbm.insert(xid, insert),
            Statement::Select(select) => self.tbm.select(xid, select),
            Statement::Update(update) => self.tbm.update(xid, update),
            Statement::Delete(delete) => self.tbm.delete(xid, delete),
            Statement::Drop(drop_table) => self.tbm.drop_table(xid, drop_table),
            Statement::Begin { .. } | Statement::Commit | Statement::Abort => unreachable!(),
        }
    }

    /// Ends the session, aborting any transaction left open. Called on
    /// client disconnect.
    pub fn close(&mut self) {
        if let Some(xid) = self.current.take() {
            debug!("session closed with open transaction {xid}, aborting");
            self.tbm.vm().abort(xid);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

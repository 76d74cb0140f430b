//! Statement AST produced by the parser.
//!
//! Value literals stay as strings here; they are typed against the table's
//! fields at execution time.

use shaledb_core::vm::IsolationLevel;

use crate::value::FieldType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Begin { level: IsolationLevel },
    Commit,
    Abort,
    Show,
    Create(CreateTable),
    Insert(Insert),
    Select(Select),
    Update(Update),
    Delete(Delete),
    Drop(DropTable),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    pub name: String,
    pub fields: Vec<(String, FieldType)>,
    pub indexed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    pub table: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub table: String,
    /// Empty means `*`.
    pub fields: Vec<String>,
    pub cond: Option<Cond>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub table: String,
    pub field: String,
    pub value: String,
    pub cond: Option<Cond>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub table: String,
    pub cond: Cond,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropTable {
    pub table: String,
}

/// A where clause: one comparison, or two over the same indexed field
/// joined by `and`/`or`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cond {
    pub first: Compare,
    pub rest: Option<(LogicOp, Compare)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compare {
    pub field: String,
    pub op: CmpOp,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Eq,
    Gt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

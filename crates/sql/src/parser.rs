//! Recursive-descent parser for the SQL dialect.

use shaledb_core::vm::IsolationLevel;

use crate::ast::*;
use crate::error::{Result, SqlError};
use crate::lexer::Tokens;
use crate::value::FieldType;

pub fn parse(input: &str) -> Result<Statement> {
    let mut toks = Tokens::new(input)?;
    let stmt = match toks.word()?.as_str() {
        "begin" => begin(&mut toks)?,
        "commit" => Statement::Commit,
        "abort" => Statement::Abort,
        "show" => Statement::Show,
        "create" => create(&mut toks)?,
        "insert" => insert(&mut toks)?,
        "select" => select(&mut toks)?,
        "update" => update(&mut toks)?,
        "delete" => delete(&mut toks)?,
        "drop" => drop_table(&mut toks)?,
        _ => return Err(toks.err()),
    };
    toks.expect_end()?;
    Ok(stmt)
}

fn begin(toks: &mut Tokens) -> Result<Statement> {
    if toks.at_end() {
        return Ok(Statement::Begin {
            level: IsolationLevel::ReadCommitted,
        });
    }
    toks.expect_word("isolation")?;
    toks.expect_word("level")?;
    let level = match toks.word()?.as_str() {
        "read" => {
            toks.expect_word("committed")?;
            IsolationLevel::ReadCommitted
        }
        "repeatable" => {
            toks.expect_word("read")?;
            IsolationLevel::RepeatableRead
        }
        _ => return Err(toks.err()),
    };
    Ok(Statement::Begin { level })
}

fn create(toks: &mut Tokens) -> Result<Statement> {
    toks.expect_word("table")?;
    let name = toks.ident()?;
    let mut fields = Vec::new();
    loop {
        let field = toks.ident()?;
        let ty = FieldType::parse(&toks.word()?)?;
        fields.push((field, ty));
        if toks.eat_sym(',') {
            continue;
        }
        if toks.eat_sym('(') {
            break;
        }
        return Err(if toks.at_end() {
            SqlError::TableNoIndex
        } else {
            toks.err()
        });
    }
    toks.expect_word("index")?;
    let mut indexed = Vec::new();
    loop {
        indexed.push(toks.ident()?);
        if toks.eat_sym(')') {
            break;
        }
        toks.eat_sym(',');
    }
    if indexed.is_empty() {
        return Err(SqlError::TableNoIndex);
    }
    Ok(Statement::Create(CreateTable {
        name,
        fields,
        indexed,
    }))
}

fn insert(toks: &mut Tokens) -> Result<Statement> {
    toks.expect_word("into")?;
    let table = toks.ident()?;
    toks.expect_word("values")?;
    let mut values = Vec::new();
    loop {
        values.push(toks.literal()?);
        if toks.at_end() {
            break;
        }
        toks.eat_sym(',');
    }
    Ok(Statement::Insert(Insert { table, values }))
}

fn select(toks: &mut Tokens) -> Result<Statement> {
    let mut fields = Vec::new();
    if !toks.eat_sym('*') {
        loop {
            fields.push(toks.ident()?);
            if !toks.eat_sym(',') {
                break;
            }
        }
    }
    toks.expect_word("from")?;
    let table = toks.ident()?;
    let cond = where_clause(toks)?;
    Ok(Statement::Select(Select {
        table,
        fields,
        cond,
    }))
}

fn update(toks: &mut Tokens) -> Result<Statement> {
    let table = toks.ident()?;
    toks.expect_word("set")?;
    let field = toks.ident()?;
    toks.expect_sym('=')?;
    let value = toks.literal()?;
    let cond = where_clause(toks)?;
    Ok(Statement::Update(Update {
        table,
        field,
        value,
        cond,
    }))
}

fn delete(toks: &mut Tokens) -> Result<Statement> {
    toks.expect_word("from")?;
    let table = toks.ident()?;
    let cond = where_clause(toks)?.ok_or_else(|| toks.err())?;
    Ok(Statement::Delete(Delete { table, cond }))
}

fn drop_table(toks: &mut Tokens) -> Result<Statement> {
    toks.expect_word("table")?;
    let table = toks.ident()?;
    Ok(Statement::Drop(DropTable { table }))
}

fn where_clause(toks: &mut Tokens) -> Result<Option<Cond>> {
    if toks.at_end() {
        return Ok(None);
    }
    toks.expect_word("where")?;
    let first = compare(toks)?;
    if toks.at_end() {
        return Ok(Some(Cond { first, rest: None }));
    }
    let op = match toks.word()?.as_str() {
        "and" => LogicOp::And,
        "or" => LogicOp::Or,
        other => return Err(SqlError::InvalidLogOp(other.to_string())),
    };
    let second = compare(toks)?;
    Ok(Some(Cond {
        first,
        rest: Some((op, second)),
    }))
}

fn compare(toks: &mut Tokens) -> Result<Compare> {
    let field = toks.ident()?;
    let op = match toks.pop()? {
        crate::lexer::Token::Sym('<') => CmpOp::Lt,
        crate::lexer::Token::Sym('=') => CmpOp::Eq,
        crate::lexer::Token::Sym('>') => CmpOp::Gt,
        _ => return Err(toks.err()),
    };
    let value = toks.literal()?;
    Ok(Compare { field, op, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn begin_variants() {
        assert_eq!(
            parse("begin").unwrap(),
            Statement::Begin {
                level: IsolationLevel::ReadCommitted
            }
        );
        assert_eq!(
            parse("begin isolation level read committed").unwrap(),
            Statement::Begin {
                level: IsolationLevel::ReadCommitted
            }
        );
        assert_eq!(
            parse("begin isolation level repeatable read").unwrap(),
            Statement::Begin {
                level: IsolationLevel::RepeatableRead
            }
        );
        assert!(parse("begin isolation level serializable").is_err());
    }

    #[test]
    fn create_table() {
        let stmt = parse("create table users name string, age int32 (index name, age)").unwrap();
        assert_eq!(
            stmt,
            Statement::Create(CreateTable {
                name: "users".into(),
                fields: vec![
                    ("name".into(), FieldType::Str),
                    ("age".into(), FieldType::Int32)
                ],
                indexed: vec!["name".into(), "age".into()],
            })
        );
    }

    #[test]
    fn create_without_index_clause_is_rejected() {
        assert!(matches!(
            parse("create table t a int32"),
            Err(SqlError::TableNoIndex)
        ));
    }

    #[test]
    fn unknown_field_type_is_rejected() {
        assert!(matches!(
            parse("create table t a float (index a)"),
            Err(SqlError::InvalidField(_))
        ));
    }

    #[test]
    fn insert_values() {
        let stmt = parse("insert into t values 'sam', 22, 5").unwrap();
        assert_eq!(
            stmt,
            Statement::Insert(Insert {
                table: "t".into(),
                values: vec!["sam".into(), "22".into(), "5".into()],
            })
        );
    }

    #[test]
    fn select_star_and_fields() {
        assert_eq!(
            parse("select * from t").unwrap(),
            Statement::Select(Select {
                table: "t".into(),
                fields: vec![],
                cond: None,
            })
        );
        let stmt = parse("select name, age from t where age > 20 and age < 30").unwrap();
        let Statement::Select(sel) = stmt else {
            panic!()
        };
        assert_eq!(sel.fields, vec!["name".to_string(), "age".to_string()]);
        let cond = sel.cond.unwrap();
        assert_eq!(cond.first.op, CmpOp::Gt);
        let (op, second) = cond.rest.unwrap();
        assert_eq!(op, LogicOp::And);
        assert_eq!(second.op, CmpOp::Lt);
    }

    #[test]
    fn update_and_delete() {
        assert_eq!(
            parse("update t set age = 23 where name = \"sam\"").unwrap(),
            Statement::Update(Update {
                table: "t".into(),
                field: "age".into(),
                value: "23".into(),
                cond: Some(Cond {
                    first: Compare {
                        field: "name".into(),
                        op: CmpOp::Eq,
                        value: "sam".into(),
                    },
                    rest: None,
                }),
            })
        );
        // Delete requires a where clause.
        assert!(parse("delete from t").is_err());
        assert!(parse("delete from t where age = 3").is_ok());
    }

    #[test]
    fn bad_logic_op() {
        assert!(matches!(
            parse("select * from t where a = 1 xor b = 2"),
            Err(SqlError::InvalidLogOp(_))
        ));
    }

    #[test]
    fn trailing_tokens_are_rejected(){
        assert!(parse("commit now").is_err());
        assert!(parse("drop table t cascade").is_err());
    }
}

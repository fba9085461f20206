//! Translation of filter specs and document payloads into parameterized SQL.
//!
//! Identifiers are always escaped; values only ever travel as positional
//! parameters (`$1`, `$2`, ...).

use itertools::Itertools;
use serde_json::Value;

use crate::data_types::{escape, Document, DocumentId, ID_FIELD};
use crate::query::{Op, Operator, Q};

use super::interface::{Error, Result};

/// A value bound to a positional parameter, along with the column it is
/// compared against or written to
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub column: String,
    pub value: Value,
    /// Bound as a LIKE pattern rather than as a value of the column's type
    pub pattern: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Arg>,
}

impl Statement {
    pub fn values(&self) -> Vec<&Value> {
        self.args.iter().map(|a| &a.value).collect()
    }

    /// Nest the statement in a CTE and re-select each row as a single JSON
    /// object, so callers can decode any row shape into a [`Document`]
    pub fn wrap_json(self) -> Self {
        Self {
            sql: format!(
                "WITH selection_cte AS ({}) SELECT to_jsonb(selection_cte.*) AS keyvals FROM selection_cte",
                self.sql
            ),
            args: self.args,
        }
    }
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", escape(schema), escape(table))
}

fn operator_sql(op: Operator) -> Result<&'static str> {
    Ok(match op {
        Operator::Equal => "=",
        Operator::NotEqual => "!=",
        Operator::LessThan => "<",
        Operator::LessThanOrEqual => "<=",
        Operator::GreaterThan => ">",
        Operator::GreaterThanOrEqual => ">=",
        Operator::IsNull => "IS NULL",
        Operator::IsNotNull => "IS NOT NULL",
        Operator::StartsWith | Operator::EndsWith => "LIKE",
        Operator::OrderAsc | Operator::OrderDesc | Operator::Limit | Operator::Offset => {
            return Err(Error::InvalidInput(format!("unsupported operator: {op}")))
        }
    })
}

/// The bound value for a predicate. Prefix/suffix matches get their wildcard
/// appended here; `%` and `_` inside the value keep their LIKE meaning.
fn predicate_value(op: &Op) -> Result<Option<Value>> {
    let value = match (op.op().takes_value(), op.value()) {
        (false, _) => return Ok(None),
        (true, None) => {
            return Err(Error::InvalidInput(format!(
                "operator {} on {:?} needs a value",
                op.op(),
                op.column()
            )))
        }
        (true, Some(value)) => value,
    };

    let pattern = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    Ok(Some(match op.op() {
        Operator::StartsWith => Value::String(format!("{}%", pattern(value))),
        Operator::EndsWith => Value::String(format!("%{}", pattern(value))),
        _ => value.clone(),
    }))
}

pub struct PostgresQ<'a> {
    q: &'a Q,
    sql: String,
    args: Vec<Arg>,
}

impl<'a> PostgresQ<'a> {
    pub fn new(q: &'a Q) -> Self {
        Self {
            q,
            sql: String::new(),
            args: vec![],
        }
    }

    pub fn build(mut self) -> Result<Statement> {
        self.select_columns();
        self.from();
        self.where_clause()?;

        Ok(Statement {
            sql: self.sql,
            args: self.args,
        })
    }

    fn select_columns(&mut self) {
        self.sql.push_str("SELECT ");
        if self.q.cols().is_empty() {
            self.sql.push('*');
        } else {
            self.sql
                .push_str(&self.q.cols().iter().map(|c| escape(c)).join(", "));
        }
    }

    fn from(&mut self) {
        self.sql.push_str(" FROM ");
        self.sql
            .push_str(&qualified(self.q.get_schema(), self.q.get_table()));
    }

    fn where_clause(&mut self) -> Result<()> {
        for (i, op) in self.q.predicates().iter().enumerate() {
            self.sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            self.sql.push_str(&escape(op.column()));
            self.sql.push(' ');
            self.sql.push_str(operator_sql(op.op())?);

            if let Some(value) = predicate_value(op)? {
                self.args.push(Arg {
                    column: op.column().to_string(),
                    value,
                    pattern: matches!(op.op(), Operator::StartsWith | Operator::EndsWith),
                });
                self.sql.push_str(&format!(" ${}", self.args.len()));
            }
        }
        Ok(())
    }
}

pub fn select(q: &Q) -> Result<Statement> {
    PostgresQ::new(q).build()
}

fn data_arg(column: &str, data: &Document) -> Arg {
    Arg {
        column: column.to_string(),
        value: data[column].clone(),
        pattern: false,
    }
}

/// `INSERT ... RETURNING *` with columns in lexicographic order
pub fn insert(schema: &str, table: &str, data: &Document) -> Statement {
    let keys: Vec<&String> = data.keys().sorted().collect();

    let sql = if keys.is_empty() {
        format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING *",
            qualified(schema, table)
        )
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            qualified(schema, table),
            keys.iter().map(|k| escape(k)).join(", "),
            (1..=keys.len()).map(|i| format!("${i}")).join(", ")
        )
    };

    Statement {
        sql,
        args: keys.iter().map(|k| data_arg(k, data)).collect(),
    }
}

/// `UPDATE ... SET ... WHERE id = $last RETURNING *` with assignments in
/// lexicographic order
pub fn update(schema: &str, table: &str, id: DocumentId, data: &Document) -> Result<Statement> {
    if data.is_empty() {
        return Err(Error::InvalidInput("nothing to update".to_string()));
    }

    let keys: Vec<&String> = data.keys().sorted().collect();
    let assignments = keys
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{} = ${}", escape(k), i + 1))
        .join(", ");

    let mut args: Vec<Arg> = keys.iter().map(|k| data_arg(k, data)).collect();
    args.push(Arg {
        column: ID_FIELD.to_string(),
        value: Value::String(id.to_string()),
        pattern: false,
    });

    Ok(Statement {
        sql: format!(
            "UPDATE {} SET {} WHERE {} = ${} RETURNING *",
            qualified(schema, table),
            assignments,
            escape(ID_FIELD),
            args.len()
        ),
        args,
    })
}

pub fn delete(schema: &str, table: &str, id: DocumentId) -> Statement {
    Statement {
        sql: format!(
            "DELETE FROM {} WHERE {} = $1",
            qualified(schema, table),
            escape(ID_FIELD)
        ),
        args: vec![Arg {
            column: ID_FIELD.to_string(),
            value: Value::String(id.to_string()),
            pattern: false,
        }],
    }
}

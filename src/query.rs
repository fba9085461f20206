//! Filter/projection specification for document lookups.
//!
//! A [`Q`] is an immutable value: every builder method consumes it and returns
//! an extended copy. Predicates are AND-combined in insertion order.

use serde_json::Value;
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    IsNull,
    IsNotNull,
    StartsWith,
    EndsWith,
    // Reserved, not supported by the builder yet
    OrderDesc,
    OrderAsc,
    Limit,
    Offset,
}

impl Operator {
    pub fn takes_value(&self) -> bool {
        !matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

/// A single predicate clause
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    column: String,
    op: Operator,
    value: Option<Value>,
}

impl Op {
    pub fn new(column: impl Into<String>, op: Operator, value: Option<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Q {
    schema: String,
    table: String,
    cols: Vec<String>,
    predicates: Vec<Op>,
}

impl Q {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_schema(&self) -> &str {
        &self.schema
    }

    pub fn get_table(&self) -> &str {
        &self.table
    }

    pub fn cols(&self) -> &[String] {
        &self.cols
    }

    pub fn predicates(&self) -> &[Op] {
        &self.predicates
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Add columns to the projection, skipping ones already selected
    pub fn select<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for col in cols {
            let col = col.into();
            if !self.cols.contains(&col) {
                self.cols.push(col);
            }
        }
        self
    }

    pub fn filter(mut self, op: Op) -> Self {
        self.predicates.push(op);
        self
    }

    fn with(self, column: impl Into<String>, op: Operator, value: Option<Value>) -> Self {
        self.filter(Op::new(column, op, value))
    }

    pub fn equal(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(column, Operator::Equal, Some(value.into()))
    }

    pub fn not_equal(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(column, Operator::NotEqual, Some(value.into()))
    }

    pub fn less_than(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(column, Operator::LessThan, Some(value.into()))
    }

    pub fn less_than_or_equal(
        self,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.with(column, Operator::LessThanOrEqual, Some(value.into()))
    }

    pub fn greater_than(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(column, Operator::GreaterThan, Some(value.into()))
    }

    pub fn greater_than_or_equal(
        self,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.with(column, Operator::GreaterThanOrEqual, Some(value.into()))
    }

    pub fn null(self, column: impl Into<String>) -> Self {
        self.with(column, Operator::IsNull, None)
    }

    pub fn not_null(self, column: impl Into<String>) -> Self {
        self.with(column, Operator::IsNotNull, None)
    }

    pub fn starts_with(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(column, Operator::StartsWith, Some(Value::String(value.into())))
    }

    pub fn ends_with(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(column, Operator::EndsWith, Some(Value::String(value.into())))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_chaining_keeps_original() {
        let base = Q::new().schema("s").table("t");
        let filtered = base.clone().equal("id", 1);

        assert!(base.predicates().is_empty());
        assert_eq!(
            filtered.predicates(),
            &[Op::new("id", Operator::Equal, Some(json!(1)))]
        );
    }

    #[test]
    fn test_select_deduplicates() {
        let q = Q::new().select(["id", "name"]).select(["name", "email"]);
        assert_eq!(q.cols(), &["id", "name", "email"]);
    }

    #[test]
    fn test_null_predicates_have_no_value() {
        let q = Q::new().null("deleted_at").not_null("activated_at");
        assert!(q.predicates().iter().all(|op| op.value().is_none()));
        assert!(q.predicates().iter().all(|op| !op.op().takes_value()));
    }
}

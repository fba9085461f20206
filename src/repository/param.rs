use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::types::{BigDecimal, Json};
use sqlx::Arguments;
use uuid::Uuid;

use crate::data_types::AttributeType;

use super::builder::Arg;
use super::interface::{Error, Result, TableTarget};

/// A JSON value converted to the Rust type matching its target column, so the
/// engine sees a correctly typed parameter (a uuid for a UUID column and so on).
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Text(Option<String>),
    Int(Option<i32>),
    Numeric(Option<BigDecimal>),
    Float(Option<f64>),
    Bool(Option<bool>),
    Uuid(Option<Uuid>),
    Timestamp(Option<DateTime<Utc>>),
    Json(Option<Value>),
}

fn mismatch(column: &str, expected: AttributeType, value: &Value) -> Error {
    Error::InvalidInput(format!(
        "column {column:?} expects a {expected} value, got {value}"
    ))
}

impl Param {
    /// Convert `value` for a column of type `column_type`. Undeclared columns are
    /// bound by the shape of the JSON value.
    pub fn for_column(
        column: &str,
        column_type: Option<AttributeType>,
        value: &Value,
    ) -> Result<Self> {
        let Some(column_type) = column_type else {
            return Ok(Self::from_shape(value));
        };
        let err = || mismatch(column, column_type, value);

        if value.is_null() {
            return Ok(match column_type {
                AttributeType::String => Param::Text(None),
                AttributeType::Integer => Param::Int(None),
                AttributeType::Numeric => Param::Numeric(None),
                AttributeType::Float => Param::Float(None),
                AttributeType::Boolean => Param::Bool(None),
                AttributeType::Timestamp => Param::Timestamp(None),
                AttributeType::Uuid => Param::Uuid(None),
                AttributeType::Json => Param::Json(None),
            });
        }

        Ok(match column_type {
            AttributeType::String => match value {
                Value::String(s) => Param::Text(Some(s.clone())),
                Value::Number(_) | Value::Bool(_) => Param::Text(Some(value.to_string())),
                _ => return Err(err()),
            },
            AttributeType::Integer => {
                let n = match value {
                    Value::Number(n) => n.as_i64().ok_or_else(err)?,
                    Value::String(s) => s.parse::<i64>().map_err(|_| err())?,
                    _ => return Err(err()),
                };
                let n = i32::try_from(n).map_err(|_| {
                    Error::InvalidInput(format!("value {n} is out of range for column {column:?}"))
                })?;
                Param::Int(Some(n))
            }
            AttributeType::Numeric => match value {
                // Parsed from the literal text so no digits are lost
                Value::Number(n) => Param::Numeric(Some(
                    BigDecimal::from_str(&n.to_string()).map_err(|_| err())?,
                )),
                Value::String(s) => {
                    Param::Numeric(Some(BigDecimal::from_str(s.trim()).map_err(|_| err())?))
                }
                _ => return Err(err()),
            },
            AttributeType::Float => match value {
                Value::Number(n) => Param::Float(Some(n.as_f64().ok_or_else(err)?)),
                Value::String(s) => Param::Float(Some(s.parse().map_err(|_| err())?)),
                _ => return Err(err()),
            },
            AttributeType::Boolean => match value {
                Value::Bool(b) => Param::Bool(Some(*b)),
                Value::String(s) => Param::Bool(Some(s.parse().map_err(|_| err())?)),
                _ => return Err(err()),
            },
            AttributeType::Timestamp => match value {
                Value::String(s) => Param::Timestamp(Some(
                    DateTime::parse_from_rfc3339(s)
                        .map_err(|_| err())?
                        .with_timezone(&Utc),
                )),
                _ => return Err(err()),
            },
            AttributeType::Uuid => match value {
                Value::String(s) => Param::Uuid(Some(Uuid::parse_str(s).map_err(|_| err())?)),
                _ => return Err(err()),
            },
            AttributeType::Json => Param::Json(Some(value.clone())),
        })
    }

    pub fn from_shape(value: &Value) -> Self {
        match value {
            Value::Null => Param::Text(None),
            Value::Bool(b) => Param::Bool(Some(*b)),
            Value::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Some(i) => Param::Int(Some(i)),
                None => match BigDecimal::from_str(&n.to_string()) {
                    Ok(d) => Param::Numeric(Some(d)),
                    Err(_) => Param::Float(n.as_f64()),
                },
            },
            Value::String(s) => Param::Text(Some(s.clone())),
            Value::Array(_) | Value::Object(_) => Param::Json(Some(value.clone())),
        }
    }

    pub fn for_arg(arg: &Arg, target: &TableTarget) -> Result<Self> {
        if arg.pattern {
            let column_type = target.column_type(&arg.column);
            if !matches!(column_type, None | Some(AttributeType::String)) {
                return Err(Error::InvalidInput(format!(
                    "pattern match on {} column {:?}, only text columns support it",
                    column_type.map(|t| t.to_string()).unwrap_or_default(),
                    arg.column
                )));
            }
            return Ok(Param::Text(Some(match &arg.value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })));
        }
        Self::for_column(&arg.column, target.column_type(&arg.column), &arg.value)
    }

    pub fn add_to(self, args: &mut PgArguments) {
        match self {
            Param::Text(v) => args.add(v),
            Param::Int(v) => args.add(v),
            Param::Numeric(v) => args.add(v),
            Param::Float(v) => args.add(v),
            Param::Bool(v) => args.add(v),
            Param::Uuid(v) => args.add(v),
            Param::Timestamp(v) => args.add(v),
            Param::Json(v) => args.add(v.map(Json)),
        }
    }

    /// The value as the engine would hand it back through `to_jsonb`
    pub fn into_value(self) -> Value {
        match self {
            Param::Text(v) => v.map(Value::String),
            Param::Int(v) => v.map(Value::from),
            Param::Numeric(v) => v.map(|d| {
                let text = d.to_string();
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            }),
            // float8 output drops the fraction of integral values
            Param::Float(v) => v.map(|f| {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    Value::from(f as i64)
                } else {
                    Value::from(f)
                }
            }),
            Param::Bool(v) => v.map(Value::Bool),
            Param::Uuid(v) => v.map(|u| Value::String(u.to_string())),
            Param::Timestamp(v) => {
                v.map(|t| Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, false)))
            }
            Param::Json(v) => v,
        }
        .unwrap_or(Value::Null)
    }
}

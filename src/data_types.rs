use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};

pub type UserId = Uuid;
pub type ProjectId = Uuid;
pub type CollectionId = Uuid;
pub type DocumentId = Uuid;
pub type Timestamp = DateTime<Utc>;

/// A generic row, keyed by column name.
pub type Document = serde_json::Map<String, serde_json::Value>;

pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Columns managed by the store itself. Clients can never write them.
pub const SYSTEM_FIELDS: [&str; 3] = [ID_FIELD, CREATED_AT_FIELD, UPDATED_AT_FIELD];

pub fn is_system_field(name: &str) -> bool {
    SYSTEM_FIELDS.contains(&name)
}

/// A relational identifier. Holds the raw name and renders it quoted, doubling
/// any embedded double quotes, so a name is only ever escaped once.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Recover an identifier from its quoted form. Unquoted input is taken verbatim.
    pub fn from_quoted(quoted: &str) -> Self {
        match quoted
            .strip_prefix('"')
            .and_then(|inner| inner.strip_suffix('"'))
        {
            Some(inner) => Self(inner.replace("\"\"", "\"")),
            None => Self(quoted.to_string()),
        }
    }

    pub fn raw(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0.replace('"', "\"\""))
    }
}

pub fn escape(name: &str) -> String {
    Ident::new(name).to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    pub user_id: UserId,
    pub name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Project {
    /// Tenant schema holding every collection table of this project
    pub fn schema_name(&self) -> Ident {
        Ident::new(&self.name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: CollectionId,
    pub project_id: ProjectId,
    pub name: String,
    pub attributes: BTreeMap<String, Attribute>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Collection {
    pub fn table_name(&self) -> Ident {
        Ident::new(&self.name)
    }

    /// Attributes in a stable order (by name), as used for DDL emission.
    pub fn ordered_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    /// The attributes every collection carries regardless of what the client declared.
    pub fn system_attributes() -> Vec<Attribute> {
        vec![
            Attribute::new(ID_FIELD, AttributeType::Uuid)
                .required()
                .primary(),
            Attribute::new(CREATED_AT_FIELD, AttributeType::Timestamp).required(),
            Attribute::new(UPDATED_AT_FIELD, AttributeType::Timestamp).required(),
        ]
    }
}

#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttributeType {
    String,
    Integer,
    Numeric,
    Float,
    Boolean,
    #[serde(alias = "time")]
    #[strum(to_string = "timestamp", serialize = "time")]
    Timestamp,
    Uuid,
    Json,
}

impl AttributeType {
    pub fn parse(value: &str) -> Result<Self> {
        value.parse().map_err(|_| {
            Error::new(
                ErrorKind::Validation,
                format!("invalid attribute type: {value}"),
            )
        })
    }

    /// Engine column type backing this attribute type
    pub fn postgres_type(&self) -> &'static str {
        match self {
            AttributeType::String => "TEXT",
            AttributeType::Integer => "INT",
            AttributeType::Numeric => "NUMERIC",
            AttributeType::Float => "FLOAT",
            AttributeType::Boolean => "BOOLEAN",
            AttributeType::Timestamp => "TIMESTAMPTZ",
            AttributeType::Uuid => "UUID",
            AttributeType::Json => "JSONB",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub reference: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: AttributeType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub index: bool,
    // Reserved for foreign keys, never resolved
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, r#type: AttributeType) -> Self {
        Self {
            name: name.into(),
            r#type,
            required: false,
            unique: false,
            primary: false,
            index: false,
            relationships: vec![],
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }
}

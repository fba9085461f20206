//! DDL statements for provisioning tenant schemas and collection tables.
//!
//! All names are raw and get escaped here exactly once.

use hex::encode;
use sha2::{Digest, Sha256};

use crate::data_types::{escape, Attribute, Ident};

/// Postgres silently truncates identifiers longer than this many bytes
const MAX_IDENT_BYTES: usize = 63;
const INDEX_HASH_LEN: usize = 16;

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", escape(schema), escape(table))
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA {}", escape(schema))
}

/// A table with no columns. Columns get added one per attribute afterwards.
pub fn create_table(schema: &str, table: &str) -> String {
    format!("CREATE TABLE {} ()", qualified(schema, table))
}

pub fn add_column(schema: &str, table: &str, attribute: &Attribute) -> String {
    let mut stmt = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        qualified(schema, table),
        escape(&attribute.name),
        attribute.r#type.postgres_type()
    );

    if attribute.required {
        stmt.push_str(" NOT NULL");
    }
    if attribute.primary {
        stmt.push_str(" PRIMARY KEY");
    }
    if attribute.unique {
        stmt.push_str(" UNIQUE");
    }

    stmt
}

/// Index names share a namespace with every relation in the schema. The name is a
/// readable (possibly truncated) prefix plus a hash of the length-prefixed schema,
/// table and attribute names, so `a`/`b_c` and `a_b`/`c` get different indexes.
pub fn index_name(schema: &str, table: &str, attribute: &Attribute) -> Ident {
    let mut hasher = Sha256::new();
    for part in [schema, table, attribute.name.as_str()] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    let hash = encode(hasher.finalize());

    let mut prefix = format!("idx_{}_{}", table, attribute.name);
    let mut end = prefix.len().min(MAX_IDENT_BYTES - INDEX_HASH_LEN - 1);
    while !prefix.is_char_boundary(end) {
        end -= 1;
    }
    prefix.truncate(end);

    Ident::new(format!("{}_{}", prefix, &hash[..INDEX_HASH_LEN]))
}

/// `None` unless the attribute is flagged for indexing
pub fn add_index(schema: &str, table: &str, attribute: &Attribute) -> Option<String> {
    if !attribute.index {
        return None;
    }

    Some(format!(
        "CREATE INDEX {} ON {} ({})",
        index_name(schema, table, attribute),
        qualified(schema, table),
        escape(&attribute.name)
    ))
}

/// Every statement needed to give a table its columns: all column additions
/// first, then all index creations, both in the order of `attributes`.
pub fn column_statements(schema: &str, table: &str, attributes: &[&Attribute]) -> Vec<String> {
    let columns = attributes.iter().map(|a| add_column(schema, table, a));
    let indexes = attributes
        .iter()
        .filter_map(|a| add_index(schema, table, a));

    columns.chain(indexes).collect()
}

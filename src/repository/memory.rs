//! In-memory storage backend.
//!
//! Behaves like the Postgres backend as far as callers can observe: the same
//! constraint violations, the same typed normalization of document values and
//! the same transaction semantics. Writers are serialized: an open unit of work
//! holds the write lock until it is committed, rolled back or dropped, and
//! works on a private copy of the state that replaces the shared one on commit.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::Value;
use sqlx::types::BigDecimal;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use uuid::Uuid;

use crate::data_types::{
    Attribute, Collection, CollectionId, Document, DocumentId, Project, ProjectId, User, UserId,
    ID_FIELD,
};
use crate::query::{Op, Operator, Q};

use super::builder;
use super::ddl;
use super::interface::{
    CollectionRepository, DatabaseRepository, DocumentRepository, Error, ProjectRepository,
    Repositories, Result, Storage, TableTarget, UnitOfWork, UserRepository,
};
use super::param::Param;

#[derive(Debug, Default, Clone)]
struct Table {
    columns: Vec<Attribute>,
    indexes: BTreeSet<String>,
    rows: Vec<Document>,
}

impl Table {
    fn column(&self, name: &str) -> Result<&Attribute> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::InvalidInput(format!("column {name:?} does not exist")))
    }

    /// Typed copy of `data`, rejecting unknown columns
    fn normalize(&self, data: &Document) -> Result<Document> {
        data.iter()
            .map(|(key, value)| {
                let column = self.column(key)?;
                let value = Param::for_column(key, Some(column.r#type), value)?.into_value();
                Ok((key.clone(), value))
            })
            .collect()
    }

    /// Constraint checks for `row` about to be stored at `position` (`None`
    /// for a new row)
    fn check(&self, row: &Document, position: Option<usize>) -> Result<()> {
        for column in &self.columns {
            let value = row.get(&column.name).unwrap_or(&Value::Null);

            if value.is_null() {
                if column.required || column.primary {
                    return Err(Error::InvalidInput(format!(
                        "null value in column {:?} violates not-null constraint",
                        column.name
                    )));
                }
                continue;
            }

            if (column.unique || column.primary)
                && self
                    .rows
                    .iter()
                    .enumerate()
                    .any(|(i, other)| Some(i) != position && other.get(&column.name) == Some(value))
            {
                return Err(Error::UniqueConstraintViolation(format!(
                    "duplicate key value violates unique constraint on {:?}",
                    column.name
                )));
            }
        }
        Ok(())
    }

    fn position(&self, id: DocumentId) -> Option<usize> {
        let id = Value::String(id.to_string());
        self.rows.iter().position(|row| row.get(ID_FIELD) == Some(&id))
    }
}

#[derive(Debug, Default, Clone)]
struct State {
    users: BTreeMap<UserId, User>,
    projects: BTreeMap<ProjectId, Project>,
    collections: BTreeMap<CollectionId, Collection>,
    schemas: BTreeMap<String, BTreeMap<String, Table>>,
}

impl State {
    fn table(&self, schema: &str, table: &str) -> Result<&Table> {
        self.schemas
            .get(schema)
            .and_then(|tables| tables.get(table))
            .ok_or_else(|| Error::NotFound(format!("relation {schema}.{table}")))
    }

    fn index_exists(&self, schema: &str, name: &str) -> bool {
        self.schemas
            .get(schema)
            .map_or(false, |tables| tables.values().any(|t| t.indexes.contains(name)))
    }

    fn table_mut(&mut self, schema: &str, table: &str) -> Result<&mut Table> {
        self.schemas
            .get_mut(schema)
            .and_then(|tables| tables.get_mut(table))
            .ok_or_else(|| Error::NotFound(format!("relation {schema}.{table}")))
    }
}

#[derive(Debug, Clone)]
enum MemConn {
    Shared {
        state: Arc<RwLock<State>>,
        writer: Arc<tokio::sync::Mutex<()>>,
    },
    /// Private copy of the state, `None` once the unit of work is finished
    Transaction(Arc<Mutex<Option<State>>>),
}

impl MemConn {
    fn read<T>(&self, f: impl FnOnce(&State) -> Result<T>) -> Result<T> {
        match self {
            MemConn::Shared { state, .. } => f(&state.read()),
            MemConn::Transaction(tx) => {
                let guard = tx.lock();
                f(guard.as_ref().ok_or(Error::TransactionFinished)?)
            }
        }
    }

    async fn write<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        match self {
            MemConn::Shared { state, writer } => {
                let _writer = writer.lock().await;
                let mut state = state.write();
                f(&mut state)
            }
            MemConn::Transaction(tx) => {
                let mut guard = tx.lock();
                f(guard.as_mut().ok_or(Error::TransactionFinished)?)
            }
        }
    }
}

#[derive(Debug)]
pub struct MemoryUserRepository {
    conn: MemConn,
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self) -> Result<User> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        };

        self.conn
            .write(|state| {
                state.users.insert(user.id, user.clone());
                Ok(user)
            })
            .await
    }
}

#[derive(Debug)]
pub struct MemoryProjectRepository {
    conn: MemConn,
}

#[async_trait]
impl ProjectRepository for MemoryProjectRepository {
    async fn create(&self, user_id: Uuid, name: &str) -> Result<Project> {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.conn
            .write(|state| {
                if !state.users.contains_key(&user_id) {
                    return Err(Error::FKConstraintViolation(format!(
                        "user {user_id} does not exist"
                    )));
                }
                if state.projects.values().any(|p| p.name == name) {
                    return Err(Error::UniqueConstraintViolation(format!(
                        "project {name:?} already exists"
                    )));
                }
                state.projects.insert(project.id, project.clone());
                Ok(project)
            })
            .await
    }

    async fn get(&self, id: ProjectId) -> Result<Project> {
        self.conn.read(|state| {
            state
                .projects
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("project {id}")))
        })
    }
}

#[derive(Debug)]
pub struct MemoryCollectionRepository {
    conn: MemConn,
}

#[async_trait]
impl CollectionRepository for MemoryCollectionRepository {
    async fn create(
        &self,
        project_id: ProjectId,
        name: &str,
        attributes: &BTreeMap<String, Attribute>,
    ) -> Result<Collection> {
        let now = Utc::now();
        let collection = Collection {
            id: Uuid::new_v4(),
            project_id,
            name: name.to_string(),
            attributes: attributes.clone(),
            created_at: now,
            updated_at: now,
        };

        self.conn
            .write(|state| {
                if !state.projects.contains_key(&project_id) {
                    return Err(Error::FKConstraintViolation(format!(
                        "project {project_id} does not exist"
                    )));
                }
                if state
                    .collections
                    .values()
                    .any(|c| c.project_id == project_id && c.name == name)
                {
                    return Err(Error::UniqueConstraintViolation(format!(
                        "collection {name:?} already exists"
                    )));
                }
                state.collections.insert(collection.id, collection.clone());
                Ok(collection)
            })
            .await
    }

    async fn get(&self, project_id: ProjectId, name: &str) -> Result<Collection> {
        self.conn.read(|state| {
            state
                .collections
                .values()
                .find(|c| c.project_id == project_id && c.name == name)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("collection {name}")))
        })
    }
}

#[derive(Debug)]
pub struct MemoryDatabaseRepository {
    conn: MemConn,
    fail_on_column: Option<String>,
}

#[async_trait]
impl DatabaseRepository for MemoryDatabaseRepository {
    async fn create_schema(&self, schema: &str) -> Result<()> {
        debug!("Executing {}", ddl::create_schema(schema));
        self.conn
            .write(|state| {
                if state.schemas.contains_key(schema) {
                    return Err(Error::UniqueConstraintViolation(format!(
                        "schema {schema:?} already exists"
                    )));
                }
                state.schemas.insert(schema.to_string(), BTreeMap::new());
                Ok(())
            })
            .await
    }

    async fn create_table(&self, schema: &str, table: &str) -> Result<()> {
        debug!("Executing {}", ddl::create_table(schema, table));
        self.conn
            .write(|state| {
                let tables = state
                    .schemas
                    .get_mut(schema)
                    .ok_or_else(|| Error::NotFound(format!("schema {schema}")))?;
                if tables.contains_key(table) {
                    return Err(Error::UniqueConstraintViolation(format!(
                        "relation {table:?} already exists"
                    )));
                }
                tables.insert(table.to_string(), Table::default());
                Ok(())
            })
            .await
    }

    async fn create_columns(
        &self,
        schema: &str,
        table: &str,
        attributes: &[&Attribute],
    ) -> Result<()> {
        self.conn
            .write(|state| {
                let t = state.table_mut(schema, table)?;

                for attribute in attributes {
                    debug!("Executing {}", ddl::add_column(schema, table, attribute));
                    if self.fail_on_column.as_deref() == Some(attribute.name.as_str()) {
                        return Err(Error::SqlxError(sqlx::Error::Protocol(format!(
                            "injected failure adding column {:?}",
                            attribute.name
                        ))));
                    }
                    if t.columns.iter().any(|c| c.name == attribute.name) {
                        return Err(Error::UniqueConstraintViolation(format!(
                            "column {:?} already exists",
                            attribute.name
                        )));
                    }
                    t.columns.push((*attribute).clone());
                }

                for attribute in attributes.iter().filter(|a| a.index) {
                    let name = ddl::index_name(schema, table, attribute);
                    // Index names share one namespace per schema
                    if state.index_exists(schema, name.raw()) {
                        return Err(Error::UniqueConstraintViolation(format!(
                            "relation {name} already exists"
                        )));
                    }
                    state
                        .table_mut(schema, table)?
                        .indexes
                        .insert(name.raw().to_string());
                }
                Ok(())
            })
            .await
    }
}

fn like(pattern: &str, text: &str) -> Result<bool> {
    let mut re = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');

    let re = Regex::new(&re).map_err(|e| Error::InvalidInput(e.to_string()))?;
    Ok(re.is_match(text))
}

/// SQL-style comparison: anything involving NULL is unknown
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(l), Value::Number(r)) => {
            let exact = |n: &serde_json::Number| BigDecimal::from_str(&n.to_string()).ok();
            match (exact(l), exact(r)) {
                (Some(l), Some(r)) => Some(l.cmp(&r)),
                _ => l.as_f64()?.partial_cmp(&r.as_f64()?),
            }
        }
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (l, r) if l == r => Some(Ordering::Equal),
        _ => None,
    }
}

fn matches(row: &Document, op: Operator, column: &str, arg: Option<&Value>) -> Result<bool> {
    let value = row.get(column).unwrap_or(&Value::Null);
    let ordering = || arg.and_then(|a| compare(value, a));

    Ok(match op {
        Operator::IsNull => value.is_null(),
        Operator::IsNotNull => !value.is_null(),
        Operator::Equal => ordering() == Some(Ordering::Equal),
        Operator::NotEqual => matches!(ordering(), Some(o) if o != Ordering::Equal),
        Operator::LessThan => ordering() == Some(Ordering::Less),
        Operator::LessThanOrEqual => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        Operator::GreaterThan => ordering() == Some(Ordering::Greater),
        Operator::GreaterThanOrEqual => {
            matches!(ordering(), Some(Ordering::Greater | Ordering::Equal))
        }
        Operator::StartsWith | Operator::EndsWith => match (value, arg) {
            (Value::Null, _) | (_, None) => false,
            (Value::String(text), Some(Value::String(pattern))) => like(pattern, text)?,
            _ => false,
        },
        Operator::OrderAsc | Operator::OrderDesc | Operator::Limit | Operator::Offset => {
            return Err(Error::InvalidInput(format!("unsupported operator: {op}")))
        }
    })
}

fn project(row: &Document, cols: &[String]) -> Document {
    if cols.is_empty() {
        return row.clone();
    }
    cols.iter()
        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
        .collect()
}

#[derive(Debug)]
pub struct MemoryDocumentRepository {
    conn: MemConn,
}

#[async_trait]
impl DocumentRepository for MemoryDocumentRepository {
    async fn get(&self, target: &TableTarget, q: &Q) -> Result<Document> {
        // Same validation and bound values as the SQL path
        let stmt = builder::select(q)?;
        debug!("Executing {}", stmt.sql);

        let params = stmt
            .args
            .iter()
            .map(|arg| Ok(Param::for_arg(arg, target)?.into_value()))
            .collect::<Result<Vec<_>>>()?;

        self.conn.read(|state| {
            let table = state.table(q.get_schema(), q.get_table())?;
            for column in q.cols() {
                table.column(column)?;
            }
            for op in q.predicates() {
                table.column(op.column())?;
            }

            // Pair each predicate with its bound value, if it takes one
            let mut params = params.iter();
            let predicates: Vec<(&Op, Option<&Value>)> = q
                .predicates()
                .iter()
                .map(|op| (op, op.op().takes_value().then(|| params.next()).flatten()))
                .collect();

            for row in &table.rows {
                let mut hit = true;
                for (op, arg) in &predicates {
                    if !matches(row, op.op(), op.column(), *arg)? {
                        hit = false;
                        break;
                    }
                }

                if hit {
                    return Ok(project(row, q.cols()));
                }
            }

            Err(Error::NotFound(format!("document in {}", target.table)))
        })
    }

    async fn create(&self, target: &TableTarget, data: &Document) -> Result<Document> {
        let stmt = builder::insert(&target.schema, &target.table, data);
        debug!("Executing {}", stmt.sql);

        self.conn
            .write(|state| {
                let table = state.table_mut(&target.schema, &target.table)?;
                let values = table.normalize(data)?;
                let row: Document = table
                    .columns
                    .iter()
                    .map(|c| {
                        let value = values.get(&c.name).cloned().unwrap_or(Value::Null);
                        (c.name.clone(), value)
                    })
                    .collect();

                table.check(&row, None)?;
                table.rows.push(row.clone());
                Ok(row)
            })
            .await
    }

    async fn update(
        &self,
        target: &TableTarget,
        id: DocumentId,
        data: &Document,
    ) -> Result<Document> {
        let stmt = builder::update(&target.schema, &target.table, id, data)?;
        debug!("Executing {}", stmt.sql);

        self.conn
            .write(|state| {
                let table = state.table_mut(&target.schema, &target.table)?;
                let values = table.normalize(data)?;
                let position = table
                    .position(id)
                    .ok_or_else(|| Error::NotFound(format!("document {id}")))?;

                let mut row = table.rows[position].clone();
                row.extend(values);
                table.check(&row, Some(position))?;
                table.rows[position] = row.clone();
                Ok(row)
            })
            .await
    }

    async fn delete(&self, target: &TableTarget, id: DocumentId) -> Result<()> {
        let stmt = builder::delete(&target.schema, &target.table, id);
        debug!("Executing {}", stmt.sql);

        self.conn
            .write(|state| {
                let table = state.table_mut(&target.schema, &target.table)?;
                let position = table
                    .position(id)
                    .ok_or_else(|| Error::NotFound(format!("document {id}")))?;
                table.rows.remove(position);
                Ok(())
            })
            .await
    }
}

#[derive(Debug)]
pub struct MemoryRepositories {
    users: MemoryUserRepository,
    projects: MemoryProjectRepository,
    collections: MemoryCollectionRepository,
    databases: MemoryDatabaseRepository,
    documents: MemoryDocumentRepository,
}

impl MemoryRepositories {
    fn new(conn: MemConn, fail_on_column: Option<String>) -> Self {
        Self {
            users: MemoryUserRepository { conn: conn.clone() },
            projects: MemoryProjectRepository { conn: conn.clone() },
            collections: MemoryCollectionRepository { conn: conn.clone() },
            databases: MemoryDatabaseRepository {
                conn: conn.clone(),
                fail_on_column,
            },
            documents: MemoryDocumentRepository { conn },
        }
    }
}

impl Repositories for MemoryRepositories {
    fn users(&self) -> &dyn UserRepository {
        &self.users
    }

    fn projects(&self) -> &dyn ProjectRepository {
        &self.projects
    }

    fn collections(&self) -> &dyn CollectionRepository {
        &self.collections
    }

    fn databases(&self) -> &dyn DatabaseRepository {
        &self.databases
    }

    fn documents(&self) -> &dyn DocumentRepository {
        &self.documents
    }
}

#[derive(Debug)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
    writer: Arc<tokio::sync::Mutex<()>>,
    fail_on_column: Option<String>,
    repositories: MemoryRepositories,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A storage whose DDL fails when it reaches a column with this name. Used
    /// to exercise rollback of partially provisioned collections.
    pub fn with_failing_column(name: impl Into<String>) -> Self {
        Self::build(Some(name.into()))
    }

    fn build(fail_on_column: Option<String>) -> Self {
        let state = Arc::new(RwLock::new(State::default()));
        let writer = Arc::new(tokio::sync::Mutex::new(()));
        let conn = MemConn::Shared {
            state: state.clone(),
            writer: writer.clone(),
        };

        Self {
            repositories: MemoryRepositories::new(conn, fail_on_column.clone()),
            state,
            writer,
            fail_on_column,
        }
    }
}

impl Repositories for MemoryStorage {
    fn users(&self) -> &dyn UserRepository {
        self.repositories.users()
    }

    fn projects(&self) -> &dyn ProjectRepository {
        self.repositories.projects()
    }

    fn collections(&self) -> &dyn CollectionRepository {
        self.repositories.collections()
    }

    fn databases(&self) -> &dyn DatabaseRepository {
        self.repositories.databases()
    }

    fn documents(&self) -> &dyn DocumentRepository {
        self.repositories.documents()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let writer = self.writer.clone().lock_owned().await;
        let working = Arc::new(Mutex::new(Some(self.state.read().clone())));
        debug!("Transaction started");

        Ok(Box::new(MemoryUnitOfWork {
            shared: self.state.clone(),
            writer: Mutex::new(Some(writer)),
            repositories: MemoryRepositories::new(
                MemConn::Transaction(working.clone()),
                self.fail_on_column.clone(),
            ),
            working,
        }))
    }
}

pub struct MemoryUnitOfWork {
    shared: Arc<RwLock<State>>,
    working: Arc<Mutex<Option<State>>>,
    writer: Mutex<Option<OwnedMutexGuard<()>>>,
    repositories: MemoryRepositories,
}

impl Repositories for MemoryUnitOfWork {
    fn users(&self) -> &dyn UserRepository {
        self.repositories.users()
    }

    fn projects(&self) -> &dyn ProjectRepository {
        self.repositories.projects()
    }

    fn collections(&self) -> &dyn CollectionRepository {
        self.repositories.collections()
    }

    fn databases(&self) -> &dyn DatabaseRepository {
        self.repositories.databases()
    }

    fn documents(&self) -> &dyn DocumentRepository {
        self.repositories.documents()
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(&self) -> Result<()> {
        let state = self
            .working
            .lock()
            .take()
            .ok_or(Error::TransactionFinished)?;
        *self.shared.write() = state;
        self.writer.lock().take();
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if self.working.lock().take().is_some() {
            self.writer.lock().take();
            debug!("Transaction rolled back");
        }
        Ok(())
    }
}

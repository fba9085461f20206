use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::types::Json;
use sqlx::{Arguments, FromRow, Row};
use uuid::Uuid;

use crate::data_types::{
    Attribute, Collection, Document, DocumentId, Project, ProjectId, Timestamp, User,
};
use crate::query::Q;
use crate::repository::builder;
use crate::repository::ddl;
use crate::repository::interface::{
    CollectionRepository, DatabaseRepository, DocumentRepository, Error, ProjectRepository,
    Result, TableTarget, UserRepository,
};

use super::{bind, PgConn, PostgresStorage};

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    created_at: Timestamp,
    updated_at: Timestamp,
}

#[derive(FromRow)]
struct ProjectRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    created_at: Timestamp,
    updated_at: Timestamp,
}

#[derive(FromRow)]
struct CollectionRow {
    id: Uuid,
    project_id: Uuid,
    name: String,
    attributes: Json<BTreeMap<String, Attribute>>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<CollectionRow> for Collection {
    fn from(row: CollectionRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            attributes: row.attributes.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn decode<'r, T: FromRow<'r, PgRow>>(row: &'r PgRow) -> Result<T> {
    T::from_row(row).map_err(PostgresStorage::interpret_error)
}

#[derive(Debug)]
pub struct PgUserRepository {
    conn: PgConn,
}

impl PgUserRepository {
    pub fn new(conn: PgConn) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self) -> Result<User> {
        let row = self
            .conn
            .fetch_one(
                "INSERT INTO users DEFAULT VALUES RETURNING id, created_at, updated_at",
                PgArguments::default(),
            )
            .await?;
        Ok(decode::<UserRow>(&row)?.into())
    }
}

#[derive(Debug)]
pub struct PgProjectRepository {
    conn: PgConn,
}

impl PgProjectRepository {
    pub fn new(conn: PgConn) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ProjectRepository for PgProjectRepository {
    async fn create(&self, user_id: Uuid, name: &str) -> Result<Project> {
        let mut args = PgArguments::default();
        args.add(user_id);
        args.add(name);

        let row = self
            .conn
            .fetch_one(
                r#"INSERT INTO projects (user_id, name) VALUES ($1, $2)
                RETURNING id, user_id, name, created_at, updated_at"#,
                args,
            )
            .await?;
        Ok(decode::<ProjectRow>(&row)?.into())
    }

    async fn get(&self, id: ProjectId) -> Result<Project> {
        let mut args = PgArguments::default();
        args.add(id);

        let row = self
            .conn
            .fetch_optional(
                "SELECT id, user_id, name, created_at, updated_at FROM projects WHERE id = $1",
                args,
            )
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {id}")))?;
        Ok(decode::<ProjectRow>(&row)?.into())
    }
}

#[derive(Debug)]
pub struct PgCollectionRepository {
    conn: PgConn,
}

impl PgCollectionRepository {
    pub fn new(conn: PgConn) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CollectionRepository for PgCollectionRepository {
    async fn create(
        &self,
        project_id: ProjectId,
        name: &str,
        attributes: &BTreeMap<String, Attribute>,
    ) -> Result<Collection> {
        let mut args = PgArguments::default();
        args.add(project_id);
        args.add(name);
        args.add(Json(attributes));

        let row = self
            .conn
            .fetch_one(
                r#"INSERT INTO collections (project_id, name, attributes) VALUES ($1, $2, $3)
                RETURNING id, project_id, name, attributes, created_at, updated_at"#,
                args,
            )
            .await?;
        Ok(decode::<CollectionRow>(&row)?.into())
    }

    async fn get(&self, project_id: ProjectId, name: &str) -> Result<Collection> {
        let mut args = PgArguments::default();
        args.add(project_id);
        args.add(name);

        let row = self
            .conn
            .fetch_optional(
                r#"SELECT id, project_id, name, attributes, created_at, updated_at
                FROM collections WHERE project_id = $1 AND name = $2"#,
                args,
            )
            .await?
            .ok_or_else(|| Error::NotFound(format!("collection {name}")))?;
        Ok(decode::<CollectionRow>(&row)?.into())
    }
}

#[derive(Debug)]
pub struct PgDatabaseRepository {
    conn: PgConn,
}

impl PgDatabaseRepository {
    pub fn new(conn: PgConn) -> Self {
        Self { conn }
    }

    async fn run_ddl(&self, stmt: &str) -> Result<()> {
        self.conn.execute(stmt, PgArguments::default()).await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseRepository for PgDatabaseRepository {
    async fn create_schema(&self, schema: &str) -> Result<()> {
        self.run_ddl(&ddl::create_schema(schema)).await
    }

    async fn create_table(&self, schema: &str, table: &str) -> Result<()> {
        self.run_ddl(&ddl::create_table(schema, table)).await
    }

    async fn create_columns(
        &self,
        schema: &str,
        table: &str,
        attributes: &[&Attribute],
    ) -> Result<()> {
        for stmt in ddl::column_statements(schema, table, attributes) {
            self.run_ddl(&stmt).await?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct PgDocumentRepository {
    conn: PgConn,
}

impl PgDocumentRepository {
    pub fn new(conn: PgConn) -> Self {
        Self { conn }
    }

    /// Run a row-returning statement wrapped so that the row comes back as one
    /// JSON object
    async fn fetch_document(
        &self,
        stmt: builder::Statement,
        target: &TableTarget,
        not_found: impl FnOnce() -> Error,
    ) -> Result<Document> {
        let stmt = stmt.wrap_json();
        let args = bind(&stmt, target)?;

        let row = self
            .conn
            .fetch_optional(&stmt.sql, args)
            .await?
            .ok_or_else(not_found)?;
        let Json(document) = row
            .try_get::<Json<Document>, _>("keyvals")
            .map_err(PostgresStorage::interpret_error)?;
        Ok(document)
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn get(&self, target: &TableTarget, q: &Q) -> Result<Document> {
        let stmt = builder::select(q)?;
        self.fetch_document(stmt, target, || {
            Error::NotFound(format!("document in {}", target.table))
        })
        .await
    }

    async fn create(&self, target: &TableTarget, data: &Document) -> Result<Document> {
        let stmt = builder::insert(&target.schema, &target.table, data);
        // INSERT ... RETURNING always yields the row
        self.fetch_document(stmt, target, || {
            Error::InvalidInput(format!("no row inserted into {}", target.table))
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
        self.fetch_document(stmt, target, || Error::NotFound(format!("document {id}")))
            .await
    }

    async fn delete(&self, target: &TableTarget, id: DocumentId) -> Result<()> {
        let stmt = builder::delete(&target.schema, &target.table, id);
        let args = bind(&stmt, target)?;

        let result = self.conn.execute(&stmt.sql, args).await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("document {id}")));
        }
        Ok(())
    }
}

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;

use crate::data_types::{
    Attribute, AttributeType, Collection, Document, DocumentId, Project, ProjectId, User,
};
use crate::query::Q;

/// Storage-level failures, with database-specific error codes already interpreted
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unique constraint violation: {0}")]
    UniqueConstraintViolation(String),

    #[error("foreign key constraint violation: {0}")]
    FKConstraintViolation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("transaction already finished")]
    TransactionFinished,

    // All other errors
    #[error("internal SQL error: {0}")]
    SqlxError(sqlx::Error),

    #[error("failed (de)serializing JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A collection's physical table together with its declared column types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    pub schema: String,
    pub table: String,
    pub columns: BTreeMap<String, AttributeType>,
}

impl TableTarget {
    pub fn new(project: &Project, collection: &Collection) -> Self {
        Self {
            schema: project.schema_name().raw().to_string(),
            table: collection.table_name().raw().to_string(),
            columns: collection
                .attributes
                .values()
                .map(|a| (a.name.clone(), a.r#type))
                .collect(),
        }
    }

    pub fn column_type(&self, column: &str) -> Option<AttributeType> {
        self.columns.get(column).copied()
    }

    /// Start a filter addressing this table
    pub fn query(&self) -> Q {
        Q::new().schema(&self.schema).table(&self.table)
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self) -> Result<User>;
}

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Insert a project row; id and timestamps are assigned by the store
    async fn create(&self, user_id: uuid::Uuid, name: &str) -> Result<Project>;

    async fn get(&self, id: ProjectId) -> Result<Project>;
}

#[async_trait]
pub trait CollectionRepository: Send + Sync {
    /// Insert a collection metadata row; id and timestamps are assigned by the store
    async fn create(
        &self,
        project_id: ProjectId,
        name: &str,
        attributes: &BTreeMap<String, Attribute>,
    ) -> Result<Collection>;

    async fn get(&self, project_id: ProjectId, name: &str) -> Result<Collection>;
}

/// Physical DDL against tenant schemas
#[async_trait]
pub trait DatabaseRepository: Send + Sync {
    async fn create_schema(&self, schema: &str) -> Result<()>;

    /// Create a table with no columns
    async fn create_table(&self, schema: &str, table: &str) -> Result<()>;

    /// Add one column per attribute, then one index per indexed attribute, in the
    /// iteration order of `attributes`
    async fn create_columns(
        &self,
        schema: &str,
        table: &str,
        attributes: &[&Attribute],
    ) -> Result<()>;
}

/// Generic document CRUD against a collection table
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Fetch the first row matching `q`. `q` must address `target`'s table; the
    /// target supplies the column types used when binding filter values.
    async fn get(&self, target: &TableTarget, q: &Q) -> Result<Document>;

    async fn create(&self, target: &TableTarget, data: &Document) -> Result<Document>;

    async fn update(
        &self,
        target: &TableTarget,
        id: DocumentId,
        data: &Document,
    ) -> Result<Document>;

    /// Delete a row by id. Deleting nothing is an error.
    async fn delete(&self, target: &TableTarget, id: DocumentId) -> Result<()>;
}

/// Accessors for every per-entity repository, all bound to the same connection
/// or transaction
pub trait Repositories: Send + Sync {
    fn users(&self) -> &dyn UserRepository;
    fn projects(&self) -> &dyn ProjectRepository;
    fn collections(&self) -> &dyn CollectionRepository;
    fn databases(&self) -> &dyn DatabaseRepository;
    fn documents(&self) -> &dyn DocumentRepository;
}

/// Entry point to a storage backend. The repositories it exposes directly run
/// outside of any explicit transaction.
#[async_trait]
pub trait Storage: Repositories + Debug {
    /// Begin a transaction and hand out repositories bound to it
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// A transaction-scoped set of repositories.
///
/// Once `commit` or `rollback` has run, the unit of work is finished: further
/// `rollback` calls are no-ops and `commit` fails with `TransactionFinished`.
#[async_trait]
pub trait UnitOfWork: Repositories {
    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::*;
    use crate::data_types::{Collection, ID_FIELD};

    fn document(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected a JSON object"),
        }
    }

    fn todo_attributes() -> BTreeMap<String, Attribute> {
        Collection::system_attributes()
            .into_iter()
            .chain([
                Attribute::new("title", AttributeType::String).required(),
                Attribute::new("priority", AttributeType::Integer).indexed(),
                Attribute::new("estimate", AttributeType::Float),
                Attribute::new("budget", AttributeType::Numeric),
            ])
            .map(|a| (a.name.clone(), a))
            .collect()
    }

    /// Exercise a backend through its public traits. `prefix` keeps names unique
    /// across runs against a shared database.
    pub async fn run_generic_storage_tests(storage: Arc<dyn Storage>, prefix: &str) {
        let (project, collection) = test_provision_in_transaction(storage.clone(), prefix).await;
        let target = TableTarget::new(&project, &collection);
        test_document_lifecycle(storage.clone(), &target).await;
        test_column_values_read_back_as_stored(storage.clone(), &target).await;
        test_index_names_do_not_collide(storage.clone(), &project).await;
        test_rollback_discards_everything(storage.clone(), prefix).await;
        test_error_propagation(storage, &project, &target).await;
    }

    async fn test_provision_in_transaction(
        storage: Arc<dyn Storage>,
        prefix: &str,
    ) -> (Project, Collection) {
        let user = storage.users().create().await.expect("error creating user");

        let uow = storage.begin().await.expect("error starting transaction");
        let project = uow
            .projects()
            .create(user.id, &format!("{prefix}acme"))
            .await
            .expect("error creating project");
        assert_eq!(project.user_id, user.id);

        uow.databases()
            .create_schema(project.schema_name().raw())
            .await
            .expect("error creating schema");

        let attributes = todo_attributes();
        let collection = uow
            .collections()
            .create(project.id, "todos", &attributes)
            .await
            .expect("error creating collection");
        assert_eq!(collection.attributes, attributes);

        uow.databases()
            .create_table(project.schema_name().raw(), "todos")
            .await
            .expect("error creating table");
        uow.databases()
            .create_columns(
                project.schema_name().raw(),
                "todos",
                &collection.ordered_attributes().collect::<Vec<_>>(),
            )
            .await
            .expect("error creating columns");

        uow.commit().await.expect("error committing");
        // Rolling back a committed unit of work changes nothing
        uow.rollback().await.expect("rollback after commit must be a no-op");

        assert_eq!(storage.projects().get(project.id).await.unwrap(), project);
        assert_eq!(
            storage
                .collections()
                .get(project.id, "todos")
                .await
                .unwrap(),
            collection
        );

        (project, collection)
    }

    async fn test_document_lifecycle(storage: Arc<dyn Storage>, target: &TableTarget) {
        let id = uuid::Uuid::new_v4();
        let now = "2024-01-02T03:04:05Z";

        let created = storage
            .documents()
            .create(
                target,
                &document(json!({
                    "id": id.to_string(),
                    "created_at": now,
                    "updated_at": now,
                    "title": "buy milk",
                    "priority": 2,
                })),
            )
            .await
            .expect("error creating document");
        assert_eq!(created.get("title"), Some(&json!("buy milk")));
        assert_eq!(created.get(ID_FIELD), Some(&json!(id.to_string())));

        let fetched = storage
            .documents()
            .get(target, &target.query().equal(ID_FIELD, id.to_string()))
            .await
            .expect("error fetching document");
        assert_eq!(fetched, created);

        let fetched = storage
            .documents()
            .get(
                target,
                &target
                    .query()
                    .select(["title"])
                    .starts_with("title", "buy")
                    .greater_than("priority", 1),
            )
            .await
            .expect("error fetching document");
        assert_eq!(fetched, document(json!({"title": "buy milk"})));

        let updated = storage
            .documents()
            .update(target, id, &document(json!({"title": "buy oat milk"})))
            .await
            .expect("error updating document");
        assert_eq!(updated.get("title"), Some(&json!("buy oat milk")));
        assert_eq!(updated.get("priority"), Some(&json!(2)));

        storage
            .documents()
            .delete(target, id)
            .await
            .expect("error deleting document");

        assert!(matches!(
            storage
                .documents()
                .get(target, &target.query().equal(ID_FIELD, id.to_string()))
                .await
                .unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            storage.documents().delete(target, id).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    async fn test_column_values_read_back_as_stored(
        storage: Arc<dyn Storage>,
        target: &TableTarget,
    ) {
        let now = "2024-01-02T03:04:05Z";
        let mut doc = document(json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "created_at": now,
            "updated_at": now,
            "title": "pay rent",
            "estimate": 2,
        }));
        // Parsed rather than `json!` so the literal isn't rounded through f64
        doc.insert(
            "budget".to_string(),
            serde_json::from_str("12345678901234567891.5").unwrap(),
        );

        let created = storage
            .documents()
            .create(target, &doc)
            .await
            .expect("error creating document");
        assert_eq!(created["estimate"].to_string(), "2");
        assert_eq!(created["budget"].to_string(), "12345678901234567891.5");

        // INTEGER columns are 32-bit
        let mut too_big = doc.clone();
        too_big.insert("id".to_string(), json!(uuid::Uuid::new_v4().to_string()));
        too_big.insert("priority".to_string(), json!(3_000_000_000_i64));
        assert!(matches!(
            storage
                .documents()
                .create(target, &too_big)
                .await
                .unwrap_err(),
            Error::InvalidInput(_)
        ));

        // Pattern matching needs a text column
        assert!(matches!(
            storage
                .documents()
                .get(target, &target.query().starts_with("priority", "1"))
                .await
                .unwrap_err(),
            Error::InvalidInput(_)
        ));

        storage
            .documents()
            .delete(target, created_id(&created))
            .await
            .expect("error deleting document");
    }

    fn created_id(doc: &Document) -> uuid::Uuid {
        doc[ID_FIELD]
            .as_str()
            .and_then(|id| id.parse().ok())
            .expect("document without an id")
    }

    async fn test_index_names_do_not_collide(storage: Arc<dyn Storage>, project: &Project) {
        let schema = project.schema_name();
        let long = |suffix: &str| format!("{}_{suffix}", "x".repeat(50));
        let cases = [
            ("a", vec!["b_c".to_string()]),
            ("a_b", vec!["c".to_string()]),
            ("wide", vec![long("one"), long("two")]),
        ];

        for (table, names) in cases {
            let attributes: Vec<Attribute> = names
                .iter()
                .map(|n| Attribute::new(n.as_str(), AttributeType::String).indexed())
                .collect();
            let refs: Vec<&Attribute> = attributes.iter().collect();

            storage
                .databases()
                .create_table(schema.raw(), table)
                .await
                .expect("error creating table");
            storage
                .databases()
                .create_columns(schema.raw(), table, &refs)
                .await
                .unwrap_or_else(|e| panic!("error indexing {table}: {e}"));
        }
    }

    async fn test_rollback_discards_everything(storage: Arc<dyn Storage>, prefix: &str) {
        let user = storage.users().create().await.unwrap();
        let name = format!("{prefix}rolled_back");

        let uow = storage.begin().await.unwrap();
        let project = uow.projects().create(user.id, &name).await.unwrap();
        uow.databases().create_schema(&name).await.unwrap();
        uow.rollback().await.unwrap();
        uow.rollback().await.expect("second rollback must be a no-op");
        assert!(matches!(
            uow.commit().await.unwrap_err(),
            Error::TransactionFinished
        ));

        assert!(matches!(
            storage.projects().get(project.id).await.unwrap_err(),
            Error::NotFound(_)
        ));

        // The schema is gone too, so it can be created again
        let uow = storage.begin().await.unwrap();
        uow.databases().create_schema(&name).await.unwrap();
        uow.rollback().await.unwrap();
    }

    async fn test_error_propagation(
        storage: Arc<dyn Storage>,
        project: &Project,
        target: &TableTarget,
    ) {
        // Same project name twice
        let user = storage.users().create().await.unwrap();
        assert!(matches!(
            storage
                .projects()
                .create(user.id, &project.name)
                .await
                .unwrap_err(),
            Error::UniqueConstraintViolation(_)
        ));

        // Owner doesn't exist
        assert!(matches!(
            storage
                .projects()
                .create(uuid::Uuid::new_v4(), "orphan")
                .await
                .unwrap_err(),
            Error::FKConstraintViolation(_)
        ));

        // Same collection name twice in a project
        assert!(matches!(
            storage
                .collections()
                .create(project.id, "todos", &todo_attributes())
                .await
                .unwrap_err(),
            Error::UniqueConstraintViolation(_)
        ));

        assert!(matches!(
            storage
                .collections()
                .get(project.id, "missing")
                .await
                .unwrap_err(),
            Error::NotFound(_)
        ));

        // Required column left out
        let now = "2024-01-02T03:04:05Z";
        assert!(matches!(
            storage
                .documents()
                .create(
                    target,
                    &document(json!({
                        "id": uuid::Uuid::new_v4().to_string(),
                        "created_at": now,
                        "updated_at": now,
                    })),
                )
                .await
                .unwrap_err(),
            Error::InvalidInput(_)
        ));

        // Updating a row that isn't there
        assert!(matches!(
            storage
                .documents()
                .update(
                    target,
                    uuid::Uuid::new_v4(),
                    &document(json!({"title": "nothing"}))
                )
                .await
                .unwrap_err(),
            Error::NotFound(_)
        ));
    }
}

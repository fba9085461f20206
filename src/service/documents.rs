use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::data_types::{
    Document, DocumentId, ProjectId, CREATED_AT_FIELD, ID_FIELD, SYSTEM_FIELDS, UPDATED_AT_FIELD,
};
use crate::error::{Error, Result};
use crate::query::Q;
use crate::repository::interface::{
    Error as RepositoryError, Repositories, Storage, TableTarget,
};

/// Reject payloads that try to write a store-managed field
pub fn check_reserved_fields(data: &Document) -> Result<()> {
    match SYSTEM_FIELDS.iter().find(|f| data.contains_key(**f)) {
        Some(field) => Err(Error::validation(format!(
            "field {field:?} is managed by the store and can't be set"
        ))),
        None => Ok(()),
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn document_error(id: DocumentId) -> impl FnOnce(RepositoryError) -> Error {
    move |e| match e {
        RepositoryError::NotFound(_) => Error::not_found(format!("document {id} not found")),
        e => e.into(),
    }
}

/// Generic document CRUD, addressed by project and collection name
#[derive(Clone)]
pub struct DocumentService {
    storage: Arc<dyn Storage>,
}

impl DocumentService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Resolve the table backing a collection, with its column types
    pub async fn target(&self, project_id: ProjectId, collection: &str) -> Result<TableTarget> {
        let project = self
            .storage
            .projects()
            .get(project_id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => {
                    Error::not_found(format!("project {project_id} not found"))
                }
                e => e.into(),
            })?;
        let collection = self
            .storage
            .collections()
            .get(project.id, collection)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => {
                    Error::not_found(format!("collection {collection:?} not found"))
                }
                e => e.into(),
            })?;

        Ok(TableTarget::new(&project, &collection))
    }

    /// First document matching `q`. The schema and table of `q` are replaced
    /// with the collection's.
    pub async fn get(&self, project_id: ProjectId, collection: &str, q: Q) -> Result<Document> {
        let target = self.target(project_id, collection).await?;
        let q = q.schema(&target.schema).table(&target.table);

        self.storage
            .documents()
            .get(&target, &q)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => {
                    Error::not_found(format!("no matching document in {collection:?}"))
                }
                e => e.into(),
            })
    }

    pub async fn get_by_id(
        &self,
        project_id: ProjectId,
        collection: &str,
        id: DocumentId,
    ) -> Result<Document> {
        let target = self.target(project_id, collection).await?;
        let q = target.query().equal(ID_FIELD, id.to_string());

        self.storage
            .documents()
            .get(&target, &q)
            .await
            .map_err(document_error(id))
    }

    /// Insert a document, assigning its id and timestamps
    pub async fn create(
        &self,
        project_id: ProjectId,
        collection: &str,
        mut data: Document,
    ) -> Result<Document> {
        check_reserved_fields(&data)?;
        let target = self.target(project_id, collection).await?;

        let id = Uuid::new_v4();
        let now = now();
        data.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        data.insert(CREATED_AT_FIELD.to_string(), now.clone());
        data.insert(UPDATED_AT_FIELD.to_string(), now);

        let document = self.storage.documents().create(&target, &data).await?;
        debug!("Created document {id} in {collection:?}");
        Ok(document)
    }

    /// Overwrite the given fields of a document and refresh its update timestamp
    pub async fn update(
        &self,
        project_id: ProjectId,
        collection: &str,
        id: DocumentId,
        mut data: Document,
    ) -> Result<Document> {
        check_reserved_fields(&data)?;
        if data.is_empty() {
            return Err(Error::validation("nothing to update"));
        }
        let target = self.target(project_id, collection).await?;

        data.insert(UPDATED_AT_FIELD.to_string(), now());

        self.storage
            .documents()
            .update(&target, id, &data)
            .await
            .map_err(document_error(id))
    }

    pub async fn delete(&self, project_id: ProjectId, collection: &str, id: DocumentId) -> Result<()> {
        let target = self.target(project_id, collection).await?;

        self.storage
            .documents()
            .delete(&target, id)
            .await
            .map_err(document_error(id))?;
        debug!("Deleted document {id} from {collection:?}");
        Ok(())
    }
}

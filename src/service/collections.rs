use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::data_types::{is_system_field, Attribute, Collection, Project, ProjectId};
use crate::error::{Error, Result};
use crate::repository::interface::{
    Error as RepositoryError, Repositories, Storage, UnitOfWork,
};

use super::{provision, Provisioned};

/// Merge caller-declared attributes with the system ones. Declared attributes
/// may not shadow a system field, set `primary` (`id` is always the primary
/// key) or repeat a name.
pub fn collection_attributes(declared: Vec<Attribute>) -> Result<BTreeMap<String, Attribute>> {
    let mut attributes: BTreeMap<String, Attribute> = Collection::system_attributes()
        .into_iter()
        .map(|a| (a.name.clone(), a))
        .collect();

    for attribute in declared {
        if attribute.name.is_empty() {
            return Err(Error::validation("attribute name must not be empty"));
        }
        if is_system_field(&attribute.name) {
            return Err(Error::validation(format!(
                "attribute {:?} is managed by the store",
                attribute.name
            )));
        }
        if attribute.primary {
            return Err(Error::validation(format!(
                "attribute {:?} can't be primary: \"id\" is the primary key",
                attribute.name
            )));
        }
        if attributes.contains_key(&attribute.name) {
            return Err(Error::validation(format!(
                "attribute {:?} declared more than once",
                attribute.name
            )));
        }

        attributes.insert(attribute.name.clone(), attribute);
    }

    Ok(attributes)
}

/// A collection to insert along with its table
pub struct NewCollection {
    pub project_id: ProjectId,
    pub name: String,
    pub attributes: BTreeMap<String, Attribute>,
}

#[async_trait]
impl Provisioned for NewCollection {
    type Record = (Project, Collection);

    async fn insert(&self, uow: &dyn UnitOfWork) -> Result<Self::Record> {
        let project = uow
            .projects()
            .get(self.project_id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => {
                    Error::not_found(format!("project {} not found", self.project_id))
                }
                e => e.into(),
            })?;

        let collection = uow
            .collections()
            .create(project.id, &self.name, &self.attributes)
            .await
            .map_err(|e| match e {
                RepositoryError::UniqueConstraintViolation(_) => {
                    Error::conflict(format!("collection {:?} already exists", self.name))
                }
                e => e.into(),
            })?;

        Ok((project, collection))
    }

    async fn create_objects(&self, uow: &dyn UnitOfWork, record: &Self::Record) -> Result<()> {
        let (project, collection) = record;
        let schema = project.schema_name();
        let table = collection.table_name();

        uow.databases()
            .create_table(schema.raw(), table.raw())
            .await?;

        let attributes: Vec<&Attribute> = collection.ordered_attributes().collect();
        uow.databases()
            .create_columns(schema.raw(), table.raw(), &attributes)
            .await?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct CollectionService {
    storage: Arc<dyn Storage>,
}

impl CollectionService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn create(
        &self,
        project_id: ProjectId,
        name: &str,
        attributes: Vec<Attribute>,
    ) -> Result<Collection> {
        if name.is_empty() {
            return Err(Error::validation("collection name must not be empty"));
        }

        let entity = NewCollection {
            project_id,
            name: name.to_string(),
            attributes: collection_attributes(attributes)?,
        };
        let (project, collection) = provision(self.storage.as_ref(), &entity).await?;

        info!(
            "Created collection {:?} with {} attributes in project {:?}",
            collection.name,
            collection.attributes.len(),
            project.name
        );
        Ok(collection)
    }

    pub async fn get(&self, project_id: ProjectId, name: &str) -> Result<Collection> {
        self.storage
            .collections()
            .get(project_id, name)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => {
                    Error::not_found(format!("collection {name:?} not found"))
                }
                e => e.into(),
            })
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::data_types::{Project, ProjectId, UserId};
use crate::error::{Error, Result};
use crate::repository::interface::{Error as RepositoryError, Repositories, Storage, UnitOfWork};

use super::{provision, Provisioned};

/// A project to insert along with its tenant schema
pub struct NewProject {
    pub user_id: UserId,
    pub name: String,
}

#[async_trait]
impl Provisioned for NewProject {
    type Record = Project;

    async fn insert(&self, uow: &dyn UnitOfWork) -> Result<Project> {
        uow.projects()
            .create(self.user_id, &self.name)
            .await
            .map_err(|e| match e {
                RepositoryError::UniqueConstraintViolation(_) => {
                    Error::conflict(format!("project {:?} already exists", self.name))
                }
                RepositoryError::FKConstraintViolation(_) => {
                    Error::not_found(format!("user {} not found", self.user_id))
                }
                e => e.into(),
            })
    }

    async fn create_objects(&self, uow: &dyn UnitOfWork, project: &Project) -> Result<()> {
        uow.databases()
            .create_schema(project.schema_name().raw())
            .await
            .map_err(|e| match e {
                RepositoryError::UniqueConstraintViolation(_) => Error::conflict(format!(
                    "schema {} already exists",
                    project.schema_name()
                )),
                e => e.into(),
            })
    }
}

#[derive(Clone)]
pub struct ProjectService {
    storage: Arc<dyn Storage>,
}

impl ProjectService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn create(&self, user_id: UserId, name: &str) -> Result<Project> {
        if name.is_empty() {
            return Err(Error::validation("project name must not be empty"));
        }

        let project = provision(
            self.storage.as_ref(),
            &NewProject {
                user_id,
                name: name.to_string(),
            },
        )
        .await?;

        info!("Created project {:?} ({})", project.name, project.id);
        Ok(project)
    }

    pub async fn get(&self, id: ProjectId) -> Result<Project> {
        self.storage
            .projects()
            .get(id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => Error::not_found(format!("project {id} not found")),
                e => e.into(),
            })
    }
}

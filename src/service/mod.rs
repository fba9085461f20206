//! Write workflows over a [`Storage`] backend.
//!
//! Multi-step writes run inside one unit of work: they either commit as a
//! whole, or leave nothing behind.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{Error, Result};
use crate::repository::interface::{Storage, UnitOfWork};

pub mod collections;
pub mod documents;
pub mod projects;
pub mod users;

pub use collections::CollectionService;
pub use documents::DocumentService;
pub use projects::ProjectService;
pub use users::UserService;

/// An entity whose creation inserts a metadata row and then creates the
/// relational objects backing it, all in one transaction
#[async_trait]
pub trait Provisioned: Send + Sync {
    type Record: Send + Sync;

    /// Resolve what the entity depends on and insert its metadata
    async fn insert(&self, uow: &dyn UnitOfWork) -> Result<Self::Record>;

    /// Create the schema/table/columns for an inserted record
    async fn create_objects(&self, uow: &dyn UnitOfWork, record: &Self::Record) -> Result<()>;
}

pub async fn provision<P: Provisioned>(storage: &dyn Storage, entity: &P) -> Result<P::Record> {
    let uow = storage.begin().await?;

    let outcome = async {
        let record = entity.insert(uow.as_ref()).await?;
        entity.create_objects(uow.as_ref(), &record).await?;
        Ok::<_, Error>(record)
    }
    .await;

    finish(uow.as_ref(), outcome).await
}

/// Commit if `outcome` succeeded, then roll back unconditionally. The rollback
/// is a no-op once committed, and its own failure never replaces `outcome`.
pub async fn finish<T>(uow: &dyn UnitOfWork, outcome: Result<T>) -> Result<T> {
    let outcome = match outcome {
        Ok(value) => uow.commit().await.map(|_| value).map_err(Into::into),
        Err(e) => Err(e),
    };

    if let Err(e) = uow.rollback().await {
        warn!("Failed to roll back: {e}");
    }

    outcome
}

/// Every service, sharing one storage backend
#[derive(Clone)]
pub struct App {
    pub storage: Arc<dyn Storage>,
    pub users: UserService,
    pub projects: ProjectService,
    pub collections: CollectionService,
    pub documents: DocumentService,
}

impl App {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            users: UserService::new(storage.clone()),
            projects: ProjectService::new(storage.clone()),
            collections: CollectionService::new(storage.clone()),
            documents: DocumentService::new(storage.clone()),
            storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::ErrorKind;
    use crate::repository::interface::{
        CollectionRepository, DatabaseRepository, DocumentRepository, Error as RepositoryError,
        ProjectRepository, Repositories, UserRepository,
    };
    use crate::repository::memory::MemoryStorage;

    /// Counts calls and fails on demand
    struct Recorder {
        inner: Box<dyn UnitOfWork>,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
        fail_commit: bool,
        fail_rollback: bool,
    }

    impl Recorder {
        async fn new(fail_commit: bool, fail_rollback: bool) -> Self {
            let storage = MemoryStorage::new();
            Self {
                inner: storage.begin().await.unwrap(),
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
                fail_commit,
                fail_rollback,
            }
        }
    }

    impl Repositories for Recorder {
        fn users(&self) -> &dyn UserRepository {
            self.inner.users()
        }

        fn projects(&self) -> &dyn ProjectRepository {
            self.inner.projects()
        }

        fn collections(&self) -> &dyn CollectionRepository {
            self.inner.collections()
        }

        fn databases(&self) -> &dyn DatabaseRepository {
            self.inner.databases()
        }

        fn documents(&self) -> &dyn DocumentRepository {
            self.inner.documents()
        }
    }

    #[async_trait]
    impl UnitOfWork for Recorder {
        async fn commit(&self) -> crate::repository::interface::Result<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            if self.fail_commit {
                return Err(RepositoryError::UniqueConstraintViolation("late".into()));
            }
            self.inner.commit().await
        }

        async fn rollback(&self) -> crate::repository::interface::Result<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            if self.fail_rollback {
                return Err(RepositoryError::TransactionFinished);
            }
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn test_finish_commits_then_rolls_back() {
        let uow = Recorder::new(false, false).await;
        assert_eq!(finish(&uow, Ok(5)).await.unwrap(), 5);
        assert_eq!(uow.commits.load(Ordering::SeqCst), 1);
        assert_eq!(uow.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finish_failure_skips_commit() {
        let uow = Recorder::new(false, false).await;
        let err = finish::<()>(&uow, Err(Error::validation("bad"))).await.unwrap_err();
        assert_eq!(err, Error::validation("bad"));
        assert_eq!(uow.commits.load(Ordering::SeqCst), 0);
        assert_eq!(uow.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finish_reports_commit_failure() {
        let uow = Recorder::new(true, false).await;
        let err = finish(&uow, Ok(())).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_finish_rollback_failure_does_not_mask_outcome() {
        let uow = Recorder::new(false, true).await;
        assert_eq!(finish(&uow, Ok("done")).await.unwrap(), "done");

        let uow = Recorder::new(false, true).await;
        let err = finish::<()>(&uow, Err(Error::not_found("gone"))).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}

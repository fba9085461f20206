mod conn;
mod repos;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    migrate::{MigrateDatabase, Migrator},
    postgres::PgPoolOptions,
    Executor, PgPool, Postgres,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use conn::{bind, PgConn};
pub use repos::{
    PgCollectionRepository, PgDatabaseRepository, PgDocumentRepository, PgProjectRepository,
    PgUserRepository,
};

use super::interface::{
    CollectionRepository, DatabaseRepository, DocumentRepository, Error, ProjectRepository,
    Repositories, Result, Storage, UnitOfWork, UserRepository,
};

/// Every repository, bound to one [`PgConn`]
#[derive(Debug)]
pub struct PgRepositories {
    users: PgUserRepository,
    projects: PgProjectRepository,
    collections: PgCollectionRepository,
    databases: PgDatabaseRepository,
    documents: PgDocumentRepository,
}

impl PgRepositories {
    pub fn new(conn: PgConn) -> Self {
        Self {
            users: PgUserRepository::new(conn.clone()),
            projects: PgProjectRepository::new(conn.clone()),
            collections: PgCollectionRepository::new(conn.clone()),
            databases: PgDatabaseRepository::new(conn.clone()),
            documents: PgDocumentRepository::new(conn),
        }
    }
}

impl Repositories for PgRepositories {
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
pub struct PostgresStorage {
    pub executor: PgPool,
    pub schema_name: String,
    repositories: PgRepositories,
}

impl PostgresStorage {
    pub const MIGRATOR: Migrator = sqlx::migrate!("migrations/postgres");

    /// Connect, creating the database and the metadata schema if needed, and
    /// bring the metadata tables up to date
    pub async fn try_new(
        dsn: String,
        schema_name: String,
        max_connections: u32,
    ) -> std::result::Result<Self, sqlx::Error> {
        if !Postgres::database_exists(&dsn).await? {
            let _ = Postgres::create_database(&dsn).await;
        }

        let storage = PostgresStorage::connect(dsn, schema_name.clone(), max_connections).await?;

        storage
            .executor
            .execute(format!("CREATE SCHEMA IF NOT EXISTS {schema_name};").as_str())
            .await?;

        Self::MIGRATOR.run(&storage.executor).await?;
        Ok(storage)
    }

    pub async fn connect(
        dsn: String,
        schema_name: String,
        max_connections: u32,
    ) -> std::result::Result<Self, sqlx::Error> {
        let schema_name_2 = schema_name.clone();

        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .idle_timeout(Duration::from_millis(30000))
            .test_before_acquire(true)
            .after_connect(move |c, _m| {
                let schema_name = schema_name.to_owned();
                Box::pin(async move {
                    let query = format!("SET search_path TO {schema_name},public;");
                    c.execute(sqlx::query(&query)).await?;
                    Ok(())
                })
            })
            .connect(&dsn)
            .await?;

        Ok(Self {
            repositories: PgRepositories::new(PgConn::Pool(pool.clone())),
            executor: pool,
            schema_name: schema_name_2,
        })
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.postgresql.org/docs/current/errcodes-appendix.html
            if let Some(code) = d.code() {
                match code.as_ref() {
                    // unique_violation, duplicate_schema, duplicate_table, duplicate_object,
                    // duplicate_column
                    "23505" | "42P06" | "42P07" | "42710" | "42701" => {
                        return Error::UniqueConstraintViolation(d.message().to_string())
                    }
                    "23503" => return Error::FKConstraintViolation(d.message().to_string()),
                    // not_null_violation, invalid_text_representation, undefined_column,
                    // numeric_value_out_of_range, undefined_function (operator on wrong types)
                    "23502" | "22P02" | "42703" | "22003" | "42883" => {
                        return Error::InvalidInput(d.message().to_string())
                    }
                    _ => {}
                }
            }
        }
        Error::SqlxError(error)
    }
}

impl Repositories for PostgresStorage {
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
impl Storage for PostgresStorage {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self
            .executor
            .begin()
            .await
            .map_err(PostgresStorage::interpret_error)?;
        debug!("Transaction started");

        let tx = Arc::new(Mutex::new(Some(tx)));
        Ok(Box::new(PostgresUnitOfWork {
            repositories: PgRepositories::new(PgConn::Transaction(tx.clone())),
            tx,
        }))
    }
}

/// A transaction and the repositories bound to it.
///
/// Dropping an unfinished unit of work (for instance, because the request
/// future was cancelled) drops the transaction, which sqlx rolls back.
pub struct PostgresUnitOfWork {
    tx: Arc<Mutex<Option<sqlx::Transaction<'static, Postgres>>>>,
    repositories: PgRepositories,
}

impl Repositories for PostgresUnitOfWork {
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
impl UnitOfWork for PostgresUnitOfWork {
    async fn commit(&self) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or(Error::TransactionFinished)?;
        tx.commit()
            .await
            .map_err(PostgresStorage::interpret_error)?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let Some(tx) = self.tx.lock().await.take() else {
            return Ok(());
        };
        tx.rollback().await.map_err(|e| {
            warn!("Error rolling back transaction: {e}");
            PostgresStorage::interpret_error(e)
        })?;
        debug!("Transaction rolled back");
        Ok(())
    }
}

pub mod testutils {
    use rand::Rng;

    use super::PostgresStorage;

    pub fn get_random_schema() -> String {
        let mut rng = rand::thread_rng();
        (&mut rng)
            .sample_iter(rand::distributions::Alphanumeric)
            .filter(|c| c.is_ascii_alphabetic())
            .take(20)
            .map(char::from)
            .collect::<String>()
            .to_lowercase()
    }

    pub async fn make_storage(dsn: &str) -> PostgresStorage {
        let schema_name = get_random_schema();

        PostgresStorage::try_new(dsn.to_string(), schema_name, 4)
            .await
            .expect("Error setting up the database")
    }
}

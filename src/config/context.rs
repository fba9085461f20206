use std::sync::Arc;

use tracing::info;

use crate::repository::{interface::Storage, memory::MemoryStorage, postgres::PostgresStorage};
use crate::service::App;

use super::schema;

/// Initialize the storage backend the config asks for, running metadata
/// migrations if needed
pub async fn build_storage(
    config: &schema::DocbaseConfig,
) -> Result<Arc<dyn Storage>, sqlx::Error> {
    let storage: Arc<dyn Storage> = match &config.catalog {
        schema::Catalog::Postgres(schema::Postgres {
            dsn,
            schema,
            max_connections,
        }) => {
            info!("Connecting to the Postgres catalog (metadata schema {schema:?})");
            Arc::new(
                PostgresStorage::try_new(dsn.to_string(), schema.to_string(), *max_connections)
                    .await?,
            )
        }
        schema::Catalog::InMemory(_) => {
            info!("Using an in-memory catalog: nothing will persist across restarts");
            Arc::new(MemoryStorage::new())
        }
    };

    Ok(storage)
}

pub async fn build_app(config: &schema::DocbaseConfig) -> Result<App, sqlx::Error> {
    Ok(App::new(build_storage(config).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_config_to_app() {
        let config =
            schema::load_config_from_string("[catalog]\ntype = \"memory\"", false).unwrap();

        let app = build_app(&config).await.unwrap();

        // The services work against the configured backend
        let user = app.users.register().await.unwrap();
        let project = app.projects.create(user.id, "Acme").await.unwrap();
        assert_eq!(app.projects.get(project.id).await.unwrap(), project);
    }
}

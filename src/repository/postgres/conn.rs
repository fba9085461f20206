use std::fmt::{self, Debug};
use std::sync::Arc;

use sqlx::postgres::{PgArguments, PgQueryResult, PgRow};
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

use crate::repository::builder::Statement;
use crate::repository::interface::{Error, Result, TableTarget};
use crate::repository::param::Param;

use super::PostgresStorage;

/// Anything statements can run against: the shared pool, or one open
/// transaction. Every repository is written against this, regardless of
/// whether it is transaction-scoped.
#[derive(Clone)]
pub enum PgConn {
    Pool(PgPool),
    /// `None` once the transaction was committed or rolled back
    Transaction(Arc<Mutex<Option<Transaction<'static, Postgres>>>>),
}

impl Debug for PgConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgConn::Pool(_) => f.write_str("PgConn::Pool"),
            PgConn::Transaction(_) => f.write_str("PgConn::Transaction"),
        }
    }
}

macro_rules! run {
    ($self: ident, $sql: expr, $args: expr, $method: ident) => {{
        debug!("Executing {}", $sql);
        let query = sqlx::query_with($sql, $args);
        let result = match $self {
            PgConn::Pool(pool) => query.$method(pool).await,
            PgConn::Transaction(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or(Error::TransactionFinished)?;
                query.$method(&mut **tx).await
            }
        };
        result.map_err(PostgresStorage::interpret_error)
    }};
}

impl PgConn {
    pub async fn execute(&self, sql: &str, args: PgArguments) -> Result<PgQueryResult> {
        run!(self, sql, args, execute)
    }

    pub async fn fetch_one(&self, sql: &str, args: PgArguments) -> Result<PgRow> {
        run!(self, sql, args, fetch_one)
    }

    pub async fn fetch_optional(&self, sql: &str, args: PgArguments) -> Result<Option<PgRow>> {
        run!(self, sql, args, fetch_optional)
    }
}

/// Typed arguments for every parameter of `stmt`
pub fn bind(stmt: &Statement, target: &TableTarget) -> Result<PgArguments> {
    let mut args = PgArguments::default();
    for arg in &stmt.args {
        Param::for_arg(arg, target)?.add_to(&mut args);
    }
    Ok(args)
}

use crate::domain::model::{ExecutedStatement, SqlValue};
use crate::utils::error::Result;
use async_trait::async_trait;

/// A pool of database connections able to run one statement at a time per checkout.
#[async_trait]
pub trait SqlPool: Send + Sync + 'static {
    /// Checks out a connection, runs `query` with positional `params`, and
    /// returns everything the statement produced.
    async fn execute(&self, query: &str, params: &[SqlValue]) -> Result<ExecutedStatement>;

    async fn close(&self);
}

/// Creates pools from an ODBC-style connection string.
#[async_trait]
pub trait SqlConnector: Send + Sync {
    type Pool: SqlPool;

    async fn create_pool(&self, connection_string: &str) -> Result<Self::Pool>;
}

/// Supplies OAuth access tokens; each call opens a fresh authenticated session.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

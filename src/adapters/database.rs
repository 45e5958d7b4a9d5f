use crate::adapters::mssql::MssqlConnector;
use crate::config::ConnectionConfig;
use crate::core::{
    ExecutedStatement, QueryResult, Record, ResourceFactory, ResourceHandle, Scoped, SqlConnector,
    SqlPool, SqlValue,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Builds the pool for a connection string through a [`SqlConnector`].
pub struct PoolFactory<C: SqlConnector> {
    connector: C,
    connection_string: String,
}

#[async_trait]
impl<C: SqlConnector> ResourceFactory for PoolFactory<C> {
    type Resource = C::Pool;

    async fn create(&self) -> Result<C::Pool> {
        tracing::debug!("Creating database connection pool");
        self.connector.create_pool(&self.connection_string).await
    }

    async fn teardown(&self, pool: Arc<C::Pool>) {
        pool.close().await;
        tracing::debug!("Database connection pool closed");
    }
}

/// Lazily pooled database access. Every failure is logged and returned to the caller.
pub struct DatabaseConnection<C: SqlConnector = MssqlConnector> {
    pool: ResourceHandle<PoolFactory<C>>,
}

impl DatabaseConnection<MssqlConnector> {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_connector(config, MssqlConnector::default())
    }

    pub fn from_env() -> Self {
        Self::new(ConnectionConfig::from_env())
    }
}

impl<C: SqlConnector> DatabaseConnection<C> {
    pub fn with_connector(config: ConnectionConfig, connector: C) -> Self {
        Self {
            pool: ResourceHandle::new(PoolFactory {
                connector,
                connection_string: config.connection_string(),
            }),
        }
    }

    pub fn connection_string(&self) -> &str {
        &self.pool.factory().connection_string
    }

    /// Returns the pool, creating it on first use.
    pub async fn connect(&self) -> Result<Arc<C::Pool>> {
        self.pool.acquire().await
    }

    pub async fn is_connected(&self) -> bool {
        self.pool.is_live().await
    }

    /// Runs `query` and shapes what it produced.
    ///
    /// Statements with a column description yield their rows, as records keyed
    /// by column name when `as_mapping` is set. Statements without one yield the
    /// affected row count.
    pub async fn execute_query(
        &self,
        query: &str,
        params: Option<&[SqlValue]>,
        as_mapping: bool,
    ) -> Result<QueryResult> {
        match self.run(query, params).await {
            Ok(statement) => Ok(shape_result(statement, as_mapping)),
            Err(e) => {
                tracing::error!("Error while executing query: {}", e);
                Err(e)
            }
        }
    }

    async fn run(&self, query: &str, params: Option<&[SqlValue]>) -> Result<ExecutedStatement> {
        let pool = self.connect().await?;
        pool.execute(query, params.unwrap_or(&[])).await
    }

    /// Closes the pool. Safe to call when never connected.
    pub async fn close(&self) {
        self.pool.release().await;
    }
}

#[async_trait]
impl<C: SqlConnector> Scoped for DatabaseConnection<C> {
    async fn enter(&self) -> Result<()> {
        self.connect().await.map(|_| ())
    }

    async fn exit(&self) {
        self.close().await;
    }
}

fn shape_result(statement: ExecutedStatement, as_mapping: bool) -> QueryResult {
    match statement.description {
        Some(columns) if as_mapping => QueryResult::Records(
            statement
                .rows
                .into_iter()
                .map(|row| Record::from_columns(&columns, row))
                .collect(),
        ),
        Some(_) => QueryResult::Rows(statement.rows),
        None => QueryResult::RowsAffected(statement.rows_affected),
    }
}

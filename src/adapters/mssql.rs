//! SQL Server backend for [`DatabaseConnection`](crate::adapters::database::DatabaseConnection).
//!
//! Connections speak TDS through tiberius and are pooled with deadpool. The
//! ODBC-style connection string is translated into a tiberius config; the
//! `Driver` entry has no meaning for TDS and is ignored.

use crate::core::{ExecutedStatement, SqlConnector, SqlPool, SqlValue};
use crate::utils::error::{BizError, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use deadpool::managed::{Manager, Metrics, Pool, RecycleResult};
use futures_util::TryStreamExt;
use std::fmt;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, Query, QueryItem, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

pub type MssqlClient = Client<Compat<TcpStream>>;

pub const DEFAULT_POOL_SIZE: usize = 10;
const DEFAULT_PORT: u16 = 1433;

/// Sent as its own request after each statement, on the same connection.
const ROWCOUNT_QUERY: &str = "SELECT @@ROWCOUNT";

/// Splits `key=value;` pairs, honouring `{...}` quoting around values.
pub fn parse_connection_string(connection_string: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut segment = String::new();
    let mut in_braces = false;

    for ch in connection_string.chars().chain(std::iter::once(';')) {
        match ch {
            '{' => {
                in_braces = true;
                segment.push(ch);
            }
            '}' => {
                in_braces = false;
                segment.push(ch);
            }
            ';' if !in_braces => {
                if let Some((key, value)) = segment.split_once('=') {
                    let value = value.trim();
                    let value = value
                        .strip_prefix('{')
                        .and_then(|v| v.strip_suffix('}'))
                        .unwrap_or(value);
                    pairs.push((key.trim().to_string(), value.to_string()));
                }
                segment.clear();
            }
            _ => segment.push(ch),
        }
    }

    pairs
}

/// Builds a tiberius config from an ODBC-style connection string.
pub fn tds_config(connection_string: &str) -> Result<Config> {
    let mut config = Config::new();
    let mut user = String::new();
    let mut password = String::new();

    for (key, value) in parse_connection_string(connection_string) {
        match key.to_lowercase().as_str() {
            "server" => {
                let address = value.strip_prefix("tcp:").unwrap_or(&value);
                if address.contains('\\') {
                    return Err(BizError::config(format!(
                        "named instances are not supported, use host,port: {}",
                        address
                    )));
                }
                let (host, port) = match address.split_once(',') {
                    Some((host, port)) => {
                        let port = port.trim().parse::<u16>().map_err(|e| {
                            BizError::InvalidConfigValueError {
                                field: "Server".to_string(),
                                value: value.clone(),
                                reason: format!("invalid port: {}", e),
                            }
                        })?;
                        (host.trim(), port)
                    }
                    None => (address.trim(), DEFAULT_PORT),
                };
                config.host(host);
                config.port(port);
            }
            "database" => config.database(&value),
            "uid" => user = value,
            "pwd" => password = value,
            "trustservercertificate" => {
                if crate::config::parse_flag(&value) {
                    config.trust_cert();
                }
            }
            _ => {}
        }
    }

    config.authentication(AuthMethod::sql_server(&user, &password));
    Ok(config)
}

/// Deadpool manager opening TDS connections.
pub struct MssqlManager {
    config: Config,
}

impl fmt::Debug for MssqlManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlManager")
            .field("addr", &self.config.get_addr())
            .finish()
    }
}

impl MssqlManager {
    async fn connect(config: Config) -> std::result::Result<MssqlClient, tiberius::error::Error> {
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        Client::connect(config, tcp.compat_write()).await
    }
}

impl Manager for MssqlManager {
    type Type = MssqlClient;
    type Error = tiberius::error::Error;

    async fn create(&self) -> std::result::Result<MssqlClient, tiberius::error::Error> {
        match Self::connect(self.config.clone()).await {
            // Azure SQL may redirect the login to another node.
            Err(tiberius::error::Error::Routing { host, port }) => {
                let mut config = self.config.clone();
                config.host(&host);
                config.port(port);
                Self::connect(config).await
            }
            other => other,
        }
    }

    async fn recycle(
        &self,
        client: &mut MssqlClient,
        _metrics: &Metrics,
    ) -> RecycleResult<tiberius::error::Error> {
        client.simple_query("SELECT 1").await?.into_results().await?;
        Ok(())
    }
}

/// Connector for SQL Server pools.
#[derive(Debug, Clone)]
pub struct MssqlConnector {
    max_size: usize,
}

impl MssqlConnector {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl Default for MssqlConnector {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

#[async_trait]
impl SqlConnector for MssqlConnector {
    type Pool = MssqlPool;

    async fn create_pool(&self, connection_string: &str) -> Result<MssqlPool> {
        let manager = MssqlManager {
            config: tds_config(connection_string)?,
        };
        let pool = Pool::builder(manager)
            .max_size(self.max_size)
            .build()
            .map_err(|e| BizError::PoolError {
                message: format!("failed to create SQL Server pool: {}", e),
            })?;
        Ok(MssqlPool { pool })
    }
}

pub struct MssqlPool {
    pool: Pool<MssqlManager>,
}

#[async_trait]
impl SqlPool for MssqlPool {
    async fn execute(&self, query: &str, params: &[SqlValue]) -> Result<ExecutedStatement> {
        let mut client = self.pool.get().await.map_err(|e| BizError::PoolError {
            message: e.to_string(),
        })?;

        let [statement_sql, count_sql] = batch_requests(query);
        let mut statement = Query::new(statement_sql);
        for param in params {
            bind_value(&mut statement, param);
        }

        let mut stream = statement.query(&mut *client).await?;
        let mut result_sets: Vec<ResultSet> = Vec::new();
        while let Some(item) = stream.try_next().await? {
            match item {
                QueryItem::Metadata(meta) => result_sets.push((
                    meta.columns()
                        .iter()
                        .map(|column| column.name().to_string())
                        .collect(),
                    Vec::new(),
                )),
                QueryItem::Row(row) => {
                    if let Some((_, rows)) = result_sets.last_mut() {
                        rows.push(row_values(row)?);
                    }
                }
            }
        }
        drop(stream);

        // Same connection, so @@ROWCOUNT still describes the caller's batch.
        let count_row = client.simple_query(count_sql).await?.into_row().await?;
        let count = match &count_row {
            Some(row) => row.try_get::<i32, _>(0)?,
            None => None,
        };
        let rows_affected = count.and_then(|count| u64::try_from(count).ok()).unwrap_or(0);

        Ok(shape_statement(result_sets, rows_affected))
    }

    async fn close(&self) {
        self.pool.close();
    }
}

type ResultSet = (Vec<String>, Vec<Vec<SqlValue>>);

/// The two requests `execute` sends, in order: the caller's text untouched,
/// then the row-count lookup.
fn batch_requests(query: &str) -> [&str; 2] {
    [query, ROWCOUNT_QUERY]
}

/// The first result set becomes the statement output; later ones are dropped.
fn shape_statement(result_sets: Vec<ResultSet>, rows_affected: u64) -> ExecutedStatement {
    match result_sets.into_iter().next() {
        Some((columns, rows)) => ExecutedStatement {
            description: Some(columns),
            rows,
            rows_affected,
        },
        None => ExecutedStatement {
            description: None,
            rows: Vec::new(),
            rows_affected,
        },
    }
}

fn bind_value(statement: &mut Query<'_>, value: &SqlValue) {
    match value {
        SqlValue::Null => statement.bind(Option::<String>::None),
        SqlValue::Bool(v) => statement.bind(*v),
        SqlValue::Int(v) => statement.bind(*v),
        SqlValue::Float(v) => statement.bind(*v),
        SqlValue::Text(v) => statement.bind(v.clone()),
        SqlValue::Bytes(v) => statement.bind(v.clone()),
        SqlValue::Timestamp(v) => statement.bind(*v),
        // The server converts the text to the target column's precision.
        SqlValue::Decimal(v) => statement.bind(v.clone()),
    }
}

fn row_values(row: Row) -> Result<Vec<SqlValue>> {
    row.into_iter().map(|data| column_value(&data)).collect()
}

fn column_value(data: &ColumnData<'static>) -> Result<SqlValue> {
    #[allow(unreachable_patterns)]
    let value = match data {
        ColumnData::U8(v) => v.map(|v| SqlValue::Int(i64::from(v))),
        ColumnData::I16(v) => v.map(|v| SqlValue::Int(i64::from(v))),
        ColumnData::I32(v) => v.map(|v| SqlValue::Int(i64::from(v))),
        ColumnData::I64(v) => v.map(SqlValue::Int),
        ColumnData::F32(v) => v.map(|v| SqlValue::Float(f64::from(v))),
        ColumnData::F64(v) => v.map(SqlValue::Float),
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::Text(s.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlValue::Bytes(b.to_vec())),
        ColumnData::Guid(v) => v.map(|g| SqlValue::Text(g.to_string())),
        ColumnData::Numeric(v) => v.map(|n| SqlValue::Decimal(format_numeric(n.value(), n.scale()))),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data)?.map(SqlValue::Timestamp)
        }
        ColumnData::Date(_) => NaiveDate::from_sql(data)?.map(|d| SqlValue::Text(d.to_string())),
        ColumnData::Time(_) => NaiveTime::from_sql(data)?.map(|t| SqlValue::Text(t.to_string())),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(data)?.map(|dt| SqlValue::Text(dt.to_rfc3339()))
        }
        other => Some(SqlValue::Text(format!("{:?}", other))),
    };

    Ok(value.unwrap_or(SqlValue::Null))
}

/// Renders a scaled integer exactly: `(-123400, 4)` becomes `-12.3400`.
fn format_numeric(value: i128, scale: u8) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let digits = value.unsigned_abs().to_string();
    let scale = usize::from(scale);
    if scale == 0 {
        return format!("{}{}", sign, digits);
    }

    let padded = format!("{:0>width$}", digits, width = scale + 1);
    let (whole, fraction) = padded.split_at(padded.len() - scale);
    format!("{}{}.{}", sign, whole, fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use tiberius::numeric::Numeric;

    #[test]
    fn test_parse_connection_string_handles_braces() {
        let pairs = parse_connection_string(
            "Driver={ODBC Driver 18 for SQL Server};Server=db;PWD={a;b};",
        );

        assert_eq!(
            pairs,
            vec![
                ("Driver".to_string(), "ODBC Driver 18 for SQL Server".to_string()),
                ("Server".to_string(), "db".to_string()),
                ("PWD".to_string(), "a;b".to_string()),
            ]
        );
    }

    #[test]
    fn test_tds_config_from_connection_config() {
        let connection_string = ConnectionConfig::new(
            crate::config::DEFAULT_ODBC_DRIVER,
            "tcp:db01.internal,14330",
            "sales",
            "app",
            "pw",
        )
        .connection_string();

        let config = tds_config(&connection_string).unwrap();
        assert_eq!(config.get_addr(), "db01.internal:14330");
    }

    #[test]
    fn test_tds_config_default_port() {
        let config = tds_config("Server=db01;Database=x;UID=u;PWD=p;").unwrap();
        assert_eq!(config.get_addr(), "db01:1433");
    }

    #[test]
    fn test_tds_config_rejects_bad_port() {
        assert!(tds_config("Server=db01,notaport;").is_err());
        assert!(tds_config("Server=db01\\SQLEXPRESS;").is_err());
    }

    #[test]
    fn test_statement_text_is_sent_unchanged() {
        for query in [
            "CREATE PROCEDURE dbo.refresh_totals AS SELECT 1",
            "CREATE VIEW dbo.open_orders AS SELECT id FROM orders WHERE closed = 0",
            "DELETE FROM t WHERE x=0; ",
        ] {
            let [statement, count] = batch_requests(query);
            assert_eq!(statement, query);
            assert_eq!(count, "SELECT @@ROWCOUNT");
        }
    }

    #[test]
    fn test_shape_statement_without_result_set() {
        let statement = shape_statement(Vec::new(), 3);
        assert_eq!(statement.description, None);
        assert!(statement.rows.is_empty());
        assert_eq!(statement.rows_affected, 3);
    }

    #[test]
    fn test_shape_statement_keeps_first_result_set() {
        let sets = vec![
            (
                vec!["id".to_string()],
                vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]],
            ),
            (vec!["other".to_string()], vec![vec![SqlValue::Int(9)]]),
        ];

        let statement = shape_statement(sets, 2);
        assert_eq!(statement.description, Some(vec!["id".to_string()]));
        assert_eq!(statement.rows.len(), 2);
        assert_eq!(statement.rows_affected, 2);
    }

    #[test]
    fn test_column_value_conversions() {
        assert_eq!(column_value(&ColumnData::I32(Some(7))).unwrap(), SqlValue::Int(7));
        assert_eq!(column_value(&ColumnData::I32(None)).unwrap(), SqlValue::Null);
        assert_eq!(
            column_value(&ColumnData::Bit(Some(true))).unwrap(),
            SqlValue::Bool(true)
        );
        assert_eq!(
            column_value(&ColumnData::String(Some("abc".into()))).unwrap(),
            SqlValue::Text("abc".to_string())
        );
    }

    #[test]
    fn test_numeric_keeps_full_precision() {
        let big = Numeric::new_with_scale(12_345_678_901_234_567_890_123_456_789_012_345_678, 4);
        assert_eq!(
            column_value(&ColumnData::Numeric(Some(big))).unwrap(),
            SqlValue::Decimal("1234567890123456789012345678901234.5678".to_string())
        );
        assert_eq!(format_numeric(-123_400, 4), "-12.3400");
        assert_eq!(format_numeric(5, 3), "0.005");
        assert_eq!(format_numeric(-7, 0), "-7");
        assert_eq!(column_value(&ColumnData::Numeric(None)).unwrap(), SqlValue::Null);
    }
}

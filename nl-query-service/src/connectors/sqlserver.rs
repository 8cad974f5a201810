//! SQL Server backend over a single TDS connection (`tiberius`).

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{json, Value};
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use common::config::SchemaLimits;
use common::errors::{AppError, AppResult};
use common::models::{BackendKind, ColumnInfo, CredentialField, Credentials, QueryResult};

use super::{ConnectionHandle, Connector, TableSchema};

const DEFAULT_PORT: u16 = 1433;

type TdsClient = Client<Compat<TcpStream>>;

/// Connects with SQL Server authentication.
///
/// The location is either `host[:port][/database]` or a full ADO.NET
/// connection string; credentials always come from the request.
pub struct SqlServerConnector;

#[async_trait]
impl Connector for SqlServerConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::SqlServer
    }

    async fn open(
        &self,
        location: &str,
        credentials: &Credentials,
    ) -> AppResult<Box<dyn ConnectionHandle>> {
        let username = credentials.require(self.kind(), CredentialField::Username)?;
        let password = credentials.require(self.kind(), CredentialField::Password)?;
        let config = build_config(location, username, password)?;

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(connection_error)?;
        tcp.set_nodelay(true).map_err(connection_error)?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(connection_error)?;

        tracing::debug!(location = %location, "sql server connection opened");
        Ok(Box::new(SqlServerHandle {
            client: Some(client),
        }))
    }
}

fn connection_error(e: impl ToString) -> AppError {
    AppError::connection(BackendKind::SqlServer, e)
}

fn execution_error(e: tiberius::error::Error) -> AppError {
    AppError::ExecutionFailed(e.to_string())
}

/// Parsed `host[:port][/database]` location.
#[derive(Debug, PartialEq, Eq)]
struct ServerAddress {
    host: String,
    port: u16,
    database: Option<String>,
}

impl ServerAddress {
    fn parse(location: &str) -> AppResult<Self> {
        let location = location.trim();
        let (server, database) = match location.split_once('/') {
            Some((server, db)) if !db.is_empty() => (server, Some(db.to_string())),
            Some((server, _)) => (server, None),
            None => (location, None),
        };
        let (host, port) = match server.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| connection_error(format!("invalid port in location: {}", location)))?;
                (host, port)
            }
            None => (server, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(connection_error(format!("missing host in location: {}", location)));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            database,
        })
    }
}

fn build_config(location: &str, username: &str, password: &str) -> AppResult<Config> {
    let mut config = if location.contains('=') {
        Config::from_ado_string(location).map_err(connection_error)?
    } else {
        let address = ServerAddress::parse(location)?;
        let mut config = Config::new();
        config.host(&address.host);
        config.port(address.port);
        if let Some(database) = &address.database {
            config.database(database);
        }
        config
    };
    config.authentication(AuthMethod::sql_server(username, password));
    config.trust_cert();
    Ok(config)
}

struct SqlServerHandle {
    client: Option<TdsClient>,
}

impl SqlServerHandle {
    fn client(&mut self) -> AppResult<&mut TdsClient> {
        self.client
            .as_mut()
            .ok_or_else(|| AppError::Internal("sql server connection already closed".into()))
    }

    async fn fetch(&mut self, sql: &str) -> AppResult<QueryResult> {
        let rows = self
            .client()?
            .simple_query(sql)
            .await
            .map_err(execution_error)?
            .into_first_result()
            .await
            .map_err(execution_error)?;
        Ok(to_result(rows))
    }
}

#[async_trait]
impl ConnectionHandle for SqlServerHandle {
    fn dialect(&self) -> &'static str {
        "T-SQL (Microsoft SQL Server)"
    }

    async fn describe_tables(&mut self, limits: &SchemaLimits) -> AppResult<Vec<TableSchema>> {
        let max_tables = limits.max_tables as i64;
        let table_rows = self
            .client()?
            .query(
                "SELECT TOP (@P1) TABLE_SCHEMA, TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 ORDER BY TABLE_SCHEMA, TABLE_NAME",
                &[&max_tables],
            )
            .await
            .map_err(execution_error)?
            .into_first_result()
            .await
            .map_err(execution_error)?;

        let names: Vec<(String, String)> = table_rows
            .iter()
            .filter_map(|row| {
                let schema = row.try_get::<&str, _>(0).ok().flatten()?;
                let table = row.try_get::<&str, _>(1).ok().flatten()?;
                Some((schema.to_string(), table.to_string()))
            })
            .collect();

        let mut tables = Vec::with_capacity(names.len());
        for (schema, table) in names {
            let columns = self
                .client()?
                .query(
                    "SELECT COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS \
                     WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 ORDER BY ORDINAL_POSITION",
                    &[&schema, &table],
                )
                .await
                .map_err(execution_error)?
                .into_first_result()
                .await
                .map_err(execution_error)?
                .iter()
                .map(|row| {
                    ColumnInfo::new(
                        row.try_get::<&str, _>(0).ok().flatten().unwrap_or_default(),
                        row.try_get::<&str, _>(1).ok().flatten().unwrap_or_default(),
                    )
                })
                .collect();

            let qualified = format!("{}.{}", quote_ident(&schema), quote_ident(&table));
            let sample = if limits.sample_rows > 0 {
                let sql = format!("SELECT TOP ({}) * FROM {}", limits.sample_rows, qualified);
                self.fetch(&sql).await.ok()
            } else {
                None
            };

            tables.push(TableSchema {
                name: qualified,
                columns,
                sample,
            });
        }
        Ok(tables)
    }

    async fn execute(&mut self, sql: &str) -> AppResult<QueryResult> {
        self.fetch(sql).await
    }

    async fn close(&mut self) -> AppResult<()> {
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| AppError::Internal(format!("closing sql server connection: {}", e)))?;
        }
        Ok(())
    }
}

fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn to_result(rows: Vec<Row>) -> QueryResult {
    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|c| ColumnInfo::new(c.name(), format!("{:?}", c.column_type())))
                .collect()
        })
        .unwrap_or_default();

    let rows = rows
        .into_iter()
        .map(|row| row.into_iter().map(|data| column_value(&data)).collect())
        .collect();

    QueryResult { columns, rows }
}

fn column_value(data: &ColumnData<'static>) -> Value {
    let value = match data {
        ColumnData::U8(v) => v.map(Value::from),
        ColumnData::I16(v) => v.map(Value::from),
        ColumnData::I32(v) => v.map(Value::from),
        ColumnData::I64(v) => v.map(Value::from),
        ColumnData::F32(v) => v.map(|f| json!(f)),
        ColumnData::F64(v) => v.map(|f| json!(f)),
        ColumnData::Bit(v) => v.map(Value::Bool),
        ColumnData::String(v) => v.as_deref().map(|s| Value::String(s.to_string())),
        ColumnData::Guid(v) => v.as_ref().map(|g| Value::String(g.to_string())),
        ColumnData::Numeric(v) => v.as_ref().map(|n| Value::String(n.to_string())),
        ColumnData::Binary(v) => v
            .as_ref()
            .map(|b| Value::String(format!("<{} bytes>", b.len()))),
        ColumnData::Date(_) => temporal::<NaiveDate>(data),
        ColumnData::Time(_) => temporal::<NaiveTime>(data),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            temporal::<NaiveDateTime>(data)
        }
        ColumnData::DateTimeOffset(_) => temporal::<DateTime<FixedOffset>>(data),
        other => Some(Value::String(format!("{:?}", other))),
    };
    value.unwrap_or(Value::Null)
}

fn temporal<'a, T>(data: &'a ColumnData<'static>) -> Option<Value>
where
    T: FromSql<'a> + ToString,
{
    T::from_sql(data)
        .ok()
        .flatten()
        .map(|v| Value::String(v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port_database() {
        assert_eq!(
            ServerAddress::parse("db.internal:1444/sales").unwrap(),
            ServerAddress {
                host: "db.internal".into(),
                port: 1444,
                database: Some("sales".into()),
            }
        );
        assert_eq!(
            ServerAddress::parse("localhost").unwrap(),
            ServerAddress {
                host: "localhost".into(),
                port: DEFAULT_PORT,
                database: None,
            }
        );
    }

    #[test]
    fn test_malformed_location_is_connection_failure() {
        assert!(matches!(
            ServerAddress::parse("db:notaport").unwrap_err(),
            AppError::ConnectionFailed { .. }
        ));
        assert!(matches!(
            ServerAddress::parse(":1433/sales").unwrap_err(),
            AppError::ConnectionFailed { .. }
        ));
    }

    #[test]
    fn test_column_values() {
        assert_eq!(column_value(&ColumnData::I32(Some(3))), json!(3));
        assert_eq!(column_value(&ColumnData::I32(None)), Value::Null);
        assert_eq!(
            column_value(&ColumnData::String(Some("abc".into()))),
            json!("abc")
        );
        assert_eq!(column_value(&ColumnData::Bit(Some(true))), json!(true));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("odd]name"), "[odd]]name]");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_failure() {
        let creds = Credentials {
            username: Some("sa".into()),
            password: Some("pw".into()),
            ..Default::default()
        };
        let err = SqlServerConnector
            .open("127.0.0.1:1", &creds)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::ConnectionFailed { backend, .. } if backend == "sqlserver"));
    }
}

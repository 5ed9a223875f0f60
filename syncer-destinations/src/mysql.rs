use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, Row, TypeInfo};
use syncer::destination::executor::{AffectedRowsConvention, SqlExecutor, Statement};
use syncer::error::{ErrorKind, SyncError, SyncResult};
use syncer::sync_error;
use syncer::types::{CANONICAL_DATE_FORMAT, Record, Value, format_timestamp};
use syncer_config::shared::{IntoConnectOptions, RowStoreConfig};
use tracing::{info, trace};

/// [`SqlExecutor`] over a MySQL connection pool.
///
/// The driver connects with the found-rows client flag, so an upsert that matches an
/// unchanged row reports one affected row.
#[derive(Debug, Clone)]
pub struct MySqlExecutor {
    pool: MySqlPool,
}

impl MySqlExecutor {
    /// Connects a pool to the database named in `config`.
    pub async fn connect(config: &RowStoreConfig) -> SyncResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.with_db())
            .await
            .map_err(|err| {
                sync_error!(
                    ErrorKind::DestinationConnectionFailed,
                    "Failed to connect to the row store",
                    format!("{}:{}/{}: {err}", config.host, config.port, config.database)
                )
            })?;

        info!(
            host = %config.host,
            database = %config.database,
            "connected to the row store"
        );

        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlExecutor for MySqlExecutor {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn affected_rows_convention(&self) -> AffectedRowsConvention {
        AffectedRowsConvention::FoundRows
    }

    async fn execute(&self, statement: &Statement) -> SyncResult<u64> {
        trace!(sql = %statement.sql, params = statement.params.len(), "executing statement");

        let result = bind_params(sqlx::query(&statement.sql), &statement.params)
            .execute(&self.pool)
            .await
            .map_err(mysql_error_to_sync_error)?;

        Ok(result.rows_affected())
    }

    async fn query(&self, statement: &Statement) -> SyncResult<Vec<Record>> {
        trace!(sql = %statement.sql, params = statement.params.len(), "running query");

        let rows = bind_params(sqlx::query(&statement.sql), &statement.params)
            .fetch_all(&self.pool)
            .await
            .map_err(mysql_error_to_sync_error)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn close(&self) -> SyncResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn bind_params<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [Value],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.as_str()),
        };
    }

    query
}

/// Broad decoding class of a MySQL column type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnClass {
    Null,
    Bool,
    Signed,
    Unsigned,
    Float,
    DateTime,
    Date,
    Text,
}

fn column_class(type_name: &str) -> ColumnClass {
    let unsigned = type_name.ends_with("UNSIGNED");
    match type_name.split_whitespace().next().unwrap_or_default() {
        "NULL" => ColumnClass::Null,
        "BOOLEAN" => ColumnClass::Bool,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" if unsigned => {
            ColumnClass::Unsigned
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => ColumnClass::Signed,
        "FLOAT" | "DOUBLE" => ColumnClass::Float,
        "DATETIME" | "TIMESTAMP" => ColumnClass::DateTime,
        "DATE" => ColumnClass::Date,
        _ => ColumnClass::Text,
    }
}

fn row_to_record(row: &MySqlRow) -> SyncResult<Record> {
    let mut record = Record::with_capacity(row.columns().len());

    for (index, column) in row.columns().iter().enumerate() {
        let class = column_class(column.type_info().name());
        let value = decode_value(row, index, class).map_err(|err| {
            sync_error!(
                ErrorKind::ConversionError,
                "Failed to decode a row store value",
                format!("column `{}`: {err}", column.name())
            )
        })?;
        record.insert(column.name(), value);
    }

    Ok(record)
}

fn decode_value(row: &MySqlRow, index: usize, class: ColumnClass) -> Result<Value, sqlx::Error> {
    let value = match class {
        ColumnClass::Null => Value::Null,
        ColumnClass::Bool => row.try_get::<Option<bool>, _>(index)?.into(),
        ColumnClass::Signed => row.try_get::<Option<i64>, _>(index)?.into(),
        ColumnClass::Unsigned => match row.try_get::<Option<u64>, _>(index)? {
            Some(n) => i64::try_from(n)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(n.to_string())),
            None => Value::Null,
        },
        ColumnClass::Float => row.try_get::<Option<f64>, _>(index)?.into(),
        ColumnClass::DateTime => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(|ts| format_timestamp(&ts))
            .into(),
        ColumnClass::Date => row
            .try_get::<Option<NaiveDate>, _>(index)?
            .map(|date| date.format(CANONICAL_DATE_FORMAT).to_string())
            .into(),
        // Decimals, strings and binary-collated metadata columns all arrive as bytes.
        ColumnClass::Text => match row.try_get_unchecked::<Option<Vec<u8>>, _>(index)? {
            Some(bytes) => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
            None => Value::Null,
        },
    };

    Ok(value)
}

fn mysql_error_to_sync_error(err: sqlx::Error) -> SyncError {
    let kind = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => ErrorKind::DestinationConnectionFailed,
        _ => ErrorKind::DestinationQueryFailed,
    };

    sync_error!(kind, "Row store statement failed", err)
}

//! Execution adapter: turns a [`QuerySpec`] into rows.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::QueryScalar;
use sqlx::PgPool;
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::isolation::EntityType;
use crate::query_builder::conditions::quote_ident;
use crate::query_builder::QuerySpec;

/// Anything that can run a [`QuerySpec`] and insert rows
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Rows matching `spec`, each as a JSON object
    async fn fetch(&self, spec: &QuerySpec) -> Result<Vec<Value>>;

    /// Insert `row` into the entity's table and return the stored row
    async fn insert(&self, entity: &EntityType, row: Map<String, Value>) -> Result<Value>;
}

type JsonScalar<'q> = QueryScalar<'q, Postgres, Value, PgArguments>;

fn bind_value<'q>(query: JsonScalar<'q>, value: &Value) -> JsonScalar<'q> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(sqlx::types::Json(other.clone())),
    }
}

/// Wrap the spec's SELECT so each row comes back as one JSON value
pub fn fetch_sql(spec: &QuerySpec) -> (String, Vec<Value>) {
    let (inner, params) = spec.to_sql();
    (format!("SELECT row_to_json(q) FROM ({inner}) q"), params)
}

/// Insert listing only the provided columns so table defaults still apply
pub fn insert_sql(table: &str, columns: &[&String]) -> String {
    let table = quote_ident(table);
    let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let column_list = columns.join(", ");
    format!(
        "INSERT INTO {table} AS inserted ({column_list}) \
         SELECT {column_list} FROM json_populate_record(NULL::{table}, $1) \
         RETURNING row_to_json(inserted)"
    )
}

#[derive(Debug, Clone)]
pub struct PgQueryExecutor {
    pool: PgPool,
}

impl PgQueryExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    async fn fetch(&self, spec: &QuerySpec) -> Result<Vec<Value>> {
        let (sql, params) = fetch_sql(spec);
        debug!(entity_type = %spec.entity(), sql = %sql, params = params.len(), "Executing query");

        let mut query = sqlx::query_scalar::<_, Value>(&sql);
        for value in &params {
            query = bind_value(query, value);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn insert(&self, entity: &EntityType, row: Map<String, Value>) -> Result<Value> {
        if row.is_empty() {
            return Err(QueryError::Upstream(format!(
                "refusing to insert an empty row into {}",
                entity.table_name()
            )));
        }
        let sql = insert_sql(entity.table_name(), &row.keys().collect::<Vec<_>>());
        debug!(entity_type = %entity, columns = row.len(), "Inserting row");

        let stored = sqlx::query_scalar::<_, Value>(&sql)
            .bind(sqlx::types::Json(Value::Object(row)))
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }
}

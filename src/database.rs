//! PostgreSQL pool and the thin query layer
//!
//! The pool is built once at startup from [`DatabaseConfig`] and injected
//! everywhere it is needed; nothing in the crate reaches for a global
//! connection.
//!
//! [`Table`] is a deliberately small query layer for the common case:
//! single-table CRUD filtered by equality conditions, with pagination and
//! soft delete. Table, column, and order-by names are validated as plain
//! identifiers before being interpolated; all values are bound. Anything
//! beyond that writes SQL directly with sqlx.
//!
//! # Usage
//!
//! ```ignore
//! use triage::database::{DatabaseConfig, create_pool, Table, SqlValue};
//!
//! let pool = create_pool(&DatabaseConfig::from_env()).await?;
//! let patients = Table::new(pool.clone(), "patients")?;
//!
//! let page = patients
//!     .paginate::<Patient>(1, 20, &[("is_active", SqlValue::Int(1))], Some("full_name"))
//!     .await?;
//! ```

use std::env;
use std::time::Duration;

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

use crate::error::{AppError, Result};
use crate::parse::parse_duration;

// ============================================================================
// Pool configuration
// ============================================================================

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    pub url: String,
    /// Maximum pool size
    pub max_connections: u32,
    /// How long to wait for a connection before failing
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/app".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl DatabaseConfig {
    /// Load from environment variables.
    ///
    /// `DATABASE_URL` wins; otherwise the URL is composed from `DB_HOST`,
    /// `DB_PORT`, `DB_NAME`, `DB_USER`, and `DB_PASSWORD`. Pool knobs come
    /// from `DB_MAX_CONNECTIONS` and `DB_ACQUIRE_TIMEOUT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = env::var("DATABASE_URL").unwrap_or_else(|_| {
            let host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
            let port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
            let name = env::var("DB_NAME").unwrap_or_else(|_| "app".to_string());
            let user = env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string());
            let password = env::var("DB_PASSWORD").unwrap_or_default();
            format!("postgres://{user}:{password}@{host}:{port}/{name}")
        });

        Self {
            url,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            acquire_timeout: env::var("DB_ACQUIRE_TIMEOUT")
                .map(|v| parse_duration(&v))
                .unwrap_or(defaults.acquire_timeout),
        }
    }
}

/// Build and connect the pool.
pub async fn create_pool(config: &DatabaseConfig) -> std::result::Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .test_before_acquire(true)
        .connect(&config.url)
        .await
}

/// Build the pool without connecting; connections open on first use.
pub fn connect_lazy(config: &DatabaseConfig) -> std::result::Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_lazy(&config.url)
}

/// Round-trip check for readiness probes.
pub async fn health_check(pool: &PgPool) -> std::result::Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

// ============================================================================
// Values and conditions
// ============================================================================

/// A bindable scalar value for the query layer
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

fn push_value<'a>(qb: &mut QueryBuilder<'a, Postgres>, value: &'a SqlValue) {
    match value {
        SqlValue::Text(s) => qb.push_bind(s.as_str()),
        SqlValue::Int(i) => qb.push_bind(*i),
        SqlValue::Float(f) => qb.push_bind(*f),
        SqlValue::Bool(b) => qb.push_bind(*b),
        SqlValue::Null => qb.push_bind(Option::<String>::None),
    };
}

/// Equality conditions: column = value, joined with AND
pub type Conditions<'a> = [(&'a str, SqlValue)];

fn check_identifier(s: &str) -> Result<()> {
    let mut chars = s.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::internal_msg(format!("Unsafe SQL identifier: {s}")))
    }
}

// Accepts "col", "col DESC", or comma-separated combinations of those.
fn check_order_by(s: &str) -> Result<()> {
    for part in s.split(',') {
        let mut tokens = part.split_whitespace();
        match tokens.next() {
            Some(col) => check_identifier(col)?,
            None => return Err(AppError::internal_msg("Empty ORDER BY clause")),
        }
        if let Some(dir) = tokens.next() {
            if !dir.eq_ignore_ascii_case("asc") && !dir.eq_ignore_ascii_case("desc") {
                return Err(AppError::internal_msg(format!(
                    "Unsafe ORDER BY direction: {dir}"
                )));
            }
        }
        if tokens.next().is_some() {
            return Err(AppError::internal_msg("Malformed ORDER BY clause"));
        }
    }
    Ok(())
}

// ============================================================================
// Pagination
// ============================================================================

/// One page of results with paging metadata
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub current_page: u32,
    pub per_page: u32,
    pub total: i64,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.current_page < self.total_pages
    }

    pub fn has_prev(&self) -> bool {
        self.current_page > 1
    }
}

// ============================================================================
// Table
// ============================================================================

/// Single-table CRUD over equality conditions
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    pool: PgPool,
}

impl Table {
    /// Bind the query layer to a table. The name is validated once here.
    pub fn new(pool: PgPool, name: &str) -> Result<Self> {
        check_identifier(name)?;
        Ok(Self {
            name: name.to_string(),
            pool,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn push_conditions<'a>(
        qb: &mut QueryBuilder<'a, Postgres>,
        conditions: &'a Conditions<'a>,
    ) -> Result<()> {
        if conditions.is_empty() {
            return Ok(());
        }
        qb.push(" WHERE ");
        for (i, (column, value)) in conditions.iter().enumerate() {
            check_identifier(column)?;
            if i > 0 {
                qb.push(" AND ");
            }
            qb.push(*column);
            qb.push(" = ");
            push_value(qb, value);
        }
        Ok(())
    }

    fn build_select<'a>(
        &self,
        conditions: &'a Conditions<'a>,
        order_by: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<QueryBuilder<'a, Postgres>> {
        let mut qb = QueryBuilder::new("SELECT * FROM ");
        qb.push(self.name.as_str());
        Self::push_conditions(&mut qb, conditions)?;
        if let Some(order) = order_by {
            check_order_by(order)?;
            qb.push(" ORDER BY ");
            qb.push(order);
        }
        if let Some(limit) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit);
            if let Some(offset) = offset {
                qb.push(" OFFSET ");
                qb.push_bind(offset);
            }
        }
        Ok(qb)
    }

    /// Fetch one record by primary key.
    pub async fn find<T>(&self, id: i64) -> Result<Option<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let mut qb = QueryBuilder::new("SELECT * FROM ");
        qb.push(self.name.as_str());
        qb.push(" WHERE id = ");
        qb.push_bind(id);
        qb.push(" LIMIT 1");
        Ok(qb.build_query_as().fetch_optional(&self.pool).await?)
    }

    /// Fetch the first record matching the conditions.
    pub async fn find_one<T>(&self, conditions: &Conditions<'_>) -> Result<Option<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let mut qb = self.build_select(conditions, None, Some(1), None)?;
        Ok(qb.build_query_as().fetch_optional(&self.pool).await?)
    }

    /// Fetch all records matching the conditions.
    pub async fn find_all<T>(
        &self,
        conditions: &Conditions<'_>,
        order_by: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let mut qb = self.build_select(conditions, order_by, limit, offset)?;
        Ok(qb.build_query_as().fetch_all(&self.pool).await?)
    }

    /// Insert a record, returning its generated id.
    ///
    /// `created_at` is stamped with the database clock unless supplied.
    pub async fn insert(&self, values: &Conditions<'_>) -> Result<i64> {
        if values.is_empty() {
            return Err(AppError::internal_msg("Insert with no values"));
        }
        for (column, _) in values {
            check_identifier(column)?;
        }

        let stamp_created = !values.iter().any(|(c, _)| *c == "created_at");

        let mut qb = QueryBuilder::new("INSERT INTO ");
        qb.push(self.name.as_str());
        qb.push(" (");
        for (i, (column, _)) in values.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(*column);
        }
        if stamp_created {
            qb.push(", created_at");
        }
        qb.push(") VALUES (");
        for (i, (_, value)) in values.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            push_value(&mut qb, value);
        }
        if stamp_created {
            qb.push(", NOW()");
        }
        qb.push(") RETURNING id");

        let row: (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(row.0)
    }

    /// Update a record by primary key; returns affected row count.
    pub async fn update(&self, id: i64, values: &Conditions<'_>) -> Result<u64> {
        self.update_where(values, &[("id", SqlValue::Int(id))]).await
    }

    /// Update all records matching the conditions.
    ///
    /// `updated_at` is stamped with the database clock unless supplied.
    pub async fn update_where(
        &self,
        values: &Conditions<'_>,
        conditions: &Conditions<'_>,
    ) -> Result<u64> {
        if values.is_empty() {
            return Err(AppError::internal_msg("Update with no values"));
        }
        for (column, _) in values {
            check_identifier(column)?;
        }

        let mut qb = QueryBuilder::new("UPDATE ");
        qb.push(self.name.as_str());
        qb.push(" SET ");
        for (i, (column, value)) in values.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(*column);
            qb.push(" = ");
            push_value(&mut qb, value);
        }
        if !values.iter().any(|(c, _)| *c == "updated_at") {
            qb.push(", updated_at = NOW()");
        }
        Self::push_conditions(&mut qb, conditions)?;

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Delete a record by primary key.
    pub async fn delete(&self, id: i64) -> Result<u64> {
        self.delete_where(&[("id", SqlValue::Int(id))]).await
    }

    /// Delete all records matching the conditions.
    pub async fn delete_where(&self, conditions: &Conditions<'_>) -> Result<u64> {
        if conditions.is_empty() {
            return Err(AppError::internal_msg("Refusing to delete without conditions"));
        }
        let mut qb = QueryBuilder::new("DELETE FROM ");
        qb.push(self.name.as_str());
        Self::push_conditions(&mut qb, conditions)?;
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Count records matching the conditions.
    pub async fn count(&self, conditions: &Conditions<'_>) -> Result<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM ");
        qb.push(self.name.as_str());
        Self::push_conditions(&mut qb, conditions)?;
        let row: (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(row.0)
    }

    /// Whether any record matches the conditions.
    pub async fn exists(&self, conditions: &Conditions<'_>) -> Result<bool> {
        Ok(self.count(conditions).await? > 0)
    }

    /// Fetch a page of results plus paging metadata.
    pub async fn paginate<T>(
        &self,
        page: u32,
        per_page: u32,
        conditions: &Conditions<'_>,
        order_by: Option<&str>,
    ) -> Result<Page<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let offset = ((page - 1) * per_page) as i64;

        let total = self.count(conditions).await?;
        let total_pages = ((total as f64) / (per_page as f64)).ceil() as u32;

        let data = self
            .find_all(conditions, order_by, Some(per_page as i64), Some(offset))
            .await?;

        Ok(Page {
            data,
            current_page: page,
            per_page,
            total,
            total_pages,
        })
    }

    /// Soft delete: mark the record inactive.
    pub async fn soft_delete(&self, id: i64) -> Result<u64> {
        self.update(id, &active_flag(false)).await
    }

    /// Restore a soft-deleted record.
    pub async fn restore(&self, id: i64) -> Result<u64> {
        self.update(id, &active_flag(true)).await
    }
}

// The schema types `is_active` as BOOLEAN, so the flag must bind as one.
fn active_flag(active: bool) -> [(&'static str, SqlValue); 1] {
    [("is_active", SqlValue::Bool(active))]
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lazy_pool() -> PgPool {
        connect_lazy(&DatabaseConfig::default()).unwrap()
    }

    fn table(name: &str) -> Table {
        Table::new(lazy_pool(), name).unwrap()
    }

    #[tokio::test]
    async fn test_table_name_validated() {
        assert!(Table::new(lazy_pool(), "patients").is_ok());
        assert!(Table::new(lazy_pool(), "users; DROP TABLE users").is_err());
        assert!(Table::new(lazy_pool(), "1users").is_err());
        assert!(Table::new(lazy_pool(), "").is_err());
    }

    #[tokio::test]
    async fn test_select_sql_generation() {
        let t = table("patients");
        let conds = [("ward", SqlValue::from("icu")), ("is_active", SqlValue::Bool(true))];
        let qb = t
            .build_select(&conds, Some("full_name DESC"), Some(10), Some(20))
            .unwrap();
        assert_eq!(
            qb.sql(),
            "SELECT * FROM patients WHERE ward = $1 AND is_active = $2 \
             ORDER BY full_name DESC LIMIT $3 OFFSET $4"
        );
    }

    #[tokio::test]
    async fn test_select_without_conditions() {
        let t = table("patients");
        let qb = t.build_select(&[], None, None, None).unwrap();
        assert_eq!(qb.sql(), "SELECT * FROM patients");
    }

    #[tokio::test]
    async fn test_condition_column_validated() {
        let t = table("patients");
        let conds = [("ward = 'x' OR 1=1 --", SqlValue::from("icu"))];
        assert!(t.build_select(&conds, None, None, None).is_err());
    }

    #[tokio::test]
    async fn test_order_by_validated() {
        let t = table("patients");
        assert!(t.build_select(&[], Some("name"), None, None).is_ok());
        assert!(t.build_select(&[], Some("name desc"), None, None).is_ok());
        assert!(t.build_select(&[], Some("name, created_at DESC"), None, None).is_ok());
        assert!(t
            .build_select(&[], Some("name; DROP TABLE x"), None, None)
            .is_err());
        assert!(t.build_select(&[], Some("name SIDEWAYS"), None, None).is_err());
    }

    #[test]
    fn test_sql_value_conversions() {
        assert_eq!(SqlValue::from("x"), SqlValue::Text("x".to_string()));
        assert_eq!(SqlValue::from(42i64), SqlValue::Int(42));
        assert_eq!(SqlValue::from(7i32), SqlValue::Int(7));
        assert_eq!(SqlValue::from(true), SqlValue::Bool(true));
    }

    #[test]
    fn test_active_flag_binds_boolean() {
        assert_eq!(active_flag(false), [("is_active", SqlValue::Bool(false))]);
        assert_eq!(active_flag(true), [("is_active", SqlValue::Bool(true))]);
    }

    #[test]
    fn test_page_navigation() {
        let page = Page::<i32> {
            data: vec![],
            current_page: 2,
            per_page: 20,
            total: 55,
            total_pages: 3,
        };
        assert!(page.has_next());
        assert!(page.has_prev());

        let first = Page::<i32> {
            current_page: 1,
            ..page.clone()
        };
        assert!(!first.has_prev());

        let last = Page::<i32> {
            current_page: 3,
            ..page
        };
        assert!(!last.has_next());
    }

    #[test]
    fn test_config_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }
}

//! Schema Introspection Module
//!
//! Reads one schema of a live PostgreSQL database and turns it into a
//! validated `Snapshot`.

use crate::error::{validation_error, AppError};
use crate::filter::TableFilter;
use crate::snapshot::{Column, Snapshot, Table, TableKind};
use chrono::Utc;
use deadpool_postgres::Pool;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

const TABLES_QUERY: &str = r#"
    SELECT
        t.table_name::text AS table_name,
        t.table_type::text AS table_type,
        pg_get_userbyid(c.relowner)::text AS table_owner
    FROM information_schema.tables t
    LEFT JOIN pg_namespace n ON n.nspname = t.table_schema
    LEFT JOIN pg_class c ON c.relname = t.table_name AND c.relnamespace = n.oid
    WHERE t.table_schema = $1
    ORDER BY t.table_name
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT
        c.column_name::text AS column_name,
        c.data_type::text AS data_type,
        c.is_nullable::text AS is_nullable,
        c.column_default::text AS column_default,
        c.ordinal_position::int AS ordinal_position,
        c.character_maximum_length::int AS character_maximum_length
    FROM information_schema.columns c
    WHERE c.table_schema = $1 AND c.table_name = $2
    ORDER BY c.ordinal_position
"#;

/// Catalog crawler for PostgreSQL
pub struct PostgresCrawler;

impl PostgresCrawler {
    /// Capture `schema` as it is right now, keeping only tables the filter admits
    pub async fn crawl(pool: &Pool, schema: &str, filter: &TableFilter) -> Result<Snapshot, AppError> {
        validate_schema_name(schema)?;

        let client = pool.get().await?;
        let rows = client.query(TABLES_QUERY, &[&schema]).await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("table_name");
            let table_type: String = row.get("table_type");
            let owner: Option<String> = row.get("table_owner");

            if !filter.should_include(&name) {
                debug!("Skipping table '{}' (filtered)", name);
                continue;
            }

            let Some(kind) = TableKind::from_catalog(&table_type) else {
                warn!("Skipping table '{}' with unsupported type '{}'", name, table_type);
                continue;
            };

            let column_rows = client.query(COLUMNS_QUERY, &[&schema, &name]).await?;
            let columns = column_rows
                .iter()
                .map(|row| Column {
                    name: row.get("column_name"),
                    data_type: row.get("data_type"),
                    nullable: is_nullable(row.get("is_nullable")),
                    default_expression: row.get("column_default"),
                    ordinal_position: row.get("ordinal_position"),
                    character_max_length: row.get("character_maximum_length"),
                })
                .collect();

            tables.push(Table {
                name,
                kind,
                owner,
                columns,
            });
        }

        let snapshot = Snapshot::new(schema, Utc::now(), tables)?;

        debug!(
            "Crawled schema '{}': {} tables, {} columns",
            schema,
            snapshot.table_count(),
            snapshot.column_count()
        );

        Ok(snapshot)
    }
}

fn is_nullable(value: &str) -> bool {
    value.eq_ignore_ascii_case("YES")
}

/// Schema names must be plain PostgreSQL identifiers
pub fn validate_schema_name(name: &str) -> Result<(), AppError> {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    let re = IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_$]*$").expect("identifier pattern is valid")
    });

    if name.len() > 63 {
        return Err(validation_error(format!(
            "Schema name '{}' exceeds 63 characters",
            name
        )));
    }
    if !re.is_match(name) {
        return Err(validation_error(format!("Invalid schema name '{}'", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_schema_names() {
        assert!(validate_schema_name("public").is_ok());
        assert!(validate_schema_name("_staging").is_ok());
        assert!(validate_schema_name("tenant_42$").is_ok());
    }

    #[test]
    fn test_invalid_schema_names() {
        assert!(validate_schema_name("").is_err());
        assert!(validate_schema_name("1abc").is_err());
        assert!(validate_schema_name("public; DROP TABLE users").is_err());
        assert!(validate_schema_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_is_nullable() {
        assert!(is_nullable("YES"));
        assert!(!is_nullable("NO"));
    }
}

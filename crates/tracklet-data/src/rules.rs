//! Filter rule persistence.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracklet_core::{FilterRule, MatchField, PatternType};
use uuid::Uuid;

use crate::Store;
use crate::error::{DataError, Result};

const RULE_COLUMNS: &str = r"
    SELECT id, name, pattern, pattern_type, match_field, require_free,
           priority, enabled, created_at, updated_at
    FROM filter_rules
";

impl Store {
    /// Insert or update a rule, preserving `created_at`.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn upsert_rule(&self, rule: &FilterRule) -> Result<()> {
        sqlx::query(
            r"INSERT INTO filter_rules (
                id, name, pattern, pattern_type, match_field, require_free,
                priority, enabled, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                pattern = excluded.pattern,
                pattern_type = excluded.pattern_type,
                match_field = excluded.match_field,
                require_free = excluded.require_free,
                priority = excluded.priority,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at",
        )
        .bind(rule.id.to_string())
        .bind(&rule.name)
        .bind(&rule.pattern)
        .bind(rule.pattern_type.as_str())
        .bind(rule.match_field.as_str())
        .bind(rule.require_free)
        .bind(i64::from(rule.priority))
        .bind(rule.enabled)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DataError::db("rule.upsert"))?;
        Ok(())
    }

    /// Fetch one rule by id.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn get_rule(&self, id: Uuid) -> Result<Option<FilterRule>> {
        let sql = format!("{RULE_COLUMNS} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::db("rule.get"))?;
        row.map(|r| rule_from_row(&r)).transpose()
    }

    /// Fetch multiple rules by id, in the order given, silently dropping
    /// unknown ids.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn get_rules(&self, ids: &[Uuid]) -> Result<Vec<FilterRule>> {
        let mut rules = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rule) = self.get_rule(*id).await? {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    /// List all rules, optionally only enabled ones, highest priority first.
    ///
    /// # Errors
    ///
    /// Returns an error when the database operation fails.
    pub async fn list_rules(&self, only_enabled: bool) -> Result<Vec<FilterRule>> {
        let sql = if only_enabled {
            format!("{RULE_COLUMNS} WHERE enabled = 1 ORDER BY priority DESC, name")
        } else {
            format!("{RULE_COLUMNS} ORDER BY priority DESC, name")
        };
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::db("rule.list"))?;
        rows.iter().map(rule_from_row).collect()
    }

    /// Delete a rule.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::NotFound`] when the id is unknown.
    pub async fn delete_rule(&self, id: Uuid) -> Result<()> {
        let affected = sqlx::query("DELETE FROM filter_rules WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DataError::db("rule.delete"))?
            .rows_affected();
        if affected == 0 {
            return Err(DataError::NotFound {
                entity: "filter_rule",
                key: id.to_string(),
            });
        }
        Ok(())
    }
}

fn rule_from_row(row: &SqliteRow) -> Result<FilterRule> {
    fn dec(source: sqlx::Error) -> DataError {
        DataError::Database {
            operation: "rule.decode",
            source,
        }
    }

    let id: String = row.try_get("id").map_err(dec)?;
    let pattern_type: String = row.try_get("pattern_type").map_err(dec)?;
    let match_field: String = row.try_get("match_field").map_err(dec)?;
    let priority: i64 = row.try_get("priority").map_err(dec)?;

    Ok(FilterRule {
        id: Uuid::parse_str(&id).map_err(|_| DataError::Corrupt {
            column: "id",
            value: id,
        })?,
        name: row.try_get("name").map_err(dec)?,
        pattern: row.try_get("pattern").map_err(dec)?,
        pattern_type: PatternType::parse(&pattern_type).ok_or(DataError::Corrupt {
            column: "pattern_type",
            value: pattern_type.clone(),
        })?,
        match_field: MatchField::parse(&match_field).ok_or(DataError::Corrupt {
            column: "match_field",
            value: match_field.clone(),
        })?,
        require_free: row.try_get("require_free").map_err(dec)?,
        priority: i32::try_from(priority).unwrap_or(0),
        enabled: row.try_get("enabled").map_err(dec)?,
        created_at: row.try_get("created_at").map_err(dec)?,
        updated_at: row.try_get("updated_at").map_err(dec)?,
    })
}

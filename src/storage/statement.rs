// ============================================================================
// Statement Recognition
// ============================================================================
//
// The in-memory backend does not parse SQL in general. It recognises the exact
// status-table statements rendered by `PostgresDialect` and treats anything
// else as an opaque user statement.
//
// ============================================================================

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

const TABLE: &str = r#"(?P<table>(?:"(?:[^"]|"")+"\.)?"(?:[^"]|"")+")"#;

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"^CREATE TABLE IF NOT EXISTS {TABLE} \(query_id text NOT NULL PRIMARY KEY, completed_at timestamptz\)$"
    ))
});

static SELECT_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"^SELECT completed_at FROM {TABLE} WHERE query_id = '(?P<id>[^']*)'(?P<lock> FOR UPDATE NOWAIT)?$"
    ))
});

static INSERT_INCOMPLETE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"^INSERT INTO {TABLE} \(query_id, completed_at\) VALUES \('(?P<id>[^']*)', NULL\)$"
    ))
});

static MARK_COMPLETE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"^UPDATE {TABLE} SET completed_at = CURRENT_TIMESTAMP WHERE query_id = '(?P<id>[^']*)'$"
    ))
});

static DELETE_BEFORE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"^DELETE FROM {TABLE} WHERE completed_at < '(?P<cutoff>[^']+)'$"
    ))
});

static DELETE_EXPIRED: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"^DELETE FROM {TABLE} WHERE completed_at < CURRENT_TIMESTAMP - INTERVAL '(?P<secs>\d+) seconds'$"
    ))
});

static SET_READ_ONLY: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)^SET TRANSACTION READ ONLY$"));

static WRITE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)^\s*(INSERT|UPDATE|DELETE|MERGE|CREATE|DROP|ALTER|TRUNCATE|GRANT|REVOKE)\b")
});

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid statement pattern {pattern}: {e}"))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateStatusTable {
        table: String,
    },
    SelectStatus {
        table: String,
        query_id: String,
        for_update: bool,
    },
    InsertIncomplete {
        table: String,
        query_id: String,
    },
    MarkComplete {
        table: String,
        query_id: String,
    },
    DeleteCompletedBefore {
        table: String,
        cutoff: DateTime<Utc>,
    },
    DeleteExpired {
        table: String,
        retention_secs: i64,
    },
    SetReadOnly,
    /// Anything else: a caller-supplied statement.
    Other {
        is_write: bool,
        is_select: bool,
    },
}

impl Statement {
    pub fn parse(sql: &str) -> Self {
        let sql = sql.trim();

        if let Some(caps) = CREATE_TABLE.captures(sql) {
            return Self::CreateStatusTable {
                table: caps["table"].to_string(),
            };
        }
        if let Some(caps) = SELECT_STATUS.captures(sql) {
            return Self::SelectStatus {
                table: caps["table"].to_string(),
                query_id: caps["id"].to_string(),
                for_update: caps.name("lock").is_some(),
            };
        }
        if let Some(caps) = INSERT_INCOMPLETE.captures(sql) {
            return Self::InsertIncomplete {
                table: caps["table"].to_string(),
                query_id: caps["id"].to_string(),
            };
        }
        if let Some(caps) = MARK_COMPLETE.captures(sql) {
            return Self::MarkComplete {
                table: caps["table"].to_string(),
                query_id: caps["id"].to_string(),
            };
        }
        if let Some(caps) = DELETE_EXPIRED.captures(sql) {
            if let Ok(retention_secs) = caps["secs"].parse() {
                return Self::DeleteExpired {
                    table: caps["table"].to_string(),
                    retention_secs,
                };
            }
        }
        if let Some(caps) = DELETE_BEFORE.captures(sql) {
            if let Ok(cutoff) = DateTime::parse_from_rfc3339(&caps["cutoff"]) {
                return Self::DeleteCompletedBefore {
                    table: caps["table"].to_string(),
                    cutoff: cutoff.with_timezone(&Utc),
                };
            }
        }
        if SET_READ_ONLY.is_match(sql) {
            return Self::SetReadOnly;
        }

        Self::Other {
            is_write: WRITE_KEYWORD.is_match(sql),
            is_select: sql.get(..6).is_some_and(|p| p.eq_ignore_ascii_case("select")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Dialect, PostgresDialect, TableReference};
    use chrono::TimeZone;
    use std::time::Duration;
    use uuid::Uuid;

    fn table() -> TableReference {
        TableReference::qualified("ops", "st\"atus").unwrap()
    }

    #[test]
    fn test_recognises_dialect_statements() {
        let d = PostgresDialect;
        let qid = Uuid::new_v4();
        let rendered = table().render(&d);

        assert_eq!(
            Statement::parse(&d.create_status_table(&table())),
            Statement::CreateStatusTable { table: rendered.clone() }
        );
        assert_eq!(
            Statement::parse(&d.lock_status_row(&table(), qid)),
            Statement::SelectStatus {
                table: rendered.clone(),
                query_id: qid.to_string(),
                for_update: true,
            }
        );
        assert_eq!(
            Statement::parse(&d.select_status_row(&table(), qid)),
            Statement::SelectStatus {
                table: rendered.clone(),
                query_id: qid.to_string(),
                for_update: false,
            }
        );
        assert_eq!(
            Statement::parse(&d.insert_incomplete(&table(), qid)),
            Statement::InsertIncomplete {
                table: rendered.clone(),
                query_id: qid.to_string(),
            }
        );
        assert_eq!(
            Statement::parse(&d.mark_complete(&table(), qid)),
            Statement::MarkComplete {
                table: rendered.clone(),
                query_id: qid.to_string(),
            }
        );
    }

    #[test]
    fn test_recognises_delete_statements() {
        let d = PostgresDialect;
        let rendered = table().render(&d);
        let cutoff = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap();

        assert_eq!(
            Statement::parse(&d.delete_completed_before(&table(), cutoff)),
            Statement::DeleteCompletedBefore { table: rendered.clone(), cutoff }
        );
        assert_eq!(
            Statement::parse(&d.delete_expired(&table(), Duration::from_secs(600))),
            Statement::DeleteExpired { table: rendered, retention_secs: 600 }
        );
    }

    #[test]
    fn test_user_statements() {
        assert_eq!(
            Statement::parse("insert into ledger values (1)"),
            Statement::Other { is_write: true, is_select: false }
        );
        assert_eq!(
            Statement::parse("  SELECT 1"),
            Statement::Other { is_write: false, is_select: true }
        );
        assert_eq!(Statement::parse("set transaction read only"), Statement::SetReadOnly);
        assert_eq!(
            Statement::parse("/* ééé */ SELECT 1"),
            Statement::Other { is_write: false, is_select: false }
        );
        assert_eq!(
            Statement::parse("INSERT INTO notes VALUES ('größe')"),
            Statement::Other { is_write: true, is_select: false }
        );
    }
}

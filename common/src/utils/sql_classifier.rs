//! SQL statement classification.
//!
//! Used for logging only: generated statements are never blocked.

/// Coarse statement category, decided by the leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// SELECT / WITH / SHOW / DESCRIBE / EXPLAIN / PRAGMA.
    Read,
    /// INSERT / UPDATE / DELETE / MERGE / UPSERT / REPLACE.
    Modification,
    /// DDL and anything else (CREATE, DROP, ALTER, TRUNCATE, GRANT, EXEC, ...).
    Other,
}

/// Classifies SQL statements.
pub struct SqlClassifier;

const READ_KEYWORDS: [&str; 7] = ["SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "PRAGMA"];
const MODIFICATION_KEYWORDS: [&str; 6] = ["INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "REPLACE"];

impl SqlClassifier {
    /// Classifies a statement by its first keyword, skipping leading comments
    /// and parentheses.
    pub fn classify(sql: &str) -> StatementKind {
        let keyword = Self::leading_keyword(sql).to_uppercase();
        if READ_KEYWORDS.contains(&keyword.as_str()) {
            StatementKind::Read
        } else if MODIFICATION_KEYWORDS.contains(&keyword.as_str()) {
            StatementKind::Modification
        } else {
            StatementKind::Other
        }
    }

    fn leading_keyword(sql: &str) -> &str {
        let mut rest = sql.trim_start();
        loop {
            if let Some(after) = rest.strip_prefix("--") {
                rest = after.split_once('\n').map(|(_, r)| r).unwrap_or("").trim_start();
            } else if let Some(after) = rest.strip_prefix("/*") {
                rest = after.split_once("*/").map(|(_, r)| r).unwrap_or("").trim_start();
            } else if let Some(after) = rest.strip_prefix('(') {
                rest = after.trim_start();
            } else {
                break;
            }
        }
        rest.split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_is_read() {
        for sql in [
            "SELECT * FROM users",
            "  with x as (select 1) select * from x",
            "-- count rows\nSELECT COUNT(*) FROM t",
            "(SELECT 1) UNION (SELECT 2)",
        ] {
            assert_eq!(SqlClassifier::classify(sql), StatementKind::Read, "{sql}");
        }
    }

    #[test]
    fn test_mutations_are_classified() {
        assert_eq!(
            SqlClassifier::classify("DELETE FROM users"),
            StatementKind::Modification
        );
        assert_eq!(
            SqlClassifier::classify("/* cleanup */ DROP TABLE users"),
            StatementKind::Other
        );
    }

    #[test]
    fn test_empty_is_other() {
        assert_eq!(SqlClassifier::classify(""), StatementKind::Other);
    }
}

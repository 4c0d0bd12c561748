//! Read-only Query Guard
//!
//! Queries written by an agent arrive wrapped in code fences, quoted, with
//! escaped newlines and trailing semicolons. They are normalized, checked to
//! be a single read-only retrieval, and wrapped in an outer LIMIT before the
//! data-fetch capability ever sees them.

use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{DataFetcher, ResultSet};
use crate::error::{ChartError, ChartResult};

/// First keywords accepted as read-only retrieval
const READ_ONLY_KEYWORDS: &[&str] = &["select", "with"];

lazy_static! {
    static ref DATA_MODIFYING: Regex = Regex::new(
        r"(?i)\b(insert|update|delete|drop|alter|create|truncate|merge|grant|revoke|attach|copy|pragma|vacuum)\b"
    )
    .unwrap();
}

/// Clean up agent-authored SQL text.
pub fn normalize_query(raw: &str) -> String {
    let mut query = raw.trim().to_string();

    if query.starts_with("```") {
        query = query.trim_matches('`').to_string();
        if query.to_lowercase().starts_with("sql\n") {
            query = query[4..].to_string();
        }
    }

    let wrapped_double = query.len() >= 2 && query.starts_with('"') && query.ends_with('"');
    let wrapped_single = query.len() >= 2 && query.starts_with('\'') && query.ends_with('\'');
    if wrapped_double || wrapped_single {
        query = query[1..query.len() - 1].to_string();
    }

    let query = query
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\r", "\r");
    let query = strip_comments(&query);

    query.trim().trim_end_matches(';').trim_end().to_string()
}

/// Remove `-- line` and `/* block */` comments outside string literals.
fn strip_comments(query: &str) -> String {
    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match (c, next) {
            ('\'' | '"', _) => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            ('-', Some('-')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                out.push(' ');
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Replace the contents of quoted literals/identifiers with spaces so keyword
/// scans only see SQL structure.
fn mask_literals(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    for c in query.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                out.push(c);
            }
            Some(_) => out.push(' '),
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
    out
}

/// Accept only a single statement that starts with a retrieval keyword and
/// carries no data-modifying keyword.
pub fn ensure_read_only(query: &str) -> ChartResult<()> {
    let masked = mask_literals(query);
    let first = masked
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|w| !w.is_empty())
        .unwrap_or("")
        .to_lowercase();

    if !READ_ONLY_KEYWORDS.contains(&first.as_str()) {
        let shown = if first.is_empty() { "<empty>".to_string() } else { first.to_uppercase() };
        return Err(ChartError::DisallowedQuery(format!(
            "Query starts with {}; reference registered tables with SELECT.",
            shown
        )));
    }

    if masked.contains(';') {
        return Err(ChartError::DisallowedQuery(
            "Multiple statements are not allowed.".to_string(),
        ));
    }

    if let Some(m) = DATA_MODIFYING.find(&masked) {
        return Err(ChartError::DisallowedQuery(format!(
            "Data-modifying keyword {} is not allowed.",
            m.as_str().to_uppercase()
        )));
    }

    Ok(())
}

/// Wrap a query so the capability never returns more than `limit` rows.
pub fn bound_query(query: &str, limit: usize) -> String {
    format!("SELECT * FROM ({}) AS bounded LIMIT {}", query, limit)
}

/// Front door to the injected data-fetch capability
#[derive(Clone)]
pub struct QueryGuard {
    fetcher: Arc<dyn DataFetcher>,
    row_limit: usize,
}

impl QueryGuard {
    pub fn new(fetcher: Arc<dyn DataFetcher>, row_limit: usize) -> Self {
        Self { fetcher, row_limit }
    }

    /// Normalize, vet, bound and run `raw`. Disallowed queries never reach
    /// the capability.
    pub async fn fetch(&self, raw: &str) -> ChartResult<ResultSet> {
        let normalized = normalize_query(raw);
        ensure_read_only(&normalized)?;

        let bounded = bound_query(&normalized, self.row_limit);
        debug!(query = %bounded, "Fetching chart data");

        let mut result = self
            .fetcher
            .fetch(&bounded)
            .await
            .map_err(|e| ChartError::DataFetch(format!("{:#}", e)))?;

        let removed = result.truncate(self.row_limit);
        if removed > 0 {
            warn!(removed, limit = self.row_limit, "Data fetcher ignored the row bound");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{InMemoryFetcher, ResultRow};

    #[test]
    fn test_normalize_strips_fences_quotes_and_semicolons() {
        assert_eq!(normalize_query("```sql\nSELECT 1;\n```"), "SELECT 1");
        assert_eq!(normalize_query("\"SELECT * FROM matches;\""), "SELECT * FROM matches");
        assert_eq!(
            normalize_query("SELECT team\\nFROM matches"),
            "SELECT team\nFROM matches"
        );
    }

    #[test]
    fn test_normalize_strips_comments_outside_literals() {
        let q = normalize_query("-- top teams\nSELECT '--keep' AS a /* note */ FROM t -- tail");
        assert_eq!(q, "SELECT '--keep' AS a   FROM t");
    }

    #[test]
    fn test_read_only_accepts_select_and_with() {
        assert!(ensure_read_only("SELECT * FROM matches").is_ok());
        assert!(ensure_read_only("select team from matches where action = 'delete'").is_ok());
        assert!(ensure_read_only("WITH t AS (SELECT 1) SELECT * FROM t").is_ok());
        assert!(ensure_read_only("(SELECT 1)").is_ok());
    }

    #[test]
    fn test_read_only_rejections() {
        for q in [
            "DROP TABLE matches",
            "",
            "SELECT 1; DROP TABLE matches",
            "WITH x AS (DELETE FROM t RETURNING *) SELECT * FROM x",
            "INSERT INTO t VALUES (1)",
        ] {
            let err = ensure_read_only(q).unwrap_err();
            assert!(matches!(err, ChartError::DisallowedQuery(_)), "{q}");
        }
    }

    #[test]
    fn test_identifier_containing_keyword_is_fine() {
        assert!(ensure_read_only("SELECT update_time, created_by FROM logs").is_ok());
    }

    #[tokio::test]
    async fn test_guard_blocks_before_fetcher() {
        let fetcher = Arc::new(InMemoryFetcher::new(ResultSet::default()));
        let guard = QueryGuard::new(fetcher.clone(), 2000);

        let err = guard.fetch("/* cleanup */ DROP TABLE matches").await.unwrap_err();
        assert!(matches!(err, ChartError::DisallowedQuery(_)));
        assert!(fetcher.queries().await.is_empty());
    }

    #[tokio::test]
    async fn test_guard_bounds_query_and_rows() {
        let rows = (0..5).map(|i| ResultRow::new().with("n", i as i64)).collect();
        let fetcher = Arc::new(InMemoryFetcher::new(ResultSet::new(rows).unwrap()));
        let guard = QueryGuard::new(fetcher.clone(), 3);

        let result = guard.fetch("SELECT n FROM numbers;").await.unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(
            fetcher.queries().await,
            vec!["SELECT * FROM (SELECT n FROM numbers) AS bounded LIMIT 3".to_string()]
        );
    }
}

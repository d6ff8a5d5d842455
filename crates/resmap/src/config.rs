use std::time::Duration;

/// Configuration for command execution.
///
/// By default there is no timeout and every executed command is logged at `debug`
/// under the `resmap.sql` target, truncated to 200 bytes.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Per-command timeout. `None` means no timeout (default).
    pub query_timeout: Option<Duration>,
    /// Whether executed commands are logged.
    pub log_statements: bool,
    /// Truncate logged statements (in bytes). `None` means no truncation.
    pub max_logged_sql_length: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            query_timeout: None,
            log_statements: true,
            max_logged_sql_length: Some(200),
        }
    }
}

impl ExecutorConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-command timeout.
    ///
    /// Commands exceeding this duration are cancelled server-side (best effort) and
    /// return a timeout error, which aborts the surrounding transaction.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Disable statement logging.
    pub fn without_statement_logging(mut self) -> Self {
        self.log_statements = false;
        self
    }

    /// Set maximum logged statement length.
    pub fn max_logged_sql_length(mut self, len: usize) -> Self {
        self.max_logged_sql_length = Some(len);
        self
    }

    /// Disable statement truncation in logs.
    pub fn no_truncate(mut self) -> Self {
        self.max_logged_sql_length = None;
        self
    }

    pub(crate) fn truncate<'a>(&self, sql: &'a str) -> std::borrow::Cow<'a, str> {
        match self.max_logged_sql_length {
            Some(max) if sql.len() > max => {
                std::borrow::Cow::Owned(format!("{}...", truncate_sql_bytes(sql, max)))
            }
            _ => std::borrow::Cow::Borrowed(sql),
        }
    }
}

/// Truncate `sql` to at most `max_bytes`, respecting UTF-8 char boundaries.
fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

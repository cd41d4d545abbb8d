/// SQL dialect differences the backend stores need to account for: bind
/// placeholder style.
#[derive(Debug, Clone, Copy)]
pub enum Dialect {
    /// Generic SQL using `?` placeholders (default).
    Generic,
    /// SQLite-style `?` placeholders.
    Sqlite,
    /// MySQL-style `?` placeholders with backtick quoting.
    MySql,
    /// Postgres-style `$1, $2, ...` placeholders.
    Postgres,
}

impl Dialect {
    /// The bind placeholder for the `index`-th (1-based) parameter in this dialect.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Generic | Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }
}

/// How a [`Dialect`] validates/quotes identifiers that come from outside the
/// fixed schema the realtime/historical stores write to.
#[derive(Debug, Clone, Copy)]
pub enum IdentifierPolicy {
    Raw,
    Validate,
    Quote,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_placeholders_are_indexed() {
        assert_eq!(Dialect::Postgres.placeholder(1), "$1");
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
    }

    #[test]
    fn other_dialects_use_question_mark() {
        assert_eq!(Dialect::Sqlite.placeholder(3), "?");
        assert_eq!(Dialect::MySql.placeholder(1), "?");
    }
}

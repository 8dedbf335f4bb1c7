//! Declarative table and constraint descriptions consumed by [`crate::db::Database`].

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    /// Type and column constraints, e.g. `TEXT NOT NULL UNIQUE`
    pub definition: &'static str,
}

impl Column {
    pub const fn new(name: &'static str, definition: &'static str) -> Self {
        Self { name, definition }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
}

impl TableSchema {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, name: &'static str, definition: &'static str) -> Self {
        self.columns.push(Column::new(name, definition));
        self
    }

    pub fn index(mut self, name: &'static str, columns: &'static [&'static str]) -> Self {
        self.indexes.push(Index {
            name,
            columns,
            unique: false,
        });
        self
    }

    pub fn create_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(c.name), c.definition))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_ident(self.name), columns)
    }
}

impl Index {
    pub fn create_sql(&self, table: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            quote_ident(self.name),
            quote_ident(table),
            columns
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    Cascade,
    Restrict,
    SetNull,
    NoAction,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

/// A constraint binding `child_table.child_column` to `parent_table(parent_column)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub child_table: &'static str,
    pub child_column: &'static str,
    pub parent_table: &'static str,
    pub parent_column: &'static str,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

impl ForeignKey {
    pub fn constraint_name(&self) -> String {
        format!("fk_{}_{}", self.child_table, self.child_column)
    }

    pub fn constraint_sql(&self) -> String {
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            quote_ident(&self.constraint_name()),
            quote_ident(self.child_column),
            quote_ident(self.parent_table),
            quote_ident(self.parent_column),
            self.on_delete.as_sql(),
            self.on_update.as_sql()
        )
    }
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}({})",
            self.child_table, self.child_column, self.parent_table, self.parent_column
        )
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sql_is_idempotent_form() {
        let table = TableSchema::new("documents")
            .column("id", "TEXT PRIMARY KEY")
            .column("loan_application_id", "TEXT NOT NULL");
        assert_eq!(
            table.create_sql(),
            "CREATE TABLE IF NOT EXISTS \"documents\" (\"id\" TEXT PRIMARY KEY, \"loan_application_id\" TEXT NOT NULL)"
        );
    }

    #[test]
    fn test_constraint_sql() {
        let fk = ForeignKey {
            child_table: "loan_schemes",
            child_column: "admin_id",
            parent_table: "users",
            parent_column: "id",
            on_delete: ReferentialAction::Restrict,
            on_update: ReferentialAction::Restrict,
        };
        assert_eq!(
            fk.constraint_sql(),
            "CONSTRAINT \"fk_loan_schemes_admin_id\" FOREIGN KEY (\"admin_id\") REFERENCES \"users\" (\"id\") ON DELETE RESTRICT ON UPDATE RESTRICT"
        );
        assert_eq!(fk.to_string(), "loan_schemes.admin_id -> users(id)");
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}

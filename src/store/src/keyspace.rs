//! Mapping of the logical (table, row key, column) space onto blob paths.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/.delete_tables                  tombstoned tables
//! <root>/<table>/.delete_columns         tombstoned columns of <table>
//! <root>/<table>/<row key>/<column>      one object per cell
//! ```

/// Characters that may never appear in a table, row key or column name
pub const RESERVED_CHARS: [char; 9] = ['\n', '\r', '\t', '\u{8}', '#', '[', ']', '?', '/'];

const DELETE_TABLES: &str = ".delete_tables";
const DELETE_COLUMNS: &str = ".delete_columns";

/// True for a non-empty name that neither starts with `.` (reserved for
/// control objects) nor contains any of [`RESERVED_CHARS`].
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(RESERVED_CHARS)
}

/// Decoded location of a single cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellPath {
    pub table: String,
    pub row_key: String,
    pub column: String,
}

#[derive(Debug, Clone)]
pub struct KeySpace {
    root: String,
}

impl KeySpace {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// `<root>/`, the prefix every table lives under
    pub fn root_prefix(&self) -> String {
        format!("{}/", self.root)
    }

    pub fn encode(&self, table: &str, row_key: &str, column: &str) -> String {
        format!("{}/{table}/{row_key}/{column}", self.root)
    }

    /// Inverse of [`KeySpace::encode`]. Paths outside the root or with fewer
    /// than three segments below it (control objects, prefixes) yield `None`.
    pub fn decode(&self, path: &str) -> Option<CellPath> {
        let rest = path.strip_prefix(&self.root)?.strip_prefix('/')?;
        let mut segments = rest.splitn(3, '/');
        let table = segments.next().filter(|s| !s.is_empty())?;
        let row_key = segments.next().filter(|s| !s.is_empty())?;
        let column = segments.next().filter(|s| !s.is_empty())?;

        Some(CellPath {
            table: table.to_string(),
            row_key: row_key.to_string(),
            column: column.to_string(),
        })
    }

    pub fn table_prefix(&self, table: &str) -> String {
        format!("{}/{table}/", self.root)
    }

    pub fn row_prefix(&self, table: &str, row_key: &str) -> String {
        format!("{}/{table}/{row_key}/", self.root)
    }

    /// String prefix matching every row key that starts with `key_prefix`
    pub fn row_key_prefix(&self, table: &str, key_prefix: &str) -> String {
        format!("{}/{table}/{key_prefix}", self.root)
    }

    pub fn tables_tombstone(&self) -> String {
        format!("{}/{DELETE_TABLES}", self.root)
    }

    pub fn columns_tombstone(&self, table: &str) -> String {
        format!("{}/{table}/{DELETE_COLUMNS}", self.root)
    }

    /// Table name of a delimited root listing entry (`<root>/<table>/`)
    pub fn table_from_prefix<'a>(&self, prefix: &'a str) -> Option<&'a str> {
        self.segment_from_prefix(prefix, &self.root_prefix())
    }

    /// Row key of a delimited table listing entry (`<root>/<table>/<row key>/`)
    pub fn row_key_from_prefix<'a>(&self, table: &str, prefix: &'a str) -> Option<&'a str> {
        self.segment_from_prefix(prefix, &self.table_prefix(table))
    }

    fn segment_from_prefix<'a>(&self, prefix: &'a str, parent: &str) -> Option<&'a str> {
        prefix
            .strip_prefix(parent)?
            .strip_suffix('/')
            .filter(|segment| !segment.is_empty() && !segment.contains('/'))
    }
}

use crate::shared::fs_atomic::atomic_write_file;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ROW_ID_COLUMN: &str = "RowID";
pub const STATUS_COLUMN: &str = "Status";
pub const DONE_AT_COLUMN: &str = "DoneAt";
pub const WORKING_SUFFIX: &str = "_working";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("source table not found: {path}")]
    SourceMissing { path: String },
    #[error("ledger io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid ledger payload in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("required column `{column}` not found; columns present: {present}")]
    MissingColumn { column: String, present: String },
}

fn io_err(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn parse_err(path: &Path, source: serde_json::Error) -> LedgerError {
    LedgerError::Parse {
        path: path.display().to_string(),
        source,
    }
}

/// Lowercase alphanumeric fold used for flexible header matching, so
/// "Agent User Name" and "agent_user_name" resolve to the same column.
pub fn normalize_column_name(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

/// Per-row status ledger value. Everything short of `Done` is retryable;
/// `Done` is terminal and never reprocessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowStatus {
    Unvalidated,
    Pending(String),
    Error(String),
    Done,
}

impl RowStatus {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return RowStatus::Unvalidated;
        }
        if raw.eq_ignore_ascii_case("done") {
            return RowStatus::Done;
        }
        if let Some(reason) = raw.strip_prefix("Pending - ") {
            return RowStatus::Pending(reason.to_string());
        }
        if let Some(kind) = raw.strip_prefix("Error - ") {
            return RowStatus::Error(kind.to_string());
        }
        // Anything an operator typed by hand is treated as retryable.
        RowStatus::Pending(raw.to_string())
    }

    pub fn as_cell(&self) -> String {
        match self {
            RowStatus::Unvalidated => String::new(),
            RowStatus::Pending(reason) => format!("Pending - {reason}"),
            RowStatus::Error(kind) => format!("Error - {kind}"),
            RowStatus::Done => "Done".to_string(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, RowStatus::Done)
    }
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowStatus::Unvalidated => write!(f, "(unvalidated)"),
            other => write!(f, "{}", other.as_cell()),
        }
    }
}

/// Ordered columns plus string-valued rows. Unknown columns ride along
/// untouched through every load-modify-save cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl WorkingTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Pads or truncates every row to the column count; hand-edited tables
    /// routinely come back ragged.
    pub fn normalize(&mut self) {
        let width = self.columns.len();
        for row in &mut self.rows {
            row.resize(width, String::new());
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col == name)
    }

    /// Flexible header lookup via `normalize_column_name`.
    pub fn find_column(&self, name: &str) -> Option<usize> {
        let wanted = normalize_column_name(name);
        self.columns
            .iter()
            .position(|col| normalize_column_name(col) == wanted)
    }

    pub fn require_column(&self, name: &str) -> Result<usize, LedgerError> {
        self.find_column(name).ok_or_else(|| LedgerError::MissingColumn {
            column: name.to_string(),
            present: self.columns.join(", "),
        })
    }

    /// Row ids in order of first appearance in the source table.
    pub fn row_ids(&self) -> Vec<i64> {
        let Some(col) = self.column_index(ROW_ID_COLUMN) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|row| row.get(col).and_then(|v| v.trim().parse::<i64>().ok()))
            .collect()
    }

    pub fn find_row(&self, row_id: i64) -> Option<usize> {
        let col = self.column_index(ROW_ID_COLUMN)?;
        self.rows.iter().position(|row| {
            row.get(col)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .is_some_and(|id| id == row_id)
        })
    }

    pub fn value(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn set_value(&mut self, row: usize, column: usize, value: impl Into<String>) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(column)) {
            *cell = value.into();
        }
    }

    pub fn status_of(&self, row: usize) -> RowStatus {
        match self.column_index(STATUS_COLUMN) {
            Some(col) => RowStatus::parse(self.value(row, col)),
            None => RowStatus::Unvalidated,
        }
    }
}

/// Narrow persistence seam for the working table: load the whole table,
/// persist the whole table back without partial-row corruption.
pub trait TableStore {
    fn load(&self) -> Result<WorkingTable, LedgerError>;
    fn save(&self, table: &WorkingTable) -> Result<(), LedgerError>;
}

/// JSON column/row grid on disk, written atomically.
#[derive(Debug, Clone)]
pub struct JsonTableStore {
    path: PathBuf,
}

impl JsonTableStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TableStore for JsonTableStore {
    fn load(&self) -> Result<WorkingTable, LedgerError> {
        let raw = fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        let mut table: WorkingTable =
            serde_json::from_str(&raw).map_err(|e| parse_err(&self.path, e))?;
        table.normalize();
        Ok(table)
    }

    fn save(&self, table: &WorkingTable) -> Result<(), LedgerError> {
        let body = serde_json::to_string_pretty(table).map_err(|e| parse_err(&self.path, e))?;
        atomic_write_file(&self.path, body.as_bytes()).map_err(|e| io_err(&self.path, e))
    }
}

pub fn working_copy_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .and_then(|v| v.to_str())
        .unwrap_or("table");
    let ext = source.extension().and_then(|v| v.to_str()).unwrap_or("json");
    source.with_file_name(format!("{stem}{WORKING_SUFFIX}.{ext}"))
}

/// Copies the immutable source table to its working twin. Idempotent: an
/// existing working copy is reused so resume never clobbers prior progress.
/// Returns the working path and whether a fresh copy was made.
pub fn make_working_copy(source: &Path) -> Result<(PathBuf, bool), LedgerError> {
    if !source.exists() {
        return Err(LedgerError::SourceMissing {
            path: source.display().to_string(),
        });
    }
    let working = working_copy_path(source);
    if working.exists() {
        return Ok((working, false));
    }
    fs::copy(source, &working).map_err(|e| io_err(&working, e))?;
    Ok((working, true))
}

/// Inserts the leading `RowID` column (assigned once, never renumbered) and
/// appends the `Status`/`DoneAt` columns when absent, persisting immediately.
pub fn ensure_ledger_columns(store: &impl TableStore) -> Result<WorkingTable, LedgerError> {
    let mut table = store.load()?;
    let mut changed = false;

    if table.column_index(ROW_ID_COLUMN).is_none() {
        table.columns.insert(0, ROW_ID_COLUMN.to_string());
        for (idx, row) in table.rows.iter_mut().enumerate() {
            row.insert(0, idx.to_string());
        }
        changed = true;
    }
    for column in [STATUS_COLUMN, DONE_AT_COLUMN] {
        if table.column_index(column).is_none() {
            table.columns.push(column.to_string());
            for row in &mut table.rows {
                row.push(String::new());
            }
            changed = true;
        }
    }

    if changed {
        store.save(&table)?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_table() -> WorkingTable {
        WorkingTable {
            columns: vec![
                "Name".to_string(),
                "Email".to_string(),
                "Notes".to_string(),
            ],
            rows: vec![
                vec![
                    "Ada".to_string(),
                    "ada@example.com".to_string(),
                    "vip".to_string(),
                ],
                vec![
                    "Grace".to_string(),
                    "grace@example.com".to_string(),
                    String::new(),
                ],
            ],
        }
    }

    #[test]
    fn status_cells_round_trip() {
        for status in [
            RowStatus::Unvalidated,
            RowStatus::Pending("invalid email".to_string()),
            RowStatus::Error("timeout".to_string()),
            RowStatus::Done,
        ] {
            assert_eq!(RowStatus::parse(&status.as_cell()), status);
        }
        assert_eq!(RowStatus::parse(" done "), RowStatus::Done);
        assert_eq!(RowStatus::parse("DONE"), RowStatus::Done);
        assert_eq!(
            RowStatus::parse("needs review"),
            RowStatus::Pending("needs review".to_string())
        );
    }

    #[test]
    fn flexible_header_matching_folds_case_and_separators() {
        let table = WorkingTable::new(vec![
            "Agent User Name".to_string(),
            "Last Name".to_string(),
        ]);
        assert_eq!(table.find_column("agent_user_name"), Some(0));
        assert_eq!(table.find_column("LASTNAME"), Some(1));
        assert!(table.require_column("Creator").is_err());
    }

    #[test]
    fn ensure_columns_assigns_stable_row_ids_once() {
        let dir = tempdir().expect("tempdir");
        let store = JsonTableStore::new(dir.path().join("t.json"));
        store.save(&sample_table()).expect("seed");

        let table = ensure_ledger_columns(&store).expect("ensure");
        assert_eq!(table.columns[0], ROW_ID_COLUMN);
        assert_eq!(table.row_ids(), vec![0, 1]);
        assert!(table.column_index(STATUS_COLUMN).is_some());
        assert!(table.column_index(DONE_AT_COLUMN).is_some());

        // A second pass must not renumber or duplicate columns.
        let mut edited = store.load().expect("reload");
        edited.rows.remove(0);
        store.save(&edited).expect("save edited");
        let again = ensure_ledger_columns(&store).expect("ensure again");
        assert_eq!(again.row_ids(), vec![1]);
        assert_eq!(
            again.columns.iter().filter(|c| *c == STATUS_COLUMN).count(),
            1
        );
    }

    #[test]
    fn unknown_columns_survive_load_modify_save() {
        let dir = tempdir().expect("tempdir");
        let store = JsonTableStore::new(dir.path().join("t.json"));
        store.save(&sample_table()).expect("seed");
        ensure_ledger_columns(&store).expect("ensure");

        let mut table = store.load().expect("load");
        let status = table.column_index(STATUS_COLUMN).expect("status column");
        table.set_value(0, status, "Done");
        store.save(&table).expect("save");

        let reloaded = store.load().expect("reload");
        let notes = reloaded.column_index("Notes").expect("notes column");
        assert_eq!(reloaded.value(0, notes), "vip");
        assert!(reloaded.status_of(0).is_done());
    }

    #[test]
    fn working_copy_is_idempotent_and_leaves_source_untouched() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("users.json");
        let store = JsonTableStore::new(&source);
        store.save(&sample_table()).expect("seed source");
        let original = fs::read_to_string(&source).expect("read source");

        let (working, fresh) = make_working_copy(&source).expect("copy");
        assert!(fresh);
        assert_eq!(working, dir.path().join("users_working.json"));

        fs::write(&working, "{\"columns\":[],\"rows\":[]}").expect("mutate working");
        let (_, fresh_again) = make_working_copy(&source).expect("copy again");
        assert!(!fresh_again);
        assert_eq!(
            fs::read_to_string(&working).expect("read working"),
            "{\"columns\":[],\"rows\":[]}"
        );
        assert_eq!(fs::read_to_string(&source).expect("re-read source"), original);
    }

    #[test]
    fn missing_source_is_a_startup_error() {
        let dir = tempdir().expect("tempdir");
        let err = make_working_copy(&dir.path().join("absent.json")).expect_err("must fail");
        assert!(matches!(err, LedgerError::SourceMissing { .. }));
    }

    #[test]
    fn ragged_rows_are_padded_on_load() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("t.json");
        fs::write(
            &path,
            r#"{"columns":["A","B","C"],"rows":[["1"],["1","2","3","4"]]}"#,
        )
        .expect("write ragged");
        let table = JsonTableStore::new(&path).load().expect("load");
        assert!(table.rows.iter().all(|row| row.len() == 3));
    }
}

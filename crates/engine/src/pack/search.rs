//! Name search and raw statements

use super::Pack;
use rusqlite::types::ValueRef;
use rusqlite::{params, Batch, Row, Statement};
use sqlpack_core::{ExecRow, FindMode, PackResult, NULL_MARKER};
use sqlpack_storage::query_with_retry;

impl Pack {
    /// Entry names matching `pattern`, in insertion order.
    ///
    /// See [`FindMode`] for the pattern language of each mode. A regular
    /// expression that does not compile matches nothing.
    pub fn find(&self, pattern: &str, mode: FindMode) -> PackResult<Vec<String>> {
        let sql = format!(
            "select file_name from pack_files where file_name {} ?1 order by rowid",
            mode.operator()
        );
        self.query(&sql, params![pattern], |r| r.get(0))
    }

    /// Run one or more raw statements and collect every result row.
    ///
    /// Values are rendered as text; NULL becomes [`NULL_MARKER`].
    pub fn exec(&self, sql: &str) -> PackResult<Vec<ExecRow>> {
        let conn = self.conn()?;
        let mut rows = Vec::new();
        let mut batch = Batch::new(conn, sql);
        while let Some(mut stmt) = batch.next()? {
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut out = query_with_retry(conn, &mut stmt, [], &self.config.retry, |row| {
                exec_row(row, &names)
            })?;
            rows.append(&mut out);
        }
        Ok(rows)
    }

    /// Prepare an arbitrary statement on the archive's connection.
    pub fn prepare(&self, sql: &str) -> PackResult<Statement<'_>> {
        Ok(self.conn()?.prepare(sql)?)
    }
}

fn exec_row(row: &Row<'_>, names: &[String]) -> rusqlite::Result<ExecRow> {
    let mut out = ExecRow::new();
    for (i, name) in names.iter().enumerate() {
        let text = match row.get_ref(i)? {
            ValueRef::Null => NULL_MARKER.to_string(),
            ValueRef::Integer(v) => v.to_string(),
            ValueRef::Real(v) => v.to_string(),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                String::from_utf8_lossy(bytes).into_owned()
            }
        };
        out.insert(name.clone(), text);
    }
    Ok(out)
}

//! Column-oriented result tables and spreadsheet files
//!
//! Sweeps produce a few named columns (`laser3_mA`, `laser3_V`, ...). Adding
//! them to an existing spreadsheet joins on row position: the new columns go
//! to the right, columns with the same name are replaced, and the shorter
//! side is padded with empty cells. Only `.csv` files are supported.

use std::path::Path;

use crate::error::{AppResult, ToolsError};

/// A table of named columns holding optional string cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<(String, Vec<Option<String>>)>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column, replacing any column of the same name in place
    pub fn set_column(&mut self, name: impl Into<String>, cells: Vec<Option<String>>) {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = cells,
            None => self.columns.push((name, cells)),
        }
    }

    /// Append a numeric column. NaN becomes an empty cell.
    pub fn set_numeric_column(&mut self, name: impl Into<String>, values: &[f64]) {
        let cells = values
            .iter()
            .map(|v| if v.is_nan() { None } else { Some(v.to_string()) })
            .collect();
        self.set_column(name, cells);
    }

    pub fn column(&self, name: &str) -> Option<&[Option<String>]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, cells)| cells.as_slice())
    }

    /// Column parsed as numbers; empty or unparsable cells are NaN
    pub fn numeric_column(&self, name: &str) -> Option<Vec<f64>> {
        self.column(name).map(|cells| {
            cells
                .iter()
                .map(|cell| {
                    cell.as_deref()
                        .and_then(|c| c.trim().parse::<f64>().ok())
                        .unwrap_or(f64::NAN)
                })
                .collect()
        })
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Rows in the longest column
    pub fn n_rows(&self) -> usize {
        self.columns
            .iter()
            .map(|(_, cells)| cells.len())
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Outer join on row position. Columns of `other` replace same-named
    /// columns of `self` and are placed after the remaining ones.
    pub fn join(&self, other: &Table) -> Table {
        let mut columns: Vec<(String, Vec<Option<String>>)> = self
            .columns
            .iter()
            .filter(|(name, _)| other.column(name).is_none())
            .cloned()
            .collect();
        columns.extend(other.columns.iter().cloned());

        let mut joined = Table { columns };
        joined.pad();
        joined
    }

    fn pad(&mut self) {
        let rows = self.n_rows();
        for (_, cells) in &mut self.columns {
            cells.resize(rows, None);
        }
    }

    fn cell(&self, column: usize, row: usize) -> Option<&str> {
        self.columns
            .get(column)
            .and_then(|(_, cells)| cells.get(row))
            .and_then(|c| c.as_deref())
    }
}

fn check_extension(path: &Path) -> AppResult<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => Ok(()),
        Some(ext) => Err(ToolsError::UnsupportedFormat(format!(
            "'.{}' spreadsheets are not supported, use .csv ({})",
            ext,
            path.display()
        ))),
        None => Err(ToolsError::UnsupportedFormat(format!(
            "'{}' has no extension, use .csv",
            path.display()
        ))),
    }
}

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use tracing::info;

    /// Read a spreadsheet. Empty cells become `None`.
    pub fn read_spreadsheet(path: impl AsRef<Path>) -> AppResult<Table> {
        let path = path.as_ref();
        check_extension(path)?;

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record?;
            for (i, cells) in columns.iter_mut().enumerate() {
                let cell = record.get(i).filter(|c| !c.is_empty()).map(str::to_string);
                cells.push(cell);
            }
        }

        let mut table = Table::new();
        for (name, cells) in headers.into_iter().zip(columns) {
            table.set_column(name, cells);
        }
        Ok(table)
    }

    /// Write `table` to `path`, overwriting it
    pub fn write_spreadsheet(path: impl AsRef<Path>, table: &Table) -> AppResult<()> {
        let path = path.as_ref();
        check_extension(path)?;

        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(table.column_names())?;
        let n_cols = table.columns.len();
        for row in 0..table.n_rows() {
            writer.write_record((0..n_cols).map(|col| table.cell(col, row).unwrap_or("")))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Add `table`'s columns to the spreadsheet at `path`, creating it if needed
    pub fn add_to_spreadsheet(path: impl AsRef<Path>, table: &Table) -> AppResult<()> {
        let path = path.as_ref();
        check_extension(path)?;

        let merged = if path.exists() {
            read_spreadsheet(path)?.join(table)
        } else {
            let mut fresh = table.clone();
            fresh.pad();
            fresh
        };
        write_spreadsheet(path, &merged)?;
        info!(
            "Wrote {} columns x {} rows to {}",
            merged.column_names().len(),
            merged.n_rows(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    pub fn read_spreadsheet(path: impl AsRef<Path>) -> AppResult<Table> {
        check_extension(path.as_ref())?;
        Err(ToolsError::FeatureNotEnabled("storage_csv".to_string()))
    }

    pub fn write_spreadsheet(path: impl AsRef<Path>, _table: &Table) -> AppResult<()> {
        check_extension(path.as_ref())?;
        Err(ToolsError::FeatureNotEnabled("storage_csv".to_string()))
    }

    pub fn add_to_spreadsheet(path: impl AsRef<Path>, _table: &Table) -> AppResult<()> {
        check_extension(path.as_ref())?;
        Err(ToolsError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::{add_to_spreadsheet, read_spreadsheet, write_spreadsheet};
#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::{add_to_spreadsheet, read_spreadsheet, write_spreadsheet};

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<Option<String>> {
        values
            .iter()
            .map(|v| if v.is_empty() { None } else { Some(v.to_string()) })
            .collect()
    }

    #[test]
    fn test_numeric_columns() {
        let mut t = Table::new();
        t.set_numeric_column("a_mA", &[0.0, 5.0, 10.0]);
        t.set_numeric_column("a_V", &[1.5, f64::NAN]);
        assert_eq!(t.column("a_mA").unwrap(), cells(&["0", "5", "10"]).as_slice());
        assert_eq!(t.column("a_V").unwrap(), cells(&["1.5", ""]).as_slice());
        let v = t.numeric_column("a_V").unwrap();
        assert_eq!(v[0], 1.5);
        assert!(v[1].is_nan());
        assert_eq!(t.n_rows(), 3);
    }

    #[test]
    fn test_join_replaces_duplicates_and_pads() {
        let mut old = Table::new();
        old.set_column("x", cells(&["1", "2", "3"]));
        old.set_column("y", cells(&["a", "b", "c"]));

        let mut new = Table::new();
        new.set_column("y", cells(&["B"]));
        new.set_column("z", cells(&["9", "8", "7", "6"]));

        let joined = old.join(&new);
        assert_eq!(joined.column_names(), vec!["x", "y", "z"]);
        assert_eq!(joined.n_rows(), 4);
        assert_eq!(joined.column("x").unwrap(), cells(&["1", "2", "3", ""]).as_slice());
        assert_eq!(joined.column("y").unwrap(), cells(&["B", "", "", ""]).as_slice());
    }

    #[test]
    fn test_rejects_excel_files() {
        assert!(matches!(
            add_to_spreadsheet("results.xlsx", &Table::new()),
            Err(ToolsError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            read_spreadsheet("results"),
            Err(ToolsError::UnsupportedFormat(_))
        ));
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_add_to_spreadsheet_creates_then_merges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("piv.csv");

        let mut first = Table::new();
        first.set_numeric_column("l1_mA", &[0.0, 10.0]);
        first.set_numeric_column("l1_mW", &[0.0, 0.25]);
        add_to_spreadsheet(&path, &first).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "l1_mA,l1_mW\n0,0\n10,0.25\n"
        );

        let mut second = Table::new();
        second.set_numeric_column("l2_mA", &[0.0, 10.0, 20.0]);
        second.set_numeric_column("l1_mW", &[0.0, 0.5]);
        add_to_spreadsheet(&path, &second).unwrap();

        let merged = read_spreadsheet(&path).unwrap();
        assert_eq!(merged.column_names(), vec!["l1_mA", "l2_mA", "l1_mW"]);
        assert_eq!(merged.n_rows(), 3);
        assert_eq!(merged.numeric_column("l1_mW").unwrap()[1], 0.5);
        assert!(merged.numeric_column("l1_mA").unwrap()[2].is_nan());
    }
}

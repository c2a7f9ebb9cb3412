//! CSV input for the command-line front end.
//!
//! The first record is a header. Empty, `NA` and `NaN` cells are missing; any
//! other cell that does not parse as a number marks its column as categorical,
//! which the fitter later rejects.

use super::store::{ColumnKind, DensePartitionedMatrix, StoreError, TransformKind};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CsvLoadError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row} has {found} fields, expected {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("input has no data rows")]
    NoRows,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A numeric table read from CSV, already partitioned.
#[derive(Debug)]
pub struct CsvMatrix {
    pub column_names: Vec<String>,
    pub matrix: DensePartitionedMatrix,
}

fn parse_cell(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("na")
        || trimmed.eq_ignore_ascii_case("nan")
    {
        return Some(f64::NAN);
    }
    trimmed.parse::<f64>().ok()
}

pub fn read_csv<R: Read>(
    reader: R,
    rows_per_partition: usize,
    transform: TransformKind,
) -> Result<CsvMatrix, CsvLoadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let column_names: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|name| name.trim().to_string())
        .collect();
    let ncols = column_names.len();

    let mut values = Vec::new();
    let mut kinds = vec![ColumnKind::Numeric; ncols];
    let mut nrows = 0usize;

    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        if record.len() != ncols {
            return Err(CsvLoadError::RaggedRow {
                row: row + 1,
                found: record.len(),
                expected: ncols,
            });
        }
        for (col, cell) in record.iter().enumerate() {
            match parse_cell(cell) {
                Some(value) => values.push(value),
                None => {
                    kinds[col] = ColumnKind::Categorical;
                    values.push(f64::NAN);
                }
            }
        }
        nrows += 1;
    }

    if nrows == 0 {
        return Err(CsvLoadError::NoRows);
    }

    let categorical = kinds
        .iter()
        .filter(|kind| **kind == ColumnKind::Categorical)
        .count();
    if categorical > 0 {
        log::warn!("{categorical} of {ncols} columns contain non-numeric values");
    }
    log::info!("Read {nrows} rows and {ncols} columns");

    let matrix =
        DensePartitionedMatrix::from_row_major(values, nrows, ncols, rows_per_partition, transform)?
            .with_column_kinds(kinds)?;

    Ok(CsvMatrix {
        column_names,
        matrix,
    })
}

pub fn read_csv_path(
    path: &Path,
    rows_per_partition: usize,
    transform: TransformKind,
) -> Result<CsvMatrix, CsvLoadError> {
    let file = std::fs::File::open(path).map_err(csv::Error::from)?;
    read_csv(std::io::BufReader::new(file), rows_per_partition, transform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pca::store::PartitionedMatrixStore;

    #[test]
    fn missing_markers_become_nan() {
        let text = "a,b,c\n1,2,3\nNA,,4.5\n7,NaN,9\n";
        let loaded = read_csv(text.as_bytes(), 2, TransformKind::None).unwrap();
        assert_eq!(loaded.column_names, vec!["a", "b", "c"]);

        let store = &loaded.matrix;
        assert_eq!((store.nrows(), store.ncols()), (3, 3));
        assert!(store.column_kinds().iter().all(|k| *k == ColumnKind::Numeric));
        let second = store.partition(0).row(1, 3);
        assert!(second[0].is_nan() && second[1].is_nan());
        assert_eq!(second[2], 4.5);
    }

    #[test]
    fn text_cells_flag_categorical_columns() {
        let text = "x,label\n1,red\n2,blue\n";
        let loaded = read_csv(text.as_bytes(), 10, TransformKind::None).unwrap();
        assert_eq!(
            loaded.matrix.column_kinds(),
            &[ColumnKind::Numeric, ColumnKind::Categorical]
        );
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let text = "x,y\n1,2\n3\n";
        assert!(matches!(
            read_csv(text.as_bytes(), 10, TransformKind::None),
            Err(CsvLoadError::RaggedRow { row: 2, .. })
        ));
    }

    #[test]
    fn infinite_cells_are_rejected() {
        let text = "x,y\n1,2\ninf,3\n";
        assert!(matches!(
            read_csv(text.as_bytes(), 10, TransformKind::None),
            Err(CsvLoadError::Store(StoreError::InfiniteCell { row: 1, col: 0 }))
        ));
    }

    #[test]
    fn header_only_input_is_rejected() {
        assert!(matches!(
            read_csv("x,y\n".as_bytes(), 10, TransformKind::None),
            Err(CsvLoadError::NoRows)
        ));
    }
}

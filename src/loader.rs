use std::path::Path;

use calamine::{Data, Range, Reader, Xlsx, open_workbook};

use crate::error::Error;
use crate::store::RecordStore;

/// Import SKC records from a workbook using the inverse of the snapshot
/// layout, merging into `store`.
///
/// Every worksheet is walked in column pairs from the left edge: the row-1
/// cell of a pair's first column names the product, and an empty cell there
/// skips the whole pair, data rows included. Rows 4 and below contribute one
/// SKC/status pair each; a row is taken only when both cells are non-empty
/// and the SKC does not yet exist anywhere in the store — including records
/// inserted earlier in this same import.
///
/// # Returns
/// * `Ok(count)` — number of records inserted. A readable workbook that
///   matches nothing is `Ok(0)`, which is not an error.
/// * `Err(Error::WorkbookOpen)` — the file could not be opened or is not a
///   valid workbook.
pub fn import_workbook(path: impl AsRef<Path>, store: &mut RecordStore) -> Result<usize, Error> {
    let path = path.as_ref();
    let mut workbook: Xlsx<_> = open_workbook(path).map_err(|source| Error::WorkbookOpen {
        path: path.to_path_buf(),
        source,
    })?;

    let mut imported = 0;
    for (_sheet, range) in workbook.worksheets() {
        let Some((end_row, end_col)) = range.end() else {
            continue;
        };
        let mut col = 0;
        while col <= end_col {
            if let Some(product) = cell_text(&range, 0, col) {
                store.ensure_product(&product);
                for row in 3..=end_row {
                    let skc = cell_text(&range, row, col);
                    let status = cell_text(&range, row, col + 1);
                    if let (Some(skc), Some(status)) = (skc, status) {
                        if store.insert(&product, &skc, &status) {
                            imported += 1;
                        }
                    }
                }
            }
            col += 2;
        }
    }
    Ok(imported)
}

/// Cell content coerced to trimmed text; `None` for empty or blank cells.
/// Integral floats lose the trailing `.0` so numeric SKC codes survive the
/// round trip through a spreadsheet unchanged.
fn cell_text(range: &Range<Data>, row: u32, col: u32) -> Option<String> {
    let text = match range.get_value((row, col))? {
        Data::Empty | Data::Error(_) => return None,
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 => (*f as i64).to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
    };
    if text.is_empty() { None } else { Some(text) }
}

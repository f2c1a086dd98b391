//! In-memory CSV dataset of check-in records.
//!
//! Rows pass through untouched apart from the outcome column, which the
//! scheduler fills in by row index as results arrive.

use std::io::Read;
use std::path::Path;
use strum::{AsRefStr, Display, EnumString};

/// Terminal result recorded for a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
pub enum RowOutcome {
    #[strum(serialize = "GOOD")]
    Good,
    #[strum(serialize = "NO FACE")]
    NoFace,
    #[strum(serialize = "DOWNLOAD_ERROR")]
    DownloadError,
    #[strum(serialize = "SYSTEM_ERROR")]
    SystemError,
}

/// Column names the engine reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    pub url_column: String,
    pub status_column: String,
    pub id_column: String,
}

impl Default for DatasetLayout {
    fn default() -> Self {
        Self {
            url_column: "Check-In Photo".to_string(),
            status_column: "Face_Status".to_string(),
            id_column: "id".to_string(),
        }
    }
}

/// One unit of work handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowTask {
    /// Position of the row in the source dataset
    pub index: usize,
    /// Value of the id column, or the index when there is none
    pub row_id: String,
    pub reference: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing required column '{0}'")]
    MissingColumn(String),
}

/// A row needs (re)processing when it has no outcome yet or its last
/// attempt could not fetch the image.
pub fn is_eligible_status(status: &str) -> bool {
    let status = status.trim();
    status.is_empty() || status == RowOutcome::DownloadError.as_ref()
}

fn normalize_status(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("nan") {
        String::new()
    } else {
        trimmed.to_string()
    }
}

fn column_index(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    url_idx: usize,
    status_idx: usize,
    id_idx: Option<usize>,
}

impl Dataset {
    pub fn from_reader<R: Read>(reader: R, layout: &DatasetLayout) -> Result<Self, DatasetError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let mut headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
        let url_idx = column_index(&headers, &layout.url_column)
            .ok_or_else(|| DatasetError::MissingColumn(layout.url_column.clone()))?;
        let id_idx = column_index(&headers, &layout.id_column);
        let (status_idx, append_status) = match column_index(&headers, &layout.status_column) {
            Some(idx) => (idx, false),
            None => {
                headers.push(layout.status_column.clone());
                (headers.len() - 1, true)
            }
        };

        let mut rows = Vec::new();
        for record in rdr.records() {
            let mut row: Vec<String> = record?.iter().map(|v| v.to_string()).collect();
            if append_status {
                row.push(String::new());
            }
            row[status_idx] = normalize_status(&row[status_idx]);
            rows.push(row);
        }

        Ok(Self {
            headers,
            rows,
            url_idx,
            status_idx,
            id_idx,
        })
    }

    pub fn load(path: &Path, layout: &DatasetLayout) -> Result<Self, DatasetError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, layout)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Current outcome cell of a row (empty when unprocessed).
    pub fn status(&self, index: usize) -> Option<&str> {
        self.rows.get(index).map(|row| row[self.status_idx].as_str())
    }

    pub fn is_eligible(&self, index: usize) -> bool {
        self.status(index).is_some_and(is_eligible_status)
    }

    /// Rows that need work, in dataset order.
    pub fn row_tasks(&self) -> Vec<RowTask> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| is_eligible_status(&row[self.status_idx]))
            .map(|(index, row)| {
                let row_id = self
                    .id_idx
                    .map(|idx| row[idx].trim())
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| index.to_string());
                RowTask {
                    index,
                    row_id,
                    reference: row[self.url_idx].trim().to_string(),
                }
            })
            .collect()
    }

    /// Writes `outcome` into the row's outcome column. Out-of-range indexes are ignored.
    pub fn set_outcome(&mut self, index: usize, outcome: RowOutcome) {
        if let Some(row) = self.rows.get_mut(index) {
            row[self.status_idx] = outcome.to_string();
        }
    }

    /// Number of rows whose outcome column is filled in.
    pub fn resolved_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| !row[self.status_idx].is_empty())
            .count()
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, DatasetError> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.into_inner().map_err(|e| DatasetError::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "id,Name,Check-In Photo,Face_Status\n\
        7,Ann,https://img.example/a.jpg,GOOD\n\
        8,Bob,https://img.example/b.jpg,\n\
        9,Cy,https://img.example/c.jpg,DOWNLOAD_ERROR\n\
        10,Di,https://img.example/d.jpg,NO FACE\n\
        ,Ed,https://img.example/e.jpg,nan\n";

    fn sample() -> Dataset {
        Dataset::from_reader(SAMPLE.as_bytes(), &DatasetLayout::default()).unwrap()
    }

    #[test]
    fn test_eligibility_rule() {
        assert!(is_eligible_status(""));
        assert!(is_eligible_status("  "));
        assert!(is_eligible_status("DOWNLOAD_ERROR"));
        assert!(!is_eligible_status("GOOD"));
        assert!(!is_eligible_status("NO FACE"));
        assert!(!is_eligible_status("SYSTEM_ERROR"));
    }

    #[test]
    fn test_row_tasks_select_only_eligible_rows() {
        let dataset = sample();
        let tasks = dataset.row_tasks();
        let indexes: Vec<usize> = tasks.iter().map(|t| t.index).collect();
        assert_eq!(indexes, vec![1, 2, 4]);
        assert_eq!(tasks[0].row_id, "8");
        assert_eq!(tasks[0].reference, "https://img.example/b.jpg");
        // Blank id falls back to the row index
        assert_eq!(tasks[2].row_id, "4");
    }

    #[test]
    fn test_nan_status_is_normalized() {
        let dataset = sample();
        assert_eq!(dataset.status(4), Some(""));
        assert!(dataset.is_eligible(4));
    }

    #[test]
    fn test_missing_status_column_is_appended() {
        let csv = "Name,Check-In Photo\nAnn,https://img.example/a.jpg\n";
        let dataset = Dataset::from_reader(csv.as_bytes(), &DatasetLayout::default()).unwrap();
        assert_eq!(dataset.headers().last().map(String::as_str), Some("Face_Status"));
        assert_eq!(dataset.row_tasks().len(), 1);

        let written = String::from_utf8(dataset.to_csv_bytes().unwrap()).unwrap();
        assert_eq!(written, "Name,Check-In Photo,Face_Status\nAnn,https://img.example/a.jpg,\n");
    }

    #[test]
    fn test_missing_url_column_is_rejected() {
        let csv = "Name,Photo\nAnn,x\n";
        let err = Dataset::from_reader(csv.as_bytes(), &DatasetLayout::default()).unwrap_err();
        assert!(matches!(err, DatasetError::MissingColumn(ref c) if c == "Check-In Photo"));
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let csv = "Name,Check-In Photo\nAnn,x,extra\n";
        let err = Dataset::from_reader(csv.as_bytes(), &DatasetLayout::default()).unwrap_err();
        assert!(matches!(err, DatasetError::Csv(_)));
    }

    #[test]
    fn test_set_outcome_preserves_other_columns() {
        let mut dataset = sample();
        dataset.set_outcome(1, RowOutcome::NoFace);
        dataset.set_outcome(99, RowOutcome::Good);
        assert_eq!(dataset.status(1), Some("NO FACE"));
        assert_eq!(dataset.resolved_count(), 4);

        let written = String::from_utf8(dataset.to_csv_bytes().unwrap()).unwrap();
        assert!(written.contains("8,Bob,https://img.example/b.jpg,NO FACE\n"));
        assert!(written.contains(",Ed,https://img.example/e.jpg,\n"));
    }

    #[test]
    fn test_outcome_strings() {
        assert_eq!(RowOutcome::NoFace.to_string(), "NO FACE");
        assert_eq!("DOWNLOAD_ERROR".parse::<RowOutcome>().unwrap(), RowOutcome::DownloadError);
    }
}

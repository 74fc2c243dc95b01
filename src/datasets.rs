//! Reading interaction logs.
//!
//! Two formats are understood: a headered CSV with `user_id,item_id` and an
//! optional `timestamp` column, and the tab-separated, header-less
//! `u.data` file of MovieLens 100K (`user item rating timestamp`).
use std::path::Path;

use tracing::info;

use crate::data::LogRecord;
use crate::Result;

/// Load a headered CSV interaction log.
pub fn load_interaction_log<P: AsRef<Path>>(path: P) -> Result<Vec<LogRecord>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;
    let records: Vec<LogRecord> = reader
        .deserialize()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    info!(path = %path.display(), num_records = records.len(), "Loaded interaction log");

    Ok(records)
}

#[derive(Deserialize)]
struct MovielensRow {
    user_id: u64,
    item_id: u64,
    _rating: f32,
    timestamp: u64,
}

/// Load the MovieLens 100K `u.data` file. Every rating counts as an
/// interaction.
pub fn load_movielens_100k<P: AsRef<Path>>(path: P) -> Result<Vec<LogRecord>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)?;

    let records = reader
        .deserialize()
        .map(|row| {
            row.map(|row: MovielensRow| LogRecord {
                user_id: row.user_id,
                item_id: row.item_id,
                timestamp: Some(row.timestamp),
            })
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    info!(path = %path.display(), num_records = records.len(), "Loaded MovieLens 100K");

    Ok(records)
}

/// Load an interaction log, choosing the reader from the extension:
/// `.data` files are read as MovieLens 100K, everything else as CSV.
pub fn load_log<P: AsRef<Path>>(path: P) -> Result<Vec<LogRecord>> {
    let path = path.as_ref();

    match path.extension().and_then(|extension| extension.to_str()) {
        Some("data") => load_movielens_100k(path),
        _ => load_interaction_log(path),
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn reads_logs_with_and_without_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "user_id,item_id,timestamp").unwrap();
        writeln!(file, "10,200,881250949").unwrap();
        writeln!(file, "11,201,").unwrap();
        drop(file);

        let records = load_interaction_log(&path).unwrap();

        assert_eq!(
            records,
            vec![
                LogRecord {
                    user_id: 10,
                    item_id: 200,
                    timestamp: Some(881250949),
                },
                LogRecord::new(11, 201),
            ]
        );
    }

    #[test]
    fn reads_movielens_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u.data");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "196\t242\t3\t881250949").unwrap();
        writeln!(file, "186\t302\t3\t891717742").unwrap();
        drop(file);

        let records = load_movielens_100k(&path).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].user_id, 186);
        assert_eq!(records[1].item_id, 302);
        assert_eq!(records[1].timestamp, Some(891717742));
    }

    #[test]
    fn loader_follows_the_extension() {
        let dir = tempfile::tempdir().unwrap();

        let movielens = dir.path().join("u.data");
        let mut file = File::create(&movielens).unwrap();
        writeln!(file, "196\t242\t3\t881250949").unwrap();
        drop(file);

        let csv = dir.path().join("ratings.csv");
        let mut file = File::create(&csv).unwrap();
        writeln!(file, "user_id,item_id").unwrap();
        writeln!(file, "196,242").unwrap();
        drop(file);

        let from_movielens = load_log(&movielens).unwrap();
        assert_eq!(from_movielens[0].timestamp, Some(881250949));

        let from_csv = load_log(&csv).unwrap();
        assert_eq!(from_csv, vec![LogRecord::new(196, 242)]);

        // A CSV header is not a MovieLens row.
        let misnamed = dir.path().join("ratings.data");
        std::fs::copy(&csv, &misnamed).unwrap();
        assert_eq!(load_log(&misnamed).unwrap_err().kind(), ErrorKind::Csv);
    }

    #[test]
    fn malformed_logs_are_csv_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "user_id,item_id").unwrap();
        writeln!(file, "ten,200").unwrap();
        drop(file);

        let error = load_interaction_log(&path).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Csv);
    }
}

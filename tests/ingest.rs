use std::thread;
use std::time::Duration;

use reqlog::format::{CaptureSpec, FormatDescription, LineDefinition};
use reqlog::storage::{existing_files, Database, DatabaseOptions, RetryPolicy};
use reqlog::{Aggregator, ParsedLine, ParsedUnit, Watermark};
use rusqlite::Connection;

fn access_format() -> FormatDescription {
    FormatDescription::new(vec![LineDefinition::new(
        "access",
        vec![CaptureSpec::new("status", "int"), CaptureSpec::new("duration", "sec")],
    )])
}

fn access_unit(line_number: u64) -> ParsedUnit {
    ParsedUnit::new(vec![ParsedLine::new("access", "a.log", line_number)
        .with_raw("GET / 200")
        .with_field("status", 200)
        .with_field("duration", 0.5)])
}

#[test]
fn setup_twice_against_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("requests.db");

    let first = Aggregator::prepare(Database::open(&path).unwrap(), &access_format()).unwrap();
    let tables = first.database().table_names().unwrap();
    let columns = first.database().columns("access_lines").unwrap();
    let indexes = first.database().indexes("access_lines").unwrap();
    drop(first);

    let second = Aggregator::prepare(Database::open(&path).unwrap(), &access_format()).unwrap();
    assert_eq!(second.database().table_names().unwrap(), tables);
    assert_eq!(second.database().columns("access_lines").unwrap(), columns);
    assert_eq!(second.database().indexes("access_lines").unwrap(), indexes);
}

#[test]
fn resumed_run_sees_stored_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("requests.db");

    let mut agg = Aggregator::prepare(Database::open(&path).unwrap(), &access_format()).unwrap();
    agg.aggregate(&access_unit(100), Watermark::new(100, 5000)).unwrap();
    agg.finalize().unwrap();

    let agg = Aggregator::prepare(Database::open(&path).unwrap(), &access_format()).unwrap();
    assert_eq!(agg.existing_files().unwrap()["a.log"], Watermark::new(100, 5000));
}

#[test]
fn stored_watermark_is_non_decreasing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("requests.db");
    let mut agg = Aggregator::prepare(Database::open(&path).unwrap(), &access_format()).unwrap();

    let marks = [Watermark::new(1, 10), Watermark::new(4, 90), Watermark::new(2, 40), Watermark::new(9, 300)];
    let mut previous = Watermark::default();
    for (i, mark) in marks.iter().enumerate() {
        agg.aggregate(&access_unit(i as u64 + 1), *mark).unwrap();
        agg.flush().unwrap();
        let stored = existing_files(agg.database()).unwrap()["a.log"];
        assert!(stored.line >= previous.line && stored.position >= previous.position);
        previous = stored;
    }
    assert_eq!(previous, Watermark::new(9, 300));
}

#[test]
fn busy_writer_is_waited_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("requests.db");

    let options = DatabaseOptions {
        busy_timeout: Duration::ZERO,
        retry: RetryPolicy::bounded(Duration::from_millis(50), 40),
    };
    let mut agg = Aggregator::prepare(Database::open_with(&path, options).unwrap(), &access_format()).unwrap();
    // Register the file up front so the only contended write is the request itself
    agg.aggregate(&access_unit(1), Watermark::new(1, 10)).unwrap();

    let other = Connection::open(&path).unwrap();
    other.execute_batch("BEGIN IMMEDIATE").unwrap();
    let holder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        other.execute_batch("COMMIT").unwrap();
    });

    agg.aggregate(&access_unit(2), Watermark::new(2, 20)).unwrap();
    holder.join().unwrap();

    assert!(agg.summary().retries >= 1);
    assert_eq!(agg.database().count("requests").unwrap(), 2);
    assert_eq!(agg.database().count("access_lines").unwrap(), 2);
}

#[test]
fn busy_writer_exhausts_bounded_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("requests.db");

    let options = DatabaseOptions {
        busy_timeout: Duration::ZERO,
        retry: RetryPolicy::bounded(Duration::from_millis(1), 3),
    };
    let mut agg = Aggregator::prepare(Database::open_with(&path, options).unwrap(), &access_format()).unwrap();
    agg.aggregate(&access_unit(1), Watermark::default()).unwrap();

    let other = Connection::open(&path).unwrap();
    other.execute_batch("BEGIN IMMEDIATE").unwrap();

    let err = agg.aggregate(&access_unit(2), Watermark::default()).unwrap_err();
    assert!(matches!(err, reqlog::Error::ContentionExhausted { attempts: 3, .. }), "got {err:?}");

    other.execute_batch("ROLLBACK").unwrap();
    assert_eq!(agg.database().count("requests").unwrap(), 1);
}

#[test]
fn warnings_from_another_writer_do_not_block_ingestion() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("requests.db");
    let mut agg = Aggregator::prepare(Database::open(&path).unwrap(), &access_format()).unwrap();

    let other = Connection::open(&path).unwrap();
    other
        .execute("INSERT INTO warnings (kind, message) VALUES ('external', 'from another process')", [])
        .unwrap();

    agg.aggregate(&access_unit(1), Watermark::default()).unwrap();
    agg.warning("local", "from this run", Some(1)).unwrap();
    assert_eq!(agg.database().count("warnings").unwrap(), 2);
}

#[test]
fn file_registered_by_another_run_is_adopted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("requests.db");
    let mut agg = Aggregator::prepare(Database::open(&path).unwrap(), &access_format()).unwrap();

    // The other run registers b.log just before our insert lands
    let other = Connection::open(&path).unwrap();
    other
        .execute_batch(
            "CREATE TRIGGER other_run_registers BEFORE INSERT ON files
             WHEN NEW.filename = 'b.log'
             BEGIN INSERT INTO files (filename, line_number, position) VALUES ('b.log', 0, 0); END;",
        )
        .unwrap();

    let unit = ParsedUnit::new(vec![ParsedLine::new("access", "b.log", 1).with_field("status", 200)]);
    agg.aggregate(&unit, Watermark::new(1, 30)).unwrap();
    agg.flush().unwrap();

    assert_eq!(agg.database().count("files").unwrap(), 1);
    assert_eq!(agg.database().count("requests").unwrap(), 1);
    assert_eq!(existing_files(agg.database()).unwrap()["b.log"], Watermark::new(1, 30));
}

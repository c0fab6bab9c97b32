use std::io::Cursor;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eventdb::{Options, RawRow, RowsQuery, Table};
use pretty_assertions::assert_eq;

fn count_rows(table: &Table, min_ts: i64, max_ts: i64) -> usize {
    let query = RowsQuery {
        min_ts,
        max_ts: Some(max_ts),
        int_column_names: vec!["ts".to_string()],
        ..RowsQuery::default()
    };
    table.rows_query(&query).map(|r| r.count).unwrap_or(0)
}

#[test]
fn ingest_buf_is_synchronously_visible() {
    let _ = env_logger::try_init();
    let table = Table::new("events");

    let lines = "\
{\"int\":{\"ts\":1641742859,\"count\":906},\"str\":{\"event\":\"init_app\"}}
{\"int\":{\"ts\":1641763082},\"str\":{\"event\":\"edit\"}}
{\"int\":{\"ts\":1641763085}}";
    let accepted = table.ingest_buf(Cursor::new(lines));
    assert_eq!(accepted, 3);
    // no flush: ingest_buf drains synchronously
    assert_eq!(count_rows(&table, 0, i64::MAX - 1), 3);
}

#[test]
fn ingest_buf_skips_malformed_and_invalid_lines() {
    let _ = env_logger::try_init();
    let table = Table::new("events");

    let lines = "\
{\"int\":{\"ts\":100}}
not json at all
{\"int\":{\"count\":3},\"str\":{}}
{\"int\":{\"ts\":-4}}
{\"int\":{\"ts\":200}}";
    let accepted = table.ingest_buf(Cursor::new(lines));
    assert_eq!(accepted, 2);
    assert_eq!(count_rows(&table, 0, i64::MAX - 1), 2);
}

#[test]
fn ingest_buf_splits_into_blocks() {
    let _ = env_logger::try_init();
    let opts = Options {
        max_rows_per_block: 2,
        ..Options::default()
    };
    let table = Table::with_options("events", &opts);

    let mut lines = String::new();
    for ts in 1..=5 {
        lines.push_str(&format!("{{\"int\":{{\"ts\":{}}}}}\n", ts));
    }
    let accepted = table.ingest_buf(Cursor::new(lines.trim_end().to_string()));
    assert_eq!(accepted, 5);
    assert_eq!(count_rows(&table, 0, 100), 5);
    assert_eq!(table.table_info().row_count, 5);
}

#[test]
fn ingest_file_backfill() {
    let _ = env_logger::try_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backfill.jsonl");
    let mut file = std::fs::File::create(&path).unwrap();
    for ts in [10, 20, 30] {
        writeln!(
            file,
            "{{\"int\":{{\"ts\":{}}},\"str\":{{\"event\":\"backfill\"}}}}",
            ts
        )
        .unwrap();
    }
    drop(file);

    let table = Table::new("events");
    let accepted = table.ingest_file(&path).unwrap();
    assert_eq!(accepted, 3);
    assert_eq!(count_rows(&table, 0, 100), 3);
}

#[test]
fn ingest_raw_rows_batches_and_counts() {
    let _ = env_logger::try_init();
    let opts = Options {
        max_rows_per_block: 2,
        ..Options::default()
    };
    let table = Table::with_options("events", &opts);

    let mut rows = Vec::new();
    for ts in 1i64..=5 {
        rows.push(RawRow::new().with_int("ts", ts));
    }
    rows.push(RawRow::new()); // missing ts, dropped
    let accepted = table.ingest_raw_rows(rows, false);
    assert_eq!(accepted, 5);

    table.flush();
    assert_eq!(count_rows(&table, 0, 100), 5);
}

#[test]
fn use_server_ts_overrides_row_ts() {
    let _ = env_logger::try_init();
    let table = Table::new("events");

    let rows = vec![
        RawRow::new(),                  // no ts at all
        RawRow::new().with_int("ts", 1), // stale ts, overwritten
    ];
    let accepted = table.ingest_raw_rows(rows, true);
    assert_eq!(accepted, 2);
    table.flush();

    // both rows carry the server clock, so a window around now sees them
    let info = table.table_info();
    assert_eq!(info.row_count, 2);
    let min_ts = info.min_ts.unwrap();
    assert!(min_ts > 1);
    assert_eq!(count_rows(&table, min_ts - 60, min_ts + 60), 2);
}

#[test]
fn flush_makes_async_ingest_visible() {
    let _ = env_logger::try_init();
    let table = Table::new("events");

    let accepted = table.ingest_raw_rows(
        vec![
            RawRow::new().with_int("ts", 10),
            RawRow::new().with_int("ts", 20),
        ],
        false,
    );
    assert_eq!(accepted, 2);
    table.flush();
    assert_eq!(count_rows(&table, 0, 100), 2);
}

#[test]
fn ticker_flushes_without_explicit_sync() {
    let _ = env_logger::try_init();
    let opts = Options {
        flush_interval: Duration::from_millis(50),
        ..Options::default()
    };
    let table = Table::with_options("events", &opts);
    table.ingest_raw_rows(vec![RawRow::new().with_int("ts", 10)], false);

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while count_rows(&table, 0, 100) == 0 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(count_rows(&table, 0, 100), 1);
}

#[test]
fn concurrent_ingest_from_multiple_writers() {
    let _ = env_logger::try_init();
    let table = Arc::new(Table::new("events"));

    let mut handles = Vec::new();
    for writer in 0i64..4 {
        let table = table.clone();
        handles.push(thread::spawn(move || {
            for chunk in 0i64..5 {
                let rows: Vec<RawRow> = (0i64..20)
                    .map(|i| {
                        RawRow::new()
                            .with_int("ts", 1 + writer * 1000 + chunk * 100 + i)
                            .with_int("writer", writer)
                            .with_str("tag", &format!("writer_{}", writer))
                    })
                    .collect();
                let accepted = table.ingest_raw_rows(rows, false);
                assert_eq!(accepted, 20);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    table.flush();

    assert_eq!(count_rows(&table, 0, i64::MAX - 1), 400);
    assert_eq!(table.table_info().row_count, 400);

    // every writer's rows all arrived
    for writer in 0i64..4 {
        let query = RowsQuery {
            min_ts: 0,
            max_ts: Some(i64::MAX - 1),
            int_filters: vec![eventdb::Filter::int(
                "writer",
                eventdb::FilterOp::Eq,
                writer,
            )],
            int_column_names: vec!["ts".to_string()],
            ..RowsQuery::default()
        };
        assert_eq!(table.rows_query(&query).unwrap().count, 100);
    }
}

#[test]
fn queries_run_during_ingest() {
    let _ = env_logger::try_init();
    let table = Arc::new(Table::new("events"));

    let writer = {
        let table = table.clone();
        thread::spawn(move || {
            for chunk in 0i64..10 {
                let rows: Vec<RawRow> = (0i64..50)
                    .map(|i| RawRow::new().with_int("ts", 1 + chunk * 50 + i))
                    .collect();
                table.ingest_raw_rows(rows, false);
                table.flush();
            }
        })
    };

    // readers only ever observe fully built blocks
    for _ in 0..20 {
        let seen = count_rows(&table, 0, 10_000);
        assert_eq!(seen % 50, 0);
        thread::sleep(Duration::from_millis(1));
    }
    writer.join().unwrap();
    assert_eq!(count_rows(&table, 0, 10_000), 500);
}

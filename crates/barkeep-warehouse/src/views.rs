use ::duckdb::Connection;

/// Reporting views layered over the operational tables.
pub fn create_views(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE OR REPLACE VIEW candle_coverage AS
SELECT
    symbol,
    interval,
    COUNT(*) AS candle_count,
    MIN(open_time) AS earliest_open_time,
    MAX(open_time) AS latest_open_time,
    MAX(updated_at) AS last_updated
FROM candles
GROUP BY symbol, interval;

CREATE OR REPLACE VIEW sync_activity AS
SELECT
    symbol,
    interval,
    kind,
    COUNT(*) AS runs,
    SUM(rows_written) AS rows_written,
    MAX(timestamp) AS last_run
FROM sync_log
GROUP BY symbol, interval, kind;
"#,
    )
}

//! SQLite databases with known contents.

use std::path::Path;

use rusqlite::types::Value as SqlValue;

/// How the rows of an `events` source are mixed.
///
/// Minority rows are spread evenly through the table so that both the
/// sampler and the canary see some of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventsMix {
    /// Days written `YYYY-MM-DD`.
    pub iso: usize,
    /// Days written `DD/MM/YYYY` with the day above 12.
    pub dmy: usize,
    /// Days no layout parses.
    pub unparseable: usize,
    /// Rows whose `amount` is an empty string.
    pub empty_amounts: usize,
}

impl EventsMix {
    /// 1,000 rows: 991 ISO days, 9 `DD/MM/YYYY` days, 5 empty amounts.
    pub const fn scenario() -> Self {
        Self {
            iso: 991,
            dmy: 9,
            unparseable: 0,
            empty_amounts: 5,
        }
    }

    /// `rows` rows of which `percent`% carry an unparseable day.
    pub const fn with_unparseable(rows: usize, percent: usize) -> Self {
        let bad = rows * percent / 100;
        Self {
            iso: rows - bad,
            dmy: 0,
            unparseable: bad,
            empty_amounts: 0,
        }
    }

    pub const fn rows(&self) -> usize {
        self.iso + self.dmy + self.unparseable
    }
}

/// True when row `i` of `n` is one of `k` evenly spread rows.
const fn spread(i: usize, n: usize, k: usize) -> bool {
    n > 0 && (i + 1) * k / n > i * k / n
}

/// Creates `events(id INTEGER PRIMARY KEY, day TIMESTAMP, amount INTEGER)`
/// at `path`. Days are stored as text whatever their layout.
pub fn events_source(path: &Path, mix: EventsMix) -> rusqlite::Result<()> {
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE events (id INTEGER PRIMARY KEY, day TIMESTAMP, amount INTEGER)",
    )?;
    let n = mix.rows();
    let minority = mix.dmy + mix.unparseable;
    let tx = conn.unchecked_transaction()?;
    {
        let mut insert = tx.prepare("INSERT INTO events (id, day, amount) VALUES (?1, ?2, ?3)")?;
        let mut seen = 0;
        for i in 0..n {
            let day = if spread(i, n, minority) {
                seen += 1;
                if seen <= mix.dmy {
                    format!("{:02}/{:02}/2024", 13 + seen % 16, seen % 12 + 1)
                } else {
                    format!("not-a-date-{i}")
                }
            } else {
                format!("2024-{:02}-{:02}", i % 12 + 1, i % 28 + 1)
            };
            let id = i64::try_from(i + 1).unwrap_or(i64::MAX);
            let amount = if spread(i, n, mix.empty_amounts) {
                SqlValue::Text(String::new())
            } else {
                SqlValue::Integer(id * 10)
            };
            insert.execute(rusqlite::params![id, day, amount])?;
        }
    }
    tx.commit()
}

/// Creates a target holding `customers(id, name)` with three rows, so that
/// rollback checks compare against a non-empty baseline.
pub fn seeded_target(path: &Path) -> rusqlite::Result<()> {
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT);
         INSERT INTO customers VALUES (1, 'ada'), (2, 'grace'), (3, NULL);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(conn: &rusqlite::Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn test_scenario_mix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.db");
        events_source(&path, EventsMix::scenario()).unwrap();
        let conn = rusqlite::Connection::open(&path).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM events"), 1000);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM events WHERE day LIKE '__/__/____'"), 9);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM events WHERE amount = ''"), 5);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM events WHERE typeof(day) = 'text'"), 1000);
    }

    #[test]
    fn test_unparseable_share() {
        let mix = EventsMix::with_unparseable(200, 15);
        assert_eq!(mix.unparseable, 30);
        assert_eq!(mix.rows(), 200);
    }

    #[test]
    fn test_spread_picks_exactly_k() {
        assert_eq!((0..1000).filter(|&i| spread(i, 1000, 9)).count(), 9);
        assert_eq!((0..10).filter(|&i| spread(i, 10, 0)).count(), 0);
    }
}

//! SQLite-backed queue repository
//!
//! Layout:
//! - `dispatch`: one row per stored dispatch (serialized payload + enqueue time)
//! - `queue`: one row per (dispatch, processor) still waiting to be processed
//!
//! Deleting the last membership of a dispatch deletes the dispatch (trigger);
//! deleting a dispatch deletes its memberships (cascade).

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use contracts::{CoreError, CoreSettings, DataObject, Dispatch};
use rusqlite::{params, Connection};
use tracing::{debug, info, instrument, warn};

use crate::{Clock, QueueRepository};

/// Schema version stored in `PRAGMA user_version`
const SCHEMA_VERSION: i64 = 1;

/// Single-table layout written by older releases
const LEGACY_TABLE: &str = "dispatches";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dispatch (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    timestamp INTEGER NOT NULL,
    enqueued_at INTEGER NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_dispatch_enqueued ON dispatch (enqueued_at, seq);
CREATE TABLE IF NOT EXISTS queue (
    dispatch_id TEXT NOT NULL,
    processor_id TEXT NOT NULL,
    PRIMARY KEY (dispatch_id, processor_id),
    FOREIGN KEY (dispatch_id) REFERENCES dispatch(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_queue_processor ON queue (processor_id);
CREATE TRIGGER IF NOT EXISTS delete_processed_dispatch AFTER DELETE ON queue
BEGIN
    DELETE FROM dispatch
    WHERE id = OLD.dispatch_id
      AND NOT EXISTS (SELECT 1 FROM queue WHERE dispatch_id = OLD.dispatch_id);
END;
";

fn db_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> CoreError {
    move |e| CoreError::storage_source(operation, e)
}

/// Durable queue on a single SQLite connection
pub struct SqliteQueueRepository {
    conn: Connection,
    clock: Arc<dyn Clock>,
    max_queue_size: i64,
    expiration: Duration,
    legacy_checked: bool,
}

impl SqliteQueueRepository {
    /// Open (or create) the database at `path`
    pub fn open(
        path: &Path,
        clock: Arc<dyn Clock>,
        settings: &CoreSettings,
    ) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(db_err("open"))?;
        info!(path = %path.display(), "Opened dispatch queue database");
        Self::new(conn, clock, settings)
    }

    /// Non-durable database, for tests and ephemeral runs
    pub fn open_in_memory(clock: Arc<dyn Clock>, settings: &CoreSettings) -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory().map_err(db_err("open"))?;
        Self::new(conn, clock, settings)
    }

    /// Wrap an open connection, creating the schema if needed
    pub fn new(
        conn: Connection,
        clock: Arc<dyn Clock>,
        settings: &CoreSettings,
    ) -> Result<Self, CoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_err("pragma"))?;
        initialize_schema(&conn)?;

        Ok(Self {
            conn,
            clock,
            max_queue_size: settings.max_queue_size,
            expiration: settings.expiration(),
            legacy_checked: false,
        })
    }

    pub fn max_queue_size(&self) -> i64 {
        self.max_queue_size
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Oldest enqueue time still considered live
    fn expiry_cutoff(&self, window: Duration) -> i64 {
        self.clock.now_millis() - window.as_millis() as i64
    }

    /// Move rows from the legacy single-table layout, once per process
    fn migrate_legacy(&mut self, processors: &BTreeSet<String>) -> Result<usize, CoreError> {
        let cutoff = self.expiry_cutoff(self.expiration);
        let max_queue_size = self.max_queue_size;
        let tx = self.conn.transaction().map_err(db_err("migrate"))?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                params![LEGACY_TABLE],
                |row| row.get(0),
            )
            .map_err(db_err("migrate"))?;
        if !exists {
            return Ok(0);
        }

        let migrated = tx
            .execute(
                "INSERT OR IGNORE INTO dispatch (id, timestamp, enqueued_at, payload)
                 SELECT key, timestamp, timestamp, value FROM dispatches
                 WHERE timestamp > ?1
                 ORDER BY timestamp ASC",
                params![cutoff],
            )
            .map_err(db_err("migrate"))?;

        for processor in processors {
            tx.execute(
                "INSERT OR IGNORE INTO queue (dispatch_id, processor_id)
                 SELECT key, ?1 FROM dispatches
                 WHERE timestamp > ?2 AND key IN (SELECT id FROM dispatch)",
                params![processor, cutoff],
            )
            .map_err(db_err("migrate"))?;
        }

        tx.execute(
            "DELETE FROM dispatch WHERE id NOT IN (SELECT dispatch_id FROM queue)",
            [],
        )
        .map_err(db_err("migrate"))?;
        evict_overflow(&tx, max_queue_size, 0)?;
        tx.execute_batch("DROP TABLE dispatches;")
            .map_err(db_err("migrate"))?;
        tx.commit().map_err(db_err("migrate"))?;

        Ok(migrated)
    }
}

impl QueueRepository for SqliteQueueRepository {
    fn size(&mut self) -> Result<usize, CoreError> {
        count_dispatches(&self.conn)
    }

    #[instrument(name = "queue_store", skip(self, dispatches), fields(count = dispatches.len()))]
    fn store_dispatches(
        &mut self,
        dispatches: &[Dispatch],
        processors: &BTreeSet<String>,
    ) -> Result<(), CoreError> {
        if dispatches.is_empty() || processors.is_empty() {
            return Ok(());
        }

        // Only the newest `max_queue_size` of an oversized batch can survive
        let batch = match usize::try_from(self.max_queue_size) {
            Ok(max) if dispatches.len() > max => &dispatches[dispatches.len() - max..],
            _ => dispatches,
        };
        if batch.is_empty() {
            return Ok(());
        }

        let now = self.clock.now_millis();
        let cutoff = self.expiry_cutoff(self.expiration);
        let max_queue_size = self.max_queue_size;

        let rows = batch
            .iter()
            .map(|d| Ok((d, serde_json::to_string(d.payload())?)))
            .collect::<Result<Vec<_>, CoreError>>()?;

        let tx = self.conn.transaction().map_err(db_err("store"))?;
        delete_older_than(&tx, cutoff)?;

        let mut incoming_new = 0;
        for (dispatch, _) in &rows {
            let exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM dispatch WHERE id = ?1)",
                    params![dispatch.id()],
                    |row| row.get(0),
                )
                .map_err(db_err("store"))?;
            if !exists {
                incoming_new += 1;
            }
        }
        evict_overflow(&tx, max_queue_size, incoming_new)?;

        {
            let mut upsert = tx
                .prepare_cached(
                    "INSERT INTO dispatch (id, timestamp, enqueued_at, payload)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                         timestamp = excluded.timestamp,
                         payload = excluded.payload",
                )
                .map_err(db_err("store"))?;
            let mut member = tx
                .prepare_cached(
                    "INSERT OR IGNORE INTO queue (dispatch_id, processor_id) VALUES (?1, ?2)",
                )
                .map_err(db_err("store"))?;

            for (dispatch, payload) in &rows {
                upsert
                    .execute(params![dispatch.id(), dispatch.timestamp(), now, payload])
                    .map_err(db_err("store"))?;
                for processor in processors {
                    member
                        .execute(params![dispatch.id(), processor])
                        .map_err(db_err("store"))?;
                }
            }
        }

        tx.commit().map_err(db_err("store"))?;
        debug!(processors = processors.len(), "Stored dispatches");
        Ok(())
    }

    fn get_queued_dispatches(
        &mut self,
        count: i64,
        excluding: &HashSet<String>,
        processor: &str,
    ) -> Result<Vec<Dispatch>, CoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let cutoff = self.expiry_cutoff(self.expiration);
        let limit = if count < 0 {
            -1
        } else {
            count + excluding.len() as i64
        };

        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT d.id, d.timestamp, d.payload
                 FROM dispatch d JOIN queue q ON q.dispatch_id = d.id
                 WHERE q.processor_id = ?1 AND d.enqueued_at >= ?2
                 ORDER BY d.enqueued_at ASC, d.seq ASC
                 LIMIT ?3",
            )
            .map_err(db_err("get_queued"))?;

        let rows = stmt
            .query_map(params![processor, cutoff, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(db_err("get_queued"))?;

        let take = if count < 0 { usize::MAX } else { count as usize };
        let mut dispatches = Vec::new();
        for row in rows {
            let (id, timestamp, payload) = row.map_err(db_err("get_queued"))?;
            if excluding.contains(&id) {
                continue;
            }
            let payload: DataObject = serde_json::from_str(&payload)?;
            dispatches.push(Dispatch::restore(id, payload, timestamp));
            if dispatches.len() >= take {
                break;
            }
        }
        Ok(dispatches)
    }

    fn delete_dispatches(
        &mut self,
        dispatch_ids: &[String],
        processor: &str,
    ) -> Result<(), CoreError> {
        if dispatch_ids.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction().map_err(db_err("delete"))?;
        {
            let mut stmt = tx
                .prepare_cached("DELETE FROM queue WHERE dispatch_id = ?1 AND processor_id = ?2")
                .map_err(db_err("delete"))?;
            for id in dispatch_ids {
                stmt.execute(params![id, processor])
                    .map_err(db_err("delete"))?;
            }
        }
        tx.commit().map_err(db_err("delete"))
    }

    fn delete_all_dispatches(&mut self, processor: &str) -> Result<(), CoreError> {
        self.conn
            .execute("DELETE FROM queue WHERE processor_id = ?1", params![processor])
            .map_err(db_err("delete_all"))?;
        Ok(())
    }

    #[instrument(name = "queue_delete_queues", skip(self))]
    fn delete_queues(&mut self, processors: &BTreeSet<String>) -> Result<(), CoreError> {
        if !self.legacy_checked {
            self.legacy_checked = true;
            match self.migrate_legacy(processors) {
                Ok(0) => {}
                Ok(migrated) => info!(migrated, "Migrated legacy dispatch queue"),
                Err(e) => warn!(error = %e, "Legacy queue migration failed, skipping"),
            }
        }

        let known: Vec<String> = {
            let mut stmt = self
                .conn
                .prepare_cached("SELECT DISTINCT processor_id FROM queue")
                .map_err(db_err("delete_queues"))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db_err("delete_queues"))?;
            rows.collect::<Result<_, _>>()
                .map_err(db_err("delete_queues"))?
        };

        let tx = self.conn.transaction().map_err(db_err("delete_queues"))?;
        for processor in known.iter().filter(|p| !processors.contains(*p)) {
            tx.execute("DELETE FROM queue WHERE processor_id = ?1", params![processor])
                .map_err(db_err("delete_queues"))?;
            debug!(processor = %processor, "Deleted queue of removed processor");
        }
        tx.commit().map_err(db_err("delete_queues"))
    }

    fn queue_sizes(&mut self) -> Result<BTreeMap<String, usize>, CoreError> {
        let cutoff = self.expiry_cutoff(self.expiration);
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT q.processor_id, COUNT(*)
                 FROM queue q JOIN dispatch d ON d.id = q.dispatch_id
                 WHERE d.enqueued_at >= ?1
                 GROUP BY q.processor_id",
            )
            .map_err(db_err("queue_sizes"))?;
        let rows = stmt
            .query_map(params![cutoff], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })
            .map_err(db_err("queue_sizes"))?;
        rows.collect::<Result<_, _>>().map_err(db_err("queue_sizes"))
    }

    fn queued_ids(&mut self, processor: &str) -> Result<HashSet<String>, CoreError> {
        let cutoff = self.expiry_cutoff(self.expiration);
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT q.dispatch_id
                 FROM queue q JOIN dispatch d ON d.id = q.dispatch_id
                 WHERE q.processor_id = ?1 AND d.enqueued_at >= ?2",
            )
            .map_err(db_err("queued_ids"))?;
        let rows = stmt
            .query_map(params![processor, cutoff], |row| row.get::<_, String>(0))
            .map_err(db_err("queued_ids"))?;
        rows.collect::<Result<_, _>>().map_err(db_err("queued_ids"))
    }

    #[instrument(name = "queue_resize", skip(self))]
    fn resize(&mut self, max_queue_size: i64) -> Result<(), CoreError> {
        self.max_queue_size = max_queue_size;
        let tx = self.conn.transaction().map_err(db_err("resize"))?;
        let evicted = evict_overflow(&tx, max_queue_size, 0)?;
        tx.commit().map_err(db_err("resize"))?;
        if evicted > 0 {
            info!(evicted, "Evicted dispatches after resize");
        }
        Ok(())
    }

    #[instrument(name = "queue_set_expiration", skip(self))]
    fn set_expiration(&mut self, expiration: Duration) -> Result<(), CoreError> {
        let narrowest = expiration.min(self.expiration);
        let deleted = delete_older_than(&self.conn, self.expiry_cutoff(narrowest))?;
        self.expiration = expiration;
        if deleted > 0 {
            info!(deleted, "Deleted expired dispatches");
        }
        Ok(())
    }

    fn delete_expired(&mut self) -> Result<usize, CoreError> {
        delete_older_than(&self.conn, self.expiry_cutoff(self.expiration))
    }
}

fn initialize_schema(conn: &Connection) -> Result<(), CoreError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(db_err("schema"))?;

    match version {
        0 => {
            conn.execute_batch(SCHEMA).map_err(db_err("schema"))?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(db_err("schema"))?;
            Ok(())
        }
        SCHEMA_VERSION => Ok(()),
        other => Err(CoreError::storage(
            "schema",
            format!("unsupported queue schema version {other}"),
        )),
    }
}

fn count_dispatches(conn: &Connection) -> Result<usize, CoreError> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM dispatch", [], |row| row.get(0))
        .map_err(db_err("size"))?;
    Ok(count as usize)
}

/// Delete the oldest dispatches so that `incoming` more still fit
fn evict_overflow(conn: &Connection, max_queue_size: i64, incoming: usize) -> Result<usize, CoreError> {
    if max_queue_size < 0 {
        return Ok(0);
    }
    let size = count_dispatches(conn)? as i64;
    let required = size + incoming as i64 - max_queue_size;
    if required <= 0 {
        return Ok(0);
    }

    let evicted = conn
        .execute(
            "DELETE FROM dispatch WHERE id IN (
                 SELECT id FROM dispatch ORDER BY enqueued_at ASC, seq ASC LIMIT ?1
             )",
            params![required],
        )
        .map_err(db_err("evict"))?;
    debug!(evicted, "Evicted oldest dispatches");
    Ok(evicted)
}

fn delete_older_than(conn: &Connection, cutoff: i64) -> Result<usize, CoreError> {
    conn.execute("DELETE FROM dispatch WHERE enqueued_at < ?1", params![cutoff])
        .map_err(db_err("expire"))
}

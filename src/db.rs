//! Realtime collection storage.
//!
//! The quiz only ever talks to its data through [`RealtimeDatabase`]: append a
//! record under a path, read the full snapshot of a path, or subscribe to it.
//! [`SqliteDatabase`] is the local backend used by both binaries.

use crate::error::{Error, Result};
use log::{debug, error, info, warn};
use rand::distr::Alphanumeric;
use rand::{rng, Rng};
use rusqlite::{params, Connection, DatabaseName};
use serde_json::Value;
use std::cell::RefCell;
use std::path::Path;
use std::rc::{Rc, Weak};
use std::time::Instant;

/// Full point-in-time view of one collection path.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: String,
    /// Highest sequence number stored under `path`, 0 when empty.
    pub version: i64,
    pub children: Vec<(String, Value)>,
}

impl Snapshot {
    pub fn empty(path: &str) -> Self {
        Snapshot {
            path: path.to_string(),
            version: 0,
            children: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }
}

pub type SnapshotCallback = Box<dyn FnMut(Result<Snapshot>)>;

pub trait RealtimeDatabase {
    /// Appends `value` under `path` and returns the generated key.
    fn push(&self, path: &str, value: &Value) -> Result<String>;

    fn get(&self, path: &str) -> Result<Snapshot>;

    /// Delivers the current snapshot of `path` right away, then every newer
    /// one until the returned [`Subscription`] is cancelled or dropped.
    fn on_value(&self, path: &str, callback: SnapshotCallback) -> Subscription;
}

struct Listener {
    id: u64,
    path: String,
    last_version: i64,
    pending: Option<Snapshot>,
    callback: Rc<RefCell<SnapshotCallback>>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<Listener>,
}

impl Registry {
    fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.listeners.iter().map(|l| l.path.clone()).collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

/// Handle for a live `on_value` listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<RefCell<Registry>>,
}

impl Subscription {
    /// A handle bound to nothing, for backends that deliver once and keep no
    /// listener around.
    pub fn detached() -> Self {
        Subscription {
            id: 0,
            registry: Weak::new(),
        }
    }

    pub fn cancel(self) {}

    pub fn is_active(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.borrow().listeners.iter().any(|l| l.id == self.id),
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().listeners.retain(|l| l.id != self.id);
            debug!("[DB] Listener {} unsubscribed", self.id);
        }
    }
}

pub struct SqliteDatabase {
    conn: Connection,
    registry: Rc<RefCell<Registry>>,
}

impl SqliteDatabase {
    pub fn create_or_open(src: &Path) -> Result<Self> {
        Ok(Self::from_connection(create_or_open(src)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = init_db(Connection::open_in_memory()?)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        SqliteDatabase {
            conn,
            registry: Rc::new(RefCell::new(Registry::default())),
        }
    }

    pub fn close(self) -> Result<()> {
        close_db(self.conn)
    }

    fn version(&self, path: &str) -> Result<i64> {
        let version = self.conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM Node WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    /// Picks up writes made by other connections to the same file and hands
    /// the fresh snapshots to subscribers. Returns how many listeners fired.
    pub fn poll_changes(&self) -> usize {
        let paths = self.registry.borrow().paths();
        let mut fired = 0;
        for path in paths {
            match self.version(&path) {
                Ok(version) => {
                    let stale = self
                        .registry
                        .borrow()
                        .listeners
                        .iter()
                        .any(|l| l.path == path && l.last_version < version);
                    if stale {
                        fired += self.notify(&path);
                    }
                }
                Err(err) => warn!("[DB] Cannot poll '{}': {}", path, err),
            }
        }
        fired
    }

    fn notify(&self, path: &str) -> usize {
        let snapshot = self.get(path);
        let targets: Vec<u64> = self
            .registry
            .borrow()
            .listeners
            .iter()
            .filter(|l| l.path == path)
            .map(|l| l.id)
            .collect();

        let mut fired = 0;
        for id in targets {
            if self.deliver(id, clone_snapshot(&snapshot)) {
                fired += 1;
            }
        }
        fired
    }

    /// Hands `snapshot` to one listener unless it already saw the same or a
    /// newer version. The registry borrow is released before the callback
    /// runs so callbacks may push or subscribe themselves; a snapshot that
    /// arrives while the listener's own callback is still running is parked
    /// and delivered once it returns.
    fn deliver(&self, id: u64, snapshot: Result<Snapshot>) -> bool {
        let mut next = Some(snapshot);
        let mut fired = false;
        while let Some(snapshot) = next.take() {
            let callback = {
                let mut registry = self.registry.borrow_mut();
                let Some(listener) = registry.listeners.iter_mut().find(|l| l.id == id) else {
                    return fired;
                };
                if let Ok(snapshot) = &snapshot {
                    if snapshot.version <= listener.last_version {
                        debug!(
                            "[DB] Dropping stale snapshot v{} for listener {} (has v{})",
                            snapshot.version, id, listener.last_version
                        );
                        return fired;
                    }
                }
                if listener.callback.try_borrow_mut().is_err() {
                    if let Ok(snapshot) = snapshot {
                        let newer = listener
                            .pending
                            .as_ref()
                            .map_or(true, |p| p.version < snapshot.version);
                        if newer {
                            listener.pending = Some(snapshot);
                        }
                    }
                    return fired;
                }
                if let Ok(snapshot) = &snapshot {
                    listener.last_version = snapshot.version;
                }
                Rc::clone(&listener.callback)
            };

            {
                let mut callback = callback.borrow_mut();
                (*callback)(snapshot);
            }
            fired = true;

            next = self
                .registry
                .borrow_mut()
                .listeners
                .iter_mut()
                .find(|l| l.id == id)
                .and_then(|l| l.pending.take())
                .map(Ok);
        }
        fired
    }
}

fn clone_snapshot(snapshot: &Result<Snapshot>) -> Result<Snapshot> {
    match snapshot {
        Ok(snapshot) => Ok(snapshot.clone()),
        Err(Error::LoadFailed(reason)) => Err(Error::LoadFailed(reason.clone())),
        Err(err) => Err(Error::load_failed(err)),
    }
}

impl RealtimeDatabase for SqliteDatabase {
    fn push(&self, path: &str, value: &Value) -> Result<String> {
        let path = normalize_path(path).map_err(Error::save_failed)?;
        let key = push_key();
        let encoded = serde_json::to_string(value)?;
        match self.conn.execute(
            "INSERT INTO Node(path, key, value) VALUES (?1, ?2, ?3)",
            params![path, key, encoded],
        ) {
            Ok(_) => {
                debug!("[DB] Pushed '{}' under '{}'", key, path);
            }
            Err(err) => {
                error!("[DB] Error while pushing to '{}': {:?}", path, err);
                return Err(Error::save_failed(err));
            }
        }
        self.notify(&path);
        Ok(key)
    }

    fn get(&self, path: &str) -> Result<Snapshot> {
        let path = normalize_path(path).map_err(Error::load_failed)?;
        let mut statement = self
            .conn
            .prepare("SELECT seq, key, value FROM Node WHERE path = :path ORDER BY seq")?;
        let rows = statement.query_map(&[(":path", &path)], |row| {
            Ok((
                row.get::<usize, i64>(0)?,
                row.get::<usize, String>(1)?,
                row.get::<usize, String>(2)?,
            ))
        })?;

        let mut snapshot = Snapshot::empty(&path);
        for row in rows {
            let (seq, key, raw) = row?;
            let value: Value = serde_json::from_str(&raw)
                .map_err(|err| Error::LoadFailed(format!("record '{}': {}", key, err)))?;
            snapshot.version = snapshot.version.max(seq);
            snapshot.children.push((key, value));
        }
        Ok(snapshot)
    }

    fn on_value(&self, path: &str, callback: SnapshotCallback) -> Subscription {
        let path = normalize_path(path).unwrap_or_else(|_| path.to_string());
        let callback = Rc::new(RefCell::new(callback));
        let id = {
            let mut registry = self.registry.borrow_mut();
            registry.next_id += 1;
            let id = registry.next_id;
            registry.listeners.push(Listener {
                id,
                path: path.clone(),
                last_version: -1,
                pending: None,
                callback,
            });
            id
        };
        debug!("[DB] Listener {} subscribed to '{}'", id, path);

        self.deliver(id, self.get(&path));

        Subscription {
            id,
            registry: Rc::downgrade(&self.registry),
        }
    }
}

/// Strips surrounding slashes and rejects empty segments.
pub fn normalize_path(path: &str) -> std::result::Result<String, String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(format!("empty path '{}'", path));
    }
    if trimmed.split('/').any(|segment| segment.trim().is_empty()) {
        return Err(format!("path '{}' has an empty segment", path));
    }
    Ok(trimmed.to_string())
}

/// Time-ordered key: zero-padded millisecond timestamp plus a random suffix.
fn push_key() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: String = rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{:012x}{}", millis, suffix)
}

pub(crate) fn create_or_open(src: &Path) -> Result<Connection> {
    if src.exists() {
        info!("[DB] Opening existing Database");
        open_db(src)
    } else {
        info!("[DB] Creating new Database");
        create_db(src)
    }
}

pub(crate) fn create_db(dest: &Path) -> Result<Connection> {
    let now = Instant::now();
    let db = init_db(Connection::open_in_memory()?)?;
    match db.backup(DatabaseName::Main, dest, None) {
        Ok(_) => {
            debug!(
                "[DB] Creating and Saving took {} ms.",
                now.elapsed().as_millis()
            );
            // Keep working against the file so other processes see our writes.
            close_db(db)?;
            open_db(dest)
        }
        Err(err) => {
            warn!("[DB] Failed to create database file: {}", err);
            close_db(db)?;
            Err(err.into())
        }
    }
}

pub(crate) fn open_db(src: &Path) -> Result<Connection> {
    let now = Instant::now();
    let db = init_db(Connection::open(src)?)?;
    debug!("[DB] Opening took {} ms.", now.elapsed().as_millis());
    Ok(db)
}

pub(crate) fn close_db(connection: Connection) -> Result<()> {
    info!("[DB] Closing Database");
    let mut connection = connection;
    let mut retries = 0;
    loop {
        match connection.close() {
            Ok(_) => return Ok(()),
            Err((_, err)) if retries == 2 => {
                error!("[DB] Cannot close connection: {}. Giving up.", err);
                return Err(err.into());
            }
            Err((conn, err)) => {
                retries += 1;
                error!("[DB] Cannot close connection ({}). Retrying {}/2...", err, retries);
                connection = conn;
            }
        }
    }
}

fn init_db(conn: Connection) -> Result<Connection> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS Node (
              seq INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
              path TEXT NOT NULL,
              key TEXT NOT NULL UNIQUE,
              value TEXT NOT NULL
            )",
        (),
    )?;
    debug!("[DB INIT] Ensured table Node");
    conn.execute("CREATE INDEX IF NOT EXISTS Node_path_idx ON Node(path)", ())?;
    debug!("[DB INIT] Ensured index Node_path_idx");

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_then_get_keeps_insertion_order() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.push("questions", &json!({"n": 1})).unwrap();
        db.push("/questions/", &json!({"n": 2})).unwrap();
        db.push("other", &json!({"n": 3})).unwrap();

        let snapshot = db.get("questions").unwrap();
        let ns: Vec<i64> = snapshot
            .iter()
            .map(|(_, v)| v["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, vec![1, 2]);
        assert!(snapshot.version > 0);
    }

    #[test]
    fn get_of_unknown_path_is_empty() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let snapshot = db.get("nothing/here").unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.version, 0);
    }

    #[test]
    fn push_rejects_empty_segments() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        assert!(matches!(
            db.push("userSelfies//x", &json!(1)),
            Err(Error::SaveFailed(_))
        ));
        assert!(matches!(db.push("/", &json!(1)), Err(Error::SaveFailed(_))));
    }

    #[test]
    fn on_value_delivers_initial_and_new_snapshots() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.push("questions", &json!("first")).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let subscription = db.on_value(
            "questions",
            Box::new(move |snapshot| sink.borrow_mut().push(snapshot.unwrap().len())),
        );
        db.push("questions", &json!("second")).unwrap();
        db.push("elsewhere", &json!("ignored")).unwrap();

        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert!(subscription.is_active());
    }

    #[test]
    fn cancelled_subscription_stops_delivery() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        let subscription = db.on_value("questions", Box::new(move |_| *sink.borrow_mut() += 1));
        subscription.cancel();
        db.push("questions", &json!("x")).unwrap();

        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn nested_push_never_delivers_stale_snapshot() {
        let db = Rc::new(SqliteDatabase::open_in_memory().unwrap());
        let versions = Rc::new(RefCell::new(Vec::new()));

        let inner_db = Rc::downgrade(&db);
        let _first = db.on_value(
            "questions",
            Box::new(move |snapshot| {
                let snapshot = snapshot.unwrap();
                if snapshot.len() == 1 {
                    if let Some(db) = inner_db.upgrade() {
                        db.push("questions", &json!("from callback")).unwrap();
                    }
                }
            }),
        );
        let sink = Rc::clone(&versions);
        let _second = db.on_value(
            "questions",
            Box::new(move |snapshot| sink.borrow_mut().push(snapshot.unwrap().version)),
        );

        db.push("questions", &json!("from test")).unwrap();

        // v1 reaches the second listener only after v2 did, so it is dropped.
        assert_eq!(*versions.borrow(), vec![0, 2]);
    }

    #[test]
    fn poll_changes_sees_writes_from_another_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quiz.db");
        let reader = SqliteDatabase::create_or_open(&path).unwrap();
        let writer = SqliteDatabase::create_or_open(&path).unwrap();

        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        let _subscription = reader.on_value("questions", Box::new(move |_| *sink.borrow_mut() += 1));

        assert_eq!(reader.poll_changes(), 0);
        writer.push("questions", &json!("q")).unwrap();
        assert_eq!(reader.poll_changes(), 1);
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn push_keys_are_unique() {
        let a = push_key();
        let b = push_key();
        assert_ne!(a, b);
        assert_eq!(a.len(), 20);
    }
}

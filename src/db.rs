use crate::classifier::LinkKind;
use crate::error::{Result, StewardError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the structured store.
/// The lock is only ever taken for a single synchronous statement batch,
/// never across an `.await`.
pub type Store = Arc<Mutex<Connection>>;

/// Open (or create) the database file and make sure the schema exists
pub fn open_store(db_path: &Path) -> Result<Store> {
    let conn = Connection::open(db_path)?;
    setup_database(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory store, used by tests and dry runs
pub fn open_memory_store() -> Result<Store> {
    let conn = Connection::open_in_memory()?;
    setup_database(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub fn lock(store: &Store) -> Result<MutexGuard<'_, Connection>> {
    store
        .lock()
        .map_err(|e| StewardError::LockPoisoned(e.to_string()))
}

// ============================================================================
// TYPED ROWS
// ============================================================================

/// One provisioned remote-service identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Operator-chosen unique key, immutable once created
    pub session_name: String,

    /// Operator who created it (0 = unknown owner)
    pub owner_id: i64,

    /// Learned safe delay between bulk actions, seconds (> 0)
    pub cooldown_estimate: f64,
}

/// Candidate resource identifier awaiting manual processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub url: String,
    pub kind: LinkKind,
    pub status: LinkStatus,

    // Reserved for retry workflows; never mutated here
    pub last_checked: i64,
    pub tries: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Pending,
    Done,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Pending => "pending",
            LinkStatus::Done => "done",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(LinkStatus::Pending),
            "done" => Some(LinkStatus::Done),
            _ => None,
        }
    }
}

/// Event for audit trail ("Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (no-op for in-memory databases)
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Accounts Table (one row per provisioned session)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_name TEXT UNIQUE NOT NULL,
            owner_id INTEGER NOT NULL DEFAULT 0,
            cooldown_estimate REAL NOT NULL CHECK (cooldown_estimate > 0),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Links Table (ingestion queue, deduplicated by url)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT UNIQUE NOT NULL,
            kind TEXT NOT NULL DEFAULT 'unknown',
            status TEXT NOT NULL DEFAULT 'pending',
            last_checked INTEGER NOT NULL DEFAULT 0,
            tries INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Credentials Table (fallback write path when the sessions dir fails)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS credentials (
            session_name TEXT PRIMARY KEY NOT NULL,
            blob TEXT NOT NULL,
            stored_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail / event sourcing)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_links_status_kind ON links(status, kind)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ACCOUNT ROWS
// ============================================================================

/// Insert-or-ignore. Returns true when a new row was created.
pub fn insert_account_ignore(
    conn: &Connection,
    session_name: &str,
    owner_id: i64,
    cooldown_estimate: f64,
) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO accounts (session_name, owner_id, cooldown_estimate)
         VALUES (?1, ?2, ?3)",
        params![session_name, owner_id, cooldown_estimate],
    )?;

    Ok(changed > 0)
}

pub fn update_account_cooldown(
    conn: &Connection,
    session_name: &str,
    cooldown_estimate: f64,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE accounts SET cooldown_estimate = ?1 WHERE session_name = ?2",
        params![cooldown_estimate, session_name],
    )?;

    Ok(changed > 0)
}

pub fn get_account(conn: &Connection, session_name: &str) -> Result<Option<Account>> {
    let account = conn
        .query_row(
            "SELECT session_name, owner_id, cooldown_estimate
             FROM accounts
             WHERE session_name = ?1",
            [session_name],
            |row| {
                Ok(Account {
                    session_name: row.get(0)?,
                    owner_id: row.get(1)?,
                    cooldown_estimate: row.get(2)?,
                })
            },
        )
        .optional()?;

    Ok(account)
}

pub fn get_all_accounts(conn: &Connection) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(
        "SELECT session_name, owner_id, cooldown_estimate
         FROM accounts
         ORDER BY id",
    )?;

    let accounts = stmt
        .query_map([], |row| {
            Ok(Account {
                session_name: row.get(0)?,
                owner_id: row.get(1)?,
                cooldown_estimate: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(accounts)
}

// ============================================================================
// LINK ROWS
// ============================================================================

/// Insert-or-ignore on the url unique key. Returns true when a new row was created.
pub fn insert_link_ignore(conn: &Connection, url: &str, kind: LinkKind) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO links (url, kind, status) VALUES (?1, ?2, ?3)",
        params![url, kind.as_str(), LinkStatus::Pending.as_str()],
    )?;

    Ok(changed > 0)
}

fn link_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LinkEntry> {
    let kind: String = row.get(1)?;
    let status: String = row.get(2)?;

    Ok(LinkEntry {
        url: row.get(0)?,
        kind: LinkKind::parse(&kind),
        status: LinkStatus::parse(&status).unwrap_or(LinkStatus::Pending),
        last_checked: row.get(3)?,
        tries: row.get(4)?,
    })
}

pub fn get_link(conn: &Connection, url: &str) -> Result<Option<LinkEntry>> {
    let entry = conn
        .query_row(
            "SELECT url, kind, status, last_checked, tries FROM links WHERE url = ?1",
            [url],
            link_from_row,
        )
        .optional()?;

    Ok(entry)
}

/// All links with the given status, in insertion order
pub fn get_links_by_status(conn: &Connection, status: LinkStatus) -> Result<Vec<LinkEntry>> {
    let mut stmt = conn.prepare(
        "SELECT url, kind, status, last_checked, tries
         FROM links
         WHERE status = ?1
         ORDER BY id",
    )?;

    let links = stmt
        .query_map([status.as_str()], link_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(links)
}

pub fn verify_link_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// CREDENTIAL FALLBACK ROWS
// ============================================================================

/// Plain insert: a second blob for the same name is a constraint violation
/// and surfaces as `SessionNameTaken`.
pub fn insert_credential(conn: &Connection, session_name: &str, blob: &str) -> Result<()> {
    let result = conn.execute(
        "INSERT INTO credentials (session_name, blob, stored_at) VALUES (?1, ?2, ?3)",
        params![session_name, blob, Utc::now().to_rfc3339()],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(StewardError::SessionNameTaken(session_name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_credential(conn: &Connection, session_name: &str) -> Result<Option<String>> {
    let blob = conn
        .query_row(
            "SELECT blob FROM credentials WHERE session_name = ?1",
            [session_name],
            |row| row.get(0),
        )
        .optional()?;

    Ok(blob)
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Audit writes never fail the operation that triggered them
pub fn record_event(conn: &Connection, event: Event) {
    if let Err(e) = insert_event(conn, &event) {
        tracing::warn!(event_type = %event.event_type, error = %e, "failed to record audit event");
    }
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

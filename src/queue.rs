// 📥 Queue Store - ingested links awaiting manual processing
// Ingestion is idempotent: the first stored kind wins, duplicates are no-ops.

use crate::classifier::{LinkClassifier, LinkKind};
use crate::db::{self, Event, LinkStatus};
use crate::error::Result;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Outcome of a single ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ingested {
    /// Kind as stored (the first ingestion's kind for duplicates)
    pub kind: LinkKind,

    /// False when the link was already queued
    pub inserted: bool,
}

pub struct LinkQueue {
    classifier: LinkClassifier,
}

impl LinkQueue {
    pub fn new(classifier: LinkClassifier) -> Self {
        LinkQueue { classifier }
    }

    /// Normalize, classify and insert-or-ignore one identifier
    pub fn ingest(&self, conn: &Connection, identifier: &str) -> Result<Ingested> {
        let url = identifier.trim();
        let kind = self.classifier.classify(url);

        let inserted = db::insert_link_ignore(conn, url, kind)?;

        if inserted {
            db::record_event(
                conn,
                Event::new(
                    "link_ingested",
                    "link",
                    url,
                    serde_json::json!({ "kind": kind.as_str() }),
                    "queue",
                ),
            );
            debug!(url, kind = %kind, "link queued");
            return Ok(Ingested { kind, inserted });
        }

        // Duplicate: report what is actually stored
        let stored = db::get_link(conn, url)?
            .map(|entry| entry.kind)
            .unwrap_or(kind);
        debug!(url, kind = %stored, "link already queued");

        Ok(Ingested {
            kind: stored,
            inserted: false,
        })
    }

    /// Pending links whose kind is in `kinds`, in insertion order
    pub fn list_pending(&self, conn: &Connection, kinds: &[LinkKind]) -> Result<Vec<String>> {
        let urls = db::get_links_by_status(conn, LinkStatus::Pending)?
            .into_iter()
            .filter(|entry| kinds.contains(&entry.kind))
            .map(|entry| entry.url)
            .collect();

        Ok(urls)
    }

    /// Pending counts per kind, for the operator overview
    pub fn count_pending_by_kind(&self, conn: &Connection) -> Result<BTreeMap<&'static str, usize>> {
        let mut counts: BTreeMap<&'static str, usize> =
            LinkKind::ALL.iter().map(|kind| (kind.as_str(), 0)).collect();

        for entry in db::get_links_by_status(conn, LinkStatus::Pending)? {
            *counts.entry(entry.kind.as_str()).or_insert(0) += 1;
        }

        Ok(counts)
    }

    /// Ingest a newline-delimited file. Returns the number of new links.
    /// A missing file seeds nothing.
    pub fn seed_from_file(&self, conn: &Connection, path: &Path) -> Result<usize> {
        if !path.exists() {
            info!(path = %path.display(), "links file not found, nothing to seed");
            return Ok(0);
        }

        let content = fs::read_to_string(path)?;
        let mut added = 0;

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if self.ingest(conn, line)?.inserted {
                added += 1;
            }
        }

        info!(path = %path.display(), added, "seeded links");
        Ok(added)
    }
}

impl Default for LinkQueue {
    fn default() -> Self {
        LinkQueue::new(LinkClassifier::builtin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use std::io::Write;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_ingest_classifies() {
        let conn = memory_conn();
        let queue = LinkQueue::default();

        assert_eq!(queue.ingest(&conn, "https://t.me/+AbCd1234").unwrap().kind, LinkKind::GroupInvite);
        assert_eq!(queue.ingest(&conn, "@somebot").unwrap().kind, LinkKind::Unclassified);
        assert_eq!(queue.ingest(&conn, "https://t.me/examplebot").unwrap().kind, LinkKind::Bot);
    }

    #[test]
    fn test_ingest_twice_is_noop() {
        let conn = memory_conn();
        let queue = LinkQueue::default();

        let first = queue.ingest(&conn, "  https://t.me/+AbCd1234 ").unwrap();
        let second = queue.ingest(&conn, "https://t.me/+AbCd1234").unwrap();

        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(second.kind, LinkKind::GroupInvite);
        assert_eq!(db::verify_link_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_keeps_first_kind() {
        let conn = memory_conn();
        // Pre-existing row with a kind the classifier would not assign
        db::insert_link_ignore(&conn, "https://t.me/examplebot", LinkKind::Unclassified).unwrap();

        let queue = LinkQueue::default();
        let again = queue.ingest(&conn, "https://t.me/examplebot").unwrap();

        assert!(!again.inserted);
        assert_eq!(again.kind, LinkKind::Unclassified);
    }

    #[test]
    fn test_list_pending_filters_by_kind() {
        let conn = memory_conn();
        let queue = LinkQueue::default();

        for url in ["https://t.me/+a", "https://t.me/examplebot", "@handle", "https://t.me/+b"] {
            queue.ingest(&conn, url).unwrap();
        }

        let exportable = queue
            .list_pending(&conn, &[LinkKind::GroupInvite, LinkKind::Unclassified])
            .unwrap();
        assert_eq!(exportable, vec!["https://t.me/+a", "@handle", "https://t.me/+b"]);

        let bots = queue.list_pending(&conn, &[LinkKind::Bot]).unwrap();
        assert_eq!(bots, vec!["https://t.me/examplebot"]);

        let counts = queue.count_pending_by_kind(&conn).unwrap();
        assert_eq!(counts["group_invite"], 2);
        assert_eq!(counts["bot"], 1);
        assert_eq!(counts["unknown"], 1);
    }

    #[test]
    fn test_done_links_are_not_pending() {
        let conn = memory_conn();
        let queue = LinkQueue::default();
        queue.ingest(&conn, "https://t.me/+done").unwrap();
        conn.execute("UPDATE links SET status = 'done'", []).unwrap();

        assert!(queue.list_pending(&conn, &LinkKind::ALL).unwrap().is_empty());
    }

    #[test]
    fn test_seed_from_file() {
        let conn = memory_conn();
        let queue = LinkQueue::default();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "https://t.me/+one").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  @two  ").unwrap();
        writeln!(file, "https://t.me/+one").unwrap();

        assert_eq!(queue.seed_from_file(&conn, file.path()).unwrap(), 2);
        assert_eq!(queue.seed_from_file(&conn, file.path()).unwrap(), 0);
        assert_eq!(
            queue.seed_from_file(&conn, Path::new("/definitely/not/here.txt")).unwrap(),
            0
        );
    }
}

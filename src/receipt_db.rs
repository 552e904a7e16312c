use rusqlite::{Connection, Result as SqliteResult, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

pub struct ReceiptStore {
    conn: Connection,
}

/// Processing lifecycle of a stored receipt.
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_EXTRACTED: &str = "extracted";
pub const STATUS_SKIPPED: &str = "skipped";
pub const STATUS_ERROR: &str = "error";

#[derive(Debug)]
pub struct StoredReceipt {
    pub uid: String,
    /// Original filename or path the image came from.
    pub source: String,
    pub image_data: Vec<u8>,
    /// One of the STATUS_* values.
    pub status: String,
    /// Cleaned model sequence, once inference has run.
    pub raw_output: Option<String>,
    /// Serialized ParsedReceipt JSON, once parsing has run.
    pub parsed_json: Option<String>,
}

impl ReceiptStore {
    /// Create a new receipt store with SQLite backend
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS receipts (
                uid TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                image_data BLOB NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                raw_output TEXT,
                parsed_json TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_receipts_status ON receipts(status)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_receipts_created_at ON receipts(created_at)",
            [],
        )?;

        info!("Database initialized successfully");
        Ok(Self { conn })
    }

    /// Generate a unique ID from the image bytes and their source name
    pub fn generate_uid(source: &str, image_data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(image_data);
        format!("{:x}", hasher.finalize())
    }

    /// Store a receipt as pending. Re-ingesting the same image is a
    /// no-op; returns whether a new row was written.
    pub fn insert_receipt(&self, receipt: &StoredReceipt) -> SqliteResult<bool> {
        let changed = self.conn.execute(
            "INSERT INTO receipts (uid, source, image_data, status, raw_output, parsed_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(uid) DO NOTHING",
            params![
                receipt.uid,
                receipt.source,
                receipt.image_data,
                receipt.status,
                receipt.raw_output,
                receipt.parsed_json,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_receipt_by_uid(&self, uid: &str) -> SqliteResult<Option<StoredReceipt>> {
        let mut stmt = self.conn.prepare(
            "SELECT uid, source, image_data, status, raw_output, parsed_json
             FROM receipts WHERE uid = ?1",
        )?;

        let mut rows = stmt.query_map(params![uid], row_to_receipt)?;
        rows.next().transpose()
    }

    /// Receipts still waiting for extraction, oldest first.
    pub fn get_pending(&self) -> SqliteResult<Vec<StoredReceipt>> {
        let mut stmt = self.conn.prepare(
            "SELECT uid, source, image_data, status, raw_output, parsed_json
             FROM receipts
             WHERE status = 'pending'
             ORDER BY created_at ASC",
        )?;

        let receipts = stmt.query_map([], row_to_receipt)?;
        receipts.collect()
    }

    /// Record an extraction outcome for one receipt.
    pub fn set_extraction(
        &self,
        uid: &str,
        status: &str,
        raw_output: Option<&str>,
        parsed_json: Option<&str>,
    ) -> SqliteResult<()> {
        self.conn.execute(
            "UPDATE receipts SET status = ?2, raw_output = ?3, parsed_json = ?4 WHERE uid = ?1",
            params![uid, status, raw_output, parsed_json],
        )?;
        info!(uid = %uid, status = %status, "Receipt status updated");
        Ok(())
    }

    /// Get counts by processing status: (total, extracted, pending, failed)
    pub fn get_counts(&self) -> SqliteResult<(usize, usize, usize, usize)> {
        let total: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM receipts", [], |row| row.get(0))?;

        let extracted: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM receipts WHERE status = 'extracted'",
            [],
            |row| row.get(0),
        )?;

        let pending: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM receipts WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;

        let failed: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM receipts WHERE status IN ('error', 'skipped')",
            [],
            |row| row.get(0),
        )?;

        Ok((total, extracted, pending, failed))
    }
}

fn row_to_receipt(row: &rusqlite::Row<'_>) -> SqliteResult<StoredReceipt> {
    Ok(StoredReceipt {
        uid: row.get(0)?,
        source: row.get(1)?,
        image_data: row.get(2)?,
        status: row.get(3)?,
        raw_output: row.get(4)?,
        parsed_json: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_receipt(uid: &str) -> StoredReceipt {
        StoredReceipt {
            uid: uid.to_string(),
            source: "receipt_1.png".to_string(),
            image_data: vec![0x89, 0x50, 0x4e, 0x47],
            status: STATUS_PENDING.to_string(),
            raw_output: None,
            parsed_json: None,
        }
    }

    #[test]
    fn test_uid_generation() {
        let uid1 = ReceiptStore::generate_uid("receipt_1.png", b"imagebytes");
        let uid2 = ReceiptStore::generate_uid("receipt_1.png", b"imagebytes");
        let uid3 = ReceiptStore::generate_uid("receipt_2.png", b"imagebytes");

        assert_eq!(uid1, uid2); // Same inputs = same hash
        assert_ne!(uid1, uid3); // Different inputs = different hash
    }

    #[test]
    fn test_insert_is_idempotent() {
        let db = ReceiptStore::new(":memory:").unwrap();
        let receipt = pending_receipt("abc");

        assert!(db.insert_receipt(&receipt).unwrap());
        assert!(!db.insert_receipt(&receipt).unwrap());

        let (total, _, pending, _) = db.get_counts().unwrap();
        assert_eq!(total, 1);
        assert_eq!(pending, 1);
    }

    #[test]
    fn test_extraction_lifecycle() {
        let db = ReceiptStore::new(":memory:").unwrap();
        db.insert_receipt(&pending_receipt("abc")).unwrap();

        assert_eq!(db.get_pending().unwrap().len(), 1);

        db.set_extraction(
            "abc",
            STATUS_EXTRACTED,
            Some("<s_menu></s_menu>"),
            Some("{\"menu\":[]}"),
        )
        .unwrap();

        assert!(db.get_pending().unwrap().is_empty());
        let stored = db.get_receipt_by_uid("abc").unwrap().unwrap();
        assert_eq!(stored.status, STATUS_EXTRACTED);
        assert_eq!(stored.parsed_json.as_deref(), Some("{\"menu\":[]}"));

        let (total, extracted, pending, failed) = db.get_counts().unwrap();
        assert_eq!((total, extracted, pending, failed), (1, 1, 0, 0));
    }
}

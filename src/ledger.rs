//! Tamper-evident, hash-chained, append-only SQLite ledger.
//!
//! Each committed transaction becomes one entry.  `entry_hash` covers the
//! previous entry's hash, the payload hash, the caller's signature and the
//! caller's identity, so editing or removing any entry breaks every later
//! link.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension as _, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{ChainError, Result, ResultExt as _};
use crate::identity::Identity;
use crate::signing::{self, SignerDescriptor};
use crate::util;

pub const LEDGER_SCHEMA_VERSION: i64 = 1;

const CREATE_TABLES: &str = r#"
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=FULL;
    PRAGMA foreign_keys=ON;

    CREATE TABLE IF NOT EXISTS meta(
      k TEXT PRIMARY KEY,
      v TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS entries(
      seq INTEGER PRIMARY KEY,
      ts_utc TEXT NOT NULL,
      kind TEXT NOT NULL,
      subject INTEGER,
      payload_json TEXT NOT NULL,
      payload_hash BLOB NOT NULL,
      prev_hash BLOB NOT NULL,
      entry_hash BLOB NOT NULL,
      signature_der BLOB NOT NULL,
      signer_identity TEXT NOT NULL,
      signer_kind TEXT NOT NULL,
      signer_pubkey BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_entries_subject ON entries(subject);
"#;

const INSERT_ENTRY: &str = r#"
    INSERT INTO entries(
      seq, ts_utc, kind, subject, payload_json, payload_hash, prev_hash, entry_hash,
      signature_der, signer_identity, signer_kind, signer_pubkey
    ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
"#;

const SELECT_ENTRIES: &str = r#"
    SELECT seq, ts_utc, kind, subject, payload_json, payload_hash, prev_hash, entry_hash,
           signature_der, signer_identity, signer_kind, signer_pubkey
    FROM entries
"#;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerMeta {
    pub ledger_id: Uuid,
    pub created_at_utc: String,
    pub schema_version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq: i64,
    pub ts_utc: String,
    pub kind: String,
    /// Product the entry concerns, if any.
    pub subject: Option<i64>,
    pub payload_json: String,
    pub payload_hash_hex: String,
    pub prev_hash_hex: String,
    pub entry_hash_hex: String,
    pub signature_b64: String,
    pub signer: SignerDescriptor,
}

#[derive(Debug, Clone)]
pub struct LedgerAppendInput {
    /// Must equal the next sequence number or the append is refused.
    pub seq: i64,
    pub ts_utc: String,
    pub kind: String,
    pub subject: Option<i64>,
    pub payload_json: String,
    pub signature_der: Vec<u8>,
    pub signer: SignerDescriptor,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct Ledger {
    conn: Connection,
    meta: LedgerMeta,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    pub fn create_new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ChainError::Ledger(format!("create db parent dir {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| ChainError::Ledger(format!("open db {}: {e}", db_path.display())))?;
        conn.execute_batch(CREATE_TABLES).ctx_ledger("create tables")?;

        let meta = LedgerMeta {
            ledger_id: Uuid::new_v4(),
            created_at_utc: util::now_utc_rfc3339(),
            schema_version: LEDGER_SCHEMA_VERSION,
        };
        write_meta(&conn, &meta)?;
        Ok(Self { conn, meta })
    }

    /// Throwaway ledger, used by tests and benches.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().ctx_ledger("open in-memory db")?;
        conn.execute_batch(CREATE_TABLES).ctx_ledger("create tables")?;
        let meta = LedgerMeta {
            ledger_id: Uuid::new_v4(),
            created_at_utc: util::now_utc_rfc3339(),
            schema_version: LEDGER_SCHEMA_VERSION,
        };
        write_meta(&conn, &meta)?;
        Ok(Self { conn, meta })
    }

    pub fn open_existing(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            return Err(ChainError::Ledger(format!(
                "ledger {} does not exist",
                db_path.display()
            )));
        }
        let conn = Connection::open(db_path)
            .map_err(|e| ChainError::Ledger(format!("open db {}: {e}", db_path.display())))?;

        let ledger_id: String = conn
            .query_row("SELECT v FROM meta WHERE k='ledger_id'", [], |row| row.get(0))?;
        let created_at_utc: String = conn
            .query_row("SELECT v FROM meta WHERE k='created_at_utc'", [], |row| row.get(0))
            .ctx_ledger("read created_at_utc")?;
        let schema_version: i64 = conn
            .query_row("SELECT v FROM meta WHERE k='schema_version'", [], |row| {
                row.get::<_, String>(0)
            })
            .ctx_ledger("read schema_version")?
            .parse()
            .ctx_ledger("parse schema_version")?;

        if schema_version != LEDGER_SCHEMA_VERSION {
            return Err(ChainError::Ledger(format!(
                "unsupported schema_version {schema_version} (expected {LEDGER_SCHEMA_VERSION})"
            )));
        }

        let meta = LedgerMeta {
            ledger_id: Uuid::parse_str(&ledger_id).ctx_ledger("parse ledger_id uuid")?,
            created_at_utc,
            schema_version,
        };
        Ok(Self { conn, meta })
    }

    pub fn meta(&self) -> &LedgerMeta {
        &self.meta
    }

    pub fn append(&mut self, input: LedgerAppendInput) -> Result<LedgerEntry> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .ctx_ledger("begin tx")?;

        let (last_seq, prev_hash): (i64, Vec<u8>) = tx
            .query_row(
                "SELECT seq, entry_hash FROM entries ORDER BY seq DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .unwrap_or((0, vec![0u8; 32]));

        let next_seq = last_seq + 1;
        if input.seq != next_seq {
            return Err(ChainError::Ledger(format!(
                "sequence mismatch: transaction expects {} but next entry is {next_seq}",
                input.seq
            )));
        }

        let payload_hash = util::sha256(input.payload_json.as_bytes());
        let entry_hash = chain_hash(
            &prev_hash,
            &payload_hash,
            &input.signature_der,
            &input.signer.identity,
        );
        let signer_pubkey = util::b64_decode(&input.signer.public_key_b64)?;

        tx.execute(
            INSERT_ENTRY,
            params![
                next_seq,
                input.ts_utc,
                input.kind,
                input.subject,
                input.payload_json,
                payload_hash.to_vec(),
                prev_hash,
                entry_hash.to_vec(),
                input.signature_der,
                input.signer.identity.to_hex(),
                input.signer.kind,
                signer_pubkey,
            ],
        )
        .ctx_ledger("insert ledger entry")?;

        tx.commit().ctx_ledger("commit tx")?;

        Ok(LedgerEntry {
            seq: next_seq,
            ts_utc: input.ts_utc,
            kind: input.kind,
            subject: input.subject,
            payload_json: input.payload_json,
            payload_hash_hex: hex::encode(payload_hash),
            prev_hash_hex: hex::encode(&prev_hash),
            entry_hash_hex: hex::encode(entry_hash),
            signature_b64: util::b64_encode(&input.signature_der),
            signer: input.signer,
        })
    }

    pub fn latest_seq(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COALESCE(MAX(seq),0) FROM entries", [], |row| row.get(0))
            .ctx_ledger("latest seq")
    }

    pub fn iter_entries(&self) -> Result<Vec<LedgerEntry>> {
        self.select(&format!("{SELECT_ENTRIES} ORDER BY seq ASC"), None)
    }

    /// Entries concerning one product, oldest first.
    pub fn entries_for_subject(&self, product_id: i64) -> Result<Vec<LedgerEntry>> {
        self.select(
            &format!("{SELECT_ENTRIES} WHERE subject = ?1 ORDER BY seq ASC"),
            Some(product_id),
        )
    }

    fn select(&self, sql: &str, subject: Option<i64>) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(sql).ctx_ledger("prepare select entries")?;
        let mut rows = match subject {
            Some(id) => stmt.query(params![id]),
            None => stmt.query([]),
        }
        .ctx_ledger("query entries")?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().ctx_ledger("next row")? {
            let payload_hash: Vec<u8> = row.get(5)?;
            let prev_hash: Vec<u8> = row.get(6)?;
            let entry_hash: Vec<u8> = row.get(7)?;
            let signature_der: Vec<u8> = row.get(8)?;
            let signer_identity: String = row.get(9)?;
            let signer_pubkey: Vec<u8> = row.get(11)?;

            out.push(LedgerEntry {
                seq: row.get(0)?,
                ts_utc: row.get(1)?,
                kind: row.get(2)?,
                subject: row.get(3)?,
                payload_json: row.get(4)?,
                payload_hash_hex: hex::encode(payload_hash),
                prev_hash_hex: hex::encode(prev_hash),
                entry_hash_hex: hex::encode(entry_hash),
                signature_b64: util::b64_encode(&signature_der),
                signer: SignerDescriptor {
                    identity: signer_identity
                        .parse::<Identity>()
                        .ctx_ledger("parse signer identity")?,
                    kind: row.get(10)?,
                    public_key_b64: util::b64_encode(&signer_pubkey),
                },
            });
        }
        Ok(out)
    }

    /// Verify hash-chain integrity and signatures for every entry.
    ///
    /// `verify_sig` receives the entry, its recomputed payload hash and the
    /// DER signature; [`verify_caller_signature`] is the standard check.
    pub fn verify_integrity<F>(&self, mut verify_sig: F) -> Result<()>
    where
        F: FnMut(&LedgerEntry, &[u8], &[u8]) -> Result<()>,
    {
        let entries = self.iter_entries()?;
        let mut prev_hash = vec![0u8; 32];
        for (i, e) in entries.iter().enumerate() {
            if e.seq != i as i64 + 1 {
                return Err(ChainError::Ledger(format!(
                    "sequence gap: expected {} found {}",
                    i + 1,
                    e.seq
                )));
            }
            let payload_hash = util::sha256(e.payload_json.as_bytes());
            let sig_der = util::b64_decode(&e.signature_b64)?;
            let entry_hash = chain_hash(&prev_hash, &payload_hash, &sig_der, &e.signer.identity);

            if hex::encode(payload_hash) != e.payload_hash_hex {
                return Err(ChainError::Ledger(format!(
                    "payload_hash mismatch at seq {}",
                    e.seq
                )));
            }
            if hex::encode(&prev_hash) != e.prev_hash_hex {
                return Err(ChainError::Ledger(format!(
                    "prev_hash mismatch at seq {}",
                    e.seq
                )));
            }
            if hex::encode(entry_hash) != e.entry_hash_hex {
                return Err(ChainError::Ledger(format!(
                    "entry_hash mismatch at seq {}",
                    e.seq
                )));
            }

            verify_sig(e, &payload_hash, &sig_der)
                .map_err(|err| ChainError::Ledger(format!("signature verify at seq {}: {err}", e.seq)))?;

            prev_hash = entry_hash.to_vec();
        }
        Ok(())
    }
}

/// Standard signature check for [`Ledger::verify_integrity`].
pub fn verify_caller_signature(entry: &LedgerEntry, payload_hash: &[u8], sig_der: &[u8]) -> Result<()> {
    signing::verify_signer(&entry.signer, payload_hash, sig_der)
}

fn chain_hash(prev_hash: &[u8], payload_hash: &[u8; 32], sig_der: &[u8], signer: &Identity) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(32 + 32 + sig_der.len() + 32);
    preimage.extend_from_slice(prev_hash);
    preimage.extend_from_slice(payload_hash);
    preimage.extend_from_slice(sig_der);
    preimage.extend_from_slice(signer.as_bytes());
    util::sha256(&preimage)
}

fn write_meta(conn: &Connection, meta: &LedgerMeta) -> Result<()> {
    let rows = [
        ("ledger_id", meta.ledger_id.to_string()),
        ("created_at_utc", meta.created_at_utc.clone()),
        ("schema_version", meta.schema_version.to_string()),
    ];
    for (k, v) in rows {
        conn.execute("INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)", params![k, v])?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Backup / restore
// ---------------------------------------------------------------------------

/// Export the full ledger (meta + entries) to a JSON file.
pub fn export_ledger_json(ledger: &Ledger, out_path: &Path) -> Result<()> {
    let entries = ledger.iter_entries()?;
    let export = serde_json::json!({
        "format": "pharmachain-ledger-backup-v1",
        "exported_at_utc": util::now_utc_rfc3339(),
        "meta": ledger.meta(),
        "entries": entries,
    });
    let json = serde_json::to_vec_pretty(&export).ctx_ledger("serialize ledger export")?;
    std::fs::write(out_path, json)
        .map_err(|e| ChainError::Ledger(format!("write export {}: {e}", out_path.display())))?;
    info!(path = %out_path.display(), entries = entries.len(), "ledger exported");
    Ok(())
}

/// Import a ledger from a JSON backup into a new database, preserving the
/// original hashes and signatures, then verify the result.
pub fn import_ledger_json(json_path: &Path, db_path: &Path) -> Result<Ledger> {
    #[derive(Deserialize)]
    struct LedgerExport {
        meta: LedgerMeta,
        entries: Vec<LedgerEntry>,
    }

    let json_bytes = std::fs::read(json_path)
        .map_err(|e| ChainError::Ledger(format!("read import {}: {e}", json_path.display())))?;
    let export: LedgerExport =
        serde_json::from_slice(&json_bytes).ctx_ledger("parse ledger backup")?;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ChainError::Ledger(format!("create dir {}: {e}", parent.display())))?;
    }
    let conn = Connection::open(db_path)
        .map_err(|e| ChainError::Ledger(format!("open db {}: {e}", db_path.display())))?;
    conn.execute_batch(CREATE_TABLES)
        .ctx_ledger("create tables for import")?;
    write_meta(&conn, &export.meta)?;

    for e in &export.entries {
        let payload_hash = hex::decode(&e.payload_hash_hex).ctx_ledger("decode payload_hash")?;
        let prev_hash = hex::decode(&e.prev_hash_hex).ctx_ledger("decode prev_hash")?;
        let entry_hash = hex::decode(&e.entry_hash_hex).ctx_ledger("decode entry_hash")?;
        let sig_der = util::b64_decode(&e.signature_b64)?;
        let pubkey = util::b64_decode(&e.signer.public_key_b64)?;

        conn.execute(
            INSERT_ENTRY,
            params![
                e.seq,
                e.ts_utc,
                e.kind,
                e.subject,
                e.payload_json,
                payload_hash,
                prev_hash,
                entry_hash,
                sig_der,
                e.signer.identity.to_hex(),
                e.signer.kind,
                pubkey,
            ],
        )
        .ctx_ledger("insert imported entry")?;
    }

    let ledger = Ledger {
        conn,
        meta: export.meta,
    };
    ledger.verify_integrity(verify_caller_signature)?;
    info!(entries = export.entries.len(), "ledger imported and verified");
    Ok(ledger)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

//! Wireguard config assignment.
//!
//! Each pool file is handed to at most one account and each account gets at
//! most one file. Both rules are enforced by UNIQUE constraints on the
//! `wireguard` table, so concurrent claims from separate connections are
//! arbitrated by SQLite rather than by application locking: a losing insert
//! fails with a constraint violation, is rolled back, and the claimer moves on
//! to the next candidate.

use std::collections::HashSet;

use anyhow::Result;
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use portal_types::models::ResourceAssignment;

use crate::Database;

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The account already held this file (possibly won by a concurrent request).
    Existing(ResourceAssignment),
    /// A new assignment was created by this call.
    Claimed(ResourceAssignment),
    /// Every candidate was taken.
    Exhausted,
}

impl ClaimOutcome {
    pub fn assignment(&self) -> Option<&ResourceAssignment> {
        match self {
            Self::Existing(a) | Self::Claimed(a) => Some(a),
            Self::Exhausted => None,
        }
    }
}

impl Database {
    pub fn get_assignment(&self, uid: u64) -> Result<Option<ResourceAssignment>> {
        self.with_conn(|conn| query_assignment(conn, uid))
    }

    /// Names of every file that has ever been handed out.
    pub fn assigned_filenames(&self) -> Result<HashSet<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT filename FROM wireguard")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<HashSet<_>, _>>()?;
            Ok(names)
        })
    }

    /// Binds the first free name in `candidates` (in the given order) to `uid`.
    pub fn claim_next(&self, uid: u64, candidates: &[String]) -> Result<ClaimOutcome> {
        self.with_conn_mut(|conn| {
            if let Some(existing) = query_assignment(conn, uid)? {
                return Ok(ClaimOutcome::Existing(existing));
            }

            for filename in candidates {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let inserted = tx.execute(
                    "INSERT INTO wireguard (filename, uid) VALUES (?1, ?2)",
                    rusqlite::params![filename, uid],
                );

                match inserted {
                    Ok(_) => {
                        tx.commit()?;
                        info!("Assigned wireguard config {} to {}", filename, uid);
                        return Ok(ClaimOutcome::Claimed(ResourceAssignment {
                            filename: filename.clone(),
                            uid,
                        }));
                    }
                    Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                        tx.rollback()?;
                        // Either the file was taken, or this account won a
                        // concurrent claim on another connection.
                        if let Some(existing) = query_assignment(conn, uid)? {
                            return Ok(ClaimOutcome::Existing(existing));
                        }
                        debug!("Wireguard config {} already taken, trying next", filename);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            Ok(ClaimOutcome::Exhausted)
        })
    }
}

fn query_assignment(conn: &Connection, uid: u64) -> Result<Option<ResourceAssignment>> {
    let row = conn
        .query_row(
            "SELECT filename, uid FROM wireguard WHERE uid = ?1",
            [uid],
            |row| {
                Ok(ResourceAssignment {
                    filename: row.get(0)?,
                    uid: row.get(1)?,
                })
            },
        )
        .optional()?;

    Ok(row)
}

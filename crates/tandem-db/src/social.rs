use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row};

use crate::accounts::{profile_columns, profile_from_row};
use crate::models::{FriendRequestDetailRow, FriendRequestRow, ProfileRow};
use crate::{Database, OptionalExt, format_ts, ordered_pair};

/// Result of an accept attempt, decided inside one transaction.
#[derive(Debug, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
    NotFound,
    NotRecipient,
    AlreadyAccepted,
}

const REQUEST_COLUMNS: &str = "id, sender_id, recipient_id, status, created_at, updated_at";

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<FriendRequestRow> {
    Ok(FriendRequestRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl Database {
    // -- Friend requests --

    /// Fails with a constraint violation when any request already exists
    /// for the unordered pair.
    pub fn create_friend_request(&self, id: &str, sender_id: &str, recipient_id: &str) -> Result<()> {
        let now = format_ts(Utc::now());
        let (low, high) = ordered_pair(sender_id, recipient_id);
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO friend_requests (id, sender_id, recipient_id, pair_low, pair_high, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)",
                rusqlite::params![id, sender_id, recipient_id, low, high, now],
            )?;
            Ok(())
        })
    }

    pub fn get_friend_request(&self, id: &str) -> Result<Option<FriendRequestRow>> {
        self.with_conn(|conn| query_request(conn, id))
    }

    /// The request between two accounts, in either direction.
    pub fn friend_request_between(&self, a: &str, b: &str) -> Result<Option<FriendRequestRow>> {
        let (low, high) = ordered_pair(a, b);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM friend_requests WHERE pair_low = ?1 AND pair_high = ?2",
                REQUEST_COLUMNS
            );
            conn.query_row(&sql, [low, high], request_from_row).optional()
        })
    }

    pub fn are_friends(&self, a: &str, b: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM friendships WHERE account_id = ?1 AND friend_id = ?2",
                    [a, b],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Marks a pending request accepted and links both accounts as friends.
    /// The status check and the friendship inserts share one transaction, so
    /// two racing accepts produce exactly one `Accepted`.
    pub fn accept_friend_request(&self, id: &str, recipient_id: &str) -> Result<AcceptOutcome> {
        let now = format_ts(Utc::now());
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let Some(request) = query_request(&tx, id)? else {
                return Ok(AcceptOutcome::NotFound);
            };
            if request.recipient_id != recipient_id {
                return Ok(AcceptOutcome::NotRecipient);
            }

            let changed = tx.execute(
                "UPDATE friend_requests SET status = 'accepted', updated_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                rusqlite::params![id, now],
            )?;
            if changed == 0 {
                return Ok(AcceptOutcome::AlreadyAccepted);
            }

            tx.execute(
                "INSERT OR IGNORE INTO friendships (account_id, friend_id, created_at) VALUES (?1, ?2, ?3), (?2, ?1, ?3)",
                rusqlite::params![request.sender_id, request.recipient_id, now],
            )?;

            tx.commit()?;
            Ok(AcceptOutcome::Accepted)
        })
    }

    /// Pending requests addressed to `account_id`.
    pub fn incoming_friend_requests(&self, account_id: &str) -> Result<Vec<FriendRequestDetailRow>> {
        self.with_conn(|conn| {
            query_request_details(conn, "r.recipient_id = ?1 AND r.status = 'pending'", account_id)
        })
    }

    /// Requests sent by `account_id` that the other side accepted.
    pub fn accepted_friend_requests(&self, account_id: &str) -> Result<Vec<FriendRequestDetailRow>> {
        self.with_conn(|conn| {
            query_request_details(conn, "r.sender_id = ?1 AND r.status = 'accepted'", account_id)
        })
    }

    /// Pending requests sent by `account_id`.
    pub fn outgoing_friend_requests(&self, account_id: &str) -> Result<Vec<FriendRequestDetailRow>> {
        self.with_conn(|conn| {
            query_request_details(conn, "r.sender_id = ?1 AND r.status = 'pending'", account_id)
        })
    }

    // -- Friends --

    pub fn list_friends(&self, account_id: &str) -> Result<Vec<ProfileRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM friendships f
                 JOIN accounts a ON a.id = f.friend_id
                 WHERE f.account_id = ?1
                 ORDER BY f.created_at",
                profile_columns("a")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([account_id], |row| profile_from_row(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Onboarded accounts that are not `account_id`, not already friends, and
    /// have no request in either direction with it.
    pub fn recommended_accounts(&self, account_id: &str) -> Result<Vec<ProfileRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM accounts a
                 WHERE a.id != ?1
                   AND a.is_onboarded = 1
                   AND NOT EXISTS (
                       SELECT 1 FROM friendships f WHERE f.account_id = ?1 AND f.friend_id = a.id
                   )
                   AND NOT EXISTS (
                       SELECT 1 FROM friend_requests r
                       WHERE r.status = 'pending'
                         AND ((r.sender_id = ?1 AND r.recipient_id = a.id)
                           OR (r.sender_id = a.id AND r.recipient_id = ?1))
                   )
                 ORDER BY a.created_at DESC",
                profile_columns("a")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([account_id], |row| profile_from_row(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_request(conn: &Connection, id: &str) -> Result<Option<FriendRequestRow>> {
    let sql = format!("SELECT {} FROM friend_requests WHERE id = ?1", REQUEST_COLUMNS);
    conn.query_row(&sql, [id], request_from_row).optional()
}

fn query_request_details(
    conn: &Connection,
    filter: &str,
    account_id: &str,
) -> Result<Vec<FriendRequestDetailRow>> {
    // JOIN both parties to fetch their profiles in a single query
    let sql = format!(
        "SELECT r.id, r.status, r.created_at, {}, {}
         FROM friend_requests r
         JOIN accounts s ON s.id = r.sender_id
         JOIN accounts t ON t.id = r.recipient_id
         WHERE {}
         ORDER BY r.created_at DESC",
        profile_columns("s"),
        profile_columns("t"),
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([account_id], |row| {
            Ok(FriendRequestDetailRow {
                id: row.get(0)?,
                status: row.get(1)?,
                created_at: row.get(2)?,
                sender: profile_from_row(row, 3)?,
                recipient: profile_from_row(row, 10)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

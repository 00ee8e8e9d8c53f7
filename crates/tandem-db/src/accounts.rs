use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

use crate::models::{AccountRow, NewAccount, ProfileRow, ProfileUpdate};
use crate::{Database, OptionalExt, format_ts};

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, full_name, bio, profile_pic, native_language, \
     learning_language, location, is_onboarded, reset_token_hash, reset_expires_at, created_at, updated_at";

/// Column list for a public profile read from table alias `alias`.
pub(crate) fn profile_columns(alias: &str) -> String {
    format!(
        "{a}.id, {a}.full_name, {a}.profile_pic, {a}.bio, {a}.native_language, {a}.learning_language, {a}.location",
        a = alias
    )
}

/// Reads the seven columns produced by [`profile_columns`] starting at `offset`.
pub(crate) fn profile_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        id: row.get(offset)?,
        full_name: row.get(offset + 1)?,
        profile_pic: row.get(offset + 2)?,
        bio: row.get(offset + 3)?,
        native_language: row.get(offset + 4)?,
        learning_language: row.get(offset + 5)?,
        location: row.get(offset + 6)?,
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<AccountRow> {
    Ok(AccountRow {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        full_name: row.get(3)?,
        bio: row.get(4)?,
        profile_pic: row.get(5)?,
        native_language: row.get(6)?,
        learning_language: row.get(7)?,
        location: row.get(8)?,
        is_onboarded: row.get(9)?,
        reset_token_hash: row.get(10)?,
        reset_expires_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl Database {
    // -- Accounts --

    /// Fails with a constraint violation (see [`crate::is_unique_violation`])
    /// when the email is already registered.
    pub fn create_account(&self, account: &NewAccount<'_>) -> Result<()> {
        let now = format_ts(Utc::now());
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO accounts (id, email, password_hash, full_name, profile_pic, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![
                    account.id,
                    account.email,
                    account.password_hash,
                    account.full_name,
                    account.profile_pic,
                    now
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_account_by_id(&self, id: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "id", id))
    }

    pub fn get_account_by_email(&self, email: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "email", email))
    }

    pub fn account_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM accounts WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn friend_ids(&self, id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT friend_id FROM friendships WHERE account_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    pub fn sticker_ids(&self, id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT pack_id FROM sticker_claims WHERE account_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    /// Applies onboarding fields and marks the account onboarded.
    /// Returns false when the account does not exist.
    pub fn update_profile(&self, id: &str, update: &ProfileUpdate<'_>) -> Result<bool> {
        let now = format_ts(Utc::now());
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE accounts SET full_name = ?2, bio = ?3, native_language = ?4,
                    learning_language = ?5, location = ?6,
                    profile_pic = COALESCE(?7, profile_pic),
                    is_onboarded = 1, updated_at = ?8
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    update.full_name,
                    update.bio,
                    update.native_language,
                    update.learning_language,
                    update.location,
                    update.profile_pic,
                    now
                ],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Password reset --

    /// Replaces any previous reset token; only one is active at a time.
    pub fn set_reset_token(&self, id: &str, token_hash: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE accounts SET reset_token_hash = ?2, reset_expires_at = ?3 WHERE id = ?1",
                rusqlite::params![id, token_hash, format_ts(expires_at)],
            )?;
            Ok(())
        })
    }

    pub fn clear_reset_token(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE accounts SET reset_token_hash = NULL, reset_expires_at = NULL WHERE id = ?1",
                [id],
            )?;
            Ok(())
        })
    }

    pub fn get_account_by_reset_hash(&self, token_hash: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "reset_token_hash", token_hash))
    }

    /// Sets a new password and clears the reset token in one statement, but
    /// only while the token is still stored and unexpired. Returns false when
    /// the token was already consumed, replaced or expired.
    pub fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        new_password_hash: &str,
    ) -> Result<bool> {
        let now = format_ts(now);
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE accounts SET password_hash = ?3, reset_token_hash = NULL,
                    reset_expires_at = NULL, updated_at = ?2
                 WHERE reset_token_hash = ?1 AND reset_expires_at > ?2",
                rusqlite::params![token_hash, now, new_password_hash],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Stickers --

    /// Idempotent: claiming an owned pack is a no-op.
    pub fn add_sticker(&self, id: &str, pack_id: &str) -> Result<()> {
        let now = format_ts(Utc::now());
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO sticker_claims (account_id, pack_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, pack_id, now],
            )?;
            Ok(())
        })
    }

    pub fn remove_sticker(&self, id: &str, pack_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM sticker_claims WHERE account_id = ?1 AND pack_id = ?2",
                rusqlite::params![id, pack_id],
            )?;
            Ok(())
        })
    }
}

fn query_account(conn: &Connection, column: &str, value: &str) -> Result<Option<AccountRow>> {
    let sql = format!("SELECT {} FROM accounts WHERE {} = ?1", ACCOUNT_COLUMNS, column);
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], account_from_row).optional()
}

use anyhow::Result;
use chrono::Utc;

use crate::models::CallRatingRow;
use crate::{Database, format_ts};

impl Database {
    // -- Call ratings --

    /// Append-only; a rater may rate the same call more than once.
    pub fn insert_call_rating(
        &self,
        id: &str,
        call_id: &str,
        rater_id: &str,
        rated_user_id: &str,
        rating: u8,
        call_type: &str,
    ) -> Result<CallRatingRow> {
        let now = format_ts(Utc::now());
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO call_ratings (id, call_id, rater_id, rated_user_id, rating, call_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, call_id, rater_id, rated_user_id, rating, call_type, now],
            )?;
            Ok(CallRatingRow {
                id: id.to_string(),
                call_id: call_id.to_string(),
                rater_id: rater_id.to_string(),
                rated_user_id: rated_user_id.to_string(),
                rating,
                call_type: call_type.to_string(),
                created_at: now,
            })
        })
    }

    /// (average, count) over every rating received by `rated_user_id`.
    pub fn rating_summary(&self, rated_user_id: &str) -> Result<(f64, u32)> {
        self.with_conn(|conn| {
            let (avg, count): (Option<f64>, i64) = conn.query_row(
                "SELECT AVG(rating), COUNT(*) FROM call_ratings WHERE rated_user_id = ?1",
                [rated_user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok((avg.unwrap_or(0.0), count as u32))
        })
    }
}

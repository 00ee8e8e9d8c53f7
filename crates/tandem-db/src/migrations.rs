use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (accounts, social graph, message mirror)");
        conn.execute_batch(
            "
            CREATE TABLE accounts (
                id                  TEXT PRIMARY KEY,
                email               TEXT NOT NULL UNIQUE,
                password_hash       TEXT,
                full_name           TEXT NOT NULL,
                bio                 TEXT NOT NULL DEFAULT '',
                profile_pic         TEXT NOT NULL DEFAULT '',
                native_language     TEXT NOT NULL DEFAULT '',
                learning_language   TEXT NOT NULL DEFAULT '',
                location            TEXT NOT NULL DEFAULT '',
                is_onboarded        INTEGER NOT NULL DEFAULT 0,
                reset_token_hash    TEXT,
                reset_expires_at    TEXT,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE INDEX idx_accounts_reset ON accounts(reset_token_hash);

            CREATE TABLE friendships (
                account_id  TEXT NOT NULL REFERENCES accounts(id),
                friend_id   TEXT NOT NULL REFERENCES accounts(id),
                created_at  TEXT NOT NULL,
                PRIMARY KEY (account_id, friend_id)
            );

            CREATE TABLE friend_requests (
                id              TEXT PRIMARY KEY,
                sender_id       TEXT NOT NULL REFERENCES accounts(id),
                recipient_id    TEXT NOT NULL REFERENCES accounts(id),
                pair_low        TEXT NOT NULL,
                pair_high       TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'pending',
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                UNIQUE(pair_low, pair_high)
            );

            CREATE INDEX idx_friend_requests_recipient ON friend_requests(recipient_id, status);
            CREATE INDEX idx_friend_requests_sender ON friend_requests(sender_id, status);

            CREATE TABLE sticker_claims (
                account_id  TEXT NOT NULL REFERENCES accounts(id),
                pack_id     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (account_id, pack_id)
            );

            CREATE TABLE conversations (
                id                  TEXT PRIMARY KEY,
                participant_low     TEXT NOT NULL REFERENCES accounts(id),
                participant_high    TEXT NOT NULL REFERENCES accounts(id),
                last_message        TEXT NOT NULL DEFAULT '',
                last_message_type   TEXT NOT NULL DEFAULT 'text',
                last_message_at     TEXT NOT NULL,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL,
                UNIQUE(participant_low, participant_high)
            );

            CREATE INDEX idx_conversations_high ON conversations(participant_high);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL REFERENCES accounts(id),
                receiver_id     TEXT NOT NULL REFERENCES accounts(id),
                content         TEXT NOT NULL DEFAULT '',
                message_type    TEXT NOT NULL DEFAULT 'text',
                stream_msg_id   TEXT UNIQUE,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);

            CREATE TABLE call_ratings (
                id              TEXT PRIMARY KEY,
                call_id         TEXT NOT NULL,
                rater_id        TEXT NOT NULL REFERENCES accounts(id),
                rated_user_id   TEXT NOT NULL REFERENCES accounts(id),
                rating          INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                call_type       TEXT NOT NULL DEFAULT 'video',
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_call_ratings_rated ON call_ratings(rated_user_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

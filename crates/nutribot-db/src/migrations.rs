use nutribot_common::{Error, Result};
use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    telegram_user_id TEXT UNIQUE,
    web_user_id TEXT UNIQUE,
    username TEXT,
    first_name TEXT,
    email TEXT,
    email_verified_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_chat_id TEXT NOT NULL UNIQUE,
    owner_user_id INTEGER REFERENCES users(id),
    kind TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_active_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chats_owner ON chats(owner_user_id);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL REFERENCES chats(id),
    role TEXT NOT NULL,
    content_type TEXT NOT NULL,
    text TEXT,
    origin_message_id INTEGER,
    sender_user_id INTEGER REFERENCES users(id),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_chat
    ON messages(chat_id, created_at, id);
CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_user_id);

CREATE TABLE IF NOT EXISTS spreadsheet_configs (
    user_id INTEGER PRIMARY KEY REFERENCES users(id),
    access_token TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    spreadsheet_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS nutrition_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    calories REAL NOT NULL,
    proteins REAL NOT NULL,
    carbs REAL NOT NULL,
    fats REAL NOT NULL,
    meal_type TEXT NOT NULL,
    extra_details TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nutrition_user_created
    ON nutrition_records(user_id, created_at);

CREATE TABLE IF NOT EXISTS linking_codes (
    code TEXT PRIMARY KEY,
    web_user_id TEXT NOT NULL,
    email TEXT,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    used INTEGER NOT NULL DEFAULT 0,
    used_at TEXT,
    claimed_by_user_id INTEGER
);

CREATE INDEX IF NOT EXISTS idx_linking_codes_web_user
    ON linking_codes(web_user_id, used, expires_at);
";

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .map_err(|e| Error::Persistence(format!("migration failed: {e}")))
}

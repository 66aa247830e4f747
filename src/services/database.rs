use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

use crate::config::{APP_NAME, ENV_DB_PATH};
use crate::models::{
    Conversation, ConversationKind, Identity, Message, MessageType, Participant, ReadStatus,
};

/// Local cache of canonical conversations, messages and settings.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| anyhow!("Database connection lock poisoned"))
}

impl Database {
    pub async fn open() -> Result<Self> {
        let path = Self::db_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory: {}", parent.display())
            })?;
        }

        let conn = task::spawn_blocking(move || {
            let conn = Connection::open(&path)
                .with_context(|| format!("Failed to open database at {}", path.display()))?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            Ok::<_, anyhow::Error>(conn)
        })
        .await??;

        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn db_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(ENV_DB_PATH) {
            return Ok(PathBuf::from(path));
        }
        let data_dir = match std::env::var("XDG_DATA_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let home = std::env::var("HOME").context("Neither XDG_DATA_HOME nor HOME is set")?;
                PathBuf::from(home).join(".local/share")
            }
        };
        Ok(data_dir.join(APP_NAME).join(format!("{}.db", APP_NAME)))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = lock(&self.conn)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            );",
        )?;

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE conversations (
                    id TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    participants TEXT NOT NULL,
                    name TEXT NOT NULL,
                    avatar TEXT,
                    last_message TEXT,
                    timestamp TEXT NOT NULL,
                    unread_count INTEGER NOT NULL DEFAULT 0,
                    is_archived INTEGER NOT NULL DEFAULT 0,
                    position INTEGER NOT NULL
                );

                CREATE TABLE messages (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL,
                    sender_id TEXT NOT NULL,
                    text TEXT NOT NULL,
                    media TEXT NOT NULL DEFAULT '[]',
                    timestamp TEXT NOT NULL,
                    is_sent INTEGER NOT NULL,
                    message_type TEXT NOT NULL,
                    read_status TEXT
                );

                CREATE INDEX idx_messages_conversation ON messages(conversation_id, timestamp);

                CREATE TABLE settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                INSERT INTO schema_version (version) VALUES (1);",
            )?;
        }

        Ok(())
    }

    // --- Conversations ---

    /// Replace the cached conversation list. Pending records are skipped;
    /// they only exist for the lifetime of a session.
    pub async fn save_conversations(&self, conversations: &[Conversation]) -> Result<()> {
        let conn = self.conn.clone();
        let conversations: Vec<Conversation> = conversations
            .iter()
            .filter(|c| !c.is_pending())
            .cloned()
            .collect();
        task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM conversations", [])?;
            for (position, conv) in conversations.iter().enumerate() {
                tx.execute(
                    "INSERT INTO conversations (id, kind, participants, name, avatar, last_message, timestamp, unread_count, is_archived, position)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        conv.id(),
                        conv.kind.as_str(),
                        serde_json::to_string(&conv.participants)?,
                        conv.name,
                        conv.avatar,
                        conv.last_message,
                        conv.timestamp.to_rfc3339(),
                        conv.unread_count,
                        conv.is_archived as i32,
                        position as i64,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    pub async fn load_conversations(&self) -> Result<Vec<Conversation>> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, kind, participants, name, avatar, last_message, timestamp, unread_count, is_archived
                 FROM conversations ORDER BY position ASC",
            )?;
            let conversations = stmt
                .query_map([], |row| Ok(Self::row_to_conversation(row)))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(conversations)
        })
        .await?
    }

    // --- Messages ---

    pub async fn insert_message(&self, message: &Message) -> Result<()> {
        let conn = self.conn.clone();
        let msg = message.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, text, media, timestamp, is_sent, message_type, read_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET read_status = ?9",
                params![
                    msg.id,
                    msg.conversation_id,
                    msg.sender_id,
                    msg.text,
                    serde_json::to_string(&msg.media)?,
                    msg.timestamp.to_rfc3339(),
                    msg.is_sent as i32,
                    msg.message_type.as_str(),
                    msg.read_status.map(|s| s.as_str()),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, text, media, timestamp, is_sent, message_type, read_status
                 FROM messages WHERE conversation_id = ?1 ORDER BY timestamp ASC",
            )?;
            let messages = stmt
                .query_map(params![conversation_id], |row| Ok(Self::row_to_message(row)))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await?
    }

    /// Re-file cached messages after a pending conversation was reconciled.
    pub async fn reassign_messages(&self, from: &str, to: &str) -> Result<usize> {
        let conn = self.conn.clone();
        let from = from.to_string();
        let to = to.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let changed = conn.execute(
                "UPDATE messages SET conversation_id = ?1 WHERE conversation_id = ?2",
                params![to, from],
            )?;
            Ok(changed)
        })
        .await?
    }

    // --- Settings ---

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.clone();
        let key = key.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let result: Option<String> = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(result)
        })
        .await?
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            Ok(())
        })
        .await?
    }

    // --- Row helpers ---

    fn row_to_conversation(row: &rusqlite::Row) -> Result<Conversation> {
        let kind_str: String = row.get(1)?;
        let participants_json: String = row.get(2)?;
        let timestamp_str: String = row.get(6)?;
        let is_archived_int: i32 = row.get(8)?;
        let participants: Vec<Participant> = serde_json::from_str(&participants_json)?;

        Ok(Conversation {
            identity: Identity::Canonical { id: row.get(0)? },
            kind: ConversationKind::from_str(&kind_str)
                .ok_or_else(|| anyhow!("Unknown conversation kind: {}", kind_str))?,
            participants,
            name: row.get(3)?,
            avatar: row.get(4)?,
            last_message: row.get(5)?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp_str)?.with_timezone(&Utc),
            unread_count: row.get(7)?,
            is_archived: is_archived_int != 0,
        })
    }

    fn row_to_message(row: &rusqlite::Row) -> Result<Message> {
        let media_json: String = row.get(4)?;
        let timestamp_str: String = row.get(5)?;
        let is_sent_int: i32 = row.get(6)?;
        let type_str: String = row.get(7)?;
        let status_str: Option<String> = row.get(8)?;

        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            sender_id: row.get(2)?,
            text: row.get(3)?,
            media: serde_json::from_str(&media_json)?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp_str)?.with_timezone(&Utc),
            is_sent: is_sent_int != 0,
            message_type: MessageType::from_str(&type_str)
                .ok_or_else(|| anyhow!("Unknown message type: {}", type_str))?,
            read_status: status_str.as_deref().and_then(ReadStatus::from_str),
        })
    }
}

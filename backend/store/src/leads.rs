use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadflow_core::{
    ConversationMessage, Direction, Lead, LeadStore, LeadflowError, NewConversation, Result,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::store_err;

const LEAD_COLUMNS: &str =
    "id, name, phone, email, last_contact_at, status, sheet_row, metadata";

/// Lead fields `update_lead` writes to their own column; anything else is
/// merged into the metadata bag.
const COLUMN_FIELDS: [&str; 6] = ["name", "phone", "email", "status", "last_contact_at", "sheet_row"];

pub struct SqliteLeadStore {
    conn: Arc<Mutex<Connection>>,
}

fn parse_time(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn lead_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lead> {
    let metadata: String = row.get(7)?;
    Ok(Lead {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        email: row.get(3)?,
        last_contact_at: parse_time(row.get(4)?),
        status: row.get(5)?,
        sheet_row: row.get(6)?,
        metadata: serde_json::from_str::<HashMap<String, Value>>(&metadata).unwrap_or_default(),
    })
}

impl SqliteLeadStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Insert or replace a lead (imports and tests).
    pub async fn upsert_lead(&self, lead: &Lead) -> Result<()> {
        let metadata = serde_json::to_string(&lead.metadata).map_err(store_err)?;
        self.conn
            .lock()
            .await
            .execute(
                "INSERT INTO leads (id, name, phone, email, last_contact_at, status, sheet_row, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    name = ?2, phone = ?3, email = ?4, last_contact_at = ?5,
                    status = ?6, sheet_row = ?7, metadata = ?8",
                params![
                    lead.id,
                    lead.name,
                    lead.phone,
                    lead.email,
                    lead.last_contact_at.map(|t| t.to_rfc3339()),
                    lead.status,
                    lead.sheet_row,
                    metadata,
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub async fn get_lead(&self, lead_id: &str) -> Result<Option<Lead>> {
        self.conn
            .lock()
            .await
            .query_row(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
                params![lead_id],
                lead_from_row,
            )
            .optional()
            .map_err(store_err)
    }
}

#[async_trait]
impl LeadStore for SqliteLeadStore {
    async fn fetch_active_leads(&self) -> Result<Vec<Lead>> {
        let conn = self.conn.lock().await;
        let leads = (|| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LEAD_COLUMNS} FROM leads
                 WHERE lower(status) NOT IN ('closed', 'won', 'lost', 'unsubscribed', 'do_not_contact')
                 ORDER BY id"
            ))?;
            let rows = stmt.query_map([], lead_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })();
        leads.map_err(|e| LeadflowError::LeadSource(e.to_string()))
    }

    async fn fetch_recent_conversations(
        &self,
        lead_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT lead_id, direction, body, created_at FROM conversations
                 WHERE lead_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![lead_id, limit as i64], |row| {
                let direction: String = row.get(1)?;
                let created_at: String = row.get(3)?;
                Ok((row.get::<_, String>(0)?, direction, row.get::<_, String>(2)?, created_at))
            })
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .filter_map(|(lead_id, direction, body, created_at)| {
                Some(ConversationMessage {
                    lead_id,
                    direction: match direction.as_str() {
                        "inbound" => Direction::Inbound,
                        _ => Direction::Outbound,
                    },
                    body,
                    timestamp: parse_time(Some(created_at))?,
                })
            })
            .collect())
    }

    async fn update_lead(&self, lead_id: &str, fields: &Map<String, Value>) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(store_err)?;

        let metadata: Option<String> = tx
            .query_row(
                "SELECT metadata FROM leads WHERE id = ?1",
                params![lead_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)?;
        let Some(metadata) = metadata else {
            return Err(LeadflowError::Store(format!("unknown lead {lead_id}")));
        };
        let mut metadata: Map<String, Value> = serde_json::from_str(&metadata).unwrap_or_default();

        for (key, value) in fields {
            if COLUMN_FIELDS.contains(&key.as_str()) {
                let value: rusqlite::types::Value = match value {
                    Value::Null => rusqlite::types::Value::Null,
                    Value::Number(n) => n
                        .as_i64()
                        .map(rusqlite::types::Value::Integer)
                        .unwrap_or_else(|| rusqlite::types::Value::Text(n.to_string())),
                    Value::String(s) => rusqlite::types::Value::Text(s.clone()),
                    other => rusqlite::types::Value::Text(other.to_string()),
                };
                tx.execute(
                    &format!("UPDATE leads SET {key} = ?1 WHERE id = ?2"),
                    params![value, lead_id],
                )
                .map_err(store_err)?;
            } else {
                metadata.insert(key.clone(), value.clone());
            }
        }

        let metadata = serde_json::to_string(&metadata).map_err(store_err)?;
        tx.execute(
            "UPDATE leads SET metadata = ?1 WHERE id = ?2",
            params![metadata, lead_id],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)
    }

    async fn insert_conversation(&self, conversation: &NewConversation) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute(
                "INSERT INTO conversations (lead_id, direction, body, status, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    conversation.lead_id,
                    conversation.direction.to_string(),
                    conversation.body,
                    conversation.status,
                    conversation.metadata.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    async fn mark_followup_sent(&self, lead_id: &str, idempotency_key: &str) -> Result<()> {
        let updated = self
            .conn
            .lock()
            .await
            .execute(
                "UPDATE leads SET
                    last_contact_at = ?1,
                    last_followup_key = ?2,
                    followup_count = followup_count + 1,
                    status = CASE WHEN status = 'new' THEN 'contacted' ELSE status END
                 WHERE id = ?3",
                params![Utc::now().to_rfc3339(), idempotency_key, lead_id],
            )
            .map_err(store_err)?;
        if updated == 0 {
            return Err(LeadflowError::Store(format!("unknown lead {lead_id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteLeadStore;
    use crate::Database;
    use leadflow_core::{Direction, Lead, LeadStore, LeadflowError, NewConversation};
    use rusqlite::params;
    use serde_json::json;

    fn lead(id: &str, status: &str) -> Lead {
        let mut lead = Lead::new(id);
        lead.phone = Some("+12125550100".into());
        lead.status = status.into();
        lead.metadata.insert("source".into(), json!("referral"));
        lead
    }

    #[tokio::test]
    async fn active_leads_exclude_closed() {
        let store = Database::in_memory().unwrap().lead_store();
        store.upsert_lead(&lead("L1", "new")).await.unwrap();
        store.upsert_lead(&lead("L2", "Closed")).await.unwrap();

        let leads = store.fetch_active_leads().await.unwrap();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].id, "L1");
        assert_eq!(leads[0].meta_str("source").as_deref(), Some("referral"));
    }

    #[tokio::test]
    async fn conversations_newest_first_with_limit() {
        let store = Database::in_memory().unwrap().lead_store();
        store.upsert_lead(&lead("L1", "new")).await.unwrap();
        for (i, direction) in [Direction::Outbound, Direction::Inbound, Direction::Outbound]
            .into_iter()
            .enumerate()
        {
            store
                .insert_conversation(&NewConversation {
                    lead_id: "L1".into(),
                    direction,
                    body: format!("m{i}"),
                    status: "sent".into(),
                    metadata: json!({}),
                })
                .await
                .unwrap();
        }

        let history = store.fetch_recent_conversations("L1", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].body, "m2");
        assert_eq!(history[1].direction, Direction::Inbound);
    }

    async fn followup_state(store: &SqliteLeadStore, lead_id: &str) -> (u32, Option<String>) {
        store
            .conn
            .lock()
            .await
            .query_row(
                "SELECT followup_count, last_followup_key FROM leads WHERE id = ?1",
                params![lead_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn mark_sent_records_contact() {
        let store = Database::in_memory().unwrap().lead_store();
        store.upsert_lead(&lead("L1", "new")).await.unwrap();
        store.mark_followup_sent("L1", "L1:2026-10-19").await.unwrap();

        let saved = store.get_lead("L1").await.unwrap().unwrap();
        assert!(saved.last_contact_at.is_some());
        assert_eq!(saved.status, "contacted");
        assert_eq!(
            followup_state(&store, "L1").await,
            (1, Some("L1:2026-10-19".to_string()))
        );

        let err = store.mark_followup_sent("nope", "k").await.unwrap_err();
        assert!(matches!(err, LeadflowError::Store(_)));
    }

    #[tokio::test]
    async fn update_splits_columns_and_metadata() {
        let store = Database::in_memory().unwrap().lead_store();
        store.upsert_lead(&lead("L1", "new")).await.unwrap();

        let fields = json!({ "status": "qualified", "sheet_row": 7, "classification": "hot" });
        store
            .update_lead("L1", fields.as_object().unwrap())
            .await
            .unwrap();

        let saved = store.get_lead("L1").await.unwrap().unwrap();
        assert_eq!(saved.status, "qualified");
        assert_eq!(saved.sheet_row, Some(7));
        assert_eq!(saved.meta_str("classification").as_deref(), Some("hot"));
        assert_eq!(saved.meta_str("source").as_deref(), Some("referral"));
    }
}

//! Participant profile lookup. Account signup/login belongs to the auth
//! collaborator; the engine only reads trust scores and coordinates.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::PgPool;

use crate::models::Participant;

const PARTICIPANT_COLUMNS: &str =
    "id, username, trust_score, latitude, longitude, created_at";

#[derive(Clone)]
pub struct ParticipantDirectory {
    db: PgPool,
}

impl ParticipantDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn find(&self, id: i64) -> Result<Option<Participant>> {
        let participant = sqlx::query_as::<_, Participant>(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(participant)
    }

    pub async fn find_many(&self, ids: &[i64]) -> Result<HashMap<i64, Participant>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, Participant>(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(|p| (p.id, p)).collect())
    }
}

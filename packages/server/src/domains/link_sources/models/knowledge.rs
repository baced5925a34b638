use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::types::Json;
use sqlx::PgPool;

use super::link_source::LinkSource;
use crate::common::{AiAgentId, KnowledgeId, LinkSourceId, OrganizationId, WebsiteId};
use crate::kernel::ProviderPage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "knowledge_origin", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeOrigin {
    Crawl,
    Reindex,
}

/// Stored page content plus metadata derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePayload {
    pub markdown: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content_hash: String,
    pub word_count: usize,
}

impl KnowledgePayload {
    pub fn from_page(page: &ProviderPage) -> Self {
        let hash = Sha256::digest(page.markdown.as_bytes());

        Self {
            markdown: page.markdown.clone(),
            title: page.title.clone(),
            description: page.description.clone(),
            content_hash: hex::encode(hash),
            word_count: page.markdown.split_whitespace().count(),
        }
    }
}

/// Knowledge - one persisted crawled page
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Knowledge {
    pub id: KnowledgeId,
    pub link_source_id: LinkSourceId,
    pub organization_id: OrganizationId,
    pub website_id: WebsiteId,
    pub ai_agent_id: Option<AiAgentId>,
    pub source_url: String,
    pub source_title: Option<String>,
    pub payload: Json<KnowledgePayload>,
    pub size_bytes: i64,
    pub origin: KnowledgeOrigin,
    pub is_included: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Knowledge {
    /// Insert the page, or replace the live row for the same source and URL.
    pub async fn upsert_for_crawl(
        source: &LinkSource,
        page: &ProviderPage,
        origin: KnowledgeOrigin,
        pool: &PgPool,
    ) -> Result<Self> {
        let payload = KnowledgePayload::from_page(page);

        let knowledge = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO knowledge (
                id, link_source_id, organization_id, website_id, ai_agent_id,
                source_url, source_title, payload, size_bytes, origin
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (link_source_id, source_url) WHERE deleted_at IS NULL
            DO UPDATE SET
                source_title = EXCLUDED.source_title,
                payload = EXCLUDED.payload,
                size_bytes = EXCLUDED.size_bytes,
                origin = EXCLUDED.origin,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(KnowledgeId::new())
        .bind(source.id)
        .bind(source.organization_id)
        .bind(source.website_id)
        .bind(source.ai_agent_id)
        .bind(&page.url)
        .bind(&page.title)
        .bind(Json(&payload))
        .bind(page.size_bytes)
        .bind(origin)
        .fetch_one(pool)
        .await?;

        Ok(knowledge)
    }

    pub async fn find_by_id(id: KnowledgeId, pool: &PgPool) -> Result<Option<Self>> {
        let knowledge = sqlx::query_as::<_, Self>(
            "SELECT * FROM knowledge WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(knowledge)
    }

    pub async fn find_active_by_url(
        link_source_id: LinkSourceId,
        url: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let knowledge = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM knowledge
            WHERE link_source_id = $1 AND source_url = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(link_source_id)
        .bind(url)
        .fetch_optional(pool)
        .await?;

        Ok(knowledge)
    }

    pub async fn find_active_for_link_source(
        link_source_id: LinkSourceId,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM knowledge
            WHERE link_source_id = $1 AND deleted_at IS NULL
            ORDER BY created_at, id
            "#,
        )
        .bind(link_source_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    pub async fn find_active_for_sources(
        link_source_ids: &[LinkSourceId],
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM knowledge
            WHERE link_source_id = ANY($1) AND deleted_at IS NULL
            ORDER BY created_at, id
            "#,
        )
        .bind(link_source_ids)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Every row for a source, soft-deleted ones included (audit view)
    pub async fn find_all_for_link_source(
        link_source_id: LinkSourceId,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(
            "SELECT * FROM knowledge WHERE link_source_id = $1 ORDER BY created_at, id",
        )
        .bind(link_source_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Soft delete every live page of a source. Returns the number of rows touched.
    pub async fn soft_delete_for_link_source(
        link_source_id: LinkSourceId,
        pool: &PgPool,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE knowledge
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE link_source_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(link_source_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Soft delete the live page for a URL, returning it if there was one.
    pub async fn soft_delete_by_url(
        link_source_id: LinkSourceId,
        url: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let knowledge = sqlx::query_as::<_, Self>(
            r#"
            UPDATE knowledge
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE link_source_id = $1 AND source_url = $2 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(link_source_id)
        .bind(url)
        .fetch_optional(pool)
        .await?;

        Ok(knowledge)
    }

    pub async fn set_included(
        id: KnowledgeId,
        organization_id: OrganizationId,
        is_included: bool,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let knowledge = sqlx::query_as::<_, Self>(
            r#"
            UPDATE knowledge
            SET is_included = $3, updated_at = NOW()
            WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(is_included)
        .fetch_optional(pool)
        .await?;

        Ok(knowledge)
    }
}

//! Enqueue and status-poll endpoints

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::processing::QueueStats;
use crate::types::KnowledgeBaseItem;

use super::state::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/items/:id", get(get_item_status))
        .route("/items/:id/children", get(get_item_children))
        .route("/items/:id/process", post(process_item))
        .route("/items/:id/keywords", post(extract_keywords))
        .route("/queue", get(queue_stats))
}

/// Response from job submission
#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub item_id: Uuid,
    pub queued: bool,
    pub message: String,
}

/// POST /api/items/:id/process - enqueue ingestion for an item
async fn process_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> Result<Json<EnqueueResponse>> {
    // Reject unknown ids here; everything else is reported through status
    state.store().get_item(item_id).await?;
    state.queue().enqueue_process_item(item_id).await?;

    Ok(Json(EnqueueResponse {
        item_id,
        queued: true,
        message: format!("Item queued. Poll /api/items/{} for status.", item_id),
    }))
}

/// POST /api/items/:id/keywords - enqueue keyword extraction for an item
async fn extract_keywords(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> Result<Json<EnqueueResponse>> {
    state.store().get_item(item_id).await?;
    state
        .store()
        .update_keyword_status(item_id, crate::types::KeywordStatus::Pending)
        .await?;
    state.queue().enqueue_extract_keywords(item_id).await?;

    Ok(Json(EnqueueResponse {
        item_id,
        queued: true,
        message: format!("Keyword extraction queued for item {}.", item_id),
    }))
}

/// Item status as the dashboard polls it
#[derive(Debug, Serialize)]
pub struct ItemStatusResponse {
    pub id: Uuid,
    pub knowledge_base_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub kind: String,
    pub status: String,
    pub error: Option<String>,
    pub chunk_count: usize,
    pub keyword_status: Option<String>,
    pub keywords: Vec<String>,
    pub created_at: String,
    pub last_synced_at: Option<String>,
}

impl ItemStatusResponse {
    fn from_item(item: KnowledgeBaseItem, chunk_count: usize) -> Self {
        Self {
            id: item.id,
            knowledge_base_id: item.knowledge_base_id,
            parent_id: item.parent_id,
            kind: item.kind.as_str().to_string(),
            status: item.status.as_str().to_string(),
            error: item.last_error,
            chunk_count,
            keyword_status: item.keyword_status.map(|s| s.as_str().to_string()),
            keywords: item.keywords,
            created_at: item.created_at.to_rfc3339(),
            last_synced_at: item.last_synced_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// GET /api/items/:id - poll item status
async fn get_item_status(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> Result<Json<ItemStatusResponse>> {
    let item = state.store().get_item(item_id).await?;
    let chunk_count = state.store().count_chunks(item_id).await?;
    Ok(Json(ItemStatusResponse::from_item(item, chunk_count)))
}

#[derive(Debug, Serialize)]
pub struct ChildrenResponse {
    pub parent_id: Uuid,
    pub total: usize,
    pub indexed: usize,
    pub failed: usize,
    pub children: Vec<ChildSummary>,
}

#[derive(Debug, Serialize)]
pub struct ChildSummary {
    pub id: Uuid,
    pub status: String,
    pub error: Option<String>,
}

/// GET /api/items/:id/children - feed children and their outcomes
async fn get_item_children(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> Result<Json<ChildrenResponse>> {
    state.store().get_item(item_id).await?;
    let children = state.store().list_children(item_id).await?;

    let indexed = children
        .iter()
        .filter(|c| c.status == crate::types::ItemStatus::Indexed)
        .count();
    let failed = children
        .iter()
        .filter(|c| c.status == crate::types::ItemStatus::Failed)
        .count();

    Ok(Json(ChildrenResponse {
        parent_id: item_id,
        total: children.len(),
        indexed,
        failed,
        children: children
            .into_iter()
            .map(|c| ChildSummary {
                id: c.id,
                status: c.status.as_str().to_string(),
                error: c.last_error,
            })
            .collect(),
    }))
}

/// GET /api/queue - queue statistics
async fn queue_stats(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.queue().stats())
}

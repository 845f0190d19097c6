//! Keyword extraction task
//!
//! Runs independently of ingestion, after an item's chunks exist, with its
//! own status machine (`null → pending → processing → {completed, failed}`)
//! and its own task-level retry budget.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::LlmProvider;
use crate::store::ItemStore;
use crate::types::{KeywordStatus, SourcePayload};

/// Most content characters sent to the LLM in one extraction call
const MAX_PROMPT_CHARS: usize = 20_000;
/// Longest wait between task-level attempts
const TASK_BACKOFF_CAP: Duration = Duration::from_secs(60);

const KEYWORD_SYSTEM_PROMPT: &str = "\
You extract domain-specific keywords from knowledge-base content for a \
voice agent. Return ONLY a JSON array of strings, nothing else. Each entry \
must be a single word. Include uncommon proper nouns, product names, brand \
names, and specialized terms a caller might say. Exclude ordinary \
dictionary words, generic acronyms, and well-known place names.";

/// Derives domain keywords from an item's stored content via an LLM
pub struct KeywordExtractor {
    store: Arc<dyn ItemStore>,
    llm: Arc<dyn LlmProvider>,
    max_attempts: u32,
}

impl KeywordExtractor {
    pub fn new(store: Arc<dyn ItemStore>, llm: Arc<dyn LlmProvider>, max_attempts: u32) -> Self {
        Self {
            store,
            llm,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run the task for one item
    ///
    /// Empty content completes with an empty keyword list rather than
    /// failing. The item is marked `failed` only when the final attempt is
    /// spent, never during intermediate backoff.
    pub async fn run(&self, item_id: Uuid) -> Result<Vec<String>> {
        let item = self.store.get_item(item_id).await?;
        self.store
            .update_keyword_status(item_id, KeywordStatus::Processing)
            .await?;

        let mut content = self.store.chunk_contents(item_id).await?.join("\n\n");
        if content.trim().is_empty() {
            // Fall back to literal text stored directly on the item
            if let SourcePayload::Text { text } = &item.source {
                content = text.clone();
            }
        }
        if content.trim().is_empty() {
            tracing::info!("Item {} has no content, completing with no keywords", item_id);
            self.store.store_keywords(item_id, &[]).await?;
            return Ok(Vec::new());
        }

        let excerpt: String = content.chars().take(MAX_PROMPT_CHARS).collect();
        let user_prompt = format!("Extract keywords from the following content:\n\n{}", excerpt);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(&user_prompt).await {
                Ok(keywords) => {
                    self.store.store_keywords(item_id, &keywords).await?;
                    tracing::info!(
                        "Item {}: extracted {} keywords (attempt {})",
                        item_id,
                        keywords.len(),
                        attempt
                    );
                    return Ok(keywords);
                }
                Err(err) => {
                    if attempt >= self.max_attempts {
                        self.store
                            .update_keyword_status(item_id, KeywordStatus::Failed)
                            .await?;
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    let delay = task_backoff(attempt);
                    tracing::warn!(
                        "Item {}: keyword attempt {}/{} failed ({}), retrying in {:.1}s",
                        item_id,
                        attempt,
                        self.max_attempts,
                        err,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(&self, user_prompt: &str) -> Result<Vec<String>> {
        let raw = self.llm.complete(KEYWORD_SYSTEM_PROMPT, user_prompt).await?;
        parse_keyword_response(&raw)
    }
}

/// Backoff between task-level attempts, distinct from the in-call policy
fn task_backoff(attempt: u32) -> Duration {
    let base = Duration::from_secs(1u64 << attempt.min(10));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=1000));
    (base + jitter).min(TASK_BACKOFF_CAP)
}

/// Parse the LLM's keyword response defensively
///
/// Strips markdown code fences when present, expects a JSON array of
/// strings, trims entries, drops empties, and deduplicates
/// case-sensitively while preserving order.
pub fn parse_keyword_response(raw: &str) -> Result<Vec<String>> {
    static FENCE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        regex::Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fence pattern is valid")
    });

    let trimmed = raw.trim();
    let body = fence
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    let entries: Vec<String> = serde_json::from_str(body)
        .map_err(|e| Error::permanent(format!("keyword response was not a JSON array: {}", e)))?;

    let mut seen = HashSet::new();
    Ok(entries
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::store::SqliteStore;
    use crate::types::KnowledgeBaseItem;

    use super::*;

    struct ScriptedLlm {
        responses: Vec<std::result::Result<String, ()>>,
        calls: AtomicU32,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<std::result::Result<String, ()>>) -> Self {
            Self {
                responses,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.responses.get(call.min(self.responses.len() - 1)) {
                Some(Ok(text)) => Ok(text.clone()),
                _ => Err(Error::transient("llm unavailable")),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    #[test]
    fn parses_plain_json_array() {
        let keywords = parse_keyword_response(r#"["Voxdesk", "Brightwater"]"#).unwrap();
        assert_eq!(keywords, vec!["Voxdesk", "Brightwater"]);
    }

    #[test]
    fn strips_code_fences() {
        let raw = "```json\n[\"Voxdesk\", \"Keelhaven\"]\n```";
        assert_eq!(
            parse_keyword_response(raw).unwrap(),
            vec!["Voxdesk", "Keelhaven"]
        );

        let bare_fence = "```\n[\"Solo\"]\n```";
        assert_eq!(parse_keyword_response(bare_fence).unwrap(), vec!["Solo"]);
    }

    #[test]
    fn dedupes_case_sensitively_preserving_order() {
        let raw = r#"["Rime", "rime", "Rime", " Keel ", "Keel"]"#;
        assert_eq!(
            parse_keyword_response(raw).unwrap(),
            vec!["Rime", "rime", "Keel"]
        );
    }

    #[test]
    fn rejects_non_array_output() {
        assert!(parse_keyword_response("here are your keywords!").is_err());
        assert!(parse_keyword_response(r#"{"keywords": []}"#).is_err());
    }

    #[tokio::test]
    async fn completes_with_stored_keywords() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let item = KnowledgeBaseItem::from_text(Uuid::new_v4(), "Voxdesk runs Brightwater tours");
        store.create_item(&item).await.unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![Ok(
            r#"["Voxdesk", "Brightwater"]"#.to_string()
        )]));
        let extractor = KeywordExtractor::new(store.clone(), llm, 5);

        let keywords = extractor.run(item.id).await.unwrap();
        assert_eq!(keywords, vec!["Voxdesk", "Brightwater"]);

        let loaded = store.get_item(item.id).await.unwrap();
        assert_eq!(loaded.keyword_status, Some(KeywordStatus::Completed));
        assert_eq!(loaded.keywords, vec!["Voxdesk", "Brightwater"]);
    }

    #[tokio::test]
    async fn empty_content_completes_with_empty_list() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let item = KnowledgeBaseItem::from_url(Uuid::new_v4(), "https://x.test");
        store.create_item(&item).await.unwrap();

        // LLM would fail if called; it must not be
        let llm = Arc::new(ScriptedLlm::new(vec![Err(())]));
        let extractor = KeywordExtractor::new(store.clone(), llm.clone(), 5);

        let keywords = extractor.run(item.id).await.unwrap();
        assert!(keywords.is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);

        let loaded = store.get_item(item.id).await.unwrap();
        assert_eq!(loaded.keyword_status, Some(KeywordStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_from_garbled_output_before_failing() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let item = KnowledgeBaseItem::from_text(Uuid::new_v4(), "content about Keelhaven");
        store.create_item(&item).await.unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok("not json at all".to_string()),
            Ok(r#"["Keelhaven"]"#.to_string()),
        ]));
        let extractor = KeywordExtractor::new(store.clone(), llm, 5);

        let keywords = extractor.run(item.id).await.unwrap();
        assert_eq!(keywords, vec!["Keelhaven"]);
        assert_eq!(
            store.get_item(item.id).await.unwrap().keyword_status,
            Some(KeywordStatus::Completed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn marks_failed_only_after_final_attempt() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let item = KnowledgeBaseItem::from_text(Uuid::new_v4(), "content");
        store.create_item(&item).await.unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![Err(())]));
        let extractor = KeywordExtractor::new(store.clone(), llm.clone(), 3);

        let result = extractor.run(item.id).await;
        match result {
            Err(Error::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            store.get_item(item.id).await.unwrap().keyword_status,
            Some(KeywordStatus::Failed)
        );
    }
}

//! Block persistence: the store contract and an in-memory implementation.
//!
//! The single invariant every implementation must hold: a block becomes
//! visible with exactly three lessons, one per kind, or not at all.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

use crate::block::{BlockMetadata, LessonDraft, LessonKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredLesson {
    /// 1-based position inside the block: grammar, vocabulary, reading.
    pub order: u32,
    #[serde(flatten)]
    pub draft: LessonDraft,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredBlock {
    pub id: BlockId,
    pub user_id: String,
    /// Per-user sequence number, max existing + 1 at creation time.
    pub order: u32,
    #[serde(flatten)]
    pub metadata: BlockMetadata,
    pub lessons: Vec<StoredLesson>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("draft set must contain exactly {expected} lessons, got {actual}")]
    IncompleteDraftSet { expected: usize, actual: usize },
    #[error("draft set is missing a `{kind}` lesson")]
    MissingKind { kind: LessonKind },
    #[error("io error at `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode stored blocks: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Atomic block persistence plus the read-back used by callers and tests.
pub trait BlockStore: Send + Sync {
    /// Creates the block and its three lessons in one atomic step. No
    /// reader may ever observe a partially written block.
    fn create_block_with_lessons(
        &self,
        user_id: &str,
        metadata: &BlockMetadata,
        drafts: &[LessonDraft],
    ) -> Result<BlockId, StoreError>;

    fn block(&self, id: BlockId) -> Result<Option<StoredBlock>, StoreError>;

    fn blocks_for_user(&self, user_id: &str) -> Result<Vec<StoredBlock>, StoreError>;

    fn block_count(&self) -> Result<usize, StoreError>;

    /// Total lessons across all blocks; equals `3 * block_count()` when the
    /// no-orphans invariant holds.
    fn lesson_count(&self) -> Result<usize, StoreError>;
}

/// Rejects draft sets that are not exactly one lesson per kind. Shared by
/// store implementations so the invariant cannot be skipped.
pub fn check_draft_set(drafts: &[LessonDraft]) -> Result<(), StoreError> {
    if drafts.len() != LessonKind::ALL.len() {
        return Err(StoreError::IncompleteDraftSet {
            expected: LessonKind::ALL.len(),
            actual: drafts.len(),
        });
    }
    let kinds: HashSet<LessonKind> = drafts.iter().map(|draft| draft.kind).collect();
    for kind in LessonKind::ALL {
        if !kinds.contains(&kind) {
            return Err(StoreError::MissingKind { kind });
        }
    }
    Ok(())
}

#[derive(Default)]
struct MemoryInner {
    next_id: u64,
    blocks: Vec<StoredBlock>,
}

/// Mutex-guarded store; the single lock makes every create atomic.
#[derive(Default)]
pub struct MemoryBlockStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))
    }
}

impl BlockStore for MemoryBlockStore {
    fn create_block_with_lessons(
        &self,
        user_id: &str,
        metadata: &BlockMetadata,
        drafts: &[LessonDraft],
    ) -> Result<BlockId, StoreError> {
        check_draft_set(drafts)?;

        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = BlockId(inner.next_id);

        let order = inner
            .blocks
            .iter()
            .filter(|block| block.user_id == user_id)
            .map(|block| block.order)
            .max()
            .unwrap_or(0)
            + 1;

        let mut lessons: Vec<StoredLesson> = drafts
            .iter()
            .map(|draft| StoredLesson {
                order: draft.kind.order(),
                draft: draft.clone(),
            })
            .collect();
        lessons.sort_by_key(|lesson| lesson.order);

        inner.blocks.push(StoredBlock {
            id,
            user_id: user_id.to_string(),
            order,
            metadata: metadata.clone(),
            lessons,
        });

        Ok(id)
    }

    fn block(&self, id: BlockId) -> Result<Option<StoredBlock>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.blocks.iter().find(|block| block.id == id).cloned())
    }

    fn blocks_for_user(&self, user_id: &str) -> Result<Vec<StoredBlock>, StoreError> {
        let inner = self.lock()?;
        let mut blocks: Vec<StoredBlock> = inner
            .blocks
            .iter()
            .filter(|block| block.user_id == user_id)
            .cloned()
            .collect();
        blocks.sort_by_key(|block| block.order);
        Ok(blocks)
    }

    fn block_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.blocks.len())
    }

    fn lesson_count(&self) -> Result<usize, StoreError> {
        Ok(self
            .lock()?
            .blocks
            .iter()
            .map(|block| block.lessons.len())
            .sum())
    }
}

//! File-backed block store: one JSON document, replaced atomically.
//!
//! Writes go to a temp file in the same directory and are renamed over the
//! target, so a reader of the file never sees a half-written block and a
//! failed write leaves the previous document intact.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

use lesson_core::block::{BlockMetadata, LessonDraft};
use lesson_core::store::{
    check_draft_set, BlockId, BlockStore, StoreError, StoredBlock, StoredLesson,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct BlockDocument {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    blocks: Vec<StoredBlock>,
}

pub struct JsonFileStore {
    path: PathBuf,
    document: Mutex<BlockDocument>,
}

impl JsonFileStore {
    /// Opens the store at `path`, loading the existing document if any.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let document = if path.exists() {
            let data = fs::read_to_string(&path).map_err(|source| io_error(&path, source))?;
            serde_json::from_str(&data)?
        } else {
            BlockDocument::default()
        };
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BlockDocument>, StoreError> {
        self.document
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))
    }

    fn write_document(&self, document: &BlockDocument) -> Result<(), StoreError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;

        let temp = NamedTempFile::new_in(parent).map_err(|source| io_error(parent, source))?;
        serde_json::to_writer_pretty(&temp, document)?;
        temp.persist(&self.path)
            .map_err(|error| io_error(&self.path, error.error))?;
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl BlockStore for JsonFileStore {
    fn create_block_with_lessons(
        &self,
        user_id: &str,
        metadata: &BlockMetadata,
        drafts: &[LessonDraft],
    ) -> Result<BlockId, StoreError> {
        check_draft_set(drafts)?;

        let mut guard = self.lock()?;

        // Stage the change on a copy; the in-memory document only advances
        // after the file replace succeeds.
        let mut staged = guard.clone();
        staged.next_id += 1;
        let id = BlockId(staged.next_id);

        let order = staged
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

        staged.blocks.push(StoredBlock {
            id,
            user_id: user_id.to_string(),
            order,
            metadata: metadata.clone(),
            lessons,
        });

        self.write_document(&staged)?;
        *guard = staged;
        Ok(id)
    }

    fn block(&self, id: BlockId) -> Result<Option<StoredBlock>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.blocks.iter().find(|block| block.id == id).cloned())
    }

    fn blocks_for_user(&self, user_id: &str) -> Result<Vec<StoredBlock>, StoreError> {
        let guard = self.lock()?;
        let mut blocks: Vec<StoredBlock> = guard
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

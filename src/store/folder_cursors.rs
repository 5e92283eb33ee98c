use chrono::{DateTime, Utc};

use super::Store;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FolderCursorRow {
    pub folder: String,
    pub last_uid: i64,
    pub last_poll_at: Option<DateTime<Utc>>,
}

impl Store {
    /// Returns the cursor for `folder`, or `None` if this folder has never
    /// been polled — callers use that to decide on an initial backfill.
    pub async fn get_folder_cursor(&self, folder: &str) -> Result<Option<FolderCursorRow>, sqlx::Error> {
        sqlx::query_as::<_, FolderCursorRow>(
            "SELECT folder, last_uid, last_poll_at FROM folder_cursors WHERE folder = $1",
        )
        .bind(folder)
        .fetch_optional(&self.pool)
        .await
    }
}

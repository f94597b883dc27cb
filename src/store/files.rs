use crate::error::ServerError;
use crate::store::{DeletedEntry, FileContent, FileMeta, HistoryEntry, NewFileMeta, Store, now_millis};

const META_COLUMNS: &str = "uid, vault_id, hash, path, extension, size, created, modified, \
                            folder, deleted, newest, is_snapshot";

impl Store {
    /// Records a new version of a file. The previous newest row for the same
    /// path is demoted and the new row inserted inside one transaction, so
    /// observers never see two newest rows for a path.
    ///
    /// Zero `created`/`modified` stamps are replaced with the current time.
    /// Returns the new row's uid; the payload follows via [`Store::insert_data`].
    pub async fn insert_metadata(&self, meta: &NewFileMeta) -> Result<i64, ServerError> {
        let now = now_millis();
        let created = if meta.created == 0 { now } else { meta.created };
        let modified = if meta.modified == 0 { now } else { meta.modified };

        let mut tx = self.pool().begin().await?;

        sqlx::query("UPDATE files SET newest = 0 WHERE vault_id = ? AND path = ? AND newest = 1")
            .bind(&meta.vault_id)
            .bind(&meta.path)
            .execute(&mut *tx)
            .await?;

        let uid = sqlx::query(
            "INSERT INTO files (vault_id, hash, path, extension, size, created, modified, \
             folder, deleted, newest, is_snapshot) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 0)",
        )
        .bind(&meta.vault_id)
        .bind(&meta.hash)
        .bind(&meta.path)
        .bind(&meta.extension)
        .bind(meta.size)
        .bind(created)
        .bind(modified)
        .bind(meta.folder)
        .bind(meta.deleted)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;
        Ok(uid)
    }

    /// Writes the payload of a previously inserted row.
    pub async fn insert_data(&self, uid: i64, data: &[u8]) -> Result<(), ServerError> {
        sqlx::query("UPDATE files SET data = ? WHERE uid = ?")
            .bind(data)
            .bind(uid)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Logically deletes every version of a path. The `is_snapshot` bump
    /// protects the tombstones through future compaction.
    pub async fn delete_file(&self, vault_id: &str, path: &str) -> Result<(), ServerError> {
        sqlx::query("UPDATE files SET deleted = 1, is_snapshot = 1 WHERE vault_id = ? AND path = ?")
            .bind(vault_id)
            .bind(path)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Brings a historical version back as the live one: the target row
    /// becomes newest and undeleted, every other non-deleted row of the path
    /// is demoted. Returns the restored metadata for broadcast.
    pub async fn restore_file(&self, vault_id: &str, uid: i64) -> Result<FileMeta, ServerError> {
        let mut tx = self.pool().begin().await?;

        let mut meta = sqlx::query_as::<_, FileMeta>(&format!(
            "SELECT {META_COLUMNS} FROM files WHERE uid = ? AND vault_id = ?"
        ))
        .bind(uid)
        .bind(vault_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("file {uid} not found")))?;

        sqlx::query("UPDATE files SET deleted = 0, newest = 1 WHERE uid = ?")
            .bind(uid)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE files SET newest = 0 WHERE vault_id = ? AND path = ? AND deleted = 0 AND uid != ?",
        )
        .bind(vault_id)
        .bind(&meta.path)
        .bind(uid)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        meta.deleted = false;
        meta.newest = true;
        Ok(meta)
    }

    /// Content read for a pull. Deleted rows never yield their payload.
    pub async fn get_file(&self, uid: i64) -> Result<FileContent, ServerError> {
        sqlx::query_as::<_, FileContent>(
            "SELECT hash, size, CASE WHEN deleted = 1 THEN NULL ELSE data END AS data \
             FROM files WHERE uid = ?",
        )
        .bind(uid)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("file {uid} not found")))
    }

    /// The current live set of a vault: every newest, non-deleted row.
    pub async fn get_vault_files(&self, vault_id: &str) -> Result<Vec<FileMeta>, ServerError> {
        Ok(sqlx::query_as::<_, FileMeta>(&format!(
            "SELECT {META_COLUMNS} FROM files WHERE vault_id = ? AND deleted = 0 AND newest = 1"
        ))
        .bind(vault_id)
        .fetch_all(self.pool())
        .await?)
    }

    /// Every version of a path, newest-modified first, tombstones included.
    pub async fn get_file_history(
        &self,
        vault_id: &str,
        path: &str,
    ) -> Result<Vec<HistoryEntry>, ServerError> {
        Ok(sqlx::query_as::<_, HistoryEntry>(
            "SELECT uid, path, size, modified, folder, deleted, modified AS ts \
             FROM files WHERE vault_id = ? AND path = ? ORDER BY modified DESC",
        )
        .bind(vault_id)
        .bind(path)
        .fetch_all(self.pool())
        .await?)
    }

    /// The trash view: newest rows that are logically deleted.
    pub async fn get_deleted_files(&self, vault_id: &str) -> Result<Vec<DeletedEntry>, ServerError> {
        Ok(sqlx::query_as::<_, DeletedEntry>(
            "SELECT uid, modified, size, path, folder, deleted \
             FROM files WHERE vault_id = ? AND deleted = 1 AND newest = 1",
        )
        .bind(vault_id)
        .fetch_all(self.pool())
        .await?)
    }

    /// Total stored bytes across all versions of a vault.
    pub async fn get_vault_size(&self, vault_id: &str) -> Result<i64, ServerError> {
        Ok(
            sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM files WHERE vault_id = ?")
                .bind(vault_id)
                .fetch_one(self.pool())
                .await?,
        )
    }

    /// Compacts a vault's history:
    /// 1. every newest row is promoted to snapshot,
    /// 2. unprotected historical versions are dropped,
    /// 3. metadata rows whose upload never delivered bytes are pruned.
    pub async fn snapshot(&self, vault_id: &str) -> Result<(), ServerError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("UPDATE files SET is_snapshot = 1 WHERE vault_id = ? AND newest = 1")
            .bind(vault_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM files WHERE vault_id = ? AND is_snapshot = 0")
            .bind(vault_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM files WHERE vault_id = ? AND size != 0 AND data IS NULL")
            .bind(vault_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub email: String,
    pub password: String,
    pub name: String,
    pub license: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Vault {
    pub id: String,
    pub user_email: String,
    pub created: i64,
    pub host: String,
    pub name: String,
    pub password: String,
    pub salt: String,
    /// Storage quota in bytes; the wire field is named `size`.
    pub size: i64,
    pub version: i64,
    pub keyhash: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Share {
    pub uid: String,
    pub email: String,
    pub name: String,
    pub vault_id: String,
    pub accepted: bool,
}

/// A file row without its payload. Catch-up, history and trash reads only
/// ever need the metadata, so the blob column stays in the database.
#[derive(Debug, Clone, FromRow)]
pub struct FileMeta {
    pub uid: i64,
    pub vault_id: String,
    pub hash: String,
    pub path: String,
    pub extension: String,
    pub size: i64,
    pub created: i64,
    pub modified: i64,
    pub folder: bool,
    pub deleted: bool,
    pub newest: bool,
    pub is_snapshot: bool,
}

/// Metadata for a new file version arriving over a push.
#[derive(Debug, Clone, Default)]
pub struct NewFileMeta {
    pub vault_id: String,
    pub hash: String,
    pub path: String,
    pub extension: String,
    pub size: i64,
    pub created: i64,
    pub modified: i64,
    pub folder: bool,
    pub deleted: bool,
}

/// Content read for a pull: `data` is absent for deleted rows and for
/// metadata-only rows whose upload never completed.
#[derive(Debug, Clone, FromRow)]
pub struct FileContent {
    pub hash: String,
    pub size: i64,
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct HistoryEntry {
    pub uid: i64,
    pub path: String,
    pub size: i64,
    pub modified: i64,
    pub folder: bool,
    pub deleted: bool,
    /// Alias of `modified`, kept because clients read the history timestamp
    /// from this field.
    pub ts: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DeletedEntry {
    pub uid: i64,
    pub modified: i64,
    pub size: i64,
    pub path: String,
    pub folder: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Site {
    pub id: String,
    pub host: String,
    pub created: i64,
    pub owner: String,
    pub slug: String,
    pub options: String,
    pub size: i64,
}

/// A published file. The `slug` column carries the owning site's id; the
/// public slug indirection lives on the site row itself.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PublishFile {
    pub path: String,
    pub ctime: i64,
    pub mtime: i64,
    pub hash: String,
    pub size: i64,
    pub data: String,
    pub slug: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlugInfo {
    pub id: String,
    pub host: String,
    pub slug: String,
}

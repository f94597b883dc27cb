use uuid::Uuid;

use crate::error::ServerError;
use crate::store::{PublishFile, Site, SlugInfo, Store, now_millis};

impl Store {
    /// Creates a site for `owner`; a fresh UUID serves as both the id and the
    /// initial public slug.
    pub async fn create_site(&self, owner: &str, host: &str) -> Result<Site, ServerError> {
        let id = Uuid::new_v4().to_string();
        let site = Site {
            id: id.clone(),
            host: host.to_string(),
            created: now_millis(),
            owner: owner.to_string(),
            slug: id,
            options: String::new(),
            size: 0,
        };

        sqlx::query(
            "INSERT INTO sites (id, host, created, owner, slug, options, size) \
             VALUES (?, ?, ?, ?, ?, '', 0)",
        )
        .bind(&site.id)
        .bind(&site.host)
        .bind(site.created)
        .bind(&site.owner)
        .bind(&site.slug)
        .execute(self.pool())
        .await?;

        Ok(site)
    }

    pub async fn delete_site(&self, site_id: &str) -> Result<(), ServerError> {
        sqlx::query("DELETE FROM sites WHERE id = ?")
            .bind(site_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Updates the public handle; slugs are globally unique.
    pub async fn set_slug(&self, slug: &str, site_id: &str) -> Result<(), ServerError> {
        sqlx::query("UPDATE sites SET slug = ? WHERE id = ?")
            .bind(slug)
            .bind(site_id)
            .execute(self.pool())
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    ServerError::Conflict("slug already taken".into())
                }
                _ => e.into(),
            })?;
        Ok(())
    }

    /// Public slug resolution.
    pub async fn get_slug(&self, slug: &str) -> Result<Option<SlugInfo>, ServerError> {
        let site = sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE slug = ?")
            .bind(slug)
            .fetch_optional(self.pool())
            .await?;
        Ok(site.map(|s| SlugInfo {
            id: s.id,
            host: s.host,
            slug: s.slug,
        }))
    }

    pub async fn get_sites(&self, owner: &str) -> Result<Vec<Site>, ServerError> {
        Ok(sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE owner = ?")
            .bind(owner)
            .fetch_all(self.pool())
            .await?)
    }

    pub async fn get_site_owner(&self, site_id: &str) -> Result<String, ServerError> {
        sqlx::query_scalar("SELECT owner FROM sites WHERE id = ?")
            .bind(site_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| ServerError::NotFound("Site not found".into()))
    }

    pub async fn get_site_slug(&self, site_id: &str) -> Result<String, ServerError> {
        sqlx::query_scalar("SELECT slug FROM sites WHERE id = ?")
            .bind(site_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| ServerError::NotFound("Site not found".into()))
    }

    /// Upserts a published file by (site, path), stamping both timestamps.
    pub async fn new_publish_file(&self, file: &PublishFile) -> Result<(), ServerError> {
        let now = now_millis();
        sqlx::query(
            "INSERT INTO publish_files (path, ctime, mtime, hash, size, data, slug, deleted) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0) \
             ON CONFLICT (slug, path) DO UPDATE SET \
             ctime = excluded.ctime, mtime = excluded.mtime, hash = excluded.hash, \
             size = excluded.size, data = excluded.data, deleted = 0",
        )
        .bind(&file.path)
        .bind(now)
        .bind(now)
        .bind(&file.hash)
        .bind(file.size)
        .bind(&file.data)
        .bind(&file.slug)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Hard delete by (site, path).
    pub async fn remove_publish_file(&self, site_id: &str, path: &str) -> Result<(), ServerError> {
        sqlx::query("DELETE FROM publish_files WHERE slug = ? AND path = ?")
            .bind(site_id)
            .bind(path)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn get_publish_files(&self, site_id: &str) -> Result<Vec<PublishFile>, ServerError> {
        Ok(
            sqlx::query_as::<_, PublishFile>("SELECT * FROM publish_files WHERE slug = ?")
                .bind(site_id)
                .fetch_all(self.pool())
                .await?,
        )
    }

    /// The stored text of one published file.
    pub async fn get_publish_file(
        &self,
        site_id: &str,
        path: &str,
    ) -> Result<Option<String>, ServerError> {
        Ok(
            sqlx::query_scalar("SELECT data FROM publish_files WHERE slug = ? AND path = ?")
                .bind(site_id)
                .bind(path)
                .fetch_optional(self.pool())
                .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_file(site_id: &str, path: &str, data: &str) -> PublishFile {
        PublishFile {
            path: path.to_string(),
            ctime: 0,
            mtime: 0,
            hash: "h".to_string(),
            size: data.len() as i64,
            data: data.to_string(),
            slug: site_id.to_string(),
            deleted: false,
        }
    }

    #[tokio::test]
    async fn site_starts_with_uuid_slug() {
        let store = Store::open_in_memory().await;
        let site = store.create_site("a@x", "localhost:3000").await.unwrap();

        assert_eq!(site.slug, site.id);
        assert_eq!(store.get_site_owner(&site.id).await.unwrap(), "a@x");
        assert_eq!(store.get_sites("a@x").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn slug_indirection() {
        let store = Store::open_in_memory().await;
        let site = store.create_site("a@x", "h").await.unwrap();

        store.set_slug("my-notes", &site.id).await.unwrap();
        assert_eq!(store.get_site_slug(&site.id).await.unwrap(), "my-notes");

        let resolved = store.get_slug("my-notes").await.unwrap().unwrap();
        assert_eq!(resolved.id, site.id);

        // The old handle no longer resolves.
        assert!(store.get_slug(&site.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn slugs_are_globally_unique() {
        let store = Store::open_in_memory().await;
        let first = store.create_site("a@x", "h").await.unwrap();
        let second = store.create_site("a@x", "h").await.unwrap();

        store.set_slug("taken", &first.id).await.unwrap();
        let err = store.set_slug("taken", &second.id).await.unwrap_err();
        assert!(matches!(err, ServerError::Conflict(_)));
    }

    #[tokio::test]
    async fn file_upsert_overwrites_by_site_and_path() {
        let store = Store::open_in_memory().await;
        let site = store.create_site("a@x", "h").await.unwrap();

        store
            .new_publish_file(&publish_file(&site.id, "index.md", "first"))
            .await
            .unwrap();
        store
            .new_publish_file(&publish_file(&site.id, "index.md", "second"))
            .await
            .unwrap();

        let files = store.get_publish_files(&site.id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].data, "second");
        assert!(files[0].ctime > 0);

        assert_eq!(
            store
                .get_publish_file(&site.id, "index.md")
                .await
                .unwrap()
                .as_deref(),
            Some("second")
        );
    }

    #[tokio::test]
    async fn same_path_on_two_sites_is_independent() {
        let store = Store::open_in_memory().await;
        let first = store.create_site("a@x", "h").await.unwrap();
        let second = store.create_site("a@x", "h").await.unwrap();

        store
            .new_publish_file(&publish_file(&first.id, "index.md", "one"))
            .await
            .unwrap();
        store
            .new_publish_file(&publish_file(&second.id, "index.md", "two"))
            .await
            .unwrap();

        assert_eq!(
            store
                .get_publish_file(&first.id, "index.md")
                .await
                .unwrap()
                .as_deref(),
            Some("one")
        );
        assert_eq!(
            store
                .get_publish_file(&second.id, "index.md")
                .await
                .unwrap()
                .as_deref(),
            Some("two")
        );
    }

    #[tokio::test]
    async fn remove_is_a_hard_delete() {
        let store = Store::open_in_memory().await;
        let site = store.create_site("a@x", "h").await.unwrap();
        store
            .new_publish_file(&publish_file(&site.id, "index.md", "body"))
            .await
            .unwrap();

        store.remove_publish_file(&site.id, "index.md").await.unwrap();
        assert!(store.get_publish_files(&site.id).await.unwrap().is_empty());
        assert!(
            store
                .get_publish_file(&site.id, "index.md")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn unknown_site_lookups_fail() {
        let store = Store::open_in_memory().await;
        assert!(matches!(
            store.get_site_owner("missing").await,
            Err(ServerError::NotFound(_))
        ));
        assert!(store.get_slug("missing").await.unwrap().is_none());
    }
}

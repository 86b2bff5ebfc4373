use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::access_keys::{AccessKeyCreateDBRequest, AccessKeyDBResponse},
};

/// Filter for listing access keys
#[derive(Debug, Clone, Default)]
pub struct AccessKeyFilter {
    /// POSIX regular expression the key name must match; all keys when absent
    pub name_pattern: Option<String>,
}

// Database entity model
#[derive(Debug, Clone, FromRow)]
struct AccessKey {
    id: String,
    name: String,
    description: Option<String>,
    scopes: Vec<String>,
    created_at: DateTime<Utc>,
}

impl From<AccessKey> for AccessKeyDBResponse {
    fn from(key: AccessKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            description: key.description,
            scopes: key.scopes.into_iter().collect(),
            created_at: key.created_at,
        }
    }
}

pub struct AccessKeys<'c> {
    db: &'c mut PgConnection,
}

impl<'c> AccessKeys<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_name(&mut self, name: &str) -> Result<Option<AccessKeyDBResponse>> {
        let key = sqlx::query_as::<_, AccessKey>("SELECT id, name, description, scopes, created_at FROM access_tokens WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(key.map(Into::into))
    }

    #[instrument(skip(self, description), err)]
    pub async fn update_description(&mut self, id: &str, description: Option<&str>) -> Result<AccessKeyDBResponse> {
        let key = sqlx::query_as::<_, AccessKey>(
            "UPDATE access_tokens SET description = $2 WHERE id = $1 RETURNING id, name, description, scopes, created_at",
        )
        .bind(id)
        .bind(description)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(key.into())
    }
}

#[async_trait::async_trait]
impl<'c> Repository for AccessKeys<'c> {
    type CreateRequest = AccessKeyCreateDBRequest;
    type Response = AccessKeyDBResponse;
    type Id = String;
    type Filter = AccessKeyFilter;

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let key = sqlx::query_as::<_, AccessKey>(
            r#"
            INSERT INTO access_tokens (id, name, description, scopes, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, description, scopes, created_at
            "#,
        )
        .bind(&request.id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.scopes.iter().cloned().collect::<Vec<_>>())
        .bind(request.created_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(key.into())
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let key = sqlx::query_as::<_, AccessKey>("SELECT id, name, description, scopes, created_at FROM access_tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(key.map(Into::into))
    }

    #[instrument(skip(self), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let pattern = filter.name_pattern.as_deref().filter(|p| !p.is_empty()).unwrap_or(".*");
        let keys = sqlx::query_as::<_, AccessKey>(
            "SELECT id, name, description, scopes, created_at FROM access_tokens WHERE name ~ $1 ORDER BY name",
        )
        .bind(pattern)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(keys.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::PgPool;
    use std::collections::BTreeSet;

    fn request(id: &str, name: &str, scopes: &[&str]) -> AccessKeyCreateDBRequest {
        AccessKeyCreateDBRequest {
            id: id.to_string(),
            name: name.to_string(),
            description: Some(format!("{name} key")),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[sqlx::test]
    async fn test_create_and_get(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = AccessKeys::new(&mut conn);

        let created = repo.create(&request("K1", "deployer", &["read", "write"])).await.unwrap();
        assert_eq!(created.id, "K1");
        assert_eq!(created.scopes, BTreeSet::from(["read".to_string(), "write".to_string()]));
        assert_eq!(created.created_at, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

        assert_eq!(repo.get_by_id("K1".to_string()).await.unwrap(), Some(created.clone()));
        assert_eq!(repo.get_by_name("deployer").await.unwrap(), Some(created));
        assert_eq!(repo.get_by_id("K2".to_string()).await.unwrap(), None);
    }

    #[sqlx::test]
    async fn test_duplicate_name_is_a_unique_violation(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = AccessKeys::new(&mut conn);

        repo.create(&request("K1", "deployer", &[])).await.unwrap();
        let err = repo.create(&request("K2", "deployer", &[])).await.unwrap_err();

        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[sqlx::test]
    async fn test_list_filters_by_name_pattern(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = AccessKeys::new(&mut conn);
        for (id, name) in [("K1", "ci-build"), ("K2", "ci-deploy"), ("K3", "monitoring")] {
            repo.create(&request(id, name, &[])).await.unwrap();
        }

        let all = repo.list(&AccessKeyFilter::default()).await.unwrap();
        assert_eq!(all.iter().map(|k| k.name.as_str()).collect::<Vec<_>>(), ["ci-build", "ci-deploy", "monitoring"]);

        let filter = AccessKeyFilter {
            name_pattern: Some("^ci-".to_string()),
        };
        assert_eq!(repo.list(&filter).await.unwrap().len(), 2);

        let broken = AccessKeyFilter {
            name_pattern: Some("(".to_string()),
        };
        assert!(matches!(repo.list(&broken).await, Err(DbError::InvalidInput { .. })));
    }

    #[sqlx::test]
    async fn test_update_description_and_delete(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = AccessKeys::new(&mut conn);
        repo.create(&request("K1", "deployer", &[])).await.unwrap();

        let updated = repo.update_description("K1", Some("rotated monthly")).await.unwrap();
        assert_eq!(updated.description.as_deref(), Some("rotated monthly"));
        assert!(matches!(repo.update_description("K9", None).await, Err(DbError::NotFound)));

        assert!(repo.delete("K1".to_string()).await.unwrap());
        assert!(!repo.delete("K1".to_string()).await.unwrap());
        assert_eq!(repo.get_by_id("K1".to_string()).await.unwrap(), None);
    }
}

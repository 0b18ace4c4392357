//! The single active page credential used for publishing

use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PageCredential {
    pub page_id: String,
    pub page_name: String,
    pub access_token: String,
}

impl PageCredential {
    /// A credential can only publish with both a page id and a token.
    pub fn is_complete(&self) -> bool {
        !self.page_id.trim().is_empty() && !self.access_token.trim().is_empty()
    }
}

pub async fn get_page<'e, E>(executor: E) -> Result<Option<PageCredential>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT page_id, page_name, access_token FROM fb_page WHERE id = 1")
        .fetch_optional(executor)
        .await
}

/// The credential the publisher should use, or `None` when the page is not
/// configured (or configured without a page id or token).
pub async fn active_credential<'e, E>(executor: E) -> Result<Option<PageCredential>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(get_page(executor).await?.filter(PageCredential::is_complete))
}

/// Replace the stored credential in one statement.
pub async fn set_page<'e, E>(executor: E, page: &PageCredential) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO fb_page (id, page_id, page_name, access_token)
        VALUES (1, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            page_id = excluded.page_id,
            page_name = excluded.page_name,
            access_token = excluded.access_token
        "#,
    )
    .bind(&page.page_id)
    .bind(&page.page_name)
    .bind(&page.access_token)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn remove_page<'e, E>(executor: E) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM fb_page").execute(executor).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::db::test_pool;

    fn page(page_id: &str, token: &str) -> PageCredential {
        PageCredential {
            page_id: page_id.to_string(),
            page_name: "Carp King".to_string(),
            access_token: token.to_string(),
        }
    }

    #[tokio::test]
    async fn test_set_replaces_singleton() {
        let pool = test_pool().await;
        assert!(get_page(&pool).await.unwrap().is_none());

        set_page(&pool, &page("111", "t1")).await.unwrap();
        set_page(&pool, &page("222", "t2")).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fb_page")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(get_page(&pool).await.unwrap(), Some(page("222", "t2")));

        remove_page(&pool).await.unwrap();
        assert!(get_page(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incomplete_credential_is_not_active() {
        let pool = test_pool().await;
        set_page(&pool, &page("111", "  ")).await.unwrap();
        assert!(get_page(&pool).await.unwrap().is_some());
        assert!(active_credential(&pool).await.unwrap().is_none());
    }
}

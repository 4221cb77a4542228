//! Course and review data used by the admin dashboard.
//!
//! Listing, search and review aggregation belong to the public site; this
//! trait only covers what the admin surface needs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CatalogCounts {
    pub courses: i64,
    pub reviews: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewSummary {
    pub id: Uuid,
    pub course_id: Uuid,
    pub course_title: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn counts(&self) -> Result<CatalogCounts>;

    /// Newest reviews first.
    async fn recent_reviews(&self, limit: i64) -> Result<Vec<ReviewSummary>>;

    /// Delete a course and its reviews. Returns `false` when the course does not exist.
    async fn delete_course(&self, id: Uuid) -> Result<bool>;

    /// Returns `false` when the review does not exist.
    async fn delete_review(&self, id: Uuid) -> Result<bool>;
}

#[derive(Clone, Debug)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn counts(&self) -> Result<CatalogCounts> {
        let query = r"
            SELECT
                (SELECT COUNT(*) FROM courses) AS courses,
                (SELECT COUNT(*) FROM reviews) AS reviews
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count catalog")?;
        Ok(CatalogCounts {
            courses: row.get("courses"),
            reviews: row.get("reviews"),
        })
    }

    async fn recent_reviews(&self, limit: i64) -> Result<Vec<ReviewSummary>> {
        let query = r"
            SELECT r.id, r.course_id, c.title AS course_title, r.comment, r.created_at
            FROM reviews r
            JOIN courses c ON c.id = r.course_id
            ORDER BY r.created_at DESC
            LIMIT $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let rows = sqlx::query(query)
            .bind(limit)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to load recent reviews")?;
        Ok(rows
            .iter()
            .map(|row| ReviewSummary {
                id: row.get("id"),
                course_id: row.get("course_id"),
                course_title: row.get("course_title"),
                comment: row.get("comment"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn delete_course(&self, id: Uuid) -> Result<bool> {
        // Reviews go with the course through ON DELETE CASCADE.
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        let result = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete course")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_review(&self, id: Uuid) -> Result<bool> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete review")?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Default)]
struct MemoryCatalogData {
    courses: HashMap<Uuid, String>,
    reviews: HashMap<Uuid, ReviewSummary>,
}

/// In-process catalog for development without a database and for tests.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    data: RwLock<MemoryCatalogData>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_course(&self, title: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.data
            .write()
            .await
            .courses
            .insert(id, title.to_string());
        id
    }

    /// Returns `None` when the course does not exist.
    pub async fn add_review(&self, course_id: Uuid, comment: &str) -> Option<Uuid> {
        let mut data = self.data.write().await;
        let course_title = data.courses.get(&course_id)?.clone();
        let review = ReviewSummary {
            id: Uuid::new_v4(),
            course_id,
            course_title,
            comment: comment.to_string(),
            created_at: Utc::now(),
        };
        let id = review.id;
        data.reviews.insert(id, review);
        Some(id)
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn counts(&self) -> Result<CatalogCounts> {
        let data = self.data.read().await;
        Ok(CatalogCounts {
            courses: i64::try_from(data.courses.len()).unwrap_or(i64::MAX),
            reviews: i64::try_from(data.reviews.len()).unwrap_or(i64::MAX),
        })
    }

    async fn recent_reviews(&self, limit: i64) -> Result<Vec<ReviewSummary>> {
        let data = self.data.read().await;
        let mut reviews: Vec<ReviewSummary> = data.reviews.values().cloned().collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        reviews.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(reviews)
    }

    async fn delete_course(&self, id: Uuid) -> Result<bool> {
        let mut data = self.data.write().await;
        if data.courses.remove(&id).is_none() {
            return Ok(false);
        }
        data.reviews.retain(|_, review| review.course_id != id);
        Ok(true)
    }

    async fn delete_review(&self, id: Uuid) -> Result<bool> {
        Ok(self.data.write().await.reviews.remove(&id).is_some())
    }
}

//! Notificaciones persistidas en PostgreSQL

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::notification::BookingEvent;
use crate::services::notifier::Notifier;
use crate::utils::errors::AppResult;

pub struct PgNotifier {
    pool: PgPool,
}

impl PgNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn branch_manager(&self, branch_id: Uuid) -> AppResult<Option<Uuid>> {
        let manager: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT manager_id FROM branches WHERE id = $1")
                .bind(branch_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(manager.flatten())
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn notify(&self, events: &[BookingEvent]) -> AppResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for event in events {
            let manager = self.branch_manager(event.branch_id).await?;
            for n in event.notifications(manager, now) {
                sqlx::query(
                    r#"
                    INSERT INTO notifications
                        (id, user_id, notification_type, title, message, metadata, is_read, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(n.id)
                .bind(n.user_id)
                .bind(&n.notification_type)
                .bind(&n.title)
                .bind(&n.message)
                .bind(&n.metadata)
                .bind(n.is_read)
                .bind(n.created_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        tracing::debug!(count = events.len(), "booking notifications stored");
        Ok(())
    }
}

//! Entrega de notificaciones tras el commit
//!
//! Los eventos se despachan cuando la transición ya es definitiva; un fallo
//! aquí se registra en el log y nunca deshace la transición.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::notification::{BookingEvent, Notification};
use crate::repositories::BookingStore;
use crate::utils::errors::AppResult;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, events: &[BookingEvent]) -> AppResult<()>;
}

/// Despacha eventos sin propagar errores
pub async fn dispatch(notifier: &dyn Notifier, events: &[BookingEvent]) {
    if events.is_empty() {
        return;
    }
    if let Err(e) = notifier.notify(events).await {
        tracing::warn!(error = %e, count = events.len(), "failed to deliver booking notifications");
    }
}

/// Notificador que guarda en memoria todo lo que recibe
pub struct InMemoryNotifier {
    store: Arc<dyn BookingStore>,
    events: Mutex<Vec<BookingEvent>>,
    notifications: Mutex<Vec<Notification>>,
}

impl InMemoryNotifier {
    /// Usa el almacén para resolver el gerente de cada sucursal
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self {
            store,
            events: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub async fn events(&self) -> Vec<BookingEvent> {
        self.events.lock().await.clone()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, events: &[BookingEvent]) -> AppResult<()> {
        let now = Utc::now();
        let mut rows = Vec::new();
        for event in events {
            let manager = self.store.branch_manager(event.branch_id).await?;
            rows.extend(event.notifications(manager, now));
        }

        self.events.lock().await.extend_from_slice(events);
        self.notifications.lock().await.extend(rows);
        Ok(())
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::browser::{BrowserHandle, SessionPage};
use crate::config::ScrapeConfig;
use crate::driver::harvest_card;
use crate::error::ScrapeError;
use crate::model::ScrapeJob;
use crate::pool::JobRunner;
use crate::store::SaleStore;

/// Production [`JobRunner`]: one browser page per worker slot, reused
/// across jobs to amortize startup cost and replaced when its target dies.
pub struct SalesRunner {
    browser: BrowserHandle,
    sessions: Vec<tokio::sync::Mutex<Option<SessionPage>>>,
    store: Arc<dyn SaleStore>,
    config: ScrapeConfig,
}

impl SalesRunner {
    /// Launches the browser and prepares one (lazy) session per slot.
    pub async fn launch(
        config: ScrapeConfig,
        store: Arc<dyn SaleStore>,
    ) -> Result<Self, ScrapeError> {
        let browser = BrowserHandle::launch(&config).await?;
        let sessions = (0..config.concurrency.max(1))
            .map(|_| tokio::sync::Mutex::new(None))
            .collect();
        Ok(Self {
            browser,
            sessions,
            store,
            config,
        })
    }
}

#[async_trait]
impl JobRunner for SalesRunner {
    async fn run(&self, slot: usize, job: &ScrapeJob) -> Result<usize, ScrapeError> {
        let mut guard = self.sessions[slot].lock().await;

        // A dead page fails the job recoverably before any network traffic;
        // the retry must not run on the dead session, so the slot is cleared
        // and gets a fresh page next time around.
        if let Some(session) = guard.as_ref() {
            if !session.is_usable().await {
                warn!(slot, "worker page died, clearing the slot");
                if let Some(dead) = guard.take() {
                    dead.close().await;
                }
                return Err(ScrapeError::SessionClosed("page no longer usable".into()));
            }
        }
        if guard.is_none() {
            *guard = Some(self.browser.new_session().await?);
        }
        let Some(session) = guard.as_ref() else {
            return Err(ScrapeError::SessionClosed("no page for worker slot".into()));
        };

        let result = harvest_card(session, job, self.store.as_ref(), &self.config).await;

        // Target loss mid-job leaves the page in an unknown state; drop it
        // so the next job starts on a fresh one.
        if matches!(result, Err(ScrapeError::SessionClosed(_))) {
            if let Some(dead) = guard.take() {
                dead.close().await;
            }
        }
        result
    }

    async fn close(&self) {
        for slot in &self.sessions {
            if let Some(session) = slot.lock().await.take() {
                session.close().await;
            }
        }
        self.browser.close().await;
        info!("browser sessions released");
    }
}

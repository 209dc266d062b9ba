//! Offline sample submission queue.
//!
//! Holds "mark sample collected" submissions that failed for network reasons
//! and replays them when connectivity returns. Items move
//! `PENDING -> SYNCING -> SYNCED` or `SYNCING -> FAILED -> SYNCING`.
//!
//! Two locks keep the store single-writer:
//! - `sync_slot` admits one reconciliation pass at a time; a pass requested
//!   while another runs returns `AlreadyRunning` without doing anything.
//! - `store_lock` serializes every read-modify-write of the store, so an
//!   enqueue during a pass cannot lose an update.

pub mod store;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{BookingPatientUpdate, MarkCollectedRequest, QueuedSampleSubmission, SubmissionState};
use crate::services::booking_api::{BookingApi, BookingApiResult};

pub use store::{FileQueueStore, MemoryQueueStore, QueueStore, RedisQueueStore, QUEUE_STORAGE_KEY};

/// How long a synced item stays visible after it was created.
pub const SYNCED_RETENTION: Duration = Duration::from_secs(5 * 60);

/// A submission to persist for later sync.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub booking_id: String,
    pub api_booking_id: String,
    pub updates: Vec<BookingPatientUpdate>,
    pub cropped_images: Vec<String>,
    pub event_id: String,
    pub collected_at: DateTime<Utc>,
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    pub pruned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Completed(ReconcileReport),
    /// Another pass held the slot; nothing was done.
    AlreadyRunning,
}

pub struct SampleSubmissionQueue {
    store: Arc<dyn QueueStore>,
    api: Arc<dyn BookingApi>,
    store_lock: Mutex<()>,
    sync_slot: Mutex<()>,
    retention: Duration,
}

impl SampleSubmissionQueue {
    pub fn new(store: Arc<dyn QueueStore>, api: Arc<dyn BookingApi>) -> Self {
        Self {
            store,
            api,
            store_lock: Mutex::new(()),
            sync_slot: Mutex::new(()),
            retention: SYNCED_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Persist a submission, or refresh the unsynced one already queued for
    /// the same booking. The refreshed record keeps its id and event id.
    #[instrument(skip(self, new), fields(booking_id = %new.booking_id))]
    pub async fn enqueue(&self, new: NewSubmission) -> Result<QueuedSampleSubmission> {
        let _guard = self.store_lock.lock().await;
        let mut items = self.store.read().await?;

        let existing = items
            .iter_mut()
            .find(|item| item.booking_id == new.booking_id && item.state != SubmissionState::Synced);

        let record = match existing {
            Some(item) => {
                item.api_booking_id = new.api_booking_id;
                item.updates = new.updates;
                item.cropped_document_image_base64_list = non_empty(new.cropped_images);
                item.collected_at = new.collected_at;
                item.state = SubmissionState::Pending;
                item.last_error_message = None;
                item.clone()
            }
            None => {
                let record = QueuedSampleSubmission {
                    id: Uuid::new_v4().to_string(),
                    booking_id: new.booking_id,
                    api_booking_id: new.api_booking_id,
                    updates: new.updates,
                    cropped_document_image_base64_list: non_empty(new.cropped_images),
                    event_id: new.event_id,
                    collected_at: new.collected_at,
                    created_at: Utc::now(),
                    retry_count: 0,
                    state: SubmissionState::Pending,
                    last_error_message: None,
                };
                items.push(record.clone());
                record
            }
        };

        self.store.write(&items).await?;
        info!(queue_id = %record.id, event_id = %record.event_id, "Submission queued for sync");
        Ok(record)
    }

    pub async fn list(&self) -> Result<Vec<QueuedSampleSubmission>> {
        self.store.read().await
    }

    /// Items not yet synced.
    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self
            .list()
            .await?
            .iter()
            .filter(|item| item.state != SubmissionState::Synced)
            .count())
    }

    /// Event id of the unsynced submission for a booking, if one is queued.
    pub async fn pending_event_id(&self, booking_id: &str) -> Result<Option<String>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|item| item.booking_id == booking_id && item.state != SubmissionState::Synced)
            .map(|item| item.event_id))
    }

    /// Put a FAILED item back to PENDING. Returns false if it is not FAILED.
    pub async fn retry(&self, id: &str) -> Result<bool> {
        let mut reset = false;
        self.update_item(id, |item| {
            if item.state == SubmissionState::Failed {
                item.state = SubmissionState::Pending;
                reset = true;
            }
        })
        .await?;
        Ok(reset)
    }

    /// Mark the unsynced record of a booking as SYNCED after the submission
    /// went through on another path. Returns false if none was queued.
    pub async fn mark_synced(&self, booking_id: &str) -> Result<bool> {
        let _guard = self.store_lock.lock().await;
        let mut items = self.store.read().await?;
        let Some(item) = items
            .iter_mut()
            .find(|item| item.booking_id == booking_id && item.state != SubmissionState::Synced)
        else {
            return Ok(false);
        };

        item.state = SubmissionState::Synced;
        item.updates.clear();
        item.last_error_message = None;
        info!(queue_id = %item.id, event_id = %item.event_id, "Queued submission settled directly");
        self.store.write(&items).await?;
        Ok(true)
    }

    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        self.reconcile_at(Utc::now()).await
    }

    /// Run one pass: prune expired synced items, then sync the rest one by one.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> Result<ReconcileOutcome> {
        let Ok(_slot) = self.sync_slot.try_lock() else {
            debug!("Reconciliation already running");
            return Ok(ReconcileOutcome::AlreadyRunning);
        };

        let mut report = ReconcileReport {
            pruned: self.prune_synced(now).await?,
            ..Default::default()
        };

        let ids: Vec<String> = self
            .store
            .read()
            .await?
            .into_iter()
            .filter(|item| item.state.needs_sync())
            .map(|item| item.id)
            .collect();

        for id in ids {
            let Some(item) = self
                .update_item(&id, |item| item.state = SubmissionState::Syncing)
                .await?
            else {
                continue;
            };
            report.attempted += 1;

            // An item no longer SYNCING when the call returns was refreshed or
            // settled meanwhile and keeps the state it was given.
            match self.sync_item(&item).await? {
                Ok(()) => {
                    let stored = self
                        .update_item(&id, |item| {
                            if item.state == SubmissionState::Syncing {
                                item.state = SubmissionState::Synced;
                                item.last_error_message = None;
                            }
                        })
                        .await?;
                    if matches!(&stored, Some(stored) if stored.state == SubmissionState::Synced) {
                        report.synced += 1;
                        info!(queue_id = %id, event_id = %item.event_id, "Queued submission synced");
                    } else {
                        debug!(queue_id = %id, "Submission refreshed during sync, keeping it pending");
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    self.update_item(&id, |item| {
                        if item.state == SubmissionState::Syncing {
                            item.state = SubmissionState::Failed;
                            item.retry_count += 1;
                            item.last_error_message = Some(message.clone());
                        }
                    })
                    .await?;
                    report.failed += 1;
                    warn!(
                        queue_id = %id,
                        retry_count = item.retry_count + 1,
                        network = e.is_network(),
                        error = %e,
                        "Queued submission failed to sync"
                    );
                }
            }
        }

        if report.attempted > 0 || report.pruned > 0 {
            info!(
                attempted = report.attempted,
                synced = report.synced,
                failed = report.failed,
                pruned = report.pruned,
                "Reconciliation pass finished"
            );
        }
        Ok(ReconcileOutcome::Completed(report))
    }

    /// Replay one submission against the booking API. The outer error is a
    /// store failure, the inner one the API's answer.
    async fn sync_item(&self, item: &QueuedSampleSubmission) -> Result<BookingApiResult<()>> {
        if !item.updates.is_empty() {
            if let Err(e) = self
                .api
                .update_patients(&item.api_booking_id, &item.updates)
                .await
            {
                return Ok(Err(e));
            }
            // Patched ids may be renamed; the patch must not be replayed.
            let sent = &item.updates;
            self.update_item(&item.id, |stored| {
                if stored.updates == *sent {
                    stored.updates.clear();
                }
            })
            .await?;
        }

        let request = MarkCollectedRequest {
            event_id: item.event_id.clone(),
            collected_at: item.collected_at,
            document_images: item
                .cropped_document_image_base64_list
                .clone()
                .unwrap_or_default(),
        };
        Ok(self
            .api
            .mark_sample_collected(&item.api_booking_id, &request)
            .await)
    }

    /// Apply `f` to the stored item with `id` and persist. `None` if absent.
    async fn update_item<F>(&self, id: &str, f: F) -> Result<Option<QueuedSampleSubmission>>
    where
        F: FnOnce(&mut QueuedSampleSubmission),
    {
        let _guard = self.store_lock.lock().await;
        let mut items = self.store.read().await?;
        let Some(item) = items.iter_mut().find(|item| item.id == id) else {
            return Ok(None);
        };
        f(item);
        let updated = item.clone();
        self.store.write(&items).await?;
        Ok(Some(updated))
    }

    async fn prune_synced(&self, now: DateTime<Utc>) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::zero());

        let _guard = self.store_lock.lock().await;
        let mut items = self.store.read().await?;
        let before = items.len();
        items.retain(|item| !(item.state == SubmissionState::Synced && item.created_at + retention <= now));
        let pruned = before - items.len();
        if pruned > 0 {
            self.store.write(&items).await?;
        }
        Ok(pruned)
    }

    /// Reconcile on every `interval` tick while online, and right away on each
    /// offline to online transition.
    pub fn spawn_reconciler(self: Arc<Self>, interval: Duration, mut online: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut was_online = *online.borrow_and_update();

            loop {
                let run = tokio::select! {
                    _ = ticker.tick() => *online.borrow(),
                    changed = online.changed() => {
                        if changed.is_err() {
                            debug!("Connectivity monitor dropped, stopping reconciler");
                            break;
                        }
                        let now_online = *online.borrow_and_update();
                        let came_online = now_online && !was_online;
                        was_online = now_online;
                        came_online
                    }
                };

                if run {
                    if let Err(e) = self.reconcile().await {
                        warn!(error = %e, "Reconciliation pass failed");
                    }
                }
            }
        })
    }
}

fn non_empty(images: Vec<String>) -> Option<Vec<String>> {
    if images.is_empty() {
        None
    } else {
        Some(images)
    }
}

//! Manifest negotiation, per-chunk ingest, and completion.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use sureroute_event_server::EventBus;
use sureroute_netsim::{ConditionsClient, drops_packet, link_down_backoff, sample_delay};
use sureroute_protocol::{
    ChunkAck, CompleteResponse, ConditionsUpdate, DEFAULT_TRANSPORT, Event, ManifestRequest,
    ManifestResponse, NetworkConditions, Priority, SchedulerSnapshot, TelemetryEvent, TransferState, TransferStatus,
    TransferUpdateEvent,
};
use sureroute_scheduler::Scheduler;
use sureroute_transfer::{
    ChunkProgress, TransferError, TransferStore, checksum_bytes, checksum_file, digests_match,
    validate_path_component,
};
use tokio::sync::Mutex;

use crate::IngestError;

/// Default idle time after which an unfinished high-priority transfer no
/// longer keeps the scheduler in high-active mode.
pub const HIGH_PRIORITY_IDLE: Duration = Duration::from_secs(300);

/// The ingest pipeline. Shared by all request handlers.
pub struct Ingest {
    store: TransferStore,
    scheduler: Scheduler,
    conditions: ConditionsClient,
    events: EventBus,
    /// Non-completed high-priority transfers and when each was last active.
    high_priority: Mutex<HashMap<String, Instant>>,
    high_priority_idle: Duration,
}

impl Ingest {
    pub fn new(
        store: TransferStore,
        scheduler: Scheduler,
        conditions: ConditionsClient,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            scheduler,
            conditions,
            events,
            high_priority: Mutex::new(HashMap::new()),
            high_priority_idle: HIGH_PRIORITY_IDLE,
        }
    }

    /// Sets how long a high-priority transfer may stay idle before it stops
    /// counting towards the high-active flag.
    pub fn with_high_priority_idle(mut self, idle: Duration) -> Self {
        self.high_priority_idle = idle;
        self
    }

    pub fn store(&self) -> &TransferStore {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // -----------------------------------------------------------------------
    // Manifest
    // -----------------------------------------------------------------------

    /// Creates a transfer, or reconciles an existing one with what is on disk.
    ///
    /// Re-posting keeps the stored digests, updates the priority, and flips
    /// every chunk present in storage to received. Entries already marked
    /// received stay received.
    pub async fn manifest(&self, req: ManifestRequest) -> Result<ManifestResponse, IngestError> {
        let manifest = req
            .validate()
            .map_err(|e| IngestError::Validation(e.to_string()))?;
        validate_path_component(&manifest.file_name)
            .map_err(|_| IngestError::Validation("invalid manifest: bad file_name".into()))?;
        let transfer_id = match manifest.transfer_id.clone() {
            Some(id) => {
                validate_path_component(&id).map_err(|_| {
                    IngestError::Validation("invalid manifest: bad transfer_id".into())
                })?;
                id
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let state = {
            let _guard = self.store.lock(&transfer_id).await?;
            let mut state = match self.store.read_state(&transfer_id).await? {
                Some(existing) => {
                    if existing.chunks != manifest.chunks {
                        return Err(IngestError::Validation(
                            "manifest does not match existing transfer".into(),
                        ));
                    }
                    existing
                }
                None => {
                    let total = manifest.chunks.len();
                    TransferState {
                        transfer_id: transfer_id.clone(),
                        file_name: manifest.file_name,
                        file_size: manifest.file_size,
                        chunk_size: manifest.chunk_size,
                        total_chunks: total,
                        chunks: manifest.chunks,
                        global_sha256: manifest.global_sha256,
                        priority: manifest.priority,
                        received_chunks: vec![false; total],
                        completed: false,
                        transport: DEFAULT_TRANSPORT.to_string(),
                        created_at: chrono::Utc::now().timestamp_millis(),
                    }
                }
            };

            state.priority = manifest.priority;
            let present = self
                .store
                .list_present_chunks(&transfer_id, state.total_chunks)
                .await?;
            for index in present {
                state.received_chunks[index] = true;
            }
            self.store.write_state(&state).await?;
            state
        };

        let missing_chunks = state.missing_chunks();
        tracing::info!(
            transfer_id = %transfer_id,
            priority = %state.priority,
            total = state.total_chunks,
            missing = missing_chunks.len(),
            "manifest accepted"
        );

        self.track_priority(&state).await;
        self.events.publish(&Event::TransferUpdate(TransferUpdateEvent {
            transfer_id: transfer_id.clone(),
            progress: state.progress(),
            speed: 0,
            eta_secs: None,
            priority: state.priority,
            transport: state.transport.clone(),
        }));

        Ok(ManifestResponse {
            transfer_id,
            missing_chunks,
        })
    }

    // -----------------------------------------------------------------------
    // Chunks
    // -----------------------------------------------------------------------

    /// Ingests one chunk body.
    ///
    /// `index` is the raw path segment and `hash_header` the `X-Chunk-Hash`
    /// value, so that every request check happens here before a slot is
    /// taken. Failures never touch `received_chunks`.
    pub async fn upload_chunk(
        &self,
        transfer_id: &str,
        index: &str,
        hash_header: Option<&str>,
        body: &[u8],
    ) -> Result<ChunkAck, IngestError> {
        let state = self.load(transfer_id).await?;
        if state.completed {
            return Err(IngestError::AlreadyCompleted);
        }
        let index = index
            .parse::<usize>()
            .ok()
            .filter(|i| *i < state.total_chunks)
            .ok_or_else(|| IngestError::Validation("invalid chunk index".into()))?;
        let hash_header = hash_header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| IngestError::Validation("missing X-Chunk-Hash header".into()))?;
        if body.is_empty() {
            return Err(IngestError::Validation("missing binary body".into()));
        }

        let priority = state.priority;
        self.touch_priority(&state).await;
        let _slot = self
            .scheduler
            .acquire(priority)
            .await
            .map_err(|_| IngestError::ShuttingDown)?;
        let started = Instant::now();

        let cond = self.conditions.conditions().await;
        if cond.down {
            tokio::time::sleep(link_down_backoff(rand::random())).await;
            tracing::debug!(transfer_id, index, "chunk rejected: link down");
            return Err(IngestError::LinkDown);
        }

        let digest = checksum_bytes(body);
        if drops_packet(&cond, rand::random()) {
            tracing::debug!(transfer_id, index, "chunk dropped: simulated packet loss");
            return Err(IngestError::PacketLoss);
        }

        let delay = sample_delay(&cond, rand::random());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !digests_match(&digest, hash_header) || !digests_match(&digest, &state.chunks[index]) {
            tracing::warn!(
                transfer_id,
                index,
                computed = %digest,
                "chunk hash mismatch"
            );
            return Err(IngestError::ChunkHashMismatch);
        }

        self.store.write_chunk(transfer_id, index, body).await?;
        let updated = self
            .store
            .mark_chunk_received(transfer_id, index)
            .await?
            .ok_or(IngestError::NotFound)?;

        let measured = ChunkProgress::measure(
            body.len(),
            started.elapsed(),
            updated.received_count(),
            updated.total_chunks,
        );
        tracing::debug!(
            transfer_id,
            index,
            bytes = body.len(),
            speed = measured.speed,
            progress = measured.progress,
            "chunk stored"
        );

        self.events.publish(&Event::Telemetry(TelemetryEvent {
            transfer_id: transfer_id.to_string(),
            rtt_ms: delay.as_secs_f64() * 1000.0,
            packet_loss: cond.packet_loss,
            priority,
            speed: measured.speed,
        }));
        self.events.publish(&Event::TransferUpdate(TransferUpdateEvent {
            transfer_id: transfer_id.to_string(),
            progress: measured.progress,
            speed: measured.speed,
            eta_secs: Some(measured.eta_secs),
            priority,
            transport: updated.transport.clone(),
        }));

        Ok(ChunkAck {
            index,
            success: true,
        })
    }

    // -----------------------------------------------------------------------
    // Status and completion
    // -----------------------------------------------------------------------

    pub async fn status(&self, transfer_id: &str) -> Result<TransferStatus, IngestError> {
        let state = self.load(transfer_id).await?;
        Ok(TransferStatus::from(&state))
    }

    /// Assembles and verifies a fully received transfer.
    ///
    /// Safe to repeat: a completed transfer is re-assembled and re-verified
    /// and yields the same checksum and path.
    pub async fn complete(&self, transfer_id: &str) -> Result<CompleteResponse, IngestError> {
        let state = self.load(transfer_id).await?;
        if !state.all_received() {
            return Err(IngestError::MissingChunks);
        }

        let out_path = match self
            .store
            .assemble(transfer_id, state.total_chunks, &state.file_name)
            .await
        {
            Ok(p) => p,
            Err(TransferError::MissingChunk(index)) => {
                tracing::error!(
                    transfer_id,
                    index,
                    "chunk marked received is missing from storage, transfer cannot complete"
                );
                return Err(IngestError::Assembly(index));
            }
            Err(e) => return Err(e.into()),
        };

        let checksum = checksum_file(out_path.clone()).await?;
        if let Some(expected) = &state.global_sha256 {
            if !digests_match(&checksum, expected) {
                tracing::warn!(transfer_id, %checksum, %expected, "global checksum mismatch");
                return Err(IngestError::GlobalChecksumMismatch {
                    checksum,
                    expected: expected.clone(),
                });
            }
        }

        let state = self
            .store
            .update(transfer_id, |s| {
                s.completed = true;
                s.clone()
            })
            .await?
            .ok_or(IngestError::NotFound)?;

        tracing::info!(
            transfer_id,
            path = %out_path.display(),
            %checksum,
            "transfer completed"
        );
        self.track_priority(&state).await;
        self.events.publish(&Event::TransferUpdate(TransferUpdateEvent {
            transfer_id: transfer_id.to_string(),
            progress: 1.0,
            speed: 0,
            eta_secs: Some(0),
            priority: state.priority,
            transport: state.transport.clone(),
        }));

        Ok(CompleteResponse {
            ok: true,
            assembled_path: display_path(&out_path),
            checksum,
        })
    }

    pub async fn scheduler_snapshot(&self) -> Result<SchedulerSnapshot, IngestError> {
        self.scheduler
            .snapshot()
            .await
            .map_err(|_| IngestError::ShuttingDown)
    }

    // -----------------------------------------------------------------------
    // Link simulator
    // -----------------------------------------------------------------------

    /// Forwards a partial conditions update to the simulator.
    pub async fn update_conditions(
        &self,
        patch: &ConditionsUpdate,
    ) -> Result<NetworkConditions, IngestError> {
        let value = self.conditions.update_conditions(patch).await?;
        tracing::info!(
            latency_ms = value.latency_ms,
            jitter_ms = value.jitter_ms,
            packet_loss = value.packet_loss,
            down = value.down,
            "link conditions updated"
        );
        Ok(value)
    }

    /// Takes the simulated link down (`"on"`) or back up (`"off"`).
    pub async fn set_link_down(&self, state: &str) -> Result<NetworkConditions, IngestError> {
        let down = match state {
            "on" => true,
            "off" => false,
            _ => return Err(IngestError::Validation("link state must be on or off".into())),
        };
        Ok(self.conditions.set_down(down).await?)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn load(&self, transfer_id: &str) -> Result<TransferState, IngestError> {
        if validate_path_component(transfer_id).is_err() {
            return Err(IngestError::NotFound);
        }
        self.store
            .read_state(transfer_id)
            .await?
            .ok_or(IngestError::NotFound)
    }

    /// Keeps the high-priority set in step with `state` and tells the
    /// scheduler whether any high-priority transfer remains.
    async fn track_priority(&self, state: &TransferState) {
        let mut set = self.high_priority.lock().await;
        if state.priority == Priority::High && !state.completed {
            set.insert(state.transfer_id.clone(), Instant::now());
        } else {
            set.remove(&state.transfer_id);
        }
        self.prune_idle(&mut set);
        self.apply_high_active(!set.is_empty()).await;
    }

    /// Records chunk activity. The scheduler is only told when the flag flips.
    async fn touch_priority(&self, state: &TransferState) {
        let mut set = self.high_priority.lock().await;
        let was_active = !set.is_empty();
        if state.priority == Priority::High {
            set.insert(state.transfer_id.clone(), Instant::now());
        }
        self.prune_idle(&mut set);
        let active = !set.is_empty();
        if active != was_active {
            self.apply_high_active(active).await;
        }
    }

    fn prune_idle(&self, set: &mut HashMap<String, Instant>) {
        set.retain(|id, last| {
            let keep = last.elapsed() < self.high_priority_idle;
            if !keep {
                tracing::info!(transfer_id = %id, "high-priority transfer idle, limits relaxed");
            }
            keep
        });
    }

    async fn apply_high_active(&self, active: bool) {
        if self.scheduler.set_high_active(active).await.is_err() {
            tracing::debug!("scheduler stopped, high-priority flag not applied");
        }
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

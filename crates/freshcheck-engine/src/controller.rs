use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use freshcheck_contracts::analysis::{AnalysisFailure, AnalysisResult};
use freshcheck_contracts::capture::{CapturedImage, MediaError};
use freshcheck_contracts::events::{EventPayload, EventWriter};
use freshcheck_contracts::session::{SessionEvent, SessionProvider, Subscription};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::acquire::{MediaAcquirer, SelectedFile};
use crate::analyze::AnalysisRequestBuilder;
use crate::persist::{HistoryPersister, PersistenceError, SaveAck};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Empty,
    Analyzing,
    Analyzed,
    Saved,
}

/// Handle for one analysis run. Only the newest ticket can still deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisTicket {
    generation: u64,
}

impl AnalysisTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct AnalysisDelivery {
    generation: u64,
    result: AnalysisResult,
}

struct ScanState {
    acquirer: MediaAcquirer,
    generation: u64,
    result: Option<AnalysisResult>,
    saved: bool,
    in_flight: usize,
}

impl ScanState {
    fn clear(&mut self) {
        self.acquirer.reset();
        self.generation += 1;
        self.result = None;
        self.saved = false;
    }
}

struct Shared {
    state: Mutex<ScanState>,
    events: EventWriter,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_session(&self, event: &SessionEvent) {
        if !matches!(event, SessionEvent::SignedOut) {
            return;
        }
        let generation = {
            let mut state = self.state();
            state.clear();
            state.generation
        };
        let mut payload = EventPayload::new();
        payload.insert("generation".to_string(), json!(generation));
        self.events.note("signed_out", payload);
    }
}

/// Capture → analyze → save pipeline for the single capture slot.
///
/// Analysis runs on a worker thread and reports back over a channel. Every
/// capture, reset and sign-out bumps the generation; deliveries tagged with
/// an older generation are dropped.
pub struct ScanController {
    shared: Arc<Shared>,
    analyzer: AnalysisRequestBuilder,
    persister: Option<HistoryPersister>,
    session: Arc<dyn SessionProvider>,
    sender: mpsc::Sender<AnalysisDelivery>,
    receiver: mpsc::Receiver<AnalysisDelivery>,
    _subscription: Subscription,
}

impl ScanController {
    pub fn new(
        acquirer: MediaAcquirer,
        analyzer: AnalysisRequestBuilder,
        persister: Option<HistoryPersister>,
        session: Arc<dyn SessionProvider>,
        events: EventWriter,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ScanState {
                acquirer,
                generation: 0,
                result: None,
                saved: false,
                in_flight: 0,
            }),
            events,
        });
        let listener = Arc::clone(&shared);
        let subscription = session.on_change(Box::new(move |event| listener.on_session(event)));
        let (sender, receiver) = mpsc::channel();
        Self {
            shared,
            analyzer,
            persister,
            session,
            sender,
            receiver,
            _subscription: subscription,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        let state = self.shared.state();
        if state.saved {
            ScanPhase::Saved
        } else if state.result.is_some() {
            ScanPhase::Analyzed
        } else if state.acquirer.current().is_some() {
            ScanPhase::Analyzing
        } else {
            ScanPhase::Empty
        }
    }

    pub fn generation(&self) -> u64 {
        self.shared.state().generation
    }

    pub fn current_image(&self) -> Option<CapturedImage> {
        self.shared.state().acquirer.current().cloned()
    }

    pub fn result(&self) -> Option<AnalysisResult> {
        self.shared.state().result.clone()
    }

    pub fn live_display_uris(&self) -> usize {
        self.shared.state().acquirer.uris().live_count()
    }

    pub fn capture_file(&self, file: SelectedFile) -> Result<AnalysisTicket, MediaError> {
        let mut state = self.shared.state();
        let image = state.acquirer.acquire_from_file(file)?;
        Ok(self.begin_analysis(&mut state, image))
    }

    pub fn capture_camera(&self) -> Result<AnalysisTicket, MediaError> {
        let mut state = self.shared.state();
        let image = state.acquirer.acquire_from_camera()?;
        Ok(self.begin_analysis(&mut state, image))
    }

    pub fn cancel_camera(&self) {
        self.shared.state().acquirer.cancel_camera();
    }

    /// Drops the capture and any result; in-flight analysis becomes stale.
    pub fn reset(&self) {
        let generation = {
            let mut state = self.shared.state();
            state.clear();
            state.generation
        };
        let mut payload = EventPayload::new();
        payload.insert("generation".to_string(), json!(generation));
        self.shared.events.note("capture_reset", payload);
    }

    fn begin_analysis(&self, state: &mut ScanState, image: CapturedImage) -> AnalysisTicket {
        state.generation += 1;
        state.result = None;
        state.saved = false;
        state.in_flight += 1;
        let generation = state.generation;

        let mut payload = EventPayload::new();
        payload.insert("generation".to_string(), json!(generation));
        payload.insert("file_name".to_string(), json!(image.file_name()));
        payload.insert("mime_type".to_string(), json!(image.mime_type()));
        payload.insert("bytes".to_string(), json!(image.len()));
        payload.insert("sha256".to_string(), json!(sha256_hex(image.bytes())));
        self.shared.events.note("image_captured", payload);

        let mut payload = EventPayload::new();
        payload.insert("generation".to_string(), json!(generation));
        payload.insert("provider".to_string(), json!(self.analyzer.provider_name()));
        payload.insert("model".to_string(), json!(self.analyzer.model()));
        self.shared.events.note("analysis_started", payload);

        let analyzer = self.analyzer.clone();
        let sender = self.sender.clone();
        let spawned = thread::Builder::new()
            .name(format!("freshcheck-analysis-{generation}"))
            .spawn({
                let sender = sender.clone();
                move || {
                    let result = analyzer.analyze(&image);
                    let _ = sender.send(AnalysisDelivery { generation, result });
                }
            });
        if let Err(err) = spawned {
            let mut payload = EventPayload::new();
            payload.insert("error".to_string(), json!(err.to_string()));
            self.shared.events.note("analysis_spawn_failed", payload);
            let _ = sender.send(AnalysisDelivery {
                generation,
                result: AnalysisFailure::unexpected().into(),
            });
        }
        AnalysisTicket { generation }
    }

    /// Applies any deliveries that have already arrived. Returns the
    /// accepted result, if one arrived.
    pub fn poll(&self) -> Option<AnalysisResult> {
        let mut accepted = None;
        while let Ok(delivery) = self.receiver.try_recv() {
            if let Some(result) = self.apply(delivery) {
                accepted = Some(result);
            }
        }
        accepted
    }

    /// Blocks until the ticket's analysis lands. `None` once the ticket has
    /// been superseded by a newer capture, a reset or a sign-out.
    pub fn wait(&self, ticket: &AnalysisTicket) -> Option<AnalysisResult> {
        loop {
            {
                let state = self.shared.state();
                if state.generation != ticket.generation {
                    return None;
                }
                if let Some(result) = state.result.as_ref() {
                    return Some(result.clone());
                }
                if state.in_flight == 0 {
                    return None;
                }
            }
            let delivery = self.receiver.recv().ok()?;
            self.apply(delivery);
        }
    }

    /// Blocks until every spawned analysis has reported back.
    pub fn settle(&self) {
        while self.shared.state().in_flight > 0 {
            match self.receiver.recv() {
                Ok(delivery) => {
                    self.apply(delivery);
                }
                Err(_) => return,
            }
        }
    }

    fn apply(&self, delivery: AnalysisDelivery) -> Option<AnalysisResult> {
        let mut state = self.shared.state();
        state.in_flight = state.in_flight.saturating_sub(1);
        let mut payload = EventPayload::new();
        payload.insert("generation".to_string(), json!(delivery.generation));
        if delivery.generation != state.generation {
            payload.insert("current_generation".to_string(), json!(state.generation));
            drop(state);
            self.shared.events.note("analysis_discarded", payload);
            return None;
        }
        let outcome = match &delivery.result {
            AnalysisResult::Success(_) => "success",
            AnalysisResult::Failure(failure) => failure.kind.as_str(),
        };
        payload.insert("outcome".to_string(), json!(outcome));
        state.result = Some(delivery.result.clone());
        drop(state);
        self.shared.events.note("analysis_completed", payload);
        Some(delivery.result)
    }

    /// Persists the current capture and its successful analysis under the
    /// signed-in identity. A slot saves at most once.
    pub fn save(&self) -> Result<SaveAck, PersistenceError> {
        let persister = self
            .persister
            .as_ref()
            .ok_or(PersistenceError::Unavailable)?;
        let owner = self.session.current().ok_or(PersistenceError::MissingData)?;
        let (generation, image, assessment) = {
            let state = self.shared.state();
            if state.saved {
                return Err(PersistenceError::AlreadySaved);
            }
            let image = state
                .acquirer
                .current()
                .cloned()
                .ok_or(PersistenceError::MissingData)?;
            let assessment = state
                .result
                .as_ref()
                .and_then(AnalysisResult::assessment)
                .cloned()
                .ok_or(PersistenceError::MissingData)?;
            (state.generation, image, assessment)
        };

        let ack = persister.save(&image, &assessment, &owner)?;
        let mut state = self.shared.state();
        if state.generation == generation {
            state.saved = true;
        }
        Ok(ack)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

//! Feed controller: the composition root of a viewing session.
//!
//! Owns the session state, the mode machine and the recall scheduler, and wires
//! them to storage and narration. Every public action is synchronous and applies
//! its effect to local state immediately. Persistence, narration and timers run
//! as background tasks whose results come back through [`FeedController::next_event`].

use chrono::{Local, NaiveTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::backend::{blocking, FeedStore, StoreError};
use super::mode::{
    AmbientLight, InteractionMode, InteractionModeMachine, ModeChange, SundowningMonitor,
    SundowningSchedule, TapSensitivity, VoiceCommand,
};
use super::narration::{Narration, NarrationError, NarrationRequest, NarrationService};
use super::persist::{WriteFailure, WriteQueue};
use super::policy::{FeedSession, ScoringParams, SelectionPolicy, WriteOp};
use super::recall::{RecallPromptScheduler, RecallResponse};
use crate::config::{EchoConfig, MAX_PERSIST_RETRIES};
use crate::memory::types::Memory;

/// Runtime knobs for one session, resolved from [`EchoConfig`].
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub patient_id: String,
    pub initial_batch_size: usize,
    pub top_up_batch_size: usize,
    pub prefetch_distance: usize,
    pub narration_delay: Duration,
    pub recall_prompt_delay: Duration,
    pub fixation_cooldown: chrono::Duration,
    pub scoring: ScoringParams,
    pub persist_retries: u32,
    pub tap_sensitivity: TapSensitivity,
    pub missed_tap_window: Duration,
    pub sundowning: SundowningSchedule,
    pub sundowning_check: Duration,
    /// Local wall-clock source for the sundowning check.
    pub local_clock: fn() -> NaiveTime,
    pub voice_id: String,
}

fn local_time() -> NaiveTime {
    Local::now().time()
}

impl FeedSettings {
    pub fn from_config(config: &EchoConfig) -> Self {
        let mut scheduling = config.scheduling.clone();
        scheduling.validate();
        let fixation_cooldown = chrono::Duration::try_hours(scheduling.fixation_cooldown_hours)
            .unwrap_or_else(|| chrono::Duration::hours(24));

        Self {
            patient_id: config.storage.patient_id.clone(),
            initial_batch_size: config.feed.initial_batch_size.max(1),
            top_up_batch_size: config.feed.top_up_batch_size.max(1),
            prefetch_distance: config.feed.prefetch_distance,
            narration_delay: Duration::from_millis(config.feed.narration_delay_ms),
            recall_prompt_delay: Duration::from_millis(config.feed.recall_prompt_delay_ms),
            fixation_cooldown,
            scoring: ScoringParams::from_config(&scheduling),
            persist_retries: scheduling.persist_retries.min(MAX_PERSIST_RETRIES),
            tap_sensitivity: config.adaptation.tap_sensitivity,
            missed_tap_window: Duration::from_millis(config.adaptation.missed_tap_window_ms),
            sundowning: SundowningSchedule::parse(&config.adaptation.sundowning_time),
            // Time-of-day flags must be re-checked at least once a minute.
            sundowning_check: Duration::from_secs(
                config.adaptation.sundowning_check_secs.clamp(1, 60),
            ),
            local_clock: local_time,
            voice_id: config.narration.voice_id.clone(),
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self::from_config(&EchoConfig::default())
    }
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    ModeChanged(ModeChange),
    SundowningChanged(bool),
    AmbientLightChanged(AmbientLight),
    /// Ask "do you remember this?" about the current memory.
    RecallPrompt {
        memory_id: String,
    },
    Narration {
        memory_id: String,
        script: String,
        audio_ref: String,
    },
    /// Something failed in the background. The feed keeps going.
    Warning(String),
}

/// Result of handling a voice transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceOutcome {
    pub command: VoiceCommand,
    /// Phrase to speak back to the patient.
    pub acknowledgement: String,
}

enum Wake {
    RecallPromptDue {
        ticket: u64,
    },
    NarrationReady {
        memory_id: String,
        result: Result<Narration, NarrationError>,
    },
    SundowningTick(NaiveTime),
    PoolRefreshed(Result<Vec<Memory>, StoreError>),
    WriteFailed(WriteFailure),
}

pub struct FeedController {
    settings: FeedSettings,
    store: Arc<dyn FeedStore>,
    narrator: Arc<dyn NarrationService>,
    policy: SelectionPolicy,
    rng: StdRng,
    session: FeedSession,
    mode: InteractionModeMachine,
    recall: RecallPromptScheduler,
    sundowning: SundowningMonitor,
    ambient_light: AmbientLight,
    writes: Option<WriteQueue>,
    wake_tx: mpsc::UnboundedSender<Wake>,
    wake_rx: mpsc::UnboundedReceiver<Wake>,
    events: VecDeque<FeedEvent>,
    prompt_timer: Option<JoinHandle<()>>,
    narration_task: Option<JoinHandle<()>>,
    sundowning_task: Option<JoinHandle<()>>,
    refresh_in_flight: bool,
}

impl FeedController {
    /// Load the candidate pool and recall history, then show the first memory.
    ///
    /// Storage failures here degrade to an empty feed plus a warning event.
    pub async fn start(
        settings: FeedSettings,
        store: Arc<dyn FeedStore>,
        narrator: Arc<dyn NarrationService>,
    ) -> Self {
        Self::start_with_rng(settings, store, narrator, StdRng::from_os_rng()).await
    }

    pub async fn start_with_rng(
        settings: FeedSettings,
        store: Arc<dyn FeedStore>,
        narrator: Arc<dyn NarrationService>,
        rng: StdRng,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let mut events = VecDeque::new();
        let patient_id = settings.patient_id.clone();

        let pid = patient_id.clone();
        let pool = match blocking(&store, move |s| s.list_eligible(&pid, Utc::now())).await {
            Ok(pool) => pool,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load candidate pool");
                events.push_back(FeedEvent::Warning(format!("could not load memories: {e}")));
                Vec::new()
            }
        };

        let pid = patient_id.clone();
        let recalled = match blocking(&store, move |s| s.list_recalled(&pid)).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load recall history");
                events.push_back(FeedEvent::Warning(format!(
                    "could not load recall history: {e}"
                )));
                HashSet::new()
            }
        };
        tracing::info!(
            patient_id = %patient_id,
            pool = pool.len(),
            previously_recalled = recalled.len(),
            "feed session starting"
        );

        let failure_tx = wake_tx.clone();
        let writes = WriteQueue::spawn(Arc::clone(&store), settings.persist_retries, move |f| {
            let _ = failure_tx.send(Wake::WriteFailed(f));
        });

        let mut controller = Self {
            policy: SelectionPolicy::new(settings.scoring.clone()),
            rng,
            session: FeedSession::new(patient_id, pool, recalled),
            mode: InteractionModeMachine::new(settings.tap_sensitivity, settings.missed_tap_window),
            recall: RecallPromptScheduler::new(settings.recall_prompt_delay),
            sundowning: SundowningMonitor::new(settings.sundowning),
            ambient_light: AmbientLight::Bright,
            writes: Some(writes),
            wake_tx,
            wake_rx,
            events,
            prompt_timer: None,
            narration_task: None,
            sundowning_task: None,
            refresh_in_flight: false,
            settings,
            store,
            narrator,
        };

        let batch = controller.session.next_batch(
            &controller.policy,
            controller.settings.initial_batch_size,
            Utc::now(),
            &mut controller.rng,
        );
        controller.session.append(batch);
        controller.top_up_if_needed();
        controller.start_sundowning_clock();
        controller.enter_current();
        controller
    }

    pub fn current(&self) -> Option<&Memory> {
        self.session.current()
    }

    pub fn index(&self) -> usize {
        self.session.index()
    }

    /// The materialized feed so far.
    pub fn sequence(&self) -> &[Memory] {
        self.session.sequence()
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode.mode()
    }

    pub fn sundowning_active(&self) -> bool {
        self.sundowning.is_active()
    }

    pub fn ambient_light(&self) -> AmbientLight {
        self.ambient_light
    }

    /// Memory the visible recall prompt is asking about, if one is showing.
    pub fn visible_prompt(&self) -> Option<&str> {
        self.recall.visible()
    }

    pub fn is_liked(&self, memory_id: &str) -> bool {
        self.session.is_liked(memory_id)
    }

    pub fn is_recalled(&self, memory_id: &str) -> bool {
        self.session.is_recalled(memory_id)
    }

    /// Move to `index`. Returns `false` when the index is unchanged or out of range.
    pub fn go_to(&mut self, index: usize) -> bool {
        let from = self.session.index();
        if index == from || index >= self.session.sequence().len() {
            return false;
        }
        if index > from {
            if let Some(op) = self.session.skip_write() {
                self.submit(op);
            }
        }
        self.session.go_to(index);
        self.top_up_if_needed();
        self.enter_current();
        true
    }

    pub fn next(&mut self) -> bool {
        self.go_to(self.session.index() + 1)
    }

    pub fn previous(&mut self) -> bool {
        match self.session.index().checked_sub(1) {
            Some(index) => self.go_to(index),
            None => false,
        }
    }

    /// Toggle like on the current memory. Returns the new liked state.
    pub fn like(&mut self) -> Option<bool> {
        let (liked, writes) = self
            .session
            .toggle_like(Utc::now(), self.settings.fixation_cooldown)?;
        self.submit_all(writes);
        Some(liked)
    }

    /// Toggle recall on the current memory. Returns the new recalled state.
    pub fn recall(&mut self) -> Option<bool> {
        let (recalled, writes) = self.session.toggle_recall()?;
        self.submit_all(writes);
        self.schedule_recall_prompt();
        Some(recalled)
    }

    /// Answer the visible recall prompt. Returns `false` when no prompt is showing.
    pub fn respond_to_prompt(&mut self, response: RecallResponse) -> bool {
        let Some(decision) = self.recall.respond(response) else {
            return false;
        };
        tracing::info!(
            memory_id = %decision.memory_id,
            remembered = !decision.clear_cooldown,
            "recall prompt answered"
        );
        if decision.clear_cooldown {
            let op = self.session.mark_forgotten(&decision.memory_id);
            self.submit(op);
        }
        true
    }

    pub fn register_tap(&mut self, hit_target: bool) -> Option<ModeChange> {
        let change = self.mode.register_tap(hit_target);
        self.emit_mode_change(change);
        change
    }

    pub fn activate_voice_mode(&mut self) -> Option<ModeChange> {
        let change = self.mode.activate_voice_mode();
        self.emit_mode_change(change);
        change
    }

    pub fn reset_voice_mode(&mut self) -> Option<ModeChange> {
        let change = self.mode.reset_voice_mode();
        self.emit_mode_change(change);
        change
    }

    /// Execute a spoken command. Recognized commands also leave voice-assist.
    pub fn voice_command(&mut self, transcript: &str) -> VoiceOutcome {
        let command = VoiceCommand::parse(transcript);
        let acknowledgement = match command {
            VoiceCommand::Next => {
                if self.next() {
                    "Next memory"
                } else {
                    "No more memories"
                }
            }
            VoiceCommand::Like => {
                self.like();
                "Liked"
            }
            VoiceCommand::Recall => {
                self.recall();
                "Recalled"
            }
            VoiceCommand::Unrecognized => {
                tracing::debug!(transcript = %transcript, "voice command not recognized");
                return VoiceOutcome {
                    command,
                    acknowledgement: format!(
                        "I heard {transcript}. Try saying Next, Like, or Recall."
                    ),
                };
            }
        };
        self.reset_voice_mode();
        VoiceOutcome {
            command,
            acknowledgement: acknowledgement.to_string(),
        }
    }

    /// Feed an illuminance reading. Emits an event when the band changes.
    pub fn observe_ambient_light(&mut self, lux: f64) -> AmbientLight {
        let level = AmbientLight::from_lux(lux);
        if level != self.ambient_light {
            self.ambient_light = level;
            self.events.push_back(FeedEvent::AmbientLightChanged(level));
        }
        level
    }

    /// Wait for the next notification. Cancel-safe.
    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            let wake = self.wake_rx.recv().await?;
            self.handle_wake(wake);
        }
    }

    /// Stop timers and wait for queued writes to land.
    pub async fn close(mut self) {
        self.cancel_view_tasks();
        if let Some(task) = self.sundowning_task.take() {
            task.abort();
        }
        if let Some(writes) = self.writes.take() {
            writes.shutdown().await;
        }
        tracing::info!("feed session closed");
    }

    fn handle_wake(&mut self, wake: Wake) {
        match wake {
            Wake::RecallPromptDue { ticket } => {
                if let Some(memory_id) = self.recall.fire(ticket) {
                    tracing::debug!(memory_id = %memory_id, "recall prompt shown");
                    self.events.push_back(FeedEvent::RecallPrompt { memory_id });
                }
            }
            Wake::NarrationReady { memory_id, result } => {
                self.finish_narration(memory_id, result);
            }
            Wake::SundowningTick(time) => {
                if let Some(active) = self.sundowning.evaluate(time) {
                    self.events.push_back(FeedEvent::SundowningChanged(active));
                }
            }
            Wake::PoolRefreshed(result) => {
                self.refresh_in_flight = false;
                match result {
                    Ok(pool) => {
                        tracing::debug!(pool = pool.len(), "candidate pool refreshed");
                        self.session.replace_pool(pool);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "candidate pool refresh failed");
                        self.events
                            .push_back(FeedEvent::Warning(format!("could not refresh memories: {e}")));
                    }
                }
            }
            Wake::WriteFailed(failure) => {
                self.events.push_back(FeedEvent::Warning(format!(
                    "could not save {} for memory {}: {}",
                    failure.op.kind(),
                    failure.op.memory_id(),
                    failure.error
                )));
            }
        }
    }

    fn finish_narration(&mut self, memory_id: String, result: Result<Narration, NarrationError>) {
        if self.session.current().map(|m| m.id.as_str()) != Some(memory_id.as_str()) {
            tracing::debug!(memory_id = %memory_id, "stale narration discarded");
            return;
        }
        match result {
            Ok(narration) => {
                self.session
                    .set_narration(&memory_id, &narration.script, &narration.audio_ref);
                self.submit(WriteOp::SaveNarration {
                    memory_id: memory_id.clone(),
                    script: narration.script.clone(),
                    audio_ref: narration.audio_ref.clone(),
                });
                self.events.push_back(FeedEvent::Narration {
                    memory_id,
                    script: narration.script,
                    audio_ref: narration.audio_ref,
                });
            }
            Err(e) => {
                tracing::warn!(memory_id = %memory_id, error = %e, "narration failed");
                self.events
                    .push_back(FeedEvent::Warning(format!("narration unavailable: {e}")));
            }
        }
    }

    /// Per-view work for whatever memory is now current.
    fn enter_current(&mut self) {
        self.cancel_view_tasks();
        self.schedule_recall_prompt();

        let Some(current) = self.session.current() else {
            return;
        };
        if current.needs_narration() && self.narrator.is_enabled() {
            let request = NarrationRequest {
                memory_id: current.id.clone(),
                image_ref: current.media_url.clone(),
                voice_id: self.settings.voice_id.clone(),
                script: current.script.clone(),
            };
            self.schedule_narration(request);
        }
    }

    fn schedule_recall_prompt(&mut self) {
        if let Some(timer) = self.prompt_timer.take() {
            timer.abort();
        }
        let Some(current) = self.session.current() else {
            self.recall.cancel();
            return;
        };
        let memory_id = current.id.clone();
        let pending = self.recall.on_current_changed(
            &memory_id,
            self.session.was_previously_recalled(&memory_id),
            self.session.is_recalled(&memory_id),
            Instant::now(),
        );

        if let Some(pending) = pending {
            let tx = self.wake_tx.clone();
            self.prompt_timer = Some(tokio::spawn(async move {
                tokio::time::sleep_until(pending.due).await;
                let _ = tx.send(Wake::RecallPromptDue {
                    ticket: pending.ticket,
                });
            }));
        }
    }

    /// Single generation attempt for this view, after a short settle delay.
    fn schedule_narration(&mut self, request: NarrationRequest) {
        let tx = self.wake_tx.clone();
        let narrator = Arc::clone(&self.narrator);
        let delay = self.settings.narration_delay;
        self.narration_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = narrator.generate(&request).await;
            let _ = tx.send(Wake::NarrationReady {
                memory_id: request.memory_id,
                result,
            });
        }));
    }

    fn top_up_if_needed(&mut self) {
        if !self.session.needs_top_up(self.settings.prefetch_distance) {
            return;
        }
        let batch = self.session.next_batch(
            &self.policy,
            self.settings.top_up_batch_size,
            Utc::now(),
            &mut self.rng,
        );
        let added = self.session.append(batch);
        tracing::debug!(added, total = self.session.sequence().len(), "feed topped up");
        self.refresh_pool();
    }

    /// Re-read the eligible pool so lapsed cooldowns rejoin later top-ups.
    fn refresh_pool(&mut self) {
        if self.refresh_in_flight {
            return;
        }
        self.refresh_in_flight = true;

        let store = Arc::clone(&self.store);
        let tx = self.wake_tx.clone();
        let patient_id = self.session.patient_id().to_string();
        tokio::spawn(async move {
            let result = blocking(&store, move |s| s.list_eligible(&patient_id, Utc::now())).await;
            let _ = tx.send(Wake::PoolRefreshed(result));
        });
    }

    fn start_sundowning_clock(&mut self) {
        if !self.sundowning.schedule().is_enabled() {
            return;
        }
        let clock = self.settings.local_clock;
        if let Some(active) = self.sundowning.evaluate(clock()) {
            self.events.push_back(FeedEvent::SundowningChanged(active));
        }

        let tx = self.wake_tx.clone();
        let period = self.settings.sundowning_check;
        self.sundowning_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(Wake::SundowningTick(clock())).is_err() {
                    break;
                }
            }
        }));
    }

    fn emit_mode_change(&mut self, change: Option<ModeChange>) {
        if let Some(change) = change {
            self.events.push_back(FeedEvent::ModeChanged(change));
        }
    }

    fn submit(&self, op: WriteOp) {
        if let Some(writes) = &self.writes {
            writes.submit(op);
        }
    }

    fn submit_all(&self, ops: Vec<WriteOp>) {
        for op in ops {
            self.submit(op);
        }
    }

    fn cancel_view_tasks(&mut self) {
        if let Some(timer) = self.prompt_timer.take() {
            timer.abort();
        }
        if let Some(task) = self.narration_task.take() {
            task.abort();
        }
    }
}

impl Drop for FeedController {
    fn drop(&mut self) {
        self.cancel_view_tasks();
        if let Some(task) = self.sundowning_task.take() {
            task.abort();
        }
    }
}

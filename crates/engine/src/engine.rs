//! The decision orchestrator.
//!
//! `decide` runs the full pipeline: delivery-window enforcement,
//! guardrail probe, candidate grid, strategy propensities, signal
//! scoring, blended pick, uplift gate, then side effects (event and
//! exposure rows, budget consumption, state persistence). `feedback`
//! writes the outcome row first, then fans the reward out to every
//! strategy with per-strategy failure isolation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, Timelike, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use nudge_bandits::{bandit_blob_name, BanditSet};
use nudge_core::config::BanditKind;
use nudge_core::{
    Arm, ArmAxes, Category, Channel, Contribution, Daypart, DecisionReason, DecisionRequest,
    DecisionResponse, EngineConfig, ExposureRecord, NudgeEvent, NudgeResult, Tone,
};
use nudge_guardrails::{CheckMode, GuardrailEngine, GuardrailState, GUARDRAIL_BLOB};
use nudge_signals::{
    check_window, context_line, ContentItem, ContentSource, DeliveryWindowSource, EmpiricalRates,
    SegmentSource, SequenceModel, SimilarityScorer, StaticContent, StaticSegments, StaticWindows,
    WindowCheck, DEFAULT_TEXT,
};
use nudge_store::{
    EventLog, ExposureLog, FileEventLog, FileExposureLog, FilePassiveLog, FileStateStore,
    MemoryEventLog, MemoryExposureLog, MemoryPassiveLog, MemoryStateStore, PassiveLog, StateStore,
};
use nudge_uplift::{UpliftTable, UpliftTrainer, UPLIFT_BLOB};

use crate::blend::{Blender, SignalBundle};

/// The persistence surfaces one engine reads and writes.
pub struct EngineStores {
    pub state: Arc<dyn StateStore>,
    pub events: Arc<dyn EventLog>,
    pub exposures: Arc<dyn ExposureLog>,
    pub passives: Arc<dyn PassiveLog>,
}

impl EngineStores {
    /// File-backed stores under one root: state blobs as
    /// `<root>/<name>.json`, logs as CSV files beside them.
    pub fn file(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            state: Arc::new(FileStateStore::new(root)),
            events: Arc::new(FileEventLog::new(root.join("events.csv"))),
            exposures: Arc::new(FileExposureLog::new(root.join("exposures.csv"))),
            passives: Arc::new(FilePassiveLog::new(root.join("passive.csv"))),
        }
    }

    /// Everything in memory, for tests and ephemeral runs.
    pub fn memory() -> Self {
        Self {
            state: Arc::new(MemoryStateStore::new()),
            events: Arc::new(MemoryEventLog::new()),
            exposures: Arc::new(MemoryExposureLog::new()),
            passives: Arc::new(MemoryPassiveLog::new()),
        }
    }
}

/// What one feedback application touched. Strategy updates are
/// isolated, so a failed snapshot shows up here instead of blocking
/// the remaining strategies.
#[derive(Debug, Default)]
pub struct FeedbackReport {
    pub updated: Vec<BanditKind>,
    pub failed: Vec<(BanditKind, String)>,
    pub guardrail_updated: bool,
}

/// Point-in-time introspection for one arm, with no side effects.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Diagnosis {
    pub arm: String,
    pub category: Category,
    pub quiet: bool,
    pub budget_remaining: u32,
    pub cooldown_remaining_s: u64,
    pub escalation_remaining_s: u64,
    pub propensity: f64,
    pub threshold: f64,
    pub uplift: f64,
    pub tau: f64,
    pub window: WindowCheck,
}

pub struct NudgeEngine {
    cfg: EngineConfig,
    store: Arc<dyn StateStore>,
    events: Arc<dyn EventLog>,
    exposures: Arc<dyn ExposureLog>,
    passives: Arc<dyn PassiveLog>,
    bandits: BanditSet,
    guardrails: GuardrailEngine,
    uplift: UpliftTable,
    empirical: EmpiricalRates,
    similarity: SimilarityScorer,
    blender: Blender,
    content: Arc<dyn ContentSource>,
    segments: Arc<dyn SegmentSource>,
    windows: Arc<dyn DeliveryWindowSource>,
    trace: DashMap<Uuid, DecisionResponse>,
}

impl NudgeEngine {
    /// Restore an engine from persisted state. Missing or unreadable
    /// blobs fall back to fresh priors rather than failing startup.
    pub fn new(cfg: EngineConfig, stores: EngineStores) -> NudgeResult<Self> {
        let EngineStores {
            state,
            events,
            exposures,
            passives,
        } = stores;

        let bandits = BanditSet::restore(&cfg.bandit, |kind| {
            state
                .load::<serde_json::Value>(&bandit_blob_name(kind))
                .ok()
                .flatten()
        });
        let guardrail_state = state
            .load::<GuardrailState>(GUARDRAIL_BLOB)?
            .unwrap_or_default();
        let guardrails = GuardrailEngine::restore(&cfg.policy, &cfg.feedback, guardrail_state);
        let uplift = state
            .load::<UpliftTable>(UPLIFT_BLOB)?
            .unwrap_or_else(|| UpliftTable::new(cfg.uplift.default_uplift));

        let empirical = EmpiricalRates::new(&cfg.signals.empirical);
        let similarity = SimilarityScorer::new(&cfg.signals.similarity);
        let blender = Blender::new(&cfg.blend);
        let content: Arc<dyn ContentSource> = Arc::new(StaticContent::new(&cfg.content));
        let segments: Arc<dyn SegmentSource> = Arc::new(StaticSegments::baseline());
        let windows: Arc<dyn DeliveryWindowSource> = Arc::new(StaticWindows::new(&cfg.windows));

        Ok(Self {
            cfg,
            store: state,
            events,
            exposures,
            passives,
            bandits,
            guardrails,
            uplift,
            empirical,
            similarity,
            blender,
            content,
            segments,
            windows,
            trace: DashMap::new(),
        })
    }

    pub fn with_content(mut self, content: Arc<dyn ContentSource>) -> Self {
        self.content = content;
        self
    }

    pub fn with_segments(mut self, segments: Arc<dyn SegmentSource>) -> Self {
        self.segments = segments;
        self
    }

    pub fn with_windows(mut self, windows: Arc<dyn DeliveryWindowSource>) -> Self {
        self.windows = windows;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn bandits(&self) -> &BanditSet {
        &self.bandits
    }

    pub fn bandits_mut(&mut self) -> &mut BanditSet {
        &mut self.bandits
    }

    pub fn uplift_table(&self) -> &UpliftTable {
        &self.uplift
    }

    /// A previously issued decision, looked up by id.
    pub fn trace(&self, id: &Uuid) -> Option<DecisionResponse> {
        self.trace.get(id).map(|r| r.clone())
    }

    // ─── Decide ─────────────────────────────────────────────────────────

    pub fn decide(&mut self, request: &DecisionRequest) -> NudgeResult<DecisionResponse> {
        let now = request.now.unwrap_or_else(|| Local::now().naive_local());
        let ts = request
            .now
            .map(|n| n.and_utc().timestamp())
            .unwrap_or_else(|| Utc::now().timestamp());
        let decided_at = request.now.map(|n| n.and_utc()).unwrap_or_else(Utc::now);

        let category = request.category;
        let daypart = Daypart::from_hour(now.hour());
        let bias = self.segments.current_bias();
        let threshold = self.cfg.policy.send_threshold + bias.threshold_delta;
        let tau = self.cfg.tau_for(category);

        // Window enforcement runs before guardrails so an out-of-window
        // answer never consumes anything. A category with no configured
        // hours is unrestricted.
        let hours = self.windows.allowed_hours(category);
        if self.cfg.windows.enforce && !hours.is_empty() {
            let check = check_window(&hours, now.hour());
            if !check.in_window {
                debug!(%category, hour = now.hour(), "outside delivery window");
                let response = self.refusal(
                    category,
                    DecisionReason::OutsideWindow,
                    threshold,
                    tau,
                    self.guardrails.budget_remaining(now),
                    None,
                    None,
                    decided_at,
                );
                return Ok(self.finish(response));
            }
        }

        let probe = self.guardrails.check(category, now, CheckMode::DryRun);
        if !probe.allowed {
            let response = self.refusal(
                category,
                probe.reason,
                threshold,
                tau,
                probe.budget_remaining,
                nonzero(probe.cooldown_remaining_s),
                nonzero(probe.escalation_remaining_s),
                decided_at,
            );
            return Ok(self.finish(response));
        }

        let candidates = self.candidate_grid(request, daypart);
        if candidates.is_empty() {
            let response = self.refusal(
                category,
                DecisionReason::NoCandidates,
                threshold,
                tau,
                probe.budget_remaining,
                None,
                None,
                decided_at,
            );
            return Ok(self.finish(response));
        }

        let kind = request.strategy.unwrap_or(self.cfg.bandit.strategy);
        let propensity = self.bandits.strategy_mut(kind).scores(&candidates);

        let events = self.events.read_all()?;
        let context = context_line(request.context_text.as_deref(), category, &bias.segment);
        let in_window = check_window(&hours, now.hour()).in_window;

        let mut bundle = SignalBundle {
            propensity,
            empirical: self.empirical.score_candidates(&events, &candidates, ts),
            sequence: SequenceModel::train(&self.cfg.signals.sequence, &events, ts)
                .score_candidates(&candidates),
            ..Default::default()
        };
        let mut copy: BTreeMap<String, ContentItem> = BTreeMap::new();
        for arm in &candidates {
            let key = arm.key();
            let item = self
                .content
                .content(arm.category, arm.tone, &context)
                .unwrap_or_else(|| ContentItem::new(arm.category, DEFAULT_TEXT));
            bundle
                .similarity
                .insert(key.clone(), self.similarity.score(&context, &item));
            bundle.uplift.insert(key.clone(), self.uplift.estimate(arm));
            bundle.in_window.insert(key.clone(), in_window);
            copy.insert(key, item);
        }
        bundle.bias = bias;

        let Some(pick) = self.blender.pick(&candidates, &bundle, threshold) else {
            // Every candidate was gated; report the closest miss.
            let mut best_key = String::new();
            let mut best_p = 0.0;
            for (key, &p) in &bundle.propensity {
                if best_key.is_empty() || p > best_p {
                    best_key = key.clone();
                    best_p = p;
                }
            }
            debug!(threshold, propensity = best_p, "no candidate cleared the gates");
            let mut response = self.refusal(
                category,
                DecisionReason::BelowThreshold,
                threshold,
                tau,
                probe.budget_remaining,
                None,
                None,
                decided_at,
            );
            response.arm = (!best_key.is_empty()).then_some(best_key);
            response.propensity = best_p;
            response.explanation = vec![Contribution {
                signal: "below_threshold".to_string(),
                value: -(threshold - best_p).abs(),
            }];
            return Ok(self.finish(response));
        };

        let winner = pick.arm;
        let key = winner.key();
        let p_winner = bundle.propensity.get(&key).copied().unwrap_or(0.0);
        let estimate = bundle
            .uplift
            .get(&key)
            .copied()
            .unwrap_or(self.cfg.uplift.default_uplift);

        if estimate < tau {
            // Logged as a control row even on dry runs so the trainer
            // sees the suppressed exposure.
            self.exposures
                .append(&ExposureRecord::new(ts, &winner, false, p_winner, "low_uplift"))?;
            info!(arm = %winner, uplift = estimate, tau, "uplift gate suppressed send");
            let mut response = self.refusal(
                category,
                DecisionReason::LowUplift,
                threshold,
                tau,
                probe.budget_remaining,
                None,
                None,
                decided_at,
            );
            response.arm = Some(key);
            response.score = pick.score;
            response.propensity = p_winner;
            response.uplift = Some(estimate);
            response.explanation = pick.explanation;
            return Ok(self.finish(response));
        }

        let text = copy
            .get(&key)
            .map(|item| item.text.clone())
            .unwrap_or_else(|| DEFAULT_TEXT.to_string());

        let outcome = if request.dry_run {
            probe
        } else {
            let outcome = self.guardrails.check(category, now, CheckMode::Commit);
            self.events.append(&NudgeEvent::exposure(ts, key.as_str()))?;
            self.exposures
                .append(&ExposureRecord::new(ts, &winner, true, p_winner, "send"))?;
            self.store.save(GUARDRAIL_BLOB, self.guardrails.state())?;
            outcome
        };

        let response = DecisionResponse {
            decision_id: Uuid::new_v4(),
            allowed: true,
            reason: DecisionReason::Ok,
            category,
            arm: Some(key),
            score: pick.score,
            propensity: p_winner,
            threshold,
            uplift: Some(estimate),
            tau,
            text: Some(text),
            explanation: pick.explanation,
            budget_remaining: outcome.budget_remaining,
            cooldown_remaining_s: None,
            escalation_remaining_s: None,
            decided_at,
        };
        info!(
            decision = %response.decision_id,
            arm = %winner,
            score = response.score,
            propensity = p_winner,
            dry_run = request.dry_run,
            "nudge selected"
        );
        Ok(self.finish(response))
    }

    // ─── Feedback ───────────────────────────────────────────────────────

    /// Record an observed outcome for an arm at the current time.
    pub fn feedback(&mut self, arm_key: &str, reward: f64) -> NudgeResult<FeedbackReport> {
        self.feedback_at(arm_key, reward, Local::now().naive_local())
    }

    /// Record an observed outcome at an explicit time. The event row is
    /// the durable record: nothing else happens if it cannot be
    /// written, and later per-strategy failures are reported rather
    /// than propagated.
    pub fn feedback_at(
        &mut self,
        arm_key: &str,
        reward: f64,
        now: NaiveDateTime,
    ) -> NudgeResult<FeedbackReport> {
        let reward = reward.clamp(0.0, 1.0);
        let ts = now.and_utc().timestamp();

        self.events.append(&NudgeEvent::outcome(ts, arm_key, reward))?;

        let mut report = FeedbackReport::default();
        match arm_key.parse::<Arm>() {
            Ok(arm) => {
                for kind in BanditKind::ALL {
                    match self.apply_feedback(kind, &arm, reward) {
                        Ok(()) => report.updated.push(kind),
                        Err(err) => {
                            warn!(strategy = %kind, error = %err, "strategy update failed");
                            report.failed.push((kind, err.to_string()));
                        }
                    }
                }
            }
            Err(err) => {
                warn!(arm = arm_key, error = %err, "bandits not updated");
            }
        }

        if let Some(category) = ArmAxes::parse(arm_key).category {
            self.guardrails.record_outcome(category, reward, now);
            match self.store.save(GUARDRAIL_BLOB, self.guardrails.state()) {
                Ok(()) => report.guardrail_updated = true,
                Err(err) => warn!(error = %err, "guardrail state save failed"),
            }
        }

        info!(
            arm = arm_key,
            reward,
            updated = report.updated.len(),
            failed = report.failed.len(),
            "feedback applied"
        );
        Ok(report)
    }

    fn apply_feedback(&mut self, kind: BanditKind, arm: &Arm, reward: f64) -> NudgeResult<()> {
        let strategy = self.bandits.strategy_mut(kind);
        strategy.update(arm, reward);
        let blob = strategy.snapshot()?;
        self.store.save(&bandit_blob_name(kind), &blob)
    }

    // ─── Offline Training ───────────────────────────────────────────────

    /// Retrain the uplift table from the logs, persist it and serve it
    /// immediately.
    pub fn train_uplift(&mut self) -> NudgeResult<UpliftTable> {
        let exposures = self.exposures.read_all()?;
        let events = self.events.read_all()?;
        let passives = self.passives.read_all()?;

        let table = UpliftTrainer::new(&self.cfg.uplift).train(&exposures, &events, &passives);
        self.store.save(UPLIFT_BLOB, &table)?;
        self.uplift = table.clone();
        Ok(table)
    }

    // ─── Introspection ──────────────────────────────────────────────────

    /// Why would a send at `now` be allowed or blocked, and by how much.
    pub fn diagnose(
        &mut self,
        category: Category,
        tone: Tone,
        channel: Channel,
        now: NaiveDateTime,
    ) -> Diagnosis {
        let arm = Arm::new(Daypart::from_hour(now.hour()), tone, channel, category);
        let kind = self.cfg.bandit.strategy;
        let scores = self
            .bandits
            .strategy_mut(kind)
            .scores(std::slice::from_ref(&arm));
        let (cooldown_remaining_s, escalation_remaining_s) =
            self.guardrails.remaining(category, now);
        let bias = self.segments.current_bias();

        Diagnosis {
            arm: arm.key(),
            category,
            quiet: self.guardrails.in_quiet(now),
            budget_remaining: self.guardrails.budget_remaining(now),
            cooldown_remaining_s,
            escalation_remaining_s,
            propensity: scores.get(&arm.key()).copied().unwrap_or(0.0),
            threshold: self.cfg.policy.send_threshold + bias.threshold_delta,
            uplift: self.uplift.estimate(&arm),
            tau: self.cfg.tau_for(category),
            window: check_window(&self.windows.allowed_hours(category), now.hour()),
        }
    }

    /// Per-feature contributions of the logistic model for an arm.
    pub fn explain(&self, arm: &Arm) -> Vec<(String, f64)> {
        self.bandits.logistic().contributions(arm)
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn candidate_grid(&self, request: &DecisionRequest, daypart: Daypart) -> Vec<Arm> {
        let tones: Vec<Tone> = match request.tone {
            Some(tone) => vec![tone],
            None if !request.grid_tones.is_empty() => request.grid_tones.clone(),
            None => self.cfg.policy.grid_tones.clone(),
        };
        let channels: Vec<Channel> = match request.channel {
            Some(channel) => vec![channel],
            None if !request.grid_channels.is_empty() => request.grid_channels.clone(),
            None => self.cfg.policy.grid_channels.clone(),
        };

        let mut grid = Vec::with_capacity(tones.len() * channels.len());
        for &tone in &tones {
            for &channel in &channels {
                grid.push(Arm::new(daypart, tone, channel, request.category));
            }
        }
        grid
    }

    #[allow(clippy::too_many_arguments)]
    fn refusal(
        &self,
        category: Category,
        reason: DecisionReason,
        threshold: f64,
        tau: f64,
        budget_remaining: u32,
        cooldown_remaining_s: Option<u64>,
        escalation_remaining_s: Option<u64>,
        decided_at: DateTime<Utc>,
    ) -> DecisionResponse {
        DecisionResponse {
            decision_id: Uuid::new_v4(),
            allowed: false,
            reason,
            category,
            arm: None,
            score: 0.0,
            propensity: 0.0,
            threshold,
            uplift: None,
            tau,
            text: None,
            explanation: Vec::new(),
            budget_remaining,
            cooldown_remaining_s,
            escalation_remaining_s,
            decided_at,
        }
    }

    fn finish(&self, response: DecisionResponse) -> DecisionResponse {
        self.trace.insert(response.decision_id, response.clone());
        response
    }
}

fn nonzero(v: u64) -> Option<u64> {
    (v > 0).then_some(v)
}

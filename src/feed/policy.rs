//! Memory selection and cooldown policy.
//!
//! Ranking is deliberately inverted relative to an engagement feed: older and
//! less-engaged memories score higher, and every like or recall counts against a
//! memory's chance of resurfacing. Scores feed a weighted random sample
//! (Efraimidis-Spirakis keys), so the bias is statistical rather than a fixed order.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::SchedulingConfig;
use crate::memory::types::{InteractionType, Memory};

/// How strongly under-seen content is favored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoveltyWeight {
    Low,
    Medium,
    High,
}

impl NoveltyWeight {
    pub fn multiplier(self) -> f64 {
        match self {
            Self::Low => 0.5,
            Self::Medium => 1.0,
            Self::High => 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoringParams {
    pub novelty_weight: NoveltyWeight,
    /// Score subtracted per unit of engagement.
    pub engagement_penalty: f64,
    /// Upper bound (exclusive) of the uniform jitter added to each score.
    pub max_jitter: f64,
    /// Softmax temperature turning score gaps into sampling weights.
    pub temperature: f64,
}

impl ScoringParams {
    pub fn from_config(config: &SchedulingConfig) -> Self {
        Self {
            novelty_weight: config.novelty_weight,
            engagement_penalty: config.engagement_penalty,
            max_jitter: config.max_jitter,
            temperature: config.score_temperature,
        }
    }
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self::from_config(&SchedulingConfig::default())
    }
}

/// Older and less-engaged memories earn a larger bonus.
pub fn age_bonus(memory: &Memory, now: DateTime<Utc>) -> f64 {
    let age_days = (now - memory.created_at).num_seconds().max(0) as f64 / 86_400.0;
    (1.0 + age_days).ln() * 10.0 + 20.0 / (1.0 + f64::from(memory.engagement_count))
}

/// `multiplier * age_bonus - penalty * engagement + jitter`.
pub fn novelty_score<R: Rng + ?Sized>(
    memory: &Memory,
    now: DateTime<Utc>,
    params: &ScoringParams,
    rng: &mut R,
) -> f64 {
    let jitter = if params.max_jitter.is_finite() && params.max_jitter > 0.0 {
        rng.random_range(0.0..params.max_jitter)
    } else {
        0.0
    };
    params.novelty_weight.multiplier() * age_bonus(memory, now)
        - params.engagement_penalty * f64::from(memory.engagement_count)
        + jitter
}

/// Weighted random sampling over novelty scores.
#[derive(Debug, Clone, Default)]
pub struct SelectionPolicy {
    params: ScoringParams,
}

impl SelectionPolicy {
    pub fn new(params: ScoringParams) -> Self {
        Self { params }
    }

    /// Draw up to `count` distinct candidates without replacement. Returns fewer
    /// when the candidate list is shorter; an empty list yields an empty sample.
    pub fn sample<'a, R: Rng + ?Sized>(
        &self,
        candidates: Vec<&'a Memory>,
        count: usize,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<&'a Memory> {
        if candidates.is_empty() || count == 0 {
            return Vec::new();
        }

        let scores: Vec<f64> = candidates
            .iter()
            .map(|m| novelty_score(m, now, &self.params, rng))
            .collect();
        let max_score = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let temperature = if self.params.temperature > 0.0 {
            self.params.temperature
        } else {
            1.0
        };

        let mut keyed: Vec<(f64, &'a Memory)> = candidates
            .into_iter()
            .zip(scores)
            .map(|(memory, score)| {
                let weight = ((score - max_score) / temperature).exp().max(f64::MIN_POSITIVE);
                // u in (0, 1]; larger keys win.
                let u = 1.0 - rng.random::<f64>();
                (u.ln() / weight, memory)
            })
            .collect();

        keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
        keyed.truncate(count);
        keyed.into_iter().map(|(_, memory)| memory).collect()
    }
}

/// A persistence write produced by a session action.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    IncrementEngagement {
        memory_id: String,
    },
    SetCooldown {
        memory_id: String,
        until: Option<DateTime<Utc>>,
    },
    AppendInteraction {
        memory_id: String,
        patient_id: String,
        interaction_type: InteractionType,
    },
    SaveNarration {
        memory_id: String,
        script: String,
        audio_ref: String,
    },
}

impl WriteOp {
    pub fn memory_id(&self) -> &str {
        match self {
            Self::IncrementEngagement { memory_id }
            | Self::SetCooldown { memory_id, .. }
            | Self::AppendInteraction { memory_id, .. }
            | Self::SaveNarration { memory_id, .. } => memory_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::IncrementEngagement { .. } => "increment_engagement",
            Self::SetCooldown { .. } => "set_cooldown",
            Self::AppendInteraction { .. } => "append_interaction",
            Self::SaveNarration { .. } => "save_narration",
        }
    }
}

/// Per-session feed state, owned by the controller.
///
/// Holds a snapshot of the eligible pool, the materialized sequence, and the
/// session toggles. Cooldowns written during the session are mirrored locally so
/// top-ups respect them before the store round-trips.
#[derive(Debug)]
pub struct FeedSession {
    patient_id: String,
    pool: Vec<Memory>,
    sequence: Vec<Memory>,
    index: usize,
    shown: HashSet<String>,
    liked: HashSet<String>,
    like_counted: HashSet<String>,
    recalled: HashSet<String>,
    recall_logged: HashSet<String>,
    previously_recalled: HashSet<String>,
    cooldown_overrides: HashMap<String, Option<DateTime<Utc>>>,
}

impl FeedSession {
    pub fn new(
        patient_id: impl Into<String>,
        pool: Vec<Memory>,
        previously_recalled: HashSet<String>,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            pool,
            sequence: Vec::new(),
            index: 0,
            shown: HashSet::new(),
            liked: HashSet::new(),
            like_counted: HashSet::new(),
            recalled: HashSet::new(),
            recall_logged: HashSet::new(),
            previously_recalled,
            cooldown_overrides: HashMap::new(),
        }
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn sequence(&self) -> &[Memory] {
        &self.sequence
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&Memory> {
        self.sequence.get(self.index)
    }

    pub fn is_liked(&self, memory_id: &str) -> bool {
        self.liked.contains(memory_id)
    }

    pub fn is_recalled(&self, memory_id: &str) -> bool {
        self.recalled.contains(memory_id)
    }

    pub fn was_previously_recalled(&self, memory_id: &str) -> bool {
        self.previously_recalled.contains(memory_id)
    }

    /// Swap in a freshly fetched eligible pool.
    pub fn replace_pool(&mut self, pool: Vec<Memory>) {
        self.pool = pool;
    }

    fn effective_cooldown<'m>(&'m self, memory: &'m Memory) -> Option<&'m DateTime<Utc>> {
        match self.cooldown_overrides.get(&memory.id) {
            Some(local) => local.as_ref(),
            None => memory.cooldown_until.as_ref(),
        }
    }

    fn is_eligible_locally(&self, memory: &Memory, now: DateTime<Utc>) -> bool {
        match self.effective_cooldown(memory) {
            Some(until) => *until <= now,
            None => true,
        }
    }

    /// Pick the next batch to materialize.
    ///
    /// Prefers eligible memories not yet shown this session. Once those run out it
    /// repeats eligible memories, avoiding an immediate back-to-back repeat when
    /// it can. With no eligible memory at all it cycles through what the session
    /// has already shown rather than stalling.
    pub fn next_batch<R: Rng + ?Sized>(
        &self,
        policy: &SelectionPolicy,
        count: usize,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<Memory> {
        let eligible: Vec<&Memory> = self
            .pool
            .iter()
            .filter(|m| self.is_eligible_locally(m, now))
            .collect();

        let fresh: Vec<&Memory> = eligible
            .iter()
            .copied()
            .filter(|m| !self.shown.contains(&m.id))
            .collect();
        if !fresh.is_empty() {
            return owned(policy.sample(fresh, count, now, rng));
        }

        let fallback: Vec<&Memory> = if eligible.is_empty() {
            let mut seen = HashSet::new();
            self.sequence
                .iter()
                .filter(|m| seen.insert(m.id.as_str()))
                .collect()
        } else {
            eligible
        };
        if fallback.is_empty() {
            return Vec::new();
        }

        tracing::debug!(candidates = fallback.len(), "eligible pool exhausted in session, allowing repeats");
        let tail = self.sequence.last().map(|m| m.id.as_str());
        let repeats: Vec<&Memory> = if fallback.len() > 1 {
            fallback
                .into_iter()
                .filter(|m| Some(m.id.as_str()) != tail)
                .collect()
        } else {
            fallback
        };
        owned(policy.sample(repeats, count, now, rng))
    }

    /// Append memories to the materialized sequence. Returns how many were added.
    pub fn append(&mut self, batch: Vec<Memory>) -> usize {
        let added = batch.len();
        for memory in batch {
            self.shown.insert(memory.id.clone());
            self.sequence.push(memory);
        }
        added
    }

    /// Whether the position is close enough to the end to warrant a top-up.
    pub fn needs_top_up(&self, prefetch_distance: usize) -> bool {
        self.index + prefetch_distance >= self.sequence.len()
    }

    /// Jump to `index`. Returns `false` when out of range or unchanged.
    pub fn go_to(&mut self, index: usize) -> bool {
        if index >= self.sequence.len() || index == self.index {
            return false;
        }
        self.index = index;
        true
    }

    /// Skip entry for leaving the current memory without engaging with it.
    pub fn skip_write(&self) -> Option<WriteOp> {
        let current = self.current()?;
        if self.liked.contains(&current.id) || self.recalled.contains(&current.id) {
            return None;
        }
        Some(WriteOp::AppendInteraction {
            memory_id: current.id.clone(),
            patient_id: self.patient_id.clone(),
            interaction_type: InteractionType::Skip,
        })
    }

    /// Toggle like on the current memory.
    ///
    /// The first like in a session bumps engagement, starts the fixation cooldown
    /// and logs the interaction. Unliking is local only, and liking again in the
    /// same session writes nothing.
    pub fn toggle_like(
        &mut self,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Option<(bool, Vec<WriteOp>)> {
        let memory_id = self.current()?.id.clone();

        if !self.liked.insert(memory_id.clone()) {
            self.liked.remove(&memory_id);
            return Some((false, Vec::new()));
        }
        if !self.like_counted.insert(memory_id.clone()) {
            return Some((true, Vec::new()));
        }

        let mut writes = vec![WriteOp::IncrementEngagement {
            memory_id: memory_id.clone(),
        }];
        match now.checked_add_signed(cooldown) {
            Some(until) => {
                self.cooldown_overrides.insert(memory_id.clone(), Some(until));
                writes.push(WriteOp::SetCooldown {
                    memory_id: memory_id.clone(),
                    until: Some(until),
                });
            }
            None => {
                tracing::warn!(memory_id = %memory_id, "fixation cooldown out of range, not applied");
            }
        }
        writes.push(WriteOp::AppendInteraction {
            memory_id,
            patient_id: self.patient_id.clone(),
            interaction_type: InteractionType::Like,
        });
        Some((true, writes))
    }

    /// Toggle recall on the current memory.
    ///
    /// The first recall in a session bumps engagement and appends a `recall` log
    /// entry. Cooldown is left alone. Un-recalling is local only.
    pub fn toggle_recall(&mut self) -> Option<(bool, Vec<WriteOp>)> {
        let memory_id = self.current()?.id.clone();

        if !self.recalled.insert(memory_id.clone()) {
            self.recalled.remove(&memory_id);
            return Some((false, Vec::new()));
        }
        if !self.recall_logged.insert(memory_id.clone()) {
            return Some((true, Vec::new()));
        }

        self.previously_recalled.insert(memory_id.clone());
        let writes = vec![
            WriteOp::IncrementEngagement {
                memory_id: memory_id.clone(),
            },
            WriteOp::AppendInteraction {
                memory_id,
                patient_id: self.patient_id.clone(),
                interaction_type: InteractionType::Recall,
            },
        ];
        Some((true, writes))
    }

    /// The patient did not remember `memory_id`: lift its cooldown entirely.
    pub fn mark_forgotten(&mut self, memory_id: &str) -> WriteOp {
        self.cooldown_overrides.insert(memory_id.to_string(), None);
        WriteOp::SetCooldown {
            memory_id: memory_id.to_string(),
            until: None,
        }
    }

    /// Cache generated narration on every materialized copy of `memory_id`.
    pub fn set_narration(&mut self, memory_id: &str, script: &str, audio_ref: &str) {
        for memory in self
            .sequence
            .iter_mut()
            .chain(self.pool.iter_mut())
            .filter(|m| m.id == memory_id)
        {
            memory.script = Some(script.to_string());
            memory.audio_url = Some(audio_ref.to_string());
        }
    }
}

fn owned(batch: Vec<&Memory>) -> Vec<Memory> {
    batch.into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{ApprovalStatus, MediaType};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn memory(id: &str, engagement: u32, now: DateTime<Utc>) -> Memory {
        Memory {
            id: id.into(),
            patient_id: "p1".into(),
            media_type: MediaType::Photo,
            media_url: format!("https://x/{id}.jpg"),
            status: ApprovalStatus::Approved,
            script: None,
            audio_url: None,
            cooldown_until: None,
            engagement_count: engagement,
            created_at: now,
            updated_at: now,
        }
    }

    fn params(weight: NoveltyWeight) -> ScoringParams {
        ScoringParams {
            novelty_weight: weight,
            ..ScoringParams::default()
        }
    }

    #[test]
    fn engagement_lowers_score() {
        let now = Utc::now();
        let p = ScoringParams {
            max_jitter: 0.0,
            ..ScoringParams::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let fresh = novelty_score(&memory("a", 0, now), now, &p, &mut rng);
        let engaged = novelty_score(&memory("b", 3, now), now, &p, &mut rng);
        assert!(fresh > engaged);
    }

    #[test]
    fn older_memories_score_higher() {
        let now = Utc::now();
        let mut old = memory("old", 0, now);
        old.created_at = now - Duration::days(365);
        assert!(age_bonus(&old, now) > age_bonus(&memory("new", 0, now), now));
    }

    #[test]
    fn sample_returns_distinct_items_up_to_count() {
        let now = Utc::now();
        let pool: Vec<Memory> = (0..6).map(|i| memory(&format!("m{i}"), i, now)).collect();
        let policy = SelectionPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);

        let picked = policy.sample(pool.iter().collect(), 4, now, &mut rng);
        assert_eq!(picked.len(), 4);
        let ids: HashSet<&str> = picked.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids.len(), 4);

        let all = policy.sample(pool.iter().collect(), 50, now, &mut rng);
        assert_eq!(all.len(), 6);
        assert!(policy.sample(Vec::new(), 3, now, &mut rng).is_empty());
    }

    #[test]
    fn single_memory_pool_fills_batch_of_one() {
        let now = Utc::now();
        let session = FeedSession::new("p1", vec![memory("only", 0, now)], HashSet::new());
        let mut rng = StdRng::seed_from_u64(3);
        let batch = session.next_batch(&SelectionPolicy::default(), 10, now, &mut rng);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, "only");
    }

    fn low_engagement_share(weight: NoveltyWeight, trials: usize, seed: u64) -> f64 {
        let now = Utc::now();
        let mut pool = vec![memory("fresh-0", 0, now), memory("fresh-1", 0, now)];
        pool.extend((0..8).map(|i| memory(&format!("seen-{i}"), 1, now)));

        let policy = SelectionPolicy::new(params(weight));
        let mut rng = StdRng::seed_from_u64(seed);
        let mut hits = 0usize;
        for _ in 0..trials {
            let picked = policy.sample(pool.iter().collect(), 1, now, &mut rng);
            if picked[0].engagement_count == 0 {
                hits += 1;
            }
        }
        hits as f64 / trials as f64
    }

    #[test]
    fn high_novelty_favors_low_engagement_more_than_low_novelty() {
        let high = low_engagement_share(NoveltyWeight::High, 2000, 11);
        let medium = low_engagement_share(NoveltyWeight::Medium, 2000, 12);
        let low = low_engagement_share(NoveltyWeight::Low, 2000, 13);

        // Two of ten items are unengaged, so a uniform draw lands near 0.2.
        assert!(low > 0.2, "low novelty still prefers unseen content: {low}");
        assert!(medium > low, "medium {medium} should beat low {low}");
        assert!(high > medium, "high {high} should beat medium {medium}");
        assert!(high - low > 0.15, "gap too small: high {high}, low {low}");
    }

    #[test]
    fn top_ups_skip_already_shown_then_repeat() {
        let now = Utc::now();
        let pool = vec![memory("a", 0, now), memory("b", 0, now), memory("c", 0, now)];
        let mut session = FeedSession::new("p1", pool, HashSet::new());
        let policy = SelectionPolicy::default();
        let mut rng = StdRng::seed_from_u64(5);

        let first = session.next_batch(&policy, 2, now, &mut rng);
        session.append(first);
        let second = session.next_batch(&policy, 5, now, &mut rng);
        assert_eq!(second.len(), 1, "only one unseen memory remains");
        session.append(second);
        assert_eq!(session.sequence().len(), 3);

        // Everything shown: repeats are allowed but never back-to-back.
        let tail = session.sequence().last().unwrap().id.clone();
        let repeats = session.next_batch(&policy, 5, now, &mut rng);
        assert_eq!(repeats.len(), 2);
        assert!(repeats.iter().all(|m| m.id != tail));
    }

    #[test]
    fn unbounded_jitter_is_ignored() {
        let now = Utc::now();
        let pool = vec![memory("a", 0, now), memory("b", 2, now)];
        let policy = SelectionPolicy::new(ScoringParams {
            max_jitter: f64::INFINITY,
            ..ScoringParams::default()
        });
        let mut rng = StdRng::seed_from_u64(2);
        let picked = policy.sample(pool.iter().collect(), 2, now, &mut rng);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn overflowing_cooldown_still_records_the_like() {
        let now = Utc::now();
        let mut session = FeedSession::new("p1", vec![memory("a", 0, now)], HashSet::new());
        let mut rng = StdRng::seed_from_u64(4);
        let batch = session.next_batch(&SelectionPolicy::default(), 1, now, &mut rng);
        session.append(batch);

        let (liked, writes) = session.toggle_like(now, Duration::MAX).unwrap();
        assert!(liked);
        let kinds: Vec<&str> = writes.iter().map(WriteOp::kind).collect();
        assert_eq!(kinds, vec!["increment_engagement", "append_interaction"]);
    }

    #[test]
    fn liked_memory_leaves_the_pool_locally() {
        let now = Utc::now();
        let pool = vec![memory("a", 0, now), memory("b", 0, now)];
        let mut session = FeedSession::new("p1", pool, HashSet::new());
        let policy = SelectionPolicy::default();
        let mut rng = StdRng::seed_from_u64(9);

        let batch = session.next_batch(&policy, 2, now, &mut rng);
        session.append(batch);
        let liked_id = session.current().unwrap().id.clone();
        session.toggle_like(now, Duration::hours(24)).unwrap();

        for _ in 0..10 {
            let repeats = session.next_batch(&policy, 5, now, &mut rng);
            assert!(repeats.iter().all(|m| m.id != liked_id));
        }
    }

    #[test]
    fn empty_eligible_pool_repeats_session_items() {
        let now = Utc::now();
        let mut session = FeedSession::new("p1", vec![memory("a", 0, now)], HashSet::new());
        let policy = SelectionPolicy::default();
        let mut rng = StdRng::seed_from_u64(2);

        let batch = session.next_batch(&policy, 10, now, &mut rng);
        session.append(batch);
        session.toggle_like(now, Duration::hours(24)).unwrap();

        let repeats = session.next_batch(&policy, 5, now, &mut rng);
        assert_eq!(repeats.len(), 1);
        assert_eq!(repeats[0].id, "a");
    }

    #[test]
    fn like_toggle_writes_once_per_session() {
        let now = Utc::now();
        let mut session = FeedSession::new("p1", vec![memory("a", 0, now)], HashSet::new());
        let mut rng = StdRng::seed_from_u64(4);
        let batch = session.next_batch(&SelectionPolicy::default(), 1, now, &mut rng);
        session.append(batch);

        let (liked, writes) = session.toggle_like(now, Duration::hours(24)).unwrap();
        assert!(liked);
        assert_eq!(writes.len(), 3);
        assert!(writes.contains(&WriteOp::SetCooldown {
            memory_id: "a".into(),
            until: Some(now + Duration::hours(24)),
        }));

        let (liked, writes) = session.toggle_like(now, Duration::hours(24)).unwrap();
        assert!(!liked);
        assert!(writes.is_empty());

        let (liked, writes) = session.toggle_like(now, Duration::hours(24)).unwrap();
        assert!(liked);
        assert!(writes.is_empty());
    }

    #[test]
    fn recall_toggle_logs_without_touching_cooldown() {
        let now = Utc::now();
        let mut session = FeedSession::new("p1", vec![memory("a", 0, now)], HashSet::new());
        let mut rng = StdRng::seed_from_u64(4);
        let batch = session.next_batch(&SelectionPolicy::default(), 1, now, &mut rng);
        session.append(batch);

        let (recalled, writes) = session.toggle_recall().unwrap();
        assert!(recalled);
        assert!(session.was_previously_recalled("a"));
        assert!(writes
            .iter()
            .all(|w| !matches!(w, WriteOp::SetCooldown { .. })));
        assert!(writes.contains(&WriteOp::AppendInteraction {
            memory_id: "a".into(),
            patient_id: "p1".into(),
            interaction_type: InteractionType::Recall,
        }));

        assert!(session.toggle_recall().unwrap().1.is_empty());
        assert!(session.toggle_recall().unwrap().1.is_empty());
    }

    #[test]
    fn skip_is_only_logged_for_unengaged_memories() {
        let now = Utc::now();
        let mut session = FeedSession::new("p1", vec![memory("a", 0, now)], HashSet::new());
        let mut rng = StdRng::seed_from_u64(4);
        let batch = session.next_batch(&SelectionPolicy::default(), 1, now, &mut rng);
        session.append(batch);

        assert!(session.skip_write().is_some());
        session.toggle_recall();
        assert!(session.skip_write().is_none());
    }

    #[test]
    fn top_up_trigger_uses_prefetch_distance() {
        let now = Utc::now();
        let pool: Vec<Memory> = (0..10).map(|i| memory(&format!("m{i}"), 0, now)).collect();
        let mut session = FeedSession::new("p1", pool, HashSet::new());
        let mut rng = StdRng::seed_from_u64(8);
        let batch = session.next_batch(&SelectionPolicy::default(), 10, now, &mut rng);
        session.append(batch);

        assert!(!session.needs_top_up(3));
        assert!(session.go_to(6));
        assert!(!session.needs_top_up(3));
        assert!(session.go_to(7));
        assert!(session.needs_top_up(3));
        assert!(!session.go_to(10));
    }
}

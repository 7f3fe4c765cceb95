//! Complexity classification and adaptive sample budgets.
//!
//! Classification is an ordered list of `(predicate, tier)` rules; the first
//! match wins and unmatched descriptors fall back to `Medium`. A geometry size
//! proxy can only raise the tier. After a render, measured noise above the
//! tier's threshold buys one re-render with a bumped budget, at most once per
//! sample. The set of bumped samples is bounded; the oldest entries are
//! forgotten first.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use image::DynamicImage;
use regex::Regex;
use rqv_models::{ComplexityClass, SampleId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{WorkerError, WorkerResult};

/// Part/scene description the classifier looks at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    /// Free-text part descriptor, e.g. "3001 brick 2x4"
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    /// Largest bounding-box extent in millimetres
    #[serde(default)]
    pub largest_extent_mm: Option<f64>,
}

impl SceneDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
            largest_extent_mm: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_extent(mut self, extent_mm: f64) -> Self {
        self.largest_extent_mm = Some(extent_mm);
        self
    }
}

/// Which descriptor field a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    Color,
    Name,
}

/// One classification rule.
#[derive(Debug, Clone)]
pub struct ComplexityRule {
    pub name: &'static str,
    pub field: RuleField,
    pattern: Regex,
    pub tier: ComplexityClass,
}

impl ComplexityRule {
    pub fn new(name: &'static str, field: RuleField, pattern: &str, tier: ComplexityClass) -> WorkerResult<Self> {
        let pattern = Regex::new(&format!("(?i){}", pattern))
            .map_err(|e| WorkerError::config_error(format!("rule '{}': {}", name, e)))?;
        Ok(Self {
            name,
            field,
            pattern,
            tier,
        })
    }

    fn matches(&self, descriptor: &SceneDescriptor) -> bool {
        match self.field {
            RuleField::Name => self.pattern.is_match(&descriptor.name),
            RuleField::Color => descriptor
                .color
                .as_deref()
                .is_some_and(|c| self.pattern.is_match(c)),
        }
    }
}

/// Rules in priority order.
pub fn default_rules() -> WorkerResult<Vec<ComplexityRule>> {
    use ComplexityClass::*;
    Ok(vec![
        ComplexityRule::new(
            "color_override",
            RuleField::Color,
            r"^trans[-_ ]|chrome|pearl|metallic|glitter|glass|mirror",
            TransparentReflective,
        )?,
        ComplexityRule::new(
            "transparent_reflective",
            RuleField::Name,
            r"transparent|translucent|glass|chrome|mirror|reflective|crystal|windscreen|lens",
            TransparentReflective,
        )?,
        ComplexityRule::new(
            "complex",
            RuleField::Name,
            r"technic|gear|engine|mechanical|hinge|chain|spring|axle|minifig|printed|pattern",
            Complex,
        )?,
        ComplexityRule::new(
            "medium",
            RuleField::Name,
            r"slope|curved|arch|round|cylinder|cone|dome|wedge|wheel",
            Medium,
        )?,
        ComplexityRule::new(
            "simple",
            RuleField::Name,
            r"\b(plate|tile|brick|block|flat|panel)\b",
            Simple,
        )?,
    ])
}

/// Noise thresholds per tier (high-pass residual std, normalised to [0, 1]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseThresholds {
    pub simple: f64,
    pub medium: f64,
    pub complex: f64,
    pub transparent_reflective: f64,
}

impl Default for NoiseThresholds {
    fn default() -> Self {
        Self {
            simple: 0.030,
            medium: 0.035,
            complex: 0.040,
            transparent_reflective: 0.050,
        }
    }
}

impl NoiseThresholds {
    pub fn for_tier(&self, tier: ComplexityClass) -> f64 {
        match tier {
            ComplexityClass::Simple => self.simple,
            ComplexityClass::Medium => self.medium,
            ComplexityClass::Complex => self.complex,
            ComplexityClass::TransparentReflective => self.transparent_reflective,
        }
    }
}

/// Sampler settings from the validation config document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub noise_thresholds: NoiseThresholds,
    /// Extent at which a part is at least `Medium`
    pub medium_extent_mm: f64,
    /// Extent at which a part is at least `Complex`
    pub complex_extent_mm: f64,
    /// Bumped sample ids remembered by a long-running worker
    pub bump_memory: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            noise_thresholds: NoiseThresholds::default(),
            medium_extent_mm: 40.0,
            complex_extent_mm: 120.0,
            bump_memory: 10_000,
        }
    }
}

/// Tier and budget chosen for a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetDecision {
    pub tier: ComplexityClass,
    pub budget: u32,
    /// Rule that matched, `None` for the fallback
    pub matched_rule: Option<&'static str>,
}

/// Additive bump for a noise measurement against a threshold.
pub fn noise_bump(noise: f64, threshold: f64) -> u32 {
    if !(noise > threshold) || threshold <= 0.0 {
        return 0;
    }
    let ratio = noise / threshold;
    if ratio <= 1.25 {
        16
    } else if ratio <= 1.5 {
        32
    } else {
        64
    }
}

/// Insertion-ordered set that drops its oldest id past `capacity`.
#[derive(Debug, Default)]
struct BumpLedger {
    seen: HashSet<SampleId>,
    order: VecDeque<SampleId>,
    capacity: usize,
}

impl BumpLedger {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ..Default::default()
        }
    }

    /// False when `id` is already present.
    fn insert(&mut self, id: &SampleId) -> bool {
        if !self.seen.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id.clone());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    fn contains(&self, id: &SampleId) -> bool {
        self.seen.contains(id)
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Classifier plus once-per-sample noise feedback.
pub struct AdaptiveSampler {
    rules: Vec<ComplexityRule>,
    config: SamplerConfig,
    bumped: Mutex<BumpLedger>,
}

impl AdaptiveSampler {
    pub fn new(config: SamplerConfig) -> WorkerResult<Self> {
        Ok(Self::with_rules(default_rules()?, config))
    }

    pub fn with_rules(rules: Vec<ComplexityRule>, config: SamplerConfig) -> Self {
        Self {
            bumped: Mutex::new(BumpLedger::new(config.bump_memory)),
            rules,
            config,
        }
    }

    fn size_floor(&self, descriptor: &SceneDescriptor) -> ComplexityClass {
        match descriptor.largest_extent_mm {
            Some(e) if e >= self.config.complex_extent_mm => ComplexityClass::Complex,
            Some(e) if e >= self.config.medium_extent_mm => ComplexityClass::Medium,
            _ => ComplexityClass::Simple,
        }
    }

    /// Classify a descriptor. Deterministic.
    pub fn classify(&self, descriptor: &SceneDescriptor) -> BudgetDecision {
        let matched = self.rules.iter().find(|r| r.matches(descriptor));
        let tier = matched
            .map(|r| r.tier)
            .unwrap_or_default()
            .raise_to(self.size_floor(descriptor));

        BudgetDecision {
            tier,
            budget: tier.sample_budget(),
            matched_rule: matched.map(|r| r.name),
        }
    }

    pub fn choose_sample_budget(&self, descriptor: &SceneDescriptor) -> u32 {
        self.classify(descriptor).budget
    }

    /// Record a measured noise level. Returns the additional samples for one
    /// re-render, or 0 when noise is acceptable or the sample was already bumped.
    pub fn record_noise_level(&self, sample_id: &SampleId, tier: ComplexityClass, noise: f64) -> u32 {
        let threshold = self.config.noise_thresholds.for_tier(tier);
        let bump = noise_bump(noise, threshold);
        if bump == 0 {
            return 0;
        }

        let mut bumped = self.bumped.lock().unwrap_or_else(|e| e.into_inner());
        if !bumped.insert(sample_id) {
            debug!(sample_id = %sample_id, noise, "Noise bump already applied");
            return 0;
        }

        info!(
            sample_id = %sample_id,
            tier = %tier,
            noise,
            threshold,
            bump,
            "Noise above tier threshold, bumping sample budget"
        );
        bump
    }

    /// Estimate noise on a rendered image and apply `record_noise_level`.
    pub fn record_noise_feedback(&self, sample_id: &SampleId, tier: ComplexityClass, image: &DynamicImage) -> u32 {
        let noise = rqv_vision::estimate_noise(image);
        self.record_noise_level(sample_id, tier, noise)
    }

    pub fn was_bumped(&self, sample_id: &SampleId) -> bool {
        self.bumped
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(sample_id)
    }

    /// Number of bumped samples currently remembered.
    pub fn bumped_count(&self) -> usize {
        self.bumped.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

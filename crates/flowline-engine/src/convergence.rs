//! Evaluate-and-improve convergence.
//!
//! A draft is produced once, then evaluated and improved until the critique
//! clears the quality bar, the iteration cap is reached, or an improvement
//! reports low confidence. [`TargetedRefinement`] is the single-pass variant
//! that scores several perspectives and improves only the weakest one.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use flowline_core::config::WorkflowConfig;
use flowline_core::error::{FlowError, Result};
use flowline_llm::structured::{parse_structured, StructuredOutput};

use crate::step::{execute, Step};

/// Structured feedback on the current artifact. Replaced each iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    #[serde(alias = "overall_quality")]
    pub quality: u8,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default, alias = "specific_suggestions")]
    pub suggestions: Vec<String>,
    pub needs_revision: bool,
}

impl Critique {
    fn schema_object() -> Value {
        json!({
            "type": "object",
            "properties": {
                "quality": {"type": "integer", "minimum": 1, "maximum": 10, "description": "Quality score from 1-10"},
                "strengths": {"type": "array", "items": {"type": "string"}},
                "weaknesses": {"type": "array", "items": {"type": "string"}},
                "suggestions": {"type": "array", "items": {"type": "string"}},
                "needs_revision": {"type": "boolean"}
            },
            "required": ["quality", "strengths", "weaknesses", "suggestions", "needs_revision"]
        })
    }

    /// Feedback text handed to the improve step.
    pub fn render(&self) -> String {
        format!(
            "Quality Score: {}/10\nWeaknesses: {}\nSuggestions: {}",
            self.quality,
            self.weaknesses.join("; "),
            self.suggestions.join("; ")
        )
    }
}

impl StructuredOutput for Critique {
    fn schema() -> Value {
        Self::schema_object()
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if (1..=10).contains(&self.quality) {
            Ok(())
        } else {
            Err(format!("quality {} outside 1..=10", self.quality))
        }
    }
}

/// A revised artifact and how confident the improver is in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    pub revised_content: String,
    #[serde(default)]
    pub changes_made: Vec<String>,
    #[serde(alias = "confidence_score")]
    pub confidence: f64,
}

impl StructuredOutput for Improvement {
    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "revised_content": {"type": "string"},
                "changes_made": {"type": "array", "items": {"type": "string"}},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1}
            },
            "required": ["revised_content", "changes_made", "confidence"]
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if (0.0..=1.0).contains(&self.confidence) {
            Ok(())
        } else {
            Err(format!("confidence {} outside [0, 1]", self.confidence))
        }
    }
}

/// Decode a step output into `T`. Text outputs are parsed as model JSON.
fn decode<T: StructuredOutput>(value: Value) -> Result<T> {
    match value {
        Value::String(text) => parse_structured(&text),
        other => {
            let decoded: T = serde_json::from_value(other)
                .map_err(|e| FlowError::NonConforming(e.to_string()))?;
            decoded.validate().map_err(FlowError::NonConforming)?;
            Ok(decoded)
        }
    }
}

fn text_of(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    QualityMet,
    /// `max_iterations` evaluations ran without meeting the threshold. No
    /// improvement follows the last evaluation, so the returned artifact is
    /// the one that evaluation scored and `critique` describes it.
    IterationCap,
    LowConfidence,
}

/// One evaluation and the improvement that followed it, if any.
#[derive(Debug, Clone, Serialize)]
pub struct Revision {
    pub iteration: u32,
    pub quality: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes_made: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvergenceReport {
    pub artifact: String,
    pub iterations: u32,
    /// Most recent critique. Absent when no evaluation ran.
    pub critique: Option<Critique>,
    pub history: Vec<Revision>,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, Copy)]
pub struct ConvergenceSettings {
    pub max_iterations: u32,
    pub quality_threshold: u8,
    pub min_confidence: f64,
}

impl ConvergenceSettings {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            quality_threshold: config.quality_threshold,
            min_confidence: config.min_confidence,
        }
    }
}

impl Default for ConvergenceSettings {
    fn default() -> Self {
        Self::from_config(&WorkflowConfig::default())
    }
}

enum Phase {
    Drafting,
    Evaluating,
    Improving(Critique),
    Done(StopReason),
}

/// Draft once, then evaluate/improve until a stop condition holds.
///
/// Step contracts: `draft` receives the caller's request and returns text;
/// `evaluate` receives `{"content"}` and returns a [`Critique`]; `improve`
/// receives `{"original_content", "critique"}` and returns an
/// [`Improvement`].
pub struct ConvergenceLoop {
    draft: Arc<dyn Step>,
    evaluate: Arc<dyn Step>,
    improve: Arc<dyn Step>,
    settings: ConvergenceSettings,
    default_timeout: Duration,
}

impl ConvergenceLoop {
    pub fn new(
        draft: impl Step,
        evaluate: impl Step,
        improve: impl Step,
        settings: ConvergenceSettings,
        default_timeout: Duration,
    ) -> Self {
        Self {
            draft: Arc::new(draft),
            evaluate: Arc::new(evaluate),
            improve: Arc::new(improve),
            settings,
            default_timeout,
        }
    }

    pub async fn run(&self, request: Value) -> Result<ConvergenceReport> {
        let settings = self.settings;
        let mut phase = Phase::Drafting;
        let mut artifact = String::new();
        let mut iterations = 0u32;
        let mut latest: Option<Critique> = None;
        let mut history: Vec<Revision> = Vec::new();

        let stop_reason = loop {
            phase = match phase {
                Phase::Drafting => {
                    let drafted = execute(self.draft.as_ref(), request.clone(), self.default_timeout).await?;
                    artifact = text_of(drafted);
                    info!(chars = artifact.len(), "Draft produced");
                    if settings.max_iterations == 0 {
                        Phase::Done(StopReason::IterationCap)
                    } else {
                        Phase::Evaluating
                    }
                }
                Phase::Evaluating => {
                    let output = execute(
                        self.evaluate.as_ref(),
                        json!({ "content": artifact }),
                        self.default_timeout,
                    )
                    .await?;
                    let critique: Critique = decode(output)?;
                    iterations += 1;
                    info!(
                        iteration = iterations,
                        quality = critique.quality,
                        needs_revision = critique.needs_revision,
                        "Artifact evaluated"
                    );
                    history.push(Revision {
                        iteration: iterations,
                        quality: critique.quality,
                        changes_made: None,
                        confidence: None,
                    });
                    latest = Some(critique.clone());

                    if critique.quality >= settings.quality_threshold && !critique.needs_revision {
                        Phase::Done(StopReason::QualityMet)
                    } else if iterations >= settings.max_iterations {
                        Phase::Done(StopReason::IterationCap)
                    } else {
                        Phase::Improving(critique)
                    }
                }
                Phase::Improving(critique) => {
                    let output = execute(
                        self.improve.as_ref(),
                        json!({ "original_content": artifact, "critique": critique.render() }),
                        self.default_timeout,
                    )
                    .await?;
                    let improvement: Improvement = decode(output)?;
                    debug!(
                        iteration = iterations,
                        confidence = improvement.confidence,
                        changes = improvement.changes_made.len(),
                        "Artifact improved"
                    );
                    artifact = improvement.revised_content;
                    if let Some(last) = history.last_mut() {
                        last.changes_made = Some(improvement.changes_made);
                        last.confidence = Some(improvement.confidence);
                    }

                    if improvement.confidence < settings.min_confidence {
                        Phase::Done(StopReason::LowConfidence)
                    } else {
                        Phase::Evaluating
                    }
                }
                Phase::Done(reason) => break reason,
            };
        };

        info!(iterations, reason = ?stop_reason, "Convergence loop finished");
        Ok(ConvergenceReport {
            artifact,
            iterations,
            critique: latest,
            history,
            stop_reason,
        })
    }
}

/// Evaluation axes used by [`TargetedRefinement`], in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    ScientificAccuracy,
    Readability,
    Engagement,
}

impl Perspective {
    pub const ALL: [Perspective; 3] = [
        Perspective::ScientificAccuracy,
        Perspective::Readability,
        Perspective::Engagement,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::ScientificAccuracy => "scientific accuracy",
            Self::Readability => "readability",
            Self::Engagement => "engagement",
        }
    }
}

/// Critiques from three expert perspectives plus an overall recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveCritique {
    pub scientific_accuracy: Critique,
    pub readability: Critique,
    pub engagement: Critique,
    #[serde(default)]
    pub overall_recommendation: String,
}

impl PerspectiveCritique {
    pub fn get(&self, perspective: Perspective) -> &Critique {
        match perspective {
            Perspective::ScientificAccuracy => &self.scientific_accuracy,
            Perspective::Readability => &self.readability,
            Perspective::Engagement => &self.engagement,
        }
    }

    /// Lowest-scoring perspective; ties go to the earlier one in `ALL`.
    pub fn weakest(&self) -> Perspective {
        let mut weakest = Perspective::ScientificAccuracy;
        for p in Perspective::ALL {
            if self.get(p).quality < self.get(weakest).quality {
                weakest = p;
            }
        }
        weakest
    }
}

impl StructuredOutput for PerspectiveCritique {
    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "scientific_accuracy": Critique::schema_object(),
                "readability": Critique::schema_object(),
                "engagement": Critique::schema_object(),
                "overall_recommendation": {"type": "string"}
            },
            "required": ["scientific_accuracy", "readability", "engagement", "overall_recommendation"]
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        for p in Perspective::ALL {
            self.get(p)
                .validate()
                .map_err(|e| format!("{}: {}", p.label(), e))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetedReport {
    pub draft: String,
    pub artifact: String,
    pub critique: PerspectiveCritique,
    /// Perspective that was improved, if any scored below the floor.
    pub focus: Option<Perspective>,
    pub improvement: Option<Improvement>,
}

/// Draft, evaluate from several perspectives, improve the weakest once.
pub struct TargetedRefinement {
    draft: Arc<dyn Step>,
    evaluate: Arc<dyn Step>,
    improve: Arc<dyn Step>,
    quality_floor: u8,
    default_timeout: Duration,
}

impl TargetedRefinement {
    pub const DEFAULT_QUALITY_FLOOR: u8 = 7;

    pub fn new(draft: impl Step, evaluate: impl Step, improve: impl Step, default_timeout: Duration) -> Self {
        Self {
            draft: Arc::new(draft),
            evaluate: Arc::new(evaluate),
            improve: Arc::new(improve),
            quality_floor: Self::DEFAULT_QUALITY_FLOOR,
            default_timeout,
        }
    }

    pub fn with_quality_floor(mut self, floor: u8) -> Self {
        self.quality_floor = floor;
        self
    }

    pub async fn run(&self, request: Value) -> Result<TargetedReport> {
        let draft = text_of(execute(self.draft.as_ref(), request, self.default_timeout).await?);

        let output = execute(
            self.evaluate.as_ref(),
            json!({ "content": draft }),
            self.default_timeout,
        )
        .await?;
        let critique: PerspectiveCritique = decode(output)?;

        let weakest = critique.weakest();
        let score = critique.get(weakest).quality;
        info!(
            scientific_accuracy = critique.scientific_accuracy.quality,
            readability = critique.readability.quality,
            engagement = critique.engagement.quality,
            weakest = weakest.label(),
            "Perspectives evaluated"
        );

        if score >= self.quality_floor {
            info!(floor = self.quality_floor, "All perspectives clear the floor");
            return Ok(TargetedReport {
                artifact: draft.clone(),
                draft,
                critique,
                focus: None,
                improvement: None,
            });
        }

        let focused = critique.get(weakest);
        let feedback = format!(
            "Focus on improving {}.\nCurrent score: {}/10\nWeaknesses: {}\nSuggestions: {}",
            weakest.label(),
            focused.quality,
            focused.weaknesses.join("; "),
            focused.suggestions.join("; ")
        );
        let output = execute(
            self.improve.as_ref(),
            json!({ "original_content": draft, "critique": feedback }),
            self.default_timeout,
        )
        .await?;
        let improvement: Improvement = decode(output)?;

        Ok(TargetedReport {
            artifact: improvement.revised_content.clone(),
            draft,
            critique,
            focus: Some(weakest),
            improvement: Some(improvement),
        })
    }
}

//! Stage descriptions, retry policy and the executor seam.
//!
//! A stage is data: a name, an instruction for the external analysis engine,
//! the prior results it needs, and an optional retry override. One generic
//! [`StageRunner`](crate::runner::StageRunner) drives them all.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use redline_shared::{AppConfig, RedlineError, Result};

use crate::context::{PipelineContext, StageResults};

// ---------------------------------------------------------------------------
// Stage description
// ---------------------------------------------------------------------------

/// One ordered unit of analysis producing exactly one named result.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    /// Key the result is stored under.
    pub name: String,
    /// One-line summary for listings.
    pub description: String,
    /// Field name the analysis engine is asked to produce.
    pub output_key: String,
    /// Instruction passed to the analysis engine.
    pub instruction: String,
    /// Stages whose results must exist before this one runs.
    pub requires: Vec<String>,
    /// Overrides the run-wide retry policy.
    pub retry: Option<RetryPolicy>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, instruction: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            output_key: format!("{name}_analysis"),
            description: String::new(),
            instruction: instruction.into(),
            requires: Vec::new(),
            retry: None,
            name,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn requires(mut self, stages: &[&str]) -> Self {
        self.requires = stages.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Required stages that have no stored result yet.
    pub fn missing_requirements<'a>(&'a self, ctx: &PipelineContext) -> Vec<&'a str> {
        self.requires
            .iter()
            .map(String::as_str)
            .filter(|name| !ctx.results().contains(name))
            .collect()
    }
}

/// The built-in review sequence.
pub fn default_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new(
            "contradiction",
            "Identify statements within or across the documents that contradict each other. \
             Cite the document and passage for each side of every contradiction.",
        )
        .describe("Contradictions within and across documents")
        .output_key("contradiction_analysis"),
        StageSpec::new(
            "spelling_grammar",
            "Report spelling, grammar and punctuation errors with the corrected wording.",
        )
        .describe("Spelling and grammar review")
        .output_key("spelling_grammar_analysis"),
        StageSpec::new(
            "ambiguity",
            "Identify passages whose meaning admits more than one reasonable reading \
             and propose unambiguous wording.",
        )
        .describe("Ambiguous wording")
        .output_key("ambiguity_analysis"),
        StageSpec::new(
            "validation",
            "Review the previous analyses for accuracy and completeness. Report a status of \
             `approved` or `needs_correction` with the reasons.",
        )
        .describe("Validation of the previous analyses")
        .output_key("final_validation")
        .requires(&["contradiction", "spelling_grammar", "ambiguity"]),
    ]
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded, fixed-delay retry for transient failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    /// A failure is transient only when its message contains every marker.
    pub transient_markers: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
            transient_markers: vec!["INTERNAL".into(), "500".into()],
        }
    }
}

impl From<&AppConfig> for RetryPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.retry.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry.backoff_ms),
            transient_markers: config.retry.transient_markers.clone(),
        }
    }
}

/// How a stage failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Infrastructure fault, eligible for retry.
    Transient,
    /// Semantic or validation fault, never retried.
    Permanent,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the delay, then try again.
    Retry(Duration),
    /// Transient, but no attempts remain.
    Exhausted,
    /// Not retryable; fail now.
    Abort,
}

/// Classify a failure message by substring match against the markers.
///
/// This mirrors how the analysis engine surfaces server faults today; it is
/// text matching, so a structured error code should replace it once the
/// engine exposes one. An empty marker list classifies nothing as transient.
pub fn classify(message: &str, policy: &RetryPolicy) -> FailureClass {
    let matches = !policy.transient_markers.is_empty()
        && policy
            .transient_markers
            .iter()
            .all(|marker| message.contains(marker.as_str()));
    if matches {
        FailureClass::Transient
    } else {
        FailureClass::Permanent
    }
}

/// Decide the next step after `attempt` (1-based) failed.
pub fn decide(class: FailureClass, attempt: u32, policy: &RetryPolicy) -> RetryDecision {
    match class {
        FailureClass::Permanent => RetryDecision::Abort,
        FailureClass::Transient if attempt < policy.max_attempts => {
            RetryDecision::Retry(policy.backoff)
        }
        FailureClass::Transient => RetryDecision::Exhausted,
    }
}

// ---------------------------------------------------------------------------
// Executor seam
// ---------------------------------------------------------------------------

/// Failure reported by a stage executor. The message is matched against
/// transient markers verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageError {
    pub message: String,
}

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StageError {}

impl From<RedlineError> for StageError {
    fn from(err: RedlineError) -> Self {
        Self::new(err.to_string())
    }
}

/// Runs one stage's unit of work. Implemented by the subprocess bridge and
/// by test doubles.
pub trait StageExecutor {
    /// Produce the stage's result from the run's current state.
    fn execute(
        &mut self,
        stage: &StageSpec,
        input: &StageInput,
    ) -> std::result::Result<Value, StageError>;

    /// Release any resources once the run is over.
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stage input
// ---------------------------------------------------------------------------

/// Voided text removed, everything else in reading order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DocumentInput {
    pub document: String,
    pub converted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub paragraphs: Vec<String>,
    /// Struck paragraphs left out of `paragraphs`.
    pub struck_excluded: usize,
}

/// What an analysis stage is given: the documents, their unstruck text and
/// every result stored so far.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StageInput {
    pub documents: Vec<String>,
    pub corpus: Vec<DocumentInput>,
    /// Results stored so far, in execution order.
    pub prior_results: StageResults,
}

impl StageInput {
    pub fn from_context(ctx: &PipelineContext) -> Self {
        let corpus = ctx
            .corpus()
            .entries()
            .iter()
            .map(|entry| DocumentInput {
                document: entry.document.clone(),
                converted: entry.converted,
                error: entry.error.clone(),
                paragraphs: entry.unstruck_spans().map(|s| s.text.clone()).collect(),
                struck_excluded: entry.struck_count,
            })
            .collect();

        Self {
            documents: ctx.documents().iter().map(|d| d.name.clone()).collect(),
            corpus,
            prior_results: ctx.results().clone(),
        }
    }
}

/// Validate a stage list: unique names and requirements that refer to
/// earlier stages only.
pub fn validate_stages(stages: &[StageSpec]) -> Result<()> {
    for (i, stage) in stages.iter().enumerate() {
        let earlier = &stages[..i];
        if earlier.iter().any(|s| s.name == stage.name) {
            return Err(RedlineError::validation(format!(
                "duplicate stage name: {}",
                stage.name
            )));
        }
        if let Some(req) = stage
            .requires
            .iter()
            .find(|req| !earlier.iter().any(|s| &s.name == *req))
        {
            return Err(RedlineError::validation(format!(
                "stage {} requires {req}, which does not run before it",
                stage.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use redline_shared::{CorpusEntry, Document, RetryConfig, RunId, Span};
    use serde_json::json;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[test]
    fn transient_requires_every_marker() {
        let p = RetryPolicy::default();
        assert_eq!(
            classify("500 INTERNAL: backend error", &p),
            FailureClass::Transient
        );
        assert_eq!(classify("500 Bad Gateway", &p), FailureClass::Permanent);
        assert_eq!(classify("INTERNAL error", &p), FailureClass::Permanent);
        assert_eq!(classify("invalid JSON in response", &p), FailureClass::Permanent);
    }

    #[test]
    fn empty_markers_never_match() {
        let p = RetryPolicy {
            transient_markers: Vec::new(),
            ..Default::default()
        };
        assert_eq!(classify("500 INTERNAL", &p), FailureClass::Permanent);
    }

    #[test]
    fn decide_follows_attempt_budget() {
        let p = policy(3);
        let delay = Duration::from_millis(10);
        assert_eq!(decide(FailureClass::Transient, 1, &p), RetryDecision::Retry(delay));
        assert_eq!(decide(FailureClass::Transient, 2, &p), RetryDecision::Retry(delay));
        assert_eq!(decide(FailureClass::Transient, 3, &p), RetryDecision::Exhausted);
        assert_eq!(decide(FailureClass::Permanent, 1, &p), RetryDecision::Abort);
    }

    #[test]
    fn single_attempt_budget_never_retries() {
        assert_eq!(
            decide(FailureClass::Transient, 1, &policy(1)),
            RetryDecision::Exhausted
        );
    }

    #[test]
    fn retry_policy_from_config() {
        let config = AppConfig {
            retry: RetryConfig {
                max_attempts: 5,
                backoff_ms: 250,
                ..Default::default()
            },
            ..Default::default()
        };
        let p = RetryPolicy::from(&config);
        assert_eq!(p.backoff, Duration::from_millis(250));
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.transient_markers, ["INTERNAL", "500"]);
    }

    #[test]
    fn default_stages_are_well_formed() {
        let stages = default_stages();
        validate_stages(&stages).unwrap();
        let names: Vec<&str> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            ["contradiction", "spelling_grammar", "ambiguity", "validation"]
        );
        assert_eq!(stages[3].output_key, "final_validation");
    }

    #[test]
    fn forward_requirement_is_rejected() {
        let stages = vec![
            StageSpec::new("a", "x").requires(&["b"]),
            StageSpec::new("b", "y"),
        ];
        assert!(validate_stages(&stages).is_err());
        assert!(validate_stages(&[StageSpec::new("a", "x"), StageSpec::new("a", "y")]).is_err());
    }

    #[test]
    fn stage_input_excludes_struck_text() {
        let mut ctx = PipelineContext::new(RunId::new());
        ctx.set_documents(vec![Document::new("doc2.pdf", "/d/doc2.pdf")]);
        let span = |text: &str, struck: bool, ordinal: usize| Span {
            text: text.into(),
            struck,
            document: "doc2.pdf".into(),
            ordinal,
        };
        ctx.corpus_mut()
            .insert(CorpusEntry {
                document: "doc2.pdf".into(),
                converted: true,
                error: None,
                spans: vec![span("Article 1", false, 0), span("Obsolete clause", true, 1)],
                paragraph_count: 2,
                struck_count: 1,
                content_hash: None,
                intermediate_path: None,
            })
            .unwrap();
        ctx.store_result("contradiction", json!({"issues": []}));

        let input = StageInput::from_context(&ctx);
        assert_eq!(input.documents, ["doc2.pdf"]);
        assert_eq!(input.corpus[0].paragraphs, ["Article 1"]);
        assert_eq!(input.corpus[0].struck_excluded, 1);
        assert!(input.prior_results.contains("contradiction"));

        let json = serde_json::to_string(&input).unwrap();
        assert!(!json.contains("Obsolete clause"));
    }

    #[test]
    fn missing_requirements_are_listed() {
        let mut ctx = PipelineContext::new(RunId::new());
        ctx.store_result("contradiction", json!({}));
        let stage = &default_stages()[3];
        assert_eq!(
            stage.missing_requirements(&ctx),
            ["spelling_grammar", "ambiguity"]
        );
    }
}

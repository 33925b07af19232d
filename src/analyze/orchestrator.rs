// src/analyze/orchestrator.rs
//! The analysis state machine.
//!
//! Quick: `Planning -> Finalizing -> Done` with a single model call.
//! Deep: `Planning -> Critiquing -> FollowUp -> Finalizing -> Done`, one call per stage,
//! each validated before its turn is appended to the transcript the next stage sees.
//!
//! Every structured call gets exactly one repair attempt. A second invalid output, a
//! transport error, or a timeout ends the run with `AnalysisFailure`; no verdict is
//! ever made up.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde_json::json;
use tracing::{debug, info, warn};

use super::prompts::{self, PromptContext};
use super::schema::{
    parse_critique, parse_follow_up, parse_planning, parse_verdict, AnalysisMetadata,
    CritiqueOutput, FollowUpOutput, PlanningOutput, Verdict,
};
use super::{Stage, Transcript};
use crate::error::AnalysisFailure;
use crate::evidence::FrozenEvidence;
use crate::llm::DynLlmClient;
use crate::market::MarketMetadata;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::request::{AnalysisRequest, Depth};

const DEFAULT_EXCERPT_CHARS: usize = 280;

/// State plus the validated outputs it carries forward.
enum State {
    Planning,
    Critiquing {
        plan: PlanningOutput,
    },
    FollowUp {
        plan: PlanningOutput,
        critique: CritiqueOutput,
    },
    Finalizing {
        deep: Option<(PlanningOutput, CritiqueOutput, FollowUpOutput)>,
    },
    Done(Verdict),
}

impl State {
    fn stage(&self) -> Stage {
        match self {
            Self::Planning => Stage::Planning,
            Self::Critiquing { .. } => Stage::Critiquing,
            Self::FollowUp { .. } => Stage::FollowUp,
            Self::Finalizing { .. } => Stage::Finalizing,
            Self::Done(_) => Stage::Done,
        }
    }
}

pub struct AnalysisOrchestrator {
    llm: DynLlmClient,
    call_timeout: Duration,
    excerpt_chars: usize,
}

impl AnalysisOrchestrator {
    pub fn new(llm: DynLlmClient, call_timeout: Duration) -> Self {
        Self {
            llm,
            call_timeout,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }

    pub fn with_excerpt_chars(mut self, chars: usize) -> Self {
        self.excerpt_chars = chars.max(16);
        self
    }

    pub async fn run(
        &self,
        req: &AnalysisRequest,
        market: &MarketMetadata,
        evidence: &FrozenEvidence,
        sink: &dyn ProgressSink,
    ) -> Result<Verdict, AnalysisFailure> {
        let ctx = PromptContext {
            market,
            evidence,
            perspective: req.perspective,
            excerpt_chars: self.excerpt_chars,
        };
        let mut transcript = Transcript::new();
        let mut state = State::Planning;

        info!(
            target: "analyze",
            depth = req.depth.as_str(),
            perspective = req.perspective.as_str(),
            evidence = evidence.len(),
            sparse = evidence.is_sparse(),
            llm = self.llm.provider_name(),
            "analysis started"
        );

        loop {
            let stage = state.stage();
            state = match state {
                State::Planning => match req.depth {
                    Depth::Quick => {
                        sink.emit(ProgressEvent::text(
                            stage.as_str(),
                            "quick mode: single pass over the evidence",
                        ));
                        State::Finalizing { deep: None }
                    }
                    Depth::Deep => {
                        let plan = self
                            .structured(&ctx, stage, prompts::planning(&ctx), &mut transcript, |raw| {
                                parse_planning(raw, evidence)
                            })
                            .await?;
                        sink.emit(ProgressEvent::json(stage.as_str(), json!(plan)));
                        State::Critiquing { plan }
                    }
                },
                State::Critiquing { plan } => {
                    let critique = self
                        .structured(
                            &ctx,
                            stage,
                            prompts::critique(&ctx, &plan),
                            &mut transcript,
                            |raw| parse_critique(raw, req.perspective),
                        )
                        .await?;
                    sink.emit(ProgressEvent::json(stage.as_str(), json!(critique)));
                    State::FollowUp { plan, critique }
                }
                State::FollowUp { plan, critique } => {
                    let follow_up = self
                        .structured(
                            &ctx,
                            stage,
                            prompts::follow_up(&ctx, &plan, &critique),
                            &mut transcript,
                            |raw| parse_follow_up(raw, evidence),
                        )
                        .await?;
                    sink.emit(ProgressEvent::json(stage.as_str(), json!(follow_up)));
                    State::Finalizing {
                        deep: Some((plan, critique, follow_up)),
                    }
                }
                State::Finalizing { deep } => {
                    let prompt = match &deep {
                        Some((plan, _, follow_up)) => prompts::finalizing(&ctx, plan, follow_up),
                        None => prompts::quick(&ctx),
                    };
                    let mut verdict = self
                        .structured(&ctx, stage, prompt, &mut transcript, |raw| {
                            parse_verdict(raw, evidence)
                        })
                        .await?;
                    if let Some((plan, critique, follow_up)) = deep {
                        verdict.metadata = Some(AnalysisMetadata {
                            mode: Depth::Deep,
                            perspective: req.perspective,
                            plan: Some(plan),
                            critique: Some(critique),
                            follow_up: Some(follow_up),
                        });
                    }
                    sink.emit(ProgressEvent::json(
                        stage.as_str(),
                        json!({
                            "verdict": verdict.verdict,
                            "confidence_pct": verdict.confidence_pct,
                        }),
                    ));
                    State::Done(verdict)
                }
                State::Done(verdict) => {
                    info!(
                        target: "analyze",
                        verdict = verdict.verdict.as_str(),
                        confidence_pct = verdict.confidence_pct,
                        turns = transcript.len(),
                        "analysis finished"
                    );
                    return Ok(verdict);
                }
            };
            debug_assert_eq!(state.stage(), stage.next(req.depth));
        }
    }

    /// One structured turn with a single repair attempt. The accepted response is
    /// recorded against the original prompt.
    async fn structured<T, F>(
        &self,
        ctx: &PromptContext<'_>,
        stage: Stage,
        prompt: String,
        transcript: &mut Transcript,
        parse: F,
    ) -> Result<T, AnalysisFailure>
    where
        F: Fn(&str) -> Result<T, String>,
    {
        let raw = self.call(stage, &prompt, transcript).await?;
        let first_error = match parse(&raw) {
            Ok(v) => {
                transcript.push(stage, prompt, raw);
                return Ok(v);
            }
            Err(e) => e,
        };

        warn!(target: "analyze", %stage, error = %first_error, "model output rejected; requesting repair");
        counter!("polyseek_llm_repairs_total", "stage" => stage.as_str()).increment(1);

        let repair_prompt = prompts::repair(ctx, stage, &first_error, &raw);
        let fixed = self.call(stage, &repair_prompt, transcript).await?;
        match parse(&fixed) {
            Ok(v) => {
                debug!(target: "analyze", %stage, "repair accepted");
                transcript.push(stage, prompt, fixed);
                Ok(v)
            }
            Err(error) => {
                warn!(target: "analyze", %stage, %error, "repair rejected; giving up");
                Err(AnalysisFailure::InvalidOutput { stage, error })
            }
        }
    }

    async fn call(
        &self,
        stage: Stage,
        prompt: &str,
        transcript: &Transcript,
    ) -> Result<String, AnalysisFailure> {
        counter!("polyseek_llm_calls_total", "stage" => stage.as_str()).increment(1);
        let t0 = Instant::now();
        let res = tokio::time::timeout(self.call_timeout, self.llm.complete(prompt, transcript)).await;
        histogram!("polyseek_llm_latency_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        match res {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(source)) => {
                warn!(target: "analyze", %stage, error = %source, "model call failed");
                Err(AnalysisFailure::Llm { stage, source })
            }
            Err(_) => {
                warn!(
                    target: "analyze",
                    %stage,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "model call timed out"
                );
                Err(AnalysisFailure::Timeout {
                    stage,
                    after: self.call_timeout,
                })
            }
        }
    }
}

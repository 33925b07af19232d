// src/analyze/prompts.rs
use std::fmt::Write as _;

use super::schema::{CritiqueOutput, FollowUpOutput, PlanningOutput};
use super::Stage;
use crate::evidence::text::excerpt;
use crate::evidence::{FrozenEvidence, SourceRecord};
use crate::market::MarketMetadata;
use crate::request::Perspective;

const RULES_CHARS: usize = 600;

const VERDICT_SCHEMA: &str = r#"{"verdict": "YES" | "NO" | "UNCERTAIN", "confidence_pct": number between 0 and 100, "summary": string, "key_drivers": [{"text": string, "source_ids": ["SRC1", ...]}] (at most 5), "uncertainty_factors": [string], "next_steps": [string], "sources": ["SRC1", ...]}"#;
const PLAN_SCHEMA: &str = r#"{"relevant_ids": ["SRC1", ...], "prior_probability": number between 0 and 100 (chance of YES), "steps": [string]}"#;
const CRITIQUE_SCHEMA: &str = r#"{"counter_arguments": [string], "risks": [string]}"#;
const FOLLOW_UP_SCHEMA: &str = r#"{"additional_ids": ["SRC1", ...], "gaps": [string], "revised_probability": number between 0 and 100 (chance of YES)}"#;

/// Everything a prompt needs about the run.
pub struct PromptContext<'a> {
    pub market: &'a MarketMetadata,
    pub evidence: &'a FrozenEvidence,
    pub perspective: Perspective,
    pub excerpt_chars: usize,
}

impl PromptContext<'_> {
    fn market_block(&self) -> String {
        let m = self.market;
        let mut s = String::new();
        let _ = writeln!(s, "Market question: {}", m.title);
        let _ = writeln!(s, "Platform: {} ({})", m.platform.as_str(), m.url);
        let price = |p: Option<f64>| p.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"));
        let _ = writeln!(
            s,
            "Current prices: YES={} NO={}",
            price(m.prices.yes),
            price(m.prices.no)
        );
        if let Some(d) = m.deadline {
            let _ = writeln!(s, "Deadline (UTC): {}", d.format("%Y-%m-%d %H:%M"));
        }
        if let Some(rules) = &m.rules {
            let _ = writeln!(s, "Resolution rules: {}", excerpt(rules, RULES_CHARS));
        }
        s
    }

    fn render(&self, rec: &SourceRecord) -> String {
        let mut line = format!(
            "- [{}] ({}, sentiment: {}) {}",
            rec.id,
            rec.kind.as_str(),
            rec.sentiment.as_str(),
            rec.title
        );
        if !rec.text.is_empty() {
            line.push_str(": ");
            line.push_str(&excerpt(&rec.text, self.excerpt_chars));
        }
        line
    }

    fn evidence_block<'r, I>(&self, records: I) -> String
    where
        I: IntoIterator<Item = &'r SourceRecord>,
    {
        let lines: Vec<String> = records.into_iter().map(|r| self.render(r)).collect();
        if lines.is_empty() {
            return "(none)\n".to_string();
        }
        let mut s = lines.join("\n");
        s.push('\n');
        s
    }

    fn sparse_note(&self) -> &'static str {
        if self.evidence.is_sparse() {
            "Note: external evidence is sparse for this market. Say so, and let it lower your confidence rather than guessing.\n"
        } else {
            ""
        }
    }

    fn directive(&self) -> &'static str {
        match self.perspective {
            Perspective::Neutral => "Perspective: neutral. Weigh the evidence for both outcomes impartially.",
            Perspective::DevilsAdvocate => {
                "Perspective: devil's advocate. Actively build the strongest case against the prevailing market consensus and give it real weight."
            }
        }
    }

    fn id_rule(&self) -> String {
        format!(
            "Cite evidence only by the ids listed above ({}). Never invent ids.",
            self.evidence.id_range()
        )
    }
}

/// Quick mode: one pass straight to a verdict.
pub fn quick(ctx: &PromptContext<'_>) -> String {
    format!(
        "Assess this prediction market and decide whether it resolves YES.\n\n{market}\nEvidence:\n{evidence}{sparse}\n{directive}\n{ids}\n\nReturn JSON only, with this shape:\n{schema}",
        market = ctx.market_block(),
        evidence = ctx.evidence_block(ctx.evidence.records()),
        sparse = ctx.sparse_note(),
        directive = ctx.directive(),
        ids = ctx.id_rule(),
        schema = VERDICT_SCHEMA,
    )
}

pub fn planning(ctx: &PromptContext<'_>) -> String {
    format!(
        "Step 1 of 4 (PLANNING). Read the market and the evidence, pick the evidence ids that matter most, and state a prior probability of YES. Anchor the prior on the current YES price, then adjust.\n\n{market}\nEvidence:\n{evidence}{sparse}\n{directive}\n{ids}\n\nReturn JSON only, with this shape:\n{schema}",
        market = ctx.market_block(),
        evidence = ctx.evidence_block(ctx.evidence.records()),
        sparse = ctx.sparse_note(),
        directive = ctx.directive(),
        ids = ctx.id_rule(),
        schema = PLAN_SCHEMA,
    )
}

pub fn critique(ctx: &PromptContext<'_>, plan: &PlanningOutput) -> String {
    let demand = match ctx.perspective {
        Perspective::Neutral => "List counter-evidence and risks the plan did not consider.",
        Perspective::DevilsAdvocate => {
            "You MUST give at least one strong counter-argument against the plan's leaning, even if the evidence mostly supports it."
        }
    };
    format!(
        "Step 2 of 4 (CRITIQUING). Attack your plan from the previous step. {demand}\n\nPlan so far: relevant ids [{ids}], prior probability of YES {prior:.1}%.\n{directive}\n\nReturn JSON only, with this shape:\n{schema}",
        ids = plan.relevant_ids.join(", "),
        prior = plan.prior_probability,
        directive = ctx.directive(),
        schema = CRITIQUE_SCHEMA,
    )
}

pub fn follow_up(ctx: &PromptContext<'_>, plan: &PlanningOutput, critique: &CritiqueOutput) -> String {
    let deprioritized: Vec<&SourceRecord> = ctx
        .evidence
        .records()
        .iter()
        .filter(|r| !plan.relevant_ids.contains(&r.id))
        .collect();
    format!(
        "Step 3 of 4 (FOLLOW_UP). Identify evidence gaps given the critique ({n_counter} counter-arguments, {n_risks} risks). No new data can be fetched: you may only pull in evidence that the plan set aside, listed below. Then revise the probability of YES.\n\nEvidence not yet used:\n{evidence}\n{ids}\n\nReturn JSON only, with this shape:\n{schema}",
        n_counter = critique.counter_arguments.len(),
        n_risks = critique.risks.len(),
        evidence = ctx.evidence_block(deprioritized),
        ids = ctx.id_rule(),
        schema = FOLLOW_UP_SCHEMA,
    )
}

pub fn finalizing(ctx: &PromptContext<'_>, plan: &PlanningOutput, follow_up: &FollowUpOutput) -> String {
    let mut considered = plan.relevant_ids.clone();
    considered.extend(follow_up.additional_ids.iter().cloned());
    format!(
        "Step 4 of 4 (FINALIZING). Commit to a final verdict using the whole conversation. Evidence considered: [{ids}]. Revised probability of YES: {p:.1}%.\n{sparse}{directive}\n{rule}\n\nReturn JSON only, with this shape:\n{schema}",
        ids = considered.join(", "),
        p = follow_up.revised_probability,
        sparse = ctx.sparse_note(),
        directive = ctx.directive(),
        rule = ctx.id_rule(),
        schema = VERDICT_SCHEMA,
    )
}

/// Second chance for a structured turn: the validation error plus the rejected output.
pub fn repair(ctx: &PromptContext<'_>, stage: Stage, error: &str, invalid_output: &str) -> String {
    let schema = match stage {
        Stage::Planning => PLAN_SCHEMA,
        Stage::Critiquing => CRITIQUE_SCHEMA,
        Stage::FollowUp => FOLLOW_UP_SCHEMA,
        Stage::Finalizing | Stage::Done => VERDICT_SCHEMA,
    };
    format!(
        "Your previous {stage} response was rejected: {error}\n\nRejected response:\n{invalid}\n\nReturn a corrected JSON object only, with this shape:\n{schema}\n{rule}",
        invalid = excerpt(invalid_output, 4_000),
        rule = ctx.id_rule(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{DedupKey, EvidencePool, Sentiment, SourceType};
    use crate::market::{MarketPlatform, MarketPrices};

    fn market() -> MarketMetadata {
        MarketMetadata {
            market_id: "m1".into(),
            title: "Will the Fed cut rates in December?".into(),
            category: None,
            rules: Some("Resolves YES on a cut.".into()),
            deadline: None,
            liquidity: None,
            volume_24h: None,
            platform: MarketPlatform::Polymarket,
            url: "https://polymarket.com/event/fed".into(),
            prices: MarketPrices {
                yes: Some(0.62),
                no: Some(0.38),
            },
        }
    }

    fn evidence() -> FrozenEvidence {
        let mut p = EvidencePool::new(10, DedupKey::default());
        p.add(vec![
            SourceRecord::new(SourceType::Market, "Fed market", "https://polymarket.com/event/fed"),
            SourceRecord::new(SourceType::News, "CPI cools", "https://n/1")
                .text("x".repeat(500))
                .sentiment(Sentiment::Pro),
        ]);
        p.freeze()
    }

    #[test]
    fn quick_prompt_embeds_ids_excerpts_and_directive() {
        let (m, e) = (market(), evidence());
        let ctx = PromptContext {
            market: &m,
            evidence: &e,
            perspective: Perspective::DevilsAdvocate,
            excerpt_chars: 50,
        };
        let p = quick(&ctx);
        assert!(p.contains("[SRC2] (news, sentiment: pro) CPI cools"));
        assert!(p.contains("YES=0.62"));
        assert!(p.contains("devil's advocate"));
        assert!(p.contains("sparse"));
        assert!(p.contains("SRC1..SRC2"));
        assert!(!p.contains(&"x".repeat(60)));
    }

    #[test]
    fn follow_up_lists_only_set_aside_evidence() {
        let (m, e) = (market(), evidence());
        let ctx = PromptContext {
            market: &m,
            evidence: &e,
            perspective: Perspective::Neutral,
            excerpt_chars: 50,
        };
        let plan = PlanningOutput {
            relevant_ids: vec!["SRC2".into()],
            prior_probability: 60.0,
            steps: vec![],
        };
        let crit = CritiqueOutput {
            counter_arguments: vec!["c".into()],
            risks: vec![],
        };
        let p = follow_up(&ctx, &plan, &crit);
        assert!(p.contains("[SRC1]"));
        assert!(!p.contains("[SRC2]"));
    }
}

// src/analyze/schema.rs
//! Output contract and validators for every structured model turn.
//!
//! Each `parse_*` takes the model's raw text and either returns a fully validated
//! value or a human-readable error that is fed back to the model in the repair prompt.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::evidence::{FrozenEvidence, SourceRecord};
use crate::request::{Depth, Perspective};

/// Drivers beyond this are dropped.
pub const MAX_KEY_DRIVERS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictKind {
    Yes,
    No,
    Uncertain,
}

impl VerdictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
            Self::Uncertain => "UNCERTAIN",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "YES" => Some(Self::Yes),
            "NO" => Some(Self::No),
            "UNCERTAIN" => Some(Self::Uncertain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDriver {
    pub text: String,
    #[serde(default)]
    pub source_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningOutput {
    pub relevant_ids: Vec<String>,
    /// Percent, YES side.
    pub prior_probability: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueOutput {
    pub counter_arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpOutput {
    pub additional_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gaps: Vec<String>,
    /// Percent, YES side.
    pub revised_probability: f64,
}

/// How a deep verdict was reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub mode: Depth,
    pub perspective: Perspective,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanningOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critique: Option<CritiqueOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUpOutput>,
}

/// The output contract. Invariant: every `key_drivers[].source_ids` entry is the id of
/// a record in `sources`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub verdict: VerdictKind,
    pub confidence_pct: f64,
    pub summary: String,
    pub key_drivers: Vec<KeyDriver>,
    pub uncertainty_factors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_steps: Vec<String>,
    pub sources: Vec<SourceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnalysisMetadata>,
}

impl Verdict {
    /// Citation and range invariants of the output contract.
    pub fn check(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.confidence_pct) {
            return Err(format!(
                "confidence_pct {} is outside [0, 100]",
                self.confidence_pct
            ));
        }
        let listed: HashSet<&str> = self.sources.iter().map(|s| s.id.as_str()).collect();
        let missing: Vec<&str> = self
            .key_drivers
            .iter()
            .flat_map(|d| d.source_ids.iter())
            .map(String::as_str)
            .filter(|id| !listed.contains(id))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "key_drivers cite ids missing from sources: {}",
                missing.join(", ")
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Raw (model-facing) shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawVerdict {
    verdict: Option<String>,
    #[serde(default, alias = "confidence", deserialize_with = "lenient_f64")]
    confidence_pct: Option<f64>,
    summary: Option<String>,
    #[serde(default)]
    key_drivers: Vec<RawDriver>,
    #[serde(default, alias = "risks")]
    uncertainty_factors: Vec<String>,
    #[serde(default)]
    next_steps: Vec<String>,
    #[serde(default)]
    sources: Vec<RawSourceRef>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDriver {
    Text(String),
    Cited {
        #[serde(alias = "driver")]
        text: String,
        #[serde(default)]
        source_ids: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSourceRef {
    Id(String),
    Record { id: String },
}

#[derive(Debug, Deserialize)]
struct RawPlanning {
    #[serde(default, alias = "relevant_evidence")]
    relevant_ids: Vec<String>,
    #[serde(default, alias = "prior", deserialize_with = "lenient_f64")]
    prior_probability: Option<f64>,
    #[serde(default, alias = "plan")]
    steps: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawCritique {
    #[serde(default)]
    counter_arguments: Vec<String>,
    #[serde(default, alias = "missing_considerations")]
    risks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawFollowUp {
    #[serde(default, alias = "selected_ids")]
    additional_ids: Vec<String>,
    #[serde(default)]
    gaps: Vec<String>,
    #[serde(default, alias = "probability", deserialize_with = "lenient_f64")]
    revised_probability: Option<f64>,
}

/// Number, numeric string, or percent string ("62%").
fn lenient_f64<'de, D>(de: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(de)?;
    Ok(match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Pull the JSON object out of a completion: tolerates code fences, prose around the
/// object and trailing commas.
pub fn extract_json(raw: &str) -> Result<Value, String> {
    let mut body = raw.trim();
    if let Some(start) = body.find("```") {
        let after = &body[start + 3..];
        let after = after.find('\n').map_or(after, |nl| &after[nl + 1..]);
        let fenced = after.find("```").map_or(after, |end| &after[..end]);
        // A stray closing fence after bare JSON leaves nothing useful inside it.
        if fenced.contains('{') {
            body = fenced;
        }
    }
    let (Some(open), Some(close)) = (body.find('{'), body.rfind('}')) else {
        return Err("no JSON object found in model output".to_string());
    };
    if close < open {
        return Err("no JSON object found in model output".to_string());
    }
    let candidate = &body[open..=close];

    match serde_json::from_str::<Value>(candidate) {
        Ok(v) => Ok(v),
        Err(first) => {
            static RE_TRAILING: OnceCell<Regex> = OnceCell::new();
            let re = RE_TRAILING.get_or_init(|| Regex::new(r",\s*([}\]])").unwrap());
            let fixed = re.replace_all(candidate, "$1");
            serde_json::from_str::<Value>(&fixed).map_err(|_| format!("invalid JSON: {first}"))
        }
    }
}

/// Fractions in [0, 1] are read as probabilities and scaled; then clamp to [0, 100]
/// and round to one decimal.
pub fn normalize_pct(v: f64) -> Result<f64, String> {
    if !v.is_finite() {
        return Err(format!("probability {v} is not a finite number"));
    }
    let pct = if (0.0..=1.0).contains(&v) { v * 100.0 } else { v };
    Ok((pct.clamp(0.0, 100.0) * 10.0).round() / 10.0)
}

/// `[src3]` / ` SRC3 ` -> `SRC3`.
fn normalize_id(id: &str) -> String {
    id.trim()
        .trim_matches(|c| c == '[' || c == ']')
        .trim()
        .to_ascii_uppercase()
}

fn dedup_ids<I: IntoIterator<Item = String>>(ids: I) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .map(|id| normalize_id(&id))
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

fn ensure_known(pool: &FrozenEvidence, ids: &[String], field: &str) -> Result<(), String> {
    let unknown = pool.unknown_ids(ids);
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "{field} references unknown source ids {}; only {} exist",
            unknown.join(", "),
            pool.id_range()
        ))
    }
}

fn from_value<T: for<'de> Deserialize<'de>>(v: Value, what: &str) -> Result<T, String> {
    serde_json::from_value(v).map_err(|e| format!("{what} does not match the schema: {e}"))
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Validators
// ---------------------------------------------------------------------------

/// Terminal verdict. Unknown ids anywhere are rejected; ids cited by drivers but not
/// listed in `sources` are appended from the pool.
pub fn parse_verdict(raw: &str, pool: &FrozenEvidence) -> Result<Verdict, String> {
    let r: RawVerdict = from_value(extract_json(raw)?, "verdict")?;

    let verdict = r
        .verdict
        .as_deref()
        .and_then(VerdictKind::parse)
        .ok_or_else(|| "verdict must be one of YES, NO, UNCERTAIN".to_string())?;
    let confidence_pct = normalize_pct(
        r.confidence_pct
            .ok_or_else(|| "confidence_pct is required and must be a number".to_string())?,
    )?;
    let summary = r
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "summary is required".to_string())?;

    let mut key_drivers: Vec<KeyDriver> = r
        .key_drivers
        .into_iter()
        .map(|d| match d {
            RawDriver::Text(text) => KeyDriver {
                text: text.trim().to_string(),
                source_ids: Vec::new(),
            },
            RawDriver::Cited { text, source_ids } => KeyDriver {
                text: text.trim().to_string(),
                source_ids: dedup_ids(source_ids),
            },
        })
        .filter(|d| !d.text.is_empty())
        .collect();
    key_drivers.truncate(MAX_KEY_DRIVERS);

    let listed = dedup_ids(r.sources.into_iter().map(|s| match s {
        RawSourceRef::Id(id) => id,
        RawSourceRef::Record { id } => id,
    }));
    let cited: Vec<String> = key_drivers
        .iter()
        .flat_map(|d| d.source_ids.iter().cloned())
        .collect();
    ensure_known(pool, &cited, "key_drivers")?;
    ensure_known(pool, &listed, "sources")?;

    let source_ids = dedup_ids(listed.into_iter().chain(cited));
    let sources: Vec<SourceRecord> = source_ids
        .iter()
        .filter_map(|id| pool.get(id).cloned())
        .collect();

    let v = Verdict {
        verdict,
        confidence_pct,
        summary,
        key_drivers,
        uncertainty_factors: clean_list(r.uncertainty_factors),
        next_steps: clean_list(r.next_steps),
        sources,
        analysis_timestamp: None,
        metadata: None,
    };
    v.check()?;
    Ok(v)
}

pub fn parse_planning(raw: &str, pool: &FrozenEvidence) -> Result<PlanningOutput, String> {
    let r: RawPlanning = from_value(extract_json(raw)?, "plan")?;
    let relevant_ids = dedup_ids(r.relevant_ids);
    ensure_known(pool, &relevant_ids, "relevant_ids")?;
    let prior_probability = normalize_pct(
        r.prior_probability
            .ok_or_else(|| "prior_probability is required and must be a number".to_string())?,
    )?;
    Ok(PlanningOutput {
        relevant_ids,
        prior_probability,
        steps: clean_list(r.steps),
    })
}

pub fn parse_critique(raw: &str, perspective: Perspective) -> Result<CritiqueOutput, String> {
    let r: RawCritique = from_value(extract_json(raw)?, "critique")?;
    let counter_arguments = clean_list(r.counter_arguments);
    if perspective == Perspective::DevilsAdvocate && counter_arguments.is_empty() {
        return Err(
            "devils_advocate perspective requires at least one strong counter_argument"
                .to_string(),
        );
    }
    Ok(CritiqueOutput {
        counter_arguments,
        risks: clean_list(r.risks),
    })
}

pub fn parse_follow_up(raw: &str, pool: &FrozenEvidence) -> Result<FollowUpOutput, String> {
    let r: RawFollowUp = from_value(extract_json(raw)?, "follow-up")?;
    let additional_ids = dedup_ids(r.additional_ids);
    ensure_known(pool, &additional_ids, "additional_ids")?;
    let revised_probability = normalize_pct(
        r.revised_probability
            .ok_or_else(|| "revised_probability is required and must be a number".to_string())?,
    )?;
    Ok(FollowUpOutput {
        additional_ids,
        gaps: clean_list(r.gaps),
        revised_probability,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{DedupKey, EvidencePool, SourceType};

    fn pool(n: usize) -> FrozenEvidence {
        let mut p = EvidencePool::new(10, DedupKey::default());
        p.add((1..=n).map(|i| {
            SourceRecord::new(SourceType::News, format!("item {i}"), format!("https://n/{i}"))
        }));
        p.freeze()
    }

    #[test]
    fn extract_json_handles_fences_prose_and_trailing_commas() {
        let raw = "Sure! Here you go:\n```json\n{\"a\": [1, 2,], \"b\": {\"c\": 3,},}\n```\nThanks";
        let v = extract_json(raw).unwrap();
        assert_eq!(v["a"][1], 2);
        assert_eq!(v["b"]["c"], 3);
        assert!(extract_json("no braces here").is_err());
    }

    #[test]
    fn bare_json_with_a_stray_closing_fence_is_accepted() {
        let raw = "{\"verdict\":\"YES\",\"confidence_pct\":64,\"summary\":\"s\",\"sources\":[\"SRC1\"]}\n```";
        let v = parse_verdict(raw, &pool(2)).unwrap();
        assert_eq!(v.verdict, VerdictKind::Yes);
        assert_eq!(v.confidence_pct, 64.0);

        // fence-only tail with leading prose
        let v = extract_json("Answer: {\"a\": 1}\n```\n").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn pct_policy() {
        assert_eq!(normalize_pct(0.62).unwrap(), 62.0);
        assert_eq!(normalize_pct(62.0).unwrap(), 62.0);
        assert_eq!(normalize_pct(140.0).unwrap(), 100.0);
        assert_eq!(normalize_pct(-5.0).unwrap(), 0.0);
        assert_eq!(normalize_pct(33.333).unwrap(), 33.3);
        assert!(normalize_pct(f64::NAN).is_err());
    }

    #[test]
    fn verdict_resolves_sources_and_appends_cited_ids() {
        let raw = r#"{
            "verdict": "yes", "confidence_pct": "71.26%", "summary": " Likely. ",
            "key_drivers": [{"text": "Polls", "source_ids": ["src2", "[SRC1]"]}, "Momentum"],
            "uncertainty_factors": ["Turnout", ""],
            "sources": [{"id": "SRC2"}]
        }"#;
        let v = parse_verdict(raw, &pool(3)).unwrap();
        assert_eq!(v.verdict, VerdictKind::Yes);
        assert_eq!(v.confidence_pct, 71.3);
        assert_eq!(v.summary, "Likely.");
        assert_eq!(v.key_drivers[0].source_ids, vec!["SRC2", "SRC1"]);
        assert!(v.key_drivers[1].source_ids.is_empty());
        let ids: Vec<&str> = v.sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["SRC2", "SRC1"]);
        assert_eq!(v.uncertainty_factors, vec!["Turnout"]);
        assert!(v.check().is_ok());
    }

    #[test]
    fn unknown_ids_are_rejected_with_the_valid_range() {
        let raw = r#"{"verdict":"NO","confidence_pct":40,"summary":"s",
            "key_drivers":[{"text":"t","source_ids":["SRC99"]}],"uncertainty_factors":[],"sources":[]}"#;
        let err = parse_verdict(raw, &pool(3)).unwrap_err();
        assert!(err.contains("SRC99"), "{err}");
        assert!(err.contains("SRC1..SRC3"), "{err}");

        let raw = r#"{"verdict":"NO","confidence_pct":40,"summary":"s","sources":["SRC7"]}"#;
        assert!(parse_verdict(raw, &pool(3)).is_err());
    }

    #[test]
    fn missing_required_fields_fail() {
        let p = pool(1);
        assert!(parse_verdict(r#"{"confidence_pct": 50, "summary": "s"}"#, &p).is_err());
        assert!(parse_verdict(r#"{"verdict": "MAYBE", "confidence_pct": 50, "summary": "s"}"#, &p).is_err());
        assert!(parse_verdict(r#"{"verdict": "YES", "summary": "s"}"#, &p).is_err());
        assert!(parse_verdict(r#"{"verdict": "YES", "confidence_pct": 50}"#, &p).is_err());
    }

    #[test]
    fn drivers_are_capped() {
        let drivers: Vec<String> = (0..8).map(|i| format!("\"d{i}\"")).collect();
        let raw = format!(
            r#"{{"verdict":"UNCERTAIN","confidence_pct":50,"summary":"s","key_drivers":[{}]}}"#,
            drivers.join(",")
        );
        let v = parse_verdict(&raw, &pool(1)).unwrap();
        assert_eq!(v.key_drivers.len(), MAX_KEY_DRIVERS);
    }

    #[test]
    fn intermediate_turns_validate_ids_and_probabilities() {
        let p = pool(4);
        let plan = parse_planning(
            r#"{"relevant_ids":["SRC1","SRC3"],"prior_probability":0.55,"steps":["weigh polls"]}"#,
            &p,
        )
        .unwrap();
        assert_eq!(plan.prior_probability, 55.0);
        assert!(parse_planning(r#"{"relevant_ids":["SRC9"],"prior_probability":50}"#, &p).is_err());

        let fu = parse_follow_up(
            r#"{"additional_ids":["SRC4"],"gaps":["no polling"],"revised_probability":"48"}"#,
            &p,
        )
        .unwrap();
        assert_eq!(fu.revised_probability, 48.0);
        assert!(parse_follow_up(r#"{"additional_ids":[],"gaps":[]}"#, &p).is_err());
    }

    #[test]
    fn devils_advocate_requires_a_counter_argument() {
        let empty = r#"{"counter_arguments": [], "risks": ["x"]}"#;
        assert!(parse_critique(empty, Perspective::Neutral).is_ok());
        let err = parse_critique(empty, Perspective::DevilsAdvocate).unwrap_err();
        assert!(err.contains("counter_argument"));
        assert!(parse_critique(
            r#"{"counter_arguments": ["Base rates say otherwise"]}"#,
            Perspective::DevilsAdvocate
        )
        .is_ok());
    }
}

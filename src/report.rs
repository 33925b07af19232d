// src/report.rs
//! Verdict -> `{markdown, json}`. Pure and deterministic: the same verdict always
//! renders the same bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analyze::Verdict;
use crate::evidence::SourceType;

/// The one output contract external consumers depend on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub markdown: String,
    pub json: Value,
}

pub fn format(verdict: &Verdict) -> Report {
    Report {
        markdown: render_markdown(verdict),
        json: serde_json::to_value(verdict).unwrap_or_default(),
    }
}

/// Re-read a report's `json` and re-check the citation invariant.
pub fn parse_json(json: &Value) -> Result<Verdict, String> {
    let v: Verdict =
        serde_json::from_value(json.clone()).map_err(|e| format!("invalid verdict JSON: {e}"))?;
    v.check()?;
    Ok(v)
}

pub fn render_markdown(v: &Verdict) -> String {
    let mut lines = vec![
        format!("### Verdict: **{}**", v.verdict.as_str()),
        format!("- Confidence: **{:.1}%**", v.confidence_pct),
    ];
    if let Some(ts) = v.analysis_timestamp {
        lines.push(format!("- Generated at: {}", ts.to_rfc3339()));
    }
    if let Some(meta) = &v.metadata {
        lines.push(format!(
            "- Mode: {} ({})",
            meta.mode.as_str(),
            meta.perspective.as_str()
        ));
    }

    lines.extend(["".to_string(), "#### Summary".to_string(), v.summary.trim().to_string()]);

    lines.extend(["".to_string(), "#### Key Drivers".to_string()]);
    if v.key_drivers.is_empty() {
        lines.push("- No salient drivers found.".to_string());
    }
    for d in &v.key_drivers {
        let refs = if d.source_ids.is_empty() {
            "_(no sources)_".to_string()
        } else {
            d.source_ids
                .iter()
                .map(|id| format!("[{id}]"))
                .collect::<Vec<_>>()
                .join("")
        };
        lines.push(format!("- {} {}", d.text, refs));
    }

    lines.extend(["".to_string(), "#### Risks / Uncertainty".to_string()]);
    if v.uncertainty_factors.is_empty() {
        lines.push("- Uncertainty not specified.".to_string());
    }
    lines.extend(v.uncertainty_factors.iter().map(|u| format!("- {u}")));

    if !v.next_steps.is_empty() {
        lines.extend(["".to_string(), "#### Next Steps".to_string()]);
        lines.extend(v.next_steps.iter().map(|s| format!("- {s}")));
    }

    lines.extend(["".to_string(), "#### Sources".to_string()]);
    if v.sources.is_empty() {
        lines.push("- None cited.".to_string());
    }
    for kind in SourceType::ALL {
        let group: Vec<_> = v.sources.iter().filter(|s| s.kind == kind).collect();
        if group.is_empty() {
            continue;
        }
        lines.push(format!("- **{}**", kind.as_str().to_uppercase()));
        for s in group {
            let title = if s.url.is_empty() {
                s.title.clone()
            } else {
                format!("[{}]({})", s.title, s.url)
            };
            lines.push(format!("  - [{}] {} ({})", s.id, title, s.sentiment.as_str()));
        }
    }

    lines.join("\n")
}

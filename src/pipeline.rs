// src/pipeline.rs
//! The single entry point every inbound surface funnels into.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use metrics::counter;
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::analyze::AnalysisOrchestrator;
use crate::config::{EvidenceSettings, Settings};
use crate::error::RunError;
use crate::evidence::EvidencePool;
use crate::llm::{DynLlmClient, OpenAiCompatClient};
use crate::market::{detect_platform, ContextCollector};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::report::{self, Report};
use crate::request::AnalysisRequest;
use crate::signals::{build_query, SignalAggregator};

pub struct Pipeline {
    collector: ContextCollector,
    aggregator: SignalAggregator,
    orchestrator: AnalysisOrchestrator,
    evidence: EvidenceSettings,
}

impl Pipeline {
    pub fn new(
        settings: &Settings,
        collector: ContextCollector,
        aggregator: SignalAggregator,
        llm: DynLlmClient,
    ) -> Self {
        Self {
            collector,
            aggregator,
            orchestrator: AnalysisOrchestrator::new(llm, settings.timeouts.llm())
                .with_excerpt_chars(settings.evidence.excerpt_chars),
            evidence: settings.evidence.clone(),
        }
    }

    /// Production wiring: one shared HTTP client, OpenAI-compatible model backend.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let http = http_client().context("building HTTP client")?;
        if !settings.llm.has_api_key() {
            warn!(target: "pipeline", "no language-model API key configured; analyses will fail");
        }
        let llm: DynLlmClient = std::sync::Arc::new(OpenAiCompatClient::new(
            http.clone(),
            settings.llm.clone(),
        ));
        Ok(Self::new(
            settings,
            ContextCollector::new(http.clone(), settings),
            SignalAggregator::from_settings(http, settings),
            llm,
        ))
    }

    pub async fn run(
        &self,
        req: &AnalysisRequest,
        sink: &dyn ProgressSink,
    ) -> Result<Report, RunError> {
        let res = self.run_inner(req, sink).await;
        let outcome = match &res {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        counter!("polyseek_runs_total", "depth" => req.depth.as_str(), "outcome" => outcome)
            .increment(1);
        if let Err(e) = &res {
            warn!(target: "pipeline", kind = e.kind(), error = %e, "run failed");
        }
        res
    }

    async fn run_inner(
        &self,
        req: &AnalysisRequest,
        sink: &dyn ProgressSink,
    ) -> Result<Report, RunError> {
        // Reject bad input before any network work.
        let url = req.validate()?;
        detect_platform(&url)?;

        let (market, context) = self.collector.fetch(&url).await?;
        sink.emit(ProgressEvent::json("MARKET_METADATA", json!(market)));

        let query = build_query(&market.title);
        let signals = self.aggregator.collect(&query).await;

        let mut pool = EvidencePool::new(self.evidence.budget_for(req.depth), self.evidence.dedup_key);
        pool.add(context);
        pool.add(signals);
        let (dupes, over) = (pool.dropped_duplicates(), pool.dropped_over_budget());
        if dupes > 0 {
            counter!("polyseek_evidence_dropped_total", "reason" => "duplicate").increment(dupes as u64);
        }
        if over > 0 {
            counter!("polyseek_evidence_dropped_total", "reason" => "budget").increment(over as u64);
        }
        let evidence = pool.freeze();
        info!(
            target: "pipeline",
            market_id = %market.market_id,
            %query,
            records = evidence.len(),
            dropped_duplicates = dupes,
            dropped_over_budget = over,
            "evidence frozen"
        );
        sink.emit(ProgressEvent::json(
            "EVIDENCE",
            json!({
                "records": evidence.len(),
                "ids": evidence.id_range(),
                "sparse": evidence.is_sparse(),
            }),
        ));

        let mut verdict = self.orchestrator.run(req, &market, &evidence, sink).await?;
        verdict.analysis_timestamp = Some(Utc::now());

        let report = report::format(&verdict);
        sink.emit(ProgressEvent::json("ANALYSIS_JSON", report.json.clone()));
        sink.emit(ProgressEvent::text("ANALYSIS_MARKDOWN", report.markdown.clone()));
        Ok(report)
    }
}

/// Shared outbound client. Per-call timeouts are set where each call is made.
pub fn http_client() -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(concat!("polyseek/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .build()
}

// src/evidence/mod.rs
//! Run-scoped evidence pool: dedup (first insert wins), silent truncation at the budget,
//! and `SRC1..SRCn` ids assigned once at `freeze()`.

pub mod record;
pub mod text;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

pub use record::{Sentiment, SourceRecord, SourceType};

/// Below this many non-market records the prompt is told evidence is sparse.
const SPARSE_THRESHOLD: usize = 3;

/// Which key decides that two records are the same piece of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    /// URL when present, normalized title + type otherwise.
    #[default]
    UrlThenTitle,
    /// Normalized title + type. A repeated URL is still a duplicate.
    Title,
}

impl std::str::FromStr for DedupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "url" | "url_then_title" => Ok(Self::UrlThenTitle),
            "title" => Ok(Self::Title),
            other => Err(format!("unknown dedup key '{other}'")),
        }
    }
}

#[derive(Debug)]
pub struct EvidencePool {
    records: Vec<SourceRecord>,
    seen: HashSet<String>,
    budget: usize,
    dedup: DedupKey,
    dropped_duplicates: usize,
    dropped_over_budget: usize,
}

impl EvidencePool {
    pub fn new(budget: usize, dedup: DedupKey) -> Self {
        Self {
            records: Vec::with_capacity(budget.min(256)),
            seen: HashSet::new(),
            budget,
            dedup,
            dropped_duplicates: 0,
            dropped_over_budget: 0,
        }
    }

    /// Append records in order. Duplicates and records beyond the budget are dropped.
    pub fn add<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = SourceRecord>,
    {
        for rec in records {
            let keys = self.keys_for(&rec);
            if keys.iter().any(|k| self.seen.contains(k)) {
                self.dropped_duplicates += 1;
                continue;
            }
            if self.records.len() >= self.budget {
                self.dropped_over_budget += 1;
                continue;
            }
            self.seen.extend(keys);
            self.records.push(rec);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dropped_duplicates(&self) -> usize {
        self.dropped_duplicates
    }

    pub fn dropped_over_budget(&self) -> usize {
        self.dropped_over_budget
    }

    /// Assign `SRC1..SRCn` in insertion order and make the pool read-only.
    pub fn freeze(self) -> FrozenEvidence {
        let mut records = self.records;
        let mut index = HashMap::with_capacity(records.len());
        for (i, rec) in records.iter_mut().enumerate() {
            rec.id = format!("SRC{}", i + 1);
            index.insert(rec.id.clone(), i);
        }
        FrozenEvidence { records, index }
    }

    /// Every key a record claims; it is a duplicate if any of them was seen before.
    fn keys_for(&self, rec: &SourceRecord) -> Vec<String> {
        let url = normalize_url(&rec.url);
        let url_key = (!url.is_empty()).then(|| format!("url:{url}"));
        let title_key = || {
            format!(
                "title:{}:{}",
                rec.kind.as_str(),
                text::normalize_title(&rec.title)
            )
        };
        match (self.dedup, url_key) {
            (DedupKey::UrlThenTitle, Some(u)) => vec![u],
            (DedupKey::Title, Some(u)) => vec![u, title_key()],
            (_, None) => vec![title_key()],
        }
    }
}

fn normalize_url(url: &str) -> String {
    let u = url.trim();
    let u = u.strip_suffix('/').unwrap_or(u);
    u.to_string()
}

/// Read-only evidence handed to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct FrozenEvidence {
    records: Vec<SourceRecord>,
    index: HashMap<String, usize>,
}

impl FrozenEvidence {
    pub fn get(&self, id: &str) -> Option<&SourceRecord> {
        self.index.get(id.trim()).map(|&i| &self.records[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id.trim())
    }

    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_sparse(&self) -> bool {
        self.records
            .iter()
            .filter(|r| r.kind != SourceType::Market)
            .count()
            < SPARSE_THRESHOLD
    }

    /// Ids from `candidates` that are not in the pool, in input order, without repeats.
    pub fn unknown_ids<'a, I>(&self, candidates: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut out: Vec<String> = Vec::new();
        for id in candidates {
            if !self.contains(id) && !out.iter().any(|x| x == id.trim()) {
                out.push(id.trim().to_string());
            }
        }
        out
    }

    /// Short description of the valid id range, used in validation errors.
    pub fn id_range(&self) -> String {
        match self.records.len() {
            0 => "none".to_string(),
            1 => "SRC1".to_string(),
            n => format!("SRC1..SRC{n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn news(title: &str, url: &str) -> SourceRecord {
        SourceRecord::new(SourceType::News, title, url)
    }

    #[test]
    fn ids_are_sequential_after_dedup_and_truncation() {
        let mut pool = EvidencePool::new(3, DedupKey::UrlThenTitle);
        pool.add(vec![
            news("a", "https://a"),
            news("a again", "https://a/"),
            news("b", "https://b"),
            news("c", "https://c"),
            news("d", "https://d"),
        ]);
        assert_eq!(pool.dropped_duplicates(), 1);
        assert_eq!(pool.dropped_over_budget(), 1);

        let frozen = pool.freeze();
        let ids: Vec<&str> = frozen.ids().collect();
        assert_eq!(ids, vec!["SRC1", "SRC2", "SRC3"]);
        assert_eq!(frozen.get("SRC1").unwrap().title, "a");
        assert!(frozen.get("SRC4").is_none());
    }

    #[test]
    fn first_insert_wins_on_same_url() {
        let mut pool = EvidencePool::new(10, DedupKey::UrlThenTitle);
        pool.add(vec![SourceRecord::new(
            SourceType::Comment,
            "from page",
            "https://m/x",
        )]);
        pool.add(vec![news("from feed", "https://m/x")]);
        let frozen = pool.freeze();
        assert_eq!(frozen.len(), 1);
        assert_eq!(frozen.records()[0].kind, SourceType::Comment);
    }

    #[test]
    fn urlless_records_dedup_on_title_and_type() {
        let mut pool = EvidencePool::new(10, DedupKey::UrlThenTitle);
        pool.add(vec![
            news("Fed holds rates", ""),
            news("FED holds rates!", ""),
            SourceRecord::new(SourceType::Sns, "Fed holds rates", ""),
        ]);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn title_key_ignores_urls() {
        let mut pool = EvidencePool::new(10, DedupKey::Title);
        pool.add(vec![news("Same story", "https://a"), news("same story", "https://b")]);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn title_key_still_collapses_a_repeated_url() {
        let mut pool = EvidencePool::new(10, DedupKey::Title);
        pool.add(vec![
            news("Original headline", "https://same/1"),
            news("Updated headline", "https://same/1/"),
            news("Another story", "https://other/2"),
        ]);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.dropped_duplicates(), 1);
        let frozen = pool.freeze();
        assert_eq!(frozen.records()[0].title, "Original headline");
        assert_eq!(frozen.records()[1].url, "https://other/2");
    }

    #[test]
    fn sparse_counts_non_market_records() {
        let mut pool = EvidencePool::new(10, DedupKey::default());
        pool.add(vec![
            SourceRecord::new(SourceType::Market, "m", "https://m"),
            news("a", "https://a"),
            news("b", "https://b"),
        ]);
        assert!(pool.freeze().is_sparse());
    }

    #[test]
    fn unknown_ids_are_reported_once() {
        let mut pool = EvidencePool::new(10, DedupKey::default());
        pool.add(vec![news("a", "https://a")]);
        let frozen = pool.freeze();
        let ids = vec!["SRC1".to_string(), "SRC9".to_string(), "SRC9".to_string()];
        assert_eq!(frozen.unknown_ids(&ids), vec!["SRC9".to_string()]);
        assert_eq!(frozen.id_range(), "SRC1");
    }
}

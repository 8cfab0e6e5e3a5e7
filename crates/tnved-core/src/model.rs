use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::code::CodeKey;

/// One code row extracted from the uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRecord {
    /// Code as written in the document, whitespace removed, e.g. "1234.56.00"
    pub code: String,
    /// Position name, e.g. "Widgets"
    pub description: String,
    /// Supplementary unit symbol, may be empty
    pub unit: String,
    /// Normalized key; `None` when the code failed validation
    pub key: Option<CodeKey>,
}

impl CodeRecord {
    pub fn is_malformed(&self) -> bool {
        self.key.is_none()
    }
}

/// A duty value as published by the source, e.g. "10", "5*", or
/// "20, но не менее 0,3 долл. США за килограмм".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DutyRate(String);

impl DutyRate {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DutyRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of the fetched rate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    pub key: CodeKey,
    /// Code as listed on the page before normalization
    pub source_code: String,
    pub rate: DutyRate,
    pub source_url: String,
    pub retrieved_at: DateTime<Utc>,
}

/// Code to rate mapping aggregated over every fetched page.
///
/// Inserting a key that is already present replaces the earlier record.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    rates: BTreeMap<CodeKey, RateRecord>,
    pages: Vec<String>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: RateRecord) {
        self.rates.insert(record.key.clone(), record);
    }

    pub fn record_page(&mut self, url: impl Into<String>) {
        self.pages.push(url.into());
    }

    pub fn get(&self, key: &str) -> Option<&RateRecord> {
        self.rates.get(key)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// URLs of the pages the table was built from, in fetch order.
    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn iter(&self) -> impl Iterator<Item = &RateRecord> {
        self.rates.values()
    }
}

impl FromIterator<RateRecord> for RateTable {
    fn from_iter<I: IntoIterator<Item = RateRecord>>(iter: I) -> Self {
        let mut table = RateTable::new();
        for record in iter {
            table.insert(record);
        }
        table
    }
}

/// A unit of measure from the document's units table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// e.g. "Килограмм"
    pub name: String,
    /// e.g. "кг"
    pub symbol: String,
    /// e.g. "166"
    pub code: String,
}

/// Unit symbol to unit code lookup.
#[derive(Debug, Clone, Default)]
pub struct UnitTable {
    codes: HashMap<String, String>,
}

impl UnitTable {
    pub fn code_for(&self, symbol: &str) -> Option<&str> {
        if symbol.is_empty() {
            return None;
        }
        self.codes.get(symbol).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl<'a> FromIterator<&'a Unit> for UnitTable {
    fn from_iter<I: IntoIterator<Item = &'a Unit>>(iter: I) -> Self {
        let codes = iter
            .into_iter()
            .map(|u| (u.symbol.clone(), u.code.clone()))
            .collect();
        Self { codes }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStatus {
    Matched,
    RateMissing,
    CodeMalformed,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Matched => "matched",
            MatchStatus::RateMissing => "rate-missing",
            MatchStatus::CodeMalformed => "code-malformed",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "matched" => Some(MatchStatus::Matched),
            "rate-missing" => Some(MatchStatus::RateMissing),
            "code-malformed" => Some(MatchStatus::CodeMalformed),
            _ => None,
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A code row joined with its rate. One per `CodeRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub code: String,
    pub description: String,
    pub unit: String,
    pub unit_code: String,
    pub rate: Option<DutyRate>,
    /// Rate-table key that supplied the rate (the code itself or a shorter heading)
    pub rate_key: Option<CodeKey>,
    pub status: MatchStatus,
}

/// Per-status counts over a merged record set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub total: usize,
    pub matched: usize,
    pub rate_missing: usize,
    pub code_malformed: usize,
}

impl MergeSummary {
    pub fn from_records(records: &[MergedRecord]) -> Self {
        let mut summary = MergeSummary {
            total: records.len(),
            ..Default::default()
        };
        for r in records {
            match r.status {
                MatchStatus::Matched => summary.matched += 1,
                MatchStatus::RateMissing => summary.rate_missing += 1,
                MatchStatus::CodeMalformed => summary.code_malformed += 1,
            }
        }
        summary
    }
}

/// Rendered workbook handed back to the caller.
#[derive(Debug, Clone)]
pub struct Report {
    pub bytes: Vec<u8>,
    pub file_name: &'static str,
    pub summary: ReportSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    #[serde(flatten)]
    pub merge: MergeSummary,
    pub rate_pages: usize,
    pub rate_entries: usize,
    pub source_url: String,
}

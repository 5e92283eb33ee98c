pub mod json_repair;
pub mod learning;
pub mod registry;
pub mod static_parser;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    Subject,
    Body,
}

/// One field-extraction rule, either authored into the static parser registry
/// or produced by the learning extractor and cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub source: RuleSource,
    pub regex: String,
    #[serde(default = "default_group")]
    pub group: usize,
    #[serde(default)]
    pub normalize: Option<HashMap<String, String>>,
}

fn default_group() -> usize {
    1
}

pub type ExtractionRuleSet = HashMap<String, ExtractionRule>;

/// Fields pulled out of a raw email, before severity/state normalization and
/// length-bounding are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub host: Option<String>,
    pub service: Option<String>,
    pub severity: Option<String>,
    pub state: Option<String>,
    pub summary: Option<String>,
}

impl ExtractedFields {
    /// Trims and length-bounds string fields the way the validation layer requires:
    /// 255 chars for identifying fields, 1000 for summary.
    pub fn sanitized(mut self) -> Self {
        self.host = self.host.map(|v| truncate(&v, 255));
        self.service = self.service.map(|v| truncate(&v, 255));
        self.summary = self.summary.map(|v| truncate(&v, 1000));
        self
    }

    pub fn has_identification(&self) -> bool {
        self.host.is_some() || self.service.is_some()
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.trim().chars().take(max_chars).collect()
}

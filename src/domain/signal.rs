use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Ordinal relevance of a post for the traded asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    None,
    Low,
    Medium,
    High,
}

impl Default for Impact {
    fn default() -> Self {
        Impact::None
    }
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::None => "none",
            Impact::Low => "low",
            Impact::Medium => "medium",
            Impact::High => "high",
        }
    }
}

impl std::fmt::Display for Impact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Impact {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" | "no" => Ok(Impact::None),
            "low" => Ok(Impact::Low),
            "medium" | "med" => Ok(Impact::Medium),
            "high" => Ok(Impact::High),
            other => Err(format!("unknown impact level '{}'", other)),
        }
    }
}

/// Predicted price direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Neutral,
    Undetermined,
}

impl Direction {
    /// Unknown or missing labels map to `Undetermined`
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(|l| l.trim().to_ascii_lowercase()) {
            Some(l) if l == "up" => Direction::Up,
            Some(l) if l == "down" => Direction::Down,
            Some(l) if l == "neutral" => Direction::Neutral,
            _ => Direction::Undetermined,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Neutral => "neutral",
            Direction::Undetermined => "undetermined",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier confidence in `[0, 1]`, held as a `Decimal` so threshold
/// comparisons are exact and totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Confidence(Decimal);

impl Confidence {
    pub const ZERO: Confidence = Confidence(Decimal::ZERO);

    pub fn new(value: Decimal) -> Option<Self> {
        if value >= Decimal::ZERO && value <= Decimal::ONE {
            Some(Self(value.normalize()))
        } else {
            None
        }
    }

    /// Floats from model output; NaN and out-of-range values are rejected
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        // Round-trip through the shortest decimal text so 0.95 stays 0.95
        let decimal = Decimal::from_str(&value.to_string())
            .ok()
            .or_else(|| Decimal::from_f64(value))?;
        Self::new(decimal)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Classifier output for one status. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalAssessment {
    topic_tags: BTreeSet<String>,
    impact: Impact,
    direction: Direction,
    confidence: Confidence,
    reasoning: Option<String>,
}

impl SignalAssessment {
    pub fn new<I, S>(topic_tags: I, impact: Impact, direction: Direction, confidence: Confidence) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let topic_tags = topic_tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        Self {
            topic_tags,
            impact,
            direction,
            confidence,
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Lowercased tags in sorted order
    pub fn topic_tags(&self) -> &BTreeSet<String> {
        &self.topic_tags
    }

    pub fn impact(&self) -> Impact {
        self.impact
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.topic_tags.contains(tag)
    }
}

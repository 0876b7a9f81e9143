//! Assessment to order intent
//!
//! Pure and deterministic: the same assessment and configuration always
//! yield the same decision.

use serde::Serialize;

use crate::config::{DecisionConfig, TierParams, TopicProfile};
use crate::domain::{Direction, OrderIntent, OrderSide, SignalAssessment, Tier};

/// Why an assessment did not produce an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoActionReason {
    NotMarketRelevant,
    ImpactBelowMinimum,
    BelowMediumThreshold,
    NonDirectional,
}

impl NoActionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotMarketRelevant => "not market relevant",
            Self::ImpactBelowMinimum => "impact below minimum",
            Self::BelowMediumThreshold => "confidence below medium threshold",
            Self::NonDirectional => "no price direction",
        }
    }
}

impl std::fmt::Display for NoActionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Decision {
    Trade(OrderIntent),
    NoAction(NoActionReason),
}

impl Decision {
    pub fn intent(&self) -> Option<&OrderIntent> {
        match self {
            Decision::Trade(intent) => Some(intent),
            Decision::NoAction(_) => None,
        }
    }
}

impl DecisionConfig {
    /// Profile name and parameters for an assessment: the first sorted tag
    /// with an override, else `default`
    pub fn profile_for<'a>(&'a self, assessment: &SignalAssessment) -> (&'a str, &'a TopicProfile) {
        assessment
            .topic_tags()
            .iter()
            .find_map(|tag| {
                self.topics
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(tag))
                    .map(|(name, profile)| (name.as_str(), profile))
            })
            .unwrap_or(("default", &self.default))
    }

    pub fn is_relevant(&self, assessment: &SignalAssessment) -> bool {
        self.relevant_topics
            .iter()
            .any(|topic| assessment.has_tag(&topic.trim().to_ascii_lowercase()))
    }
}

/// Map an assessment to an order intent or a no-action result.
pub fn decide(assessment: &SignalAssessment, config: &DecisionConfig) -> Decision {
    if !config.is_relevant(assessment) {
        return Decision::NoAction(NoActionReason::NotMarketRelevant);
    }
    if assessment.impact() < config.min_impact {
        return Decision::NoAction(NoActionReason::ImpactBelowMinimum);
    }

    let (profile_name, profile) = config.profile_for(assessment);
    let confidence = assessment.confidence().value();

    // Lower bounds are inclusive
    let (tier, table) = if confidence >= profile.high_threshold {
        (Tier::High, &profile.high)
    } else if confidence >= profile.medium_threshold {
        (Tier::Medium, &profile.medium)
    } else {
        return Decision::NoAction(NoActionReason::BelowMediumThreshold);
    };

    let (side, params): (OrderSide, &TierParams) = match assessment.direction() {
        Direction::Up => (OrderSide::Buy, &table.buy),
        Direction::Down => (OrderSide::Short, &table.short),
        Direction::Neutral | Direction::Undetermined => {
            return Decision::NoAction(NoActionReason::NonDirectional)
        }
    };

    Decision::Trade(OrderIntent::from_tier(
        side,
        params.amount,
        params.leverage,
        params.limit_offset,
        tier,
        profile_name,
    ))
}

/// Holds the immutable decision configuration for the process lifetime
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub fn decide(&self, assessment: &SignalAssessment) -> Decision {
        decide(assessment, &self.config)
    }
}

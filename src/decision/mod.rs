//! Decision gate - BUY / SELL / REFUSE
//!
//! A trade is only taken when every gate passes; each failed gate is
//! reported so a refusal can be explained.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Crisis probability above which trading is blocked unless allowed
pub const CRISIS_PROBABILITY_LIMIT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Buy,
    Sell,
    Refuse,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Buy => "BUY",
            Verdict::Sell => "SELL",
            Verdict::Refuse => "REFUSE",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    /// Mispricing inside the dead zone
    NoSignal,
    LowConfidence,
    BelowMinimumPosition,
    CrisisRegime,
}

impl fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefusalReason::NoSignal => "no_signal",
            RefusalReason::LowConfidence => "low_confidence",
            RefusalReason::BelowMinimumPosition => "below_minimum_position",
            RefusalReason::CrisisRegime => "crisis_regime",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Confidence must be strictly above this
    pub min_confidence: f64,
    pub allow_crisis_trades: bool,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            allow_crisis_trades: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionInputs {
    pub mispricing: f64,
    pub confidence: f64,
    /// Signed position from the sizer
    pub position: f64,
    pub crisis_probability: f64,
}

/// Verdict plus the sized position. On REFUSE `position` is still the
/// sizer's output so the report shows what was declined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub position: f64,
    pub confidence: f64,
    pub refusals: Vec<RefusalReason>,
}

impl Decision {
    pub fn is_trade(&self) -> bool {
        self.verdict != Verdict::Refuse
    }
}

pub struct DecisionEngine {
    config: DecisionConfig,
    min_position: f64,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig, min_position: f64) -> Self {
        Self {
            config,
            min_position,
        }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub fn decide(&self, inputs: &DecisionInputs) -> Decision {
        let mut refusals = Vec::new();

        if inputs.mispricing == 0.0 || !inputs.mispricing.is_finite() {
            refusals.push(RefusalReason::NoSignal);
        }
        if inputs.confidence.is_nan() || inputs.confidence <= self.config.min_confidence {
            refusals.push(RefusalReason::LowConfidence);
        }
        if inputs.position.is_nan() || inputs.position.abs() < self.min_position {
            refusals.push(RefusalReason::BelowMinimumPosition);
        }
        if inputs.crisis_probability > CRISIS_PROBABILITY_LIMIT && !self.config.allow_crisis_trades {
            refusals.push(RefusalReason::CrisisRegime);
        }

        let verdict = if !refusals.is_empty() {
            Verdict::Refuse
        } else if inputs.mispricing < 0.0 {
            Verdict::Buy
        } else {
            Verdict::Sell
        };

        if refusals.is_empty() {
            info!(
                "Verdict {} | position={:.2}%, confidence={:.2}",
                verdict,
                inputs.position * 100.0,
                inputs.confidence
            );
        } else {
            let reasons: Vec<String> = refusals.iter().map(|r| r.to_string()).collect();
            info!("Verdict REFUSE | {}", reasons.join(", "));
        }

        Decision {
            verdict,
            position: inputs.position,
            confidence: inputs.confidence,
            refusals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(allow_crisis_trades: bool) -> DecisionEngine {
        DecisionEngine::new(
            DecisionConfig {
                min_confidence: 0.6,
                allow_crisis_trades,
            },
            0.01,
        )
    }

    fn inputs(mispricing: f64, confidence: f64) -> DecisionInputs {
        DecisionInputs {
            mispricing,
            confidence,
            position: if mispricing < 0.0 { 0.05 } else { -0.05 },
            crisis_probability: 0.0,
        }
    }

    #[test]
    fn all_gates_pass() {
        assert_eq!(engine(false).decide(&inputs(-0.08, 0.9)).verdict, Verdict::Buy);
        assert_eq!(engine(false).decide(&inputs(0.08, 0.9)).verdict, Verdict::Sell);
    }

    #[test]
    fn low_confidence_always_refuses() {
        for m in [-0.5, -0.02, 0.02, 0.5] {
            for c in [0.0, 0.3, 0.6] {
                let d = engine(true).decide(&inputs(m, c));
                assert_eq!(d.verdict, Verdict::Refuse);
                assert!(d.refusals.contains(&RefusalReason::LowConfidence));
            }
        }
    }

    #[test]
    fn crisis_blocks_unless_allowed() {
        let stressed = DecisionInputs {
            crisis_probability: 0.7,
            ..inputs(-0.08, 0.9)
        };
        let blocked = engine(false).decide(&stressed);
        assert_eq!(blocked.refusals, vec![RefusalReason::CrisisRegime]);
        assert_eq!(engine(true).decide(&stressed).verdict, Verdict::Buy);
    }

    #[test]
    fn every_failed_gate_is_listed() {
        let d = engine(false).decide(&DecisionInputs {
            mispricing: 0.0,
            confidence: 0.5,
            position: 0.0,
            crisis_probability: 0.7,
        });
        assert_eq!(
            d.refusals,
            vec![
                RefusalReason::NoSignal,
                RefusalReason::LowConfidence,
                RefusalReason::BelowMinimumPosition,
                RefusalReason::CrisisRegime,
            ]
        );
        assert_eq!(d.verdict.to_string(), "REFUSE");
        assert_eq!(d.refusals[2].to_string(), "below_minimum_position");
    }
}

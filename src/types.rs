//! Core types used throughout the engine
//!
//! Defines the time-indexed series container, regime labels and the
//! soft regime probability triple shared by every stage.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{EngineError, Result};

/// Trading-day timestamp
pub type Timestamp = NaiveDate;

/// How to fill timestamps that are missing from the source when reindexing
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillPolicy<T> {
    /// Use a fixed value
    Value(T),
    /// Carry the last seen value forward; the payload is used before the first one
    Forward(T),
}

/// Ordered, timestamp-indexed series
///
/// The index is strictly increasing (chronological, no duplicates) and always
/// has the same length as the values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries<T> {
    index: Vec<Timestamp>,
    values: Vec<T>,
}

impl<T> TimeSeries<T> {
    pub fn new(index: Vec<Timestamp>, values: Vec<T>) -> Result<Self> {
        if index.len() != values.len() {
            return Err(EngineError::Misaligned(format!(
                "index has {} timestamps but {} values",
                index.len(),
                values.len()
            )));
        }
        if let Some(pos) = index.windows(2).position(|w| w[1] <= w[0]) {
            return Err(EngineError::UnorderedIndex(pos + 1));
        }
        Ok(Self { index, values })
    }

    pub fn empty() -> Self {
        Self {
            index: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn index(&self) -> &[Timestamp] {
        &self.index
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Timestamp, &T)> + '_ {
        self.index.iter().zip(self.values.iter())
    }

    pub fn last(&self) -> Option<&T> {
        self.values.last()
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.index.last().copied()
    }

    /// Apply `f` to every value, keeping the index
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> TimeSeries<U> {
        TimeSeries {
            index: self.index.clone(),
            values: self.values.iter().map(f).collect(),
        }
    }

    /// Combine two series sharing the exact same index
    pub fn zip_with<U, V, F>(&self, other: &TimeSeries<U>, mut f: F) -> Result<TimeSeries<V>>
    where
        F: FnMut(&T, &U) -> V,
    {
        if self.index != other.index {
            return Err(EngineError::Misaligned(format!(
                "cannot combine series of {} and {} timestamps with different indexes",
                self.len(),
                other.len()
            )));
        }
        Ok(TimeSeries {
            index: self.index.clone(),
            values: self
                .values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| f(a, b))
                .collect(),
        })
    }
}

impl<T: Clone> TimeSeries<T> {
    /// Align onto `target`, filling timestamps absent from `self` per `fill`.
    ///
    /// Values whose timestamp is not in `target` are dropped; every target
    /// timestamp receives exactly one value.
    pub fn reindex(&self, target: &[Timestamp], fill: FillPolicy<T>) -> Result<TimeSeries<T>> {
        if let Some(pos) = target.windows(2).position(|w| w[1] <= w[0]) {
            return Err(EngineError::UnorderedIndex(pos + 1));
        }

        let mut values = Vec::with_capacity(target.len());
        let mut cursor = 0;
        let mut carried: Option<T> = None;

        for ts in target {
            while cursor < self.index.len() && self.index[cursor] < *ts {
                carried = Some(self.values[cursor].clone());
                cursor += 1;
            }
            if cursor < self.index.len() && self.index[cursor] == *ts {
                let v = self.values[cursor].clone();
                carried = Some(v.clone());
                values.push(v);
                cursor += 1;
                continue;
            }
            let filled = match &fill {
                FillPolicy::Value(v) => v.clone(),
                FillPolicy::Forward(initial) => carried.clone().unwrap_or_else(|| initial.clone()),
            };
            values.push(filled);
        }

        Ok(TimeSeries {
            index: target.to_vec(),
            values,
        })
    }
}

/// Market regime label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Bull,
    Sideways,
    Crisis,
}

impl Regime {
    /// All regimes, in tie-break order
    pub const ALL: [Regime; 3] = [Regime::Bull, Regime::Sideways, Regime::Crisis];

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Bull => "bull",
            Regime::Sideways => "sideways",
            Regime::Crisis => "crisis",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Regime {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bull" => Ok(Regime::Bull),
            "sideways" => Ok(Regime::Sideways),
            "crisis" => Ok(Regime::Crisis),
            _ => Err(EngineError::UnknownRegime(s.to_string())),
        }
    }
}

/// Soft regime label: mutually exclusive weights summing to one
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeProbabilities {
    pub bull: f64,
    pub sideways: f64,
    pub crisis: f64,
}

impl Default for RegimeProbabilities {
    fn default() -> Self {
        Self::sideways()
    }
}

impl RegimeProbabilities {
    /// Pure sideways, the safe default when history is insufficient
    pub fn sideways() -> Self {
        Self {
            bull: 0.0,
            sideways: 1.0,
            crisis: 0.0,
        }
    }

    /// `weight` on crisis, remainder on sideways
    pub fn crisis_leaning(weight: f64) -> Self {
        Self {
            bull: 0.0,
            sideways: 1.0 - weight,
            crisis: weight,
        }
    }

    /// `weight` on bull, remainder on sideways
    pub fn bull_leaning(weight: f64) -> Self {
        Self {
            bull: weight,
            sideways: 1.0 - weight,
            crisis: 0.0,
        }
    }

    pub fn get(&self, regime: Regime) -> f64 {
        match regime {
            Regime::Bull => self.bull,
            Regime::Sideways => self.sideways,
            Regime::Crisis => self.crisis,
        }
    }

    pub fn sum(&self) -> f64 {
        self.bull + self.sideways + self.crisis
    }

    /// Most probable regime; ties resolve bull, then sideways, then crisis
    pub fn dominant(&self) -> Regime {
        let mut best = Regime::Bull;
        for regime in Regime::ALL {
            if self.get(regime) > self.get(best) {
                best = regime;
            }
        }
        best
    }

    /// Probability-weighted combination `Σ P(regime) · value(regime)`
    pub fn blend<F: Fn(Regime) -> f64>(&self, value: F) -> f64 {
        Regime::ALL
            .iter()
            .map(|&r| self.get(r) * value(r))
            .sum()
    }
}

impl fmt::Display for RegimeProbabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bull={:.2} sideways={:.2} crisis={:.2}",
            self.bull, self.sideways, self.crisis
        )
    }
}

/// Convert a price series into log returns `ln(P_t / P_{t-1})`.
///
/// The result is indexed by the later timestamp of each pair and has one
/// element fewer than the input.
pub fn log_returns(prices: &TimeSeries<f64>) -> Result<TimeSeries<f64>> {
    if let Some(pos) = prices
        .values()
        .iter()
        .position(|p| !p.is_finite() || *p <= 0.0)
    {
        return Err(EngineError::DegenerateInput(format!(
            "price at position {} is not a positive finite number",
            pos
        )));
    }
    if prices.len() < 2 {
        return Ok(TimeSeries::empty());
    }

    let values = prices
        .values()
        .windows(2)
        .map(|w| (w[1] / w[0]).ln())
        .collect();

    TimeSeries::new(prices.index()[1..].to_vec(), values)
}

#[cfg(test)]
pub(crate) fn daily_index(n: usize) -> Vec<Timestamp> {
    let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
    (0..n)
        .map(|i| start + chrono::Duration::days(i as i64))
        .collect()
}

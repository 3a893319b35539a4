//! Models module.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::sparse::CsrMatrix;
use crate::ConfigurationError;

pub mod sar;

/// Transform turning item co-occurrence counts into similarities.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityType {
    /// Raw co-occurrence counts.
    Cooccurrence,
    /// `c_ij / (c_ii + c_jj - c_ij)`.
    Jaccard,
    /// `c_ij / (c_ii * c_jj)`.
    Lift,
}

impl SimilarityType {
    /// Apply the transform to a square co-occurrence matrix. The result has
    /// the sparsity pattern of `cooccurrence`; entries whose denominator is
    /// zero are zero.
    pub fn transform(self, cooccurrence: &CsrMatrix) -> CsrMatrix {
        match self {
            SimilarityType::Cooccurrence => cooccurrence.clone(),
            SimilarityType::Jaccard => jaccard(cooccurrence),
            SimilarityType::Lift => lift(cooccurrence),
        }
    }
}

impl fmt::Display for SimilarityType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SimilarityType::Cooccurrence => "cooccurrence",
            SimilarityType::Jaccard => "jaccard",
            SimilarityType::Lift => "lift",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for SimilarityType {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "cooccurrence" => Ok(SimilarityType::Cooccurrence),
            "jaccard" => Ok(SimilarityType::Jaccard),
            "lift" => Ok(SimilarityType::Lift),
            other => Err(ConfigurationError::UnknownSimilarityType(other.to_owned())),
        }
    }
}

/// How two time-decayed incidence weights of the same user combine into
/// a co-occurrence contribution. Without time decay every incidence weight
/// is 1 and all variants count co-occurring users.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecayCombination {
    /// The smaller of the two weights.
    Min,
    /// The product of the two weights.
    Product,
    /// 1 whenever both items were seen, ignoring decay.
    Indicator,
}

impl DecayCombination {
    /// Combine two incidence weights.
    pub fn combine(self, first: f64, second: f64) -> f64 {
        match self {
            DecayCombination::Min => first.min(second),
            DecayCombination::Product => first * second,
            DecayCombination::Indicator => 1.0,
        }
    }
}

impl FromStr for DecayCombination {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "min" => Ok(DecayCombination::Min),
            "product" => Ok(DecayCombination::Product),
            "indicator" => Ok(DecayCombination::Indicator),
            other => Err(ConfigurationError::UnknownDecayCombination(
                other.to_owned(),
            )),
        }
    }
}

/// Exponential decay weight of an event at `value` observed at `max_val`:
/// `2^(-(max_val - value) / half_life)`. Events after `max_val` weigh 1.
pub fn exponential_decay(value: f64, max_val: f64, half_life: f64) -> f64 {
    2.0_f64.powf(-(max_val - value) / half_life).min(1.0)
}

/// Jaccard similarity of a co-occurrence matrix.
pub fn jaccard(cooccurrence: &CsrMatrix) -> CsrMatrix {
    let diagonal = cooccurrence.diagonal();

    cooccurrence.map_entries(|row, col, value| {
        let denominator = diagonal[row] + diagonal[col] - value;
        if denominator > 0.0 {
            value / denominator
        } else {
            0.0
        }
    })
}

/// Lift similarity of a co-occurrence matrix. Self-similarity is 1 for
/// every item with a non-zero co-occurrence diagonal.
pub fn lift(cooccurrence: &CsrMatrix) -> CsrMatrix {
    let diagonal = cooccurrence.diagonal();

    cooccurrence.map_entries(|row, col, value| {
        if row == col {
            return if value > 0.0 { 1.0 } else { 0.0 };
        }

        let denominator = diagonal[row] * diagonal[col];
        if denominator > 0.0 {
            value / denominator
        } else {
            0.0
        }
    })
}

//! Complexity tiers that control the render sample budget.
//!
//! - `Simple`: flat, opaque parts (256 samples)
//! - `Medium`: curved or mildly detailed parts (320 samples)
//! - `Complex`: mechanical detail, thin features (400 samples)
//! - `TransparentReflective`: glass, chrome, pearlescent finishes (480 samples)

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Complexity class of a part/scene.
///
/// Variants are declared in increasing budget order so `Ord` ranks them;
/// `TransparentReflective` is the maximum and therefore wins every tie-break.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityClass {
    Simple,
    #[default]
    Medium,
    Complex,
    TransparentReflective,
}

impl ComplexityClass {
    /// All tiers, cheapest first.
    pub const ALL: &'static [ComplexityClass] = &[
        ComplexityClass::Simple,
        ComplexityClass::Medium,
        ComplexityClass::Complex,
        ComplexityClass::TransparentReflective,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityClass::Simple => "simple",
            ComplexityClass::Medium => "medium",
            ComplexityClass::Complex => "complex",
            ComplexityClass::TransparentReflective => "transparent_reflective",
        }
    }

    /// Fixed sample budget for this tier.
    pub fn sample_budget(&self) -> u32 {
        match self {
            ComplexityClass::Simple => 256,
            ComplexityClass::Medium => 320,
            ComplexityClass::Complex => 400,
            ComplexityClass::TransparentReflective => 480,
        }
    }

    /// Returns the higher of two tiers.
    pub fn raise_to(self, other: ComplexityClass) -> ComplexityClass {
        self.max(other)
    }
}

impl fmt::Display for ComplexityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ComplexityClass {
    type Err = ComplexityClassParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(ComplexityClass::Simple),
            "medium" => Ok(ComplexityClass::Medium),
            "complex" => Ok(ComplexityClass::Complex),
            "transparent_reflective" | "transparent" | "reflective" => {
                Ok(ComplexityClass::TransparentReflective)
            }
            _ => Err(ComplexityClassParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown complexity class: {0}")]
pub struct ComplexityClassParseError(String);

//! Challenge categories and the engine each one is routed to.

use crate::error::VerifyError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which engine judges a category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Photo scored by a trained image classifier
    Classification,
    /// Bill-like document read by an extractor
    Extraction,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classification => write!(f, "classification"),
            Self::Extraction => write!(f, "extraction"),
        }
    }
}

/// Known challenge categories.
///
/// Parsing an unknown tag yields [`VerifyError::UnsupportedCategory`], which
/// the router reports as a "not supported" verdict rather than a failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeCategory {
    /// Photo of a plastic-free purchase or meal
    PlasticFree,
    /// Photo taken on public transport
    PublicTransport,
    /// Photo of a newly planted tree
    TreePlanting,
    /// Electricity bill showing reduced consumption
    EnergyBill,
    /// Water bill showing reduced consumption
    WaterBill,
}

impl ChallengeCategory {
    /// Every category in declaration order
    pub const ALL: [Self; 5] = [
        Self::PlasticFree,
        Self::PublicTransport,
        Self::TreePlanting,
        Self::EnergyBill,
        Self::WaterBill,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PlasticFree => "plastic-free",
            Self::PublicTransport => "public-transport",
            Self::TreePlanting => "tree-planting",
            Self::EnergyBill => "energy-bill",
            Self::WaterBill => "water-bill",
        }
    }

    /// Engine responsible for this category
    #[must_use]
    pub const fn engine(&self) -> EngineKind {
        match self {
            Self::PlasticFree | Self::PublicTransport | Self::TreePlanting => {
                EngineKind::Classification
            }
            Self::EnergyBill | Self::WaterBill => EngineKind::Extraction,
        }
    }
}

impl fmt::Display for ChallengeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChallengeCategory {
    type Err = VerifyError;

    /// Parse a category tag; underscores and case are tolerated
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| VerifyError::UnsupportedCategory(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip_tags() {
        for category in ChallengeCategory::ALL {
            let parsed: ChallengeCategory = category.as_str().parse().expect("known tag");
            assert_eq!(parsed, category);
        }
    }

    #[test]
    fn test_category_parse_tolerates_case_and_underscores() {
        assert_eq!(
            "Energy_Bill".parse::<ChallengeCategory>().ok(),
            Some(ChallengeCategory::EnergyBill)
        );
    }

    #[test]
    fn test_category_parse_unknown() {
        let err = "zero-waste".parse::<ChallengeCategory>().unwrap_err();
        assert_eq!(err, VerifyError::UnsupportedCategory("zero-waste".to_string()));
    }

    #[test]
    fn test_category_engines() {
        assert_eq!(
            ChallengeCategory::PlasticFree.engine(),
            EngineKind::Classification
        );
        assert_eq!(ChallengeCategory::WaterBill.engine(), EngineKind::Extraction);
    }

    #[test]
    fn test_category_serde_kebab_case() {
        let yaml = serde_yaml::to_string(&ChallengeCategory::PublicTransport).expect("serialize");
        assert_eq!(yaml.trim(), "public-transport");
    }
}

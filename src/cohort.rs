//! Cohort composition: walk each definition's stages in order and settle one terminal state
//! per decedent per definition.

use crate::criteria::{Check, EligibilityFlags};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two donor definitions the engine classifies against.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Definition {
    /// CMS-based administrative criteria (cause of death, age, contraindications).
    Calc,
    /// Medical eligibility criteria over the ICU record.
    Clif,
}

impl Definition {
    pub const ALL: [Definition; 2] = [Definition::Calc, Definition::Clif];

    /// Stage order, exactly as the funnel reports it. The leading `Expired` stage is the
    /// population gate: composer input is decedents only, so it never excludes here.
    pub fn stages(self) -> &'static [Stage] {
        match self {
            Definition::Calc => &[
                Stage::Expired,
                Stage::DeathTime,
                Stage::Age,
                Stage::Cause,
                Stage::NoContraindication,
            ],
            Definition::Clif => &[
                Stage::Expired,
                Stage::DeathTime,
                Stage::Location,
                Stage::Age,
                Stage::Imv,
                Stage::NoContraindication,
                Stage::OrganQuality,
            ],
        }
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Definition::Calc => f.write_str("CALC"),
            Definition::Clif => f.write_str("CLIF"),
        }
    }
}

/// A step in a definition's funnel. Some stages are shared between definitions, some belong
/// to only one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "expired")]
    Expired,
    /// A usable death instant could be settled.
    #[serde(rename = "death_time_known")]
    DeathTime,
    #[serde(rename = "location_eligible")]
    Location,
    #[serde(rename = "age_eligible")]
    Age,
    #[serde(rename = "imv_eligible")]
    Imv,
    #[serde(rename = "cause_eligible")]
    Cause,
    #[serde(rename = "no_contraindication")]
    NoContraindication,
    #[serde(rename = "organ_quality_eligible")]
    OrganQuality,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            Stage::Expired => "expired",
            Stage::DeathTime => "death_time_known",
            Stage::Location => "location_eligible",
            Stage::Age => "age_eligible",
            Stage::Imv => "imv_eligible",
            Stage::Cause => "cause_eligible",
            Stage::NoContraindication => "no_contraindication",
            Stage::OrganQuality => "organ_quality_eligible",
        };
        f.write_str(label)
    }
}

/// Terminal state for one decedent under one definition. Exactly one per decedent: either
/// every stage passed, or the first failing stage is recorded and later stages were never
/// consulted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    Included,
    Excluded(Stage),
}

impl Outcome {
    pub fn is_included(self) -> bool {
        matches!(self, Outcome::Included)
    }

    pub fn excluded_at(self) -> Option<Stage> {
        match self {
            Outcome::Included => None,
            Outcome::Excluded(stage) => Some(stage),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Included => f.write_str("included"),
            Outcome::Excluded(stage) => write!(f, "excluded@{}", stage),
        }
    }
}

// Serialized as the display string so the cohort csv gets one flat cell per definition.
impl Serialize for Outcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Walk one definition's stages in order, stopping at the first failure. `flags` is `None`
/// when no death instant could be settled, which excludes at the death-time stage; the
/// remaining flags are unknowable without an anchor.
pub fn compose(def: Definition, flags: Option<&EligibilityFlags>) -> Outcome {
    for stage in def.stages().iter().copied() {
        let passed = match (stage, flags) {
            (Stage::Expired, _) => true,
            (Stage::DeathTime, flags) => flags.is_some(),
            (_, None) => false,
            (stage, Some(flags)) => stage_flag(def, stage, flags).passes(),
        };
        if !passed {
            return Outcome::Excluded(stage);
        }
    }
    Outcome::Included
}

fn stage_flag(def: Definition, stage: Stage, flags: &EligibilityFlags) -> Check {
    match (def, stage) {
        (_, Stage::Expired | Stage::DeathTime) => Check::Pass,
        (_, Stage::Location) => flags.location_eligible,
        (_, Stage::Age) => flags.age_eligible,
        (_, Stage::Imv) => flags.imv_eligible,
        (_, Stage::Cause) => flags.cause_eligible,
        (Definition::Calc, Stage::NoContraindication) => flags.no_contraindication_calc,
        (Definition::Clif, Stage::NoContraindication) => flags.no_contraindication_clif,
        (_, Stage::OrganQuality) => flags.organ_quality_eligible,
    }
}

/// Both definitions' terminal states for one decedent.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Outcomes {
    pub calc: Outcome,
    pub clif: Outcome,
}

impl Outcomes {
    pub fn compose(flags: Option<&EligibilityFlags>) -> Self {
        Self {
            calc: compose(Definition::Calc, flags),
            clif: compose(Definition::Clif, flags),
        }
    }

    pub fn get(self, def: Definition) -> Outcome {
        match def {
            Definition::Calc => self.calc,
            Definition::Clif => self.clif,
        }
    }
}

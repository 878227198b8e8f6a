//! Criterion evaluators: pure maps from one decedent's features to named eligibility flags.
//!
//! Every evaluator is total. A record that lacks the data a criterion needs evaluates to
//! [`Check::Unknown`], and whether unknown passes is decided in exactly one place,
//! [`MISSING_FAILS`], rather than re-implemented per evaluator.

use crate::{features::FeatureRecord, icd::DxCategories};
use serde::{Deserialize, Serialize};

/// The conservative default: a missing measurement never passes a criterion.
pub const MISSING_FAILS: bool = true;

/// Upper age bound shared by both definitions, years.
pub const MAX_AGE_YEARS: f64 = 75.0;
/// Kidney: peak creatinine must stay under this, mg/dL.
pub const MAX_CREATININE: f64 = 4.0;
/// Liver: peak total bilirubin under this, mg/dL.
pub const MAX_BILIRUBIN: f64 = 4.0;
/// Liver: peak AST and ALT under this, U/L.
pub const MAX_TRANSAMINASE: f64 = 700.0;
/// Body mass index at or under this, kg/m².
pub const MAX_BMI: f64 = 50.0;
/// Death locations compatible with donation workup.
pub const ELIGIBLE_LOCATIONS: [&str; 4] = ["ed", "ward", "stepdown", "icu"];

/// Outcome of one criterion against one record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    Pass,
    Fail,
    /// The record lacks the data to decide.
    Unknown,
}

impl Check {
    fn of(cond: bool) -> Self {
        if cond {
            Check::Pass
        } else {
            Check::Fail
        }
    }

    fn of_opt(cond: Option<bool>) -> Self {
        match cond {
            Some(cond) => Check::of(cond),
            None => Check::Unknown,
        }
    }

    pub fn passes(self) -> bool {
        match self {
            Check::Pass => true,
            Check::Fail => false,
            Check::Unknown => !MISSING_FAILS,
        }
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, Check::Unknown)
    }

    /// Three-valued AND: a known fail beats an unknown.
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Check::Fail, _) | (_, Check::Fail) => Check::Fail,
            (Check::Pass, Check::Pass) => Check::Pass,
            _ => Check::Unknown,
        }
    }

    /// Three-valued OR: a known pass beats an unknown.
    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Check::Pass, _) | (_, Check::Pass) => Check::Pass,
            (Check::Fail, Check::Fail) => Check::Fail,
            _ => Check::Unknown,
        }
    }
}

pub fn age_eligible(age_years: Option<f64>) -> Check {
    Check::of_opt(age_years.map(|age| age <= MAX_AGE_YEARS))
}

pub fn location_eligible(location: Option<&str>) -> Check {
    Check::of_opt(location.map(|loc| ELIGIBLE_LOCATIONS.contains(&loc)))
}

pub fn cause_eligible(dx: &DxCategories) -> Check {
    Check::of(dx.any_cause())
}

pub fn no_contraindication_calc(dx: &DxCategories) -> Check {
    Check::of(!dx.any_contraindication())
}

pub fn no_contraindication_clif(dx: &DxCategories, positive_blood_culture: bool) -> Check {
    Check::of(!dx.any_contraindication() && !positive_blood_culture)
}

pub fn imv_eligible(imv_in_window: bool) -> Check {
    Check::of(imv_in_window)
}

pub fn kidney_eligible(max_creatinine: Option<f64>, crrt_ever: bool) -> Check {
    if crrt_ever {
        return Check::Fail;
    }
    Check::of_opt(max_creatinine.map(|cr| cr < MAX_CREATININE))
}

/// All three labs must be present and under threshold. Partial data is not partial credit.
pub fn liver_eligible(
    max_bilirubin_total: Option<f64>,
    max_ast: Option<f64>,
    max_alt: Option<f64>,
) -> Check {
    match (max_bilirubin_total, max_ast, max_alt) {
        (Some(bilirubin), Some(ast), Some(alt)) => {
            Check::of(bilirubin < MAX_BILIRUBIN && ast < MAX_TRANSAMINASE && alt < MAX_TRANSAMINASE)
        }
        _ => Check::Unknown,
    }
}

pub fn bmi_eligible(bmi: Option<f64>) -> Check {
    Check::of_opt(bmi.map(|bmi| bmi <= MAX_BMI))
}

/// The named flags, all computed for every decedent regardless of where the composer stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityFlags {
    pub age_eligible: Check,
    pub location_eligible: Check,
    pub cause_eligible: Check,
    pub no_contraindication_calc: Check,
    pub no_contraindication_clif: Check,
    pub imv_eligible: Check,
    pub kidney_eligible: Check,
    pub liver_eligible: Check,
    pub bmi_eligible: Check,
    pub organ_quality_eligible: Check,
}

impl EligibilityFlags {
    pub fn evaluate(age_years: Option<f64>, features: &FeatureRecord) -> Self {
        let kidney = kidney_eligible(features.max_creatinine, features.crrt_ever);
        let liver =
            liver_eligible(features.max_bilirubin_total, features.max_ast, features.max_alt);
        let bmi = bmi_eligible(features.bmi());
        Self {
            age_eligible: age_eligible(age_years),
            location_eligible: location_eligible(features.death_location.as_deref()),
            cause_eligible: cause_eligible(&features.dx),
            no_contraindication_calc: no_contraindication_calc(&features.dx),
            no_contraindication_clif: no_contraindication_clif(
                &features.dx,
                features.positive_blood_culture_in_window,
            ),
            imv_eligible: imv_eligible(features.imv_in_window),
            kidney_eligible: kidney,
            liver_eligible: liver,
            bmi_eligible: bmi,
            organ_quality_eligible: kidney.or(liver).and(bmi),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_boundary_and_monotonicity() {
        assert_eq!(age_eligible(Some(75.0)), Check::Pass);
        assert_eq!(age_eligible(Some(75.01)), Check::Fail);
        assert_eq!(age_eligible(None), Check::Unknown);
        assert!(!age_eligible(None).passes());

        // increasing age never flips a fail back to a pass
        let mut last = true;
        for age in [20.0, 40.0, 74.9, 75.0, 75.1, 80.0, 100.0] {
            let now = age_eligible(Some(age)).passes();
            assert!(now <= last, "age {} flipped eligibility back on", age);
            last = now;
        }
    }

    #[test]
    fn location_must_be_on_the_list() {
        for loc in ELIGIBLE_LOCATIONS {
            assert_eq!(location_eligible(Some(loc)), Check::Pass);
        }
        assert_eq!(location_eligible(Some("procedural")), Check::Fail);
        assert_eq!(location_eligible(Some("other")), Check::Fail);
        assert_eq!(location_eligible(None), Check::Unknown);
    }

    #[test]
    fn kidney_crrt_disqualifies_whatever_the_creatinine() {
        assert_eq!(kidney_eligible(Some(3.5), false), Check::Pass);
        assert_eq!(kidney_eligible(Some(4.0), false), Check::Fail, "strict bound");
        assert_eq!(kidney_eligible(Some(2.0), true), Check::Fail);
        assert_eq!(kidney_eligible(None, true), Check::Fail);
        assert_eq!(kidney_eligible(None, false), Check::Unknown);
    }

    #[test]
    fn liver_is_conjunctive() {
        assert_eq!(liver_eligible(Some(1.0), Some(40.0), Some(35.0)), Check::Pass);
        assert_eq!(liver_eligible(None, Some(40.0), Some(35.0)), Check::Unknown);
        assert_eq!(liver_eligible(Some(1.0), None, Some(35.0)), Check::Unknown);
        assert_eq!(liver_eligible(Some(1.0), Some(40.0), None), Check::Unknown);
        assert!(!liver_eligible(Some(1.0), Some(40.0), None).passes());
        assert_eq!(liver_eligible(Some(4.0), Some(40.0), Some(35.0)), Check::Fail);
        assert_eq!(liver_eligible(Some(1.0), Some(700.0), Some(35.0)), Check::Fail);
        assert_eq!(liver_eligible(Some(1.0), Some(40.0), Some(700.0)), Check::Fail);
    }

    #[test]
    fn bmi_boundary_is_inclusive() {
        assert_eq!(bmi_eligible(Some(50.000)), Check::Pass);
        assert_eq!(bmi_eligible(Some(50.001)), Check::Fail);
        assert_eq!(bmi_eligible(None), Check::Unknown);
    }

    #[test]
    fn three_valued_logic() {
        use Check::*;
        assert_eq!(Pass.and(Unknown), Unknown);
        assert_eq!(Fail.and(Unknown), Fail);
        assert_eq!(Pass.or(Unknown), Pass);
        assert_eq!(Fail.or(Unknown), Unknown);
        assert_eq!(Unknown.or(Unknown), Unknown);
        assert!(!Unknown.passes());
    }

    #[test]
    fn organ_quality_composition() {
        let features = |creatinine: Option<f64>, crrt: bool| FeatureRecord {
            max_creatinine: creatinine,
            max_bilirubin_total: None,
            max_ast: None,
            max_alt: None,
            weight_kg: Some(80.0),
            height_cm: Some(169.0),
            death_location: Some("icu".into()),
            imv_in_window: true,
            positive_blood_culture_in_window: false,
            crrt_ever: crrt,
            dx: Default::default(),
            dx_skips: Default::default(),
            last_gcs_total: None,
            last_rass: None,
        };

        // creatinine 3.5, no CRRT, BMI 28: kidney carries organ quality
        let flags = EligibilityFlags::evaluate(Some(60.0), &features(Some(3.5), false));
        assert_eq!(flags.kidney_eligible, Check::Pass);
        assert!(flags.organ_quality_eligible.passes());

        // CRRT present and liver labs missing: nothing can rescue organ quality
        let flags = EligibilityFlags::evaluate(Some(60.0), &features(Some(2.0), true));
        assert_eq!(flags.kidney_eligible, Check::Fail);
        assert_eq!(flags.liver_eligible, Check::Unknown);
        assert!(!flags.organ_quality_eligible.passes());
    }

    #[test]
    fn clif_contraindication_includes_culture() {
        let dx = DxCategories::default();
        assert_eq!(no_contraindication_clif(&dx, false), Check::Pass);
        assert_eq!(no_contraindication_clif(&dx, true), Check::Fail);
        assert_eq!(no_contraindication_calc(&dx), Check::Pass);

        let septic = DxCategories {
            sepsis: true,
            ..Default::default()
        };
        assert_eq!(no_contraindication_calc(&septic), Check::Fail);
        assert_eq!(no_contraindication_clif(&septic, false), Check::Fail);
    }
}

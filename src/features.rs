//! Per-decedent event aggregation.
//!
//! Each function reduces one event table to the value the eligibility checks need, applying
//! the plausibility screen first so an impossible measurement can never win an aggregation.
//! Missing rows aggregate to `None`/`false`, never to an invented value.

use crate::{
    events::{
        AdtSegment, AdtSegments, Assessment, Assessments, CrrtRecords, Culture, Cultures,
        Diagnoses, Diagnosis, Lab, Labs, RespSupport, RespSupports, Vital, Vitals,
    },
    icd::{self, DxCategories, DxClassifier, Icd10Code},
    plausibility::PlausibilityScreen,
    windows::{DeathWindows, TimeWindow},
    ArcStr,
};
use chrono::{DateTime, Utc};
use noisy_float::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops;

const LAB_CREATININE: &str = "creatinine";
const LAB_BILIRUBIN_TOTAL: &str = "bilirubin_total";
const LAB_AST: &str = "ast";
const LAB_ALT: &str = "alt";
const VITAL_WEIGHT: &str = "weight_kg";
const VITAL_HEIGHT: &str = "height_cm";
const DEVICE_IMV: &str = "imv";
const ASSESS_GCS_TOTAL: &str = "gcs_total";
const ASSESS_RASS: &str = "rass";

/// Borrowed view of the event tables, as the pipeline holds them.
#[derive(Copy, Clone)]
pub struct EventTables<'a> {
    pub adt: &'a AdtSegments,
    pub vitals: &'a Vitals,
    pub labs: &'a Labs,
    pub resp_support: &'a RespSupports,
    pub cultures: &'a Cultures,
    pub crrt: &'a CrrtRecords,
    pub assessments: &'a Assessments,
    pub diagnoses: &'a Diagnoses,
}

/// Diagnosis rows the classifier could not use, kept for the data quality report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DxSkips {
    /// `diagnosis_code_format` missing or not an ICD-10 flavour.
    pub unknown_format: usize,
    /// Code missing or not parseable as ICD-10.
    pub unparseable: usize,
}

impl ops::AddAssign for DxSkips {
    fn add_assign(&mut self, rhs: Self) {
        self.unknown_format += rhs.unknown_format;
        self.unparseable += rhs.unparseable;
    }
}

/// Everything the criterion evaluators read for one decedent hospitalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub max_creatinine: Option<f64>,
    pub max_bilirubin_total: Option<f64>,
    pub max_ast: Option<f64>,
    pub max_alt: Option<f64>,
    /// Nearest recorded weight at or before death.
    pub weight_kg: Option<f64>,
    /// Nearest recorded height at or before death.
    pub height_cm: Option<f64>,
    /// Location category of the last ADT segment by out time.
    pub death_location: Option<ArcStr>,
    pub imv_in_window: bool,
    pub positive_blood_culture_in_window: bool,
    pub crrt_ever: bool,
    pub dx: DxCategories,
    pub dx_skips: DxSkips,
    pub last_gcs_total: Option<f64>,
    pub last_rass: Option<f64>,
}

impl FeatureRecord {
    /// Body mass index from the nearest weight and height, kg / m².
    pub fn bmi(&self) -> Option<f64> {
        let weight = self.weight_kg?;
        let height_m = self.height_cm? / 100.0;
        if height_m <= 0.0 {
            return None;
        }
        Some(weight / (height_m * height_m))
    }
}

/// Aggregate all tables for one hospitalization.
pub fn extract(
    tables: &EventTables,
    hosp_id: &str,
    windows: &DeathWindows,
    screen: &PlausibilityScreen,
    classifier: &DxClassifier,
) -> FeatureRecord {
    let at_death = windows.death.instant();
    let (dx, dx_skips) = classify_diagnoses(tables.diagnoses.for_hosp(hosp_id), classifier);
    let stay_max =
        |category: &str| max_lab(tables.labs.for_hosp(hosp_id), category, &windows.stay, screen);
    FeatureRecord {
        max_creatinine: stay_max(LAB_CREATININE),
        max_bilirubin_total: stay_max(LAB_BILIRUBIN_TOTAL),
        max_ast: stay_max(LAB_AST),
        max_alt: stay_max(LAB_ALT),
        weight_kg: last_vital_before(
            tables.vitals.for_hosp(hosp_id),
            VITAL_WEIGHT,
            at_death,
            screen,
        ),
        height_cm: last_vital_before(
            tables.vitals.for_hosp(hosp_id),
            VITAL_HEIGHT,
            at_death,
            screen,
        ),
        death_location: death_location(tables.adt.for_hosp(hosp_id)),
        imv_in_window: any_imv_in(tables.resp_support.for_hosp(hosp_id), &windows.imv),
        positive_blood_culture_in_window: any_positive_blood_culture_in(
            tables.cultures.for_hosp(hosp_id),
            &windows.culture,
        ),
        crrt_ever: tables.crrt.for_hosp(hosp_id).next().is_some(),
        dx,
        dx_skips,
        last_gcs_total: last_assessment_before(
            tables.assessments.for_hosp(hosp_id),
            ASSESS_GCS_TOTAL,
            at_death,
            screen,
        ),
        last_rass: last_assessment_before(
            tables.assessments.for_hosp(hosp_id),
            ASSESS_RASS,
            at_death,
            screen,
        ),
    }
}

/// Highest plausible value of one lab collected inside the window. Rows without a collect
/// timestamp cannot be placed and do not count.
pub fn max_lab<'a>(
    labs: impl Iterator<Item = &'a Lab>,
    category: &str,
    window: &TimeWindow,
    screen: &PlausibilityScreen,
) -> Option<f64> {
    labs.filter(|lab| matches!(&lab.lab_category, Some(cat) if &**cat == category))
        .filter_map(|lab| Some((lab.lab_collect_dttm?, lab.lab_value_numeric?)))
        .filter(|(collected, _)| window.contains(*collected))
        .filter_map(|(_, value)| screen.lab(category, value))
        .filter_map(R64::try_new)
        .max()
        .map(R64::raw)
}

/// Most recent plausible value of one vital at or before `at`.
pub fn last_vital_before<'a>(
    vitals: impl Iterator<Item = &'a Vital>,
    category: &str,
    at: DateTime<Utc>,
    screen: &PlausibilityScreen,
) -> Option<f64> {
    vitals
        .filter(|vital| matches!(&vital.vital_category, Some(cat) if &**cat == category))
        .filter_map(|vital| Some((vital.recorded_dttm?, vital.vital_value?)))
        .filter(|(recorded, _)| *recorded <= at)
        .filter_map(|(recorded, value)| Some((recorded, screen.vital(category, value)?)))
        .max_by_key(|(recorded, _)| *recorded)
        .map(|(_, value)| value)
}

/// Most recent plausible value of one assessment at or before `at`.
pub fn last_assessment_before<'a>(
    assessments: impl Iterator<Item = &'a Assessment>,
    category: &str,
    at: DateTime<Utc>,
    screen: &PlausibilityScreen,
) -> Option<f64> {
    assessments
        .filter(|a| matches!(&a.assessment_category, Some(cat) if &**cat == category))
        .filter_map(|a| Some((a.recorded_dttm?, a.numerical_value?)))
        .filter(|(recorded, _)| *recorded <= at)
        .filter_map(|(recorded, value)| Some((recorded, screen.assessment(category, value)?)))
        .max_by_key(|(recorded, _)| *recorded)
        .map(|(_, value)| value)
}

/// Whether any invasive ventilation record falls inside the window. Records without a
/// timestamp cannot be placed and do not count.
pub fn any_imv_in<'a>(
    mut resp: impl Iterator<Item = &'a RespSupport>,
    window: &TimeWindow,
) -> bool {
    resp.any(|row| {
        matches!(&row.device_category, Some(device) if &**device == DEVICE_IMV)
            && matches!(row.recorded_dttm, Some(at) if window.contains(at))
    })
}

/// Whether any blood culture collected inside the window grew an organism.
pub fn any_positive_blood_culture_in<'a>(
    cultures: impl Iterator<Item = &'a Culture>,
    window: &TimeWindow,
) -> bool {
    cultures.filter(|c| c.is_blood() && c.is_culture_method()).any(|c| {
        c.is_positive() && matches!(c.collect_dttm, Some(at) if window.contains(at))
    })
}

/// Location category of the ADT segment with the latest out time. Segments left open in the
/// extract cannot be ordered and are passed over.
pub fn death_location<'a>(adt: impl Iterator<Item = &'a AdtSegment>) -> Option<ArcStr> {
    adt.filter_map(|seg| Some((seg.out_dttm?, seg.location_category.as_ref()?)))
        .max_by_key(|(out, _)| *out)
        .map(|(_, category)| category.clone())
}

/// Fold the diagnosis rows for one hospitalization through the classifier. Rows that fail
/// the code-format gate or don't parse are skipped and counted, never guessed at.
pub fn classify_diagnoses<'a>(
    diagnoses: impl Iterator<Item = &'a Diagnosis>,
    classifier: &DxClassifier,
) -> (DxCategories, DxSkips) {
    let mut flags = DxCategories::default();
    let mut skips = DxSkips::default();
    for dx in diagnoses {
        match &dx.diagnosis_code_format {
            Some(format) if icd::format_is_icd10(format) => {}
            _ => {
                skips.unknown_format += 1;
                continue;
            }
        }
        let code = dx
            .diagnosis_code
            .as_deref()
            .and_then(|raw| Icd10Code::parse(raw).ok());
        let Some(code) = code else {
            skips.unparseable += 1;
            continue;
        };
        flags |= classifier.classify(&code);
    }
    (flags, skips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dttm(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, d, h, 0, 0).unwrap()
    }

    fn lab(category: &str, value: f64) -> Lab {
        Lab {
            hospitalization_id: "h1".into(),
            lab_collect_dttm: Some(dttm(9, 12)),
            lab_category: Some(category.into()),
            lab_value_numeric: Some(value),
        }
    }

    fn vital(category: &str, value: f64, at: DateTime<Utc>) -> Vital {
        Vital {
            hospitalization_id: "h1".into(),
            recorded_dttm: Some(at),
            vital_category: Some(category.into()),
            vital_value: Some(value),
        }
    }

    fn stay() -> TimeWindow {
        TimeWindow { start: dttm(8, 0), end: dttm(10, 8) }
    }

    #[test]
    fn max_lab_takes_the_peak_plausible_value() {
        let labs = [
            lab("creatinine", 1.1),
            lab("creatinine", 4.2),
            lab("creatinine", 7000.0),
            lab("ast", 9000.0),
        ];
        let screen = PlausibilityScreen::curated();
        let max = max_lab(labs.iter(), "creatinine", &stay(), screen);
        assert_eq!(max, Some(4.2), "the implausible 7000 must not win");
        assert_eq!(max_lab(labs.iter(), "bilirubin_total", &stay(), screen), None);
        assert_eq!(max_lab(labs.iter(), "ast", &stay(), screen), Some(9000.0));
    }

    #[test]
    fn max_lab_only_counts_rows_collected_during_the_stay() {
        let timed = |value: f64, at: Option<DateTime<Utc>>| Lab {
            hospitalization_id: "h1".into(),
            lab_collect_dttm: at,
            lab_category: Some("creatinine".into()),
            lab_value_numeric: Some(value),
        };
        let screen = PlausibilityScreen::curated();

        // collected after discharge, before admission, or never timed at all
        let strays = [
            timed(1.0, Some(dttm(13, 12))),
            timed(2.0, Some(dttm(7, 23))),
            timed(3.0, None),
        ];
        assert_eq!(max_lab(strays.iter(), "creatinine", &stay(), screen), None);

        let mixed = [timed(5.5, Some(dttm(13, 12))), timed(1.2, Some(dttm(9, 0)))];
        assert_eq!(
            max_lab(mixed.iter(), "creatinine", &stay(), screen),
            Some(1.2),
            "a stray value outside the stay must not win"
        );
    }

    #[test]
    fn last_vital_ignores_values_after_death() {
        let at_death = dttm(10, 8);
        let vitals = [
            vital("weight_kg", 80.0, dttm(9, 7)),
            vital("weight_kg", 82.0, dttm(10, 7)),
            vital("weight_kg", 90.0, dttm(10, 9)),
            vital("height_cm", 3.0, dttm(10, 7)),
        ];
        let screen = PlausibilityScreen::curated();
        assert_eq!(
            last_vital_before(vitals.iter(), "weight_kg", at_death, screen),
            Some(82.0)
        );
        // the only height is implausible, so none survives
        assert_eq!(
            last_vital_before(vitals.iter(), "height_cm", at_death, screen),
            None
        );
    }

    #[test]
    fn imv_needs_a_timestamp_inside_the_window() {
        let window = TimeWindow { start: dttm(8, 8), end: dttm(10, 8) };
        let row = |device: Option<&str>, at: Option<DateTime<Utc>>| RespSupport {
            hospitalization_id: "h1".into(),
            recorded_dttm: at,
            device_category: device.map(Into::into),
        };

        assert!(any_imv_in([row(Some("imv"), Some(dttm(9, 0)))].iter(), &window));
        assert!(any_imv_in([row(Some("imv"), Some(dttm(8, 8)))].iter(), &window));
        assert!(!any_imv_in([row(Some("imv"), Some(dttm(8, 7)))].iter(), &window));
        assert!(!any_imv_in([row(Some("imv"), None)].iter(), &window));
        assert!(!any_imv_in([row(Some("nippv"), Some(dttm(9, 0)))].iter(), &window));
    }

    #[test]
    fn blood_culture_only_positive_inside_the_window() {
        let window = TimeWindow { start: dttm(8, 8), end: dttm(10, 8) };
        let culture = |fluid: &str, organism: Option<&str>, at: DateTime<Utc>| Culture {
            hospitalization_id: "h1".into(),
            collect_dttm: Some(at),
            fluid_category: Some(fluid.into()),
            method_category: Some("culture".into()),
            organism_category: organism.map(Into::into),
        };

        let growth = culture("blood/buffy coat", Some("staphylococcus_aureus"), dttm(9, 0));
        assert!(any_positive_blood_culture_in([growth].iter(), &window));

        let stale = culture("blood/buffy coat", Some("staphylococcus_aureus"), dttm(7, 0));
        assert!(!any_positive_blood_culture_in([stale].iter(), &window));

        let negative = culture("blood/buffy coat", Some("no_growth"), dttm(9, 0));
        assert!(!any_positive_blood_culture_in([negative].iter(), &window));

        let urine = culture("urine", Some("escherichia_coli"), dttm(9, 0));
        assert!(!any_positive_blood_culture_in([urine].iter(), &window));
    }

    #[test]
    fn death_location_is_last_segment_out() {
        let seg = |category: &str, out: Option<DateTime<Utc>>| AdtSegment {
            hospitalization_id: "h1".into(),
            in_dttm: None,
            out_dttm: out,
            location_category: Some(category.into()),
            location_name: None,
        };
        let segments = [
            seg("ed", Some(dttm(8, 3))),
            seg("icu", Some(dttm(10, 8))),
            seg("ward", Some(dttm(9, 1))),
            seg("procedural", None),
        ];
        assert_eq!(death_location(segments.iter()).as_deref(), Some("icu"));
        assert_eq!(death_location([].iter()), None);
    }

    #[test]
    fn diagnosis_gate_counts_skips() {
        let dx = |code: Option<&str>, format: Option<&str>| Diagnosis {
            hospitalization_id: "h1".into(),
            diagnosis_code: code.map(Into::into),
            diagnosis_code_format: format.map(Into::into),
        };
        let sepsis: crate::icd::CodeList =
            [Icd10Code::parse("a41").unwrap()].into_iter().collect();
        let cancer: crate::icd::CodeList =
            [Icd10Code::parse("c50").unwrap()].into_iter().collect();
        let classifier = DxClassifier::new(sepsis, cancer);

        let rows = [
            dx(Some("I21.9"), Some("icd10cm")),
            dx(Some("A41.9"), Some("icd9")),
            dx(Some("A41.9"), None),
            dx(None, Some("icd10")),
            dx(Some("???"), Some("icd10")),
            dx(Some("C50.911"), Some("icd10")),
        ];
        let (flags, skips) = classify_diagnoses(rows.iter(), &classifier);
        assert!(flags.ischemic_heart);
        assert!(flags.cancer);
        assert!(!flags.sepsis, "ICD-9 and formatless rows never classify");
        assert_eq!(skips.unknown_format, 2);
        assert_eq!(skips.unparseable, 2);
    }

    #[test]
    fn bmi_from_nearest_measurements() {
        let mut record = FeatureRecord {
            max_creatinine: None,
            max_bilirubin_total: None,
            max_ast: None,
            max_alt: None,
            weight_kg: Some(80.0),
            height_cm: Some(160.0),
            death_location: None,
            imv_in_window: false,
            positive_blood_culture_in_window: false,
            crrt_ever: false,
            dx: Default::default(),
            dx_skips: Default::default(),
            last_gcs_total: None,
            last_rass: None,
        };
        assert!((record.bmi().unwrap() - 31.25).abs() < 1e-9);
        record.height_cm = None;
        assert_eq!(record.bmi(), None);
    }
}

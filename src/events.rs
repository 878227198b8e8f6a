//! Event-level tables: every row timestamped against a hospitalization.
//!
//! All eight share one container, [`Events`], which keeps the rows alongside a pre-built
//! index for the `hospitalization_id` field so per-encounter scans don't walk the whole
//! table.

use crate::{
    util::{opt_dttm, optional_category, optional_f64, optional_string},
    ArcStr, Error, HospitalizationId, Result,
};
use chrono::{DateTime, Utc};
use itertools::Either;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{collections::BTreeMap, iter, ops::Deref, path::Path, sync::Arc};

/// Implemented by each event row type so [`Events`] can parse and index it.
pub trait Event: Clone + Serialize + DeserializeOwned {
    /// The raw CSV row this event is read from.
    type Raw: DeserializeOwned + Into<Self>;

    fn hospitalization_id(&self) -> &HospitalizationId;
}

/// A parsed event table, with a pre-built index for the `hospitalization_id` field.
pub struct Events<T> {
    els: Arc<Vec<T>>,
    hosp_idx: BTreeMap<HospitalizationId, Vec<usize>>,
}

impl<T: Event> Events<T> {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self, Error> {
        let els: Vec<T::Raw> = crate::load_orig(path)?;
        Ok(Self::new(els.into_iter().map(Into::into).collect()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::new(crate::load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        crate::save(&self.els, path)
    }

    /// Iterate over the events recorded against one hospitalization, in table order.
    pub fn for_hosp(&self, id: &str) -> impl Iterator<Item = &T> + Clone + '_ {
        let idxs = match self.hosp_idx.get(id) {
            Some(idxs) => idxs,
            None => return Either::Left(iter::empty()),
        };
        Either::Right(idxs.iter().map(|idx| {
            self.els
                .get(*idx)
                .expect("inconsistent event hospitalization_id index")
        }))
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.els.iter().cloned()
    }

    pub fn iter_ref(&self) -> impl Iterator<Item = &T> + '_ {
        self.els.iter()
    }

    fn new(els: Vec<T>) -> Self {
        let mut this = Events {
            els: Arc::new(els),
            hosp_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    fn rebuild_index(&mut self) {
        self.hosp_idx.clear();
        for (idx, el) in self.els.iter().enumerate() {
            self.hosp_idx
                .entry(el.hospitalization_id().clone())
                .or_insert_with(Vec::new)
                .push(idx);
        }
    }
}

impl<T> Deref for Events<T> {
    type Target = [T];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

impl<'a, T> IntoIterator for &'a Events<T> {
    type IntoIter = <&'a [T] as IntoIterator>::IntoIter;
    type Item = &'a T;
    fn into_iter(self) -> Self::IntoIter {
        self.els.iter()
    }
}

impl<T: Event> FromIterator<T> for Events<T> {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        Self::new(iter.into_iter().collect())
    }
}

macro_rules! impl_event {
    ($ty:ident, $raw:ident) => {
        impl Event for $ty {
            type Raw = $raw;

            fn hospitalization_id(&self) -> &HospitalizationId {
                &self.hospitalization_id
            }
        }
    };
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdtSegmentRaw {
    hospitalization_id: HospitalizationId,
    #[serde(deserialize_with = "opt_dttm")]
    in_dttm: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "opt_dttm")]
    out_dttm: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "optional_category")]
    location_category: Option<ArcStr>,
    #[serde(deserialize_with = "optional_string")]
    location_name: Option<ArcStr>,
}

/// A row in the ADT table: one stay in one hospital location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdtSegment {
    pub hospitalization_id: HospitalizationId,
    pub in_dttm: Option<DateTime<Utc>>,
    pub out_dttm: Option<DateTime<Utc>>,
    pub location_category: Option<ArcStr>,
    pub location_name: Option<ArcStr>,
}

impl From<AdtSegmentRaw> for AdtSegment {
    fn from(from: AdtSegmentRaw) -> Self {
        Self {
            hospitalization_id: from.hospitalization_id,
            in_dttm: from.in_dttm,
            out_dttm: from.out_dttm,
            location_category: from.location_category,
            location_name: from.location_name,
        }
    }
}

impl_event!(AdtSegment, AdtSegmentRaw);
pub type AdtSegments = Events<AdtSegment>;

#[derive(Debug, Clone, Deserialize)]
pub struct VitalRaw {
    hospitalization_id: HospitalizationId,
    #[serde(deserialize_with = "opt_dttm")]
    recorded_dttm: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "optional_category")]
    vital_category: Option<ArcStr>,
    #[serde(deserialize_with = "optional_f64")]
    vital_value: Option<f64>,
}

/// A row in the vitals table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vital {
    pub hospitalization_id: HospitalizationId,
    pub recorded_dttm: Option<DateTime<Utc>>,
    pub vital_category: Option<ArcStr>,
    pub vital_value: Option<f64>,
}

impl From<VitalRaw> for Vital {
    fn from(from: VitalRaw) -> Self {
        Self {
            hospitalization_id: from.hospitalization_id,
            recorded_dttm: from.recorded_dttm,
            vital_category: from.vital_category,
            vital_value: from.vital_value,
        }
    }
}

impl_event!(Vital, VitalRaw);
pub type Vitals = Events<Vital>;

#[derive(Debug, Clone, Deserialize)]
pub struct LabRaw {
    hospitalization_id: HospitalizationId,
    #[serde(deserialize_with = "opt_dttm")]
    lab_collect_dttm: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "optional_category")]
    lab_category: Option<ArcStr>,
    #[serde(deserialize_with = "optional_f64")]
    lab_value_numeric: Option<f64>,
}

/// A row in the labs table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lab {
    pub hospitalization_id: HospitalizationId,
    pub lab_collect_dttm: Option<DateTime<Utc>>,
    pub lab_category: Option<ArcStr>,
    pub lab_value_numeric: Option<f64>,
}

impl From<LabRaw> for Lab {
    fn from(from: LabRaw) -> Self {
        Self {
            hospitalization_id: from.hospitalization_id,
            lab_collect_dttm: from.lab_collect_dttm,
            lab_category: from.lab_category,
            lab_value_numeric: from.lab_value_numeric,
        }
    }
}

impl_event!(Lab, LabRaw);
pub type Labs = Events<Lab>;

#[derive(Debug, Clone, Deserialize)]
pub struct RespSupportRaw {
    hospitalization_id: HospitalizationId,
    #[serde(deserialize_with = "opt_dttm")]
    recorded_dttm: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "optional_category")]
    device_category: Option<ArcStr>,
}

/// A row in the respiratory support table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespSupport {
    pub hospitalization_id: HospitalizationId,
    pub recorded_dttm: Option<DateTime<Utc>>,
    pub device_category: Option<ArcStr>,
}

impl From<RespSupportRaw> for RespSupport {
    fn from(from: RespSupportRaw) -> Self {
        Self {
            hospitalization_id: from.hospitalization_id,
            recorded_dttm: from.recorded_dttm,
            device_category: from.device_category,
        }
    }
}

impl_event!(RespSupport, RespSupportRaw);
pub type RespSupports = Events<RespSupport>;

#[derive(Debug, Clone, Deserialize)]
pub struct CultureRaw {
    hospitalization_id: HospitalizationId,
    #[serde(deserialize_with = "opt_dttm")]
    collect_dttm: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "optional_category")]
    fluid_category: Option<ArcStr>,
    #[serde(deserialize_with = "optional_category")]
    method_category: Option<ArcStr>,
    #[serde(deserialize_with = "optional_category")]
    organism_category: Option<ArcStr>,
}

/// A row in the microbiology culture table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Culture {
    pub hospitalization_id: HospitalizationId,
    pub collect_dttm: Option<DateTime<Utc>>,
    pub fluid_category: Option<ArcStr>,
    pub method_category: Option<ArcStr>,
    pub organism_category: Option<ArcStr>,
}

impl From<CultureRaw> for Culture {
    fn from(from: CultureRaw) -> Self {
        Self {
            hospitalization_id: from.hospitalization_id,
            collect_dttm: from.collect_dttm,
            fluid_category: from.fluid_category,
            method_category: from.method_category,
            organism_category: from.organism_category,
        }
    }
}

impl Culture {
    /// Sample drawn from blood; CLIF codes the fluid category `blood_buffy` and some
    /// extracts carry its display label `blood/buffy coat` instead.
    pub fn is_blood(&self) -> bool {
        matches!(self.fluid_category.as_deref(), Some("blood_buffy" | "blood/buffy coat"))
    }

    pub fn is_culture_method(&self) -> bool {
        matches!(&self.method_category, Some(method) if &**method == "culture")
    }

    /// Nothing grew. A culture with no recorded organism reads as negative; only a named
    /// organism makes a culture positive.
    pub fn is_negative(&self) -> bool {
        match &self.organism_category {
            None => true,
            Some(organism) => organism.contains("no_growth"),
        }
    }

    pub fn is_positive(&self) -> bool {
        !self.is_negative()
    }
}

impl_event!(Culture, CultureRaw);
pub type Cultures = Events<Culture>;

#[derive(Debug, Clone, Deserialize)]
pub struct CrrtRecordRaw {
    hospitalization_id: HospitalizationId,
    #[serde(deserialize_with = "opt_dttm")]
    recorded_dttm: Option<DateTime<Utc>>,
}

/// A row in the CRRT therapy table. Any row at all means the therapy ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrrtRecord {
    pub hospitalization_id: HospitalizationId,
    pub recorded_dttm: Option<DateTime<Utc>>,
}

impl From<CrrtRecordRaw> for CrrtRecord {
    fn from(from: CrrtRecordRaw) -> Self {
        Self {
            hospitalization_id: from.hospitalization_id,
            recorded_dttm: from.recorded_dttm,
        }
    }
}

impl_event!(CrrtRecord, CrrtRecordRaw);
pub type CrrtRecords = Events<CrrtRecord>;

#[derive(Debug, Clone, Deserialize)]
pub struct AssessmentRaw {
    hospitalization_id: HospitalizationId,
    #[serde(deserialize_with = "opt_dttm")]
    recorded_dttm: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "optional_category")]
    assessment_category: Option<ArcStr>,
    #[serde(deserialize_with = "optional_f64")]
    numerical_value: Option<f64>,
}

/// A row in the patient assessments table (GCS, RASS and friends).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub hospitalization_id: HospitalizationId,
    pub recorded_dttm: Option<DateTime<Utc>>,
    pub assessment_category: Option<ArcStr>,
    pub numerical_value: Option<f64>,
}

impl From<AssessmentRaw> for Assessment {
    fn from(from: AssessmentRaw) -> Self {
        Self {
            hospitalization_id: from.hospitalization_id,
            recorded_dttm: from.recorded_dttm,
            assessment_category: from.assessment_category,
            numerical_value: from.numerical_value,
        }
    }
}

impl_event!(Assessment, AssessmentRaw);
pub type Assessments = Events<Assessment>;

#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosisRaw {
    hospitalization_id: HospitalizationId,
    #[serde(deserialize_with = "optional_string")]
    diagnosis_code: Option<ArcStr>,
    #[serde(deserialize_with = "optional_category")]
    diagnosis_code_format: Option<ArcStr>,
}

/// A row in the hospital diagnosis table.
///
/// The code is kept verbatim; normalization and the code-format gate happen where the
/// diagnoses are classified, so skipped rows can be counted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    pub hospitalization_id: HospitalizationId,
    pub diagnosis_code: Option<ArcStr>,
    pub diagnosis_code_format: Option<ArcStr>,
}

impl From<DiagnosisRaw> for Diagnosis {
    fn from(from: DiagnosisRaw) -> Self {
        Self {
            hospitalization_id: from.hospitalization_id,
            diagnosis_code: from.diagnosis_code,
            diagnosis_code_format: from.diagnosis_code_format,
        }
    }
}

impl_event!(Diagnosis, DiagnosisRaw);
pub type Diagnoses = Events<Diagnosis>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lab(hosp: &str, category: &str, value: f64) -> Lab {
        Lab {
            hospitalization_id: hosp.into(),
            lab_collect_dttm: Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()),
            lab_category: Some(category.into()),
            lab_value_numeric: Some(value),
        }
    }

    #[test]
    fn for_hosp_only_yields_that_hospitalization() {
        let labs: Labs = vec![
            lab("h1", "creatinine", 1.0),
            lab("h2", "creatinine", 2.0),
            lab("h1", "ast", 31.0),
        ]
        .into_iter()
        .collect();

        let h1: Vec<_> = labs.for_hosp("h1").collect();
        assert_eq!(h1.len(), 2);
        assert!(h1
            .iter()
            .all(|lab| &*lab.hospitalization_id == "h1"));
        assert_eq!(labs.for_hosp("h3").count(), 0);
        assert_eq!(labs.len(), 3);
    }

    #[test]
    fn culture_polarity() {
        let mut culture = Culture {
            hospitalization_id: "h1".into(),
            collect_dttm: None,
            fluid_category: Some("blood/buffy coat".into()),
            method_category: Some("culture".into()),
            organism_category: Some("escherichia_coli".into()),
        };
        assert!(culture.is_blood());
        assert!(culture.is_culture_method());
        assert!(culture.is_positive());

        culture.organism_category = Some("no_growth".into());
        assert!(culture.is_negative());
        // an unfilled organism never counts as growth
        culture.organism_category = None;
        assert!(culture.is_negative());

        culture.fluid_category = Some("urine".into());
        assert!(!culture.is_blood());
        // a fluid label merely mentioning blood is not a blood culture
        culture.fluid_category = Some("cord blood".into());
        assert!(!culture.is_blood());
        culture.fluid_category = Some("blood_buffy".into());
        assert!(culture.is_blood());
        culture.method_category = Some("gram stain".into());
        assert!(!culture.is_culture_method());
    }
}

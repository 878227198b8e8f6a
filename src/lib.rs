pub mod cohort;
pub mod config;
pub mod criteria;
pub mod encounters;
pub mod events;
pub mod features;
pub mod funnel;
pub mod icd;
pub mod pipeline;
pub mod plausibility;
mod range;
pub mod summary;
mod util;
pub mod windows;

pub use anyhow::{Context, Error};
use chrono::{DateTime, NaiveDate, Utc};
use itertools::Either;
use qu::ick_use::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{collections::BTreeMap, fs, io, iter, ops::Deref, path::Path, sync::Arc};

pub use crate::{
    config::Config,
    icd::{DxClassifier, Icd10Code},
    plausibility::PlausibilityScreen,
    range::{Band, BandCounts, BandSet, Bounds},
    util::header,
};
use crate::util::{opt_date, opt_dttm, optional_category, optional_f64};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
/// Site-assigned opaque identifiers. Free-form strings in the source extracts.
pub type PatientId = ArcStr;
pub type HospitalizationId = ArcStr;

#[derive(Debug, Clone, Deserialize)]
struct PatientRaw {
    patient_id: PatientId,
    #[serde(deserialize_with = "opt_date")]
    birth_date: Option<NaiveDate>,
    #[serde(deserialize_with = "opt_dttm")]
    death_dttm: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "optional_category")]
    race_category: Option<ArcStr>,
    #[serde(deserialize_with = "optional_category")]
    ethnicity_category: Option<ArcStr>,
    #[serde(deserialize_with = "optional_category")]
    sex_category: Option<ArcStr>,
}

/// A row in the patient table.
///
/// In this and the other tables, `patient_id` always identifies the same person, and
/// `_category` fields arrive lowercased with missing values as `None`. A recorded value is
/// never invented for a missing one, so "unknown" stays distinguishable from "known negative"
/// all the way through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: PatientId,
    pub birth_date: Option<NaiveDate>,
    pub death_dttm: Option<DateTime<Utc>>,
    pub race_category: Option<ArcStr>,
    pub ethnicity_category: Option<ArcStr>,
    pub sex_category: Option<ArcStr>,
}

impl From<PatientRaw> for Patient {
    fn from(from: PatientRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            birth_date: from.birth_date,
            death_dttm: from.death_dttm,
            race_category: from.race_category,
            ethnicity_category: from.ethnicity_category,
            sex_category: from.sex_category,
        }
    }
}

impl Patient {
    /// Age in years at `when`, as days / 365.25. `None` when the birth date was not recorded.
    pub fn age_at(&self, when: DateTime<Utc>) -> Option<f64> {
        let birth = self.birth_date?;
        Some((when.date_naive() - birth).num_days() as f64 / 365.25)
    }
}

/// The parsed patient table, with a pre-built index for the `patient_id` field.
pub struct Patients {
    els: Arc<Vec<Patient>>,
    id_idx: BTreeMap<PatientId, usize>,
}

impl Patients {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self, Error> {
        let els: Vec<PatientRaw> = load_orig(path)?;
        Ok(Self::new(els.into_iter().map(Into::into).collect()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        save(&self.els, path)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Patient> {
        let idx = self.id_idx.get(id)?;
        let el = self.els.get(*idx)?;
        Some(el)
    }

    pub fn iter(&self) -> impl Iterator<Item = Patient> + '_ {
        self.els.iter().cloned()
    }

    pub fn iter_ref(&self) -> impl Iterator<Item = &Patient> + '_ {
        self.els.iter()
    }

    fn new(els: Vec<Patient>) -> Self {
        let mut this = Patients {
            els: els.into(),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    fn rebuild_index(&mut self) {
        self.id_idx.clear();
        for (idx, el) in self.els.iter().enumerate() {
            self.id_idx.insert(el.patient_id.clone(), idx);
        }
    }
}

impl Deref for Patients {
    type Target = [Patient];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

impl<'a> IntoIterator for &'a Patients {
    type IntoIter = <&'a [Patient] as IntoIterator>::IntoIter;
    type Item = &'a Patient;
    fn into_iter(self) -> Self::IntoIter {
        self.els.iter()
    }
}

impl FromIterator<Patient> for Patients {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Patient>,
    {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct HospitalizationRaw {
    hospitalization_id: HospitalizationId,
    patient_id: PatientId,
    #[serde(deserialize_with = "opt_dttm")]
    admission_dttm: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "opt_dttm")]
    discharge_dttm: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "optional_f64")]
    age_at_admission: Option<f64>,
    #[serde(deserialize_with = "optional_category")]
    admission_type_category: Option<ArcStr>,
    #[serde(deserialize_with = "optional_category")]
    discharge_category: Option<ArcStr>,
}

/// A row in the hospitalization table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hospitalization {
    pub hospitalization_id: HospitalizationId,
    pub patient_id: PatientId,
    pub admission_dttm: Option<DateTime<Utc>>,
    pub discharge_dttm: Option<DateTime<Utc>>,
    pub age_at_admission: Option<f64>,
    pub admission_type_category: Option<ArcStr>,
    pub discharge_category: Option<ArcStr>,
}

impl From<HospitalizationRaw> for Hospitalization {
    fn from(from: HospitalizationRaw) -> Self {
        Self {
            hospitalization_id: from.hospitalization_id,
            patient_id: from.patient_id,
            admission_dttm: from.admission_dttm,
            discharge_dttm: from.discharge_dttm,
            age_at_admission: from.age_at_admission,
            admission_type_category: from.admission_type_category,
            discharge_category: from.discharge_category,
        }
    }
}

impl Hospitalization {
    /// An in-hospital death. Any other (or missing) disposition means the patient left alive.
    pub fn is_expired(&self) -> bool {
        matches!(&self.discharge_category, Some(cat) if &**cat == "expired")
    }
}

/// The parsed hospitalization table, indexed by both `hospitalization_id` and `patient_id`.
pub struct Hospitalizations {
    els: Arc<Vec<Hospitalization>>,
    id_idx: BTreeMap<HospitalizationId, usize>,
    patient_idx: BTreeMap<PatientId, Vec<usize>>,
}

impl Hospitalizations {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self, Error> {
        let els: Vec<HospitalizationRaw> = load_orig(path)?;
        Ok(Self::new(els.into_iter().map(Into::into).collect()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        save(&self.els, path)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Hospitalization> {
        let idx = self.id_idx.get(id)?;
        let el = self.els.get(*idx)?;
        Some(el)
    }

    pub fn for_patient(&self, id: &str) -> impl Iterator<Item = &Hospitalization> + Clone + '_ {
        let idxs = match self.patient_idx.get(id) {
            Some(idxs) => idxs,
            None => return Either::Left(iter::empty()),
        };
        Either::Right(idxs.iter().map(|idx| {
            self.els
                .get(*idx)
                .expect("inconsistent hospitalization patient_id index")
        }))
    }

    /// One row per decedent: hospitalizations ending in death, keeping only the latest by
    /// discharge time when a patient died on record more than once (duplicate extracts).
    pub fn latest_expired_per_patient(&self) -> Self {
        fn key(h: &Hospitalization) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>, &str) {
            (h.discharge_dttm, h.admission_dttm, &h.hospitalization_id)
        }
        let mut latest: BTreeMap<PatientId, &Hospitalization> = BTreeMap::new();
        for hosp in self.iter_ref().filter(|h| h.is_expired()) {
            match latest.get(&hosp.patient_id) {
                Some(prev) if key(prev) >= key(hosp) => {}
                _ => {
                    latest.insert(hosp.patient_id.clone(), hosp);
                }
            }
        }
        latest.into_values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Hospitalization> + '_ {
        self.els.iter().cloned()
    }

    pub fn iter_ref(&self) -> impl Iterator<Item = &Hospitalization> + '_ {
        self.els.iter()
    }

    fn new(els: Vec<Hospitalization>) -> Self {
        let mut this = Hospitalizations {
            els: els.into(),
            id_idx: BTreeMap::new(),
            patient_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    fn rebuild_index(&mut self) {
        self.id_idx.clear();
        self.patient_idx.clear();
        for (idx, el) in self.els.iter().enumerate() {
            self.id_idx.insert(el.hospitalization_id.clone(), idx);
            self.patient_idx
                .entry(el.patient_id.clone())
                .or_insert_with(Vec::new)
                .push(idx);
        }
    }
}

impl Deref for Hospitalizations {
    type Target = [Hospitalization];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

impl<'a> IntoIterator for &'a Hospitalizations {
    type IntoIter = <&'a [Hospitalization] as IntoIterator>::IntoIter;
    type Item = &'a Hospitalization;
    fn into_iter(self) -> Self::IntoIter {
        self.els.iter()
    }
}

impl FromIterator<Hospitalization> for Hospitalizations {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Hospitalization>,
    {
        Self::new(iter.into_iter().collect())
    }
}

/// Load a saved table into memory.
pub(crate) fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    fn inner<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let reader = io::BufReader::new(fs::File::open(path)?);
        bincode::deserialize_from(reader).map_err(Into::into)
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;

    inner(path).with_context(|| format!("unable to load data from \"{}\"", path.display()))
}

/// Save a table to disk.
pub(crate) fn save<T: Serialize>(contents: &[T], path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(contents: &[T], path: &Path) -> Result {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("could not create parent")?;
        }
        // it seems File::options().create_new(true) doesn't work on the server, so fall back to
        // checking for existence.
        if util::path_exists(path)? {
            event!(
                Level::WARN,
                "overwriting existing file at \"{}\"",
                path.display()
            );
        }
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        bincode::serialize_into(&mut out, contents)?;
        Ok(())
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;

    inner(contents, path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// Load a table from the original site extract.
pub(crate) fn load_orig<T: serde::de::DeserializeOwned>(
    path: impl AsRef<Path>,
) -> Result<Vec<T>, anyhow::Error> {
    let path = path.as_ref();
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?
        .into_deserialize()
        .collect::<Result<Vec<T>, _>>()
        .with_context(|| format!("while loading \"{}\"", path.display()))
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}

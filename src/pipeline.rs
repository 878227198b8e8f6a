//! The identification run: take one site's imported tables, settle every decedent
//! hospitalization into a [`CohortRow`], and tally the attrition funnels.
//!
//! Decedents are independent of each other, so resolution runs in parallel; the output
//! order (by `patient_id`) and every number in it are deterministic for a given extract.

use crate::{
    cohort::{Definition, Outcome, Outcomes},
    config::Config,
    criteria::{Check, EligibilityFlags},
    encounters,
    events::{
        AdtSegments, Assessments, CrrtRecords, Cultures, Diagnoses, Labs, RespSupports, Vitals,
    },
    features::{self, DxSkips, EventTables},
    funnel::Funnel,
    icd::DxClassifier,
    plausibility::PlausibilityScreen,
    windows::{self, DeathWindows},
    ArcStr, Hospitalization, HospitalizationId, Hospitalizations, Patient, PatientId, Patients,
};
use chrono::{DateTime, Utc};
use qu::ick_use::*;
use rayon::prelude::*;
use serde::Serialize;
use std::{fs, io, path::Path};

/// Every imported table of one site extract, loaded from the cache the import step wrote.
pub struct Dataset {
    pub patients: Patients,
    pub hospitalizations: Hospitalizations,
    pub adt: AdtSegments,
    pub vitals: Vitals,
    pub labs: Labs,
    pub resp_support: RespSupports,
    pub cultures: Cultures,
    pub crrt: CrrtRecords,
    pub assessments: Assessments,
    pub diagnoses: Diagnoses,
}

impl Dataset {
    pub fn load(config: &Config) -> Result<Self> {
        Ok(Self {
            patients: Patients::load(config.cache_path("patient"))?,
            hospitalizations: Hospitalizations::load(config.cache_path("hospitalization"))?,
            adt: AdtSegments::load(config.cache_path("adt"))?,
            vitals: Vitals::load(config.cache_path("vitals"))?,
            labs: Labs::load(config.cache_path("labs"))?,
            resp_support: RespSupports::load(config.cache_path("respiratory_support"))?,
            cultures: Cultures::load(config.cache_path("microbiology_culture"))?,
            crrt: CrrtRecords::load(config.cache_path("crrt_therapy"))?,
            assessments: Assessments::load(config.cache_path("patient_assessments"))?,
            diagnoses: Diagnoses::load(config.cache_path("hospital_diagnosis"))?,
        })
    }

    pub fn events(&self) -> EventTables<'_> {
        EventTables {
            adt: &self.adt,
            vitals: &self.vitals,
            labs: &self.labs,
            resp_support: &self.resp_support,
            cultures: &self.cultures,
            crrt: &self.crrt,
            assessments: &self.assessments,
            diagnoses: &self.diagnoses,
        }
    }
}

/// One fully settled decedent hospitalization. The cohort csv is these rows verbatim, one
/// per decedent, flags and outcomes included so downstream counts need no re-derivation.
#[derive(Debug, Clone, Serialize)]
pub struct CohortRow {
    pub patient_id: PatientId,
    pub hospitalization_id: HospitalizationId,
    pub sex_category: Option<ArcStr>,
    pub race_category: Option<ArcStr>,
    pub ethnicity_category: Option<ArcStr>,
    pub age_at_death: Option<f64>,
    /// How the death instant was settled: `recorded`, `clamped`, `discharge` or `missing`.
    pub death_time_source: &'static str,
    pub death_dttm: Option<DateTime<Utc>>,
    pub death_location: Option<ArcStr>,
    /// Hospitalization rows linked into this decedent's final encounter.
    pub linked_hospitalizations: usize,
    pub hospital_los_days: Option<f64>,
    pub first_admission_location: Option<ArcStr>,
    pub first_icu_los_days: Option<f64>,
    pub ever_ed: bool,
    pub ever_ward: bool,
    pub ever_stepdown: bool,
    pub ever_icu: bool,
    pub max_creatinine: Option<f64>,
    pub max_bilirubin_total: Option<f64>,
    pub max_ast: Option<f64>,
    pub max_alt: Option<f64>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub bmi: Option<f64>,
    pub last_gcs_total: Option<f64>,
    pub last_rass: Option<f64>,
    // feature booleans are None when no death instant could anchor the windows
    pub imv_in_window: Option<bool>,
    pub positive_blood_culture_in_window: Option<bool>,
    pub crrt_ever: Option<bool>,
    pub dx_ischemic_heart: Option<bool>,
    pub dx_cerebrovascular: Option<bool>,
    pub dx_external_cause: Option<bool>,
    pub dx_sepsis: Option<bool>,
    pub dx_cancer: Option<bool>,
    pub dx_unknown_format: Option<usize>,
    pub dx_unparseable: Option<usize>,
    pub age_eligible: Option<Check>,
    pub location_eligible: Option<Check>,
    pub cause_eligible: Option<Check>,
    pub no_contraindication_calc: Option<Check>,
    pub no_contraindication_clif: Option<Check>,
    pub imv_eligible: Option<Check>,
    pub kidney_eligible: Option<Check>,
    pub liver_eligible: Option<Check>,
    pub bmi_eligible: Option<Check>,
    pub organ_quality_eligible: Option<Check>,
    pub calc_outcome: Outcome,
    pub clif_outcome: Outcome,
}

impl CohortRow {
    pub fn outcome(&self, def: Definition) -> Outcome {
        match def {
            Definition::Calc => self.calc_outcome,
            Definition::Clif => self.clif_outcome,
        }
    }

    pub fn included(&self, def: Definition) -> bool {
        self.outcome(def).is_included()
    }

    fn dx_skips(&self) -> DxSkips {
        DxSkips {
            unknown_format: self.dx_unknown_format.unwrap_or(0),
            unparseable: self.dx_unparseable.unwrap_or(0),
        }
    }
}

/// Everything one identification run produces.
pub struct CohortReport {
    /// One row per decedent, ordered by `patient_id`.
    pub rows: Vec<CohortRow>,
    /// One verified funnel per definition, in [`Definition::ALL`] order.
    pub funnels: Vec<Funnel>,
    /// Diagnosis rows the classifier skipped, totalled over the run.
    pub dx_skips: DxSkips,
}

impl CohortReport {
    pub fn funnel(&self, def: Definition) -> &Funnel {
        self.funnels
            .iter()
            .find(|funnel| funnel.definition == def)
            .expect("one funnel per definition")
    }

    pub fn included(&self, def: Definition) -> impl Iterator<Item = &CohortRow> + '_ {
        self.rows.iter().filter(move |row| row.included(def))
    }

    pub fn save_rows_csv(&self, path: impl AsRef<Path>) -> Result {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("creating \"{}\"", path.display()))?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// The STROBE counts as one json document, for sites that share numbers but not rows.
    /// The organ-quality sub-checks and the culture count ride along because the funnels
    /// alone cannot recover them.
    pub fn save_strobe_json(&self, site_name: &str, path: impl AsRef<Path>) -> Result {
        #[derive(Serialize)]
        struct Strobe<'a> {
            site_name: &'a str,
            population: usize,
            funnels: &'a [Funnel],
            kidney_eligible: usize,
            liver_eligible: usize,
            bmi_eligible: usize,
            organ_quality_eligible: usize,
            positive_blood_culture: usize,
        }
        let path = path.as_ref();
        let out = io::BufWriter::new(
            fs::File::create(path).with_context(|| format!("creating \"{}\"", path.display()))?,
        );
        let passing = |flag: fn(&CohortRow) -> Option<Check>| {
            self.rows
                .iter()
                .filter(|row| flag(row) == Some(Check::Pass))
                .count()
        };
        let strobe = Strobe {
            site_name,
            population: self.funnels.first().map(Funnel::population).unwrap_or(0),
            funnels: &self.funnels,
            kidney_eligible: passing(|row| row.kidney_eligible),
            liver_eligible: passing(|row| row.liver_eligible),
            bmi_eligible: passing(|row| row.bmi_eligible),
            organ_quality_eligible: passing(|row| row.organ_quality_eligible),
            positive_blood_culture: self
                .rows
                .iter()
                .filter(|row| row.positive_blood_culture_in_window == Some(true))
                .count(),
        };
        serde_json::to_writer_pretty(out, &strobe)?;
        Ok(())
    }
}

/// Run the identification with the curated screens and code lists.
pub fn identify(data: &Dataset) -> Result<CohortReport> {
    identify_with(data, PlausibilityScreen::curated(), DxClassifier::curated())
}

/// Same run with the screen and classifier injected, for tests and site-specific lists.
pub fn identify_with(
    data: &Dataset,
    screen: &PlausibilityScreen,
    classifier: &DxClassifier,
) -> Result<CohortReport> {
    let decedents = data.hospitalizations.latest_expired_per_patient();
    event!(
        Level::INFO,
        "resolving {} decedents of {} hospitalizations",
        decedents.len(),
        data.hospitalizations.len()
    );

    let events = data.events();
    let rows: Vec<_> = decedents
        .par_iter()
        .map(|hosp| {
            resolve(
                &events,
                &data.patients,
                &data.hospitalizations,
                hosp,
                screen,
                classifier,
            )
        })
        .collect();

    let funnels = Definition::ALL
        .iter()
        .map(|&def| {
            let funnel = Funnel::tally(def, rows.iter().map(|row| row.outcome(def)));
            funnel.verify()?;
            Ok(funnel)
        })
        .collect::<Result<Vec<_>>>()?;

    let dx_skips = rows
        .iter()
        .fold(DxSkips::default(), |mut total, row| {
            total += row.dx_skips();
            total
        });

    Ok(CohortReport {
        rows,
        funnels,
        dx_skips,
    })
}

/// Settle one decedent hospitalization.
fn resolve(
    events: &EventTables,
    patients: &Patients,
    hosps: &Hospitalizations,
    hosp: &Hospitalization,
    screen: &PlausibilityScreen,
    classifier: &DxClassifier,
) -> CohortRow {
    // a decedent without a patient row still gets a cohort row; everything patient-level
    // is simply missing
    let orphan;
    let patient = match patients.find_by_id(&hosp.patient_id) {
        Some(patient) => patient,
        None => {
            orphan = Patient {
                patient_id: hosp.patient_id.clone(),
                birth_date: None,
                death_dttm: None,
                race_category: None,
                ethnicity_category: None,
                sex_category: None,
            };
            &orphan
        }
    };

    let death = windows::resolve_death_time(patient, hosp);
    let features = death.map(|death| {
        features::extract(
            events,
            &hosp.hospitalization_id,
            &DeathWindows::anchor(death, hosp),
            screen,
            classifier,
        )
    });
    let age_at_death = death.and_then(|death| patient.age_at(death.instant()));
    let flags = features
        .as_ref()
        .map(|features| EligibilityFlags::evaluate(age_at_death, features));
    let outcomes = Outcomes::compose(flags.as_ref());

    let blocks = encounters::link_encounters(hosps.for_patient(&hosp.patient_id));
    let block = encounters::block_for(&blocks, &hosp.hospitalization_id)
        .expect("decedent missing from its own encounter blocks");
    let stay = encounters::stay_locations(events.adt, &block.hospitalization_ids);

    let f = features.as_ref();
    CohortRow {
        patient_id: hosp.patient_id.clone(),
        hospitalization_id: hosp.hospitalization_id.clone(),
        sex_category: patient.sex_category.clone(),
        race_category: patient.race_category.clone(),
        ethnicity_category: patient.ethnicity_category.clone(),
        age_at_death,
        death_time_source: death.map(|death| death.source()).unwrap_or("missing"),
        death_dttm: death.map(|death| death.instant()),
        death_location: f.and_then(|f| f.death_location.clone()),
        linked_hospitalizations: block.hospitalization_ids.len(),
        hospital_los_days: block.hospital_los_days(),
        first_admission_location: stay.first_admission_location.clone(),
        first_icu_los_days: stay.first_icu_los_days,
        ever_ed: stay.ever_ed,
        ever_ward: stay.ever_ward,
        ever_stepdown: stay.ever_stepdown,
        ever_icu: stay.ever_icu,
        max_creatinine: f.and_then(|f| f.max_creatinine),
        max_bilirubin_total: f.and_then(|f| f.max_bilirubin_total),
        max_ast: f.and_then(|f| f.max_ast),
        max_alt: f.and_then(|f| f.max_alt),
        weight_kg: f.and_then(|f| f.weight_kg),
        height_cm: f.and_then(|f| f.height_cm),
        bmi: f.and_then(|f| f.bmi()),
        last_gcs_total: f.and_then(|f| f.last_gcs_total),
        last_rass: f.and_then(|f| f.last_rass),
        imv_in_window: f.map(|f| f.imv_in_window),
        positive_blood_culture_in_window: f.map(|f| f.positive_blood_culture_in_window),
        crrt_ever: f.map(|f| f.crrt_ever),
        dx_ischemic_heart: f.map(|f| f.dx.ischemic_heart),
        dx_cerebrovascular: f.map(|f| f.dx.cerebrovascular),
        dx_external_cause: f.map(|f| f.dx.external_cause),
        dx_sepsis: f.map(|f| f.dx.sepsis),
        dx_cancer: f.map(|f| f.dx.cancer),
        dx_unknown_format: f.map(|f| f.dx_skips.unknown_format),
        dx_unparseable: f.map(|f| f.dx_skips.unparseable),
        age_eligible: flags.map(|f| f.age_eligible),
        location_eligible: flags.map(|f| f.location_eligible),
        cause_eligible: flags.map(|f| f.cause_eligible),
        no_contraindication_calc: flags.map(|f| f.no_contraindication_calc),
        no_contraindication_clif: flags.map(|f| f.no_contraindication_clif),
        imv_eligible: flags.map(|f| f.imv_eligible),
        kidney_eligible: flags.map(|f| f.kidney_eligible),
        liver_eligible: flags.map(|f| f.liver_eligible),
        bmi_eligible: flags.map(|f| f.bmi_eligible),
        organ_quality_eligible: flags.map(|f| f.organ_quality_eligible),
        calc_outcome: outcomes.calc,
        clif_outcome: outcomes.clif,
    }
}

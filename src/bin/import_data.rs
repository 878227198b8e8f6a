use clap::Parser;
use clif_donor_cohort::{
    events::{
        AdtSegments, Assessments, CrrtRecords, Cultures, Diagnoses, Labs, RespSupports, Vitals,
    },
    Config, Hospitalizations, Patients,
};
use qu::ick_use::*;
use std::path::PathBuf;

/// Import the site's csv extracts into the binary cache the other tools read.
#[derive(Parser)]
struct Opt {
    /// Path of the site config file.
    #[clap(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = Config::load(&opt.config)?;

    let patients = Patients::load_orig(config.table_path("patient"))?;
    patients.save(config.cache_path("patient"))?;

    let hospitalizations = Hospitalizations::load_orig(config.table_path("hospitalization"))?;
    hospitalizations.save(config.cache_path("hospitalization"))?;

    let adt = AdtSegments::load_orig(config.table_path("adt"))?;
    adt.save(config.cache_path("adt"))?;

    let vitals = Vitals::load_orig(config.table_path("vitals"))?;
    vitals.save(config.cache_path("vitals"))?;

    let labs = Labs::load_orig(config.table_path("labs"))?;
    labs.save(config.cache_path("labs"))?;

    let resp_support = RespSupports::load_orig(config.table_path("respiratory_support"))?;
    resp_support.save(config.cache_path("respiratory_support"))?;

    let cultures = Cultures::load_orig(config.table_path("microbiology_culture"))?;
    cultures.save(config.cache_path("microbiology_culture"))?;

    let crrt = CrrtRecords::load_orig(config.table_path("crrt_therapy"))?;
    crrt.save(config.cache_path("crrt_therapy"))?;

    let assessments = Assessments::load_orig(config.table_path("patient_assessments"))?;
    assessments.save(config.cache_path("patient_assessments"))?;

    let diagnoses = Diagnoses::load_orig(config.table_path("hospital_diagnosis"))?;
    diagnoses.save(config.cache_path("hospital_diagnosis"))?;

    Ok(())
}

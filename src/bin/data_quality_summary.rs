use clap::Parser;
use clif_donor_cohort::{
    header,
    icd::{self, Icd10Code},
    pipeline::{identify, CohortRow, Dataset},
    Config, PlausibilityScreen,
};
use qu::ick_use::*;
use std::{collections::BTreeMap, path::PathBuf};
use term_data_table::{Cell, Row, Table};

/// Row counts, missing timestamps, death time provenance, code and value quality for one
/// site extract.
#[derive(Parser)]
struct Opt {
    /// Path of the site config file.
    #[clap(short, long, default_value = "config.toml")]
    config: PathBuf,
}

fn count<T>(rows: &[T], pred: impl Fn(&T) -> bool) -> usize {
    rows.iter().filter(|row| pred(row)).count()
}

fn missing_row(table: &str, field: &str, missing: usize, total: usize) -> Row<'static> {
    Row::new()
        .with_cell(Cell::from(table.to_string()))
        .with_cell(Cell::from(field.to_string()))
        .with_cell(Cell::from(format!(
            "{} ({:.1}%)",
            missing,
            missing as f64 / total as f64 * 100.
        )))
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = Config::load(&opt.config)?;
    let data = Dataset::load(&config)?;

    header("Imported rows");
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Table"))
            .with_cell(Cell::from("Rows")),
    );
    for (name, len) in [
        ("patient", data.patients.len()),
        ("hospitalization", data.hospitalizations.len()),
        ("adt", data.adt.len()),
        ("vitals", data.vitals.len()),
        ("labs", data.labs.len()),
        ("respiratory_support", data.resp_support.len()),
        ("microbiology_culture", data.cultures.len()),
        ("crrt_therapy", data.crrt.len()),
        ("patient_assessments", data.assessments.len()),
        ("hospital_diagnosis", data.diagnoses.len()),
    ] {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(name))
                .with_cell(Cell::from(len.to_string())),
        );
    }
    println!("{}", table);

    header("Missing timestamps");
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Table"))
            .with_cell(Cell::from("Field"))
            .with_cell(Cell::from("Missing")),
    );
    table.add_row(missing_row(
        "patient",
        "birth_date",
        count(&data.patients, |p| p.birth_date.is_none()),
        data.patients.len(),
    ));
    table.add_row(missing_row(
        "patient",
        "death_dttm",
        count(&data.patients, |p| p.death_dttm.is_none()),
        data.patients.len(),
    ));
    table.add_row(missing_row(
        "hospitalization",
        "admission_dttm",
        count(&data.hospitalizations, |h| h.admission_dttm.is_none()),
        data.hospitalizations.len(),
    ));
    table.add_row(missing_row(
        "hospitalization",
        "discharge_dttm",
        count(&data.hospitalizations, |h| h.discharge_dttm.is_none()),
        data.hospitalizations.len(),
    ));
    table.add_row(missing_row(
        "adt",
        "in_dttm",
        count(&data.adt, |seg| seg.in_dttm.is_none()),
        data.adt.len(),
    ));
    table.add_row(missing_row(
        "adt",
        "out_dttm",
        count(&data.adt, |seg| seg.out_dttm.is_none()),
        data.adt.len(),
    ));
    table.add_row(missing_row(
        "vitals",
        "recorded_dttm",
        count(&data.vitals, |v| v.recorded_dttm.is_none()),
        data.vitals.len(),
    ));
    table.add_row(missing_row(
        "labs",
        "lab_collect_dttm",
        count(&data.labs, |l| l.lab_collect_dttm.is_none()),
        data.labs.len(),
    ));
    table.add_row(missing_row(
        "respiratory_support",
        "recorded_dttm",
        count(&data.resp_support, |r| r.recorded_dttm.is_none()),
        data.resp_support.len(),
    ));
    table.add_row(missing_row(
        "microbiology_culture",
        "collect_dttm",
        count(&data.cultures, |c| c.collect_dttm.is_none()),
        data.cultures.len(),
    ));
    table.add_row(missing_row(
        "crrt_therapy",
        "recorded_dttm",
        count(&data.crrt, |c| c.recorded_dttm.is_none()),
        data.crrt.len(),
    ));
    table.add_row(missing_row(
        "patient_assessments",
        "recorded_dttm",
        count(&data.assessments, |a| a.recorded_dttm.is_none()),
        data.assessments.len(),
    ));
    println!("{}", table);

    let report = identify(&data)?;
    let decedents = report.rows.len();

    header("Death time resolution");
    let mut sources = BTreeMap::new();
    for row in &report.rows {
        *sources.entry(row.death_time_source).or_insert(0usize) += 1;
    }
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Source"))
            .with_cell(Cell::from("Count"))
            .with_cell(Cell::from("Percentage")),
    );
    for source in ["recorded", "clamped", "discharge", "missing"] {
        let n = sources.get(source).copied().unwrap_or(0);
        table.add_row(
            Row::new()
                .with_cell(Cell::from(source))
                .with_cell(Cell::from(n.to_string()))
                .with_cell(Cell::from(format!(
                    "{:.1}%",
                    n as f64 / decedents as f64 * 100.
                ))),
        );
    }
    println!("{}", table);

    header("Diagnosis code quality");
    let unknown_format = count(&data.diagnoses, |dx| match &dx.diagnosis_code_format {
        Some(format) => !icd::format_is_icd10(format),
        None => true,
    });
    let unparseable = count(&data.diagnoses, |dx| {
        matches!(&dx.diagnosis_code_format, Some(format) if icd::format_is_icd10(format))
            && dx
                .diagnosis_code
                .as_deref()
                .map_or(true, |raw| Icd10Code::parse(raw).is_err())
    });
    println!("diagnosis rows in the extract: {}", data.diagnoses.len());
    println!("unknown code format: {}", unknown_format);
    println!("not parseable as ICD-10: {}", unparseable);
    println!(
        "skipped while classifying decedent stays: {} unknown format, {} unparseable",
        report.dx_skips.unknown_format, report.dx_skips.unparseable
    );

    header("Values outside plausibility bounds");
    let screen = PlausibilityScreen::curated();
    let screened: [(&str, usize, usize); 3] = [
        (
            "labs",
            count(&data.labs, |l| l.lab_value_numeric.is_some()),
            count(&data.labs, |l| match (&l.lab_category, l.lab_value_numeric) {
                (Some(category), Some(value)) => screen.lab(category, value).is_none(),
                _ => false,
            }),
        ),
        (
            "vitals",
            count(&data.vitals, |v| v.vital_value.is_some()),
            count(&data.vitals, |v| match (&v.vital_category, v.vital_value) {
                (Some(category), Some(value)) => screen.vital(category, value).is_none(),
                _ => false,
            }),
        ),
        (
            "patient_assessments",
            count(&data.assessments, |a| a.numerical_value.is_some()),
            count(&data.assessments, |a| {
                match (&a.assessment_category, a.numerical_value) {
                    (Some(category), Some(value)) => screen.assessment(category, value).is_none(),
                    _ => false,
                }
            }),
        ),
    ];
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Table"))
            .with_cell(Cell::from("Recorded values"))
            .with_cell(Cell::from("Out of bounds")),
    );
    for (name, recorded, failing) in screened {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(name))
                .with_cell(Cell::from(recorded.to_string()))
                .with_cell(Cell::from(failing.to_string())),
        );
    }
    println!("{}", table);

    header("Plausibility bounds in force");
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Table"))
            .with_cell(Cell::from("Category"))
            .with_cell(Cell::from("Bounds")),
    );
    for (table_name, category, bounds) in screen.iter() {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(table_name))
                .with_cell(Cell::from(category.to_string()))
                .with_cell(Cell::from(bounds.to_string())),
        );
    }
    println!("{}", table);

    header("Feature missingness among decedents");
    let features: [(&str, fn(&CohortRow) -> bool); 11] = [
        ("age at death", |r: &CohortRow| r.age_at_death.is_none()),
        ("death location", |r: &CohortRow| r.death_location.is_none()),
        ("peak creatinine", |r: &CohortRow| r.max_creatinine.is_none()),
        ("peak bilirubin", |r: &CohortRow| r.max_bilirubin_total.is_none()),
        ("peak AST", |r: &CohortRow| r.max_ast.is_none()),
        ("peak ALT", |r: &CohortRow| r.max_alt.is_none()),
        ("weight", |r: &CohortRow| r.weight_kg.is_none()),
        ("height", |r: &CohortRow| r.height_cm.is_none()),
        ("BMI", |r: &CohortRow| r.bmi.is_none()),
        ("last GCS total", |r: &CohortRow| r.last_gcs_total.is_none()),
        ("last RASS", |r: &CohortRow| r.last_rass.is_none()),
    ];
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Feature"))
            .with_cell(Cell::from("Missing"))
            .with_cell(Cell::from("Percentage")),
    );
    for (label, missing) in features {
        let n = report.rows.iter().filter(|r| missing(r)).count();
        table.add_row(
            Row::new()
                .with_cell(Cell::from(label))
                .with_cell(Cell::from(n.to_string()))
                .with_cell(Cell::from(format!(
                    "{:.1}%",
                    n as f64 / decedents as f64 * 100.
                ))),
        );
    }
    println!("{}", table);

    Ok(())
}

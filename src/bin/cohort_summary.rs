use clap::Parser;
use clif_donor_cohort::{
    cohort::Definition,
    header,
    pipeline::{identify, CohortRow, Dataset},
    summary::{count_categories, NumericSummary},
    BandCounts, BandSet, Config,
};
use qu::ick_use::*;
use serde::Serialize;
use std::{fs, path::PathBuf};
use term_data_table::{Cell, Row, Table};

/// Table-1 style description of the decedent population and both identified cohorts,
/// printed to the terminal and written to `table_one.csv`.
#[derive(Parser)]
struct Opt {
    /// Path of the site config file.
    #[clap(short, long, default_value = "config.toml")]
    config: PathBuf,
}

/// One row of the summary: a statistic with one value per group.
#[derive(Serialize)]
struct SummaryRecord {
    section: &'static str,
    statistic: String,
    overall: String,
    calc: String,
    clif: String,
}

impl SummaryRecord {
    fn new(section: &'static str, statistic: impl Into<String>, cells: [String; 3]) -> Self {
        let [overall, calc, clif] = cells;
        Self {
            section,
            statistic: statistic.into(),
            overall,
            calc,
            clif,
        }
    }
}

fn per_group(
    groups: &[(&str, Vec<&CohortRow>)],
    f: impl Fn(&[&CohortRow]) -> String,
) -> [String; 3] {
    [f(&groups[0].1), f(&groups[1].1), f(&groups[2].1)]
}

fn group_head(first: &str, groups: &[(&str, Vec<&CohortRow>)]) -> Row<'static> {
    let mut row = Row::new().with_cell(Cell::from(first.to_string()));
    for (name, _) in groups {
        row = row.with_cell(Cell::from(name.to_string()));
    }
    row
}

fn text_row(label: &str, cells: &[String; 3]) -> Row<'static> {
    let mut row = Row::new().with_cell(Cell::from(label.to_string()));
    for cell in cells {
        row = row.with_cell(Cell::from(cell.clone()));
    }
    row
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = Config::load(&opt.config)?;
    let report = identify(&Dataset::load(&config)?)?;

    let groups: Vec<(&str, Vec<&CohortRow>)> = vec![
        ("Overall", report.rows.iter().collect()),
        ("CALC", report.included(Definition::Calc).collect()),
        ("CLIF", report.included(Definition::Clif).collect()),
    ];
    let overall = groups[0].1.len();
    let mut records: Vec<SummaryRecord> = Vec::new();

    header("Group sizes");
    for (name, rows) in &groups {
        println!(
            "{}: {} ({:.1}% of decedents)",
            name,
            rows.len(),
            rows.len() as f64 / overall as f64 * 100.
        );
    }
    records.push(SummaryRecord::new(
        "groups",
        "decedents, n (%)",
        per_group(&groups, |rows| {
            format!(
                "{} ({:.1}%)",
                rows.len(),
                rows.len() as f64 / overall as f64 * 100.
            )
        }),
    ));

    header("Age at death");
    let mut table = Table::new().with_row(group_head("Statistic", &groups));
    let cells = per_group(&groups, |rows| {
        NumericSummary::of(rows.iter().map(|r| r.age_at_death)).for_display()
    });
    table.add_row(text_row("median [IQR], years", &cells));
    records.push(SummaryRecord::new("age", "median [IQR], years", cells));
    let cells = per_group(&groups, |rows| {
        rows.iter()
            .filter(|r| r.age_at_death.is_none())
            .count()
            .to_string()
    });
    table.add_row(text_row("missing", &cells));
    records.push(SummaryRecord::new("age", "missing", cells));
    println!("{}", table);

    let bands: Vec<BandCounts<u16>> = groups
        .iter()
        .map(|(_, rows)| {
            BandSet::decades(90).bucket(rows.iter().map(|r| r.age_at_death.map(|age| age as u16)))
        })
        .collect();
    let mut table = Table::new().with_row(group_head("Age band", &groups));
    for (idx, (band, _)) in bands[0].iter().enumerate() {
        let cells = [0, 1, 2].map(|g: usize| {
            let (_, n) = bands[g].iter().nth(idx).unwrap();
            n.to_string()
        });
        table.add_row(text_row(&band.to_string(), &cells));
        records.push(SummaryRecord::new("age band", band.to_string(), cells));
    }
    let cells = [0, 1, 2].map(|g: usize| bands[g].missing().to_string());
    table.add_row(text_row("missing", &cells));
    records.push(SummaryRecord::new("age band", "missing", cells));
    println!("{}", table);

    let categories: [(&str, fn(&CohortRow) -> Option<&str>); 5] = [
        ("Sex", |r: &CohortRow| r.sex_category.as_deref()),
        ("Race", |r: &CohortRow| r.race_category.as_deref()),
        ("Ethnicity", |r: &CohortRow| r.ethnicity_category.as_deref()),
        ("First admission location", |r: &CohortRow| {
            r.first_admission_location.as_deref()
        }),
        ("Death location", |r: &CohortRow| r.death_location.as_deref()),
    ];
    for (section, field) in categories {
        header(section);
        let counted: Vec<_> = groups
            .iter()
            .map(|(_, rows)| count_categories(rows.iter().map(|r| field(r))))
            .collect();
        let mut table = Table::new().with_row(group_head("Category", &groups));
        // every category in any group also shows up in Overall, so its keys drive the rows
        for category in counted[0].0.keys() {
            let cells = [0, 1, 2].map(|g: usize| {
                let n = counted[g].0.get(category).copied().unwrap_or(0);
                format!("{} ({:.1}%)", n, n as f64 / groups[g].1.len() as f64 * 100.)
            });
            table.add_row(text_row(category, &cells));
            records.push(SummaryRecord::new(section, category.clone(), cells));
        }
        let cells = [0, 1, 2].map(|g: usize| counted[g].1.to_string());
        table.add_row(text_row("missing", &cells));
        records.push(SummaryRecord::new(section, "missing", cells));
        println!("{}", table);
    }

    header("Hospital stay");
    let los_stats: [(&str, fn(&CohortRow) -> Option<f64>); 2] = [
        ("hospital LOS, days", |r: &CohortRow| r.hospital_los_days),
        ("first ICU LOS, days", |r: &CohortRow| r.first_icu_los_days),
    ];
    let stay_flags: [(&str, fn(&CohortRow) -> bool); 5] = [
        ("linked transfer", |r: &CohortRow| {
            r.linked_hospitalizations > 1
        }),
        ("ever ED", |r: &CohortRow| r.ever_ed),
        ("ever ward", |r: &CohortRow| r.ever_ward),
        ("ever stepdown", |r: &CohortRow| r.ever_stepdown),
        ("ever ICU", |r: &CohortRow| r.ever_icu),
    ];
    let mut table = Table::new().with_row(group_head("Statistic", &groups));
    for (label, value) in los_stats {
        let cells = per_group(&groups, |rows| {
            NumericSummary::of(rows.iter().map(|r| value(r))).for_display()
        });
        table.add_row(text_row(label, &cells));
        records.push(SummaryRecord::new("stay", label, cells));
    }
    for (label, pred) in stay_flags {
        let cells = per_group(&groups, |rows| {
            let n = rows.iter().filter(|r| pred(r)).count();
            format!("{} ({:.1}%)", n, n as f64 / rows.len() as f64 * 100.)
        });
        table.add_row(text_row(label, &cells));
        records.push(SummaryRecord::new("stay", label, cells));
    }
    println!("{}", table);

    header("Measurements");
    let measurements: [(&str, fn(&CohortRow) -> Option<f64>); 7] = [
        ("BMI, kg/m²", |r: &CohortRow| r.bmi),
        ("peak creatinine, mg/dL", |r: &CohortRow| r.max_creatinine),
        ("peak bilirubin, mg/dL", |r: &CohortRow| r.max_bilirubin_total),
        ("peak AST, U/L", |r: &CohortRow| r.max_ast),
        ("peak ALT, U/L", |r: &CohortRow| r.max_alt),
        ("last GCS total", |r: &CohortRow| r.last_gcs_total),
        ("last RASS", |r: &CohortRow| r.last_rass),
    ];
    let mut table = Table::new().with_row(group_head("Median [IQR]", &groups));
    for (label, value) in measurements {
        let cells = per_group(&groups, |rows| {
            NumericSummary::of(rows.iter().map(|r| value(r))).for_display()
        });
        table.add_row(text_row(label, &cells));
        records.push(SummaryRecord::new("measurements", label, cells));
    }
    println!("{}", table);

    header("Recorded measurements");
    let age_stat: [(&str, fn(&CohortRow) -> Option<f64>); 1] =
        [("age at death, years", |r: &CohortRow| r.age_at_death)];
    let mut table = Table::new().with_row(group_head("n valid (% available)", &groups));
    for (label, value) in age_stat.into_iter().chain(los_stats).chain(measurements) {
        let cells = per_group(&groups, |rows| {
            let n = rows.iter().filter(|r| value(r).is_some()).count();
            format!("{} ({:.1}%)", n, n as f64 / rows.len() as f64 * 100.)
        });
        table.add_row(text_row(label, &cells));
        records.push(SummaryRecord::new("availability", label, cells));
    }
    println!("{}", table);

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating \"{}\"", config.output_dir.display()))?;
    let path = config.output_path("table_one.csv");
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("creating \"{}\"", path.display()))?;
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    event!(Level::INFO, "summary written to \"{}\"", path.display());

    Ok(())
}

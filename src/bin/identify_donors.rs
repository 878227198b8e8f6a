use clap::Parser;
use clif_donor_cohort::{
    cohort::Definition,
    header,
    pipeline::{identify, Dataset},
    Config,
};
use qu::ick_use::*;
use std::{fs, path::PathBuf};

/// Run the donor identification over the imported tables and write the cohort csv, the
/// per-definition attrition funnels and the STROBE counts.
#[derive(Parser)]
struct Opt {
    /// Path of the site config file.
    #[clap(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = Config::load(&opt.config)?;
    let data = Dataset::load(&config)?;
    let report = identify(&data)?;

    for def in Definition::ALL {
        header(&format!("{} attrition", def));
        println!("{}", report.funnel(def).term_table());
    }

    header("Cohort sizes");
    let population = report.funnels.first().map(|f| f.population()).unwrap_or(0);
    println!("decedents: {}", population);
    for def in Definition::ALL {
        let n = report.funnel(def).included();
        println!(
            "{} cohort: {} ({:.1}% of decedents)",
            def,
            n,
            n as f64 / population as f64 * 100.
        );
    }
    let both = report
        .rows
        .iter()
        .filter(|row| row.included(Definition::Calc) && row.included(Definition::Clif))
        .count();
    println!("in both cohorts: {}", both);

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating \"{}\"", config.output_dir.display()))?;
    report.save_rows_csv(config.output_path("cohort.csv"))?;
    for def in Definition::ALL {
        let name = format!("funnel_{}.csv", def.to_string().to_lowercase());
        report.funnel(def).save_csv(config.output_path(&name))?;
    }
    report.save_strobe_json(&config.site_name, config.output_path("strobe_counts.json"))?;
    event!(
        Level::INFO,
        "artifacts written to \"{}\"",
        config.output_dir.display()
    );
    Ok(())
}

//! STROBE funnel: stage-by-stage attrition per definition, built by tallying terminal
//! states. The funnel only ever narrows; the last row's remainder is the cohort size.

use crate::cohort::{Definition, Outcome, Stage};
use qu::ick_use::*;
use serde::Serialize;
use std::path::Path;

/// One row of the attrition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunnelRow {
    pub stage: Stage,
    /// Decedents still in the running after this stage.
    pub n_remaining: usize,
    /// Decedents whose terminal state is exclusion at this stage.
    pub n_dropped: usize,
    pub drop_reason: &'static str,
}

/// The full funnel for one definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Funnel {
    pub definition: Definition,
    pub rows: Vec<FunnelRow>,
}

impl Funnel {
    /// Tally terminal states into the definition's stage order. The outcomes must have been
    /// composed under the same definition.
    pub fn tally(definition: Definition, outcomes: impl Iterator<Item = Outcome>) -> Self {
        let stages = definition.stages();
        let mut dropped = vec![0usize; stages.len()];
        let mut total = 0usize;
        let mut included = 0usize;
        for outcome in outcomes {
            total += 1;
            match outcome {
                Outcome::Included => included += 1,
                Outcome::Excluded(stage) => {
                    let idx = stages
                        .iter()
                        .position(|s| *s == stage)
                        .expect("outcome stage not in this definition's funnel");
                    dropped[idx] += 1;
                }
            }
        }

        let mut rows = Vec::with_capacity(stages.len());
        let mut remaining = total;
        for (stage, n_dropped) in stages.iter().copied().zip(dropped) {
            remaining -= n_dropped;
            rows.push(FunnelRow {
                stage,
                n_remaining: remaining,
                n_dropped,
                drop_reason: drop_reason(stage),
            });
        }
        debug_assert_eq!(remaining, included);
        Self { definition, rows }
    }

    /// Size of the final cohort.
    pub fn included(&self) -> usize {
        self.rows.last().map(|row| row.n_remaining).unwrap_or(0)
    }

    /// Decedents the funnel started from.
    pub fn population(&self) -> usize {
        self.rows
            .first()
            .map(|row| row.n_remaining + row.n_dropped)
            .unwrap_or(0)
    }

    /// Check the funnel invariants: remainders never increase, and each step's drop count
    /// accounts exactly for the difference.
    pub fn verify(&self) -> Result {
        let mut prev = self.population();
        for row in &self.rows {
            ensure!(
                row.n_remaining <= prev,
                "funnel for {} grew at stage {}",
                self.definition,
                row.stage
            );
            ensure!(
                prev - row.n_remaining == row.n_dropped,
                "drop count mismatch for {} at stage {}",
                self.definition,
                row.stage
            );
            prev = row.n_remaining;
        }
        Ok(())
    }

    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("creating \"{}\"", path.display()))?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn term_table(&self) -> term_data_table::Table {
        term_data_table::Table::from_serde(self.rows.iter().cloned()).unwrap()
    }
}

fn drop_reason(stage: Stage) -> &'static str {
    match stage {
        Stage::Expired => "did not die in hospital",
        Stage::DeathTime => "no usable death time",
        Stage::Location => "death location outside ed/ward/stepdown/icu",
        Stage::Age => "older than 75 or birth date unknown",
        Stage::Imv => "no invasive ventilation within 48h of death",
        Stage::Cause => "cause of death not cardiac/cerebrovascular/external",
        Stage::NoContraindication => "contraindication recorded",
        Stage::OrganQuality => "no organ met the quality thresholds",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes() -> Vec<Outcome> {
        // 10 decedents: 2 lost to death time, 3 to age, 1 to IMV, 1 to contraindication,
        // 3 included.
        let mut out = vec![Outcome::Included; 3];
        out.extend([Outcome::Excluded(Stage::DeathTime); 2]);
        out.extend([Outcome::Excluded(Stage::Age); 3]);
        out.push(Outcome::Excluded(Stage::Imv));
        out.push(Outcome::Excluded(Stage::NoContraindication));
        out
    }

    #[test]
    fn tally_counts_per_stage() {
        let funnel = Funnel::tally(Definition::Clif, outcomes().into_iter());
        funnel.verify().unwrap();
        assert_eq!(funnel.population(), 10);
        assert_eq!(funnel.included(), 3);

        let by_stage: Vec<(String, usize, usize)> = funnel
            .rows
            .iter()
            .map(|row| (row.stage.to_string(), row.n_remaining, row.n_dropped))
            .collect();
        assert_eq!(
            by_stage,
            [
                ("expired".to_string(), 10, 0),
                ("death_time_known".to_string(), 8, 2),
                ("location_eligible".to_string(), 8, 0),
                ("age_eligible".to_string(), 5, 3),
                ("imv_eligible".to_string(), 4, 1),
                ("no_contraindication".to_string(), 3, 1),
                ("organ_quality_eligible".to_string(), 3, 0),
            ]
        );
    }

    #[test]
    fn remaining_matches_later_survivors() {
        // the round-trip property: after stage k, the remainder equals the count of
        // outcomes that are included or excluded at a strictly later stage
        let outcomes = outcomes();
        let funnel = Funnel::tally(Definition::Clif, outcomes.iter().copied());
        let stages = Definition::Clif.stages();
        for (k, row) in funnel.rows.iter().enumerate() {
            let survivors = outcomes
                .iter()
                .filter(|outcome| match outcome.excluded_at() {
                    None => true,
                    Some(stage) => {
                        stages.iter().position(|s| *s == stage).unwrap() > k
                    }
                })
                .count();
            assert_eq!(row.n_remaining, survivors, "stage {}", row.stage);
        }
    }

    #[test]
    fn verify_catches_inconsistent_rows() {
        let mut funnel = Funnel::tally(Definition::Clif, outcomes().into_iter());
        funnel.rows[2].n_remaining += 4;
        assert!(funnel.verify().is_err());
    }

    #[test]
    fn empty_population() {
        let funnel = Funnel::tally(Definition::Calc, std::iter::empty());
        funnel.verify().unwrap();
        assert_eq!(funnel.population(), 0);
        assert_eq!(funnel.included(), 0);
    }
}

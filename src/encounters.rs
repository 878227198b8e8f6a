//! Encounter linkage and stay descriptives.
//!
//! Transfers between affiliated sites show up as back-to-back hospitalization rows. Rows of
//! one patient whose admission follows the previous discharge within the linkage gap are
//! treated as a single continuous encounter for length-of-stay purposes.

use crate::{events::AdtSegments, ArcStr, Hospitalization, HospitalizationId, PatientId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Maximum admission-to-previous-discharge gap that still reads as a transfer.
pub const LINKAGE_GAP_HOURS: i64 = 12;

const LOCATION_ICU: &str = "icu";
const LOCATION_WARD: &str = "ward";
const LOCATION_ED: &str = "ed";
const LOCATION_STEPDOWN: &str = "stepdown";

/// One continuous encounter: one or more linked hospitalizations of a single patient,
/// ordered by admission time.
#[derive(Debug, Clone)]
pub struct EncounterBlock {
    pub patient_id: PatientId,
    pub hospitalization_ids: Vec<HospitalizationId>,
    /// Admission of the first linked row.
    pub admission_dttm: Option<DateTime<Utc>>,
    /// Discharge of the last linked row.
    pub discharge_dttm: Option<DateTime<Utc>>,
}

impl EncounterBlock {
    pub fn contains(&self, id: &str) -> bool {
        self.hospitalization_ids.iter().any(|h| &**h == id)
    }

    /// Whole-encounter length of stay in days, spanning linked transfers.
    pub fn hospital_los_days(&self) -> Option<f64> {
        let admission = self.admission_dttm?;
        let discharge = self.discharge_dttm?;
        if discharge < admission {
            return None;
        }
        Some((discharge - admission).num_seconds() as f64 / 86_400.0)
    }
}

/// Partition one patient's hospitalizations into encounter blocks. Rows without an
/// admission time cannot be ordered or linked and become singleton blocks.
pub fn link_encounters<'a>(
    hosps: impl Iterator<Item = &'a Hospitalization>,
) -> Vec<EncounterBlock> {
    let mut untimed = Vec::new();
    let mut timed = Vec::new();
    for hosp in hosps {
        match hosp.admission_dttm {
            Some(at) => timed.push((at, hosp)),
            None => untimed.push(hosp),
        }
    }
    timed.sort_by_key(|(at, hosp)| (*at, hosp.discharge_dttm));

    let gap = Duration::hours(LINKAGE_GAP_HOURS);
    let mut blocks: Vec<EncounterBlock> = Vec::new();
    for (admission, hosp) in timed {
        let linked = blocks.last().and_then(|block| {
            let discharge = block.discharge_dttm?;
            Some(admission <= discharge + gap)
        });
        match (linked, blocks.last_mut()) {
            (Some(true), Some(block)) => {
                block.hospitalization_ids.push(hosp.hospitalization_id.clone());
                // overlapping stays: the block discharge only moves forward
                if hosp.discharge_dttm > block.discharge_dttm {
                    block.discharge_dttm = hosp.discharge_dttm;
                }
            }
            _ => blocks.push(singleton(hosp)),
        }
    }
    blocks.extend(untimed.into_iter().map(singleton));
    blocks
}

fn singleton(hosp: &Hospitalization) -> EncounterBlock {
    EncounterBlock {
        patient_id: hosp.patient_id.clone(),
        hospitalization_ids: vec![hosp.hospitalization_id.clone()],
        admission_dttm: hosp.admission_dttm,
        discharge_dttm: hosp.discharge_dttm,
    }
}

/// The block containing one hospitalization.
pub fn block_for<'a>(blocks: &'a [EncounterBlock], id: &str) -> Option<&'a EncounterBlock> {
    blocks.iter().find(|block| block.contains(id))
}

/// Location descriptives over the ADT record of one encounter.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StayLocations {
    pub ever_icu: bool,
    pub ever_ward: bool,
    pub ever_ed: bool,
    pub ever_stepdown: bool,
    /// Category of the earliest segment by in time.
    pub first_admission_location: Option<ArcStr>,
    /// Days spent in the first contiguous ICU run.
    pub first_icu_los_days: Option<f64>,
}

/// Fold the ADT segments of the encounter's hospitalizations into descriptive flags.
pub fn stay_locations(adt: &AdtSegments, hosp_ids: &[HospitalizationId]) -> StayLocations {
    let mut segments: Vec<_> = hosp_ids
        .iter()
        .flat_map(|id| adt.for_hosp(id))
        .collect();
    segments.sort_by_key(|seg| (seg.in_dttm, seg.out_dttm));

    let mut stay = StayLocations::default();
    for seg in &segments {
        match seg.location_category.as_deref() {
            Some(LOCATION_ICU) => stay.ever_icu = true,
            Some(LOCATION_WARD) => stay.ever_ward = true,
            Some(LOCATION_ED) => stay.ever_ed = true,
            Some(LOCATION_STEPDOWN) => stay.ever_stepdown = true,
            _ => {}
        }
    }
    stay.first_admission_location = segments
        .iter()
        .find(|seg| seg.in_dttm.is_some())
        .and_then(|seg| seg.location_category.clone());

    // first contiguous ICU run: consecutive icu segments, broken by anything else
    let mut run: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    for seg in &segments {
        let is_icu = matches!(seg.location_category.as_deref(), Some(LOCATION_ICU));
        let (Some(seg_in), Some(seg_out)) = (seg.in_dttm, seg.out_dttm) else {
            continue;
        };
        match (is_icu, &mut run) {
            (true, None) => run = Some((seg_in, seg_out)),
            (true, Some((_, out))) => *out = (*out).max(seg_out),
            (false, Some(_)) => break,
            (false, None) => {}
        }
    }
    stay.first_icu_los_days =
        run.map(|(start, end)| (end - start).num_seconds() as f64 / 86_400.0);
    stay
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AdtSegment;
    use chrono::TimeZone;

    fn dttm(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, d, h, 0, 0).unwrap()
    }

    fn hosp(
        id: &str,
        admission: Option<DateTime<Utc>>,
        discharge: Option<DateTime<Utc>>,
    ) -> Hospitalization {
        Hospitalization {
            hospitalization_id: id.into(),
            patient_id: "p1".into(),
            admission_dttm: admission,
            discharge_dttm: discharge,
            age_at_admission: None,
            admission_type_category: None,
            discharge_category: None,
        }
    }

    #[test]
    fn linkage_respects_the_gap() {
        let hosps = [
            hosp("h1", Some(dttm(1, 8)), Some(dttm(3, 8))),
            // readmitted exactly 12h after discharge: linked
            hosp("h2", Some(dttm(3, 20)), Some(dttm(5, 8))),
            // 13h after h2's discharge: a fresh encounter
            hosp("h3", Some(dttm(5, 21)), Some(dttm(6, 8))),
        ];
        let blocks = link_encounters(hosps.iter());
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].contains("h1") && blocks[0].contains("h2"));
        assert!(blocks[1].contains("h3"));
        assert_eq!(blocks[0].admission_dttm, Some(dttm(1, 8)));
        assert_eq!(blocks[0].discharge_dttm, Some(dttm(5, 8)));
        assert!((blocks[0].hospital_los_days().unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn untimed_rows_become_singletons() {
        let hosps = [
            hosp("h1", Some(dttm(1, 8)), Some(dttm(2, 8))),
            hosp("h2", None, Some(dttm(2, 9))),
        ];
        let blocks = link_encounters(hosps.iter());
        assert_eq!(blocks.len(), 2);
        assert_eq!(block_for(&blocks, "h2").unwrap().hospital_los_days(), None);
    }

    #[test]
    fn stay_locations_first_icu_run() {
        let seg = |hosp: &str, category: &str, range: (DateTime<Utc>, DateTime<Utc>)| AdtSegment {
            hospitalization_id: hosp.into(),
            in_dttm: Some(range.0),
            out_dttm: Some(range.1),
            location_category: Some(category.into()),
            location_name: None,
        };
        let adt: AdtSegments = vec![
            seg("h1", "ed", (dttm(1, 8), dttm(1, 12))),
            seg("h1", "icu", (dttm(1, 12), dttm(2, 0))),
            seg("h2", "icu", (dttm(2, 0), dttm(3, 0))),
            seg("h2", "ward", (dttm(3, 0), dttm(4, 0))),
            seg("h2", "icu", (dttm(4, 0), dttm(5, 0))),
        ]
        .into_iter()
        .collect();

        let ids: Vec<HospitalizationId> = vec!["h1".into(), "h2".into()];
        let stay = stay_locations(&adt, &ids);
        assert!(stay.ever_icu && stay.ever_ward && stay.ever_ed);
        assert!(!stay.ever_stepdown);
        assert_eq!(stay.first_admission_location.as_deref(), Some("ed"));
        // the first run spans h1+h2 up to the ward transfer, 1.5 days
        assert!((stay.first_icu_los_days.unwrap() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn no_icu_time_is_not_zero_days() {
        let adt: AdtSegments = vec![AdtSegment {
            hospitalization_id: "h1".into(),
            in_dttm: Some(dttm(1, 8)),
            out_dttm: Some(dttm(2, 8)),
            location_category: Some("ward".into()),
            location_name: None,
        }]
        .into_iter()
        .collect();
        let ids: Vec<HospitalizationId> = vec!["h1".into()];
        let stay = stay_locations(&adt, &ids);
        assert_eq!(stay.first_icu_los_days, None);
        assert!(stay.ever_ward && !stay.ever_icu);
    }
}

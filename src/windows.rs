//! Temporal windows anchored on a decedent's death instant.

use crate::{Hospitalization, Patient};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Hours before death the IMV and blood culture checks look back over.
pub const LOOKBACK_HOURS: i64 = 48;

/// A closed interval of time; both endpoints count.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// The death instant used to anchor windows, along with how it was settled.
///
/// A recorded death time after discharge is taken to be a charting artifact and clamped back
/// to the discharge time, so no window reaches past the record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeathTime {
    /// `death_dttm` as recorded.
    Recorded(DateTime<Utc>),
    /// `death_dttm` was after discharge; clamped to the discharge time.
    Clamped(DateTime<Utc>),
    /// No `death_dttm`; the discharge time of the fatal hospitalization stands in.
    Discharge(DateTime<Utc>),
}

impl DeathTime {
    pub fn instant(&self) -> DateTime<Utc> {
        match *self {
            DeathTime::Recorded(at) | DeathTime::Clamped(at) | DeathTime::Discharge(at) => at,
        }
    }

    /// Label for reports and the cohort csv.
    pub fn source(&self) -> &'static str {
        match self {
            DeathTime::Recorded(_) => "recorded",
            DeathTime::Clamped(_) => "clamped",
            DeathTime::Discharge(_) => "discharge",
        }
    }
}

/// Settle the death instant for a decedent, or `None` when neither a death time nor a
/// discharge time was recorded and nothing can be anchored.
pub fn resolve_death_time(patient: &Patient, hosp: &Hospitalization) -> Option<DeathTime> {
    match (patient.death_dttm, hosp.discharge_dttm) {
        (Some(death), Some(discharge)) if death > discharge => Some(DeathTime::Clamped(discharge)),
        (Some(death), _) => Some(DeathTime::Recorded(death)),
        (None, Some(discharge)) if hosp.is_expired() => Some(DeathTime::Discharge(discharge)),
        (None, _) => None,
    }
}

/// The windows the eligibility checks read from, all anchored on one death.
#[derive(Debug, Copy, Clone)]
pub struct DeathWindows {
    pub death: DeathTime,
    /// Ventilation lookback, `[death - 48h, death]`.
    pub imv: TimeWindow,
    /// Blood culture lookback, `[death - 48h, death]`.
    pub culture: TimeWindow,
    /// The whole stay, `[admission, discharge]`; scopes the organ-quality labs.
    pub stay: TimeWindow,
}

impl DeathWindows {
    pub fn anchor(death: DeathTime, hosp: &Hospitalization) -> Self {
        let end = death.instant();
        let lookback = TimeWindow {
            start: end - Duration::hours(LOOKBACK_HOURS),
            end,
        };
        // an unrecorded admission leaves the stay start open, and a missing discharge
        // falls back on the death instant
        let stay = TimeWindow {
            start: hosp.admission_dttm.unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: hosp.discharge_dttm.unwrap_or(end),
        };
        Self {
            death,
            imv: lookback,
            culture: lookback,
            stay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dttm(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, d, h, 0, 0).unwrap()
    }

    fn decedent(
        death: Option<DateTime<Utc>>,
        discharge: Option<DateTime<Utc>>,
    ) -> (Patient, Hospitalization) {
        let patient = Patient {
            patient_id: "p1".into(),
            birth_date: None,
            death_dttm: death,
            race_category: None,
            ethnicity_category: None,
            sex_category: None,
        };
        let hosp = Hospitalization {
            hospitalization_id: "h1".into(),
            patient_id: "p1".into(),
            admission_dttm: None,
            discharge_dttm: discharge,
            age_at_admission: None,
            admission_type_category: None,
            discharge_category: Some("expired".into()),
        };
        (patient, hosp)
    }

    #[test]
    fn recorded_death_wins() {
        let (patient, hosp) = decedent(Some(dttm(10, 6)), Some(dttm(10, 8)));
        assert_eq!(
            resolve_death_time(&patient, &hosp),
            Some(DeathTime::Recorded(dttm(10, 6)))
        );
    }

    #[test]
    fn death_after_discharge_is_clamped() {
        let (patient, hosp) = decedent(Some(dttm(11, 2)), Some(dttm(10, 8)));
        assert_eq!(
            resolve_death_time(&patient, &hosp),
            Some(DeathTime::Clamped(dttm(10, 8)))
        );
    }

    #[test]
    fn discharge_stands_in_when_death_unrecorded() {
        let (patient, hosp) = decedent(None, Some(dttm(10, 8)));
        assert_eq!(
            resolve_death_time(&patient, &hosp),
            Some(DeathTime::Discharge(dttm(10, 8)))
        );

        let (patient, hosp) = decedent(None, None);
        assert_eq!(resolve_death_time(&patient, &hosp), None);
    }

    #[test]
    fn windows_are_inclusive_at_both_ends() {
        let (_, hosp) = decedent(Some(dttm(10, 8)), Some(dttm(10, 8)));
        let windows = DeathWindows::anchor(DeathTime::Recorded(dttm(10, 8)), &hosp);
        assert!(windows.imv.contains(dttm(10, 8)));
        assert!(windows.imv.contains(dttm(8, 8)), "exactly 48h before death");
        assert!(!windows.imv.contains(dttm(8, 7)));
        assert!(!windows.imv.contains(dttm(10, 9)));
        assert_eq!(windows.imv, windows.culture);
    }

    #[test]
    fn stay_window_runs_admission_to_discharge() {
        let (_, mut hosp) = decedent(Some(dttm(10, 6)), Some(dttm(12, 0)));
        hosp.admission_dttm = Some(dttm(1, 0));
        let death = DeathTime::Recorded(dttm(10, 6));

        let windows = DeathWindows::anchor(death, &hosp);
        assert_eq!(windows.stay, TimeWindow { start: dttm(1, 0), end: dttm(12, 0) });
        assert!(windows.stay.contains(dttm(11, 12)), "the stay ends at discharge, not death");
        assert!(!windows.stay.contains(dttm(12, 1)));
        assert!(!windows.stay.contains(dttm(1, 0) - Duration::hours(1)));

        // no admission on record: nothing earlier can be ruled out of the stay
        hosp.admission_dttm = None;
        let windows = DeathWindows::anchor(death, &hosp);
        assert!(windows.stay.contains(dttm(1, 0) - Duration::days(400)));

        // no discharge either: the death instant closes the stay
        hosp.discharge_dttm = None;
        let windows = DeathWindows::anchor(death, &hosp);
        assert_eq!(windows.stay.end, dttm(10, 6));
        assert!(!windows.stay.contains(dttm(10, 7)));
    }
}

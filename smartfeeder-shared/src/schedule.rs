//! Occurrence calculator: maps a schedule definition plus "now" to the
//! next timestamp it should fire. Pure; all I/O lives in the server.

use chrono::{Datelike, Duration, NaiveDateTime};

use crate::domain::ScheduleDef;

/// Next time `def` fires, given `now` (naive wall-clock).
///
/// Recurring schedules are anchored to the 1-based day of year modulo the
/// interval, not to the definition's creation date. Known limitation: the
/// anchor resets every January 1st, so an every-N-days schedule can fire
/// off-cycle across the year boundary.
pub fn next_occurrence(def: &ScheduleDef, now: NaiveDateTime) -> NaiveDateTime {
    match def {
        ScheduleDef::Single { at, .. } => *at,
        ScheduleDef::Recurring { time, every, .. } => {
            let today_at = now.date().and_time(*time);
            let mut offset = i64::from(now.ordinal() % every);
            if offset == 0 && today_at < now {
                offset = 1;
            }
            today_at + Duration::days(offset)
        }
        ScheduleDef::Weekly { time, days, .. } => {
            let today_at = now.date().and_time(*time);
            let today = i64::from(now.weekday().num_days_from_monday());
            let mut deltas: Vec<i64> = days
                .iter()
                .map(|day| (i64::from(*day) - today).rem_euclid(7))
                .collect();
            deltas.sort_unstable();
            let delta = if deltas[0] == 0 && today_at < now {
                match deltas.get(1) {
                    // only one configured weekday: wrap a full week
                    None => 7,
                    Some(next) => *next,
                }
            } else {
                deltas[0]
            };
            today_at + Duration::days(delta)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IntervalUnit;
    use chrono::{NaiveDate, NaiveTime};

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn single_returns_stored_timestamp() {
        let at = dt(2026, 10, 27, 12, 0);
        let def = ScheduleDef::single(at, 4).unwrap();
        assert_eq!(next_occurrence(&def, dt(2026, 1, 1, 0, 0)), at);
        assert_eq!(next_occurrence(&def, dt(2027, 1, 1, 0, 0)), at);
    }

    #[test]
    fn recurring_on_cycle_day_before_time() {
        // 2026-02-03 is day-of-year 34; 34 % 2 == 0, time not yet passed.
        let def = ScheduleDef::recurring(t(12, 0), 2, IntervalUnit::Days, 1).unwrap();
        let now = dt(2026, 2, 3, 10, 0);
        assert_eq!(next_occurrence(&def, now), dt(2026, 2, 3, 12, 0));
    }

    #[test]
    fn recurring_on_cycle_day_after_time_slips_one_day() {
        let def = ScheduleDef::recurring(t(8, 0), 2, IntervalUnit::Days, 1).unwrap();
        let now = dt(2026, 2, 3, 10, 0);
        assert_eq!(next_occurrence(&def, now), dt(2026, 2, 4, 8, 0));
    }

    #[test]
    fn recurring_off_cycle_waits_out_the_remainder() {
        // day-of-year 34, every 5 -> offset 4 days.
        let def = ScheduleDef::recurring(t(6, 30), 5, IntervalUnit::Days, 2).unwrap();
        let now = dt(2026, 2, 3, 10, 0);
        assert_eq!(next_occurrence(&def, now), dt(2026, 2, 7, 6, 30));
    }

    #[test]
    fn recurring_stays_within_cycle_and_after_now() {
        let def = ScheduleDef::recurring(t(9, 15), 3, IntervalUnit::Days, 1).unwrap();
        for day in 1..=27 {
            let now = dt(2026, 3, day, 11, 0);
            let next = next_occurrence(&def, now);
            assert!(next >= now, "day {day}: {next} < {now}");
            assert!(next - now <= Duration::days(3), "day {day}: {next}");
        }
    }

    #[test]
    fn weekly_single_day_already_passed_wraps_a_week() {
        // 2026-02-02 is a Monday.
        let def = ScheduleDef::weekly(t(8, 0), &[0], 1).unwrap();
        let now = dt(2026, 2, 2, 10, 0);
        assert_eq!(next_occurrence(&def, now), dt(2026, 2, 9, 8, 0));
    }

    #[test]
    fn weekly_today_counts_when_time_not_passed() {
        let def = ScheduleDef::weekly(t(12, 0), &[0, 2, 4], 1).unwrap();
        let now = dt(2026, 2, 2, 10, 0);
        assert_eq!(next_occurrence(&def, now), dt(2026, 2, 2, 12, 0));
    }

    #[test]
    fn weekly_passed_today_picks_next_configured_day() {
        // Monday 10:00, schedule Mon/Wed/Fri at 08:00 -> Wednesday.
        let def = ScheduleDef::weekly(t(8, 0), &[0, 2, 4], 1).unwrap();
        let now = dt(2026, 2, 2, 10, 0);
        assert_eq!(next_occurrence(&def, now), dt(2026, 2, 4, 8, 0));
    }

    #[test]
    fn weekly_wraps_to_next_week() {
        // Friday 2026-02-06 20:00, schedule Tuesdays at 18:00.
        let def = ScheduleDef::weekly(t(18, 0), &[1], 1).unwrap();
        let now = dt(2026, 2, 6, 20, 0);
        assert_eq!(next_occurrence(&def, now), dt(2026, 2, 10, 18, 0));
    }
}

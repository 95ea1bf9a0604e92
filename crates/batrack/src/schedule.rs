//! Daily run windows.

use chrono::{DateTime, NaiveTime, TimeZone};

use crate::config::{parse_time, RunConfig};
use crate::error::Result;

/// A named daily window; windows with `start > stop` wrap past midnight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunWindow {
    /// Name of the run.
    pub name: String,
    /// Daily start time.
    pub start: NaiveTime,
    /// Daily stop time.
    pub stop: NaiveTime,
}

impl RunWindow {
    /// Parse the window of a configured run.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a time cannot be parsed.
    pub fn from_run(run: &RunConfig) -> Result<Self> {
        Ok(Self {
            name: run.name.clone(),
            start: parse_time(&run.start)?,
            stop: parse_time(&run.stop)?,
        })
    }

    /// Whether `time` lies within the window (start inclusive, stop exclusive).
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.stop {
            self.start <= time && time < self.stop
        } else {
            time >= self.start || time < self.stop
        }
    }
}

/// First occurrence of the daily `time` strictly after `now`.
fn next_occurrence<Tz: TimeZone>(time: NaiveTime, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    // three days cover a skipped local time on a DST change
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() {
            if candidate > *now {
                return Some(candidate);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// The configured runs in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    windows: Vec<RunWindow>,
}

impl Schedule {
    /// Build the schedule of the configured runs.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a run time cannot be parsed.
    pub fn from_runs(runs: &[RunConfig]) -> Result<Self> {
        let windows = runs.iter().map(RunWindow::from_run).collect::<Result<_>>()?;
        Ok(Self { windows })
    }

    /// Whether no runs are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// All windows.
    #[must_use]
    pub fn windows(&self) -> &[RunWindow] {
        &self.windows
    }

    /// The first run whose window contains `time`.
    #[must_use]
    pub fn active_at(&self, time: NaiveTime) -> Option<&RunWindow> {
        self.windows.iter().find(|w| w.contains(time))
    }

    /// The earliest run start after `now`, with its window.
    #[must_use]
    pub fn next_start_after<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> Option<(&RunWindow, DateTime<Tz>)> {
        self.windows
            .iter()
            .filter_map(|w| next_occurrence(w.start, now).map(|at| (w, at)))
            .min_by(|a, b| a.1.cmp(&b.1))
    }

    /// When `window`, active at `now`, has to stop.
    #[must_use]
    pub fn stop_deadline<Tz: TimeZone>(
        window: &RunWindow,
        now: &DateTime<Tz>,
    ) -> Option<DateTime<Tz>> {
        next_occurrence(window.stop, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn run(name: &str, start: &str, stop: &str) -> RunConfig {
        RunConfig {
            name: name.to_string(),
            start: start.to_string(),
            stop: stop.to_string(),
            ..RunConfig::default()
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_contains_same_day() {
        let w = RunWindow::from_run(&run("day", "08:00", "12:00")).unwrap();
        assert!(w.contains(time(8, 0)));
        assert!(w.contains(time(11, 59)));
        assert!(!w.contains(time(12, 0)));
        assert!(!w.contains(time(7, 59)));
    }

    #[test]
    fn test_contains_wraps_midnight() {
        let w = RunWindow::from_run(&run("night", "21:00", "05:30")).unwrap();
        assert!(w.contains(time(21, 0)));
        assert!(w.contains(time(23, 59)));
        assert!(w.contains(time(0, 0)));
        assert!(w.contains(time(5, 29)));
        assert!(!w.contains(time(5, 30)));
        assert!(!w.contains(time(12, 0)));
    }

    #[test]
    fn test_from_runs_rejects_bad_time() {
        assert!(Schedule::from_runs(&[run("bad", "25:00", "05:00")]).is_err());
    }

    #[test]
    fn test_active_at_first_match() {
        let schedule = Schedule::from_runs(&[
            run("evening", "18:00", "23:00"),
            run("night", "21:00", "05:00"),
        ])
        .unwrap();

        assert_eq!(schedule.active_at(time(22, 0)).unwrap().name, "evening");
        assert_eq!(schedule.active_at(time(1, 0)).unwrap().name, "night");
        assert!(schedule.active_at(time(12, 0)).is_none());
        assert!(Schedule::default().active_at(time(12, 0)).is_none());
    }

    #[test]
    fn test_next_start_after() {
        let schedule = Schedule::from_runs(&[
            run("morning", "04:00", "06:00"),
            run("night", "21:00", "02:00"),
        ])
        .unwrap();

        let (w, start) = schedule.next_start_after(&at(12, 0)).unwrap();
        assert_eq!(w.name, "night");
        assert_eq!(start, at(21, 0));

        let (w, start) = schedule.next_start_after(&at(22, 0)).unwrap();
        assert_eq!(w.name, "morning");
        assert_eq!(start, Utc.with_ymd_and_hms(2023, 6, 2, 4, 0, 0).unwrap());

        assert!(Schedule::default().next_start_after(&at(12, 0)).is_none());
    }

    #[test]
    fn test_stop_deadline() {
        let w = RunWindow::from_run(&run("night", "21:00", "05:00")).unwrap();
        assert_eq!(
            Schedule::stop_deadline(&w, &at(22, 0)).unwrap(),
            Utc.with_ymd_and_hms(2023, 6, 2, 5, 0, 0).unwrap()
        );
        assert_eq!(Schedule::stop_deadline(&w, &at(1, 0)).unwrap(), at(5, 0));
    }
}

//! Time windowed aggregation of visitor counts.
//!
//! Database access stays in the web layer, everything here works on already
//! loaded samples so that it can be checked without a database.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::models::{Downtime, IdType};

/// Look-back window ending now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Hour,
    Day,
    Week,
    Month,
}

impl Default for Period {
    fn default() -> Self {
        Period::Day
    }
}

impl Period {
    pub fn duration(&self) -> Duration {
        match self {
            Period::Hour => Duration::hours(1),
            Period::Day => Duration::days(1),
            Period::Week => Duration::days(7),
            Period::Month => Duration::days(30),
        }
    }

    pub fn window_start(&self, now: NaiveDateTime) -> NaiveDateTime {
        now - self.duration()
    }
}

/// Size of the buckets a series is split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Week,
    Month,
}

impl Default for Granularity {
    fn default() -> Self {
        Granularity::Hour
    }
}

impl Granularity {
    /// Keys sort in chronological order.
    pub fn bucket_key(&self, at: NaiveDateTime) -> String {
        match self {
            Granularity::Hour => at.format("%Y-%m-%d %H:00").to_string(),
            Granularity::Day => at.format("%Y-%m-%d").to_string(),
            Granularity::Week => {
                let week = at.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            },
            Granularity::Month => at.format("%Y-%m").to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountSample {
    pub sensor_id: IdType,
    pub visitors: i64,
    pub at: NaiveDateTime,
}

impl From<(IdType, i32, NaiveDateTime)> for CountSample {
    fn from((sensor_id, visitors, at): (IdType, i32, NaiveDateTime)) -> Self {
        CountSample { sensor_id, visitors: visitors as i64, at }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub bucket: String,
    pub visitors: i64,
    pub records: i64,
}

pub fn bucket_counts(samples: &[CountSample], granularity: Granularity) -> Vec<Bucket> {
    let mut buckets: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    for sample in samples {
        let entry = buckets.entry(granularity.bucket_key(sample.at)).or_insert((0, 0));
        entry.0 += sample.visitors;
        entry.1 += 1;
    }
    buckets.into_iter()
        .map(|(bucket, (visitors, records))| Bucket { bucket, visitors, records })
        .collect()
}

pub fn total_visitors(samples: &[CountSample]) -> i64 {
    samples.iter().map(|x| x.visitors).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HourTotal {
    pub hour: u32,
    pub visitors: i64,
}

/// Visitors per hour of the day, always 24 entries.
pub fn hour_of_day_totals(samples: &[CountSample]) -> Vec<HourTotal> {
    let mut totals = [0i64; 24];
    for sample in samples {
        totals[sample.at.hour() as usize] += sample.visitors;
    }
    totals.iter()
        .enumerate()
        .map(|(hour, visitors)| HourTotal { hour: hour as u32, visitors: *visitors })
        .collect()
}

/// Busiest hour of the day, the earliest one wins ties.
pub fn peak_hour(samples: &[CountSample]) -> Option<HourTotal> {
    if samples.is_empty() {
        return None
    }
    hour_of_day_totals(samples)
        .into_iter()
        .fold(None, |best: Option<HourTotal>, x| match best {
            Some(b) if b.visitors >= x.visitors => Some(b),
            _ => Some(x),
        })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakHour {
    pub hour: u32,
    pub avg_visitors: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakWeekday {
    pub weekday: &'static str,
    pub avg_visitors: f64,
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn mean(values: &[i64]) -> f64 {
    values.iter().sum::<i64>() as f64 / values.len() as f64
}

fn by_average_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Hours of the day with the highest mean visitors, averaged over the days
/// in which that hour saw any record.
pub fn peak_hours(samples: &[CountSample], count: usize) -> Vec<PeakHour> {
    let mut per_day_hour: BTreeMap<(NaiveDate, u32), i64> = BTreeMap::new();
    for sample in samples {
        *per_day_hour.entry((sample.at.date(), sample.at.hour())).or_insert(0) += sample.visitors;
    }

    let mut per_hour: BTreeMap<u32, Vec<i64>> = BTreeMap::new();
    for ((_day, hour), visitors) in per_day_hour {
        per_hour.entry(hour).or_insert_with(Vec::new).push(visitors);
    }

    let mut peaks: Vec<PeakHour> = per_hour.into_iter()
        .map(|(hour, values)| PeakHour { hour, avg_visitors: mean(&values) })
        .collect();
    // Stable sort, ties keep the hour order
    peaks.sort_by(|a, b| by_average_desc(a.avg_visitors, b.avg_visitors));
    peaks.truncate(count);
    peaks
}

/// Week days with the highest mean of daily visitors.
pub fn peak_weekdays(samples: &[CountSample], count: usize) -> Vec<PeakWeekday> {
    let mut per_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for sample in samples {
        *per_day.entry(sample.at.date()).or_insert(0) += sample.visitors;
    }

    let mut per_weekday: BTreeMap<u32, (Weekday, Vec<i64>)> = BTreeMap::new();
    for (day, visitors) in per_day {
        let weekday = day.weekday();
        per_weekday.entry(weekday.num_days_from_monday())
            .or_insert_with(|| (weekday, Vec::new()))
            .1.push(visitors);
    }

    let mut peaks: Vec<PeakWeekday> = per_weekday.into_values()
        .map(|(day, values)| PeakWeekday { weekday: weekday_name(day), avg_visitors: mean(&values) })
        .collect();
    peaks.sort_by(|a, b| by_average_desc(a.avg_visitors, b.avg_visitors));
    peaks.truncate(count);
    peaks
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DowntimeInterval {
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
    pub seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DowntimeSummary {
    pub intervals: Vec<DowntimeInterval>,
    pub total_seconds: i64,
    pub window_seconds: i64,
    pub uptime_percentage: f64,
}

/// Downtime inside `[window_start, now]`.
/// Intervals are clipped to the window, open intervals last until `now`.
pub fn downtime_summary(downtimes: &[Downtime], window_start: NaiveDateTime, now: NaiveDateTime) -> DowntimeSummary {
    let intervals: Vec<DowntimeInterval> = downtimes.iter()
        .filter_map(|x| {
            let start = x.started_at.max(window_start);
            let end = x.ended_at.unwrap_or(now).min(now);
            if end <= start {
                return None
            }
            Some(DowntimeInterval {
                started_at: x.started_at,
                ended_at: x.ended_at,
                seconds: (end - start).num_seconds(),
            })
        })
        .collect();

    let total_seconds: i64 = intervals.iter().map(|x| x.seconds).sum();
    let window_seconds = (now - window_start).num_seconds().max(0);
    let uptime_percentage = if window_seconds == 0 {
        100.0
    } else {
        let ratio = 1.0 - total_seconds as f64 / window_seconds as f64;
        (ratio.max(0.0) * 10000.0).round() / 100.0
    };

    DowntimeSummary { intervals, total_seconds, window_seconds, uptime_percentage }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(day: u32, hour: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, day).unwrap().and_hms_opt(hour, min, 0).unwrap()
    }

    fn sample(day: u32, hour: u32, visitors: i64) -> CountSample {
        CountSample { sensor_id: 1, visitors, at: at(day, hour, 15) }
    }

    #[test]
    fn bucket_keys() {
        let t = at(1, 9, 41);
        assert_eq!(Granularity::Hour.bucket_key(t), "2024-07-01 09:00");
        assert_eq!(Granularity::Day.bucket_key(t), "2024-07-01");
        assert_eq!(Granularity::Week.bucket_key(t), "2024-W27");
        assert_eq!(Granularity::Month.bucket_key(t), "2024-07");
    }

    #[test]
    fn buckets_are_summed_in_order() {
        let samples = vec![sample(2, 10, 5), sample(1, 9, 3), sample(1, 9, 4), sample(1, 23, 1)];

        let hourly = bucket_counts(&samples, Granularity::Hour);
        assert_eq!(hourly, vec![
            Bucket { bucket: "2024-07-01 09:00".to_string(), visitors: 7, records: 2 },
            Bucket { bucket: "2024-07-01 23:00".to_string(), visitors: 1, records: 1 },
            Bucket { bucket: "2024-07-02 10:00".to_string(), visitors: 5, records: 1 },
        ]);

        let daily = bucket_counts(&samples, Granularity::Day);
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].visitors, 8);

        assert_eq!(bucket_counts(&samples, Granularity::Month)[0].visitors, 13);
        assert!(bucket_counts(&[], Granularity::Day).is_empty());
    }

    #[test]
    fn periods() {
        let now = at(8, 12, 0);
        assert_eq!(Period::Hour.window_start(now), at(8, 11, 0));
        assert_eq!(Period::Week.window_start(now), at(1, 12, 0));
        assert_eq!(Period::default(), Period::Day);
    }

    #[test]
    fn peak_hour_detection() {
        assert_eq!(peak_hour(&[]), None);

        let samples = vec![sample(1, 9, 10), sample(1, 14, 12), sample(2, 9, 3)];
        let totals = hour_of_day_totals(&samples);
        assert_eq!(totals.len(), 24);
        assert_eq!(totals[9].visitors, 13);
        assert_eq!(peak_hour(&samples), Some(HourTotal { hour: 9, visitors: 13 }));

        // Ties keep the earliest hour
        let samples = vec![sample(1, 16, 5), sample(1, 8, 5)];
        assert_eq!(peak_hour(&samples).map(|x| x.hour), Some(8));
    }

    #[test]
    fn peak_hours_average_over_days() {
        let samples = vec![
            sample(1, 9, 10), sample(2, 9, 20),
            sample(1, 14, 12),
            sample(1, 18, 2), sample(2, 18, 4),
        ];
        let peaks = peak_hours(&samples, 2);
        assert_eq!(peaks, vec![
            PeakHour { hour: 9, avg_visitors: 15.0 },
            PeakHour { hour: 14, avg_visitors: 12.0 },
        ]);
    }

    #[test]
    fn peak_weekdays_average_over_weeks() {
        // 2024-07-01 and 2024-07-08 are mondays, 2024-07-02 a tuesday
        let samples = vec![sample(1, 9, 10), sample(8, 9, 30), sample(2, 10, 25)];
        let peaks = peak_weekdays(&samples, 3);
        assert_eq!(peaks, vec![
            PeakWeekday { weekday: "Tuesday", avg_visitors: 25.0 },
            PeakWeekday { weekday: "Monday", avg_visitors: 20.0 },
        ]);
    }

    #[test]
    fn downtime_clipping() {
        let now = at(2, 0, 0);
        let window_start = at(1, 0, 0);
        let downtimes = vec![
            // Started before the window
            Downtime { id: 1, sensor_id: 1, started_at: at(1, 0, 0) - Duration::hours(2), ended_at: Some(at(1, 1, 0)) },
            // Fully inside
            Downtime { id: 2, sensor_id: 1, started_at: at(1, 10, 0), ended_at: Some(at(1, 10, 30)) },
            // Entirely before, dropped
            Downtime { id: 3, sensor_id: 1, started_at: at(1, 0, 0) - Duration::hours(5), ended_at: Some(at(1, 0, 0) - Duration::hours(4)) },
            // Still open
            Downtime { id: 4, sensor_id: 1, started_at: at(1, 23, 0), ended_at: None },
        ];

        let summary = downtime_summary(&downtimes, window_start, now);
        assert_eq!(summary.intervals.len(), 3);
        assert_eq!(summary.intervals[0].seconds, 3600);
        assert_eq!(summary.intervals[1].seconds, 1800);
        assert_eq!(summary.intervals[2].seconds, 3600);
        assert_eq!(summary.total_seconds, 9000);
        assert_eq!(summary.window_seconds, 86400);
        assert_eq!(summary.uptime_percentage, 89.58);
    }
}

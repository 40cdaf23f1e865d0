//! Earnings for done cuts, by UTC calendar month.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc, Weekday};
use serde::Serialize;

use crate::Result;
use crate::model::{Cut, CutFilter, Step};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeSummary {
    pub monthly_target: i64,
    pub earned: i64,
    pub remaining: i64,
    pub completed_cuts: usize,
    pub remaining_cuts: u64,
    pub daily_quota: f64,
    pub remaining_business_days: u32,
    pub average_price: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyIncome {
    pub year: i32,
    pub month: u32,
    pub earned: i64,
    pub cut_count: usize,
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn next_month_start(date: NaiveDate) -> NaiveDate {
    month_start(date)
        .checked_add_months(Months::new(1))
        .unwrap_or(NaiveDate::MAX)
}

fn completed_in(cut: &Cut, start: NaiveDate, end: NaiveDate) -> bool {
    cut.step == Step::Done
        && cut
            .completed_at
            .map(|at| at.date_naive())
            .is_some_and(|d| d >= start && d < end)
}

/// Weekdays from `from` through the last day of its month, inclusive.
pub fn remaining_business_days(from: NaiveDate) -> u32 {
    let end = next_month_start(from);
    from.iter_days()
        .take_while(|d| *d < end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .count() as u32
}

/// Progress toward `monthly_target` for the month containing `now`.
///
/// The average price is over every cut with a unit price set, done or not;
/// the remaining cut count is how many more such cuts reach the target.
pub fn income_summary(cuts: &[Cut], monthly_target: i64, now: DateTime<Utc>) -> IncomeSummary {
    let today = now.date_naive();
    let start = month_start(today);
    let end = next_month_start(today);

    let done: Vec<&Cut> = cuts.iter().filter(|c| completed_in(c, start, end)).collect();
    let earned: i64 = done.iter().map(|c| c.total_price()).sum();

    let priced: Vec<&Cut> = cuts.iter().filter(|c| c.price_per_cut > 0).collect();
    let average_price = if priced.is_empty() {
        0.0
    } else {
        priced.iter().map(|c| c.total_price()).sum::<i64>() as f64 / priced.len() as f64
    };

    let remaining_business_days = remaining_business_days(today);
    let remaining = (monthly_target - earned).max(0);
    let remaining_cuts = if average_price > 0.0 {
        (remaining as f64 / average_price).ceil() as u64
    } else {
        0
    };
    let daily_quota = if remaining_business_days > 0 {
        remaining_cuts as f64 / f64::from(remaining_business_days)
    } else {
        0.0
    };

    IncomeSummary {
        monthly_target,
        earned,
        remaining,
        completed_cuts: done.len(),
        remaining_cuts,
        daily_quota,
        remaining_business_days,
        average_price,
    }
}

/// Earnings for the `months_back` months ending with the one containing
/// `now`, oldest first.
pub fn income_history(cuts: &[Cut], months_back: u32, now: DateTime<Utc>) -> Vec<MonthlyIncome> {
    let current = month_start(now.date_naive());
    (0..months_back)
        .rev()
        .filter_map(|i| current.checked_sub_months(Months::new(i)))
        .map(|start| {
            let end = next_month_start(start);
            let done: Vec<&Cut> = cuts.iter().filter(|c| completed_in(c, start, end)).collect();
            MonthlyIncome {
                year: start.year(),
                month: start.month(),
                earned: done.iter().map(|c| c.total_price()).sum(),
                cut_count: done.len(),
            }
        })
        .collect()
}

impl Store {
    pub async fn income_summary(&self, now: DateTime<Utc>) -> Result<IncomeSummary> {
        let cuts = self.list_cuts(&CutFilter::default()).await?;
        let target = self.monthly_target().await?;
        Ok(income_summary(&cuts, target, now))
    }

    pub async fn income_history(
        &self,
        months_back: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<MonthlyIncome>> {
        let cuts = self.list_cuts(&CutFilter::default()).await?;
        Ok(income_history(&cuts, months_back, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PricingType, WorkType};

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn cut(price: i64, completed_at: Option<&str>) -> Cut {
        let created = ts("2025-01-01T00:00:00Z");
        Cut {
            id: 1,
            studio_id: None,
            project_name: "P".to_string(),
            episode_number: 1,
            scene_number: None,
            cut_number: "C001".to_string(),
            step: if completed_at.is_some() { Step::Done } else { Step::Working },
            work_type: WorkType::Genga,
            pricing_type: PricingType::PerCut,
            price_per_cut: price,
            sheet_count: 0,
            deadline: None,
            retake_count: 0,
            notes: String::new(),
            created_at: created,
            updated_at: created,
            completed_at: completed_at.map(ts),
        }
    }

    #[test]
    fn business_days_skip_weekends() {
        // 2025-06-27 is a Friday; June ends on Monday the 30th.
        let d = NaiveDate::from_ymd_opt(2025, 6, 27).unwrap();
        assert_eq!(remaining_business_days(d), 2);
        let first = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(remaining_business_days(first), 21);
    }

    #[test]
    fn summary_counts_only_this_month() {
        let cuts = vec![
            cut(4000, Some("2025-06-03T10:00:00Z")),
            cut(6000, Some("2025-06-20T10:00:00Z")),
            cut(5000, Some("2025-05-31T23:00:00Z")),
            cut(5000, None),
        ];
        let s = income_summary(&cuts, 30_000, ts("2025-06-27T08:00:00Z"));
        assert_eq!(s.earned, 10_000);
        assert_eq!(s.completed_cuts, 2);
        assert_eq!(s.remaining, 20_000);
        assert_eq!(s.average_price, 5000.0);
        assert_eq!(s.remaining_cuts, 4);
        assert_eq!(s.remaining_business_days, 2);
        assert_eq!(s.daily_quota, 2.0);
    }

    #[test]
    fn summary_without_prices_has_no_quota() {
        let s = income_summary(&[cut(0, None)], 10_000, ts("2025-06-27T08:00:00Z"));
        assert_eq!(s.average_price, 0.0);
        assert_eq!(s.remaining_cuts, 0);
        assert_eq!(s.daily_quota, 0.0);
    }

    #[test]
    fn history_is_oldest_first_across_year_boundary() {
        let cuts = vec![
            cut(3000, Some("2024-12-15T00:00:00Z")),
            cut(2000, Some("2025-02-01T00:00:00Z")),
        ];
        let h = income_history(&cuts, 3, ts("2025-02-10T00:00:00Z"));
        let months: Vec<(i32, u32)> = h.iter().map(|m| (m.year, m.month)).collect();
        assert_eq!(months, vec![(2024, 12), (2025, 1), (2025, 2)]);
        assert_eq!(h[0].earned, 3000);
        assert_eq!(h[1].cut_count, 0);
        assert_eq!(h[2].earned, 2000);
    }
}

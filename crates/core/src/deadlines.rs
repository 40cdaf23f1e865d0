use chrono::NaiveDate;
use serde::Serialize;

use crate::Result;
use crate::model::{Cut, CutFilter, Step};
use crate::store::Store;

/// Cuts due within this many days count as due soon.
pub const DUE_SOON_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineBucket {
    Overdue,
    Today,
    Tomorrow,
    ThisWeek,
}

impl DeadlineBucket {
    pub fn is_urgent(self) -> bool {
        matches!(self, DeadlineBucket::Overdue | DeadlineBucket::Today)
    }

    fn for_days_left(days: i64) -> Option<Self> {
        match days {
            d if d < 0 => Some(DeadlineBucket::Overdue),
            0 => Some(DeadlineBucket::Today),
            1 => Some(DeadlineBucket::Tomorrow),
            2..=7 => Some(DeadlineBucket::ThisWeek),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadlineGroup {
    pub bucket: DeadlineBucket,
    pub cuts: Vec<Cut>,
}

fn days_left(cut: &Cut, today: NaiveDate) -> Option<i64> {
    if cut.step == Step::Done {
        return None;
    }
    cut.deadline.map(|d| (d - today).num_days())
}

/// Open cuts with a deadline within a week, in urgency order. Empty groups
/// are omitted; cuts due later are left out.
pub fn group_deadlines(cuts: &[Cut], today: NaiveDate) -> Vec<DeadlineGroup> {
    let buckets = [
        DeadlineBucket::Overdue,
        DeadlineBucket::Today,
        DeadlineBucket::Tomorrow,
        DeadlineBucket::ThisWeek,
    ];
    buckets
        .into_iter()
        .filter_map(|bucket| {
            let members: Vec<Cut> = cuts
                .iter()
                .filter(|c| {
                    days_left(c, today).and_then(DeadlineBucket::for_days_left) == Some(bucket)
                })
                .cloned()
                .collect();
            (!members.is_empty()).then_some(DeadlineGroup {
                bucket,
                cuts: members,
            })
        })
        .collect()
}

/// Open cuts due within `days`, overdue ones included.
pub fn due_soon_count(cuts: &[Cut], today: NaiveDate, days: i64) -> usize {
    cuts.iter()
        .filter(|c| days_left(c, today).is_some_and(|d| d <= days))
        .count()
}

impl Store {
    pub async fn deadline_groups(&self, today: NaiveDate) -> Result<Vec<DeadlineGroup>> {
        let cuts = self.list_cuts(&CutFilter::default()).await?;
        Ok(group_deadlines(&cuts, today))
    }

    pub async fn due_soon_count(&self, today: NaiveDate) -> Result<usize> {
        let cuts = self.list_cuts(&CutFilter::default()).await?;
        Ok(due_soon_count(&cuts, today, DUE_SOON_DAYS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PricingType, WorkType};
    use chrono::{DateTime, Utc};

    fn cut(id: i64, step: Step, deadline: Option<NaiveDate>) -> Cut {
        let at = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        Cut {
            id,
            studio_id: None,
            project_name: "P".to_string(),
            episode_number: 1,
            scene_number: None,
            cut_number: format!("C{id:03}"),
            step,
            work_type: WorkType::Genga,
            pricing_type: PricingType::PerCut,
            price_per_cut: 0,
            sheet_count: 0,
            deadline,
            retake_count: 0,
            notes: String::new(),
            created_at: at,
            updated_at: at,
            completed_at: (step == Step::Done).then_some(at),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[test]
    fn groups_by_days_left() {
        let today = day(10);
        let cuts = vec![
            cut(1, Step::Working, Some(day(8))),
            cut(2, Step::Received, Some(day(10))),
            cut(3, Step::Retake, Some(day(11))),
            cut(4, Step::Working, Some(day(17))),
            cut(5, Step::Working, Some(day(18))),
            cut(6, Step::Done, Some(day(9))),
            cut(7, Step::Working, None),
        ];

        let groups = group_deadlines(&cuts, today);
        let shape: Vec<(DeadlineBucket, Vec<i64>)> = groups
            .iter()
            .map(|g| (g.bucket, g.cuts.iter().map(|c| c.id).collect()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (DeadlineBucket::Overdue, vec![1]),
                (DeadlineBucket::Today, vec![2]),
                (DeadlineBucket::Tomorrow, vec![3]),
                (DeadlineBucket::ThisWeek, vec![4]),
            ]
        );
        assert!(groups[0].bucket.is_urgent());
        assert!(!groups[2].bucket.is_urgent());
    }

    #[test]
    fn due_soon_includes_overdue_but_not_done() {
        let today = day(10);
        let cuts = vec![
            cut(1, Step::Working, Some(day(1))),
            cut(2, Step::Working, Some(day(13))),
            cut(3, Step::Working, Some(day(14))),
            cut(4, Step::Done, Some(day(10))),
        ];
        assert_eq!(due_soon_count(&cuts, today, DUE_SOON_DAYS), 2);
    }
}

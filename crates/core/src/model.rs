use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type RecordId = i64;

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

text_enum! {
    /// Production state of a cut.
    Step {
        Received => "received",
        Working => "working",
        Submitted => "submitted",
        Retake => "retake",
        Done => "done",
    }
}

text_enum! {
    WorkType {
        Genga => "genga",
        Nigen => "nigen",
        Douga => "douga",
        Sakkan => "sakkan",
        Layout => "layout",
        Other => "other",
    }
}

text_enum! {
    PricingType {
        PerCut => "per_cut",
        PerSheet => "per_sheet",
    }
}

text_enum! {
    QuickLinkType {
        Url => "url",
        Tel => "tel",
        Email => "email",
        Other => "other",
    }
}

impl Step {
    /// Steps reachable from `self` in one transition.
    pub fn next_steps(self) -> &'static [Step] {
        match self {
            Step::Received => &[Step::Working],
            Step::Working => &[Step::Submitted],
            Step::Submitted => &[Step::Retake, Step::Done],
            Step::Retake => &[Step::Working],
            Step::Done => &[],
        }
    }

    pub fn can_transition_to(self, next: Step) -> bool {
        self.next_steps().contains(&next)
    }

    /// Ordering used by cut lists: what needs attention first.
    pub fn list_priority(self) -> u8 {
        match self {
            Step::Retake => 0,
            Step::Working => 1,
            Step::Received => 2,
            Step::Submitted => 3,
            Step::Done => 4,
        }
    }
}

impl Default for WorkType {
    fn default() -> Self {
        WorkType::Genga
    }
}

impl Default for PricingType {
    fn default() -> Self {
        PricingType::PerCut
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Studio {
    pub id: RecordId,
    pub name: String,
    pub short_name: String,
    pub default_price_per_cut: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cut {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub studio_id: Option<RecordId>,
    pub project_name: String,
    pub episode_number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_number: Option<String>,
    pub cut_number: String,
    pub step: Step,
    pub work_type: WorkType,
    pub pricing_type: PricingType,
    pub price_per_cut: i64,
    pub sheet_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDate>,
    pub retake_count: u32,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Cut {
    /// Amount earned for this cut: the unit price, times the sheet count when
    /// priced per sheet.
    pub fn total_price(&self) -> i64 {
        match self.pricing_type {
            PricingType::PerCut => self.price_per_cut,
            PricingType::PerSheet => self.price_per_cut * i64::from(self.sheet_count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetakeHistory {
    pub id: RecordId,
    pub cut_id: RecordId,
    pub returned_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl RetakeHistory {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickLink {
    pub id: RecordId,
    pub label: String,
    pub value: String,
    #[serde(rename = "type")]
    pub link_type: QuickLinkType,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewStudio {
    pub name: String,
    pub short_name: String,
    pub default_price_per_cut: i64,
    pub contact_info: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StudioPatch {
    pub name: Option<String>,
    pub short_name: Option<String>,
    pub default_price_per_cut: Option<i64>,
    pub contact_info: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCut {
    pub studio_id: Option<RecordId>,
    pub project_name: String,
    pub episode_number: i64,
    pub scene_number: Option<String>,
    pub cut_number: String,
    pub step: Step,
    pub work_type: WorkType,
    pub pricing_type: PricingType,
    pub price_per_cut: i64,
    pub sheet_count: u32,
    pub deadline: Option<NaiveDate>,
    pub notes: String,
}

impl NewCut {
    pub fn new(
        project_name: impl Into<String>,
        episode_number: i64,
        cut_number: impl Into<String>,
    ) -> Self {
        Self {
            studio_id: None,
            project_name: project_name.into(),
            episode_number,
            scene_number: None,
            cut_number: cut_number.into(),
            step: Step::Received,
            work_type: WorkType::default(),
            pricing_type: PricingType::default(),
            price_per_cut: 0,
            sheet_count: 0,
            deadline: None,
            notes: String::new(),
        }
    }
}

/// Editable cut fields. Step, retake count and the creation/completion
/// timestamps only change through the step machine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CutPatch {
    pub studio_id: Option<Option<RecordId>>,
    pub project_name: Option<String>,
    pub episode_number: Option<i64>,
    pub scene_number: Option<Option<String>>,
    pub cut_number: Option<String>,
    pub work_type: Option<WorkType>,
    pub pricing_type: Option<PricingType>,
    pub price_per_cut: Option<i64>,
    pub sheet_count: Option<u32>,
    pub deadline: Option<Option<NaiveDate>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CutFilter {
    pub project_name: Option<String>,
    pub step: Option<Step>,
    pub studio_id: Option<RecordId>,
    pub work_type: Option<WorkType>,
}

impl CutFilter {
    pub fn matches(&self, cut: &Cut) -> bool {
        self.project_name
            .as_deref()
            .is_none_or(|p| cut.project_name == p)
            && self.step.is_none_or(|s| cut.step == s)
            && self.studio_id.is_none_or(|id| cut.studio_id == Some(id))
            && self.work_type.is_none_or(|w| cut.work_type == w)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuickLink {
    pub label: String,
    pub value: String,
    pub link_type: QuickLinkType,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuickLinkPatch {
    pub label: Option<String>,
    pub value: Option<String>,
    pub link_type: Option<QuickLinkType>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudioStats {
    pub studio: Studio,
    pub total_cuts: u64,
    pub total_retakes: u64,
    pub retake_rate: f64,
}

/// Guess what kind of contact a free-form value is.
pub fn detect_link_type(value: &str) -> QuickLinkType {
    if value.starts_with("http://") || value.starts_with("https://") {
        return QuickLinkType::Url;
    }
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if looks_like_phone(&compact) {
        return QuickLinkType::Tel;
    }
    if looks_like_email(value) {
        return QuickLinkType::Email;
    }
    QuickLinkType::Other
}

// Domestic Japanese numbers: leading 0, 6..=13 digits in total.
fn looks_like_phone(compact: &str) -> bool {
    compact.starts_with('0')
        && (6..=13).contains(&compact.len())
        && compact.chars().all(|c| c.is_ascii_digit())
}

fn looks_like_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

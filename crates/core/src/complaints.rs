//! Complaint routing.
//!
//! Complaints are routed to exactly one department by keyword match. Any
//! mention of hostel life wins over the utility it concerns, so "no water on
//! hostel floor 2" lands with the hostel incharge rather than the water desk.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplaintCategory {
    Water,
    Electricity,
    Transport,
    Sanitation,
    Academics,
    Hostel,
    Canteen,
    General,
}

const HOSTEL_KEYWORDS: &[&str] =
    &["hostel", "room no", "room number", "block", "warden", "mess", "dorm"];

/// Checked in order; the first category with a hit wins.
const CATEGORY_KEYWORDS: &[(ComplaintCategory, &[&str])] = &[
    (ComplaintCategory::Water, &["water", "tap", "leak", "pipe", "drinking", "ro plant"]),
    (
        ComplaintCategory::Electricity,
        &["electric", "power", "light", "fan", "socket", "switch", "wiring", "voltage"],
    ),
    (ComplaintCategory::Transport, &["bus", "transport", "driver", "route", "vehicle", "shuttle"]),
    (
        ComplaintCategory::Sanitation,
        &["toilet", "washroom", "restroom", "garbage", "dustbin", "clean", "smell", "drain"],
    ),
    (
        ComplaintCategory::Academics,
        &["exam", "class", "lecture", "faculty", "syllabus", "marks", "lab", "library", "timetable"],
    ),
    (ComplaintCategory::Canteen, &["canteen", "food", "snack", "cafeteria", "meal"]),
];

impl ComplaintCategory {
    pub const ALL: [ComplaintCategory; 8] = [
        Self::Water,
        Self::Electricity,
        Self::Transport,
        Self::Sanitation,
        Self::Academics,
        Self::Hostel,
        Self::Canteen,
        Self::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Water => "WATER",
            Self::Electricity => "ELECTRICITY",
            Self::Transport => "TRANSPORT",
            Self::Sanitation => "SANITATION",
            Self::Academics => "ACADEMICS",
            Self::Hostel => "HOSTEL",
            Self::Canteen => "CANTEEN",
            Self::General => "GENERAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|category| category.as_str() == normalized)
    }

    pub fn classify(text: &str) -> Self {
        let lowered = text.to_lowercase();
        if HOSTEL_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
            return Self::Hostel;
        }

        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword)))
            .map(|(category, _)| *category)
            .unwrap_or(Self::General)
    }
}

impl fmt::Display for ComplaintCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ComplaintCategory;

    #[test]
    fn hostel_mentions_take_priority_over_utilities() {
        assert_eq!(
            ComplaintCategory::classify("No drinking water on hostel floor 2"),
            ComplaintCategory::Hostel
        );
        assert_eq!(
            ComplaintCategory::classify("Warden office fan is broken"),
            ComplaintCategory::Hostel
        );
    }

    #[test]
    fn routes_by_first_matching_keyword_group() {
        assert_eq!(
            ComplaintCategory::classify("The tap near the library is leaking"),
            ComplaintCategory::Water
        );
        assert_eq!(ComplaintCategory::classify("Bus 14 skipped my stop"), ComplaintCategory::Transport);
        assert_eq!(
            ComplaintCategory::classify("Canteen food was stale today"),
            ComplaintCategory::Canteen
        );
    }

    #[test]
    fn unmatched_text_falls_back_to_general() {
        assert_eq!(ComplaintCategory::classify("Need a new notice board"), ComplaintCategory::General);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(ComplaintCategory::parse(" sanitation "), Some(ComplaintCategory::Sanitation));
        assert_eq!(ComplaintCategory::parse("plumbing"), None);
    }
}

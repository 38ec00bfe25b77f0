use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Open deliveries at which a partner stops being eligible for new orders.
pub const MAX_PARTNER_LOAD: u32 = 5;

pub const MIN_RATING: f32 = 0.0;
pub const MAX_RATING: f32 = 5.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PartnerStatus {
    Active,
    Inactive,
    OnBreak,
}

impl PartnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerStatus::Active => "active",
            PartnerStatus::Inactive => "inactive",
            PartnerStatus::OnBreak => "on-break",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partner {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    pub status: PartnerStatus,
    pub assigned_areas: Vec<String>,
    #[serde(with = "shift_time")]
    pub shift_start: NaiveTime,
    #[serde(with = "shift_time")]
    pub shift_end: NaiveTime,
    pub current_load: u32,
    pub rating: f32,
    pub created_at: DateTime<Utc>,
}

impl Partner {
    pub fn is_active(&self) -> bool {
        self.status == PartnerStatus::Active
    }

    pub fn has_capacity(&self) -> bool {
        self.current_load < MAX_PARTNER_LOAD
    }

    pub fn covers_area(&self, area: &str) -> bool {
        let wanted = area.trim();
        self.assigned_areas
            .iter()
            .any(|candidate| candidate.trim().eq_ignore_ascii_case(wanted))
    }

    /// Whether `at` falls inside the shift. Shifts ending before they start
    /// run past midnight; equal bounds mean a round-the-clock shift.
    pub fn on_shift_at(&self, at: NaiveTime) -> bool {
        if self.shift_start == self.shift_end {
            true
        } else if self.shift_start < self.shift_end {
            self.shift_start <= at && at < self.shift_end
        } else {
            at >= self.shift_start || at < self.shift_end
        }
    }

    pub fn shift_label(&self) -> String {
        format!(
            "{}-{}",
            self.shift_start.format(shift_time::FORMAT),
            self.shift_end.format(shift_time::FORMAT)
        )
    }
}

/// `HH:MM` on the wire, `HH:MM:SS` also accepted on input.
pub mod shift_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn parse(raw: &str) -> Result<NaiveTime, chrono::ParseError> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
    }

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}

// Query validation: turns raw form fields into a LookupQuery before any network access

use serde::Deserialize;
use thiserror::Error;

/// Value the form selects carry while nothing has been chosen.
pub const UNSELECTED: &str = "0";

pub const MIN_SEAT_NUMBER_LEN: usize = 4;
pub const MAX_SEAT_NUMBER_LEN: usize = 7;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("education level is missing")]
    MissingLevel,

    #[error("region is missing")]
    MissingRegion,

    #[error("seat number must be 4 to 7 digits")]
    InvalidSeatNumber,
}

impl ValidationError {
    /// Message shown to the person filling in the form.
    pub fn user_message(&self) -> &'static str {
        match self {
            ValidationError::MissingLevel => "يرجى اختيار المرحلة التعليمية",
            ValidationError::MissingRegion => "يرجى اختيار المنطقة",
            ValidationError::InvalidSeatNumber => "يرجى إدخال رقم جلوس صحيح (4 أرقام على الأقل)",
        }
    }
}

// Education levels known to the results service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Primary = 1,
    Preparatory = 2,
}

impl Level {
    pub const ALL: [Level; 2] = [Level::Primary, Level::Preparatory];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.id() == id)
    }

    pub fn label(self) -> &'static str {
        match self {
            Level::Primary => "الابتدائية",
            Level::Preparatory => "الإعدادية",
        }
    }
}

/// Governorates accepted by the results service, as (govID, label).
pub const REGIONS: &[(u32, &str)] = &[
    (101, "القاهرة"),
    (102, "القليوبية"),
    (103, "المنوفية"),
    (104, "الغربية"),
    (105, "الدقهلية"),
    (106, "الشرقية"),
    (107, "كفر الشيخ"),
    (108, "البحيرة"),
    (109, "الاسكندرية"),
    (110, "مطروح"),
    (111, "دمياط"),
    (112, "بورسعيد"),
    (113, "الاسماعيلية"),
    (114, "السويس"),
    (115, "شمال سيناء"),
    (116, "جنوب سيناء"),
    (117, "الجيزة"),
    (118, "الفيوم"),
    (119, "المنيا"),
    (120, "بنى سويف"),
    (121, "اسيوط"),
    (122, "الوادى الجديد"),
    (123, "سوهاج"),
    (124, "قنا"),
    (125, "الأقصر"),
    (126, "البحر الاحمر"),
    (127, "أسوان"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region(u32);

impl Region {
    pub fn from_id(id: u32) -> Option<Self> {
        REGIONS
            .iter()
            .any(|(known, _)| *known == id)
            .then_some(Region(id))
    }

    pub fn id(self) -> u32 {
        self.0
    }

    pub fn label(self) -> &'static str {
        REGIONS
            .iter()
            .find(|(id, _)| *id == self.0)
            .map(|(_, label)| *label)
            .unwrap_or_default()
    }
}

// Raw fields as submitted by the search form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchFields {
    #[serde(default, rename = "grade")]
    pub level: Option<String>,
    #[serde(default, rename = "area")]
    pub region: Option<String>,
    #[serde(default, rename = "seatNumber")]
    pub seat_number: Option<String>,
}

/// A fully validated lookup. Only `validate` builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupQuery {
    level: Level,
    region: Region,
    seat_number: String,
}

impl LookupQuery {
    pub fn level(&self) -> Level {
        self.level
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn seat_number(&self) -> &str {
        &self.seat_number
    }
}

pub fn validate(fields: &SearchFields) -> Result<LookupQuery, ValidationError> {
    let level = selected_id(fields.level.as_deref())
        .and_then(Level::from_id)
        .ok_or(ValidationError::MissingLevel)?;

    let region = selected_id(fields.region.as_deref())
        .and_then(Region::from_id)
        .ok_or(ValidationError::MissingRegion)?;

    let seat_number = fields
        .seat_number
        .as_deref()
        .map(str::trim)
        .filter(|seat| is_valid_seat_number(seat))
        .ok_or(ValidationError::InvalidSeatNumber)?;

    Ok(LookupQuery {
        level,
        region,
        seat_number: seat_number.to_string(),
    })
}

fn selected_id(raw: Option<&str>) -> Option<u32> {
    match raw.map(str::trim) {
        None | Some("") | Some(UNSELECTED) => None,
        Some(value) => value.parse().ok(),
    }
}

fn is_valid_seat_number(seat: &str) -> bool {
    (MIN_SEAT_NUMBER_LEN..=MAX_SEAT_NUMBER_LEN).contains(&seat.len())
        && seat.bytes().all(|b| b.is_ascii_digit())
}

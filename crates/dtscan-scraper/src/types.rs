//! Response bodies of the booking API calls the page makes in the background.
//!
//! ## Observed shapes
//!
//! ### `GET {base}/location`
//! `{"driveTestCentres": [...]}`. `latitude`/`longitude` are **strings** in
//! live responses (`"43.7315"`) but numbers have also been seen, so both are
//! accepted. `licenceTestTypes` is sometimes omitted for centers that are not
//! taking bookings; such centers are skipped during selection. Many more
//! fields exist (address, services, timezone) and are ignored.
//!
//! ### `GET {base}/booking/{centerId}?month=M&year=Y`
//! `month` in the query is one-based. On success `statusCode` is `0` and
//! `availableBookingDates` lists every day of the month with a `description`
//! of `FULL`, `OPEN` or `UNAVAILABLE`. On a per-center error `statusCode` is
//! positive, `statusMessage` explains it and the list may be absent.
//!
//! ### `GET {base}/booking?date=...`
//! `availableBookingTimes` may be missing entirely when nothing is free; that
//! is treated as an empty list.

use serde::{Deserialize, Deserializer};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationListResponse {
    pub drive_test_centres: Vec<DriveTestCentre>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveTestCentre {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub is_closed: bool,
    #[serde(deserialize_with = "number_or_string")]
    pub latitude: f64,
    #[serde(deserialize_with = "number_or_string")]
    pub longitude: f64,
    pub licence_test_types: Option<Vec<String>>,
    #[serde(default)]
    pub location_hours: Vec<LocationHour>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationHour {
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDatesResponse {
    #[serde(default)]
    pub available_booking_dates: Vec<CalendarDay>,
    #[serde(default)]
    pub status_code: i64,
    pub status_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CalendarDay {
    pub day: u32,
    #[serde(rename = "description")]
    pub status: DayStatus,
}

/// Only `Open` days are ever read; any description the site adds later
/// lands in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum DayStatus {
    Full,
    Open,
    Unavailable,
    Other,
}

impl From<String> for DayStatus {
    fn from(description: String) -> Self {
        match description.as_str() {
            "FULL" => Self::Full,
            "OPEN" => Self::Open,
            "UNAVAILABLE" => Self::Unavailable,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingTimesResponse {
    #[serde(default)]
    pub available_booking_times: Vec<TimeSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimeSlot {
    #[serde(rename = "timeslot")]
    pub timestamp: String,
}

fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

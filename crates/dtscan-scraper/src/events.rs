use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

/// Identifies the center an event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CenterRef {
    pub id: i64,
    pub name: String,
}

/// Progress reported while scanning, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityEvent {
    /// A month's calendar for `center` has been loaded. `month` is zero-based.
    Searching { center: CenterRef, month: u32 },
    /// A bookable slot. `timestamp` is the RFC 3339 string the site sent.
    Found { center: CenterRef, timestamp: String },
    /// The site refused to show this center's calendar; scanning moved on.
    Failed {
        center: CenterRef,
        code: i64,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundSlot {
    pub center_name: String,
    pub timestamp: String,
}

impl FoundSlot {
    /// Parsed slot time, if the site sent a valid RFC 3339 timestamp.
    #[must_use]
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Slots found during one pass, grouped by UTC calendar date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    by_date: BTreeMap<NaiveDate, Vec<FoundSlot>>,
    unparsed: Vec<FoundSlot>,
}

impl RunSummary {
    /// Fold one event in; only `Found` events are kept.
    pub fn record(&mut self, event: &AvailabilityEvent) {
        if let AvailabilityEvent::Found { center, timestamp } = event {
            self.add(FoundSlot {
                center_name: center.name.clone(),
                timestamp: timestamp.clone(),
            });
        }
    }

    pub fn add(&mut self, slot: FoundSlot) {
        match slot_date(&slot.timestamp) {
            Some(date) => self.by_date.entry(date).or_default().push(slot),
            None => {
                tracing::warn!(timestamp = %slot.timestamp, "slot timestamp has no date");
                self.unparsed.push(slot);
            }
        }
    }

    #[must_use]
    pub fn by_date(&self) -> &BTreeMap<NaiveDate, Vec<FoundSlot>> {
        &self.by_date
    }

    /// Every slot, dated ones in date order followed by any without a date.
    pub fn slots(&self) -> impl Iterator<Item = &FoundSlot> {
        self.by_date.values().flatten().chain(self.unparsed.iter())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_date.values().map(Vec::len).sum::<usize>() + self.unparsed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn slot_date(timestamp: &str) -> Option<NaiveDate> {
    if let Ok(t) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(t.with_timezone(&Utc).date_naive());
    }
    timestamp
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

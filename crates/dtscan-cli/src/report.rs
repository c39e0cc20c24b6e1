//! Human-readable rendering of scan progress and results.

use chrono::{DateTime, Month};
use dtscan_scraper::{AvailabilityEvent, Center, FoundSlot, RunSummary};

/// English name of a zero-based month index.
pub(crate) fn month_name(month: u32) -> &'static str {
    u8::try_from(month + 1)
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .map_or("unknown month", |m| m.name())
}

/// `June 09, 2026 at 11:15 am`, in the offset the site sent.
pub(crate) fn format_slot_time(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp).map_or_else(
        |_| timestamp.to_string(),
        |t| t.format("%B %d, %Y at %I:%M %P").to_string(),
    )
}

pub(crate) fn log_event(event: &AvailabilityEvent) {
    match event {
        AvailabilityEvent::Searching { center, month } => {
            tracing::info!(
                center_id = center.id,
                "Searching {} at location {}",
                month_name(*month),
                center.name
            );
        }
        AvailabilityEvent::Found { center, timestamp } => {
            tracing::info!(
                center_id = center.id,
                "Found new time for location {}, {}",
                center.name,
                format_slot_time(timestamp)
            );
        }
        AvailabilityEvent::Failed {
            center,
            code,
            message,
        } => {
            tracing::error!(
                center_id = center.id,
                "Couldn't search {} due to error {code}:{message}",
                center.name
            );
        }
    }
}

pub(crate) fn describe_centers(centers: &[Center]) -> String {
    centers
        .iter()
        .map(|c| format!("{} ({:.2} km)", c.name, c.distance_km))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn slot_line(slot: &FoundSlot) -> String {
    format!("\u{2022} {}, {}", slot.center_name, format_slot_time(&slot.timestamp))
}

pub(crate) fn print_summary(summary: &RunSummary) {
    println!("Found {} available time slots:", summary.len());
    for slot in summary.slots() {
        println!("{}", slot_line(slot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_names_are_zero_based() {
        assert_eq!(month_name(0), "January");
        assert_eq!(month_name(5), "June");
        assert_eq!(month_name(11), "December");
        assert_eq!(month_name(12), "unknown month");
    }

    #[test]
    fn slot_time_uses_the_sent_offset() {
        assert_eq!(
            format_slot_time("2026-06-09T11:15:00-04:00"),
            "June 09, 2026 at 11:15 am"
        );
        assert_eq!(
            format_slot_time("2026-12-01T15:40:00-05:00"),
            "December 01, 2026 at 03:40 pm"
        );
    }

    #[test]
    fn unparseable_time_is_shown_verbatim() {
        assert_eq!(format_slot_time("soon"), "soon");
    }

    #[test]
    fn centers_list_with_distance() {
        let center = |name: &str, distance_km| Center {
            id: 1,
            name: name.to_string(),
            distance_km,
            is_closed: false,
            supported_classes: vec!["G2".into()],
            weekly_hours: Vec::new(),
        };
        let rendered = describe_centers(&[center("Downsview", 4.256), center("Etobicoke", 12.0)]);
        assert_eq!(rendered, "Downsview (4.26 km), Etobicoke (12.00 km)");
    }

    #[test]
    fn slot_line_has_bullet_and_time() {
        let slot = FoundSlot {
            center_name: "Downsview".into(),
            timestamp: "2026-06-09T11:15:00-04:00".into(),
        };
        assert_eq!(slot_line(&slot), "\u{2022} Downsview, June 09, 2026 at 11:15 am");
    }
}

//! Well-known background calls the booking page makes, and the URL rules
//! that recognise them.

use crate::browser::UrlPattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeId {
    EligibilityCheck,
    LocationList,
    BookingDatesForMonth,
    BookingTimesForDate,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 4] = [
        ExchangeId::EligibilityCheck,
        ExchangeId::LocationList,
        ExchangeId::BookingDatesForMonth,
        ExchangeId::BookingTimesForDate,
    ];

    #[must_use]
    pub fn index(self) -> usize {
        match self {
            ExchangeId::EligibilityCheck => 0,
            ExchangeId::LocationList => 1,
            ExchangeId::BookingDatesForMonth => 2,
            ExchangeId::BookingTimesForDate => 3,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeId::EligibilityCheck => "eligibility_check",
            ExchangeId::LocationList => "locations",
            ExchangeId::BookingDatesForMonth => "booking_dates",
            ExchangeId::BookingTimesForDate => "booking_times",
        }
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// URL rules for one booking API base, e.g. `https://drivetest.ca/booking/v1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRoutes {
    base: String,
}

impl ExchangeRoutes {
    #[must_use]
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    #[must_use]
    pub fn pattern(&self, id: ExchangeId) -> UrlPattern {
        match id {
            ExchangeId::EligibilityCheck => UrlPattern::Exact(format!("{}/eligibilityCheck", self.base)),
            ExchangeId::LocationList => UrlPattern::Exact(format!("{}/location", self.base)),
            ExchangeId::BookingDatesForMonth => UrlPattern::Prefix {
                prefix: format!("{}/booking/", self.base),
                excluding: None,
            },
            ExchangeId::BookingTimesForDate => UrlPattern::Prefix {
                prefix: format!("{}/booking", self.base),
                excluding: Some(format!("{}/booking/", self.base)),
            },
        }
    }

    /// The response to the login form submit.
    #[must_use]
    pub fn login_pattern(&self) -> UrlPattern {
        UrlPattern::Exact(format!("{}/driver/email", self.base))
    }

    /// Map a request URL to at most one id. Dates are tested before times
    /// because the times prefix is a prefix of the dates one.
    #[must_use]
    pub fn classify(&self, url: &str) -> Option<ExchangeId> {
        [
            ExchangeId::EligibilityCheck,
            ExchangeId::BookingDatesForMonth,
            ExchangeId::BookingTimesForDate,
            ExchangeId::LocationList,
        ]
        .into_iter()
        .find(|id| self.pattern(*id).matches(url))
    }
}

//! CSS selectors for the booking page.

pub const HEADER_BAR: &str = "#headerBar";
pub const REGISTRATION_PANEL: &str = "#booking-registration";

pub const EMAIL: &str = "#emailAddress";
pub const CONFIRM_EMAIL: &str = "#confirmEmailAddress";
pub const LICENSE_NUMBER: &str = "#licenceNumber";
pub const LICENSE_EXPIRY: &str = "#licenceExpiryDate";
pub const SUBMIT: &str = "#regSubmitBtn";

pub const LICENSE_CONTINUE: &str =
    "#booking-licence > div > form > div > div.directive_wrapper.ng-isolate-scope > button";
pub const EDIT_BOOKING: &str = "#booking-licence > div > form > div > a";
pub const RESCHEDULE_BOOKING: &str = ".appointment_wrapper > div > div > div.appointment_summary_cols.col-xs-12.col-sm-10 > div > span:nth-child(12) > button";
pub const MODAL_RESCHEDULE: &str = ".form-group > button.btn.btn-primary";

pub const LOCATION_CONTINUE: &str = "#booking-location > div > div > form > div.form-group.loc-submit > div.directive_wrapper.ng-isolate-scope > button";
pub const NEXT_MONTH: &str = "#driver-info > div.ng-scope > div.calendar.ng-scope > div.calendar-header > a.calendar-month-control.ion-chevron-right";
pub const CALENDAR_CONTINUE: &str = "#calendarSubmit > button";

#[must_use]
pub fn license_button(class_code: &str) -> String {
    format!("#lic_{class_code}")
}

#[must_use]
pub fn location_link(center_id: i64) -> String {
    format!("a[id=\"{center_id}\"]")
}

#[must_use]
pub fn calendar_day(day: u32) -> String {
    format!("a[title=\"{day}\"]")
}

/// Script returning the trimmed `innerText` of `selector`, or `null`.
#[must_use]
pub fn inner_text_script(selector: &str) -> String {
    let quoted = serde_json::Value::String(selector.to_string());
    format!("(() => {{ const el = document.querySelector({quoted}); return el ? el.innerText.trim() : null; }})()")
}

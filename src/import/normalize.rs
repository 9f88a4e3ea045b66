use chrono::NaiveDate;
use serde_json::json;

use super::mapping::{column_value, FieldMapping};
use super::{DescriptionMode, GroupMode, ImportOptions};
use crate::notify::{Diagnostic, MessageKey};

pub const DESCRIPTION_FORMAT_HTML: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSelector {
    /// Session applies to the whole activity.
    Common,
    /// One occurrence per named group; names resolve against the course.
    Groups(Vec<String>),
    /// Typed schema variant: a free-text token stored on the session,
    /// never resolved.
    SessionType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn seconds_from_midnight(&self) -> i64 {
        i64::from(self.hour) * 3600 + i64::from(self.minute) * 60
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub text: String,
    pub format: i64,
    pub item_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatRule {
    pub enabled: bool,
    pub interval_days: i64,
    /// Missing or unparsable cutoff stays None; expansion treats that as a
    /// degenerate rule when the flag is on.
    pub until: Option<NaiveDate>,
}

/// One normalized input row, not yet expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub course: String,
    pub selector: GroupSelector,
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub description: Description,
    pub repeat: RepeatRule,
    pub students_can_mark: bool,
    pub password: String,
    pub random_password: bool,
    pub subnet: String,
    pub use_default_subnet: bool,
    /// 1-based data row number, carried for diagnostics.
    pub row: usize,
}

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y"];

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Colon-delimited hour and minute. Trailing parts (seconds) are ignored.
pub fn parse_time(value: &str) -> Option<TimeOfDay> {
    let mut parts = value.trim().split(':');
    let hour: u32 = parts.next()?.trim().parse().ok()?;
    let minute: u32 = parts.next()?.trim().parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(TimeOfDay { hour, minute })
}

pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "true" | "on"
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn bad_field(key: MessageKey, row: usize, field: &str, value: &str) -> Diagnostic {
    Diagnostic::problem(
        key,
        json!({ "row": row, "field": field, "value": value }),
    )
}

/// Turn one raw row into a typed request. Malformed date or time fields
/// reject the row with a problem diagnostic instead of flowing on as
/// garbage; the caller decides whether that skips the row or fails the run.
pub fn normalize_row(
    cells: &[String],
    mapping: &FieldMapping,
    options: &ImportOptions,
    row: usize,
) -> Result<SessionRequest, Diagnostic> {
    let course = column_value(cells, mapping.course).trim().to_string();

    let date_cell = column_value(cells, mapping.session_date);
    let date = parse_date(date_cell)
        .ok_or_else(|| bad_field(MessageKey::BadSessionDate, row, "sessiondate", date_cell))?;

    let from_cell = column_value(cells, mapping.from);
    let start = parse_time(from_cell)
        .ok_or_else(|| bad_field(MessageKey::BadSessionTime, row, "from", from_cell))?;
    let to_cell = column_value(cells, mapping.to);
    let end = parse_time(to_cell)
        .ok_or_else(|| bad_field(MessageKey::BadSessionTime, row, "to", to_cell))?;

    let group_cell = column_value(cells, mapping.groups);
    let selector = match options.group_mode {
        GroupMode::Groups => {
            let names: Vec<String> = group_cell
                .split(';')
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect();
            if names.is_empty() {
                GroupSelector::Common
            } else {
                GroupSelector::Groups(names)
            }
        }
        GroupMode::SessionType => GroupSelector::SessionType(group_cell.trim().to_string()),
    };

    let raw_description = column_value(cells, mapping.description);
    let text = match options.description_mode {
        DescriptionMode::Escaped => format!("<p>{}</p>", escape_html(raw_description)),
        DescriptionMode::Raw => raw_description.to_string(),
    };
    let description = Description {
        text,
        format: DESCRIPTION_FORMAT_HTML,
        item_id: 0,
    };

    let repeat = RepeatRule {
        enabled: parse_flag(column_value(cells, mapping.repeat_on)),
        interval_days: column_value(cells, mapping.repeat_every)
            .trim()
            .parse()
            .unwrap_or(0),
        until: parse_date(column_value(cells, mapping.repeat_until)),
    };

    let subnet = column_value(cells, mapping.subnet).trim().to_string();
    let use_default_subnet = subnet.is_empty();

    Ok(SessionRequest {
        course,
        selector,
        date,
        start,
        end,
        description,
        repeat,
        students_can_mark: parse_flag(column_value(cells, mapping.students_can_mark)),
        password: column_value(cells, mapping.password).trim().to_string(),
        random_password: parse_flag(column_value(cells, mapping.random_password)),
        subnet,
        use_default_subnet,
        row,
    })
}

use chrono::{Duration, NaiveDate, NaiveTime};

use super::normalize::{GroupSelector, RepeatRule, SessionRequest};
use crate::store::{Activity, NewSession};

/// The concrete calendar dates one request covers. Rule off: exactly the
/// session date. Rule on: session date stepped by the interval, up to and
/// including the cutoff. Degenerate rules (interval <= 0, missing cutoff,
/// cutoff before the start) produce no dates; the caller reports that
/// instead of erroring.
pub fn repeat_dates(date: NaiveDate, rule: &RepeatRule) -> Vec<NaiveDate> {
    if !rule.enabled {
        return vec![date];
    }
    let Some(until) = rule.until else {
        return Vec::new();
    };
    if rule.interval_days <= 0 || until < date {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut current = date;
    while current <= until {
        out.push(current);
        current += Duration::days(rule.interval_days);
    }
    out
}

/// Materialize one request against one activity. Grouped requests produce
/// one occurrence per resolved group per date; common and typed requests
/// one per date. An empty `group_ids` for a grouped request therefore
/// expands to nothing.
pub fn expand(
    req: &SessionRequest,
    activity: &Activity,
    dates: &[NaiveDate],
    group_ids: &[String],
) -> Vec<NewSession> {
    let subnet = if req.use_default_subnet {
        activity.subnet.clone()
    } else {
        req.subnet.clone()
    };
    let session_type = match &req.selector {
        GroupSelector::SessionType(token) => token.clone(),
        _ => String::new(),
    };
    let duration = req.end.seconds_from_midnight() - req.start.seconds_from_midnight();

    let targets: Vec<Option<String>> = match &req.selector {
        GroupSelector::Groups(_) => group_ids.iter().cloned().map(Some).collect(),
        GroupSelector::Common | GroupSelector::SessionType(_) => vec![None],
    };

    let mut out = Vec::with_capacity(dates.len() * targets.len());
    for date in dates {
        // Session start is date + start time, composed as UTC.
        let day_start = date.and_time(NaiveTime::MIN).and_utc().timestamp();
        let sess_start = day_start + req.start.seconds_from_midnight();
        for group_id in &targets {
            out.push(NewSession {
                activity_id: activity.id.clone(),
                group_id: group_id.clone(),
                sess_start,
                duration,
                description: req.description.text.clone(),
                description_format: req.description.format,
                description_item_id: req.description.item_id,
                session_type: session_type.clone(),
                students_can_mark: req.students_can_mark,
                password: req.password.clone(),
                random_password: req.random_password,
                subnet: subnet.clone(),
                status_set: 0,
            });
        }
    }
    out
}

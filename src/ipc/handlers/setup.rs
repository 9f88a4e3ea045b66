use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(err(
            &req.id,
            "bad_params",
            format!("missing {}", key),
            None,
        )),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let shortname = match required_str(req, "shortname") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let fullname = req
        .params
        .get("fullname")
        .and_then(|v| v.as_str())
        .unwrap_or(&shortname)
        .trim()
        .to_string();

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, shortname, fullname) VALUES(?, ?, ?)",
        (&course_id, &shortname, &fullname),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "courseId": course_id, "shortname": shortname }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    // Activity counts let a caller spot courses an import would skip.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.shortname,
           c.fullname,
           (SELECT COUNT(*) FROM activities a WHERE a.course_id = c.id) AS activity_count
         FROM courses c
         ORDER BY c.shortname",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let shortname: String = row.get(1)?;
            let fullname: String = row.get(2)?;
            let activity_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "shortname": shortname,
                "fullname": fullname,
                "activityCount": activity_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn course_exists(conn: &rusqlite::Connection, course_id: &str) -> Result<bool, rusqlite::Error> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn handle_activities_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subnet = req
        .params
        .get("subnet")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let activity_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO activities(id, course_id, name, subnet) VALUES(?, ?, ?, ?)",
        (&activity_id, &course_id, &name, &subnet),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "activities" })),
        );
    }

    ok(&req.id, json!({ "activityId": activity_id, "name": name }))
}

fn handle_groups_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let group_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO groups(id, course_id, name) VALUES(?, ?, ?)",
        (&group_id, &course_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }

    ok(&req.id, json!({ "groupId": group_id, "name": name }))
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let activity_id = match required_str(req, "activityId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, group_id, sess_start, duration, description, session_type,
                students_can_mark, password, random_password, subnet, status_set
         FROM sessions WHERE activity_id = ? ORDER BY sess_start",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&activity_id], |row| {
            let id: String = row.get(0)?;
            let group_id: Option<String> = row.get(1)?;
            let sess_start: i64 = row.get(2)?;
            let duration: i64 = row.get(3)?;
            let description: String = row.get(4)?;
            let session_type: String = row.get(5)?;
            let students_can_mark: i64 = row.get(6)?;
            let password: String = row.get(7)?;
            let random_password: i64 = row.get(8)?;
            let subnet: String = row.get(9)?;
            let status_set: i64 = row.get(10)?;
            Ok(json!({
                "id": id,
                "groupId": group_id,
                "sessStart": sess_start,
                "duration": duration,
                "description": description,
                "sessionType": session_type,
                "studentsCanMark": students_can_mark != 0,
                "password": password,
                "randomPassword": random_password != 0,
                "subnet": subnet,
                "statusSet": status_set
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(sessions) => ok(&req.id, json!({ "sessions": sessions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "activities.create" => Some(handle_activities_create(state, req)),
        "groups.create" => Some(handle_groups_create(state, req)),
        "sessions.list" => Some(handle_sessions_list(state, req)),
        _ => None,
    }
}

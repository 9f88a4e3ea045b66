use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Course {
    pub id: String,
    pub shortname: String,
    pub fullname: String,
}

#[derive(Debug, Clone)]
pub struct Activity {
    pub id: String,
    pub course_id: String,
    pub name: String,
    /// Activity-level default subnet restriction, applied when a row leaves
    /// its subnet cell empty.
    pub subnet: String,
}

/// One concrete session occurrence, ready to persist. `sess_start` is unix
/// seconds at the session start (date + start time, composed as UTC).
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub activity_id: String,
    pub group_id: Option<String>,
    pub sess_start: i64,
    pub duration: i64,
    pub description: String,
    pub description_format: i64,
    pub description_item_id: i64,
    pub session_type: String,
    pub students_can_mark: bool,
    pub password: String,
    pub random_password: bool,
    pub subnet: String,
    pub status_set: i64,
}

/// Store seam for the import pipeline. Handlers talk to the Connection
/// directly; the importer only ever sees this trait.
pub trait SessionStore {
    fn course_by_shortname(&self, shortname: &str) -> anyhow::Result<Option<Course>>;

    /// Activities hosted by a course, in ascending-id order.
    fn activities_for_course(&self, course_id: &str) -> anyhow::Result<Vec<Activity>>;

    fn group_by_name(&self, course_id: &str, name: &str) -> anyhow::Result<Option<String>>;

    /// Equality on the persisted-relevant fields only. Description text,
    /// description item id and time_modified never participate.
    fn session_exists(&self, probe: &NewSession) -> anyhow::Result<bool>;

    fn add_sessions(&mut self, sessions: &[NewSession]) -> anyhow::Result<usize>;
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteStore { conn }
    }
}

impl SessionStore for SqliteStore<'_> {
    fn course_by_shortname(&self, shortname: &str) -> anyhow::Result<Option<Course>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, shortname, fullname FROM courses WHERE shortname = ?",
                [shortname],
                |r| {
                    Ok(Course {
                        id: r.get(0)?,
                        shortname: r.get(1)?,
                        fullname: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn activities_for_course(&self, course_id: &str) -> anyhow::Result<Vec<Activity>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, course_id, name, subnet FROM activities WHERE course_id = ? ORDER BY id",
        )?;
        let rows = stmt
            .query_map([course_id], |r| {
                Ok(Activity {
                    id: r.get(0)?,
                    course_id: r.get(1)?,
                    name: r.get(2)?,
                    subnet: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn group_by_name(&self, course_id: &str, name: &str) -> anyhow::Result<Option<String>> {
        let row = self
            .conn
            .query_row(
                "SELECT id FROM groups WHERE course_id = ? AND name = ?",
                [course_id, name],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(row)
    }

    fn session_exists(&self, probe: &NewSession) -> anyhow::Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sessions
                 WHERE activity_id = ?1
                   AND group_id IS ?2
                   AND sess_start = ?3
                   AND duration = ?4
                   AND session_type = ?5
                   AND students_can_mark = ?6
                   AND password = ?7
                   AND random_password = ?8
                   AND subnet = ?9
                   AND status_set = ?10",
                (
                    &probe.activity_id,
                    probe.group_id.as_deref(),
                    probe.sess_start,
                    probe.duration,
                    &probe.session_type,
                    probe.students_can_mark as i64,
                    &probe.password,
                    probe.random_password as i64,
                    &probe.subnet,
                    probe.status_set,
                ),
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn add_sessions(&mut self, sessions: &[NewSession]) -> anyhow::Result<usize> {
        if sessions.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().timestamp();
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut ins = tx.prepare(
                "INSERT INTO sessions(
                   id, activity_id, group_id, sess_start, duration,
                   description, description_format, description_item_id,
                   session_type, students_can_mark, password, random_password,
                   subnet, status_set, time_modified
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for s in sessions {
                let id = Uuid::new_v4().to_string();
                ins.execute((
                    &id,
                    &s.activity_id,
                    s.group_id.as_deref(),
                    s.sess_start,
                    s.duration,
                    &s.description,
                    s.description_format,
                    s.description_item_id,
                    &s.session_type,
                    s.students_can_mark as i64,
                    &s.password,
                    s.random_password as i64,
                    &s.subnet,
                    s.status_set,
                    now,
                ))?;
            }
        }
        tx.commit()?;
        Ok(sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn memory_store_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        conn.execute(
            "INSERT INTO courses(id, shortname, fullname) VALUES('c1', 'MATH101', 'Mathematics 101')",
            [],
        )
        .expect("seed course");
        conn.execute(
            "INSERT INTO activities(id, course_id, name, subnet) VALUES('a1', 'c1', 'Lecture attendance', '10.0.0.0/8')",
            [],
        )
        .expect("seed activity");
        conn.execute(
            "INSERT INTO groups(id, course_id, name) VALUES('g1', 'c1', 'Group A')",
            [],
        )
        .expect("seed group");
        conn
    }

    fn sample_session() -> NewSession {
        NewSession {
            activity_id: "a1".into(),
            group_id: None,
            sess_start: 1_704_103_200,
            duration: 3600,
            description: "<p>Week 1</p>".into(),
            description_format: 1,
            description_item_id: 0,
            session_type: String::new(),
            students_can_mark: true,
            password: String::new(),
            random_password: false,
            subnet: "10.0.0.0/8".into(),
            status_set: 0,
        }
    }

    #[test]
    fn course_and_group_lookups() {
        let conn = memory_store_conn();
        let store = SqliteStore::new(&conn);
        let course = store
            .course_by_shortname("MATH101")
            .expect("lookup")
            .expect("course exists");
        assert_eq!(course.id, "c1");
        assert!(store
            .course_by_shortname("NOPE101")
            .expect("lookup")
            .is_none());

        let acts = store.activities_for_course("c1").expect("activities");
        assert_eq!(acts.len(), 1);
        assert_eq!(acts[0].subnet, "10.0.0.0/8");

        assert_eq!(
            store.group_by_name("c1", "Group A").expect("group"),
            Some("g1".to_string())
        );
        assert_eq!(store.group_by_name("c1", "Group Z").expect("group"), None);
    }

    #[test]
    fn exists_probe_ignores_description() {
        let conn = memory_store_conn();
        let mut store = SqliteStore::new(&conn);
        let sess = sample_session();
        assert!(!store.session_exists(&sess).expect("probe"));
        store.add_sessions(&[sess.clone()]).expect("insert");
        assert!(store.session_exists(&sess).expect("probe"));

        // A different description is still the same session.
        let mut renamed = sess.clone();
        renamed.description = "<p>renamed</p>".into();
        assert!(store.session_exists(&renamed).expect("probe"));

        // A different start is not.
        let mut moved = sess;
        moved.sess_start += 86_400;
        assert!(!store.session_exists(&moved).expect("probe"));
    }

    #[test]
    fn exists_probe_distinguishes_groups() {
        let conn = memory_store_conn();
        let mut store = SqliteStore::new(&conn);
        let common = sample_session();
        let mut grouped = common.clone();
        grouped.group_id = Some("g1".into());

        store.add_sessions(&[grouped.clone()]).expect("insert");
        assert!(store.session_exists(&grouped).expect("probe"));
        assert!(!store.session_exists(&common).expect("probe"));
    }

    #[test]
    fn bulk_insert_counts() {
        let conn = memory_store_conn();
        let mut store = SqliteStore::new(&conn);
        let a = sample_session();
        let mut b = a.clone();
        b.sess_start += 7 * 86_400;
        assert_eq!(store.add_sessions(&[a, b]).expect("insert"), 2);
        let stored: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
            .expect("count");
        assert_eq!(stored, 2);
    }
}

pub mod expand;
pub mod mapping;
pub mod normalize;

use log::{debug, info};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;

use crate::notify::{Diagnostic, MessageKey, Notify};
use crate::progress::Progress;
use crate::reader::StagedImport;
use crate::store::SessionStore;
use self::mapping::MappingForm;
use self::normalize::{GroupSelector, SessionRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    /// Group column holds a semicolon-separated group-name list.
    Groups,
    /// Group column holds a free-text session-type token.
    SessionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionMode {
    /// HTML-escape the description cell and wrap it in a paragraph.
    Escaped,
    /// Store the cell verbatim.
    Raw,
}

/// The one configurable schema descriptor. Historically these were two
/// diverging copies of the whole pipeline; here they are options on one.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportOptions {
    pub group_mode: GroupMode,
    pub description_mode: DescriptionMode,
    /// Strict: any malformed row fails the whole import at construction.
    /// Lenient (default): malformed rows are skipped with a diagnostic.
    pub strict: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            group_mode: GroupMode::Groups,
            description_mode: DescriptionMode::Escaped,
            strict: false,
        }
    }
}

/// One import run: staged rows normalized up front, expanded and committed
/// by `import()`. Construction never panics and never returns Err; a bad
/// file leaves the importer unrunnable with `get_error()` set.
pub struct SessionImporter {
    import_id: String,
    error: String,
    found_headers: Vec<String>,
    requests: Vec<SessionRequest>,
    row_problems: Vec<Diagnostic>,
}

impl SessionImporter {
    pub fn stage(
        workspace: &Path,
        bytes: &[u8],
        encoding: &str,
        delimiter: &str,
        mapping: Option<&MappingForm>,
        options: ImportOptions,
        progress: &mut dyn Progress,
    ) -> SessionImporter {
        match StagedImport::stage(workspace, bytes, encoding, delimiter) {
            Ok(staged) => Self::from_staged(staged, mapping, options, progress),
            Err(e) => Self::failed(e.to_string()),
        }
    }

    /// Re-open a staged import by id, e.g. after a mapping-form round trip.
    pub fn open(
        workspace: &Path,
        import_id: &str,
        mapping: Option<&MappingForm>,
        options: ImportOptions,
        progress: &mut dyn Progress,
    ) -> SessionImporter {
        match StagedImport::open(workspace, import_id) {
            Ok(staged) => Self::from_staged(staged, mapping, options, progress),
            Err(e) => Self::failed(e.to_string()),
        }
    }

    fn failed(message: String) -> SessionImporter {
        SessionImporter {
            import_id: String::new(),
            error: message,
            found_headers: Vec::new(),
            requests: Vec::new(),
            row_problems: Vec::new(),
        }
    }

    fn from_staged(
        staged: StagedImport,
        mapping: Option<&MappingForm>,
        options: ImportOptions,
        progress: &mut dyn Progress,
    ) -> SessionImporter {
        let field_mapping = mapping::resolve_mapping(mapping);

        let mut requests: Vec<SessionRequest> = Vec::with_capacity(staged.rows.len());
        let mut row_problems: Vec<Diagnostic> = Vec::new();
        for (i, cells) in staged.rows.iter().enumerate() {
            progress.tick();
            match normalize::normalize_row(cells, &field_mapping, &options, i + 1) {
                Ok(req) => requests.push(req),
                Err(problem) => row_problems.push(problem),
            }
        }

        let mut error = String::new();
        if requests.is_empty() && row_problems.is_empty() {
            error = "no data rows in import file".to_string();
        } else if options.strict && !row_problems.is_empty() {
            error = format!("{} malformed row(s) in import file", row_problems.len());
        }

        debug!(
            "import {}: {} requests, {} rejected rows",
            staged.import_id,
            requests.len(),
            row_problems.len()
        );

        SessionImporter {
            import_id: staged.import_id,
            error,
            found_headers: staged.headers,
            requests,
            row_problems,
        }
    }

    pub fn list_required_headers() -> Vec<String> {
        mapping::required_headers()
    }

    pub fn list_found_headers(&self) -> &[String] {
        &self.found_headers
    }

    /// Empty when the importer is runnable.
    pub fn get_error(&self) -> &str {
        &self.error
    }

    pub fn import_id(&self) -> &str {
        &self.import_id
    }

    /// Run the pipeline: resolve references, expand occurrences, drop
    /// duplicates, bulk-insert the rest. Bad data never returns Err — it
    /// becomes diagnostics; only store failures propagate.
    pub fn import(
        &self,
        store: &mut dyn SessionStore,
        notify: &mut dyn Notify,
    ) -> anyhow::Result<usize> {
        if !self.error.is_empty() {
            anyhow::bail!("import is not runnable: {}", self.error);
        }

        for problem in &self.row_problems {
            notify.notify(problem.clone());
        }

        let mut ok_count = 0usize;
        for req in &self.requests {
            let Some(course) = store.course_by_shortname(&req.course)? else {
                notify.notify(Diagnostic::problem(
                    MessageKey::CourseNotFound,
                    json!({ "row": req.row, "course": req.course }),
                ));
                continue;
            };

            let activities = store.activities_for_course(&course.id)?;
            if activities.is_empty() {
                notify.notify(Diagnostic::problem(
                    MessageKey::CourseHasNoActivity,
                    json!({ "row": req.row, "course": req.course }),
                ));
                continue;
            }

            // Group names are unique per course. Unresolved names drop out
            // with a diagnostic; the rest of the request proceeds. A grouped
            // request that resolves nothing expands to nothing.
            let group_ids = match &req.selector {
                GroupSelector::Groups(names) => {
                    let mut ids = Vec::with_capacity(names.len());
                    for name in names {
                        match store.group_by_name(&course.id, name)? {
                            Some(id) => ids.push(id),
                            None => notify.notify(Diagnostic::problem(
                                MessageKey::UnknownGroup,
                                json!({ "row": req.row, "course": req.course, "group": name }),
                            )),
                        }
                    }
                    ids
                }
                _ => Vec::new(),
            };

            let dates = expand::repeat_dates(req.date, &req.repeat);
            if dates.is_empty() {
                notify.notify(Diagnostic::problem(
                    MessageKey::EmptyRepeatRange,
                    json!({ "row": req.row, "course": req.course }),
                ));
                continue;
            }

            // Every activity of the course receives the request
            // independently, in ascending-id order.
            for activity in &activities {
                let mut fresh = Vec::new();
                for occurrence in expand::expand(req, activity, &dates, &group_ids) {
                    if store.session_exists(&occurrence)? {
                        notify.notify(Diagnostic::message(
                            MessageKey::DuplicateSession,
                            json!({ "course": req.course, "activity": activity.name }),
                        ));
                    } else {
                        fresh.push(occurrence);
                    }
                }
                if !fresh.is_empty() {
                    ok_count += store.add_sessions(&fresh)?;
                }
            }
        }

        let summary = json!({ "count": ok_count });
        if ok_count > 0 {
            notify.notify(Diagnostic::success(MessageKey::SessionsGenerated, summary));
        } else {
            notify.notify(Diagnostic::message(MessageKey::SessionsGenerated, summary));
        }
        notify.completed(ok_count);
        info!("import {}: {} sessions added", self.import_id, ok_count);
        Ok(ok_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::notify::{NotifyQueue, Severity};
    use crate::progress::RowCounter;
    use crate::store::SqliteStore;
    use rusqlite::Connection;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn temp_workspace() -> PathBuf {
        let p = std::env::temp_dir().join(format!("attendanced-import-{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn seeded_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        conn.execute_batch(
            "INSERT INTO courses(id, shortname, fullname) VALUES('c1', 'MATH101', 'Mathematics 101');
             INSERT INTO courses(id, shortname, fullname) VALUES('c2', 'HIST205', 'History 205');
             INSERT INTO activities(id, course_id, name, subnet) VALUES('a1', 'c1', 'Lecture attendance', '');
             INSERT INTO groups(id, course_id, name) VALUES('g-a', 'c1', 'Group A');
             INSERT INTO groups(id, course_id, name) VALUES('g-b', 'c1', 'Group B');",
        )
        .expect("seed");
        conn
    }

    fn stage_csv(workspace: &PathBuf, content: &str, options: ImportOptions) -> SessionImporter {
        let mut progress = RowCounter::default();
        SessionImporter::stage(
            workspace,
            content.as_bytes(),
            "utf-8",
            "comma",
            None,
            options,
            &mut progress,
        )
    }

    const HEADER: &str = "Course,Groups,Session date,From,To,Description,Repeat on,Repeat every,Repeat until,Students can mark,Password,Random password,Subnet\n";

    fn run(
        importer: &SessionImporter,
        conn: &Connection,
    ) -> (anyhow::Result<usize>, NotifyQueue) {
        let mut store = SqliteStore::new(conn);
        let mut queue = NotifyQueue::new();
        let res = importer.import(&mut store, &mut queue);
        (res, queue)
    }

    fn session_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
            .expect("count")
    }

    #[test]
    fn unknown_course_skips_row_without_stopping_the_batch() {
        let ws = temp_workspace();
        let conn = seeded_conn();
        let csv = format!(
            "{}NOPE999,,2024-01-01,09:00,10:00,,,,,,,,\nMATH101,,2024-01-02,09:00,10:00,,,,,,,,\n",
            HEADER
        );
        let importer = stage_csv(&ws, &csv, ImportOptions::default());
        assert_eq!(importer.get_error(), "");

        let (res, queue) = run(&importer, &conn);
        assert_eq!(res.expect("import"), 1);
        assert_eq!(queue.count_of(MessageKey::CourseNotFound), 1);
        assert_eq!(queue.completed_count, Some(1));
        assert_eq!(session_count(&conn), 1);

        let summary = queue
            .diagnostics
            .iter()
            .find(|d| d.key == MessageKey::SessionsGenerated)
            .expect("summary");
        assert_eq!(summary.severity, Severity::Success);
        assert_eq!(summary.params["count"], 1);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn course_without_activities_is_reported_and_skipped() {
        let ws = temp_workspace();
        let conn = seeded_conn();
        let csv = format!("{}HIST205,,2024-01-01,09:00,10:00,,,,,,,,\n", HEADER);
        let importer = stage_csv(&ws, &csv, ImportOptions::default());
        let (res, queue) = run(&importer, &conn);
        assert_eq!(res.expect("import"), 0);
        assert_eq!(queue.count_of(MessageKey::CourseHasNoActivity), 1);
        // Zero generated: the summary is a plain message, not a success.
        let summary = queue
            .diagnostics
            .iter()
            .find(|d| d.key == MessageKey::SessionsGenerated)
            .expect("summary");
        assert_eq!(summary.severity, Severity::Message);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn unknown_group_is_dropped_but_resolved_groups_expand() {
        let ws = temp_workspace();
        let conn = seeded_conn();
        let csv = format!(
            "{}MATH101,Group A;NoSuchGroup,2024-01-01,09:00,10:00,,,,,,,,\n",
            HEADER
        );
        let importer = stage_csv(&ws, &csv, ImportOptions::default());
        let (res, queue) = run(&importer, &conn);
        assert_eq!(res.expect("import"), 1);
        assert_eq!(queue.count_of(MessageKey::UnknownGroup), 1);
        let unknown = queue
            .diagnostics
            .iter()
            .find(|d| d.key == MessageKey::UnknownGroup)
            .expect("diagnostic");
        assert_eq!(unknown.params["group"], "NoSuchGroup");
        let group_id: Option<String> = conn
            .query_row("SELECT group_id FROM sessions", [], |r| r.get(0))
            .expect("group id");
        assert_eq!(group_id.as_deref(), Some("g-a"));
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn grouped_request_with_nothing_resolved_generates_nothing() {
        let ws = temp_workspace();
        let conn = seeded_conn();
        let csv = format!("{}MATH101,Ghost,2024-01-01,09:00,10:00,,,,,,,,\n", HEADER);
        let importer = stage_csv(&ws, &csv, ImportOptions::default());
        let (res, queue) = run(&importer, &conn);
        assert_eq!(res.expect("import"), 0);
        assert_eq!(queue.count_of(MessageKey::UnknownGroup), 1);
        assert_eq!(session_count(&conn), 0);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn repeat_rule_expands_across_all_activities() {
        let ws = temp_workspace();
        let conn = seeded_conn();
        conn.execute(
            "INSERT INTO activities(id, course_id, name, subnet) VALUES('a2', 'c1', 'Lab attendance', '')",
            [],
        )
        .expect("second activity");
        let csv = format!(
            "{}MATH101,,2024-01-01,09:00,10:00,,1,7,2024-01-22,,,,\n",
            HEADER
        );
        let importer = stage_csv(&ws, &csv, ImportOptions::default());
        let (res, _) = run(&importer, &conn);
        // 4 dates x 2 activities.
        assert_eq!(res.expect("import"), 8);
        assert_eq!(session_count(&conn), 8);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn degenerate_repeat_rule_fails_soft() {
        let ws = temp_workspace();
        let conn = seeded_conn();
        let csv = format!(
            "{}MATH101,,2024-01-01,09:00,10:00,,1,7,2023-12-01,,,,\n",
            HEADER
        );
        let importer = stage_csv(&ws, &csv, ImportOptions::default());
        let (res, queue) = run(&importer, &conn);
        assert_eq!(res.expect("import"), 0);
        assert_eq!(queue.count_of(MessageKey::EmptyRepeatRange), 1);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn second_run_detects_the_duplicate() {
        let ws = temp_workspace();
        let conn = seeded_conn();
        let csv = format!("{}MATH101,,2024-01-01,09:00,10:00,Week 1,,,,,,,\n", HEADER);

        let first = stage_csv(&ws, &csv, ImportOptions::default());
        let (res, queue) = run(&first, &conn);
        assert_eq!(res.expect("first import"), 1);
        assert_eq!(queue.count_of(MessageKey::DuplicateSession), 0);

        let second = stage_csv(&ws, &csv, ImportOptions::default());
        let (res, queue) = run(&second, &conn);
        assert_eq!(res.expect("second import"), 0);
        assert_eq!(queue.count_of(MessageKey::DuplicateSession), 1);
        let dup = queue
            .diagnostics
            .iter()
            .find(|d| d.key == MessageKey::DuplicateSession)
            .expect("diagnostic");
        assert_eq!(dup.params["course"], "MATH101");
        assert_eq!(dup.params["activity"], "Lecture attendance");
        assert_eq!(session_count(&conn), 1);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn lenient_mode_skips_malformed_rows_and_reports_them() {
        let ws = temp_workspace();
        let conn = seeded_conn();
        let csv = format!(
            "{}MATH101,,2024-01-01,0900,10:00,,,,,,,,\nMATH101,,2024-01-02,09:00,10:00,,,,,,,,\n",
            HEADER
        );
        let importer = stage_csv(&ws, &csv, ImportOptions::default());
        assert_eq!(importer.get_error(), "");
        let (res, queue) = run(&importer, &conn);
        assert_eq!(res.expect("import"), 1);
        assert_eq!(queue.count_of(MessageKey::BadSessionTime), 1);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn strict_mode_fails_construction_on_malformed_rows() {
        let ws = temp_workspace();
        let conn = seeded_conn();
        let csv = format!("{}MATH101,,2024-01-01,0900,10:00,,,,,,,,\n", HEADER);
        let options = ImportOptions {
            strict: true,
            ..ImportOptions::default()
        };
        let importer = stage_csv(&ws, &csv, options);
        assert!(!importer.get_error().is_empty());
        let (res, queue) = run(&importer, &conn);
        assert!(res.is_err());
        assert!(queue.diagnostics.is_empty());
        assert_eq!(session_count(&conn), 0);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn unparsable_content_sets_the_error_string() {
        let ws = temp_workspace();
        let importer = stage_csv(&ws, "", ImportOptions::default());
        assert!(!importer.get_error().is_empty());

        let header_only = stage_csv(&ws, HEADER, ImportOptions::default());
        assert!(!header_only.get_error().is_empty());
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn staged_import_reopens_by_id() {
        let ws = temp_workspace();
        let conn = seeded_conn();
        let csv = format!("{}MATH101,,2024-01-01,09:00,10:00,,,,,,,,\n", HEADER);
        let staged = stage_csv(&ws, &csv, ImportOptions::default());
        let import_id = staged.import_id().to_string();
        assert!(!import_id.is_empty());
        assert_eq!(staged.list_found_headers().len(), 13);

        let mut progress = RowCounter::default();
        let reopened = SessionImporter::open(
            &ws,
            &import_id,
            None,
            ImportOptions::default(),
            &mut progress,
        );
        assert_eq!(reopened.get_error(), "");
        assert_eq!(progress.rows, 1);
        let (res, _) = run(&reopened, &conn);
        assert_eq!(res.expect("import"), 1);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn progress_ticks_once_per_input_row() {
        let ws = temp_workspace();
        let csv = format!(
            "{}MATH101,,2024-01-01,09:00,10:00,,,,,,,,\nNOPE,,bad-date,09:00,10:00,,,,,,,,\n",
            HEADER
        );
        let mut progress = RowCounter::default();
        let _ = SessionImporter::stage(
            &ws,
            csv.as_bytes(),
            "utf-8",
            "comma",
            None,
            ImportOptions::default(),
            &mut progress,
        );
        // Malformed rows still tick: the signal tracks input consumption.
        assert_eq!(progress.rows, 2);
        let _ = std::fs::remove_dir_all(ws);
    }
}

use crate::import::mapping::MappingForm;
use crate::import::{ImportOptions, SessionImporter};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::notify::{queue_to_json, NotifyQueue};
use crate::progress::RowCounter;
use crate::reader::StagedImport;
use crate::store::SqliteStore;
use serde_json::json;

fn handle_required_headers(req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({ "headers": SessionImporter::list_required_headers() }),
    )
}

fn parse_options(req: &Request) -> Result<ImportOptions, serde_json::Value> {
    match req.params.get("options") {
        Some(v) if !v.is_null() => serde_json::from_value(v.clone()).map_err(|e| {
            err(
                &req.id,
                "bad_params",
                format!("bad options: {}", e),
                None,
            )
        }),
        _ => Ok(ImportOptions::default()),
    }
}

fn parse_mapping(req: &Request) -> Result<Option<MappingForm>, serde_json::Value> {
    match req.params.get("mapping") {
        Some(v) if !v.is_null() => serde_json::from_value(v.clone()).map(Some).map_err(|e| {
            err(
                &req.id,
                "bad_params",
                format!("bad mapping: {}", e),
                None,
            )
        }),
        _ => Ok(None),
    }
}

fn handle_import_stage(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(content) = req.params.get("content").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing content", None);
    };
    let encoding = req
        .params
        .get("encoding")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let delimiter = req
        .params
        .get("delimiter")
        .and_then(|v| v.as_str())
        .unwrap_or("comma");

    match StagedImport::stage(workspace, content.as_bytes(), encoding, delimiter) {
        Ok(staged) => ok(
            &req.id,
            json!({
                "importId": staged.import_id,
                "foundHeaders": staged.headers,
                "rowCount": staged.rows.len()
            }),
        ),
        Err(e) => err(&req.id, "invalid_import_file", e.to_string(), None),
    }
}

fn handle_import_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let options = match parse_options(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mapping = match parse_mapping(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let encoding = req
        .params
        .get("encoding")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let delimiter = req
        .params
        .get("delimiter")
        .and_then(|v| v.as_str())
        .unwrap_or("comma");

    let mut progress = RowCounter::default();
    let importer = if let Some(import_id) = req.params.get("importId").and_then(|v| v.as_str()) {
        SessionImporter::open(workspace, import_id, mapping.as_ref(), options, &mut progress)
    } else if let Some(content) = req.params.get("content").and_then(|v| v.as_str()) {
        SessionImporter::stage(
            workspace,
            content.as_bytes(),
            encoding,
            delimiter,
            mapping.as_ref(),
            options,
            &mut progress,
        )
    } else {
        return err(&req.id, "bad_params", "missing importId or content", None);
    };

    if !importer.get_error().is_empty() {
        return err(
            &req.id,
            "invalid_import_file",
            importer.get_error(),
            Some(json!({ "importId": importer.import_id() })),
        );
    }

    let mut store = SqliteStore::new(conn);
    let mut queue = NotifyQueue::new();
    match importer.import(&mut store, &mut queue) {
        Ok(count) => ok(
            &req.id,
            json!({
                "importId": importer.import_id(),
                "sessionsAdded": count,
                "rowsProcessed": progress.rows,
                "foundHeaders": importer.list_found_headers(),
                "diagnostics": queue_to_json(&queue)
            }),
        ),
        Err(e) => err(&req.id, "import_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.requiredHeaders" => Some(handle_required_headers(req)),
        "import.stage" => Some(handle_import_stage(state, req)),
        "import.run" => Some(handle_import_run(state, req)),
        _ => None,
    }
}

use anyhow::Context;
use encoding_rs::{Encoding, UTF_8};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A staged tabular import: decoded, split into header + data rows, and
/// persisted under the workspace so a mapping form round-trip can re-open it
/// by id without re-uploading.
#[derive(Debug, Serialize, Deserialize)]
pub struct StagedImport {
    pub import_id: String,
    pub delimiter: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn imports_dir(workspace: &Path) -> PathBuf {
    workspace.join("imports")
}

fn staged_path(workspace: &Path, import_id: &str) -> PathBuf {
    imports_dir(workspace).join(format!("{}.json", import_id))
}

fn delimiter_byte(name: &str) -> Option<u8> {
    match name {
        "comma" | "," | "" => Some(b','),
        "semicolon" | ";" => Some(b';'),
        "colon" | ":" => Some(b':'),
        "tab" | "\t" => Some(b'\t'),
        _ => None,
    }
}

fn decode(bytes: &[u8], encoding: &str) -> anyhow::Result<String> {
    let enc = if encoding.is_empty() {
        UTF_8
    } else {
        Encoding::for_label(encoding.as_bytes())
            .ok_or_else(|| anyhow::anyhow!("unknown encoding: {}", encoding))?
    };
    let (text, _, had_errors) = enc.decode(bytes);
    if had_errors {
        anyhow::bail!("content is not valid {}", enc.name());
    }
    Ok(text.into_owned())
}

impl StagedImport {
    /// Parse raw bytes and persist them under a fresh import id.
    pub fn stage(
        workspace: &Path,
        bytes: &[u8],
        encoding: &str,
        delimiter: &str,
    ) -> anyhow::Result<StagedImport> {
        let delim = delimiter_byte(delimiter)
            .ok_or_else(|| anyhow::anyhow!("unknown delimiter: {}", delimiter))?;
        let text = decode(bytes, encoding)?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delim)
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut records: Vec<Vec<String>> = Vec::new();
        for record in reader.records() {
            let record = record.context("malformed tabular content")?;
            let cells: Vec<String> = record.iter().map(|c| c.trim().to_string()).collect();
            // Fully-empty lines carry no row.
            if cells.iter().all(|c| c.is_empty()) {
                continue;
            }
            records.push(cells);
        }

        if records.is_empty() {
            anyhow::bail!("no header row in tabular content");
        }
        let headers = records.remove(0);

        let staged = StagedImport {
            import_id: Uuid::new_v4().to_string(),
            delimiter: delimiter.to_string(),
            headers,
            rows: records,
        };
        staged.save(workspace)?;
        Ok(staged)
    }

    /// Re-open a previously staged import by id.
    pub fn open(workspace: &Path, import_id: &str) -> anyhow::Result<StagedImport> {
        let path = staged_path(workspace, import_id);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("no staged import: {}", import_id))?;
        let staged: StagedImport =
            serde_json::from_slice(&bytes).context("corrupt staged import")?;
        Ok(staged)
    }

    fn save(&self, workspace: &Path) -> anyhow::Result<()> {
        let dir = imports_dir(workspace);
        std::fs::create_dir_all(&dir)?;
        let path = staged_path(workspace, &self.import_id);
        let bytes = serde_json::to_vec(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

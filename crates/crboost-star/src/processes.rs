use crate::document::StarDocument;
use crate::error::StarError;

const PROCESSES_BLOCK: &str = "pipeline_processes";
const NAME_COLUMN: &str = "_rlnPipeLineProcessName";
const STATUS_COLUMN: &str = "_rlnPipeLineProcessStatusLabel";

/// Status labels the pipeliner writes into its processes file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl ProcessStatus {
    pub fn from_label(label: &str) -> Result<Self, StarError> {
        match label {
            "Scheduled" => Ok(Self::Scheduled),
            "Running" => Ok(Self::Running),
            "Succeeded" => Ok(Self::Succeeded),
            "Failed" => Ok(Self::Failed),
            "Aborted" => Ok(Self::Aborted),
            _ => Err(StarError::UnknownStatusLabel {
                label: label.to_string(),
            }),
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Aborted => "Aborted",
        }
    }
}

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub name: String,
    pub status: ProcessStatus,
}

/// The pipeliner's process table (`default_pipeline.star`), the only
/// observable channel for live job status.
///
/// The pipeliner owns this file; we read it with retry-on-next-tick
/// semantics and rewrite a row only during an abort.
#[derive(Debug, Clone)]
pub struct ProcessTable {
    doc: StarDocument,
    name_col: usize,
    status_col: usize,
}

impl ProcessTable {
    pub fn parse(input: &str) -> Result<Self, StarError> {
        let doc = StarDocument::parse(input)?;
        let block = doc.require(PROCESSES_BLOCK)?;
        let table = block.table().ok_or_else(|| StarError::MissingColumn {
            block: PROCESSES_BLOCK.to_string(),
            column: NAME_COLUMN.to_string(),
        })?;
        let name_col = table
            .column_index(NAME_COLUMN)
            .ok_or_else(|| StarError::MissingColumn {
                block: PROCESSES_BLOCK.to_string(),
                column: NAME_COLUMN.to_string(),
            })?;
        let status_col =
            table
                .column_index(STATUS_COLUMN)
                .ok_or_else(|| StarError::MissingColumn {
                    block: PROCESSES_BLOCK.to_string(),
                    column: STATUS_COLUMN.to_string(),
                })?;
        Ok(Self {
            doc,
            name_col,
            status_col,
        })
    }

    /// All rows with a recognized status label, in file order. Rows with an
    /// unknown label are skipped rather than failing the whole read.
    pub fn entries(&self) -> Vec<ProcessEntry> {
        let table = self
            .doc
            .block(PROCESSES_BLOCK)
            .and_then(|b| b.table())
            .expect("validated at parse");
        table
            .rows
            .iter()
            .filter_map(|row| {
                let status = ProcessStatus::from_label(&row[self.status_col]).ok()?;
                Some(ProcessEntry {
                    name: row[self.name_col].clone(),
                    status,
                })
            })
            .collect()
    }

    /// Status of the latest row whose process name starts with `prefix`.
    pub fn status_for_prefix(&self, prefix: &str) -> Option<ProcessStatus> {
        self.entries()
            .into_iter()
            .filter(|e| e.name.starts_with(prefix))
            .next_back()
            .map(|e| e.status)
    }

    /// The single currently `Running` row, if any.
    pub fn running_entry(&self) -> Option<ProcessEntry> {
        self.entries()
            .into_iter()
            .find(|e| e.status == ProcessStatus::Running)
    }

    /// Rewrite the status label of the named row. Returns whether a row
    /// changed.
    pub fn set_status(&mut self, name: &str, status: ProcessStatus) -> bool {
        let (name_col, status_col) = (self.name_col, self.status_col);
        let table = self
            .doc
            .block_mut(PROCESSES_BLOCK)
            .and_then(|b| b.table_mut())
            .expect("validated at parse");
        let mut changed = false;
        for row in table.rows.iter_mut().filter(|r| r[name_col] == name) {
            if row[status_col] != status.as_label() {
                row[status_col] = status.as_label().to_string();
                changed = true;
            }
        }
        changed
    }

    pub fn to_star_string(&self) -> String {
        self.doc.to_star_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
data_pipeline_general

_rlnPipeLineJobCounter  4

data_pipeline_processes

loop_
_rlnPipeLineProcessName #1
_rlnPipeLineProcessAlias #2
_rlnPipeLineProcessTypeLabel #3
_rlnPipeLineProcessStatusLabel #4
Schemes/scheme_demo/import_movies/    None    relion.importtomo    Succeeded
Schemes/scheme_demo/fs_motion_and_ctf/    None    relion.external    Succeeded
Schemes/scheme_demo/ts_alignment/    None    relion.external    Running
"#;

    #[test]
    fn parses_entries_in_order() {
        let table = ProcessTable::parse(SAMPLE).unwrap();
        let entries = table.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].status, ProcessStatus::Succeeded);
        assert_eq!(entries[2].status, ProcessStatus::Running);
    }

    #[test]
    fn prefix_lookup_takes_latest_row() {
        let table = ProcessTable::parse(SAMPLE).unwrap();
        assert_eq!(
            table.status_for_prefix("Schemes/scheme_demo/ts_alignment/"),
            Some(ProcessStatus::Running)
        );
        assert_eq!(table.status_for_prefix("Schemes/scheme_demo/ts_ctf/"), None);
    }

    #[test]
    fn running_entry_is_found() {
        let table = ProcessTable::parse(SAMPLE).unwrap();
        let running = table.running_entry().unwrap();
        assert_eq!(running.name, "Schemes/scheme_demo/ts_alignment/");
    }

    #[test]
    fn abort_rewrite_round_trips() {
        let mut table = ProcessTable::parse(SAMPLE).unwrap();
        assert!(table.set_status("Schemes/scheme_demo/ts_alignment/", ProcessStatus::Failed));
        // Idempotent: a second rewrite changes nothing.
        assert!(!table.set_status("Schemes/scheme_demo/ts_alignment/", ProcessStatus::Failed));

        let reparsed = ProcessTable::parse(&table.to_star_string()).unwrap();
        assert_eq!(
            reparsed.status_for_prefix("Schemes/scheme_demo/ts_alignment/"),
            Some(ProcessStatus::Failed)
        );
        assert!(reparsed.running_entry().is_none());
    }

    #[test]
    fn unknown_labels_are_skipped() {
        let doc = SAMPLE.replace("Running", "Exploded");
        let table = ProcessTable::parse(&doc).unwrap();
        assert_eq!(table.entries().len(), 2);
    }

    #[test]
    fn missing_block_is_an_error() {
        assert!(matches!(
            ProcessTable::parse("data_pipeline_general\n\n_rlnPipeLineJobCounter 1\n"),
            Err(StarError::MissingBlock { .. })
        ));
    }
}

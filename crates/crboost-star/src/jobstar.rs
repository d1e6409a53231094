use crate::document::StarDocument;
use crate::error::StarError;

const OPTIONS_BLOCK: &str = "joboptions_values";
const VARIABLE_COLUMN: &str = "_rlnJobOptionVariable";
const VALUE_COLUMN: &str = "_rlnJobOptionValue";

/// A per-job option table (`job.star`), as copied from the server-shipped
/// templates and rewritten during scheme materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStar {
    doc: StarDocument,
}

impl JobStar {
    pub fn parse(input: &str) -> Result<Self, StarError> {
        let doc = StarDocument::parse(input)?;
        // Both blocks must be present before we start editing.
        doc.require("job")?;
        let block = doc.require(OPTIONS_BLOCK)?;
        let table = block.table().ok_or_else(|| StarError::MissingColumn {
            block: OPTIONS_BLOCK.to_string(),
            column: VARIABLE_COLUMN.to_string(),
        })?;
        for column in [VARIABLE_COLUMN, VALUE_COLUMN] {
            if table.column_index(column).is_none() {
                return Err(StarError::MissingColumn {
                    block: OPTIONS_BLOCK.to_string(),
                    column: column.to_string(),
                });
            }
        }
        Ok(Self { doc })
    }

    pub fn to_star_string(&self) -> String {
        self.doc.to_star_string()
    }

    /// The job type label from the header block.
    pub fn type_label(&self) -> Option<&str> {
        self.doc.block("job")?.get("_rlnJobTypeLabel")
    }

    fn columns(&self) -> (usize, usize) {
        let table = self
            .doc
            .block(OPTIONS_BLOCK)
            .and_then(|b| b.table())
            .expect("validated at parse");
        (
            table.column_index(VARIABLE_COLUMN).expect("validated"),
            table.column_index(VALUE_COLUMN).expect("validated"),
        )
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        let (var, val) = self.columns();
        self.doc
            .block(OPTIONS_BLOCK)?
            .table()?
            .rows
            .iter()
            .find(|r| r[var] == name)
            .map(|r| r[val].as_str())
    }

    /// Set an option's value in place, appending a row when absent.
    /// Row order of existing options is preserved.
    pub fn set_option(&mut self, name: &str, value: &str) {
        let (var, val) = self.columns();
        let table = self
            .doc
            .block_mut(OPTIONS_BLOCK)
            .and_then(|b| b.table_mut())
            .expect("validated at parse");
        if let Some(row) = table.rows.iter_mut().find(|r| r[var] == name) {
            row[val] = value.to_string();
        } else {
            let mut row = vec![String::new(); table.columns.len()];
            row[var] = name.to_string();
            row[val] = value.to_string();
            table.rows.push(row);
        }
    }

    /// Drop the legacy `paramN_label`/`paramN_value` aliasing rows. The
    /// command baked into `fn_exe` replaces that indirection entirely.
    pub fn remove_param_aliases(&mut self) {
        let (var, _) = self.columns();
        let table = self
            .doc
            .block_mut(OPTIONS_BLOCK)
            .and_then(|b| b.table_mut())
            .expect("validated at parse");
        table.rows.retain(|r| !is_param_alias(&r[var]));
    }

    /// Rewrite input-path references from one scheme name to another in
    /// every option value.
    pub fn rename_scheme_refs(&mut self, old: &str, new: &str) {
        let (_, val) = self.columns();
        let from = format!("Schemes/{old}/");
        let to = format!("Schemes/{new}/");
        let table = self
            .doc
            .block_mut(OPTIONS_BLOCK)
            .and_then(|b| b.table_mut())
            .expect("validated at parse");
        for row in &mut table.rows {
            if row[val].contains(&from) {
                row[val] = row[val].replace(&from, &to);
            }
        }
    }
}

/// `param1_label`, `param10_value`, ... and nothing else.
fn is_param_alias(variable: &str) -> bool {
    let Some(rest) = variable.strip_prefix("param") else {
        return false;
    };
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return false;
    }
    matches!(&rest[digits.len()..], "_label" | "_value")
}

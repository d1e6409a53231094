use crate::error::StarError;

/// A parsed STAR document: an ordered list of named data blocks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StarDocument {
    pub blocks: Vec<StarBlock>,
}

/// One `data_<name>` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarBlock {
    pub name: String,
    pub content: BlockContent,
}

/// Block payload: either bare key/value pairs or a `loop_` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockContent {
    Pairs(Vec<(String, String)>),
    Table(StarTable),
}

/// A `loop_` table with its column headers and ordered rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StarTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl StarTable {
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

impl StarBlock {
    pub fn pairs(&self) -> Option<&Vec<(String, String)>> {
        match &self.content {
            BlockContent::Pairs(pairs) => Some(pairs),
            BlockContent::Table(_) => None,
        }
    }

    pub fn table(&self) -> Option<&StarTable> {
        match &self.content {
            BlockContent::Table(table) => Some(table),
            BlockContent::Pairs(_) => None,
        }
    }

    pub fn table_mut(&mut self) -> Option<&mut StarTable> {
        match &mut self.content {
            BlockContent::Table(table) => Some(table),
            BlockContent::Pairs(_) => None,
        }
    }

    /// Value of a key in a pair block.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a key in a pair block, appending when absent.
    pub fn set(&mut self, key: &str, value: &str) {
        if let BlockContent::Pairs(pairs) = &mut self.content {
            if let Some(pair) = pairs.iter_mut().find(|(k, _)| k == key) {
                pair.1 = value.to_string();
            } else {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
    }
}

impl StarDocument {
    pub fn block(&self, name: &str) -> Option<&StarBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    pub fn block_mut(&mut self, name: &str) -> Option<&mut StarBlock> {
        self.blocks.iter_mut().find(|b| b.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&StarBlock, StarError> {
        self.block(name).ok_or_else(|| StarError::MissingBlock {
            name: name.to_string(),
        })
    }

    pub fn require_mut(&mut self, name: &str) -> Result<&mut StarBlock, StarError> {
        self.block_mut(name).ok_or_else(|| StarError::MissingBlock {
            name: name.to_string(),
        })
    }

    /// Parse a STAR document, preserving block, pair, and row order.
    pub fn parse(input: &str) -> Result<Self, StarError> {
        let mut doc = StarDocument::default();
        let mut lines = input.lines().enumerate().peekable();

        while let Some((lineno, raw)) = lines.next() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(name) = line.strip_prefix("data_") else {
                return Err(StarError::Malformed {
                    line: lineno + 1,
                    reason: format!("expected a data block, found '{line}'"),
                });
            };
            let mut block = StarBlock {
                name: name.to_string(),
                content: BlockContent::Pairs(Vec::new()),
            };

            // Skip blank lines between the block header and its body.
            while matches!(lines.peek(), Some((_, l)) if l.trim().is_empty()) {
                lines.next();
            }

            if matches!(lines.peek(), Some((_, l)) if l.trim() == "loop_") {
                lines.next();
                let mut table = StarTable::default();
                // Column headers: `_name` optionally followed by `#N`.
                while let Some((_, l)) = lines.peek() {
                    let t = l.trim();
                    if let Some(rest) = t.strip_prefix('_') {
                        let column = rest.split_whitespace().next().unwrap_or("");
                        table.columns.push(format!("_{column}"));
                        lines.next();
                    } else {
                        break;
                    }
                }
                // Data rows until a blank line or the next block.
                while let Some((lineno, l)) = lines.peek().copied() {
                    let t = l.trim();
                    if t.is_empty() || t.starts_with("data_") {
                        break;
                    }
                    if t.starts_with('#') {
                        lines.next();
                        continue;
                    }
                    let cells = split_row(t);
                    if cells.len() != table.columns.len() {
                        return Err(StarError::Malformed {
                            line: lineno + 1,
                            reason: format!(
                                "row has {} cells, table has {} columns",
                                cells.len(),
                                table.columns.len()
                            ),
                        });
                    }
                    table.rows.push(cells);
                    lines.next();
                }
                block.content = BlockContent::Table(table);
            } else {
                let mut pairs = Vec::new();
                while let Some((lineno, l)) = lines.peek().copied() {
                    let t = l.trim();
                    if t.is_empty() || t.starts_with("data_") {
                        break;
                    }
                    if t.starts_with('#') {
                        lines.next();
                        continue;
                    }
                    let Some(rest) = t.strip_prefix('_') else {
                        return Err(StarError::Malformed {
                            line: lineno + 1,
                            reason: format!("expected '_key value', found '{t}'"),
                        });
                    };
                    let mut parts = rest.splitn(2, char::is_whitespace);
                    let key = parts.next().unwrap_or("");
                    let value = unquote(parts.next().unwrap_or("").trim());
                    pairs.push((format!("_{key}"), value));
                    lines.next();
                }
                block.content = BlockContent::Pairs(pairs);
            }
            doc.blocks.push(block);
        }

        Ok(doc)
    }

    /// Deterministic emission. The same document always produces the same
    /// bytes; spacing is derived from content widths only.
    pub fn to_star_string(&self) -> String {
        let mut out = String::from("# version 30001\n");
        for block in &self.blocks {
            out.push('\n');
            out.push_str("data_");
            out.push_str(&block.name);
            out.push_str("\n\n");
            match &block.content {
                BlockContent::Pairs(pairs) => {
                    let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
                    for (key, value) in pairs {
                        out.push_str(&format!(
                            "{key:<width$}    {}\n",
                            quote_if_needed(value),
                            width = width
                        ));
                    }
                }
                BlockContent::Table(table) => {
                    out.push_str("loop_\n");
                    for (i, column) in table.columns.iter().enumerate() {
                        out.push_str(&format!("{column} #{}\n", i + 1));
                    }
                    let rendered: Vec<Vec<String>> = table
                        .rows
                        .iter()
                        .map(|row| row.iter().map(|c| quote_if_needed(c)).collect())
                        .collect();
                    let mut widths = vec![0usize; table.columns.len()];
                    for row in &rendered {
                        for (i, cell) in row.iter().enumerate() {
                            widths[i] = widths[i].max(cell.len());
                        }
                    }
                    for row in &rendered {
                        let line = row
                            .iter()
                            .enumerate()
                            .map(|(i, cell)| format!("{cell:<width$}", width = widths[i]))
                            .collect::<Vec<_>>()
                            .join("  ");
                        out.push_str(line.trim_end());
                        out.push('\n');
                    }
                }
            }
        }
        out
    }
}

/// Split a table row into cells, honoring double quotes.
fn split_row(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut cell = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                cell.push(c);
            }
            cells.push(cell);
        } else {
            let mut cell = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                cell.push(c);
                chars.next();
            }
            cells.push(cell);
        }
    }
    cells
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

fn quote_if_needed(value: &str) -> String {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# version 30001

data_job

_rlnJobTypeLabel    relion.importtomo
_rlnJobIsContinue   0
_rlnJobIsTomo       1

data_joboptions_values

loop_
_rlnJobOptionVariable #1
_rlnJobOptionValue #2
angpix    1.35
fn_exe    "relion_tomo_import --i movies"
other_args    ""
"#;

    #[test]
    fn parses_pairs_and_tables() {
        let doc = StarDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.blocks.len(), 2);

        let job = doc.block("job").unwrap();
        assert_eq!(job.get("_rlnJobTypeLabel"), Some("relion.importtomo"));
        assert_eq!(job.get("_rlnJobIsTomo"), Some("1"));

        let options = doc.block("joboptions_values").unwrap().table().unwrap();
        assert_eq!(options.columns.len(), 2);
        assert_eq!(options.rows.len(), 3);
        assert_eq!(options.rows[1][1], "relion_tomo_import --i movies");
        assert_eq!(options.rows[2][1], "");
    }

    #[test]
    fn row_order_is_preserved() {
        let doc = StarDocument::parse(SAMPLE).unwrap();
        let options = doc.block("joboptions_values").unwrap().table().unwrap();
        let vars: Vec<&str> = options.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(vars, ["angpix", "fn_exe", "other_args"]);
    }

    #[test]
    fn emission_is_deterministic() {
        let doc = StarDocument::parse(SAMPLE).unwrap();
        let once = doc.to_star_string();
        let twice = StarDocument::parse(&once).unwrap().to_star_string();
        assert_eq!(once, twice);
    }

    #[test]
    fn quoted_cells_round_trip() {
        let doc = StarDocument::parse(SAMPLE).unwrap();
        let emitted = doc.to_star_string();
        assert!(emitted.contains("\"relion_tomo_import --i movies\""));
        assert!(emitted.contains("\"\""));
        let reparsed = StarDocument::parse(&emitted).unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn rejects_row_with_wrong_arity() {
        let bad = "data_t\n\nloop_\n_a #1\n_b #2\nonly_one\n";
        assert!(matches!(
            StarDocument::parse(bad),
            Err(StarError::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_content_outside_blocks() {
        assert!(StarDocument::parse("stray line\n").is_err());
    }

    #[test]
    fn empty_document_parses() {
        let doc = StarDocument::parse("# version 30001\n").unwrap();
        assert!(doc.blocks.is_empty());
    }
}

use std::collections::BTreeMap;

/// One tilt record, introduced by a `[ZValue = N]` header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TiltRecord {
    pub z_value: i64,
    pub values: BTreeMap<String, String>,
}

/// A parsed session-metadata file: `key = value` lines with `[ZValue = N]`
/// section headers for tilt records and `[T = ...]` title lines.
///
/// Parsing is tolerant by design. Unrecognized lines are ignored, values are
/// kept as raw strings, and nothing here ever fails on a missing field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MdocSession {
    /// Key-values appearing before the first tilt section.
    pub global: BTreeMap<String, String>,
    /// `[T = ...]` title payloads, in file order.
    pub titles: Vec<String>,
    pub tilts: Vec<TiltRecord>,
}

impl MdocSession {
    pub fn parse(content: &str) -> Self {
        let mut session = MdocSession::default();
        let mut current: Option<TiltRecord> = None;

        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(inner) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let inner = inner.trim();
                if let Some(title) = inner.strip_prefix("T =") {
                    session.titles.push(title.trim().to_string());
                } else if let Some(z) = inner.strip_prefix("ZValue =") {
                    if let Some(done) = current.take() {
                        session.tilts.push(done);
                    }
                    current = Some(TiltRecord {
                        z_value: z.trim().parse().unwrap_or(0),
                        values: BTreeMap::new(),
                    });
                }
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_string();
                let value = value.trim().to_string();
                match &mut current {
                    Some(tilt) => {
                        tilt.values.insert(key, value);
                    }
                    None => {
                        session.global.insert(key, value);
                    }
                }
            }
        }
        if let Some(done) = current.take() {
            session.tilts.push(done);
        }
        session
    }

    /// A global value, falling back to the first tilt record.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.global
            .get(key)
            .or_else(|| self.tilts.first().and_then(|t| t.values.get(key)))
            .map(String::as_str)
    }

    pub fn value_f64(&self, key: &str) -> Option<f64> {
        self.value(key)?.split_whitespace().next()?.parse().ok()
    }

    /// `ImageSize = W H` as a pair.
    pub fn image_size(&self) -> Option<(u32, u32)> {
        let raw = self.value("ImageSize")?;
        let mut parts = raw.split_whitespace();
        let w = parts.next()?.parse().ok()?;
        let h = parts.next()?.parse().ok()?;
        Some((w, h))
    }

    /// The tilt axis angle embedded in a `[T = ...]` title line, e.g.
    /// `Tilt axis angle = 84.7, binning = 1`.
    pub fn tilt_axis_angle(&self) -> Option<f64> {
        for title in &self.titles {
            if let Some(idx) = title.find("Tilt axis angle =") {
                let rest = &title[idx + "Tilt axis angle =".len()..];
                let token = rest
                    .trim_start()
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .next()?;
                if let Ok(v) = token.parse() {
                    return Some(v);
                }
            }
        }
        None
    }
}

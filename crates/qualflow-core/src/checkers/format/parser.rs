use super::ConversionCategory;
use regex::Regex;
use std::collections::BTreeMap;

const SPECIFIER: &str = r"^%(\d+\$)?([-#+ 0,(<]*)?(\d+)?(\.\d+)?([tT])?([a-zA-Z%])";

/// Reads the argument categories a format string expects
#[derive(Debug, Clone)]
pub struct FormatParser {
    specifier: Regex,
}

impl FormatParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            specifier: Regex::new(SPECIFIER)?,
        })
    }

    /// One category per argument position, or the reason `format` is not a valid format
    /// string. Positions no specifier refers to are [`ConversionCategory::Unused`].
    pub fn categories(&self, format: &str) -> Result<Vec<ConversionCategory>, String> {
        let mut by_index: BTreeMap<usize, ConversionCategory> = BTreeMap::new();
        let mut last: Option<usize> = None;
        let mut ordinary: Option<usize> = None;
        let mut pos = 0;

        while let Some(offset) = format[pos..].find('%') {
            let start = pos + offset;
            let Some(caps) = self.specifier.captures(&format[start..]) else {
                return Err(format!("invalid format specifier `{}`", &format[start..]));
            };
            let spec = caps.get(0).map_or("", |m| m.as_str());
            pos = start + spec.len();

            let conversion = caps.get(6).and_then(|m| m.as_str().chars().next()).unwrap_or('%');
            if matches!(conversion, '%' | 'n') {
                continue;
            }
            let category = if caps.get(5).is_some() {
                ConversionCategory::Time
            } else {
                ConversionCategory::from_conversion(conversion)
                    .ok_or_else(|| format!("unknown conversion `{}` in `{}`", conversion, spec))?
            };

            let index = if let Some(explicit) = caps.get(1) {
                let digits = explicit.as_str().trim_end_matches('$');
                match digits.parse::<usize>() {
                    Ok(n) if n > 0 => n - 1,
                    _ => return Err(format!("illegal argument index in `{}`", spec)),
                }
            } else if caps.get(2).is_some_and(|flags| flags.as_str().contains('<')) {
                last.ok_or_else(|| format!("no previous argument for `{}`", spec))?
            } else {
                let next = ordinary.map_or(0, |o| o + 1);
                ordinary = Some(next);
                next
            };
            last = Some(index);

            let previous = by_index.get(&index).copied().unwrap_or(ConversionCategory::Unused);
            by_index.insert(index, ConversionCategory::intersect(previous, category));
        }

        let Some(max) = by_index.keys().next_back().copied() else {
            return Ok(Vec::new());
        };
        Ok((0..=max)
            .map(|i| by_index.get(&i).copied().unwrap_or(ConversionCategory::Unused))
            .collect())
    }
}

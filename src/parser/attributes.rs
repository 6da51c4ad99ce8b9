/// Attribute list as found after tags such as `EXT-X-STREAM-INF`, `EXT-X-MEDIA`,
/// `EXT-X-KEY`, `EXT-X-MAP`, `EXT-X-DATERANGE` or `EXT-X-START`.
///
/// Attributes are `NAME=VALUE` pairs separated by commas. Commas inside a quoted
/// value do not separate attributes. Surrounding quotes and whitespace are
/// removed from values.
#[derive(Debug, Default)]
pub(super) struct AttributeList<'a> {
    attributes: Vec<(&'a str, &'a str)>,
}

impl<'a> AttributeList<'a> {
    pub(super) fn parse(line: &'a str) -> Self {
        let mut attributes = vec![];
        let mut base_offset = 0;
        while base_offset < line.len() {
            let end = find_attribute_end(line, base_offset);
            let pair = &line[base_offset..end];
            base_offset = end + 1;
            let Some(eq_idx) = pair.find('=') else {
                if !pair.trim().is_empty() {
                    tracing::debug!(pair, "Parser: Attribute name not followed by equal sign");
                }
                continue;
            };
            let name = pair[..eq_idx].trim();
            if name.is_empty() {
                continue;
            }
            attributes.push((name, unquote(&pair[eq_idx + 1..])));
        }
        Self { attributes }
    }

    /// Value of the attribute named `name`, if present. If the attribute is
    /// declared multiple times, the last declaration wins.
    pub(super) fn get(&self, name: &str) -> Option<&'a str> {
        self.attributes
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.attributes.iter().copied()
    }
}

/// Offset of the comma ending the attribute starting at `offset`, or the end of
/// `line` if there's none. Commas inside double quotes are skipped.
fn find_attribute_end(line: &str, offset: usize) -> usize {
    let mut in_quotes = false;
    for (idx, c) in line[offset..].char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return offset + idx,
            _ => {}
        }
    }
    line.len()
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    let value = value.strip_prefix('"').unwrap_or(value);
    value.strip_suffix('"').unwrap_or(value).trim()
}

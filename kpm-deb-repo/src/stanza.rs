// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Parses the Debian control-file stanza format used by `Packages` and
`Release`/`InRelease` indices: empty-line-separated paragraphs of
`Key: value` fields, with continuation lines (leading whitespace) folded
into the preceding field's value on their own line.
*/

/// One paragraph of `Key: value` fields.
#[derive(Clone, Debug, Default)]
pub struct Stanza {
    fields: Vec<(String, String)>,
}

impl Stanza {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct Parser {
    current: Stanza,
    pending_field: Option<(String, String)>,
}

impl Parser {
    fn flush_field(&mut self) {
        if let Some(field) = self.pending_field.take() {
            self.current.fields.push(field);
        }
    }

    /// Feed one line, returning a completed stanza if this line closed one.
    fn write_line(&mut self, line: &str) -> Option<Stanza> {
        if line.trim().is_empty() {
            self.flush_field();
            if self.current.fields.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.current));
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = &mut self.pending_field {
                value.push('\n');
                value.push_str(line.trim_end());
            }
            return None;
        }

        self.flush_field();
        if let Some((name, value)) = line.split_once(':') {
            self.pending_field = Some((name.trim().to_string(), value.trim().to_string()));
        }
        None
    }

    fn finish(mut self) -> Option<Stanza> {
        self.flush_field();
        if self.current.fields.is_empty() {
            None
        } else {
            Some(self.current)
        }
    }
}

/// Parse every stanza out of a control-file-format document.
pub fn parse(content: &str) -> Vec<Stanza> {
    let mut parser = Parser::default();
    let mut stanzas = Vec::new();

    for line in content.lines() {
        if let Some(stanza) = parser.write_line(line) {
            stanzas.push(stanza);
        }
    }
    if let Some(stanza) = parser.finish() {
        stanzas.push(stanza);
    }

    stanzas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_stanzas_separated_by_blank_line() {
        let content = "Package: linux-headers-5.15.0\nVersion: 5.15.0-73\n\nPackage: linux-headers-5.4.0\nVersion: 5.4.0-150\n";
        let stanzas = parse(content);
        assert_eq!(stanzas.len(), 2);
        assert_eq!(stanzas[0].field("Package"), Some("linux-headers-5.15.0"));
        assert_eq!(stanzas[1].field("Version"), Some("5.4.0-150"));
    }

    #[test]
    fn folds_indented_continuation_lines_into_the_field_value() {
        let content = "Package: foo\nDescription: first line\n second line\n third line\n";
        let stanzas = parse(content);
        assert_eq!(
            stanzas[0].field("Description"),
            Some("first line\nsecond line\nthird line")
        );
    }

    #[test]
    fn field_lookup_is_case_insensitive() {
        let stanzas = parse("package: foo\n");
        assert_eq!(stanzas[0].field("Package"), Some("foo"));
    }

    #[test]
    fn trailing_stanza_without_final_blank_line_is_still_captured() {
        let stanzas = parse("Package: foo\nVersion: 1\n");
        assert_eq!(stanzas.len(), 1);
        assert_eq!(stanzas[0].field("Version"), Some("1"));
    }
}

use thiserror::Error;

/// Raised for text that is not a valid ini document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

/// Options of one `[section]`, kept in declaration order.
///
/// Options are consumed with [`Section::take`] so that whatever is left after
/// extracting the known keys can be reported as unknown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    options: Vec<(String, String)>,
}

impl Section {
    /// Remove an option and return its value.
    pub fn take(&mut self, key: &str) -> Option<String> {
        let index = self.options.iter().position(|(k, _)| k == key)?;
        Some(self.options.remove(index).1)
    }

    /// Remove all remaining options, in declaration order.
    pub fn drain(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.options)
    }

    pub fn keys(&self) -> Vec<String> {
        self.options.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    fn set(&mut self, key: String, value: String) {
        match self.options.iter_mut().find(|(k, _)| *k == key) {
            Some(option) => option.1 = value,
            None => self.options.push((key, value)),
        }
    }

    fn append_line(&mut self, key: &str, line: &str) {
        if let Some(option) = self.options.iter_mut().find(|(k, _)| k == key) {
            option.1.push('\n');
            option.1.push_str(line);
        }
    }
}

/// A parsed ini document.
///
/// Grammar: `[section]` headers, `key = value` or `key: value` options,
/// full-line comments starting with `#` or `;`, and indented continuation
/// lines. Keys are lower-cased, values trimmed. A repeated section header
/// continues the earlier section, a repeated key overwrites its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    sections: Vec<(String, Section)>,
}

impl Document {
    pub fn parse(text: &str) -> Result<Self, SyntaxError> {
        let mut doc = Document::default();
        let mut current: Option<usize> = None;
        let mut last_key: Option<String> = None;

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || raw.starts_with('#') || raw.starts_with(';') {
                continue;
            }

            if raw.starts_with(char::is_whitespace) {
                if let (Some(section), Some(key)) = (current, last_key.as_deref()) {
                    doc.sections[section].1.append_line(key, trimmed);
                    continue;
                }
            }

            if let Some(header) = trimmed.strip_prefix('[') {
                let name = header.strip_suffix(']').map(str::trim).unwrap_or_default();
                if name.is_empty() {
                    return Err(SyntaxError {
                        line,
                        message: format!("invalid section header '{trimmed}'"),
                    });
                }
                current = Some(doc.section_index(name));
                last_key = None;
                continue;
            }

            let Some(section) = current else {
                return Err(SyntaxError {
                    line,
                    message: "option found before any section header".to_string(),
                });
            };

            let Some(split) = trimmed.find(|c: char| c == '=' || c == ':') else {
                return Err(SyntaxError {
                    line,
                    message: format!("expected 'key = value', found '{trimmed}'"),
                });
            };
            let key = trimmed[..split].trim().to_lowercase();
            if key.is_empty() {
                return Err(SyntaxError { line, message: "option without a name".to_string() });
            }
            let value = strip_inline_comment(trimmed[split + 1..].trim());

            doc.sections[section].1.set(key.clone(), value.to_string());
            last_key = Some(key);
        }

        Ok(doc)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|(n, _)| n == name).map(|(_, section)| section)
    }

    fn section_index(&mut self, name: &str) -> usize {
        match self.sections.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                self.sections.push((name.to_string(), Section::default()));
                self.sections.len() - 1
            }
        }
    }
}

/// A `;` preceded by whitespace starts a comment inside a value.
fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for (pos, byte) in bytes.iter().enumerate() {
        if *byte == b';' && pos > 0 && bytes[pos - 1].is_ascii_whitespace() {
            return value[..pos].trim_end();
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_section_and_option_order() {
        let text = "[first]\nb = 2\na = 1\n\n[second]\nz: last\n";
        let mut doc = Document::parse(text).unwrap();
        assert_eq!(doc.section_names(), vec!["first", "second"]);

        let first = doc.section_mut("first").unwrap();
        assert_eq!(first.keys(), vec!["b", "a"]);
        assert_eq!(first.take("a"), Some("1".to_string()));
        assert_eq!(first.keys(), vec!["b"]);

        let second = doc.section_mut("second").unwrap();
        assert_eq!(second.drain(), vec![("z".to_string(), "last".to_string())]);
        assert!(second.is_empty());
    }

    #[test]
    fn lowercases_keys_and_trims_values() {
        let mut doc = Document::parse("[s]\n  UserName   =   alice  \n").unwrap();
        assert_eq!(doc.section_mut("s").unwrap().take("username"), Some("alice".to_string()));
    }

    #[test]
    fn skips_comments_and_strips_inline_comments() {
        let text = "# header comment\n[s]\n; another\nkey = value ; trailing\npath = a;b\n";
        let mut doc = Document::parse(text).unwrap();
        let section = doc.section_mut("s").unwrap();
        assert_eq!(section.take("key"), Some("value".to_string()));
        assert_eq!(section.take("path"), Some("a;b".to_string()));
    }

    #[test]
    fn joins_continuation_lines() {
        let mut doc = Document::parse("[s]\nkey = first\n  second\n").unwrap();
        assert_eq!(doc.section_mut("s").unwrap().take("key"), Some("first\nsecond".to_string()));
    }

    #[test]
    fn repeated_key_overwrites_in_place() {
        let mut doc = Document::parse("[s]\na = 1\nb = 2\na = 3\n").unwrap();
        let section = doc.section_mut("s").unwrap();
        assert_eq!(section.drain(), vec![
            ("a".to_string(), "3".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
    }

    #[test]
    fn option_before_section_is_an_error() {
        let err = Document::parse("key = value\n[s]\n").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn line_without_separator_is_an_error() {
        let err = Document::parse("[s]\nnot an option\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn empty_text_has_no_sections() {
        let doc = Document::parse("\n# nothing\n").unwrap();
        assert!(doc.is_empty());
        assert!(doc.section_names().is_empty());
    }
}

//! Path pattern compilation: `{name}` placeholders become regex captures,
//! everything else is regex syntax verbatim (spec.md §4.3) — this is what
//! lets the file-cache fall-through register its pattern as the literal
//! regex `/.+` rather than a fixed literal path.

use regex::Regex;

#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Self {
        let mut built = String::from("^");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '{' {
                let mut name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    name.push(c);
                }
                built.push_str(&format!("(?P<{name}>[^/]+)"));
            } else {
                built.push(c);
            }
        }
        built.push_str("/?$");
        let regex = Regex::new(&built)
            .unwrap_or_else(|e| panic!("invalid route pattern {pattern:?}: {e}"));
        Self {
            source: pattern.to_owned(),
            regex,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Match `path` and, if it matches, return the bound `{name}` captures.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let caps = self.regex.captures(path)?;
        let names: Vec<_> = self
            .regex
            .capture_names()
            .flatten()
            .filter(|name| caps.name(name).is_some())
            .map(|name| (name.to_owned(), caps.name(name).unwrap().as_str().to_owned()))
            .collect();
        Some(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_with_optional_trailing_slash() {
        let p = PathPattern::compile("/probe");
        assert!(p.matches("/probe").is_some());
        assert!(p.matches("/probe/").is_some());
        assert!(p.matches("/probex").is_none());
    }

    #[test]
    fn named_placeholder_binds_path_segment() {
        let p = PathPattern::compile("/{device}/current");
        let caps = p.matches("/LinuxCNC/current").unwrap();
        assert_eq!(caps, vec![("device".to_owned(), "LinuxCNC".to_owned())]);
    }

    #[test]
    fn multiple_placeholders_bind_in_declared_order() {
        let p = PathPattern::compile("/asset/{assetIds}");
        let caps = p.matches("/asset/a1;a2").unwrap();
        assert_eq!(caps, vec![("assetIds".to_owned(), "a1;a2".to_owned())]);
    }

    #[test]
    fn fallthrough_wildcard_is_plain_regex() {
        let p = PathPattern::compile("/.+");
        assert!(p.matches("/schemas/MTConnectStreams.xsd").is_some());
        assert!(p.matches("/").is_none());
    }
}

use std::collections::HashMap;
use std::path::Path;

pub const CATALOG_KEY_VAR: &str = "TONE3000_API_KEY";
pub const AI_KEY_VAR: &str = "GEMINI_API_KEY";

/// Parsed `keys.txt`: `NAME=value` lines, or bare lines (catalog key first, AI key second).
#[derive(Debug, Default)]
pub struct KeyFile {
    named: HashMap<String, String>,
    bare: Vec<String>,
}

impl KeyFile {
    /// A missing or unreadable file is treated as empty.
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .map(|c| Self::parse(&c))
            .unwrap_or_default()
    }

    pub fn parse(content: &str) -> Self {
        let mut out = Self::default();
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((k, v)) => {
                    let v = v.trim().trim_matches('"').trim_matches('\'');
                    out.named.insert(k.trim().to_string(), v.to_string());
                }
                None => out.bare.push(line.to_string()),
            }
        }
        out
    }

    pub fn get(&self, var: &str) -> Option<String> {
        if let Some(v) = self.named.get(var).filter(|v| !v.is_empty()) {
            return Some(v.clone());
        }
        let slot = match var {
            CATALOG_KEY_VAR => 0,
            AI_KEY_VAR => 1,
            _ => return None,
        };
        self.bare.get(slot).cloned()
    }
}

/// First non-blank of: explicit flag, environment variable, key file.
pub fn resolve(flag: Option<&str>, var: &str, file: &KeyFile) -> Option<String> {
    flag.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| {
            std::env::var(var)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
        .or_else(|| file.get(var))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_entries_win_over_bare_lines() {
        let f = KeyFile::parse("# keys\nGEMINI_API_KEY = \"g-123\"\nbare-one\nbare-two\n");
        assert_eq!(f.get(AI_KEY_VAR).as_deref(), Some("g-123"));
        assert_eq!(f.get(CATALOG_KEY_VAR).as_deref(), Some("bare-one"));
    }

    #[test]
    fn bare_lines_are_positional() {
        let f = KeyFile::parse("\n t3k-abc \n\n AIza-xyz\n");
        assert_eq!(f.get(CATALOG_KEY_VAR).as_deref(), Some("t3k-abc"));
        assert_eq!(f.get(AI_KEY_VAR).as_deref(), Some("AIza-xyz"));
        assert_eq!(f.get("OTHER"), None);
    }

    #[test]
    fn flag_beats_file() {
        let f = KeyFile::parse("TONE3000_SCOUT_TEST_KEY=from-file");
        assert_eq!(
            resolve(Some(" from-flag "), "TONE3000_SCOUT_TEST_KEY", &f).as_deref(),
            Some("from-flag")
        );
        assert_eq!(
            resolve(Some("  "), "TONE3000_SCOUT_TEST_KEY", &f).as_deref(),
            Some("from-file")
        );
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let f = KeyFile::load(&dir.path().join("nope.txt"));
        assert_eq!(f.get(CATALOG_KEY_VAR), None);
    }
}

//! In-memory repository configuration.
//!
//! Only boolean lookup is provided here; parsing of config files happens in
//! a higher layer that feeds values in through [`Config::set_boolean`].
//! Keys follow git's flat `section[.subsection].name` form; section and
//! name are case-insensitive, the subsection is not.

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct Config {
    values: HashMap<String, bool>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(section: &str, subsection: Option<&str>, name: &str) -> String {
        match subsection {
            Some(sub) => format!(
                "{}.{}.{}",
                section.to_ascii_lowercase(),
                sub,
                name.to_ascii_lowercase()
            ),
            None => format!(
                "{}.{}",
                section.to_ascii_lowercase(),
                name.to_ascii_lowercase()
            ),
        }
    }

    /// Look up a boolean value, falling back to `default` when unset.
    pub fn get_boolean(
        &self,
        section: &str,
        subsection: Option<&str>,
        name: &str,
        default: bool,
    ) -> bool {
        self.values
            .get(&Self::key(section, subsection, name))
            .copied()
            .unwrap_or(default)
    }

    /// Set a boolean value.
    pub fn set_boolean(&mut self, section: &str, subsection: Option<&str>, name: &str, value: bool) {
        self.values
            .insert(Self::key(section, subsection, name), value);
    }

    /// Whether the executable bit is tracked (`core.filemode`, default on).
    pub fn file_mode(&self) -> bool {
        self.get_boolean("core", None, "filemode", true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::new();
        assert!(config.get_boolean("core", None, "filemode", true));
        assert!(!config.get_boolean("core", None, "filemode", false));
        assert!(config.file_mode());
    }

    #[test]
    fn set_overrides_default() {
        let mut config = Config::new();
        config.set_boolean("core", None, "filemode", false);
        assert!(!config.get_boolean("core", None, "filemode", true));
        assert!(!config.file_mode());
    }

    #[test]
    fn section_and_name_are_case_insensitive() {
        let mut config = Config::new();
        config.set_boolean("Core", None, "FileMode", false);
        assert!(!config.get_boolean("core", None, "filemode", true));
    }

    #[test]
    fn subsections_are_distinct() {
        let mut config = Config::new();
        config.set_boolean("branch", Some("main"), "rebase", true);
        assert!(config.get_boolean("branch", Some("main"), "rebase", false));
        assert!(!config.get_boolean("branch", Some("other"), "rebase", false));
    }
}

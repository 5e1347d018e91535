//! INI file configuration adapter.
//!
//! Keys are case-sensitive so asset identifiers in `[assets]` keep their
//! spelling.

use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let mut config = Ini::new_cs();
        config.load(path).map_err(std::io::Error::other)?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, String> {
        let mut config = Ini::new_cs();
        config.read(content.to_string())?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_ref()
            .and_then(|v| Self::parse_bool(v))
            .unwrap_or(default)
    }

    fn section_entries(&self, section: &str) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .config
            .get_map_ref()
            .get(section)
            .map(|keys| {
                keys.iter()
                    .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort();
        entries
    }
}

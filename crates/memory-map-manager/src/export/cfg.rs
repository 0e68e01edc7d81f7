//! Configuration snapshots: the resolved map as JSON and the merged input as
//! YAML.

use tracing::debug;

use super::{Exporter, Files};
use crate::error::Result;
use crate::model::sort_keys;

/// File name of the merged input snapshot.
pub const INPUT_CFG_FILE: &str = "mm_input_cfg.yaml";

impl Exporter<'_> {
    /// Generate the configuration snapshots.
    ///
    /// The input snapshot is only written when input data was given and is
    /// not empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn gen_cfg_files(&self) -> Result<Files> {
        let mut files = Files::new();
        let value = sort_keys(serde_json::to_value(self.cfg)?);
        files.insert(
            format!("mm_{}_cfg.json", self.cfg.metadata.full_hash),
            serde_json::to_string_pretty(&value)?,
        );
        if let Some(input) = self.input.filter(|input| !input.is_empty()) {
            files.insert(INPUT_CFG_FILE.to_string(), input.to_yaml()?);
        }
        debug!(count = files.len(), "Generated configuration files");
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{full_description, minimal_description, resolved};
    use super::*;
    use crate::importer::Description;
    use serde_json::Value;

    #[test]
    fn test_cfg_json() {
        let desc = minimal_description();
        let cfg = resolved(&desc);
        let files = Exporter::new(&cfg, None, true).gen_cfg_files().unwrap();
        assert_eq!(files.len(), 1);

        let text = &files[&format!("mm_{}_cfg.json", cfg.metadata.full_hash)];
        assert!(text.starts_with("{\n  \"bitfields\": {},\n"));
        let value: Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["metadata"]["app_name"], "minimal");
        assert_eq!(value["maps"]["map_1"]["type"], "type_1");
        assert_eq!(value["typedefs"][0]["type_1"]["resolved_total_size"], 4);
        assert_eq!(value["maps"]["map_1"]["records"][0]["name"], "record_1");
    }

    #[test]
    fn test_cfg_json_keys_sorted() {
        let cfg = resolved(&full_description());
        let files = Exporter::new(&cfg, None, true).gen_cfg_files().unwrap();
        let text = files.values().next().unwrap();
        let value: Value = serde_json::from_str(text).unwrap();
        let record = value["maps"]["map_1"]["records"][0].as_object().unwrap();
        let keys: Vec<&String> = record.keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_input_snapshot() {
        let desc = minimal_description();
        let cfg = resolved(&desc);
        let files = Exporter::new(&cfg, Some(&desc), true).gen_cfg_files().unwrap();
        let yaml = &files[INPUT_CFG_FILE];
        assert!(yaml.starts_with("generated_maps:\n"));
        let round: Value = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(round["typedefs"]["type_1"]["elements"][0], "record_1");

        let empty = Description::default();
        let files = Exporter::new(&cfg, Some(&empty), true).gen_cfg_files().unwrap();
        assert!(!files.contains_key(INPUT_CFG_FILE));
    }
}

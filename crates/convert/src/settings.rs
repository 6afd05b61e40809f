use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Column separator must be a single ASCII character, got {0:?}")]
    InvalidSeparator(char),
}

/// Separators shared by the self-format importer and exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelimitedTextSettings {
    pub column_separator: char,
    pub line_separator: String,
    pub geo_separator: String,
    pub tag_separator: String,
}

impl Default for DelimitedTextSettings {
    fn default() -> Self {
        Self::csv()
    }
}

impl DelimitedTextSettings {
    pub fn csv() -> Self {
        Self {
            column_separator: ',',
            line_separator: "\n".to_string(),
            geo_separator: " ".to_string(),
            tag_separator: ";".to_string(),
        }
    }

    pub fn tsv() -> Self {
        Self {
            column_separator: '\t',
            ..Self::csv()
        }
    }

    pub fn from_toml(toml_content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(toml_content)?;
        settings.column_separator_byte()?;
        Ok(settings)
    }

    pub(crate) fn column_separator_byte(&self) -> Result<u8, SettingsError> {
        if self.column_separator.is_ascii() {
            Ok(self.column_separator as u8)
        } else {
            Err(SettingsError::InvalidSeparator(self.column_separator))
        }
    }
}

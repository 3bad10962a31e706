use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File format of the persisted result; doubles as the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Webp,
    Jpg,
    #[default]
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Webp => "webp",
            Self::Jpg => "jpg",
            Self::Png => "png",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported output format '{0}' (expected webp, jpg or png)")]
pub struct UnknownOutputFormat(pub String);

impl FromStr for OutputFormat {
    type Err = UnknownOutputFormat;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "webp" => Ok(Self::Webp),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "png" => Ok(Self::Png),
            _ => Err(UnknownOutputFormat(raw.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{OutputFormat, UnknownOutputFormat};

    #[test]
    fn parses_known_formats_and_aliases() {
        assert_eq!("webp".parse::<OutputFormat>(), Ok(OutputFormat::Webp));
        assert_eq!("JPEG".parse::<OutputFormat>(), Ok(OutputFormat::Jpg));
        assert_eq!(".png".parse::<OutputFormat>(), Ok(OutputFormat::Png));
        assert_eq!(
            "tiff".parse::<OutputFormat>(),
            Err(UnknownOutputFormat("tiff".to_string()))
        );
    }

    #[test]
    fn default_is_png() {
        assert_eq!(OutputFormat::default().extension(), "png");
    }
}

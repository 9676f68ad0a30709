//! Tunable settings for a [`TrackingSession`](crate::TrackingSession).

use crate::math::{Cube, FreeCoordinate};

/// Settings for a [`TrackingSession`](crate::TrackingSession).
///
/// Deserializes from a document in which every field is optional:
///
/// ```
/// use phasekeeper::config::TrackingConfig;
///
/// let config = TrackingConfig::from_json_str(r#"{ "capture_entity_spawns": false }"#).unwrap();
/// assert!(config.capture_block_changes);
/// assert!(!config.capture_entity_spawns);
/// ```
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct TrackingConfig {
    /// If false, block changes are applied immediately in every phase which would
    /// otherwise capture them.
    pub capture_block_changes: bool,

    /// If false, entity spawns and item drops are forced through immediately in every phase
    /// which would otherwise capture them.
    pub capture_entity_spawns: bool,

    /// A warning is logged when the phase stack grows deeper than this.
    pub phase_depth_warning: usize,

    #[allow(missing_docs)]
    pub transfer: TransferConfig,
}

/// Settings for moving entities between worlds.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct TransferConfig {
    /// Scaled exit coordinates are clamped to within this distance of the origin on the
    /// horizontal axes.
    pub world_border: FreeCoordinate,

    /// Where entities entering an end dimension arrive, and where its exit platform is
    /// built.
    pub end_exit: [i32; 3],
}

impl TrackingConfig {
    /// Parses settings from JSON. Missing fields take their default values.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values which deserialization alone does not. Called by
    /// [`TrackingConfig::from_json_str()`]; settings built any other way should be checked
    /// with this.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let border = self.transfer.world_border;
        if !(border.is_finite() && border > 0.0) {
            return Err(ConfigError::InvalidWorldBorder(border));
        }
        Ok(())
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            capture_block_changes: true,
            capture_entity_spawns: true,
            phase_depth_warning: 32,
            transfer: TransferConfig::default(),
        }
    }
}

impl TransferConfig {
    /// Returns [`TransferConfig::end_exit`] as a cube.
    pub fn end_exit_cube(&self) -> Cube {
        Cube::from(self.end_exit)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            world_border: 29_999_872.0,
            end_exit: [100, 50, 0],
        }
    }
}

/// Error from [`TrackingConfig::from_json_str()`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The document is not valid JSON or does not match the expected structure.
    #[error("could not parse tracking configuration")]
    Parse(#[source] serde_json::Error),

    /// The world border must be positive and finite.
    #[error("world border {0} must be a positive finite distance")]
    InvalidWorldBorder(FreeCoordinate),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ErrorChain;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(TrackingConfig::from_json_str("{}").unwrap(), TrackingConfig::default());
    }

    #[test]
    fn nested_fields() {
        let config = TrackingConfig::from_json_str(indoc! {r#"
            {
                "phase_depth_warning": 8,
                "transfer": { "end_exit": [0, 70, 0] }
            }
        "#})
        .unwrap();
        assert_eq!(config.phase_depth_warning, 8);
        assert_eq!(config.transfer.end_exit_cube(), Cube::new(0, 70, 0));
        assert_eq!(config.transfer.world_border, 29_999_872.0);
    }

    #[test]
    fn malformed() {
        let error = TrackingConfig::from_json_str(r#"{ "phase_depth_warning": "deep" }"#)
            .unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
        assert!(
            ErrorChain(&error)
                .to_string()
                .starts_with("could not parse tracking configuration\n\nCaused by:\n    invalid type"),
            "{}",
            ErrorChain(&error)
        );
    }

    #[test]
    fn invalid_border() {
        let error =
            TrackingConfig::from_json_str(r#"{ "transfer": { "world_border": -1.0 } }"#).unwrap_err();
        assert_eq!(error.to_string(), "world border -1 must be a positive finite distance");
    }
}

//! Run configuration for [`identify_particles`](crate::algs::pipeline::identify_particles).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::algs::aggregate::OutputPolicy;
use crate::algs::communicator::CommTag;
use crate::algs::field::Threshold;
use crate::algs::stitching::StitchConfig;
use crate::particle_error::ParticleError;

/// Tags used by one pipeline run, starting at `tag_base`.
pub const TAGS_PER_RUN: u16 = 6;

/// Largest tag every MPI implementation must accept (`MPI_TAG_UB >= 32767`).
pub const MAX_PORTABLE_TAG: u16 = 32767;

/// Knobs of one particle identification run.
///
/// Every field has a default, so a JSON document only needs the fields it
/// changes:
///
/// ```
/// use mesh_particles::config::ParticleConfig;
/// let cfg = ParticleConfig::from_json_str(r#"{ "threshold": { "value": 0.5 } }"#).unwrap();
/// assert_eq!(cfg.threshold.value, 0.5);
/// assert_eq!(cfg.tag_base, 0x7000);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    pub threshold: Threshold,
    pub stitch: StitchConfig,
    pub output: OutputPolicy,
    /// First message tag; the run uses `tag_base..tag_base + TAGS_PER_RUN`.
    pub tag_base: u16,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            threshold: Threshold::default(),
            stitch: StitchConfig::default(),
            output: OutputPolicy::default(),
            tag_base: 0x7000,
        }
    }
}

impl ParticleConfig {
    /// Pore detection: cells where the phase field is below 0.2.
    pub fn porosity() -> Self {
        Self {
            threshold: Threshold::below(0.2),
            ..Self::default()
        }
    }

    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_output(mut self, output: OutputPolicy) -> Self {
        self.output = output;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.stitch.max_rounds = Some(max_rounds);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, ParticleError> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ParticleError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Checks that do not need the communicator. The output root is checked
    /// against the world size at run time.
    pub fn validate(&self) -> Result<(), ParticleError> {
        if !self.threshold.value.is_finite() {
            return Err(ParticleError::InvalidConfig(format!(
                "threshold {} is not finite",
                self.threshold.value
            )));
        }
        if self.stitch.max_rounds == Some(0) {
            return Err(ParticleError::InvalidConfig(
                "stitch.max_rounds must be at least 1".into(),
            ));
        }
        let last = self.tag_base.checked_add(TAGS_PER_RUN - 1);
        if last.is_none_or(|t| t > MAX_PORTABLE_TAG) {
            return Err(ParticleError::InvalidConfig(format!(
                "tags {:#x}..{:#x} exceed the portable MPI tag bound {MAX_PORTABLE_TAG}",
                self.tag_base,
                u32::from(self.tag_base) + u32::from(TAGS_PER_RUN)
            )));
        }
        Ok(())
    }

    pub(crate) fn tag(&self, slot: u16) -> CommTag {
        CommTag::new(self.tag_base).offset(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::field::ThresholdMode;
    use crate::particle_error::ErrorClass;

    #[test]
    fn defaults_round_trip_through_json() {
        let cfg = ParticleConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(ParticleConfig::from_json_str(&json).unwrap(), cfg);
        assert_eq!(cfg.output, OutputPolicy::Root(0));
        assert_eq!(cfg.stitch.max_rounds, None);
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let cfg = ParticleConfig::from_json_str(
            r#"{ "threshold": { "value": 0.2, "mode": "below" }, "output": "replicated" }"#,
        )
        .unwrap();
        assert_eq!(cfg.threshold.mode, ThresholdMode::Below);
        assert_eq!(cfg.output, OutputPolicy::Replicated);
        assert_eq!(cfg.tag_base, 0x7000);
        assert_eq!(cfg, ParticleConfig::porosity().with_output(OutputPolicy::Replicated));
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        let zero = ParticleConfig::default().with_max_rounds(0);
        assert_eq!(zero.validate().unwrap_err().class(), ErrorClass::Configuration);
        let tags = ParticleConfig {
            tag_base: u16::MAX - 2,
            ..ParticleConfig::default()
        };
        assert!(tags.validate().is_err());
        let last_portable = ParticleConfig {
            tag_base: MAX_PORTABLE_TAG - (TAGS_PER_RUN - 1),
            ..ParticleConfig::default()
        };
        assert!(last_portable.validate().is_ok());
        let past_bound = ParticleConfig {
            tag_base: MAX_PORTABLE_TAG - (TAGS_PER_RUN - 2),
            ..ParticleConfig::default()
        };
        assert!(matches!(past_bound.validate(), Err(ParticleError::InvalidConfig(_))));
        assert!(ParticleConfig::default().validate().is_ok());
        let bad = ParticleConfig::from_json_str("{ \"tag_base\": \"x\" }").unwrap_err();
        assert!(matches!(bad, ParticleError::ConfigParse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ParticleConfig::from_path("/nonexistent/particles.json").unwrap_err();
        assert!(matches!(err, ParticleError::Io(_)));
    }
}

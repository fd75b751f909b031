//! Encoder registry: textual `core_method` identifiers to factories.
//!
//! The registry is an explicit mapping populated at startup; identifier
//! lookups fail closed with a configuration error instead of scanning a
//! namespace for a loosely matching type. Identifiers are normalised by
//! stripping underscores and lowercasing, so `"point_pillar"`,
//! `"PointPillar"`, and `"pointpillar"` all resolve to the same factory.

use std::collections::BTreeMap;

use crate::config::EncoderArgs;
use crate::encoder::{FeatureEncoder, LiftSplatEncoder, PointPillarEncoder};
use crate::error::ConfigError;

/// Factory signature: parameter namespace, encoder args, init seed.
type EncoderFactory = Box<dyn Fn(&str, &EncoderArgs, u64) -> Box<dyn FeatureEncoder>>;

/// Registry resolving `core_method` identifiers to encoder constructors.
pub struct EncoderRegistry {
    factories: BTreeMap<String, EncoderFactory>,
}

impl EncoderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        EncoderRegistry {
            factories: BTreeMap::new(),
        }
    }

    /// Create a registry populated with the built-in encoders
    /// (`point_pillar` for lidar, `lift_splat_shoot` for camera).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("point_pillar", |prefix, args, seed| {
            Box::new(PointPillarEncoder::new(prefix, args, seed))
        });
        registry.register("lift_splat_shoot", |prefix, args, seed| {
            Box::new(LiftSplatEncoder::new(prefix, args, seed))
        });
        registry
    }

    /// Register a factory under `name` (normalised before insertion).
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&str, &EncoderArgs, u64) -> Box<dyn FeatureEncoder> + 'static,
    {
        self.factories
            .insert(normalize(name), Box::new(factory));
    }

    /// Resolve `core_method` and build the encoder.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownCoreMethod`] when no factory is
    /// registered under the normalised identifier.
    pub fn build(
        &self,
        core_method: &str,
        prefix: &str,
        args: &EncoderArgs,
        seed: u64,
    ) -> Result<Box<dyn FeatureEncoder>, ConfigError> {
        match self.factories.get(&normalize(core_method)) {
            Some(factory) => Ok(factory(prefix, args, seed)),
            None => Err(ConfigError::unknown_core_method(core_method)),
        }
    }

    /// Names of every registered identifier (normalised form).
    pub fn registered(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl Default for EncoderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

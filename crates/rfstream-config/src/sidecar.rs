//! Ramp tables stored next to a binary command log.
//!
//! A 20-byte record carries only a generator handle. The sidecar maps each
//! handle to the values its ramp produces, so `log.bin` plus
//! `log.ramps.toml` replay exactly. Scalar generators are sampled over their
//! ramp window; that is every offset the engine ever evaluates.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use rfstream_core::{Command, CommandError, CommandRecord, GeneratorRegistry, Ramp};

use crate::error::ConfigError;

/// How a sidecar entry rebuilds its generator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SidecarKind {
    /// One value held for the whole ramp.
    Constant,
    /// A scalar generator sampled at offsets `0..=duration`.
    Sampled,
    /// A vector-ramp table.
    Table,
}

/// One `[[ramp]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SidecarRamp {
    /// Wire handle.
    pub handle: u32,
    /// Generator kind.
    pub kind: SidecarKind,
    /// Values by step offset.
    pub values: Vec<i32>,
}

impl SidecarRamp {
    fn to_ramp(&self) -> Ramp {
        match self.kind {
            SidecarKind::Constant => Ramp::Constant(self.values.first().copied().unwrap_or(0)),
            SidecarKind::Table => Ramp::table(self.values.clone()),
            SidecarKind::Sampled => {
                let values = self.values.clone();
                Ramp::scalar(move |step| {
                    values
                        .get(step as usize)
                        .or_else(|| values.last())
                        .copied()
                        .unwrap_or(0)
                })
            }
        }
    }
}

/// Handle-to-values table for one command log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RampSidecar {
    /// Entries in handle order.
    #[serde(rename = "ramp", default)]
    pub ramps: Vec<SidecarRamp>,
}

impl RampSidecar {
    /// Encode `commands` into records, collecting the ramps they reference.
    pub fn encode(commands: &[Command]) -> Result<(Vec<CommandRecord>, Self), CommandError> {
        let mut registry = GeneratorRegistry::new();
        let mut sidecar = Self::default();
        let mut records = Vec::with_capacity(commands.len());
        for cmd in commands {
            let record = registry.encode(cmd)?;
            if let Some(ramp) = cmd.ramp_generator() {
                sidecar.record(record.generator, ramp, cmd.duration());
            }
            records.push(record);
        }
        Ok((records, sidecar))
    }

    fn record(&mut self, handle: u32, ramp: &Ramp, duration: u32) {
        let (kind, values) = match ramp {
            Ramp::Constant(v) => (SidecarKind::Constant, vec![*v]),
            Ramp::Vector(table) => (SidecarKind::Table, table.to_vec()),
            Ramp::Scalar(_) => (
                SidecarKind::Sampled,
                (0..=duration).map(|step| ramp.value_at(step)).collect(),
            ),
        };
        match self.ramps.iter_mut().find(|r| r.handle == handle) {
            // A shared generator keeps the longest window it was used with.
            Some(existing) => {
                if values.len() > existing.values.len() {
                    existing.values = values;
                }
            }
            None => self.ramps.push(SidecarRamp {
                handle,
                kind,
                values,
            }),
        }
    }

    /// Registry that decodes records written by [`encode`](Self::encode).
    pub fn to_registry(&self) -> GeneratorRegistry {
        let mut registry = GeneratorRegistry::new();
        for entry in &self.ramps {
            registry.insert(entry.handle, entry.to_ramp());
        }
        registry
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.ramps.len()
    }

    /// Check if no ramp is referenced.
    pub fn is_empty(&self) -> bool {
        self.ramps.is_empty()
    }

    /// Load a sidecar from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Ok(toml::from_str(&content)?)
    }

    /// Save the sidecar to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }
}

/// `log.bin` -> `log.ramps.toml`.
pub fn sidecar_path(log: impl AsRef<Path>) -> PathBuf {
    log.as_ref().with_extension("ramps.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands() -> Vec<Command> {
        let linear = Ramp::linear(0, 400, 4);
        vec![
            Command::channel_add(0),
            Command::amplitude_ramp(0, 0, 400, 4, linear.clone()).unwrap(),
            Command::amplitude_ramp(10, 0, 400, 8, linear).unwrap(),
            Command::frequency_vector_ramp(0, 0, 9, 2, vec![1, 5, 9]).unwrap(),
            Command::frequency_ramp(0, 0, 7, 3, Ramp::Constant(7)).unwrap(),
        ]
    }

    #[test]
    fn encode_collects_each_generator_once() {
        let (records, sidecar) = RampSidecar::encode(&commands()).unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].generator, 0);
        assert_eq!(records[1].generator, records[2].generator);
        assert_eq!(sidecar.len(), 3);

        let sampled = &sidecar.ramps[0];
        assert_eq!(sampled.kind, SidecarKind::Sampled);
        assert_eq!(sampled.values.len(), 9);
        assert_eq!(sampled.values[4], 400);
    }

    #[test]
    fn registry_decodes_every_record() {
        let cmds = commands();
        let (records, sidecar) = RampSidecar::encode(&cmds).unwrap();
        let registry = sidecar.to_registry();
        for (record, original) in records.iter().zip(&cmds) {
            let decoded = registry.decode(record).unwrap();
            assert_eq!(decoded.opcode(), original.opcode());
            assert_eq!(decoded.duration(), original.duration());
            let (a, b) = (decoded.ramp_generator(), original.ramp_generator());
            for step in 0..=original.duration() {
                assert_eq!(
                    a.map(|r| r.value_at(step)),
                    b.map(|r| r.value_at(step))
                );
            }
        }
    }

    #[test]
    fn sidecar_path_replaces_extension() {
        assert_eq!(
            sidecar_path("/tmp/run.bin"),
            PathBuf::from("/tmp/run.ramps.toml")
        );
    }
}

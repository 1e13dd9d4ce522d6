//! Catalog of named admission policies.
//!
//! A discipline is resolved into a [`DisciplineKind`] once, when a queue adopts
//! it; admission then dispatches on the enum rather than on the name.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DisciplineError;

pub const TAIL_DROP: &str = "taildrop";
pub const RED: &str = "red";

/// RED ratios, relative to the capacity of the queue adopting them.
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedParams {
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub max_probability: f64,
}

impl RedParams {
    pub fn new(
        min_threshold: f64,
        max_threshold: f64,
        max_probability: f64,
    ) -> Result<Self, DisciplineError> {
        let params = Self {
            min_threshold,
            max_threshold,
            max_probability,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), DisciplineError> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.min_threshold) || !in_unit(self.max_threshold) {
            return Err(DisciplineError::InvalidRedParams(format!(
                "thresholds must lie in [0, 1], got {} and {}",
                self.min_threshold, self.max_threshold
            )));
        }
        if self.min_threshold >= self.max_threshold {
            return Err(DisciplineError::InvalidRedParams(format!(
                "min threshold {} must be below max threshold {}",
                self.min_threshold, self.max_threshold
            )));
        }
        if !in_unit(self.max_probability) {
            return Err(DisciplineError::InvalidRedParams(format!(
                "max probability must lie in [0, 1], got {}",
                self.max_probability
            )));
        }
        Ok(())
    }
}

#[cfg_attr(
    feature = "serde",
    derive(Deserialize, Serialize),
    serde(tag = "type", rename_all = "snake_case")
)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisciplineKind {
    TailDrop,
    Red(RedParams),
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Discipline {
    pub name: String,
    pub kind: DisciplineKind,
}

#[derive(Debug)]
pub struct DisciplineCatalog {
    disciplines: Vec<Discipline>,
}

impl Default for DisciplineCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl DisciplineCatalog {
    /// A catalog holding only the `taildrop` discipline.
    pub fn new() -> Self {
        Self {
            disciplines: vec![Discipline {
                name: TAIL_DROP.to_string(),
                kind: DisciplineKind::TailDrop,
            }],
        }
    }

    /// Register a parameterless (tail-drop) discipline.
    pub fn register(&mut self, name: &str) -> Result<(), DisciplineError> {
        if name == RED || self.get(name).is_some() {
            return Err(DisciplineError::DuplicateDiscipline(name.to_string()));
        }
        debug!(name, "Register tail-drop discipline");
        self.disciplines.push(Discipline {
            name: name.to_string(),
            kind: DisciplineKind::TailDrop,
        });
        Ok(())
    }

    /// Register the `red` discipline, replacing any previous parameters.
    ///
    /// Queues that already adopted `red` keep the thresholds they were built with.
    pub fn register_red(&mut self, params: RedParams) -> Result<(), DisciplineError> {
        params.validate()?;
        let kind = DisciplineKind::Red(params);
        match self.disciplines.iter_mut().find(|d| d.name == RED) {
            Some(discipline) => {
                info!(before = ?discipline.kind, after = ?kind, "Replace RED parameters");
                discipline.kind = kind;
            }
            None => {
                debug!(?params, "Register RED discipline");
                self.disciplines.push(Discipline {
                    name: RED.to_string(),
                    kind,
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Discipline> {
        self.disciplines.iter().find(|d| d.name == name)
    }

    pub fn resolve(&self, name: &str) -> Result<DisciplineKind, DisciplineError> {
        self.get(name)
            .map(|d| d.kind)
            .ok_or_else(|| DisciplineError::UnknownDiscipline(name.to_string()))
    }

    pub fn list(&self) -> &[Discipline] {
        &self.disciplines
    }
}

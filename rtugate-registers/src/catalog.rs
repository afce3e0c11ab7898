//! Register catalogs.
//!
//! A catalog is the register map of one device model, kept as YAML:
//!
//! ```yaml
//! - name: temperature
//!   start: 100
//!   kind: f32
//! - name: setpoint
//!   start: 110
//!   kind: i16
//!   access: read_write
//!   scale: 0.1
//! ```

use crate::error::RegisterError;
use crate::numeric::NumericRegister;
use crate::register::Register;
use crate::span::RegisterSpan;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Named register definitions for one device model.
#[derive(Debug, Clone, Default)]
pub struct RegisterCatalog {
    registers: Vec<Arc<NumericRegister>>,
}

impl RegisterCatalog {
    /// Builds a catalog, rejecting duplicate names.
    pub fn new(registers: Vec<NumericRegister>) -> Result<Self, RegisterError> {
        let mut seen = HashSet::new();
        for register in &registers {
            if !seen.insert(register.name.as_str()) {
                return Err(RegisterError::DuplicateRegister(register.name.clone()));
            }
        }

        Ok(Self {
            registers: registers.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, RegisterError> {
        let registers: Vec<NumericRegister> = serde_yaml::from_str(yaml)?;
        Self::new(registers)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegisterError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_yaml(&content)?;
        tracing::debug!(
            "loaded {} registers from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&NumericRegister> {
        self.registers
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.registers.iter().map(|r| r.name.as_str())
    }

    /// Builds a span from the named registers, in the order given.
    pub fn span(&self, names: &[&str]) -> Result<RegisterSpan, RegisterError> {
        let mut members: Vec<Arc<dyn Register>> = Vec::with_capacity(names.len());
        for name in names {
            let register = self
                .registers
                .iter()
                .find(|r| r.name == *name)
                .ok_or_else(|| RegisterError::UnknownRegister(name.to_string()))?;
            members.push(register.clone());
        }
        RegisterSpan::new(members)
    }
}

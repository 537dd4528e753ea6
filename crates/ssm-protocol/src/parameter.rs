//! SSM Parameter Definitions
//!
//! A parameter is a run of 1, 2 or 4 bytes of ECU RAM plus the expression
//! that turns the big-endian raw value into an engineering quantity.
//! Switches are ordinary definitions with unit [`DisplayUnit::Switch`],
//! length 1 and a `bit:N` expression.

use crate::error::ParameterError;
use crate::expression::Expression;
use crate::unit::DisplayUnit;
use serde::{Deserialize, Serialize};

/// Largest address expressible in a read request
pub const MAX_ADDRESS: u32 = 0x00FF_FFFF;

/// Vendor storage type of a parameter's raw bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Uint8,
    Uint16,
    Uint32,
    Int8,
    Int16,
    Int32,
    Float,
}

impl StorageType {
    /// Parse a vendor `storagetype` attribute
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "uint8" => Some(StorageType::Uint8),
            "uint16" => Some(StorageType::Uint16),
            "uint32" => Some(StorageType::Uint32),
            "int8" => Some(StorageType::Int8),
            "int16" => Some(StorageType::Int16),
            "int32" => Some(StorageType::Int32),
            "float" => Some(StorageType::Float),
            _ => None,
        }
    }
}

/// Immutable definition of one readable parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDefinition {
    id: String,
    name: String,
    address: u32,
    length: u8,
    expression: String,
    compiled: Expression,
    unit: DisplayUnit,
    storage_type: Option<StorageType>,
}

impl ParameterDefinition {
    /// Build a definition, compiling its expression.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: u32,
        length: u8,
        expression: impl Into<String>,
        unit: DisplayUnit,
    ) -> Result<Self, ParameterError> {
        if !matches!(length, 1 | 2 | 4) {
            return Err(ParameterError::UnsupportedLength(length));
        }
        let last = address
            .checked_add(length as u32 - 1)
            .filter(|last| *last <= MAX_ADDRESS);
        if last.is_none() {
            return Err(ParameterError::AddressOutOfRange(address));
        }

        let expression = expression.into();
        Ok(Self {
            id: id.into(),
            name: name.into(),
            address,
            length,
            compiled: Expression::parse(&expression),
            expression,
            unit,
            storage_type: None,
        })
    }

    /// Boolean switch read from bit `bit` of the byte at `address`
    pub fn switch(
        id: impl Into<String>,
        name: impl Into<String>,
        address: u32,
        bit: u8,
    ) -> Result<Self, ParameterError> {
        if bit > 7 {
            return Err(ParameterError::InvalidBit(bit));
        }
        Self::new(id, name, address, 1, format!("bit:{bit}"), DisplayUnit::Switch)
    }

    /// Attach a vendor storage type
    pub fn with_storage_type(mut self, storage_type: Option<StorageType>) -> Self {
        self.storage_type = storage_type;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn length(&self) -> usize {
        self.length as usize
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn unit(&self) -> DisplayUnit {
        self.unit
    }

    pub fn storage_type(&self) -> Option<StorageType> {
        self.storage_type
    }

    pub fn is_switch(&self) -> bool {
        self.unit == DisplayUnit::Switch
    }

    /// Consecutive single-byte addresses covering this parameter
    pub fn byte_addresses(&self) -> impl Iterator<Item = u32> {
        self.address..self.address + self.length as u32
    }

    /// Big-endian unsigned raw value at `offset`
    pub fn raw_value(&self, bytes: &[u8], offset: usize) -> Option<u32> {
        let end = offset.checked_add(self.length())?;
        let slice = bytes.get(offset..end)?;
        Some(slice.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
    }

    /// Engineering value at `offset`, after storage-type interpretation and
    /// the conversion expression
    pub fn convert(&self, bytes: &[u8], offset: usize) -> Option<f32> {
        let raw = self.raw_value(bytes, offset)?;
        let x = match (self.storage_type, self.length) {
            (Some(StorageType::Float), 4) => f32::from_bits(raw) as f64,
            (Some(StorageType::Int8), 1) => raw as u8 as i8 as f64,
            (Some(StorageType::Int16), 2) => raw as u16 as i16 as f64,
            (Some(StorageType::Int32), 4) => raw as i32 as f64,
            _ => raw as f64,
        };
        Some(self.compiled.apply(x))
    }
}

//! Device tree model
//!
//! A [`DeviceTree`] is a root [`Node`] plus a size limit. Properties and
//! children keep their insertion order; the encoder emits them in that order
//! so the produced blob is stable for a given tree.

use alloc::collections::BTreeSet;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::EncodingError;
use crate::writer::FdtWriter;
use crate::DEFAULT_MAX_SIZE;

/// A physical (base, size) range
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Region {
    pub base: u64,
    pub size: u64,
}

impl Region {
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }
}

/// Value of a property before encoding.
///
/// The flattened format only stores bytes; these variants describe how a
/// value turns into those bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    /// Zero-length property (a boolean flag)
    Empty,
    /// Raw bytes, copied as-is
    Bytes(Vec<u8>),
    /// UTF-8 text, emitted NUL-terminated
    String(String),
    /// 32-bit cells, emitted big-endian
    Cells(Vec<u32>),
    /// Each value emitted as `cells` big-endian 32-bit cells (1 or 2)
    Sized { values: Vec<u64>, cells: u32 },
    /// (base, size) pairs in the given address and size widths
    Reg {
        regions: Vec<Region>,
        address_cells: u32,
        size_cells: u32,
    },
}

impl PropertyValue {
    pub fn string(value: impl Into<String>) -> Self {
        PropertyValue::String(value.into())
    }

    pub fn u32(value: u32) -> Self {
        PropertyValue::Cells(alloc::vec![value])
    }

    /// Encode the value into its payload bytes.
    ///
    /// `property` is only used to label errors.
    pub fn encode(&self, property: &str) -> Result<Vec<u8>, EncodingError> {
        let mut out = Vec::new();
        match self {
            PropertyValue::Empty => {}
            PropertyValue::Bytes(bytes) => out.extend_from_slice(bytes),
            PropertyValue::String(text) => {
                if text.as_bytes().contains(&0) {
                    return Err(EncodingError::EmbeddedNul {
                        property: property.to_string(),
                    });
                }
                out.extend_from_slice(text.as_bytes());
                out.push(0);
            }
            PropertyValue::Cells(cells) => {
                for cell in cells {
                    out.extend_from_slice(&cell.to_be_bytes());
                }
            }
            PropertyValue::Sized { values, cells } => {
                for value in values {
                    push_sized(&mut out, property, *value, *cells)?;
                }
            }
            PropertyValue::Reg {
                regions,
                address_cells,
                size_cells,
            } => {
                for region in regions {
                    push_sized(&mut out, property, region.base, *address_cells)?;
                    push_sized(&mut out, property, region.size, *size_cells)?;
                }
            }
        }
        Ok(out)
    }
}

/// Append `value` as `cells` big-endian cells.
fn push_sized(
    out: &mut Vec<u8>,
    property: &str,
    value: u64,
    cells: u32,
) -> Result<(), EncodingError> {
    match cells {
        1 => {
            let cell = u32::try_from(value).map_err(|_| EncodingError::CellOverflow {
                property: property.to_string(),
                value,
                cells,
            })?;
            out.extend_from_slice(&cell.to_be_bytes());
        }
        2 => out.extend_from_slice(&value.to_be_bytes()),
        _ => {
            return Err(EncodingError::UnsupportedCellWidth {
                property: property.to_string(),
                cells,
            })
        }
    }
    Ok(())
}

/// A named property
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

/// A device tree node
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Node {
    /// Node name, including any `@unit-address`. Empty for the root.
    pub name: String,
    pub properties: Vec<Property>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    /// The unnamed root node
    pub fn root() -> Self {
        Self::new("")
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.push(Property {
            name: name.into(),
            value,
        });
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Emit this node and its subtree into `writer`.
    fn write_into(&self, writer: &mut FdtWriter) -> Result<(), EncodingError> {
        let token = writer.begin_node(&self.name)?;

        let mut seen = BTreeSet::new();
        for property in &self.properties {
            if !seen.insert(property.name.as_str()) {
                return Err(EncodingError::DuplicateProperty {
                    node: self.name.clone(),
                    property: property.name.clone(),
                });
            }
            writer.property(&property.name, &property.value)?;
        }

        let mut seen = BTreeSet::new();
        for child in &self.children {
            if child.name.is_empty() {
                return Err(EncodingError::InvalidNodeName(String::new()));
            }
            if !seen.insert(child.name.as_str()) {
                return Err(EncodingError::DuplicateNode(child.name.clone()));
            }
            child.write_into(writer)?;
        }

        writer.end_node(token)
    }
}

/// A complete tree ready for encoding
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceTree {
    pub root: Node,
    /// Encoding fails if the blob would be larger than this
    pub max_size: usize,
}

impl DeviceTree {
    pub fn new(root: Node) -> Self {
        Self {
            root,
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Encode the tree into a flattened blob.
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        if !self.root.name.is_empty() {
            return Err(EncodingError::InvalidNodeName(self.root.name.clone()));
        }
        let mut writer = FdtWriter::new(self.max_size)?;
        self.root.write_into(&mut writer)?;
        writer.finish()
    }
}

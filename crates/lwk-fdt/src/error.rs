//! Device tree encoding errors.

use alloc::string::String;
use core::fmt;

/// Errors produced while encoding a device tree.
///
/// Any of these aborts boot before a single execution context starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncodingError {
    /// A value does not fit the declared cell width
    CellOverflow {
        /// Property holding the value
        property: String,
        /// The offending value
        value: u64,
        /// Declared width in 32-bit cells
        cells: u32,
    },

    /// Only one- and two-cell values are representable
    UnsupportedCellWidth {
        property: String,
        cells: u32,
    },

    /// String properties are NUL-terminated, so they cannot contain NUL
    EmbeddedNul {
        property: String,
    },

    /// Node name violates the devicetree character set or length
    InvalidNodeName(String),

    /// Property name violates the devicetree character set or length
    InvalidPropertyName(String),

    /// Two properties of one node share a name
    DuplicateProperty {
        node: String,
        property: String,
    },

    /// Two children of one node share a name
    DuplicateNode(String),

    /// Encoded blob exceeds the declared maximum
    TooLarge {
        size: usize,
        max: usize,
    },

    /// Any other failure reported by the underlying writer
    Writer(String),
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingError::CellOverflow {
                property,
                value,
                cells,
            } => write!(
                f,
                "property '{}': value {:#x} does not fit in {} cell(s)",
                property, value, cells
            ),
            EncodingError::UnsupportedCellWidth { property, cells } => write!(
                f,
                "property '{}': unsupported cell width {}",
                property, cells
            ),
            EncodingError::EmbeddedNul { property } => {
                write!(f, "property '{}': string contains NUL", property)
            }
            EncodingError::InvalidNodeName(name) => write!(f, "invalid node name '{}'", name),
            EncodingError::InvalidPropertyName(name) => {
                write!(f, "invalid property name '{}'", name)
            }
            EncodingError::DuplicateProperty { node, property } => write!(
                f,
                "node '{}' has duplicate property '{}'",
                node, property
            ),
            EncodingError::DuplicateNode(name) => write!(f, "duplicate node '{}'", name),
            EncodingError::TooLarge { size, max } => write!(
                f,
                "device tree is {} bytes, maximum is {} bytes",
                size, max
            ),
            EncodingError::Writer(msg) => write!(f, "fdt writer: {}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EncodingError {}

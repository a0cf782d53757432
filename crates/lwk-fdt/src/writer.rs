//! Checked FDT writer
//!
//! [`FdtWriter`] wraps [`vm_fdt::FdtWriter`]: properties are given as
//! [`PropertyValue`]s and coerced to bytes here, writer errors are turned
//! into [`EncodingError`]s that name the offending node or property, and
//! [`FdtWriter::finish`] enforces a maximum blob size.
//!
//! ```ignore
//! let mut fdt = FdtWriter::new(DEFAULT_MAX_SIZE)?;
//! let root = fdt.begin_node("")?;
//! let chosen = fdt.begin_node("chosen")?;
//! fdt.property("bootargs", &PropertyValue::string("console=hvc0"))?;
//! fdt.end_node(chosen)?;
//! fdt.end_node(root)?;
//! let blob = fdt.finish()?;
//! ```

use alloc::string::ToString;
use alloc::vec::Vec;

use crate::error::EncodingError;
use crate::tree::PropertyValue;

/// Returned by [`FdtWriter::begin_node`]; must be handed back to `end_node`.
#[must_use]
#[derive(Debug)]
pub struct NodeToken(vm_fdt::FdtWriterNode);

pub struct FdtWriter {
    inner: vm_fdt::FdtWriter,
    max_size: usize,
}

impl FdtWriter {
    pub fn new(max_size: usize) -> Result<Self, EncodingError> {
        Ok(Self {
            inner: vm_fdt::FdtWriter::new().map_err(writer_error)?,
            max_size,
        })
    }

    /// Open a node. The first node opened is the root and is unnamed.
    pub fn begin_node(&mut self, name: &str) -> Result<NodeToken, EncodingError> {
        self.inner
            .begin_node(name)
            .map(NodeToken)
            .map_err(|e| match e {
                vm_fdt::Error::InvalidNodeName => EncodingError::InvalidNodeName(name.to_string()),
                other => writer_error(other),
            })
    }

    /// Close the node opened with `token`.
    pub fn end_node(&mut self, token: NodeToken) -> Result<(), EncodingError> {
        self.inner.end_node(token.0).map_err(writer_error)
    }

    /// Add a property to the innermost open node.
    pub fn property(&mut self, name: &str, value: &PropertyValue) -> Result<(), EncodingError> {
        let payload = value.encode(name)?;
        self.inner
            .property(name, &payload)
            .map_err(|e| match e {
                vm_fdt::Error::InvalidPropertyName => {
                    EncodingError::InvalidPropertyName(name.to_string())
                }
                other => writer_error(other),
            })
    }

    /// Lay out the blob, failing if it is larger than the maximum.
    pub fn finish(self) -> Result<Vec<u8>, EncodingError> {
        let blob = self.inner.finish().map_err(writer_error)?;
        if blob.len() > self.max_size {
            return Err(EncodingError::TooLarge {
                size: blob.len(),
                max: self.max_size,
            });
        }
        Ok(blob)
    }
}

fn writer_error(e: vm_fdt::Error) -> EncodingError {
    EncodingError::Writer(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn be32(blob: &[u8], offset: usize) -> u32 {
        u32::from_be_bytes([
            blob[offset],
            blob[offset + 1],
            blob[offset + 2],
            blob[offset + 3],
        ])
    }

    #[test]
    fn test_header_layout() {
        let mut fdt = FdtWriter::new(1024).unwrap();
        let root = fdt.begin_node("").unwrap();
        fdt.property("a", &PropertyValue::u32(1)).unwrap();
        fdt.end_node(root).unwrap();
        let blob = fdt.finish().unwrap();

        assert_eq!(be32(&blob, 0), 0xd00d_feed);
        assert_eq!(be32(&blob, 4) as usize, blob.len());
        assert_eq!(be32(&blob, 8) % 4, 0, "structure block alignment");
        assert_eq!(be32(&blob, 16) % 8, 0, "reservation map alignment");
        assert_eq!(be32(&blob, 20), 17);
        assert_eq!(be32(&blob, 24), 16);
        // strings block closes the blob
        assert_eq!(be32(&blob, 12) + be32(&blob, 32), be32(&blob, 4));
    }

    #[test]
    fn test_property_names_interned_once() {
        let mut fdt = FdtWriter::new(1024).unwrap();
        let root = fdt.begin_node("").unwrap();
        let a = fdt.begin_node("a").unwrap();
        fdt.property("reg", &PropertyValue::u32(1)).unwrap();
        fdt.end_node(a).unwrap();
        let b = fdt.begin_node("b").unwrap();
        fdt.property("reg", &PropertyValue::u32(2)).unwrap();
        fdt.end_node(b).unwrap();
        fdt.end_node(root).unwrap();
        let blob = fdt.finish().unwrap();

        let off_strings = be32(&blob, 12) as usize;
        let size_strings = be32(&blob, 32) as usize;
        assert_eq!(&blob[off_strings..off_strings + size_strings], b"reg\0");
    }

    #[test]
    fn test_invalid_names_are_reported_by_name() {
        let mut fdt = FdtWriter::new(1024).unwrap();
        let _root = fdt.begin_node("").unwrap();
        assert_eq!(
            fdt.begin_node("bad name").unwrap_err(),
            EncodingError::InvalidNodeName("bad name".into())
        );
        assert_eq!(
            fdt.property("a=b", &PropertyValue::Empty).unwrap_err(),
            EncodingError::InvalidPropertyName("a=b".into())
        );
    }

    #[test]
    fn test_coercion_errors_come_before_the_writer() {
        let mut fdt = FdtWriter::new(1024).unwrap();
        let _root = fdt.begin_node("").unwrap();
        let value = PropertyValue::Sized {
            values: vec![1 << 40],
            cells: 1,
        };
        assert!(matches!(
            fdt.property("wide", &value),
            Err(EncodingError::CellOverflow { cells: 1, .. })
        ));
    }

    #[test]
    fn test_finish_with_open_node_fails() {
        let mut fdt = FdtWriter::new(1024).unwrap();
        let _root = fdt.begin_node("").unwrap();
        assert!(matches!(fdt.finish(), Err(EncodingError::Writer(_))));
    }

    #[test]
    fn test_too_large() {
        let mut fdt = FdtWriter::new(128).unwrap();
        let root = fdt.begin_node("").unwrap();
        fdt.property("blob", &PropertyValue::Bytes(vec![0u8; 256]))
            .unwrap();
        fdt.end_node(root).unwrap();
        assert!(matches!(
            fdt.finish(),
            Err(EncodingError::TooLarge { max: 128, .. })
        ));
    }
}

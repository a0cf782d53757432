//! Encoded trees read back through an independent FDT parser

use fdt::node::FdtNode;
use fdt::Fdt;
use lwk_fdt::{BootInfo, DeviceTree, Node, PropertyValue, RNG_SEED_LEN};

/// Compare an encoded model against what the parser sees.
fn assert_same_structure(expected: &Node, actual: &FdtNode) {
    let properties: Vec<_> = actual.properties().collect();
    assert_eq!(expected.properties.len(), properties.len(), "{}", expected.name);
    for (property, decoded) in expected.properties.iter().zip(&properties) {
        assert_eq!(property.name, decoded.name);
        assert_eq!(property.value.encode(&property.name).unwrap(), decoded.value);
    }

    let children: Vec<_> = actual.children().collect();
    assert_eq!(expected.children.len(), children.len(), "{}", expected.name);
    for (child, decoded) in expected.children.iter().zip(&children) {
        assert_eq!(child.name, decoded.name);
        assert_same_structure(child, decoded);
    }
}

fn sample_tree() -> DeviceTree {
    let cpus = Node::new("cpus")
        .with_property("#address-cells", PropertyValue::u32(1))
        .with_property("#size-cells", PropertyValue::u32(0))
        .with_child(Node::new("cpu@0").with_property("reg", PropertyValue::u32(0)))
        .with_child(
            Node::new("cpu@1")
                .with_property("reg", PropertyValue::u32(1))
                .with_property("enable-method", PropertyValue::string("spin")),
        );

    let root = Node::root()
        .with_property("#address-cells", PropertyValue::u32(2))
        .with_property("#size-cells", PropertyValue::u32(2))
        .with_property("compatible", PropertyValue::string("host,wasm"))
        .with_property("dma-coherent", PropertyValue::Empty)
        .with_property("odd", PropertyValue::Bytes(vec![1, 2, 3]))
        .with_property(
            "wide",
            PropertyValue::Sized {
                values: vec![0xdead_beef_0000_0001, 2],
                cells: 2,
            },
        )
        .with_child(cpus)
        .with_child(Node::new("chosen").with_property("bootargs", PropertyValue::string("a b c")))
        .with_child(Node::new("aliases"));

    DeviceTree::new(root)
}

#[test]
fn test_roundtrip_structure() {
    let tree = sample_tree();
    let blob = tree.encode().unwrap();
    let fdt = Fdt::new(&blob).unwrap();

    assert_eq!(fdt.total_size(), blob.len());
    assert_same_structure(&tree.root, &fdt.find_node("/").unwrap());
}

#[test]
fn test_unit_addresses_resolve() {
    let blob = sample_tree().encode().unwrap();
    let fdt = Fdt::new(&blob).unwrap();

    let cpu1 = fdt.find_node("/cpus/cpu@1").unwrap();
    assert_eq!(cpu1.property("reg").unwrap().as_usize(), Some(1));
    assert_eq!(
        cpu1.property("enable-method").unwrap().as_str(),
        Some("spin")
    );
}

#[test]
fn test_boot_properties_are_byte_exact() {
    let mut seed = [0u8; RNG_SEED_LEN];
    for (i, byte) in seed.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_mul(37);
    }
    let bootargs = "console=hvc0 root=/dev/vda  \u{00e9}";
    let blob = BootInfo::new(bootargs, 128 * 65536, seed).encode().unwrap();

    let fdt = Fdt::new(&blob).unwrap();
    let chosen = fdt.find_node("/chosen").unwrap();

    let mut expected_args = bootargs.as_bytes().to_vec();
    expected_args.push(0);
    assert_eq!(chosen.property("bootargs").unwrap().value, &expected_args[..]);
    assert_eq!(chosen.property("rng-seed").unwrap().value, &seed[..]);
}

#[test]
fn test_empty_bootargs() {
    let blob = BootInfo::new("", 65536, [0; RNG_SEED_LEN]).encode().unwrap();
    let fdt = Fdt::new(&blob).unwrap();
    let chosen = fdt.find_node("/chosen").unwrap();
    assert_eq!(chosen.property("bootargs").unwrap().value, &[0u8][..]);
}

//! Test-only helpers: build small, well-formed DTB blobs in memory.

use std::collections::HashMap;

use crate::fdt::{FDT_BEGIN_NODE, FDT_END, FDT_END_NODE, FDT_MAGIC, FDT_PROP, HDR_SIZE};

/// A node in a throwaway device tree used to synthesize test blobs.
#[derive(Debug, Clone)]
pub struct TestNode {
    pub name: String,
    pub props: Vec<(String, Vec<u8>)>,
    pub children: Vec<TestNode>,
}

impl TestNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            props: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn prop(mut self, name: &str, value: &[u8]) -> Self {
        self.props.push((name.to_string(), value.to_vec()));
        self
    }

    /// String property with the trailing NUL the FDT text convention requires.
    pub fn prop_str(self, name: &str, value: &str) -> Self {
        let mut v = value.as_bytes().to_vec();
        v.push(0);
        self.prop(name, &v)
    }

    pub fn child(mut self, node: TestNode) -> Self {
        self.children.push(node);
        self
    }
}

struct Serializer {
    struct_buf: Vec<u8>,
    strings_buf: Vec<u8>,
    string_map: HashMap<String, u32>,
}

impl Serializer {
    fn write_u32(&mut self, v: u32) {
        self.struct_buf.extend_from_slice(&v.to_be_bytes());
    }

    fn intern_string(&mut self, s: &str) -> u32 {
        if let Some(&off) = self.string_map.get(s) {
            return off;
        }
        let off = self.strings_buf.len() as u32;
        self.strings_buf.extend_from_slice(s.as_bytes());
        self.strings_buf.push(0);
        self.string_map.insert(s.to_string(), off);
        off
    }

    fn serialize_node(&mut self, node: &TestNode) {
        self.write_u32(FDT_BEGIN_NODE);
        self.struct_buf.extend_from_slice(node.name.as_bytes());
        self.struct_buf.push(0);
        while self.struct_buf.len() % 4 != 0 {
            self.struct_buf.push(0);
        }
        for (name, value) in &node.props {
            self.write_u32(FDT_PROP);
            self.write_u32(value.len() as u32);
            let nameoff = self.intern_string(name);
            self.write_u32(nameoff);
            self.struct_buf.extend_from_slice(value);
            while self.struct_buf.len() % 4 != 0 {
                self.struct_buf.push(0);
            }
        }
        for child in &node.children {
            self.serialize_node(child);
        }
        self.write_u32(FDT_END_NODE);
    }
}

/// Serialize `root` into a v17 blob, with `extra_space` bytes of trailing
/// padding counted into totalsize.
pub fn build_dtb(root: &TestNode, extra_space: usize) -> Vec<u8> {
    let mut ser = Serializer {
        struct_buf: Vec::new(),
        strings_buf: Vec::new(),
        string_map: HashMap::new(),
    };
    ser.serialize_node(root);
    ser.write_u32(FDT_END);
    assemble(&ser.struct_buf, &ser.strings_buf, extra_space)
}

/// Build a blob around hand-crafted structure/strings block bytes, for tests
/// that need deliberately malformed content.
pub fn raw_blob(struct_block: &[u8], strings_block: &[u8]) -> Vec<u8> {
    assemble(struct_block, strings_block, 0)
}

fn assemble(struct_data: &[u8], strings_data: &[u8], extra_space: usize) -> Vec<u8> {
    let mem_rsvmap = [0u8; 16];
    let off_mem_rsvmap = HDR_SIZE as u32;
    let off_dt_struct = off_mem_rsvmap + mem_rsvmap.len() as u32;
    let off_dt_strings = off_dt_struct + struct_data.len() as u32;
    let totalsize = off_dt_strings + strings_data.len() as u32 + extra_space as u32;

    let mut out = Vec::with_capacity(totalsize as usize);
    out.extend_from_slice(&FDT_MAGIC.to_be_bytes());
    out.extend_from_slice(&totalsize.to_be_bytes());
    out.extend_from_slice(&off_dt_struct.to_be_bytes());
    out.extend_from_slice(&off_dt_strings.to_be_bytes());
    out.extend_from_slice(&off_mem_rsvmap.to_be_bytes());
    out.extend_from_slice(&17u32.to_be_bytes());
    out.extend_from_slice(&16u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&(strings_data.len() as u32).to_be_bytes());
    out.extend_from_slice(&(struct_data.len() as u32).to_be_bytes());
    out.extend_from_slice(&mem_rsvmap);
    out.extend_from_slice(struct_data);
    out.extend_from_slice(strings_data);
    out.resize(totalsize as usize, 0);
    out
}

//! Node model (C2): branch/leaf nodes carrying sorted key/value pairs and
//! child-page pointers, plus overflow-page chaining for oversized payloads.
//!
//! Grounded in `cannondb/node.py`'s `BNode`/`OverflowNode`/`KeyValPair`,
//! with the cyclic tree/handler back-reference removed per the
//! REDESIGN FLAGS (`spec.md` §9): a node is plain data. Any operation
//! that needs to allocate, read, or deprecate a page takes an explicit
//! `&mut impl PageIo` parameter instead of calling back into a stored
//! tree/handler reference. Structural rebalancing (split/merge/rotate)
//! lives here as pure functions over pairs/children; the engine (C6)
//! decides *which* sibling to rebalance against and persists the result
//! through the file handler (C5).

use crate::codec::Value;
use crate::errors::{DbError, DbResult};
use crate::layout::*;

/// One logical row, fixed-width encoded per `spec.md` §3:
/// `[key_len(2)|key_bytes(key_size)|key_type(1)|value_len(4)|value_bytes(value_size)|value_type(1)]`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValPair {
    pub key: Value,
    pub value: Value,
}

impl KeyValPair {
    #[must_use]
    pub const fn slot_len(key_size: usize, value_size: usize) -> usize {
        KEY_LENGTH_LIMIT + key_size + CODEC_TYPE_LENGTH_LIMIT + VALUE_LENGTH_LIMIT + value_size
            + CODEC_TYPE_LENGTH_LIMIT
    }

    pub fn encode(&self, key_size: usize, value_size: usize) -> DbResult<Vec<u8>> {
        let key_bytes = self.key.serialize()?;
        let value_bytes = self.value.serialize()?;
        if key_bytes.len() > key_size {
            return Err(DbError::ValueSerializationError(format!(
                "key of {} bytes exceeds key_size {key_size}",
                key_bytes.len()
            )));
        }
        if value_bytes.len() > value_size {
            return Err(DbError::ValueSerializationError(format!(
                "value of {} bytes exceeds value_size {value_size}",
                value_bytes.len()
            )));
        }
        let mut out = Vec::with_capacity(Self::slot_len(key_size, value_size));
        out.extend_from_slice(&(key_bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(&key_bytes);
        out.resize(out.len() + (key_size - key_bytes.len()), 0);
        out.push(self.key.type_tag());
        out.extend_from_slice(&(value_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&value_bytes);
        out.resize(out.len() + (value_size - value_bytes.len()), 0);
        out.push(self.value.type_tag());
        Ok(out)
    }

    pub fn decode(bytes: &[u8], key_size: usize, value_size: usize) -> DbResult<Self> {
        if bytes.len() != Self::slot_len(key_size, value_size) {
            return Err(DbError::CorruptData("key/value slot has wrong length".into()));
        }
        let mut offset = 0;
        let key_len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        offset += KEY_LENGTH_LIMIT;
        if key_len > key_size {
            return Err(DbError::CorruptData("key_len exceeds key_size".into()));
        }
        let key_bytes = &bytes[offset..offset + key_len];
        offset += key_size;
        let key_type = bytes[offset];
        offset += CODEC_TYPE_LENGTH_LIMIT;
        let value_len = u32::from_be_bytes(bytes[offset..offset + VALUE_LENGTH_LIMIT].try_into().unwrap())
            as usize;
        offset += VALUE_LENGTH_LIMIT;
        if value_len > value_size {
            return Err(DbError::CorruptData("value_len exceeds value_size".into()));
        }
        let value_bytes = &bytes[offset..offset + value_len];
        offset += value_size;
        let value_type = bytes[offset];

        let key = Value::deserialize(key_type, key_bytes)?;
        let value = Value::deserialize(value_type, value_bytes)?;
        Ok(Self { key, value })
    }
}

/// Raw page storage, as seen by node (de)serialization. Implemented by
/// the file handler (C5); a node never stores this reference, only
/// receives it as a call parameter.
pub trait PageIo {
    fn page_size(&self) -> usize;
    fn alloc_page(&mut self) -> DbResult<u32>;
    fn write_page_bytes(&mut self, page: u32, bytes: &[u8]) -> DbResult<()>;
    fn read_page_bytes(&mut self, page: u32) -> DbResult<Vec<u8>>;
    fn deprecate_page(&mut self, page: u32) -> DbResult<()>;
}

/// A branch or leaf node. `children.is_empty()` means leaf;
/// otherwise `children.len() == pairs.len() + 1`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BNode {
    pub pairs: Vec<KeyValPair>,
    pub children: Vec<u32>,
}

impl BNode {
    #[must_use]
    pub fn leaf() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn encode_contents(&self, key_size: usize, value_size: usize) -> DbResult<(Vec<u8>, Vec<u8>)> {
        let mut pairs_bytes = Vec::new();
        for pair in &self.pairs {
            pairs_bytes.extend(pair.encode(key_size, value_size)?);
        }
        let mut children_bytes = Vec::new();
        for &child in &self.children {
            children_bytes.extend_from_slice(&child.to_be_bytes());
        }
        Ok((pairs_bytes, children_bytes))
    }

    /// Dump this node as a page image, chaining overflow pages through
    /// `io` as needed. Returns the head page's `page_size`-byte image;
    /// the caller is responsible for writing it at the node's own page
    /// number (a node doesn't know its own page number either).
    pub fn dump(&self, key_size: usize, value_size: usize, io: &mut impl PageIo) -> DbResult<Vec<u8>> {
        let page_size = io.page_size();
        let (pairs_bytes, children_bytes) = self.encode_contents(key_size, value_size)?;
        if pairs_bytes.len() > u16::MAX as usize || children_bytes.len() > u16::MAX as usize {
            return Err(DbError::CorruptData("node contents exceed length field width".into()));
        }

        let mut body = Vec::new();
        body.push(PAGE_TYPE_NORMAL);
        body.extend_from_slice(&(pairs_bytes.len() as u16).to_be_bytes());
        body.extend_from_slice(&(children_bytes.len() as u16).to_be_bytes());
        let next_overflow_offset = body.len();
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&pairs_bytes);
        body.extend_from_slice(&children_bytes);

        let header_len = next_overflow_offset + PAGE_ADDRESS_LIMIT;
        if body.len() <= page_size {
            body.resize(page_size, 0);
            return Ok(body);
        }

        let tail = body.split_off(header_len + (page_size - header_len));
        let next_page = write_overflow_chain(&tail, page_size, io)?;
        body[next_overflow_offset..next_overflow_offset + PAGE_ADDRESS_LIMIT]
            .copy_from_slice(&next_page.to_be_bytes());
        Ok(body)
    }

    /// Parse a node from its head page image plus any overflow chain
    /// reachable from it.
    pub fn load(
        head_bytes: &[u8],
        key_size: usize,
        value_size: usize,
        io: &mut impl PageIo,
    ) -> DbResult<Self> {
        if head_bytes.first() != Some(&PAGE_TYPE_NORMAL) {
            return Err(DbError::CorruptData("expected NORMAL page type".into()));
        }
        let pairs_len = u16::from_be_bytes([head_bytes[1], head_bytes[2]]) as usize;
        let children_len = u16::from_be_bytes([head_bytes[3], head_bytes[4]]) as usize;
        let next_overflow = u32::from_be_bytes(
            head_bytes[5..5 + PAGE_ADDRESS_LIMIT].try_into().unwrap(),
        );

        let mut rest = head_bytes[5 + PAGE_ADDRESS_LIMIT..].to_vec();
        if next_overflow != 0 {
            rest.extend(read_overflow_chain(next_overflow, io)?);
        }
        if rest.len() < pairs_len + children_len {
            return Err(DbError::CorruptData("node payload shorter than declared lengths".into()));
        }

        let pairs_bytes = &rest[..pairs_len];
        let children_bytes = &rest[pairs_len..pairs_len + children_len];

        let slot_len = KeyValPair::slot_len(key_size, value_size);
        if slot_len != 0 && pairs_bytes.len() % slot_len != 0 {
            return Err(DbError::CorruptData("pairs region not a multiple of slot length".into()));
        }
        let pairs = pairs_bytes
            .chunks(slot_len)
            .map(|c| KeyValPair::decode(c, key_size, value_size))
            .collect::<DbResult<Vec<_>>>()?;

        if children_bytes.len() % PAGE_ADDRESS_LIMIT != 0 {
            return Err(DbError::CorruptData(
                "children region not a multiple of page address width".into(),
            ));
        }
        let children = children_bytes
            .chunks(PAGE_ADDRESS_LIMIT)
            .map(|c| u32::from_be_bytes(c.try_into().unwrap()))
            .collect();

        Ok(Self { pairs, children })
    }

    /// **Split** (`spec.md` §4.2): `mid = |contents| / 2` is the
    /// separator; the right half (and, for branches, the matching
    /// children) becomes a new sibling; `self` keeps the left half.
    #[must_use]
    pub fn split(&mut self) -> (KeyValPair, Self) {
        let mid = self.pairs.len() / 2;
        let separator = self.pairs[mid].clone();
        let sibling_pairs = self.pairs.split_off(mid + 1);
        self.pairs.truncate(mid);
        let sibling_children = if self.is_leaf() { Vec::new() } else { self.children.split_off(mid + 1) };
        let sibling = Self { pairs: sibling_pairs, children: sibling_children };
        (separator, sibling)
    }

    /// **Merge**: fold `separator` and `right`'s contents into `self`.
    pub fn merge_with_right(&mut self, separator: KeyValPair, mut right: Self) {
        self.pairs.push(separator);
        self.pairs.append(&mut right.pairs);
        self.children.append(&mut right.children);
    }
}

/// **Borrow (lateral)** from a left sibling through the parent
/// separator: the left sibling's last pair rotates up through the
/// parent slot into `recipient`'s front; if branches, the matching
/// child pointer rotates too. Returns the new parent separator.
pub fn rotate_from_left(recipient: &mut BNode, left: &mut BNode, parent_sep: KeyValPair) -> KeyValPair {
    let Some(borrowed) = left.pairs.pop() else {
        return parent_sep;
    };
    recipient.pairs.insert(0, parent_sep);
    if !left.is_leaf() {
        let child = left.children.pop().expect("branch has one more child than pairs");
        recipient.children.insert(0, child);
    }
    borrowed
}

/// **Borrow (lateral)** from a right sibling through the parent
/// separator: symmetric to [`rotate_from_left`].
pub fn rotate_from_right(recipient: &mut BNode, right: &mut BNode, parent_sep: KeyValPair) -> KeyValPair {
    if right.pairs.is_empty() {
        return parent_sep;
    }
    let borrowed = right.pairs.remove(0);
    recipient.pairs.push(parent_sep);
    if !right.is_leaf() {
        let child = right.children.remove(0);
        recipient.children.push(child);
    }
    borrowed
}

fn write_overflow_chain(tail: &[u8], page_size: usize, io: &mut impl PageIo) -> DbResult<u32> {
    let page = io.alloc_page()?;
    let header_len = NODE_TYPE_LENGTH_LIMIT + PAGE_LENGTH_LIMIT + PAGE_ADDRESS_LIMIT;
    let capacity = page_size - header_len;
    let (chunk, rest) = if tail.len() > capacity { tail.split_at(capacity) } else { (tail, &[][..]) };
    let next_page = if rest.is_empty() { 0 } else { write_overflow_chain(rest, page_size, io)? };

    let mut image = Vec::with_capacity(page_size);
    image.push(PAGE_TYPE_OVERFLOW);
    image.extend_from_slice(&write_u24(chunk.len() as u32));
    image.extend_from_slice(&next_page.to_be_bytes());
    image.extend_from_slice(chunk);
    image.resize(page_size, 0);
    io.write_page_bytes(page, &image)?;
    Ok(page)
}

fn read_overflow_chain(mut page: u32, io: &mut impl PageIo) -> DbResult<Vec<u8>> {
    let mut out = Vec::new();
    while page != 0 {
        let bytes = io.read_page_bytes(page)?;
        if bytes.first() != Some(&PAGE_TYPE_OVERFLOW) {
            return Err(DbError::CorruptData("expected OVERFLOW page type".into()));
        }
        let chunk_len = read_u24(&bytes[1..1 + PAGE_LENGTH_LIMIT]) as usize;
        let header_len = NODE_TYPE_LENGTH_LIMIT + PAGE_LENGTH_LIMIT + PAGE_ADDRESS_LIMIT;
        let next = u32::from_be_bytes(bytes[1 + PAGE_LENGTH_LIMIT..header_len].try_into().unwrap());
        out.extend_from_slice(&bytes[header_len..header_len + chunk_len]);
        page = next;
    }
    Ok(out)
}

/// Deprecate every page in an overflow chain (e.g. because the node
/// that owned it was re-dumped with a shorter payload).
pub fn deprecate_overflow_chain(mut page: u32, io: &mut impl PageIo) -> DbResult<()> {
    while page != 0 {
        let bytes = io.read_page_bytes(page)?;
        if bytes.first() != Some(&PAGE_TYPE_OVERFLOW) {
            return Err(DbError::CorruptData("expected OVERFLOW page type".into()));
        }
        let header_len = NODE_TYPE_LENGTH_LIMIT + PAGE_LENGTH_LIMIT + PAGE_ADDRESS_LIMIT;
        let next = u32::from_be_bytes(bytes[1 + PAGE_LENGTH_LIMIT..header_len].try_into().unwrap());
        io.deprecate_page(page)?;
        page = next;
    }
    Ok(())
}

/// Read the `next_overflow` pointer out of a node's head page image
/// without fully parsing the node, so callers can deprecate a node's
/// old overflow chain before re-dumping it.
#[must_use]
pub fn head_next_overflow(head_bytes: &[u8]) -> u32 {
    if head_bytes.len() < 5 + PAGE_ADDRESS_LIMIT {
        return 0;
    }
    u32::from_be_bytes(head_bytes[5..5 + PAGE_ADDRESS_LIMIT].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MemIo {
        page_size: usize,
        next: u32,
        pages: HashMap<u32, Vec<u8>>,
    }

    impl MemIo {
        fn new(page_size: usize) -> Self {
            Self { page_size, next: 1, pages: HashMap::new() }
        }
    }

    impl PageIo for MemIo {
        fn page_size(&self) -> usize {
            self.page_size
        }
        fn alloc_page(&mut self) -> DbResult<u32> {
            let p = self.next;
            self.next += 1;
            Ok(p)
        }
        fn write_page_bytes(&mut self, page: u32, bytes: &[u8]) -> DbResult<()> {
            self.pages.insert(page, bytes.to_vec());
            Ok(())
        }
        fn read_page_bytes(&mut self, page: u32) -> DbResult<Vec<u8>> {
            self.pages.get(&page).cloned().ok_or_else(|| DbError::CorruptData("no such page".into()))
        }
        fn deprecate_page(&mut self, page: u32) -> DbResult<()> {
            if let Some(bytes) = self.pages.get_mut(&page) {
                bytes[0] = PAGE_TYPE_DEPRECATED;
            }
            Ok(())
        }
    }

    fn pair(k: &str, v: i64) -> KeyValPair {
        KeyValPair { key: Value::Str(k.to_string()), value: Value::Int(v) }
    }

    #[test]
    fn slot_round_trip() {
        let p = pair("abc", 42);
        let bytes = p.encode(8, 12).unwrap();
        assert_eq!(bytes.len(), KeyValPair::slot_len(8, 12));
        assert_eq!(KeyValPair::decode(&bytes, 8, 12).unwrap(), p);
    }

    #[test]
    fn oversized_key_is_serialization_error() {
        let p = pair("way too long for an 4-byte key slot", 1);
        assert!(matches!(p.encode(4, 12), Err(DbError::ValueSerializationError(_))));
    }

    #[test]
    fn leaf_node_round_trips_without_overflow() {
        let mut io = MemIo::new(256);
        let node = BNode { pairs: vec![pair("a", 1), pair("b", 2)], children: vec![] };
        let bytes = node.dump(8, 12, &mut io).unwrap();
        assert_eq!(bytes.len(), 256);
        let loaded = BNode::load(&bytes, 8, 12, &mut io).unwrap();
        assert_eq!(loaded, node);
    }

    #[test]
    fn node_dump_load_round_trip_via_overflow() {
        let mut io = MemIo::new(32);
        let node = BNode {
            pairs: (0..10).map(|i| pair(&format!("k{i}"), i)).collect(),
            children: vec![],
        };
        let bytes = node.dump(8, 12, &mut io).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_ne!(head_next_overflow(&bytes), 0);
        let loaded = BNode::load(&bytes, 8, 12, &mut io).unwrap();
        assert_eq!(loaded, node);
    }

    #[test]
    fn split_keeps_invariants() {
        let mut node = BNode { pairs: (0..5).map(|i| pair(&format!("k{i}"), i)).collect(), children: vec![] };
        let (sep, sibling) = node.split();
        assert_eq!(sep.key, Value::Str("k2".into()));
        assert_eq!(node.pairs.len(), 2);
        assert_eq!(sibling.pairs.len(), 2);
    }

    #[test]
    fn rotate_from_left_moves_one_pair_and_child() {
        let mut left = BNode {
            pairs: vec![pair("a", 1), pair("b", 2)],
            children: vec![10, 11, 12],
        };
        let mut recipient = BNode { pairs: vec![pair("d", 4)], children: vec![20, 21] };
        let new_sep = rotate_from_left(&mut recipient, &mut left, pair("c", 3));
        assert_eq!(new_sep.key, Value::Str("b".into()));
        assert_eq!(recipient.pairs.len(), 2);
        assert_eq!(recipient.children, vec![12, 20, 21]);
        assert_eq!(left.pairs.len(), 1);
    }

    #[test]
    fn merge_with_right_combines_contents() {
        let mut left = BNode { pairs: vec![pair("a", 1)], children: vec![10, 11] };
        let right = BNode { pairs: vec![pair("c", 3)], children: vec![12, 13] };
        left.merge_with_right(pair("b", 2), right);
        assert_eq!(left.pairs.len(), 3);
        assert_eq!(left.children, vec![10, 11, 12, 13]);
    }
}

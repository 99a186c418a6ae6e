//! The timestamp proof DAG
//!
//! A [`Timestamp`] is a message together with the attestations that vouch for
//! it directly and the operations that lead to further messages. Child
//! messages are never stored: they are recomputed from the parent message and
//! the edge operation, so a serialized proof carries no redundant digests.
//!
//! Nodes are shared handles. Merkle aggregation makes one tip reachable from
//! many leaves, and anything later merged into that tip is visible through
//! every leaf. Mutation happens on one thread at a time, so the handles use
//! `Rc<RefCell<_>>` rather than atomics and locks.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::fmt::{self, Write as _};
use std::rc::Rc;

use ots_types::{Attestation, ByteReader, ByteWriter, Error, Op, Result};

/// Marks that another branch of the same node follows
pub const FORK_MARKER: u8 = 0xff;

/// Branch tag introducing an attestation
pub const ATTESTATION_TAG: u8 = 0x00;

/// Maximum nesting depth accepted when parsing or merging
pub const RECURSION_LIMIT: usize = 256;

struct Node {
    msg: Vec<u8>,
    attestations: BTreeSet<Attestation>,
    /// Edges in insertion order; an operation appears at most once
    ops: Vec<(Op, Timestamp)>,
}

/// Shared handle to a node of a timestamp proof
#[derive(Clone)]
pub struct Timestamp(Rc<RefCell<Node>>);

impl Timestamp {
    /// A bare node with no attestations and no edges
    pub fn new(msg: impl Into<Vec<u8>>) -> Self {
        Self(Rc::new(RefCell::new(Node {
            msg: msg.into(),
            attestations: BTreeSet::new(),
            ops: Vec::new(),
        })))
    }

    pub fn msg(&self) -> Vec<u8> {
        self.0.borrow().msg.clone()
    }

    /// Attestations in canonical order
    pub fn attestations(&self) -> Vec<Attestation> {
        self.0.borrow().attestations.iter().cloned().collect()
    }

    /// Outgoing edges in insertion order
    pub fn ops(&self) -> Vec<(Op, Timestamp)> {
        self.0.borrow().ops.clone()
    }

    /// True when the node has neither attestations nor edges
    pub fn is_empty(&self) -> bool {
        let node = self.0.borrow();
        node.attestations.is_empty() && node.ops.is_empty()
    }

    /// Whether both handles point at the same node
    pub fn ptr_eq(&self, other: &Timestamp) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Returns false if the attestation was already present
    pub fn add_attestation(&self, attestation: Attestation) -> bool {
        self.0.borrow_mut().attestations.insert(attestation)
    }

    /// Follow `op` from this node, creating the child if the edge is new
    ///
    /// Adding an operation that is already present returns the existing child
    /// untouched.
    pub fn add(&self, op: Op) -> Result<Timestamp> {
        let node = self.0.borrow();
        if let Some((_, child)) = node.ops.iter().find(|(existing, _)| *existing == op) {
            return Ok(child.clone());
        }
        let child = Timestamp::new(op.call(&node.msg)?);
        drop(node);

        self.0.borrow_mut().ops.push((op, child.clone()));
        Ok(child)
    }

    /// Union `other` into this node
    ///
    /// Both nodes must commit to the same message. Attestations and edges are
    /// only ever added, so merging the same proof twice changes nothing the
    /// second time. Merging a node into one of its own descendants can grow
    /// the proof without end, so the walk stops at [`RECURSION_LIMIT`].
    pub fn merge(&self, other: &Timestamp) -> Result<()> {
        self.merge_nested(other, RECURSION_LIMIT)
    }

    fn merge_nested(&self, other: &Timestamp, depth: usize) -> Result<()> {
        if self.ptr_eq(other) {
            return Ok(());
        }
        if depth == 0 {
            return Err(Error::RecursionLimit);
        }

        let (attestations, ops) = {
            let ours = self.0.borrow();
            let theirs = other.0.borrow();
            if ours.msg != theirs.msg {
                return Err(Error::MessageMismatch {
                    ours: hex::encode(&ours.msg),
                    theirs: hex::encode(&theirs.msg),
                });
            }
            (theirs.attestations.clone(), theirs.ops.clone())
        };

        self.0.borrow_mut().attestations.extend(attestations);
        for (op, their_child) in ops {
            self.add(op)?.merge_nested(&their_child, depth - 1)?;
        }
        Ok(())
    }

    /// Point the edge for `op` at an existing node, folding any child the edge
    /// already had into it
    pub fn set_edge(&self, op: Op, child: Timestamp) -> Result<()> {
        let expected = op.call(&self.0.borrow().msg)?;
        if expected != child.0.borrow().msg {
            return Err(Error::MessageMismatch {
                ours: hex::encode(&expected),
                theirs: hex::encode(child.msg()),
            });
        }

        let previous = {
            let mut node = self.0.borrow_mut();
            match node.ops.iter_mut().find(|(o, _)| *o == op) {
                Some((_, slot)) => Some(std::mem::replace(slot, child.clone())),
                None => {
                    node.ops.push((op, child.clone()));
                    None
                }
            }
        };
        match previous {
            Some(previous) => child.merge(&previous),
            None => Ok(()),
        }
    }

    // Edge insertion used by the parser: a repeated operation merges into the
    // existing child instead of creating a second edge.
    fn insert_edge(&self, op: Op, child: Timestamp) -> Result<()> {
        let existing = self
            .0
            .borrow()
            .ops
            .iter()
            .find(|(o, _)| *o == op)
            .map(|(_, c)| c.clone());
        match existing {
            Some(ours) => ours.merge(&child),
            None => {
                self.0.borrow_mut().ops.push((op, child));
                Ok(())
            }
        }
    }

    /// Write the canonical encoding of this node and everything below it
    pub fn serialize(&self, w: &mut ByteWriter) -> Result<()> {
        let node = self.0.borrow();
        if node.attestations.is_empty() && node.ops.is_empty() {
            return Err(Error::EmptyTimestamp);
        }

        let attestations: Vec<&Attestation> = node.attestations.iter().collect();

        // With no edges the last attestation is the final branch
        let forked = if node.ops.is_empty() {
            attestations.len() - 1
        } else {
            attestations.len()
        };

        for attestation in &attestations[..forked] {
            w.write_byte(FORK_MARKER);
            w.write_byte(ATTESTATION_TAG);
            attestation.serialize(w)?;
        }

        if node.ops.is_empty() {
            w.write_byte(ATTESTATION_TAG);
            attestations[forked].serialize(w)?;
            return Ok(());
        }

        let last = node.ops.len() - 1;
        for (i, (op, child)) in node.ops.iter().enumerate() {
            if i < last {
                w.write_byte(FORK_MARKER);
            }
            op.serialize(w);
            child.serialize(w)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut w = ByteWriter::new();
        self.serialize(&mut w)?;
        Ok(w.into_bytes())
    }

    /// Parse a node whose message is already known to the caller
    pub fn deserialize(r: &mut ByteReader<'_>, msg: Vec<u8>) -> Result<Self> {
        Self::deserialize_nested(r, msg, RECURSION_LIMIT)
    }

    /// Parse a complete buffer holding exactly one timestamp for `msg`
    pub fn from_bytes(bytes: &[u8], msg: Vec<u8>) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let timestamp = Self::deserialize(&mut r, msg)?;
        r.assert_eof()?;
        Ok(timestamp)
    }

    fn deserialize_nested(r: &mut ByteReader<'_>, msg: Vec<u8>, depth: usize) -> Result<Self> {
        if depth == 0 {
            return Err(Error::RecursionLimit);
        }
        let timestamp = Timestamp::new(msg);

        let mut tag = r.read_byte()?;
        while tag == FORK_MARKER {
            let branch = r.read_byte()?;
            timestamp.read_branch(r, branch, depth)?;
            tag = r.read_byte()?;
        }
        timestamp.read_branch(r, tag, depth)?;

        Ok(timestamp)
    }

    fn read_branch(&self, r: &mut ByteReader<'_>, tag: u8, depth: usize) -> Result<()> {
        if tag == ATTESTATION_TAG {
            self.add_attestation(Attestation::deserialize(r)?);
            return Ok(());
        }
        let op = Op::deserialize_from_tag(r, tag)?;
        let child_msg = op.call(&self.0.borrow().msg)?;
        let child = Self::deserialize_nested(r, child_msg, depth - 1)?;
        self.insert_edge(op, child)
    }

    /// Every `(message, attestation)` pair reachable from this node
    ///
    /// Nodes carrying several attestations yield one pair per attestation.
    pub fn all_attestations(&self) -> AllAttestations {
        AllAttestations {
            stack: vec![self.clone()],
            found: VecDeque::new(),
        }
    }

    /// Nodes carrying attestations that are reached without passing through
    /// another attested node first
    pub fn directly_verified(&self) -> Vec<Timestamp> {
        let node = self.0.borrow();
        if !node.attestations.is_empty() {
            return vec![self.clone()];
        }
        node.ops
            .iter()
            .flat_map(|(_, child)| child.directly_verified())
            .collect()
    }

    /// True once some reachable attestation is a Bitcoin block attestation
    pub fn is_complete(&self) -> bool {
        self.all_attestations().any(|(_, a)| a.is_bitcoin())
    }

    /// Human-readable rendering of the proof, one line per step
    pub fn str_tree(&self) -> String {
        let mut out = String::new();
        self.write_tree(&mut out, 0);
        out
    }

    fn write_tree(&self, out: &mut String, indent: usize) {
        let node = self.0.borrow();
        let pad = " ".repeat(indent);
        for attestation in &node.attestations {
            let _ = writeln!(out, "{}verify {}", pad, attestation);
        }
        match node.ops.as_slice() {
            [] => {}
            [(op, child)] => {
                let _ = writeln!(out, "{}{}", pad, op);
                child.write_tree(out, indent);
            }
            ops => {
                for (op, child) in ops {
                    let _ = writeln!(out, "{} -> {}", pad, op);
                    child.write_tree(out, indent + 4);
                }
            }
        }
    }
}

/// Deep structural equality; edge order does not matter
impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let a = self.0.borrow();
        let b = other.0.borrow();
        a.msg == b.msg
            && a.attestations == b.attestations
            && a.ops.len() == b.ops.len()
            && a.ops.iter().all(|(op, child)| {
                b.ops
                    .iter()
                    .any(|(other_op, other_child)| op == other_op && child == other_child)
            })
    }
}

impl Eq for Timestamp {}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.0.borrow();
        f.debug_struct("Timestamp")
            .field("msg", &hex::encode(&node.msg))
            .field("attestations", &node.attestations)
            .field("ops", &node.ops)
            .finish()
    }
}

/// Lazy depth-first walk over the attestations of a proof
pub struct AllAttestations {
    stack: Vec<Timestamp>,
    found: VecDeque<(Vec<u8>, Attestation)>,
}

impl Iterator for AllAttestations {
    type Item = (Vec<u8>, Attestation);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pair) = self.found.pop_front() {
                return Some(pair);
            }
            let timestamp = self.stack.pop()?;
            let node = timestamp.0.borrow();
            self.found.extend(
                node.attestations
                    .iter()
                    .map(|a| (node.msg.clone(), a.clone())),
            );
            self.stack
                .extend(node.ops.iter().rev().map(|(_, child)| child.clone()));
        }
    }
}

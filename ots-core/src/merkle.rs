//! Merkle aggregation of many timestamps into one tip
//!
//! Each leaf keeps its own minimal path to the tip made of ordinary
//! append/prepend and digest edges, so attestations later merged into the tip
//! are reachable from every leaf.

use ots_types::{Error, Op, Result};

use crate::timestamp::Timestamp;

/// Concatenate `left` and `right`, then apply `op` to the result
///
/// `left` gains `Append(right.msg)` and `right` gains `Prepend(left.msg)`;
/// both edges share one node, whose `op` child is returned.
pub fn cat_then_op(left: &Timestamp, right: &Timestamp, op: Op) -> Result<Timestamp> {
    let left_msg = left.msg();
    let right_msg = right.msg();

    let right_prepend = right.add(Op::Prepend(left_msg))?;
    // set_edge checks that left.msg ++ right.msg is what both sides produce
    left.set_edge(Op::Append(right_msg), right_prepend.clone())?;

    right_prepend.add(op)
}

pub fn cat_sha256(left: &Timestamp, right: &Timestamp) -> Result<Timestamp> {
    cat_then_op(left, right, Op::sha256())
}

/// Aggregate `leaves` pairwise, left to right, until one tip remains
///
/// An unpaired trailing leaf is carried up to the next level unchanged.
pub fn make_merkle_tree(leaves: &[Timestamp]) -> Result<Timestamp> {
    if leaves.is_empty() {
        return Err(Error::EmptyInput);
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next_level = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            match pair {
                [left, right] => next_level.push(cat_sha256(left, right)?),
                [single] => next_level.push(single.clone()),
                _ => unreachable!("chunks(2) yields one or two items"),
            }
        }
        level = next_level;
    }

    level.pop().ok_or(Error::EmptyInput)
}

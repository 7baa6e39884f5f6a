//! Transform engine.
//!
//! [`transform`] rebases an incoming operation over a prior one that was
//! committed concurrently (same base revision), so that applying
//! `prior` then `transform(incoming, prior)` yields the same content as
//! applying `incoming` then `transform(prior, incoming)`.
//!
//! Component rules (incoming vs prior):
//!
//! | incoming | prior  | rule |
//! |----------|--------|------|
//! | Insert   | Insert | before: unchanged; after: shift by inserted length; equal: smaller author key goes first |
//! | Insert   | Delete | at or before range: unchanged; after range: shift left by deleted length; inside: clamp to range start |
//! | Delete   | Insert | insert at or before start: shift right; insert at or after end: unchanged; inside: split around the inserted text |
//! | Delete   | Delete | drop the overlap, shift left by the part of the prior range lying before |
//!
//! Operations with several components are transformed component by
//! component, carrying the prior operation forward through each step.

use super::operation::{Component, Operation};

/// Rebase `incoming` as if `prior` had already been applied.
///
/// Both operations must have been authored against the same content.
pub fn transform(incoming: &Operation, prior: &Operation) -> Operation {
    let incoming_first = incoming.author_key() < prior.author_key();
    let (components, _) = transform_sequences(&incoming.components, &prior.components, incoming_first);

    Operation {
        components,
        ..incoming.clone()
    }
}

/// Rebase `incoming` over every operation in `priors`, in commit order.
pub fn transform_all<'a>(
    incoming: &Operation,
    priors: impl IntoIterator<Item = &'a Operation>,
) -> Operation {
    priors
        .into_iter()
        .fold(incoming.clone(), |rebased, prior| transform(&rebased, prior))
}

/// Transform two concurrent component sequences against each other.
///
/// Returns `(a', b')` where `a'` applies after `b` and `b'` applies after `a`.
/// `a_first` decides equal-position insert ties in favour of `a`.
pub fn transform_sequences(
    a: &[Component],
    b: &[Component],
    a_first: bool,
) -> (Vec<Component>, Vec<Component>) {
    match (a, b) {
        ([], _) => (Vec::new(), b.to_vec()),
        (_, []) => (a.to_vec(), Vec::new()),
        ([x], [y]) => (
            transform_component(x, y, a_first),
            transform_component(y, x, !a_first),
        ),
        ([_], [y, rest @ ..]) => {
            let (a1, mut b1) = transform_sequences(a, std::slice::from_ref(y), a_first);
            let (a2, rest1) = transform_sequences(&a1, rest, a_first);
            b1.extend(rest1);
            (a2, b1)
        }
        ([x, rest @ ..], _) => {
            let (mut a1, b1) = transform_sequences(std::slice::from_ref(x), b, a_first);
            let (rest1, b2) = transform_sequences(rest, &b1, a_first);
            a1.extend(rest1);
            (a1, b2)
        }
    }
}

/// Rebase a single component over a single prior component.
///
/// Returns more than one component only when a delete range is split by an
/// insert that landed inside it.
pub fn transform_component(
    incoming: &Component,
    prior: &Component,
    incoming_first: bool,
) -> Vec<Component> {
    match (incoming, prior) {
        (
            Component::Insert { position, content },
            Component::Insert {
                position: prior_pos,
                content: prior_content,
            },
        ) => {
            let shift = prior_content.chars().count();
            let position = if position < prior_pos || (position == prior_pos && incoming_first) {
                *position
            } else {
                position + shift
            };
            vec![Component::insert(position, content.clone())]
        }

        (
            Component::Insert { position, content },
            Component::Delete {
                position: del_pos,
                length: del_len,
            },
        ) => {
            let position = if position <= del_pos {
                *position
            } else if *position >= del_pos + del_len {
                position - del_len
            } else {
                *del_pos
            };
            vec![Component::insert(position, content.clone())]
        }

        (
            Component::Delete { position, length },
            Component::Insert {
                position: ins_pos,
                content,
            },
        ) => {
            let shift = content.chars().count();
            let end = position + length;
            if ins_pos <= position {
                vec![Component::delete(position + shift, *length)]
            } else if *ins_pos >= end {
                vec![Component::delete(*position, *length)]
            } else {
                // Skip the inserted text: remove the tail first so the head
                // positions stay valid.
                vec![
                    Component::delete(ins_pos + shift, end - ins_pos),
                    Component::delete(*position, ins_pos - position),
                ]
            }
        }

        (
            Component::Delete { position, length },
            Component::Delete {
                position: prior_pos,
                length: prior_len,
            },
        ) => {
            let end = position + length;
            let prior_end = prior_pos + prior_len;

            let overlap = end.min(prior_end).saturating_sub(*position.max(prior_pos));
            let removed_before = prior_end.min(*position).saturating_sub(*prior_pos);

            vec![Component::delete(position - removed_before, length - overlap)]
        }
    }
}

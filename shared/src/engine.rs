//! State transition rules.
//!
//! `advance` is the function every worker runs for an advance task. It only
//! reads its inputs; randomness for food placement comes from the caller's
//! generator so that tests can seed it.

use crate::model::{Cell, Direction, NextState, Session, SessionId};
use crate::INITIAL_LENGTH;
use rand::seq::SliceRandom;
use rand::Rng;

/// Random draws attempted before falling back to enumerating free cells.
const FOOD_DRAWS: usize = 64;

/// Computes the state that follows `snapshot` after one step.
pub fn advance<R: Rng + ?Sized>(snapshot: &Session, rng: &mut R) -> NextState {
    let mut next = snapshot.current_state();
    if snapshot.terminal {
        return next;
    }

    let Some(head) = snapshot.head() else {
        // Nothing left to move.
        next.terminal = true;
        return next;
    };

    let new_head = head.step(snapshot.direction);
    if !new_head.in_bounds(snapshot.board_size) {
        next.terminal = true;
        return next;
    }

    let mut body = Vec::with_capacity(snapshot.body.len() + 1);
    body.push(new_head);
    body.extend_from_slice(&snapshot.body);

    if new_head == snapshot.food {
        next.score += 1;
        match place_food(&body, snapshot.board_size, rng) {
            Some(food) => next.food = food,
            // The body covers the whole board, the game cannot go on.
            None => next.terminal = true,
        }
    } else {
        body.pop();
    }

    if body[1..].contains(&new_head) {
        next.terminal = true;
    }

    next.body = body;
    next
}

/// Picks a cell uniformly at random among the cells not covered by `body`.
///
/// Returns `None` only when no free cell is left.
pub fn place_food<R: Rng + ?Sized>(body: &[Cell], board_size: i32, rng: &mut R) -> Option<Cell> {
    if board_size <= 0 {
        return None;
    }

    for _ in 0..FOOD_DRAWS {
        let candidate = Cell::new(rng.gen_range(0..board_size), rng.gen_range(0..board_size));
        if !body.contains(&candidate) {
            return Some(candidate);
        }
    }

    let free: Vec<Cell> = (0..board_size)
        .flat_map(|y| (0..board_size).map(move |x| Cell::new(x, y)))
        .filter(|cell| !body.contains(cell))
        .collect();
    free.choose(rng).copied()
}

/// Builds the state of a freshly joined session: a three cell body centred on
/// the board, heading right, with food on a random free cell.
pub fn initial_session<R: Rng + ?Sized>(id: SessionId, board_size: i32, rng: &mut R) -> Session {
    let mid = board_size / 2;
    let body: Vec<Cell> = (0..INITIAL_LENGTH as i32)
        .map(|offset| Cell::new(mid - offset, mid))
        .collect();
    let food = place_food(&body, board_size, rng).unwrap_or(Cell::new(0, 0));

    Session {
        id,
        body,
        food,
        score: 0,
        terminal: false,
        direction: Direction::Right,
        board_size,
        last_move_at: None,
        version: 0,
    }
}

use super::CollectionSync;
use crate::error::SyncError;
use crate::models::{Entity, Faq, FaqPatch, RecordKey};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
        })
    }
}

impl FromStr for Direction {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            _ => Err(SyncError::validation(format!(
                "direction must be 'up' or 'down', got '{s}'"
            ))),
        }
    }
}

/// The two order updates that move a FAQ past its neighbour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSwap {
    pub moved: RecordKey,
    pub moved_order: i32,
    pub neighbour: RecordKey,
    pub neighbour_order: i32,
}

/// Plan a move within `faqs`, which must be in display order.
///
/// Returns `None` for unknown keys and at the ends of the list.
pub fn plan_move(faqs: &[Faq], key: &RecordKey, direction: Direction) -> Option<OrderSwap> {
    let index = faqs.iter().position(|faq| &faq.key() == key)?;
    let neighbour_index = match direction {
        Direction::Up => index.checked_sub(1)?,
        Direction::Down => index + 1,
    };
    let current = &faqs[index];
    let neighbour = faqs.get(neighbour_index)?;
    Some(OrderSwap {
        moved: current.key(),
        moved_order: neighbour.order,
        neighbour: neighbour.key(),
        neighbour_order: current.order,
    })
}

impl CollectionSync<Faq> {
    /// Swap a FAQ's order with its neighbour in the current snapshot.
    ///
    /// Returns whether a swap was issued. The two updates are separate calls;
    /// if the second fails both records may share an order value.
    pub async fn move_faq(&self, key: &RecordKey, direction: Direction) -> Result<bool, SyncError> {
        let swap = match plan_move(&self.records(), key, direction) {
            Some(swap) => swap,
            None => {
                debug!(%key, %direction, "nothing to swap with");
                return Ok(false);
            }
        };
        self.update(&swap.moved, &FaqPatch::order(swap.moved_order))
            .await?;
        self.update(&swap.neighbour, &FaqPatch::order(swap.neighbour_order))
            .await?;
        Ok(true)
    }

    /// Order value for a FAQ appended at the end
    pub fn next_order(&self) -> i32 {
        self.records()
            .iter()
            .map(|faq| faq.order)
            .max()
            .map_or(0, |max| max + 1)
    }
}

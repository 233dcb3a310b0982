//! Sequence groups partitioning per-phase work.
//!
//! Cross-boundary work is split into 26 neighbor-relative groups (a 3×3×3
//! neighborhood minus its center) plus a purely local group. The scheduler
//! runs one group at a time across all regions, in the same fixed order on
//! every tick, so two adjacent regions never mutate the same boundary data
//! in the same sub-phase.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A direction index that does not name one of the 26 neighbor offsets.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid neighbor direction index {0}")]
pub struct InvalidDirection(pub u8);

/// One of the 26 neighbor offsets of a region.
///
/// Components are each -1, 0, or 1 and never all zero; an invalid direction
/// is unrepresentable. Serialized as its [`index`](Self::index) so it stays
/// a scalar inside management tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub struct Direction {
    dx: i8,
    dy: i8,
    dz: i8,
}

impl Direction {
    pub const COUNT: usize = 26;

    /// Index of the neighborhood center, which no direction maps to.
    const CENTER_INDEX: u8 = 13;

    #[must_use]
    pub fn new(dx: i8, dy: i8, dz: i8) -> Option<Self> {
        let in_range = |c: i8| (-1..=1).contains(&c);
        if !in_range(dx) || !in_range(dy) || !in_range(dz) {
            return None;
        }
        if dx == 0 && dy == 0 && dz == 0 {
            return None;
        }
        Some(Self { dx, dy, dz })
    }

    /// Packed index in `0..=26`, skipping 13 (the center).
    #[must_use]
    pub const fn index(self) -> u8 {
        ((self.dx + 1) * 9 + (self.dy + 1) * 3 + (self.dz + 1)) as u8
    }

    #[must_use]
    pub fn from_index(index: u8) -> Option<Self> {
        Self::try_from(index).ok()
    }

    #[must_use]
    pub const fn offset(self) -> (i8, i8, i8) {
        (self.dx, self.dy, self.dz)
    }

    /// All 26 directions in ascending index order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..=26).filter_map(Self::from_index)
    }
}

impl From<Direction> for u8 {
    fn from(direction: Direction) -> Self {
        direction.index()
    }
}

impl TryFrom<u8> for Direction {
    type Error = InvalidDirection;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        if index > 26 || index == Self::CENTER_INDEX {
            return Err(InvalidDirection(index));
        }
        Ok(Self {
            dx: (index / 9) as i8 - 1,
            dy: (index / 3 % 3) as i8 - 1,
            dz: (index % 3) as i8 - 1,
        })
    }
}

/// Selects which slice of a phase's work a task covers: purely local work,
/// or the sub-partition shared with the neighbor in one direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sequence {
    Local,
    Neighbor(Direction),
}

impl Sequence {
    /// Number of groups a phase is driven through: local plus 26 neighbors.
    pub const GROUPS: usize = Direction::COUNT + 1;

    /// Legacy integer form: -1 for local, the direction index otherwise.
    #[must_use]
    pub const fn index(self) -> i8 {
        match self {
            Self::Local => -1,
            Self::Neighbor(direction) => direction.index() as i8,
        }
    }

    #[must_use]
    pub fn from_index(index: i8) -> Option<Self> {
        if index == -1 {
            return Some(Self::Local);
        }
        let direction = u8::try_from(index).ok()?;
        Direction::from_index(direction).map(Self::Neighbor)
    }

    /// Whether a task tagged with this group applies to a region whose own
    /// sequence is `own`: the local group applies to every region, neighbor
    /// groups only to regions in that group.
    #[must_use]
    pub fn applies_to(self, own: Self) -> bool {
        self == Self::Local || self == own
    }

    /// All groups in the fixed global execution order: local first, then
    /// neighbors by ascending index. Identical on every manager and every
    /// tick.
    pub fn iter_all() -> impl Iterator<Item = Self> {
        std::iter::once(Self::Local).chain(Direction::all().map(Self::Neighbor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_rejects_center_and_out_of_range() {
        assert!(Direction::new(0, 0, 0).is_none());
        assert!(Direction::new(2, 0, 0).is_none());
        assert!(Direction::new(0, -2, 0).is_none());
        assert!(Direction::new(1, -1, 0).is_some());
    }

    #[test]
    fn test_direction_index_round_trip() {
        let mut seen = Vec::new();
        for direction in Direction::all() {
            let index = direction.index();
            assert_ne!(index, 13);
            assert!(index <= 26);
            assert_eq!(Direction::from_index(index), Some(direction));
            seen.push(index);
        }
        assert_eq!(seen.len(), Direction::COUNT);
        // Fixed ascending order.
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_direction_from_index_rejects_center() {
        assert_eq!(Direction::from_index(13), None);
        assert_eq!(Direction::from_index(27), None);
        assert_eq!(Direction::try_from(13), Err(InvalidDirection(13)));
    }

    #[test]
    fn test_sequence_index_round_trip() {
        assert_eq!(Sequence::Local.index(), -1);
        assert_eq!(Sequence::from_index(-1), Some(Sequence::Local));
        assert_eq!(Sequence::from_index(13), None);
        assert_eq!(Sequence::from_index(-2), None);

        for sequence in Sequence::iter_all() {
            assert_eq!(Sequence::from_index(sequence.index()), Some(sequence));
        }
    }

    #[test]
    fn test_iter_all_is_local_then_all_neighbors() {
        let groups: Vec<_> = Sequence::iter_all().collect();
        assert_eq!(groups.len(), Sequence::GROUPS);
        assert_eq!(groups[0], Sequence::Local);
        assert!(
            groups[1..]
                .iter()
                .all(|group| matches!(group, Sequence::Neighbor(_)))
        );
    }

    #[test]
    fn test_local_applies_to_every_region() {
        let own = Sequence::Neighbor(Direction::new(1, 0, 0).unwrap());
        assert!(Sequence::Local.applies_to(own));
        assert!(own.applies_to(own));

        let other = Sequence::Neighbor(Direction::new(0, 1, 0).unwrap());
        assert!(!other.applies_to(own));
    }

    #[test]
    fn test_direction_serde_uses_index() {
        let direction = Direction::new(-1, 1, 0).unwrap();
        let json = serde_json::to_string(&direction).unwrap();
        assert_eq!(json, direction.index().to_string());
        let parsed: Direction = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, direction);

        // The center index is rejected at deserialization time.
        assert!(serde_json::from_str::<Direction>("13").is_err());
    }
}

//! Mission item records and the ordered set they are transferred in.
//!
//! The transfer engine treats payloads as opaque. Only the sequence index is
//! inspected, and only to check ordering.

use crate::error::MissionError;
use serde::{Deserialize, Serialize};

/// Opaque item contents as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemPayload {
    /// Command identifier
    pub command: u16,
    /// Coordinate frame identifier
    pub frame: u8,
    /// Command parameters (`param1..param4`, then `x`, `y`, `z`)
    pub params: [f64; 7],
    /// Item is the vehicle's current target
    pub current: bool,
    /// Vehicle continues to the next item automatically
    pub autocontinue: bool,
}

/// A mission item at a fixed position in its mission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MissionItem {
    /// Sequence index (position in the mission)
    pub seq: u16,
    /// Item contents
    pub payload: ItemPayload,
}

impl MissionItem {
    /// Create an item at `seq`
    #[must_use]
    pub fn new(seq: u16, payload: ItemPayload) -> Self {
        Self { seq, payload }
    }
}

/// Ordered mission items with contiguous indices `0..N-1`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<MissionItem>", into = "Vec<MissionItem>")]
pub struct MissionItemSet {
    items: Vec<MissionItem>,
}

impl MissionItemSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from payloads, numbering them by position
    ///
    /// # Errors
    ///
    /// Returns `MissionError::TooManyItems` if there are more payloads than a
    /// 16-bit index can address.
    pub fn from_payloads<I>(payloads: I) -> Result<Self, MissionError>
    where
        I: IntoIterator<Item = ItemPayload>,
    {
        let mut set = Self::new();
        for payload in payloads {
            set.push(payload)?;
        }
        Ok(set)
    }

    /// Build a set from numbered items, checking that indices run `0..N-1`
    ///
    /// # Errors
    ///
    /// Returns `MissionError::OutOfSequence` at the first item whose index
    /// differs from its position, or `MissionError::TooManyItems`.
    pub fn from_items(items: Vec<MissionItem>) -> Result<Self, MissionError> {
        if items.len() > usize::from(u16::MAX) {
            return Err(MissionError::TooManyItems(items.len()));
        }
        if let Some((position, item)) = items
            .iter()
            .enumerate()
            .find(|(position, item)| usize::from(item.seq) != *position)
        {
            return Err(MissionError::OutOfSequence {
                position,
                seq: item.seq,
            });
        }
        Ok(Self { items })
    }

    /// Append a payload as the next item
    ///
    /// # Errors
    ///
    /// Returns `MissionError::TooManyItems` when the set is full.
    pub fn push(&mut self, payload: ItemPayload) -> Result<u16, MissionError> {
        let seq = u16::try_from(self.items.len())
            .ok()
            .filter(|seq| *seq < u16::MAX)
            .ok_or(MissionError::TooManyItems(self.items.len() + 1))?;
        self.items.push(MissionItem::new(seq, payload));
        Ok(seq)
    }

    /// Number of items
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn count(&self) -> u16 {
        // Constructors cap the length at u16::MAX.
        self.items.len() as u16
    }

    /// Check if the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item at sequence index `seq`
    #[must_use]
    pub fn get(&self, seq: u16) -> Option<&MissionItem> {
        self.items.get(usize::from(seq))
    }

    /// Iterate items in sequence order
    pub fn iter(&self) -> std::slice::Iter<'_, MissionItem> {
        self.items.iter()
    }
}

impl TryFrom<Vec<MissionItem>> for MissionItemSet {
    type Error = MissionError;

    fn try_from(items: Vec<MissionItem>) -> Result<Self, Self::Error> {
        Self::from_items(items)
    }
}

impl From<MissionItemSet> for Vec<MissionItem> {
    fn from(set: MissionItemSet) -> Self {
        set.items
    }
}

impl<'a> IntoIterator for &'a MissionItemSet {
    type Item = &'a MissionItem;
    type IntoIter = std::slice::Iter<'a, MissionItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl IntoIterator for MissionItemSet {
    type Item = MissionItem;
    type IntoIter = std::vec::IntoIter<MissionItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

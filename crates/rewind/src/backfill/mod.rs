//! Discovery of segment ids that already left the playlist window.
//!
//! Contiguous numbering (gap 1) is searched with [`boundary::find_range`],
//! sparse numbering with [`guess::GuessSearch`].

pub mod boundary;
pub mod guess;

pub use boundary::find_range;
pub use guess::{GuessSearch, common_deltas};

/// Which search a playlist window calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Boundary,
    Guess,
}

impl Strategy {
    pub fn for_space(space: u64) -> Self {
        if space <= 1 {
            Self::Boundary
        } else {
            Self::Guess
        }
    }
}

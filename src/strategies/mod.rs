//! Slot activation strategies.

use crate::CopyOperation;

pub mod copy;

/// A slot activation strategy, expressed as the page copies it needs.
pub trait Strategy {
    /// Plan the page copies to execute, in order.
    fn plan(&self) -> impl Iterator<Item = CopyOperation>;
}

mod status;

pub use status::{EntryStatus, Lifecycle, PairActivity, Transition};

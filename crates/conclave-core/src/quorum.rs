//! Quorum policies.
//!
//! A quorum function maps an observed population to the number of
//! affirmative responses an election needs. The default is a simple
//! majority with a floor of three, which means clusters of one or two
//! nodes can never pass an election — deliberate, so a freshly started or
//! partitioned node cannot elect itself before it has seen any peers.

/// Maps a population estimate to the votes required for quorum.
pub type QuorumFn = Box<dyn Fn(usize) -> usize + Send + Sync>;

/// Minimum votes any `simple_majority` quorum will accept.
pub const MAJORITY_FLOOR: usize = 3;

/// 50% + 1 of the population, never fewer than [`MAJORITY_FLOOR`].
pub fn simple_majority() -> QuorumFn {
    quorum_percentage(0.5, MAJORITY_FLOOR)
}

/// A quorum of `percent` of the population plus one, never fewer than
/// `floor` votes.
///
/// # Panics
///
/// Panics if `percent` is outside `0.0..=1.0`. A misconfigured quorum is a
/// deployment error; failing at construction keeps it out of the voting
/// path.
pub fn quorum_percentage(percent: f64, floor: usize) -> QuorumFn {
    assert!(
        (0.0..=1.0).contains(&percent),
        "quorum percentage must be between 0 and 1, got {percent}"
    );

    Box::new(move |population| {
        let required = (population as f64 * percent) as usize + 1;
        required.max(floor)
    })
}

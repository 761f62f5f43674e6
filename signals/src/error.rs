/// Errors surfaced by signal reads.
///
/// A cycle is reported at the read that closed it: whichever node is asked for
/// its value while it is already mid-evaluation refuses to recurse. The node is
/// left stale with its previous cached value intact, so a read after the cycle
/// is broken (e.g. after rewiring and [`Calculated::invalidate`]) succeeds.
///
/// [`Calculated::invalidate`]: crate::Calculated::invalidate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A calculated signal was read while its own compute function was running.
    #[error("cycle detected while evaluating calculated signal {}", name.as_deref().unwrap_or("<unnamed>"))]
    Cycle {
        /// Diagnostic name of the node that was re-entered, if one was attached.
        name: Option<String>,
    },
}

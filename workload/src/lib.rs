//! Map-reduce applications runnable by the pipeline engine.
//!
//! Each application is a pair of plain functions conforming to
//! [`common::MapFn`] and [`common::ReduceFn`], bundled as a
//! [`common::Workload`] and looked up by name.

use common::Workload;

pub mod wc;

/// Look up a workload by its registered name.
///
/// Returns `None` if the name is not a known workload.
pub fn try_named(name: &str) -> Option<Workload> {
    match name {
        "wc" => Some(Workload {
            map_fn: wc::map,
            reduce_fn: wc::reduce,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wc_is_registered() {
        assert!(try_named("wc").is_some());
        assert!(try_named("grep").is_none());
    }
}

use kanban_sync_domain::position::position_between;
use kanban_sync_domain::POSITION_STEP;
use serde::Serialize;

use crate::cli::PositionArgs;
use crate::output;

#[derive(Debug, Serialize, PartialEq)]
pub struct Placement {
    pub position: Option<f64>,
    /// Sibling positions after renumbering, present only when the
    /// neighbours left no room.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renumbered: Option<Vec<f64>>,
}

pub fn handle(args: PositionArgs) -> anyhow::Result<()> {
    if args.siblings.iter().any(|p| !p.is_finite()) {
        output::output_error("Sibling positions must be finite numbers");
    }
    output::output_success(place(args.siblings, args.index))
}

fn place(mut siblings: Vec<f64>, index: usize) -> Placement {
    siblings.sort_by(f64::total_cmp);
    if let Some(position) = between(&siblings, index) {
        return Placement {
            position: Some(position),
            renumbered: None,
        };
    }
    let renumbered: Vec<f64> = (1..=siblings.len())
        .map(|i| POSITION_STEP * i as f64)
        .collect();
    Placement {
        position: between(&renumbered, index),
        renumbered: Some(renumbered),
    }
}

fn between(sorted: &[f64], index: usize) -> Option<f64> {
    let index = index.min(sorted.len());
    let before = index.checked_sub(1).map(|i| sorted[i]);
    let after = sorted.get(index).copied();
    position_between(before, after)
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use kanban_sync_domain::{dispatch_raw, Applied, BoardId, BoardState, Snapshot};
use kanban_sync_realtime::{ChannelManager, InMemoryBroker, Topic};
use serde::Serialize;
use tracing::info;

use crate::cli::ReplayArgs;
use crate::context::{read_event_lines, read_snapshot, write_snapshot, CliContext};
use crate::output;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Serialize)]
struct Tally {
    applied: BTreeMap<String, usize>,
    dropped: usize,
}

impl Tally {
    fn record(&mut self, outcome: Option<Applied>) {
        match outcome {
            Some(applied) => *self.applied.entry(format!("{:?}", applied)).or_default() += 1,
            None => self.dropped += 1,
        }
    }
}

#[derive(Serialize)]
struct ReplayReport {
    mode: &'static str,
    board_id: Option<BoardId>,
    events: usize,
    #[serde(flatten)]
    tally: Tally,
    violations: Vec<String>,
    snapshot: Snapshot,
}

pub async fn handle(ctx: &CliContext, args: ReplayArgs) -> anyhow::Result<()> {
    let snapshot = read_snapshot(&args.snapshot)?;
    let lines = read_event_lines(&args.events)?;
    let board_id = args
        .board
        .or_else(|| snapshot.boards.first().map(|board| board.id));

    let mut state = BoardState::from_snapshot(snapshot);
    let mut tally = Tally::default();

    let mode = if args.direct {
        for line in &lines {
            tally.record(dispatch_raw(&mut state, line));
        }
        "direct"
    } else {
        let board_id = board_id
            .ok_or_else(|| anyhow!("--board is required when the snapshot has no boards"))?;
        replay_through_broker(ctx, &mut state, board_id, &lines, &mut tally).await?;
        "broker"
    };
    info!(mode, events = lines.len(), dropped = tally.dropped, "Replay finished");

    let snapshot = state.snapshot();
    if let Some(path) = &args.output {
        write_snapshot(path, &snapshot)?;
    }
    output::output_success(ReplayReport {
        mode,
        board_id,
        events: lines.len(),
        tally,
        violations: state.invariant_violations(),
        snapshot,
    })
}

/// Publishes each line on the board topic of an in-memory broker and applies
/// what the subscription delivers, one event at a time.
async fn replay_through_broker(
    ctx: &CliContext,
    state: &mut BoardState,
    board_id: BoardId,
    lines: &[String],
    tally: &mut Tally,
) -> anyhow::Result<()> {
    let broker = InMemoryBroker::new();
    let channels = ChannelManager::from_config(Arc::new(broker.clone()), &ctx.config, None);
    if !channels.wait_until_connected(DELIVERY_TIMEOUT).await {
        bail!("in-memory broker did not connect");
    }

    let topic = Topic::board(board_id);
    let destination = topic.destination();
    let mut subscription = channels.subscribe(topic)?;
    if !subscription.wait_established(DELIVERY_TIMEOUT).await {
        bail!("subscription to {} was not established", destination);
    }

    for line in lines {
        if broker.publish(&destination, line.as_str()).await == 0 {
            bail!("no subscriber for {}", destination);
        }
        let body = tokio::time::timeout(DELIVERY_TIMEOUT, subscription.recv())
            .await
            .context("timed out waiting for event delivery")?
            .ok_or_else(|| anyhow!("subscription to {} closed", destination))?;
        tally.record(dispatch_raw(state, &body));
    }

    subscription.unsubscribe();
    channels.shutdown();
    Ok(())
}

pub fn check(snapshot: &std::path::Path) -> anyhow::Result<()> {
    let state = BoardState::from_snapshot(read_snapshot(snapshot)?);
    output::output_list(state.invariant_violations())
}

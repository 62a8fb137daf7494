//! Typed view of a board topic.

use kanban_sync_core::SyncResult;
use kanban_sync_domain::{BoardId, RemoteEvent};
use tracing::{debug, warn};

use crate::channel::{ChannelManager, Subscription, Topic};

#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Event(RemoteEvent),
    /// Messages were dropped because the subscriber fell behind. Whatever was
    /// still buffered has been discarded too; local state needs a reload.
    Lagged { missed: u64 },
}

/// Decodes board topic messages into `RemoteEvent`s. Messages that fail to
/// decode are logged and skipped; they never end the feed.
#[derive(Debug)]
pub struct BoardFeed {
    board_id: BoardId,
    subscription: Subscription,
    dropped: u64,
}

impl BoardFeed {
    pub fn subscribe(channels: &ChannelManager, board_id: BoardId) -> SyncResult<Self> {
        Ok(Self {
            board_id,
            subscription: channels.subscribe(Topic::board(board_id))?,
            dropped: 0,
        })
    }

    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    /// Count of messages discarded as malformed or unrecognized.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn subscription_mut(&mut self) -> &mut Subscription {
        &mut self.subscription
    }

    /// Next well-formed event in arrival order, or a lag marker once the
    /// subscription has dropped messages. `None` once unsubscribed.
    pub async fn next_item(&mut self) -> Option<FeedItem> {
        loop {
            let missed = self.subscription.take_missed();
            if missed > 0 {
                let discarded = self.subscription.discard_buffered();
                debug!(board_id = self.board_id, missed, discarded, "Board feed fell behind");
                return Some(FeedItem::Lagged { missed });
            }
            let body = self.subscription.recv().await?;
            match RemoteEvent::decode(&body) {
                Ok(event) => return Some(FeedItem::Event(event)),
                Err(e) => {
                    self.dropped += 1;
                    warn!(board_id = self.board_id, error = %e, "Dropping board event");
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.subscription.unsubscribe();
    }
}

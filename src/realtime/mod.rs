//! Change notifications and live list snapshots.
//!
//! Every write path publishes a [`ChangeEvent`] on the [`ChangeBus`]. List
//! views do not patch themselves incrementally: a [`LiveList`] redoes its
//! bulk read whenever a matching notification (or a lag marker) arrives and
//! publishes the new snapshot through a `watch` channel.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::state::ApiCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Quests,
    CompletedQuests,
    ReferralCodes,
    Referrals,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Users,
        Table::Quests,
        Table::CompletedQuests,
        Table::ReferralCodes,
        Table::Referrals,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Quests => "quests",
            Table::CompletedQuests => "completed_quests",
            Table::ReferralCodes => "referral_codes",
            Table::Referrals => "referrals",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|table| table.as_str() == normalized)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }

    /// Parses an event kind; `*` (or empty) means any kind.
    pub fn parse_filter(value: &str) -> Result<Option<Self>, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "*" => Ok(None),
            "insert" => Ok(Some(ChangeKind::Insert)),
            "update" => Ok(Some(ChangeKind::Update)),
            "delete" => Ok(Some(ChangeKind::Delete)),
            other => Err(format!("Unsupported event kind {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
}

/// Which notifications a subscriber wants. An empty table list matches
/// every table; a `None` kind is the `*` wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeFilter {
    tables: Vec<Table>,
    kind: Option<ChangeKind>,
}

impl ChangeFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn tables(tables: &[Table]) -> Self {
        Self {
            tables: tables.to_vec(),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: Option<ChangeKind>) -> Self {
        self.kind = kind;
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        let table_ok = self.tables.is_empty() || self.tables.contains(&event.table);
        let kind_ok = self.kind.is_none_or(|kind| kind == event.kind);
        table_ok && kind_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Changed(ChangeEvent),
    /// The receiver fell behind; the state is unknown and must be reloaded.
    Lagged(u64),
}

#[derive(Clone)]
pub struct ChangeBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Change bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, table: Table, kind: ChangeKind) -> usize {
        // Sending only fails when nobody is listening.
        let delivered = self
            .sender
            .send(ChangeEvent { table, kind })
            .unwrap_or_default();
        debug!(
            table = table.as_str(),
            kind = kind.as_str(),
            delivered,
            "Published change notification"
        );
        delivered
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A filtered view of the bus. Dropping it releases the channel slot.
pub struct Subscription {
    receiver: broadcast::Receiver<ChangeEvent>,
    filter: ChangeFilter,
}

impl Subscription {
    /// Waits for the next matching notification. `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<Signal> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(Signal::Changed(event)),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => return Some(Signal::Lagged(skipped)),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Discards notifications that are already queued and reports whether
    /// any of them was relevant. Used to fold bursts into one refetch.
    pub fn drain_pending(&mut self) -> bool {
        let mut relevant = false;
        loop {
            match self.receiver.try_recv() {
                Ok(event) => relevant |= self.filter.matches(&event),
                Err(TryRecvError::Lagged(_)) => relevant = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return relevant,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ChangeEvent> + Send + 'static {
        let filter = self.filter;
        BroadcastStream::new(self.receiver)
            .filter_map(|res| res.ok())
            .filter(move |event| filter.matches(event))
    }
}

/// Snapshot of a list view that is reloaded on every relevant change.
pub struct LiveList<T> {
    snapshot: watch::Receiver<Arc<Vec<T>>>,
}

impl<T> Clone for LiveList<T> {
    fn clone(&self) -> Self {
        Self {
            snapshot: self.snapshot.clone(),
        }
    }
}

impl<T> LiveList<T>
where
    T: Send + Sync + 'static,
{
    /// Performs the initial bulk read, then keeps refetching in the
    /// background until `shutdown` flips to `true` or the bus closes.
    pub async fn spawn<F, Fut>(
        name: &'static str,
        bus: &ChangeBus,
        filter: ChangeFilter,
        fetch: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, JoinHandle<()>)>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
    {
        // Subscribe first so nothing written during the initial read is missed.
        let mut subscription = bus.subscribe(filter);
        let initial = fetch().await?;
        info!(view = name, rows = initial.len(), "Live view loaded");
        let (sender, receiver) = watch::channel(Arc::new(initial));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!(view = name, "Live view stopped");
                            break;
                        }
                    }
                    signal = subscription.next() => {
                        match signal {
                            None => {
                                warn!(view = name, "Change bus closed. Stopping live view");
                                break;
                            }
                            Some(Signal::Lagged(skipped)) => {
                                warn!(view = name, skipped, "Live view lagged behind change bus");
                            }
                            Some(Signal::Changed(_)) => {}
                        }
                        subscription.drain_pending();
                        match fetch().await {
                            Ok(rows) => {
                                debug!(view = name, rows = rows.len(), "Live view refreshed");
                                sender.send_replace(Arc::new(rows));
                            }
                            Err(err) => warn!(view = name, "Live view refetch failed: {err:#}"),
                        }
                    }
                }
            }
        });

        Ok((Self { snapshot: receiver }, handle))
    }

    pub fn current(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.snapshot.borrow())
    }

    #[cfg(test)]
    pub fn watch(&self) -> watch::Receiver<Arc<Vec<T>>> {
        self.snapshot.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    pub offset: u64,
    pub limit: u64,
    pub has_more: bool,
    pub next_offset: Option<u64>,
}

/// Offset arithmetic for one page: a full page means there may be more.
pub fn page_window(offset: u64, limit: u64, returned: usize) -> PageWindow {
    assert!(limit > 0, "Page limit must be positive");
    let has_more = returned as u64 == limit;
    PageWindow {
        offset,
        limit,
        has_more,
        next_offset: has_more.then(|| offset.saturating_add(limit)),
    }
}

/// Infinite-scroll cursor. Any change notification resets it to page zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pager {
    page_size: u64,
    offset: u64,
    has_more: bool,
}

impl Pager {
    pub fn new(page_size: u64) -> Self {
        assert!(page_size > 0, "Page size must be positive");
        Self {
            page_size,
            offset: 0,
            has_more: true,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn reset(&mut self) {
        self.offset = 0;
        self.has_more = true;
    }

    /// Records a fetched page and returns the window it covered.
    pub fn record_page(&mut self, returned: usize) -> PageWindow {
        let window = page_window(self.offset, self.page_size, returned);
        self.offset = self.offset.saturating_add(self.page_size);
        self.has_more = window.has_more;
        window
    }
}

/// Restarts allowed per walk before a changing table is returned as is.
const MAX_WALK_RESTARTS: usize = 3;

/// Fetches every page from offset zero. A relevant notification seen between
/// pages resets the pager and starts over, so rows are never duplicated or
/// skipped by a concurrent write.
pub async fn collect_pages<T, E, F, Fut>(
    pager: &mut Pager,
    subscription: &mut Subscription,
    mut fetch: F,
) -> Result<Vec<T>, E>
where
    F: FnMut(u64, u64) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
{
    let mut rows = Vec::new();
    let mut restarts = 0;
    while pager.has_more() {
        let page = fetch(pager.offset(), pager.page_size()).await?;
        pager.record_page(page.len());
        rows.extend(page);

        if subscription.drain_pending() {
            if restarts == MAX_WALK_RESTARTS {
                warn!(restarts, "Table kept changing during page walk");
                continue;
            }
            restarts += 1;
            debug!(restarts, "Change during page walk. Restarting from page zero");
            pager.reset();
            rows.clear();
        }
    }
    Ok(rows)
}

/// Drops cached user and referral lookups whenever the backing tables move.
pub async fn run_cache_invalidator(
    bus: ChangeBus,
    cache: Arc<ApiCache>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut subscription = bus.subscribe(ChangeFilter::tables(&[
        Table::Users,
        Table::ReferralCodes,
        Table::Referrals,
    ]));

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            signal = subscription.next() => {
                match signal {
                    None => break,
                    Some(Signal::Changed(event)) => match event.table {
                        Table::Users => cache.users.invalidate_all(),
                        _ => cache.referral_stats.invalidate_all(),
                    },
                    Some(Signal::Lagged(_)) => {
                        cache.users.invalidate_all();
                        cache.referral_stats.invalidate_all();
                    }
                }
            }
        }
    }
    debug!("Cache invalidator stopped");
}

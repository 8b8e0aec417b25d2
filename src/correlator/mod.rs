//! FIFO correlation of logical view identifiers with automation page handles.
//!
//! Two event streams arrive independently and carry no shared key: the editor
//! side announces view identifiers over IPC, and the automation client
//! announces page handles as the out-of-process browser creates them. The
//! [`PageCorrelator`] pairs the two streams by strict arrival order, which is
//! the only correlation signal available, and exposes a request/response API
//! that transparently waits for a page that has not arrived yet.
//!
//! Pages created through out-of-band paths (no discrete "page created" event)
//! are recovered by a periodic rescan of every known [`PageRealm`]. The rescan
//! interval runs only while at least one waiter is outstanding, plus one eager
//! scan at construction.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Opaque key for a logical view/session.
pub type ViewId = String;

/// Shared handle to a remote automation page.
pub type PageRef = Arc<dyn RemotePage>;

type PageResult = Result<PageRef, CorrelatorError>;

/// Default deadline for [`PageCorrelator::resolve`].
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Period of the recovery rescan while waiters are outstanding.
pub const RESCAN_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelatorError {
    #[error("Timed out waiting for a page to pair with view '{0}'")]
    Timeout(ViewId),

    #[error("Correlator disposed while view '{0}' was waiting")]
    Disposed(ViewId),

    #[error("Opening view failed: {0}")]
    OpenFailed(String),
}

/// Handle to one remote page. Lifecycle is owned by the automation client;
/// the correlator only observes the close event to drop stale correlations.
pub trait RemotePage: Send + Sync {
    /// Stable identity for dedup across repeated discovery.
    fn guid(&self) -> &str;
    /// Register a callback fired once when the page closes.
    fn on_close(&self, callback: Box<dyn FnOnce() + Send>);
}

/// A container of pages (a browser context). Rescan enumerates these.
pub trait PageRealm: Send + Sync {
    fn guid(&self) -> &str;
    /// Pages currently alive in this realm.
    fn pages(&self) -> Vec<PageRef>;
    /// Register a callback fired for every page created after registration.
    fn on_page(&self, callback: Box<dyn Fn(PageRef) + Send + Sync>);
}

/// Side-channel query boundary: "all currently known page containers".
pub trait PageSource: Send + Sync {
    fn realms(&self) -> Vec<Arc<dyn PageRealm>>;
}

/// Outbound side-effecting hook instructing the external system to create the
/// resource backing a view id. Invoked at most once per registered view.
#[async_trait::async_trait]
pub trait ViewCommander: Send + Sync {
    async fn open_view(&self, view_id: &ViewId) -> Result<(), CorrelatorError>;
}

/// Queue depths and outstanding-waiter count, for introspection and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CorrelatorCounts {
    pub pending_views: usize,
    pub pending_pages: usize,
    pub waiters: usize,
    pub correlations: usize,
}

struct Waiter {
    senders: Vec<oneshot::Sender<PageResult>>,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    pending_views: VecDeque<ViewId>,
    pending_pages: VecDeque<PageRef>,
    correlations: HashMap<ViewId, PageRef>,
    waiters: HashMap<ViewId, Waiter>,
    seen_pages: HashSet<String>,
    hooked_realms: HashSet<String>,
    rescan: Option<JoinHandle<()>>,
    disposed: bool,
}

/// Dual-queue FIFO correlator for view ids and automation pages.
///
/// All state transitions happen inside one short mutex-guarded critical
/// section per triggering event; awaiting happens only on oneshot receivers
/// outside the lock, so matching itself needs no further coordination.
pub struct PageCorrelator {
    tag: String,
    commander: Arc<dyn ViewCommander>,
    source: Arc<dyn PageSource>,
    state: Arc<Mutex<State>>,
}

impl PageCorrelator {
    /// Create a correlator and run one eager discovery scan so pages that
    /// existed before construction are already queued.
    pub fn new(commander: Arc<dyn ViewCommander>, source: Arc<dyn PageSource>) -> Self {
        let tag = format!("corr-{}", Uuid::new_v4());
        let state = Arc::new(Mutex::new(State::default()));
        Self::scan_sources(&state, &source, &tag);
        Self {
            tag,
            commander,
            source,
            state,
        }
    }

    /// Resolve the page paired with `view_id`, waiting up to `timeout`.
    ///
    /// A committed correlation returns immediately. Concurrent calls for the
    /// same id coalesce onto a single registration: one queue entry, one
    /// `open_view` invocation, one timeout timer. A failed `open_view` call
    /// rejects this view's waiter with [`CorrelatorError::OpenFailed`],
    /// distinct from a timeout.
    pub async fn resolve(&self, view_id: &str, timeout: Duration) -> PageResult {
        let rx = {
            let mut st = self.state.lock().unwrap();
            if st.disposed {
                return Err(CorrelatorError::Disposed(view_id.to_string()));
            }
            if let Some(page) = st.correlations.get(view_id) {
                return Ok(Arc::clone(page));
            }

            let (tx, rx) = oneshot::channel();
            if let Some(waiter) = st.waiters.get_mut(view_id) {
                // Coalesce onto the existing registration.
                waiter.senders.push(tx);
                rx
            } else {
                let announced = st.pending_views.iter().any(|v| v == view_id);
                if !announced {
                    st.pending_views.push_back(view_id.to_string());
                }
                let timer = self.spawn_timeout(view_id.to_string(), timeout);
                st.waiters.insert(
                    view_id.to_string(),
                    Waiter {
                        senders: vec![tx],
                        timer,
                    },
                );
                self.ensure_rescan(&mut st);
                if !announced {
                    // The announcing side already initiated resource creation
                    // for ids that reached the pending queue via IPC.
                    self.spawn_open_view(view_id.to_string());
                }
                info!(
                    "[{}] registered waiter for view '{}' (timeout {:?})",
                    self.tag, view_id, timeout
                );
                drop(st);
                Self::drain_matches(&self.state, &self.tag);
                rx
            }
        };

        match rx.await {
            Ok(result) => result,
            // Sender dropped without settling: the view was torn down.
            Err(_) => Err(CorrelatorError::Disposed(view_id.to_string())),
        }
    }

    /// [`resolve`](Self::resolve) with [`DEFAULT_RESOLVE_TIMEOUT`].
    pub async fn resolve_default(&self, view_id: &str) -> PageResult {
        self.resolve(view_id, DEFAULT_RESOLVE_TIMEOUT).await
    }

    /// Inbound "view announced" IPC event. Idempotent for known ids.
    pub fn announce_view(&self, view_id: &str) {
        let mut st = self.state.lock().unwrap();
        if st.disposed
            || st.correlations.contains_key(view_id)
            || st.waiters.contains_key(view_id)
            || st.pending_views.iter().any(|v| v == view_id)
        {
            return;
        }
        st.pending_views.push_back(view_id.to_string());
        debug!("[{}] view '{}' announced", self.tag, view_id);
        drop(st);
        Self::drain_matches(&self.state, &self.tag);
    }

    /// Inbound "page created" event. Duplicate deliveries of the same page
    /// (by guid) are discarded, so the rescan may rediscover pages freely.
    pub fn announce_page(&self, page: PageRef) {
        Self::ingest_page(&self.state, &self.tag, page);
    }

    /// The view backing `view_id` was torn down externally. Drops its
    /// correlation and pending entry; the paired page never returns to the
    /// pending queue. An outstanding waiter for the id is rejected.
    pub fn remove_view(&self, view_id: &str) {
        let waiter = {
            let mut st = self.state.lock().unwrap();
            st.correlations.remove(view_id);
            st.pending_views.retain(|v| v != view_id);
            let waiter = st.waiters.remove(view_id);
            if waiter.is_some() {
                Self::maybe_stop_rescan(&mut st, &self.tag);
            }
            waiter
        };
        if let Some(waiter) = waiter {
            waiter.timer.abort();
            // Dropping the senders settles every coalesced caller with
            // `Disposed`: the view is gone, no page will ever pair with it.
            drop(waiter.senders);
        }
        debug!("[{}] view '{}' removed", self.tag, view_id);
    }

    /// Committed correlation lookup, if any.
    pub fn page_for(&self, view_id: &str) -> Option<PageRef> {
        let st = self.state.lock().unwrap();
        st.correlations.get(view_id).map(Arc::clone)
    }

    pub fn counts(&self) -> CorrelatorCounts {
        let st = self.state.lock().unwrap();
        CorrelatorCounts {
            pending_views: st.pending_views.len(),
            pending_pages: st.pending_pages.len(),
            waiters: st.waiters.len(),
            correlations: st.correlations.len(),
        }
    }

    /// Reject every outstanding waiter, stop the rescan interval and clear
    /// all queues. In-flight pages are left untouched; their lifecycle
    /// belongs to the automation client. Safe to call repeatedly.
    pub fn dispose(&self) {
        let mut st = self.state.lock().unwrap();
        if st.disposed {
            return;
        }
        st.disposed = true;
        if let Some(rescan) = st.rescan.take() {
            rescan.abort();
        }
        let waiters = std::mem::take(&mut st.waiters);
        st.pending_views.clear();
        st.pending_pages.clear();
        st.correlations.clear();
        drop(st);

        let rejected = waiters.len();
        for (view_id, waiter) in waiters {
            waiter.timer.abort();
            for tx in waiter.senders {
                let _ = tx.send(Err(CorrelatorError::Disposed(view_id.clone())));
            }
        }
        info!("[{}] disposed ({} waiters rejected)", self.tag, rejected);
    }

    fn spawn_timeout(&self, view_id: ViewId, timeout: Duration) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let tag = self.tag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let waiter = {
                let mut st = state.lock().unwrap();
                let waiter = st.waiters.remove(&view_id);
                if waiter.is_some() {
                    st.pending_views.retain(|v| v != &view_id);
                    Self::maybe_stop_rescan(&mut st, &tag);
                }
                waiter
            };
            if let Some(waiter) = waiter {
                warn!("[{}] view '{}' timed out waiting for a page", tag, view_id);
                for tx in waiter.senders {
                    let _ = tx.send(Err(CorrelatorError::Timeout(view_id.clone())));
                }
            }
        })
    }

    fn spawn_open_view(&self, view_id: ViewId) {
        let commander = Arc::clone(&self.commander);
        let state = Arc::clone(&self.state);
        let tag = self.tag.clone();
        tokio::spawn(async move {
            if let Err(err) = commander.open_view(&view_id).await {
                warn!("[{}] open_view failed for '{}': {}", tag, view_id, err);
                let waiter = {
                    let mut st = state.lock().unwrap();
                    let waiter = st.waiters.remove(&view_id);
                    if waiter.is_some() {
                        st.pending_views.retain(|v| v != &view_id);
                        Self::maybe_stop_rescan(&mut st, &tag);
                    }
                    waiter
                };
                if let Some(waiter) = waiter {
                    waiter.timer.abort();
                    let rejection = match err {
                        CorrelatorError::OpenFailed(message) => {
                            CorrelatorError::OpenFailed(message)
                        }
                        other => CorrelatorError::OpenFailed(other.to_string()),
                    };
                    for tx in waiter.senders {
                        let _ = tx.send(Err(rejection.clone()));
                    }
                }
            }
        });
    }

    fn ensure_rescan(&self, st: &mut State) {
        if st.rescan.is_some() {
            return;
        }
        let state = Arc::clone(&self.state);
        let source = Arc::clone(&self.source);
        let tag = self.tag.clone();
        debug!("[{}] rescan interval started", self.tag);
        st.rescan = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(RESCAN_INTERVAL);
            // The immediate first tick; scans start one full period in.
            interval.tick().await;
            loop {
                interval.tick().await;
                Self::scan_sources(&state, &source, &tag);
            }
        }));
    }

    fn maybe_stop_rescan(st: &mut State, tag: &str) {
        if st.waiters.is_empty() {
            if let Some(rescan) = st.rescan.take() {
                rescan.abort();
                debug!("[{}] rescan interval stopped", tag);
            }
        }
    }

    /// Feed every page of every known realm through ingestion; duplicates are
    /// discarded by guid. Newly seen realms get a page-created subscription
    /// so later pages arrive without waiting for the next scan.
    fn scan_sources(state: &Arc<Mutex<State>>, source: &Arc<dyn PageSource>, tag: &str) {
        for realm in source.realms() {
            let newly_hooked = {
                let mut st = state.lock().unwrap();
                if st.disposed {
                    return;
                }
                st.hooked_realms.insert(realm.guid().to_string())
            };
            if newly_hooked {
                let state = Arc::clone(state);
                let tag = tag.to_string();
                realm.on_page(Box::new(move |page| {
                    Self::ingest_page(&state, &tag, page);
                }));
            }
            for page in realm.pages() {
                Self::ingest_page(state, tag, page);
            }
        }
    }

    fn ingest_page(state: &Arc<Mutex<State>>, tag: &str, page: PageRef) {
        {
            let mut st = state.lock().unwrap();
            if st.disposed || !st.seen_pages.insert(page.guid().to_string()) {
                return;
            }
            debug!("[{}] page {} queued", tag, page.guid());
            st.pending_pages.push_back(page);
        }
        Self::drain_matches(state, tag);
    }

    /// Strict FIFO matching: pair oldest view with oldest page until one
    /// queue empties. Close listeners are attached outside the lock.
    fn drain_matches(state: &Arc<Mutex<State>>, tag: &str) {
        let matched = {
            let mut st = state.lock().unwrap();
            let mut matched: Vec<(ViewId, PageRef)> = Vec::new();
            while !st.pending_views.is_empty() && !st.pending_pages.is_empty() {
                let view_id = match st.pending_views.pop_front() {
                    Some(v) => v,
                    None => break,
                };
                let page = match st.pending_pages.pop_front() {
                    Some(p) => p,
                    None => break,
                };
                info!("[{}] view '{}' paired with page {}", tag, view_id, page.guid());
                st.correlations.insert(view_id.clone(), Arc::clone(&page));
                if let Some(waiter) = st.waiters.remove(&view_id) {
                    waiter.timer.abort();
                    for tx in waiter.senders {
                        let _ = tx.send(Ok(Arc::clone(&page)));
                    }
                }
                matched.push((view_id, page));
            }
            if !matched.is_empty() {
                Self::maybe_stop_rescan(&mut st, tag);
            }
            matched
        };

        for (view_id, page) in matched {
            let state = Arc::clone(state);
            let tag = tag.to_string();
            let guid = page.guid().to_string();
            let id = view_id.clone();
            page.on_close(Box::new(move || {
                let mut st = state.lock().unwrap();
                // Only drop the entry if the id is still bound to this page.
                let still_bound = st
                    .correlations
                    .get(&id)
                    .map(|p| p.guid() == guid)
                    .unwrap_or(false);
                if still_bound {
                    st.correlations.remove(&id);
                    debug!("[{}] page {} closed, correlation '{}' dropped", tag, guid, id);
                }
            }));
        }
    }
}

impl Drop for PageCorrelator {
    fn drop(&mut self) {
        self.dispose();
    }
}

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collection::{Collision, CollisionPolicy, SitemapCollection};
use crate::decompose::{DecomposedTable, Decomposer};
use crate::fetch::HttpFetcher;
use crate::sitemap;

/// Outcome of fetching and parsing one sitemap document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum NodeStatus {
    Ok,
    /// Fetched, but no `<loc>` entries.
    Empty,
    TransportError(String),
    /// XML broke off; entries before the error were kept.
    ParseError(String),
}

/// One fetched sitemap before it is decomposed and committed.
#[derive(Debug, Clone)]
pub struct SitemapDocument {
    pub url: String,
    /// Every `<loc>` value, nested sitemaps included.
    pub links: Vec<String>,
    /// The `.xml` entries among `links`, to be walked next.
    pub children: Vec<String>,
    pub status: NodeStatus,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub url: String,
    pub identifier: String,
    pub status: NodeStatus,
    pub rows: usize,
    pub depth: usize,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraversalIssue {
    /// `from` is reachable from `to`; following it would never terminate.
    Cycle { from: String, to: String },
    /// `to` was already visited through another branch.
    Duplicate { from: String, to: String },
    Collision(Collision),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TraversalReport {
    pub roots: Vec<String>,
    /// Nodes in the order they were fetched.
    pub nodes: Vec<NodeReport>,
    pub issues: Vec<TraversalIssue>,
    /// Queued or in-flight URLs dropped by cancellation.
    pub abandoned: Vec<String>,
    pub cancelled: bool,
}

impl TraversalReport {
    pub fn count(&self, pred: impl Fn(&NodeStatus) -> bool) -> usize {
        self.nodes.iter().filter(|n| pred(&n.status)).count()
    }

    pub fn collisions(&self) -> impl Iterator<Item = &Collision> {
        self.issues.iter().filter_map(|i| match i {
            TraversalIssue::Collision(c) => Some(c),
            _ => None,
        })
    }
}

pub struct Traversal {
    pub collection: SitemapCollection,
    pub report: TraversalReport,
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Fetches in flight at once. 1 visits depth-first in document order.
    pub concurrency: usize,
    /// Covers root discovery as well as the walk itself.
    pub deadline: Option<Duration>,
    pub collision_policy: CollisionPolicy,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            deadline: None,
            collision_policy: CollisionPolicy::Overwrite,
        }
    }
}

/// A sitemap URL waiting to be fetched.
#[derive(Debug, Clone)]
struct Pending {
    url: String,
    /// Canonical URL of the sitemap that listed this one; `None` for roots.
    parent: Option<String>,
}

struct Fetched {
    pending: Pending,
    document: SitemapDocument,
}

/// A fetched sitemap whose table waits until its subtree is stored.
struct Held {
    url: String,
    parent: Option<String>,
    table: DecomposedTable,
    /// Queued children not yet stored.
    waiting_on: usize,
    /// Fetch position, so leftovers can be stored deepest first.
    seq: usize,
}

/// Everything the coordinator owns. Fetch tasks never touch it.
struct WalkState {
    collection: SitemapCollection,
    report: TraversalReport,
    /// Canonical URLs already queued.
    visited: HashSet<String>,
    /// Canonical parent → canonical children, for every fetched sitemap.
    edges: HashMap<String, Vec<String>>,
    held: HashMap<String, Held>,
}

impl WalkState {
    fn new(policy: CollisionPolicy, roots: &[String]) -> Self {
        Self {
            collection: SitemapCollection::new(policy),
            report: TraversalReport {
                roots: roots.to_vec(),
                ..Default::default()
            },
            visited: HashSet::new(),
            edges: HashMap::new(),
            held: HashMap::new(),
        }
    }

    /// Record one fetched document and return its unvisited children in
    /// document order. Its table is stored once all of those are stored.
    fn commit(&mut self, decomposer: &Decomposer, fetched: Fetched) -> Vec<Pending> {
        let Fetched { pending, document } = fetched;
        let node = sitemap::canonical(&document.url);

        let table = decomposer.decompose(&document.links);
        let seq = self.report.nodes.len();
        self.report.nodes.push(NodeReport {
            url: document.url.clone(),
            identifier: self.collection.key_for(&document.url),
            status: document.status.clone(),
            rows: table.len(),
            depth: table.depth(),
            fetched_at: document.fetched_at,
        });

        let mut next = Vec::new();
        for child in document.children {
            let canonical = sitemap::canonical(&child);
            if self.visited.insert(canonical.clone()) {
                next.push(Pending {
                    url: child,
                    parent: Some(node.clone()),
                });
            } else if self.reaches(&canonical, &node) {
                warn!("Cycle: {} lists {}, which leads back to it", document.url, child);
                self.report.issues.push(TraversalIssue::Cycle {
                    from: document.url.clone(),
                    to: child,
                });
            } else {
                debug!("Already visited: {}", child);
                self.report.issues.push(TraversalIssue::Duplicate {
                    from: document.url.clone(),
                    to: child,
                });
            }
            self.edges.entry(node.clone()).or_default().push(canonical);
        }

        self.held.insert(
            node.clone(),
            Held {
                url: document.url,
                parent: pending.parent,
                table,
                waiting_on: next.len(),
                seq,
            },
        );
        if next.is_empty() {
            self.settle(node);
        }
        next
    }

    /// Whether `to` can be reached from `from` over the links fetched so far.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(at) = stack.pop() {
            if at == to {
                return true;
            }
            if !seen.insert(at) {
                continue;
            }
            if let Some(children) = self.edges.get(at) {
                stack.extend(children.iter().map(String::as_str));
            }
        }
        false
    }

    /// Store `node`, then every ancestor whose last outstanding child it was.
    fn settle(&mut self, mut node: String) {
        while let Some(held) = self.held.remove(&node) {
            let parent = held.parent.clone();
            self.store(held);

            let Some(parent) = parent else { return };
            let Some(waiting) = self.held.get_mut(&parent) else { return };
            waiting.waiting_on = waiting.waiting_on.saturating_sub(1);
            if waiting.waiting_on > 0 {
                return;
            }
            node = parent;
        }
    }

    /// Store tables still waiting on abandoned children, descendants first.
    fn flush(&mut self) {
        let mut rest: Vec<Held> = self.held.drain().map(|(_, h)| h).collect();
        rest.sort_by(|a, b| b.seq.cmp(&a.seq));
        for held in rest {
            self.store(held);
        }
    }

    fn store(&mut self, held: Held) {
        if let Some(collision) = self.collection.insert(&held.url, held.table) {
            self.report.issues.push(TraversalIssue::Collision(collision));
        }
    }
}

pub struct Walker {
    fetcher: HttpFetcher,
    decomposer: Decomposer,
    options: WalkOptions,
}

impl Walker {
    pub fn new(fetcher: HttpFetcher, decomposer: Decomposer, options: WalkOptions) -> Self {
        Self {
            fetcher,
            decomposer,
            options,
        }
    }

    /// Discover roots from `{base_url}/robots.txt` and walk every sitemap below them.
    pub async fn walk(&self, base_url: &str, cancel: CancellationToken) -> Traversal {
        let expires = self.expiry();

        let discovered = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Traversal cancelled before robots.txt was read");
                None
            }
            _ = expire(expires) => {
                warn!("Traversal deadline reached before robots.txt was read");
                None
            }
            roots = sitemap::discover_roots(&self.fetcher, base_url) => Some(roots),
        };

        match discovered {
            Some(roots) => self.traverse(roots, cancel, expires).await,
            None => {
                let mut state = WalkState::new(self.options.collision_policy, &[]);
                state.report.cancelled = true;
                Traversal {
                    collection: state.collection,
                    report: state.report,
                }
            }
        }
    }

    /// Walk from known roots, skipping robots.txt.
    pub async fn walk_from(&self, roots: Vec<String>, cancel: CancellationToken) -> Traversal {
        self.traverse(roots, cancel, self.expiry()).await
    }

    fn expiry(&self) -> Option<Instant> {
        self.options.deadline.map(|d| Instant::now() + d)
    }

    /// Work-queue traversal. The coordinator alone touches the queue, visited set
    /// and collection; fetches run as tasks and report back over a channel.
    async fn traverse(
        &self,
        roots: Vec<String>,
        cancel: CancellationToken,
        expires: Option<Instant>,
    ) -> Traversal {
        let concurrency = self.options.concurrency.max(1);
        let token = cancel.child_token();
        let mut state = WalkState::new(self.options.collision_policy, &roots);

        let mut stack: Vec<Pending> = Vec::new();
        for root in roots {
            if state.visited.insert(sitemap::canonical(&root)) {
                stack.push(Pending {
                    url: root,
                    parent: None,
                });
            } else {
                state.report.issues.push(TraversalIssue::Duplicate {
                    from: "robots.txt".to_string(),
                    to: root,
                });
            }
        }
        // LIFO: the first root is fetched first.
        stack.reverse();

        let (tx, mut rx) = mpsc::channel::<Fetched>(concurrency * 2);
        let mut in_flight: HashSet<String> = HashSet::new();

        let expired = expire(expires);
        tokio::pin!(expired);

        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(120));

        loop {
            while in_flight.len() < concurrency {
                let Some(next) = stack.pop() else { break };
                in_flight.insert(next.url.clone());
                self.spawn_fetch(next, tx.clone(), token.clone());
            }
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    warn!("Traversal cancelled");
                    state.report.cancelled = true;
                    break;
                }
                _ = &mut expired => {
                    warn!("Traversal deadline reached");
                    token.cancel();
                    state.report.cancelled = true;
                    break;
                }
                Some(fetched) = rx.recv() => {
                    in_flight.remove(&fetched.pending.url);
                    let children = state.commit(&self.decomposer, fetched);
                    stack.extend(children.into_iter().rev());
                    pb.set_message(format!(
                        "{} sitemaps done, {} queued",
                        state.report.nodes.len(),
                        stack.len()
                    ));
                }
            }
        }

        pb.finish_and_clear();

        if state.report.cancelled {
            let mut abandoned: Vec<String> = in_flight.into_iter().collect();
            abandoned.sort();
            abandoned.extend(stack.into_iter().rev().map(|p| p.url));
            state.report.abandoned = abandoned;
        }
        state.flush();

        let WalkState {
            collection, report, ..
        } = state;
        info!(
            "Visited {} sitemaps ({} ok, {} empty, {} failed), {} tables",
            report.nodes.len(),
            report.count(|s| *s == NodeStatus::Ok),
            report.count(|s| *s == NodeStatus::Empty),
            report.count(|s| {
                matches!(s, NodeStatus::TransportError(_) | NodeStatus::ParseError(_))
            }),
            collection.len()
        );

        Traversal { collection, report }
    }

    fn spawn_fetch(&self, pending: Pending, tx: mpsc::Sender<Fetched>, token: CancellationToken) {
        let fetcher = self.fetcher.clone();
        tokio::spawn(async move {
            let document = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                doc = fetch_document(&fetcher, &pending.url) => doc,
            };
            let _ = tx.send(Fetched { pending, document }).await;
        });
    }
}

async fn expire(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}


/// Fetch and parse one sitemap. Failures degrade to an empty document.
pub async fn fetch_document(fetcher: &HttpFetcher, url: &str) -> SitemapDocument {
    let fetched_at = Utc::now();

    let (links, status) = match fetcher.get_text(url).await {
        Err(e) => {
            warn!("Sitemap fetch failed: {}", e);
            (Vec::new(), NodeStatus::TransportError(e.to_string()))
        }
        Ok(xml) => {
            let parsed = sitemap::parse_locs(&xml);
            let status = match parsed.error {
                Some(e) => {
                    warn!("Malformed sitemap {}: {}", url, e);
                    NodeStatus::ParseError(e)
                }
                None if parsed.locs.is_empty() => NodeStatus::Empty,
                None => NodeStatus::Ok,
            };
            (parsed.locs, status)
        }
    };

    let children = links
        .iter()
        .filter(|l| sitemap::is_nested_sitemap(l))
        .cloned()
        .collect();
    debug!("{}: {} entries ({:?})", url, links.len(), status);

    SitemapDocument {
        url: url.to_string(),
        links,
        children,
        status,
        fetched_at,
    }
}

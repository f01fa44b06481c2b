//! Snapshot diffing for keyed record sets.
//!
//! A [`Reconciler`] owns the last-known [`Snapshot`] of one source. Each scan
//! of the source is walked in order and every record is classified against
//! the snapshot:
//!
//! - key seen before → [`ChangeKind::Unchanged`]
//! - key not seen before → [`ChangeKind::Added`]
//! - snapshot key missing from the scan → [`ChangeKind::Removed`]
//!
//! The scan then becomes the new snapshot. If the scan breaks off midway,
//! nothing is replaced and every snapshot item is reported unchanged, so a
//! displayed list stays stable. If no scan can be started at all the caller
//! gets [`ReconcileError::Unavailable`].
//!
//! Reconciles for one source are serialized by `&mut self`; reconcilers for
//! different sources are independent.
//!
//! # Example
//!
//! ```
//! use feedsync::delta::{ChangeKind, Reconciler, ScanInterrupted};
//!
//! let mut reconciler = Reconciler::new(|n: &u32| *n);
//! let first = reconciler.reconcile_scan(Some([1, 2].map(Ok::<u32, ScanInterrupted>))).unwrap();
//! assert_eq!(first.added().count(), 2);
//!
//! let second = reconciler.reconcile_scan(Some([2, 3].map(Ok::<u32, ScanInterrupted>))).unwrap();
//! let kinds = second.kinds_by(|n| *n);
//! assert_eq!(kinds[&1], ChangeKind::Removed);
//! assert_eq!(kinds[&2], ChangeKind::Unchanged);
//! assert_eq!(kinds[&3], ChangeKind::Added);
//! ```

mod notify;

use std::collections::HashMap;
use std::hash::Hash;

use thiserror::Error;
use tokio::sync::mpsc;

pub use notify::{change_channel, ChangeNotifier, ChangeSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Unchanged,
    Added,
    Removed,
}

/// The scan source went away partway through a walk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Scan interrupted: {reason}")]
pub struct ScanInterrupted {
    pub reason: String,
}

impl ScanInterrupted {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// No scan could be obtained; the snapshot was left untouched
    #[error("Scan source unavailable")]
    Unavailable,
}

/// Last-known state of a keyed collection. Keys are unique.
#[derive(Debug, Clone)]
pub struct Snapshot<T, K> {
    items: HashMap<K, T>,
}

impl<T: PartialEq, K: Eq + Hash> PartialEq for Snapshot<T, K> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: Eq, K: Eq + Hash> Eq for Snapshot<T, K> {}

impl<T, K> Default for Snapshot<T, K> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
        }
    }
}

impl<T, K: Eq + Hash> Snapshot<T, K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot keyed by `key_fn`; a later record replaces an earlier one with the same key.
    pub fn from_records<I, F>(records: I, key_fn: F) -> Self
    where
        I: IntoIterator<Item = T>,
        F: Fn(&T) -> K,
    {
        Self {
            items: records.into_iter().map(|r| (key_fn(&r), r)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&T> {
        self.items.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.items.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &T)> {
        self.items.iter()
    }
}

/// Per-item classification from one reconcile pass.
///
/// Scanned records come first, in scan order; removed items follow in
/// unspecified order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<T> {
    changes: Vec<(T, ChangeKind)>,
}

impl<T> Default for Delta<T> {
    fn default() -> Self {
        Self {
            changes: Vec::new(),
        }
    }
}

impl<T> Delta<T> {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(T, ChangeKind)> {
        self.changes.iter()
    }

    /// `true` if any item was added or removed.
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|(_, kind)| *kind != ChangeKind::Unchanged)
    }

    pub fn added(&self) -> impl Iterator<Item = &T> {
        self.of_kind(ChangeKind::Added)
    }

    pub fn removed(&self) -> impl Iterator<Item = &T> {
        self.of_kind(ChangeKind::Removed)
    }

    pub fn unchanged(&self) -> impl Iterator<Item = &T> {
        self.of_kind(ChangeKind::Unchanged)
    }

    fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &T> {
        self.changes
            .iter()
            .filter(move |(_, k)| *k == kind)
            .map(|(item, _)| item)
    }

    /// Classification per key. With duplicate keys the last entry wins.
    pub fn kinds_by<Q, G>(&self, key_fn: G) -> HashMap<Q, ChangeKind>
    where
        Q: Eq + Hash,
        G: Fn(&T) -> Q,
    {
        self.changes
            .iter()
            .map(|(item, kind)| (key_fn(item), *kind))
            .collect()
    }
}

impl<T> IntoIterator for Delta<T> {
    type Item = (T, ChangeKind);
    type IntoIter = std::vec::IntoIter<(T, ChangeKind)>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Output of [`reconcile`]: the classification and the snapshot to keep.
#[derive(Debug, Clone)]
pub struct Reconciled<T, K> {
    pub delta: Delta<T>,
    pub snapshot: Snapshot<T, K>,
}

/// Classifies `records` against `previous`.
///
/// `previous = None` is a first run: every record is added. Duplicate keys in
/// `records` are not rejected; the new snapshot keeps the last one.
///
/// # Errors
///
/// Returns the first [`ScanInterrupted`] yielded by `records`; nothing
/// computed up to that point is kept.
pub fn reconcile<T, K, I, F>(
    previous: Option<&Snapshot<T, K>>,
    records: I,
    key_fn: F,
) -> Result<Reconciled<T, K>, ScanInterrupted>
where
    T: Clone,
    K: Eq + Hash,
    I: IntoIterator<Item = Result<T, ScanInterrupted>>,
    F: Fn(&T) -> K,
{
    let mut working: HashMap<&K, &T> = previous
        .map(|snapshot| snapshot.items.iter().collect())
        .unwrap_or_default();
    let mut changes = Vec::new();
    let mut current = HashMap::new();

    for record in records {
        let item = record?;
        let key = key_fn(&item);
        let kind = if working.remove(&key).is_some() {
            ChangeKind::Unchanged
        } else {
            ChangeKind::Added
        };
        changes.push((item.clone(), kind));
        current.insert(key, item);
    }

    changes.extend(
        working
            .into_values()
            .map(|item| (item.clone(), ChangeKind::Removed)),
    );

    Ok(Reconciled {
        delta: Delta { changes },
        snapshot: Snapshot { items: current },
    })
}

/// A source that can be scanned for records, e.g. a query over local storage.
pub trait ScanSource {
    type Item;
    type Scan: IntoIterator<Item = Result<Self::Item, ScanInterrupted>>;

    /// Starts a scan, or `None` if the source cannot be read right now.
    fn scan(&self) -> Option<Self::Scan>;
}

/// Owner of one source's snapshot.
pub struct Reconciler<T, K, F> {
    snapshot: Option<Snapshot<T, K>>,
    key_fn: F,
}

impl<T, K, F> Reconciler<T, K, F>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    pub fn new(key_fn: F) -> Self {
        Self {
            snapshot: None,
            key_fn,
        }
    }

    pub fn with_snapshot(snapshot: Snapshot<T, K>, key_fn: F) -> Self {
        Self {
            snapshot: Some(snapshot),
            key_fn,
        }
    }

    pub fn snapshot(&self) -> Option<&Snapshot<T, K>> {
        self.snapshot.as_ref()
    }

    /// Reconciles one scan and, on success, replaces the snapshot.
    ///
    /// An interrupted scan is not an error: the result reports every item of
    /// the current snapshot as unchanged and the snapshot is kept.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::Unavailable`] when `scan` is `None`.
    pub fn reconcile_scan<I>(&mut self, scan: Option<I>) -> Result<Delta<T>, ReconcileError>
    where
        I: IntoIterator<Item = Result<T, ScanInterrupted>>,
    {
        let Some(records) = scan else {
            tracing::debug!("No scan available, keeping previous snapshot");
            return Err(ReconcileError::Unavailable);
        };

        match reconcile(self.snapshot.as_ref(), records, &self.key_fn) {
            Ok(Reconciled { delta, snapshot }) => {
                self.snapshot = Some(snapshot);
                Ok(delta)
            }
            Err(interrupted) => {
                tracing::debug!(
                    reason = %interrupted.reason,
                    "Scan interrupted, reporting previous snapshot as unchanged"
                );
                Ok(self.unchanged_delta())
            }
        }
    }

    pub fn reconcile_source<S>(&mut self, source: &S) -> Result<Delta<T>, ReconcileError>
    where
        S: ScanSource<Item = T>,
    {
        self.reconcile_scan(source.scan())
    }

    /// Reconciles `source` now and again after every change notification.
    ///
    /// Each result is sent on `tx`. Returns (handing back the reconciler) once
    /// every [`ChangeNotifier`] is dropped or the receiver goes away.
    pub async fn watch<S>(
        mut self,
        source: S,
        mut subscription: ChangeSubscription,
        tx: mpsc::Sender<Result<Delta<T>, ReconcileError>>,
    ) -> Self
    where
        S: ScanSource<Item = T>,
    {
        loop {
            let result = self.reconcile_source(&source);
            if tx.send(result).await.is_err() {
                tracing::debug!("Delta receiver dropped, stopping watch");
                break;
            }
            if !subscription.changed().await {
                tracing::debug!("Change channel closed, stopping watch");
                break;
            }
        }
        self
    }

    fn unchanged_delta(&self) -> Delta<T> {
        let changes = self
            .snapshot
            .iter()
            .flat_map(|snapshot| snapshot.items.values())
            .map(|item| (item.clone(), ChangeKind::Unchanged))
            .collect();
        Delta { changes }
    }
}

impl<T, K, F> std::fmt::Debug for Reconciler<T, K, F>
where
    T: std::fmt::Debug,
    K: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

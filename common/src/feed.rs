use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// Prefix of every image source handed to the rendering layer.
pub const DATA_URI_PREFIX: &str = "data:image/jpg;base64,";

/// Shown until the first frame arrives.
pub const PLACEHOLDER_BASE64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAUAAAAFCAYAAACNbyblAAAAHElEQVQI12P4";

/// Build a data URI from base64 image text.
pub fn image_data_uri(base64: &str) -> String {
    format!("{DATA_URI_PREFIX}{base64}")
}

/// Whether the feed keeps one image slot or accumulates snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedLayout {
    #[default]
    Single,
    Multi,
}

/// Index of a snapshot inside the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHandle(pub usize);

/// One displayed image. Only the base64 text is stored; the data URI is
/// derived from it on every read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    base64: String,
    /// 0 while the placeholder is shown.
    seq: u64,
    updated_at_ms: Option<i64>,
}

impl Snapshot {
    fn placeholder() -> Self {
        Self {
            base64: PLACEHOLDER_BASE64.to_owned(),
            seq: 0,
            updated_at_ms: None,
        }
    }

    pub fn base64(&self) -> &str {
        &self.base64
    }

    pub fn image_src(&self) -> String {
        image_data_uri(&self.base64)
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn updated_at_ms(&self) -> Option<i64> {
        self.updated_at_ms
    }

    pub fn is_placeholder(&self) -> bool {
        self.seq == 0
    }

    fn view(&self) -> SnapshotView {
        SnapshotView {
            image_src: self.image_src(),
            seq: self.seq,
            updated_at_ms: self.updated_at_ms,
        }
    }
}

/// Serializable record consumed by the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotView {
    pub image_src: String,
    pub seq: u64,
    pub updated_at_ms: Option<i64>,
}

impl SnapshotView {
    /// Raw image bytes behind `image_src`, or `None` for the placeholder.
    pub fn image_bytes(&self) -> Option<Vec<u8>> {
        if self.seq == 0 {
            return None;
        }
        let base64 = self.image_src.strip_prefix(DATA_URI_PREFIX)?;
        crate::decoder::image_bytes(base64).ok()
    }
}

/// What observers see after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "layout", rename_all = "lowercase")]
pub enum FeedView {
    Single { current: Option<SnapshotView> },
    Multi { snapshots: Vec<SnapshotView> },
}

impl FeedView {
    /// View before the first snapshot exists. The page renders the
    /// placeholder image for it, so a viewer never starts blank.
    pub fn empty(layout: FeedLayout) -> Self {
        match layout {
            FeedLayout::Single => FeedView::Single { current: None },
            FeedLayout::Multi => FeedView::Multi {
                snapshots: Vec::new(),
            },
        }
    }

    pub fn latest(&self) -> Option<&SnapshotView> {
        match self {
            FeedView::Single { current } => current.as_ref(),
            FeedView::Multi { snapshots } => snapshots.last(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("no snapshot exists yet")]
    NoSnapshot,
}

/// Owned image feed. Every mutation is published to watch subscribers.
pub struct FeedState {
    layout: FeedLayout,
    snapshots: Vec<Snapshot>,
    next_seq: u64,
    tx: watch::Sender<FeedView>,
}

impl FeedState {
    pub fn new(layout: FeedLayout) -> Self {
        let (tx, _rx) = watch::channel(FeedView::empty(layout));
        Self {
            layout,
            snapshots: Vec::new(),
            next_seq: 1,
            tx,
        }
    }

    pub fn layout(&self) -> FeedLayout {
        self.layout
    }

    /// Start a new placeholder snapshot. The single layout re-initializes its
    /// one slot instead of appending.
    pub fn create_snapshot(&mut self) -> SnapshotHandle {
        match self.layout {
            FeedLayout::Single => {
                self.snapshots.clear();
                self.snapshots.push(Snapshot::placeholder());
            }
            FeedLayout::Multi => self.snapshots.push(Snapshot::placeholder()),
        }
        let handle = SnapshotHandle(self.snapshots.len() - 1);
        debug!(index = handle.0, layout = ?self.layout, "snapshot created");
        self.publish();
        handle
    }

    /// Replace the image of the most recently created snapshot.
    pub fn update_latest(&mut self, base64: impl Into<String>) -> Result<SnapshotHandle, FeedError> {
        let index = self.snapshots.len().checked_sub(1).ok_or(FeedError::NoSnapshot)?;
        let seq = self.next_seq;
        self.next_seq += 1;

        let latest = &mut self.snapshots[index];
        latest.base64 = base64.into();
        latest.seq = seq;
        latest.updated_at_ms = Some(chrono::Utc::now().timestamp_millis());

        self.publish();
        Ok(SnapshotHandle(index))
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn get(&self, handle: SnapshotHandle) -> Option<&Snapshot> {
        self.snapshots.get(handle.0)
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn view(&self) -> FeedView {
        match self.layout {
            FeedLayout::Single => FeedView::Single {
                current: self.snapshots.last().map(Snapshot::view),
            },
            FeedLayout::Multi => FeedView::Multi {
                snapshots: self.snapshots.iter().map(Snapshot::view).collect(),
            },
        }
    }

    /// Observe the feed. The receiver starts at the current view.
    pub fn subscribe(&self) -> watch::Receiver<FeedView> {
        self.tx.subscribe()
    }

    fn publish(&self) {
        self.tx.send_replace(self.view());
    }
}

//! Ephemeral on-screen markers.
//!
//! The engine never waits on a marker. Requests go over an unbounded channel
//! to a renderer task; each marker is shown for its duration and then its
//! completion callback runs on the renderer side.

use crate::geometry::AbsolutePosition;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type OnDone = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Point(AbsolutePosition),
    Rect(AbsolutePosition, AbsolutePosition),
}

struct MarkerRequest {
    marker: Marker,
    duration: Duration,
    on_done: Option<OnDone>,
}

/// Draws a marker and returns once it has been dismissed.
#[async_trait::async_trait]
pub trait MarkerRenderer: Send + Sync + 'static {
    async fn show(&self, marker: Marker, duration: Duration);
}

/// Renderer that only logs the marker and holds it for its duration.
pub struct TracingRenderer;

#[async_trait::async_trait]
impl MarkerRenderer for TracingRenderer {
    async fn show(&self, marker: Marker, duration: Duration) {
        debug!("Overlay marker {:?} for {:?}", marker, duration);
        tokio::time::sleep(duration).await;
    }
}

/// Handle used by engines to queue markers.
#[derive(Clone)]
pub struct Overlay {
    tx: mpsc::UnboundedSender<MarkerRequest>,
}

impl Overlay {
    /// Starts the renderer loop. It stops when the token fires or every
    /// handle has been dropped.
    pub fn spawn(renderer: Arc<dyn MarkerRenderer>, token: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<MarkerRequest>();
        let handle = tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    request = rx.recv() => request,
                    _ = token.cancelled() => None,
                };
                let Some(request) = request else {
                    break;
                };
                let renderer = Arc::clone(&renderer);
                tokio::spawn(async move {
                    renderer.show(request.marker, request.duration).await;
                    if let Some(on_done) = request.on_done {
                        on_done();
                    }
                });
            }
            info!("Overlay renderer stopped");
        });
        (Self { tx }, handle)
    }

    /// A handle whose markers are discarded.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn show_point_marker(&self, position: AbsolutePosition, duration: Duration, on_done: Option<OnDone>) {
        self.enqueue(Marker::Point(position), duration, on_done);
    }

    pub fn show_rect_marker(
        &self,
        start: AbsolutePosition,
        end: AbsolutePosition,
        duration: Duration,
        on_done: Option<OnDone>,
    ) {
        self.enqueue(Marker::Rect(start, end), duration, on_done);
    }

    fn enqueue(&self, marker: Marker, duration: Duration, on_done: Option<OnDone>) {
        let request = MarkerRequest {
            marker,
            duration,
            on_done,
        };
        if self.tx.send(request).is_err() {
            debug!("Overlay renderer not running, dropping {:?}", marker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        shown: Mutex<Vec<Marker>>,
    }

    #[async_trait::async_trait]
    impl MarkerRenderer for Recorder {
        async fn show(&self, marker: Marker, _duration: Duration) {
            self.shown.lock().unwrap().push(marker);
        }
    }

    #[tokio::test]
    async fn markers_are_rendered_and_callbacks_run() {
        let recorder = Arc::new(Recorder::default());
        let token = CancellationToken::new();
        let (overlay, handle) = Overlay::spawn(recorder.clone(), token.clone());

        let (point_tx, point_rx) = tokio::sync::oneshot::channel();
        let (rect_tx, rect_rx) = tokio::sync::oneshot::channel();
        overlay.show_point_marker(
            AbsolutePosition::new(3, 4),
            Duration::ZERO,
            Some(Box::new(move || {
                let _ = point_tx.send(());
            })),
        );
        overlay.show_rect_marker(
            AbsolutePosition::new(0, 0),
            AbsolutePosition::new(10, 10),
            Duration::ZERO,
            Some(Box::new(move || {
                let _ = rect_tx.send(());
            })),
        );

        for done in [point_rx, rect_rx] {
            tokio::time::timeout(Duration::from_secs(2), done)
                .await
                .expect("callback ran")
                .unwrap();
        }
        let shown = recorder.shown.lock().unwrap().clone();
        assert_eq!(shown.len(), 2);
        assert!(shown.contains(&Marker::Point(AbsolutePosition::new(3, 4))));

        token.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn disabled_overlay_drops_markers() {
        let overlay = Overlay::disabled();
        overlay.show_point_marker(AbsolutePosition::new(1, 1), Duration::from_secs(1), None);
    }
}

//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use croupier::arbiter::{InputArbiter, InputLock};
use croupier::errors::EngineError;
use croupier::export::{CapacitySignal, Payload, ResultExporter};
use croupier::geometry::{AbsolutePosition, ClientRect, Rgb, ScreenRegion};
use croupier::overlay::Overlay;
use croupier::platforms::{AppWindow, InputDriver, Key, Platform, RecognitionMode, ScreenSource, TextRecognizer};
use croupier::question::{Comando, Question};
use croupier::{Engine, EngineConfig, EngineServices};
use image::{DynamicImage, RgbImage};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const WHITE: Rgb = Rgb(255, 255, 255);
pub const BLACK: Rgb = Rgb(0, 0, 0);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Move(AbsolutePosition),
    Click,
    Down,
    Up,
    Write(String),
    Key(Key, u32),
}

#[derive(Default)]
pub struct RecordingInput {
    pub events: Mutex<Vec<InputEvent>>,
    /// How long each key press takes, to simulate a slow field clear.
    pub key_delay: Mutex<Duration>,
}

impl RecordingInput {
    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clicks(&self) -> usize {
        self.events().iter().filter(|e| **e == InputEvent::Click).count()
    }

    pub fn drags(&self) -> usize {
        self.events().iter().filter(|e| **e == InputEvent::Down).count()
    }

    pub fn written(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                InputEvent::Write(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: InputEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait::async_trait]
impl InputDriver for RecordingInput {
    async fn move_to(&self, position: AbsolutePosition, _travel: Duration) -> Result<(), EngineError> {
        self.record(InputEvent::Move(position));
        Ok(())
    }

    async fn click(&self) -> Result<(), EngineError> {
        self.record(InputEvent::Click);
        Ok(())
    }

    async fn mouse_down(&self) -> Result<(), EngineError> {
        self.record(InputEvent::Down);
        Ok(())
    }

    async fn mouse_up(&self) -> Result<(), EngineError> {
        self.record(InputEvent::Up);
        Ok(())
    }

    async fn write(&self, text: &str) -> Result<(), EngineError> {
        self.record(InputEvent::Write(text.to_string()));
        Ok(())
    }

    async fn key_press(&self, key: Key, presses: u32, _interval: Duration) -> Result<(), EngineError> {
        self.record(InputEvent::Key(key, presses));
        let delay = *self.key_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay * presses).await;
        }
        Ok(())
    }
}

/// Screen and OCR in one: pixels come from a script, text is looked up by
/// the top-left corner of the last captured region.
#[derive(Default)]
pub struct ScriptedDesk {
    pub pixels: Mutex<HashMap<(i32, i32), Rgb>>,
    /// Consumed before `pixels` is consulted.
    pub pixel_script: Mutex<VecDeque<Rgb>>,
    pub texts: Mutex<HashMap<(i32, i32), String>>,
    last_region: Mutex<Option<ScreenRegion>>,
    pub captures: AtomicUsize,
}

impl ScriptedDesk {
    pub fn set_pixel(&self, x: i32, y: i32, color: Rgb) {
        self.pixels.lock().unwrap().insert((x, y), color);
    }

    pub fn script_pixels(&self, colors: &[Rgb]) {
        self.pixel_script.lock().unwrap().extend(colors.iter().copied());
    }

    pub fn set_text(&self, x: i32, y: i32, text: &str) {
        self.texts.lock().unwrap().insert((x, y), text.to_string());
    }
}

impl ScreenSource for ScriptedDesk {
    fn pixel(&self, position: AbsolutePosition) -> Result<Rgb, EngineError> {
        if let Some(color) = self.pixel_script.lock().unwrap().pop_front() {
            return Ok(color);
        }
        Ok(self
            .pixels
            .lock()
            .unwrap()
            .get(&(position.x, position.y))
            .copied()
            .unwrap_or(BLACK))
    }

    fn screenshot(&self, region: ScreenRegion) -> Result<DynamicImage, EngineError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        *self.last_region.lock().unwrap() = Some(region);
        Ok(DynamicImage::ImageRgb8(RgbImage::new(region.width.max(1), region.height.max(1))))
    }
}

#[async_trait::async_trait]
impl TextRecognizer for ScriptedDesk {
    async fn extract_text(&self, _image: &DynamicImage, _mode: RecognitionMode) -> Result<String, EngineError> {
        let region = self
            .last_region
            .lock()
            .unwrap()
            .ok_or_else(|| EngineError::Platform("nothing captured".to_string()))?;
        Ok(self
            .texts
            .lock()
            .unwrap()
            .get(&(region.left, region.top))
            .cloned()
            .unwrap_or_default())
    }
}

/// A 1000x1000 client area at the origin, so relative 0.5 is pixel 500.
pub struct MockWindow {
    pub open: Mutex<bool>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub terminations: AtomicUsize,
    pub focused: AtomicUsize,
    pub minimized: AtomicUsize,
    /// `is_open` checks that still report open after a close.
    pub lingering_checks: AtomicUsize,
    /// Whether a close leaves the window up until it is terminated.
    pub ignores_close: AtomicBool,
    /// Whether launching leaves the window closed.
    pub fails_to_appear: AtomicBool,
}

impl MockWindow {
    pub fn new(open: bool) -> Self {
        Self {
            open: Mutex::new(open),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            terminations: AtomicUsize::new(0),
            focused: AtomicUsize::new(0),
            minimized: AtomicUsize::new(0),
            lingering_checks: AtomicUsize::new(0),
            ignores_close: AtomicBool::new(false),
            fails_to_appear: AtomicBool::new(false),
        }
    }

    pub fn linger(&self, checks: usize) {
        self.lingering_checks.store(checks, Ordering::SeqCst);
    }
}

impl AppWindow for MockWindow {
    fn title(&self) -> &str {
        "mock"
    }

    fn client_rect(&self) -> Result<ClientRect, EngineError> {
        Ok(ClientRect {
            left: 0,
            top: 0,
            width: 1000,
            height: 1000,
        })
    }

    fn is_open(&self) -> bool {
        let open = self.open.lock().unwrap();
        if !*open {
            let lingering = self.lingering_checks.load(Ordering::SeqCst);
            if lingering > 0 && self.closes.load(Ordering::SeqCst) > 0 {
                self.lingering_checks.store(lingering - 1, Ordering::SeqCst);
                return true;
            }
        }
        *open
    }

    fn restore_and_focus(&self) -> Result<(), EngineError> {
        self.focused.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn minimize(&self) -> Result<(), EngineError> {
        self.minimized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), EngineError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if !self.ignores_close.load(Ordering::SeqCst) {
            *self.open.lock().unwrap() = false;
        }
        Ok(())
    }

    fn terminate(&self) -> Result<(), EngineError> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        *self.open.lock().unwrap() = false;
        Ok(())
    }

    fn open(&self, _launcher: &Path) -> Result<(), EngineError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.fails_to_appear.load(Ordering::SeqCst) {
            *self.open.lock().unwrap() = true;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingExporter {
    pub payloads: Mutex<Vec<Payload>>,
    pub fail: bool,
}

impl RecordingExporter {
    pub fn payloads(&self) -> Vec<Payload> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ResultExporter for RecordingExporter {
    async fn export(&self, payload: &Payload) -> Result<(), EngineError> {
        self.payloads.lock().unwrap().push(payload.clone());
        if self.fail {
            return Err(EngineError::TransportFailure("endpoint down".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingSignal {
    pub signals: AtomicUsize,
}

impl CapacitySignal for CountingSignal {
    fn capacity_available(&self, _app: &str) {
        self.signals.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub input: Arc<RecordingInput>,
    pub desk: Arc<ScriptedDesk>,
    pub window: Arc<MockWindow>,
    pub exporter: Arc<RecordingExporter>,
    pub signal: Arc<CountingSignal>,
    pub token: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_exporter(RecordingExporter::default())
    }

    pub fn with_exporter(exporter: RecordingExporter) -> Self {
        init_tracing();
        Self {
            dir: tempfile::tempdir().unwrap(),
            input: Arc::new(RecordingInput::default()),
            desk: Arc::new(ScriptedDesk::default()),
            window: Arc::new(MockWindow::new(false)),
            exporter: Arc::new(exporter),
            signal: Arc::new(CountingSignal::default()),
            token: CancellationToken::new(),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("Mapeamentos")
    }

    /// Writes `<root>/pppoker/<kind>/<name>.txt`.
    pub fn mapping(&self, kind: &str, name: &str, commands: Value) {
        let folder = self.root().join("pppoker").join(kind);
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(
            folder.join(format!("{name}.txt")),
            serde_json::to_string_pretty(&commands).unwrap(),
        )
        .unwrap();
    }

    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default().without_delays();
        config.mapping_root = self.root();
        config.color_attempts = 3;
        config
    }

    pub fn platform(&self) -> Platform {
        Platform::new(
            self.input.clone(),
            self.desk.clone(),
            self.desk.clone(),
            self.window.clone(),
        )
    }

    pub fn services(&self) -> EngineServices {
        EngineServices {
            exporter: self.exporter.clone(),
            signal: self.signal.clone(),
            overlay: Overlay::disabled(),
            arbiter: Arc::new(InputArbiter::new(InputLock::new(
                Duration::from_millis(200),
                Duration::from_millis(1),
                Duration::from_secs(60),
            ))),
        }
    }

    pub fn engine(&self, config: EngineConfig) -> Engine {
        Engine::new(
            "pppoker",
            Arc::new(config),
            self.platform(),
            self.services(),
            self.token.child_token(),
        )
    }

    pub fn opens(&self) -> usize {
        self.window.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.window.closes.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.window.terminations.load(Ordering::SeqCst)
    }

    pub fn signals(&self) -> usize {
        self.signal.signals.load(Ordering::SeqCst)
    }
}

pub fn comando(action: &str, extra: &[(&str, &str)]) -> Comando {
    let mut question = Question::new();
    question.set("App", "pppoker");
    question.set("Action", action);
    for (name, value) in extra {
        question.set(*name, *value);
    }
    Comando::new(question, "Input")
}

//! The replay engine for one target application.
//!
//! An engine owns a queue of [`Comando`]s. For the head of that queue it
//! expands the recorded mappings into a flat command list (parameter change,
//! base/return/navigation/action files, webhook) and dispatches the commands
//! one by one under the input lease. Verification timeouts relaunch the
//! application and restart the Comando; after the retry limit it is dropped.

use crate::arbiter::{InputArbiter, InputLease};
use crate::cancellation::{ensure_running, pause, with_cancellation};
use crate::catalog::FeatureCatalog;
use crate::command::{ColorCondition, Command, CommandStore, MappingKind, WriteText};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::export::{CapacitySignal, Payload, ResultExporter};
use crate::geometry::{AbsolutePosition, RelativeArea, RelativePosition, Rgb};
use crate::overlay::Overlay;
use crate::platforms::{InputDriver, Key, Platform};
use crate::question::{AttrValue, Comando, Question, Scalar, ACTION, CHOSEN_FEATURE, OK, TIMENOW};
use crate::scroll::{scroll_search, ScrollSpec, ScrollSurface};
use crate::verify::compare::{evaluate, operand_label, Operand, ResolvedOperand};
use crate::verify::{ColorWait, Comparison, Resolution, TextReader};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

const MARKER_DURATION: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No Comando loaded.
    Idle,
    /// Dispatching commands for the head Comando.
    Running,
    /// The head Comando finished; the next one is being loaded.
    AwaitingNextOperation,
}

/// Shared collaborators handed to every engine.
#[derive(Clone)]
pub struct EngineServices {
    pub exporter: Arc<dyn ResultExporter>,
    pub signal: Arc<dyn CapacitySignal>,
    pub overlay: Overlay,
    pub arbiter: Arc<InputArbiter>,
}

pub struct Engine {
    app: String,
    config: Arc<EngineConfig>,
    platform: Platform,
    reader: TextReader,
    store: CommandStore,
    services: EngineServices,
    token: CancellationToken,

    state: EngineState,
    retries: u32,
    commands: VecDeque<Command>,
    command_list: VecDeque<Comando>,
    /// The last two operations run, oldest first.
    history: VecDeque<String>,
    question: Question,
    current_operation: Option<String>,
}

impl Engine {
    pub fn new(
        app: impl Into<String>,
        config: Arc<EngineConfig>,
        platform: Platform,
        services: EngineServices,
        token: CancellationToken,
    ) -> Self {
        let app = app.into().trim().to_lowercase();
        let reader = TextReader::new(
            Arc::clone(&platform.screen),
            Arc::clone(&platform.recognizer),
            config.ocr_attempts,
            config.ocr_retry_delay(),
        )
        .with_mode(config.ocr_mode)
        .with_capture_dir(config.capture_dir.clone());
        let store = CommandStore::new(config.mapping_root.clone());
        services.arbiter.register(&app, Arc::clone(&platform.window));

        Self {
            app,
            config,
            platform,
            reader,
            store,
            services,
            token,
            state: EngineState::Idle,
            retries: 0,
            commands: VecDeque::new(),
            command_list: VecDeque::new(),
            history: VecDeque::with_capacity(2),
            question: Question::new(),
            current_operation: None,
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn question(&self) -> &Question {
        &self.question
    }

    pub fn pending(&self) -> usize {
        self.command_list.len()
    }

    pub fn queued_commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    fn catalog(&self) -> &FeatureCatalog {
        &self.config.catalog
    }

    fn operation_label(&self) -> String {
        self.current_operation.clone().unwrap_or_else(|| "unknown".to_string())
    }

    /// Queues a Comando. An idle engine loads its commands right away; call
    /// [`Engine::run`] to dispatch them.
    #[instrument(skip(self, comando), fields(app = %self.app))]
    pub async fn add_operation(&mut self, comando: Comando) -> Result<(), EngineError> {
        info!(
            "Queued operation {} ({} already pending)",
            comando.operation().unwrap_or_default(),
            self.command_list.len()
        );
        self.command_list.push_back(comando);
        if self.state == EngineState::Idle && self.commands.is_empty() {
            self.next_operation().await?;
        }
        Ok(())
    }

    /// Loads the command list for the head Comando, dropping any Comando whose
    /// commands cannot be built. Goes idle when nothing is left.
    #[instrument(skip(self), fields(app = %self.app))]
    pub async fn next_operation(&mut self) -> Result<(), EngineError> {
        loop {
            let Some(comando) = self.command_list.front().cloned() else {
                info!("No more operations queued");
                self.commands.clear();
                self.state = EngineState::Idle;
                return Ok(());
            };
            match self.build_commands(&comando) {
                Ok(commands) => {
                    self.commands = commands;
                    break;
                }
                Err(e) => self.abandon_current(&e),
            }
        }
        self.state = EngineState::Running;
        self.ensure_app_open().await
    }

    fn build_commands(&mut self, comando: &Comando) -> Result<VecDeque<Command>, EngineError> {
        let operation = comando
            .operation()
            .ok_or_else(|| EngineError::UnknownOperation("Comando has no Action".to_string()))?;
        let feature = self
            .catalog()
            .get(&operation)
            .cloned()
            .ok_or_else(|| EngineError::UnknownOperation(operation.clone()))?;
        info!("Performing operation {} in screen {}", operation, feature.screen);

        let mut params: BTreeMap<String, AttrValue> = BTreeMap::new();
        for field in &self.catalog().inputs.fields {
            if field.eq_ignore_ascii_case(TIMENOW) {
                continue;
            }
            let value = comando.question.get(field).unwrap_or_else(AttrValue::empty);
            params.insert(field.clone(), value);
        }
        params.insert(CHOSEN_FEATURE.to_string(), AttrValue::text(operation.clone()));

        let mut commands = VecDeque::new();
        commands.push_back(Command::ParamChange {
            params: params.clone(),
        });

        let app = self.app.clone();
        let load = |kind: MappingKind, name: &str| self.store.load_mapping(&app, kind, name);
        let previous_screen = self
            .history
            .back()
            .and_then(|previous| self.catalog().screen_of(previous))
            .map(str::to_string);

        match previous_screen {
            None => {
                debug!("First operation, loading base mapping");
                commands.extend(load(MappingKind::Base, "Base")?);
                commands.extend(load(MappingKind::Nav, &feature.screen)?);
                commands.extend(load(MappingKind::Act, &operation)?);
            }
            Some(previous) if previous != feature.screen => {
                debug!("Leaving screen {} for {}", previous, feature.screen);
                commands.extend(load(MappingKind::Ret, &previous)?);
                commands.extend(load(MappingKind::Nav, &feature.screen)?);
                commands.extend(load(MappingKind::Act, &operation)?);
            }
            Some(_) => {
                commands.extend(load(MappingKind::Act, &operation)?);
            }
        }
        commands.push_back(Command::Webhook { params });

        if self.history.len() == 2 {
            self.history.pop_front();
        }
        self.history.push_back(operation);
        Ok(commands)
    }

    /// Drops the head Comando after a non-recoverable failure.
    fn abandon_current(&mut self, reason: &EngineError) {
        if let Some(comando) = self.command_list.pop_front() {
            error!(
                "Abandoning operation {}: {}",
                comando.operation().unwrap_or_default(),
                reason
            );
        }
        self.commands.clear();
        self.retries = 0;
        if self.command_list.is_empty() {
            self.services.signal.capacity_available(&self.app);
        }
    }

    async fn ensure_app_open(&mut self) -> Result<(), EngineError> {
        if self.platform.window.is_open() {
            return Ok(());
        }
        let launcher = self.config.launcher_for(&self.app);
        info!("Launching {} from {}", self.app, launcher.display());
        self.platform.window.open(&launcher)?;
        if !self.wait_for_window(true, self.config.open_timeout()).await? {
            return Err(EngineError::WindowNotFound(format!(
                "{} did not appear within {:?} of launching {}",
                self.app,
                self.config.open_timeout(),
                launcher.display()
            )));
        }
        pause(&self.token, self.config.launch_grace()).await?;
        self.services.arbiter.invalidate_foreground(&self.app);
        info!("{} started", self.app);
        Ok(())
    }

    /// Polls the window until its open state is `open` or `timeout` passes.
    /// The state is checked at least once.
    async fn wait_for_window(&self, open: bool, timeout: Duration) -> Result<bool, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.platform.window.is_open() == open {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            pause(&self.token, self.config.window_poll_interval()).await?;
        }
    }

    /// Dispatches queued commands until the engine is idle.
    ///
    /// Only cancellation and an application that cannot be opened or closed
    /// stop the loop with an error; every other failure is handled per Comando.
    #[instrument(skip(self), fields(app = %self.app))]
    pub async fn run(&mut self) -> Result<(), EngineError> {
        if self.commands.is_empty() && !self.command_list.is_empty() {
            self.next_operation().await?;
        } else if !self.commands.is_empty() {
            self.ensure_app_open().await?;
        }
        while let Some(command) = self.commands.pop_front() {
            ensure_running(&self.token)?;
            let span = info_span!("operation", app = %self.app, action = %self.operation_label());
            let result = self.execute(&command).instrument(span).await;
            match result {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    warn!("Stopping {}: {}", self.app, e);
                    return Err(e);
                }
                Err(e) if e.is_retryable() => self.retry_action(&e).await?,
                Err(e) => {
                    self.abandon_current(&e);
                    self.next_operation().await?;
                }
            }
            if self.state == EngineState::AwaitingNextOperation {
                self.next_operation().await?;
            }
            if !self.commands.is_empty() {
                pause(&self.token, self.config.step_pause()).await?;
            }
        }
        self.state = EngineState::Idle;
        Ok(())
    }

    /// Failure policy for verification timeouts.
    #[instrument(skip(self, cause), fields(app = %self.app, retries = self.retries))]
    pub async fn retry_action(&mut self, cause: &EngineError) -> Result<(), EngineError> {
        self.retries += 1;
        let operation = self.operation_label();

        if self.retries >= self.config.max_retries {
            error!(
                "Failed to perform operation {} after {} retries: {}",
                operation, self.retries, cause
            );
            self.abandon_current(cause);
            return self.next_operation().await;
        }

        warn!(
            "Retrying operation {} ({}/{}) after: {}",
            operation, self.retries, self.config.max_retries, cause
        );
        self.question
            .set(OK, format!("Could not perform operation {operation}"));
        self.commands.clear();
        self.history.clear();
        self.relaunch().await?;
        self.next_operation().await
    }

    /// Closes the application, killing it if it lingers, and starts it again.
    async fn relaunch(&mut self) -> Result<(), EngineError> {
        if let Err(e) = self.platform.window.close() {
            warn!("Could not close {}: {}", self.app, e);
        }
        let close_timeout = self.config.close_timeout();
        if !self.wait_for_window(false, close_timeout).await? {
            warn!("{} still open after {:?}, terminating it", self.app, close_timeout);
            self.platform.window.terminate()?;
            if !self.wait_for_window(false, close_timeout).await? {
                return Err(EngineError::Platform(format!(
                    "{} survived termination",
                    self.app
                )));
            }
        }
        self.services.arbiter.invalidate_foreground(&self.app);
        self.ensure_app_open().await
    }

    async fn execute(&mut self, command: &Command) -> Result<(), EngineError> {
        debug!("Executing {}", command.action());
        let lease = match command {
            Command::ParamChange { .. } | Command::Webhook { .. } => None,
            _ => Some(self.services.arbiter.acquire(&self.app, &self.token).await?),
        };
        match command {
            Command::Click { position, condition } => self.click_action(*position, condition.as_ref()).await,
            Command::Write { text } => self.write_action(text).await,
            Command::Color { position, expected } => self.color_action(*position, *expected).await,
            Command::Read { area, attribute } => self.read_action(area, attribute).await.map(|_| ()),
            Command::Compare(comparison) => self.compare_action(comparison).await.map(|_| ()),
            Command::Scroll(spec) => self.scroll_action(spec, lease.as_ref()).await,
            Command::ParamChange { params } => {
                self.param_change_action(params);
                Ok(())
            }
            Command::Webhook { .. } => self.export_action().await,
        }
    }

    fn input(&self) -> GuardedInput<'_> {
        GuardedInput {
            driver: self.platform.input.as_ref(),
            token: &self.token,
        }
    }

    async fn click_action(
        &mut self,
        position: RelativePosition,
        condition: Option<&ColorCondition>,
    ) -> Result<(), EngineError> {
        let window = &self.platform.window;
        let target = window.absolute_position(position)?;

        if let Some(condition) = condition {
            let at = window.absolute_position(condition.position)?;
            self.services.overlay.show_point_marker(at, MARKER_DURATION, None);
            let wait = ColorWait {
                tolerance: self.config.color_tolerance,
                attempts: self.config.click_condition_attempts,
                interval: self.config.color_interval(),
            };
            let matched = wait
                .wait(self.platform.screen.as_ref(), at, condition.expected, &self.token)
                .await?;
            if !matched {
                info!(
                    "Condition {:?} not met at ({}, {}), skipping click",
                    condition.expected, at.x, at.y
                );
                return Ok(());
            }
        }

        self.services.overlay.show_point_marker(target, MARKER_DURATION, None);
        let input = self.input();
        input.move_to(target, self.config.pointer_travel()).await?;
        input.click().await?;
        info!("Clicked at ({}, {})", target.x, target.y);
        Ok(())
    }

    async fn write_action(&mut self, text: &WriteText) -> Result<(), EngineError> {
        let (value, shown) = match text {
            WriteText::Literal(s) | WriteText::Raw(s) => (s.clone(), s.clone()),
            WriteText::Question(name) => {
                let value = self.question.get_text(name).unwrap_or_else(|| {
                    warn!("Question has no attribute '{}', writing nothing", name);
                    String::new()
                });
                (value.clone(), value)
            }
            WriteText::Secret(name) => (resolve_secret(&self.app, name)?, "[secret]".to_string()),
        };

        let input = self.input();
        input
            .key_press(Key::Backspace, self.config.clear_presses, self.config.clear_interval())
            .await?;
        pause(&self.token, self.config.write_pause()).await?;
        input.write(&value).await?;
        info!("Wrote '{}'", shown);
        Ok(())
    }

    async fn color_action(&mut self, position: RelativePosition, expected: Rgb) -> Result<(), EngineError> {
        let at = self.platform.window.absolute_position(position)?;
        self.services.overlay.show_point_marker(at, MARKER_DURATION, None);
        let wait = ColorWait {
            tolerance: self.config.color_tolerance,
            attempts: self.config.color_attempts,
            interval: self.config.color_interval(),
        };
        if wait
            .wait(self.platform.screen.as_ref(), at, expected, &self.token)
            .await?
        {
            info!("Detected {:?} at ({}, {})", expected, at.x, at.y);
            Ok(())
        } else {
            Err(EngineError::VerificationTimeout(format!(
                "{:?} not detected at ({}, {}) after {} attempts",
                expected, at.x, at.y, self.config.color_attempts
            )))
        }
    }

    async fn read_area(&self, area: &RelativeArea) -> Result<String, EngineError> {
        let region = self.platform.window.client_rect()?.to_region(area);
        self.services.overlay.show_rect_marker(
            region.top_left(),
            region.bottom_right(),
            MARKER_DURATION,
            None,
        );
        let operation = self.operation_label();
        self.reader
            .read(region, (self.app.as_str(), operation.as_str()), &self.token)
            .await
    }

    async fn read_action(&mut self, area: &RelativeArea, attribute: &str) -> Result<String, EngineError> {
        let text = self.read_area(area).await?;
        info!("Read '{}' into {}", text, attribute);
        self.question.push(attribute, Scalar::text(text.clone()));
        Ok(text)
    }

    /// Resolves both operands, evaluates and stores the outcome in `Ok`.
    pub async fn compare_action(&mut self, comparison: &Comparison) -> Result<Resolution, EngineError> {
        let mut operands = Vec::with_capacity(2);
        for (index, operand) in [&comparison.lhs, &comparison.rhs].into_iter().enumerate() {
            let value = match operand {
                Operand::Read(area) => self.read_area(area).await?,
                Operand::Question(name) => self.question.get_text(name).unwrap_or_default(),
            };
            operands.push(ResolvedOperand {
                label: operand_label(operand, index),
                value,
            });
        }
        let outcome = evaluate(comparison.op, &operands[0].value, &operands[1].value)?;
        info!(
            "Compared '{}' {} '{}': {}",
            operands[0].value, comparison.op, operands[1].value, outcome
        );
        self.question.set(OK, outcome);
        Ok(Resolution { outcome, operands })
    }

    async fn scroll_action(&mut self, spec: &ScrollSpec, lease: Option<&InputLease>) -> Result<(), EngineError> {
        let operation = self.operation_label();
        let mut surface = EngineSurface {
            platform: &self.platform,
            reader: &self.reader,
            overlay: &self.services.overlay,
            config: &self.config,
            token: &self.token,
            lease,
            label: (self.app.as_str(), operation.as_str()),
        };
        let outcome = scroll_search(
            spec,
            &mut self.question,
            &mut surface,
            self.config.max_scroll_passes,
        )
        .await?;
        info!("Scroll search finished: {:?}", outcome);
        Ok(())
    }

    fn param_change_action(&mut self, params: &BTreeMap<String, AttrValue>) {
        self.question.reset();
        self.question.set(OK, "Ok");
        for (name, value) in params {
            self.question.set(name.clone(), value.clone());
        }
        self.current_operation = params
            .get(CHOSEN_FEATURE)
            .or_else(|| params.get(ACTION))
            .map(|v| v.as_text().trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| self.current_operation.take());
        info!("Updated operation parameters for {}", self.operation_label());
    }

    /// Exports the declared outputs and retires the head Comando.
    async fn export_action(&mut self) -> Result<(), EngineError> {
        self.commands.clear();
        let operation = self.operation_label();
        let outputs = self
            .catalog()
            .get(&operation)
            .map(|f| f.outputs.clone())
            .unwrap_or_default();

        let mut payload = Payload::new();
        for field in &outputs {
            if let Some(value) = self.question.get(field).filter(|v| !v.is_empty()) {
                payload.insert(field.clone(), serde_json::to_value(value)?);
            }
        }

        if payload.is_empty() {
            warn!("No data collected for {}, nothing to export", operation);
        } else if let Err(e) = self.services.exporter.export(&payload).await {
            error!("Export for {} failed: {}", operation, e);
        }

        if let Some(done) = self.command_list.pop_front() {
            info!(
                "Operation {} finished, removing it from the queue",
                done.operation().unwrap_or_default()
            );
        }
        self.retries = 0;
        if self.command_list.is_empty() {
            self.services.signal.capacity_available(&self.app);
        }
        self.state = EngineState::AwaitingNextOperation;
        Ok(())
    }
}

/// `$NAME` resolves `<APP-PREFIX>_<NAME>`, where the prefix is the upper-cased
/// app name without a trailing `POKER`.
pub fn secret_variable(app: &str, name: &str) -> String {
    let upper = app.trim().to_uppercase();
    let prefix = upper.strip_suffix("POKER").unwrap_or(&upper);
    let name = name.trim();
    let full_prefix = format!("{prefix}_");
    if name.to_uppercase().starts_with(&full_prefix) {
        name.to_string()
    } else {
        format!("{full_prefix}{name}")
    }
}

fn resolve_secret(app: &str, name: &str) -> Result<String, EngineError> {
    let variable = secret_variable(app, name);
    match std::env::var(&variable) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(EngineError::MissingSecret(variable)),
    }
}

/// Input calls that give up as soon as an abort is requested.
struct GuardedInput<'a> {
    driver: &'a dyn InputDriver,
    token: &'a CancellationToken,
}

impl GuardedInput<'_> {
    async fn move_to(&self, position: AbsolutePosition, travel: Duration) -> Result<(), EngineError> {
        with_cancellation(self.token, self.driver.move_to(position, travel)).await
    }

    async fn click(&self) -> Result<(), EngineError> {
        with_cancellation(self.token, self.driver.click()).await
    }

    async fn mouse_down(&self) -> Result<(), EngineError> {
        with_cancellation(self.token, self.driver.mouse_down()).await
    }

    async fn mouse_up(&self) -> Result<(), EngineError> {
        with_cancellation(self.token, self.driver.mouse_up()).await
    }

    async fn write(&self, text: &str) -> Result<(), EngineError> {
        with_cancellation(self.token, self.driver.write(text)).await
    }

    async fn key_press(&self, key: Key, presses: u32, interval: Duration) -> Result<(), EngineError> {
        with_cancellation(self.token, self.driver.key_press(key, presses, interval)).await
    }
}

/// Screen access for scroll search, borrowed from the engine.
///
/// A search can outlast the input lease, so every step renews it.
struct EngineSurface<'a> {
    platform: &'a Platform,
    reader: &'a TextReader,
    overlay: &'a Overlay,
    config: &'a EngineConfig,
    token: &'a CancellationToken,
    lease: Option<&'a InputLease>,
    label: (&'a str, &'a str),
}

impl EngineSurface<'_> {
    fn renew_lease(&self) -> Result<(), EngineError> {
        match self.lease {
            Some(lease) => lease.ensure_held(),
            None => Ok(()),
        }
    }

    fn input(&self) -> GuardedInput<'_> {
        GuardedInput {
            driver: self.platform.input.as_ref(),
            token: self.token,
        }
    }
}

#[async_trait::async_trait]
impl ScrollSurface for EngineSurface<'_> {
    async fn read_area(&mut self, area: &RelativeArea) -> Result<String, EngineError> {
        self.renew_lease()?;
        let region = self.platform.window.client_rect()?.to_region(area);
        self.overlay
            .show_rect_marker(region.top_left(), region.bottom_right(), MARKER_DURATION, None);
        self.reader.read(region, self.label, self.token).await
    }

    async fn click_at(&mut self, position: RelativePosition) -> Result<(), EngineError> {
        self.renew_lease()?;
        let target = self.platform.window.absolute_position(position)?;
        self.overlay.show_point_marker(target, MARKER_DURATION, None);
        let input = self.input();
        input.move_to(target, self.config.pointer_travel()).await?;
        input.click().await
    }

    async fn drag(&mut self, from: RelativePosition, to: RelativePosition) -> Result<(), EngineError> {
        self.renew_lease()?;
        let start = self.platform.window.absolute_position(from)?;
        let end = self.platform.window.absolute_position(to)?;
        let input = self.input();
        input.move_to(start, self.config.pointer_travel()).await?;
        input.mouse_down().await?;
        input.move_to(end, self.config.drag_travel()).await?;
        pause(self.token, self.config.drag_settle()).await?;
        input.mouse_up().await
    }
}

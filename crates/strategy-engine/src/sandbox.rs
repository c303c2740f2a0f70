//! Bounded, capability-restricted execution of validated strategy scripts.
//!
//! Every call to [`ScriptSandbox::execute`] builds a brand-new interpreter holding only
//! the granted [`Capability`] set, runs `strategy(data)` under a wall-clock deadline and
//! resource limits, and turns whatever comes back into exactly one [`Signal`] per candle.
//! Failures never escape as errors: they collapse to an all-hold sequence plus a
//! diagnostic in the [`ExecutionReport`].

use std::time::{Duration, Instant};

use rhai::{Array, Dynamic, Engine, EvalAltResult, Scope};
use serde::{Deserialize, Serialize};
use strategy_lab_core::{Candle, Signal};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::capabilities::{candles_to_array, Budget, Capability};
use crate::traits::SignalGenerator;
use crate::validator::{ValidatedStrategy, ENTRY_POINT};

/// Limits and grants for one sandboxed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock budget for the whole script in milliseconds
    pub timeout_ms: u64,
    /// Upper bound on interpreter operations, 0 for unlimited
    pub max_operations: u64,
    /// Maximum function call nesting
    pub max_call_levels: usize,
    /// Maximum expression nesting at global level
    pub max_expr_depth: usize,
    /// Maximum expression nesting inside functions
    pub max_function_expr_depth: usize,
    /// Largest array a script may build
    pub max_array_size: usize,
    /// Largest string a script may build
    pub max_string_size: usize,
    /// Largest object map a script may build
    pub max_map_size: usize,
    /// Host functionality granted to scripts
    pub capabilities: Vec<Capability>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_operations: 0,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
            max_array_size: 1_000_000,
            max_string_size: 64 * 1024,
            max_map_size: 10_000,
            capabilities: Capability::ALL.to_vec(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Same limits with a different wall-clock budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Lifecycle of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Running,
    Completed,
    TimedOut,
    Faulted,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Idle | ExecutionState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::TimedOut => "timed_out",
            ExecutionState::Faulted => "faulted",
            ExecutionState::Cancelled => "cancelled",
        }
    }
}

/// Why a run degraded to all-hold.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SandboxError {
    #[error("strategy exceeded its {0} ms time budget")]
    Timeout(u64),
    #[error("strategy execution was cancelled")]
    Cancelled,
    #[error("strategy failed to compile: {0}")]
    Compile(String),
    #[error("no `fn {ENTRY_POINT}(data)` is defined")]
    MissingEntryPoint,
    #[error("strategy raised an error: {0}")]
    Runtime(String),
    #[error("strategy hit a resource limit: {0}")]
    ResourceLimit(String),
    #[error("strategy returned malformed output: {0}")]
    MalformedOutput(String),
}

impl SandboxError {
    /// Terminal state a run with this failure ends in.
    pub fn state(&self) -> ExecutionState {
        match self {
            SandboxError::Timeout(_) => ExecutionState::TimedOut,
            SandboxError::Cancelled => ExecutionState::Cancelled,
            _ => ExecutionState::Faulted,
        }
    }
}

/// What one sandboxed run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub state: ExecutionState,
    /// Always exactly one signal per candle.
    pub signals: Vec<Signal>,
    pub failure: Option<SandboxError>,
    /// Non-fatal notes, such as a truncated signal array.
    pub diagnostics: Vec<String>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl ExecutionReport {
    pub fn is_degraded(&self) -> bool {
        self.state != ExecutionState::Completed
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Runs validated strategies in a fresh interpreter per call.
#[derive(Debug, Clone, Default)]
pub struct ScriptSandbox {
    config: SandboxConfig,
}

impl ScriptSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn build_engine(&self, budget: Budget) -> Engine {
        let mut engine = Engine::new_raw();
        for capability in &self.config.capabilities {
            capability.install(&mut engine, &budget);
        }
        if !self.config.capabilities.contains(&Capability::Logging) {
            engine.disable_symbol("print");
            engine.disable_symbol("debug");
        }
        engine.disable_symbol("eval");
        engine.disable_symbol("import");
        engine.disable_symbol("export");
        engine.set_module_resolver(rhai::module_resolvers::DummyModuleResolver::new());

        engine.set_max_operations(self.config.max_operations);
        engine.set_max_call_levels(self.config.max_call_levels);
        engine.set_max_expr_depths(
            self.config.max_expr_depth,
            self.config.max_function_expr_depth,
        );
        engine.set_max_array_size(self.config.max_array_size);
        engine.set_max_string_size(self.config.max_string_size);
        engine.set_max_map_size(self.config.max_map_size);

        engine.on_progress(move |_| budget.is_exhausted().then_some(Dynamic::UNIT));
        engine
    }

    /// Runs `strategy` over `candles`. Never fails; see [`ExecutionReport::state`].
    #[instrument(skip_all, fields(candles = candles.len(), timeout_ms = self.config.timeout_ms))]
    pub fn execute(
        &self,
        strategy: &ValidatedStrategy,
        candles: &[Candle],
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let started = Instant::now();
        let mut state = ExecutionState::Idle;
        debug!(state = state.as_str(), "sandbox prepared");

        let outcome = if cancel.is_cancelled() {
            Err(SandboxError::Cancelled)
        } else {
            state = ExecutionState::Running;
            debug!(state = state.as_str(), "strategy running");
            self.run_script(strategy, candles, started, cancel)
        };

        let (signals, diagnostics, failure) = match outcome {
            Ok(output) => match parse_signals(output, candles.len()) {
                Ok((signals, diagnostics)) => (signals, diagnostics, None),
                Err(err) => (Signal::all_hold(candles.len()), Vec::new(), Some(err)),
            },
            Err(err) => (Signal::all_hold(candles.len()), Vec::new(), Some(err)),
        };

        state = failure
            .as_ref()
            .map_or(ExecutionState::Completed, SandboxError::state);
        let elapsed = started.elapsed();

        match &failure {
            Some(err) => warn!(
                state = state.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = %err,
                "strategy degraded to all-hold"
            ),
            None => debug!(
                state = state.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                "strategy completed"
            ),
        }
        for note in &diagnostics {
            warn!(diagnostic = %note, "strategy output adjusted");
        }

        ExecutionReport {
            state,
            signals,
            failure,
            diagnostics,
            elapsed,
        }
    }

    fn run_script(
        &self,
        strategy: &ValidatedStrategy,
        candles: &[Candle],
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<Dynamic, SandboxError> {
        let deadline = started + self.config.timeout();
        let engine = self.build_engine(Budget::new(deadline, cancel.clone()));

        let ast = engine
            .compile(strategy.source())
            .map_err(|e| SandboxError::Compile(e.to_string()))?;
        if !ast
            .iter_functions()
            .any(|f| f.name == ENTRY_POINT && f.params.len() == 1)
        {
            return Err(SandboxError::MissingEntryPoint);
        }

        let data = candles_to_array(candles);
        let mut scope = Scope::new();
        if self.config.capabilities.contains(&Capability::CandleData) {
            scope.push_constant("data", data.clone());
        }

        engine
            .call_fn::<Dynamic>(&mut scope, &ast, ENTRY_POINT, (data,))
            .map_err(|err| self.classify(*err, cancel))
    }

    fn classify(&self, err: EvalAltResult, cancel: &CancellationToken) -> SandboxError {
        match root_cause(&err) {
            EvalAltResult::ErrorTerminated(..) if cancel.is_cancelled() => SandboxError::Cancelled,
            EvalAltResult::ErrorTerminated(..) => SandboxError::Timeout(self.config.timeout_ms),
            EvalAltResult::ErrorTooManyOperations(..)
            | EvalAltResult::ErrorStackOverflow(..)
            | EvalAltResult::ErrorDataTooLarge(..) => SandboxError::ResourceLimit(err.to_string()),
            _ => SandboxError::Runtime(err.to_string()),
        }
    }
}

/// Errors raised inside script functions arrive wrapped once per call frame.
fn root_cause(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(.., inner, _) => root_cause(inner),
        other => other,
    }
}

impl SignalGenerator for ScriptSandbox {
    fn generate(
        &self,
        strategy: &ValidatedStrategy,
        candles: &[Candle],
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        self.execute(strategy, candles, cancel)
    }
}

/// Interprets a script's return value as one signal per candle.
///
/// Elements may be `"buy"`, `"sell"` or `"hold"` in any case, or `()` for hold. A short
/// array is padded with hold; a long array is truncated and noted in the diagnostics.
pub fn parse_signals(
    output: Dynamic,
    expected: usize,
) -> Result<(Vec<Signal>, Vec<String>), SandboxError> {
    let type_name = output.type_name();
    let items = output.try_cast::<Array>().ok_or_else(|| {
        SandboxError::MalformedOutput(format!("expected an array of signals, got {type_name}"))
    })?;

    let mut signals = Vec::with_capacity(expected);
    for (index, item) in items.iter().enumerate().take(expected) {
        let signal = if item.is_unit() {
            Signal::Hold
        } else {
            item.clone()
                .into_immutable_string()
                .ok()
                .and_then(|token| token.as_str().parse::<Signal>().ok())
                .ok_or_else(|| {
                    SandboxError::MalformedOutput(format!(
                        "element {index} is not a signal ({})",
                        item.type_name()
                    ))
                })?
        };
        signals.push(signal);
    }

    let mut diagnostics = Vec::new();
    if items.len() > expected {
        diagnostics.push(format!(
            "strategy returned {} signals for {expected} candles; extra signals ignored",
            items.len()
        ));
    }
    signals.resize(expected, Signal::Hold);
    Ok((signals, diagnostics))
}

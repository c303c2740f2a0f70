//! The closed set of host functionality a strategy script may use.
//!
//! A sandbox engine starts from [`Engine::new_raw`], which has no functions at all, and
//! each [`Capability`] installs one well-defined slice of API on top of it. There is no
//! path from a script to the filesystem, network, processes, clocks or module loading
//! because none of the installed packages provide one.

use std::time::Instant;

use rhai::packages::{
    ArithmeticPackage, BasicArrayPackage, BasicIteratorPackage, BasicMapPackage,
    BasicMathPackage, BasicStringPackage, LogicPackage, MoreStringPackage, Package,
};
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Position, INT};
use serde::{Deserialize, Serialize};
use strategy_lab_core::Candle;
use tokio_util::sync::CancellationToken;

use crate::indicators::series;

type FnResult<T> = Result<T, Box<EvalAltResult>>;

/// One grant of host functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Operators, comparisons, strings, arrays, maps and iteration.
    Language,
    /// The read-only `data` candle array and the `closes` / `column` helpers.
    CandleData,
    /// `sma`, `ema`, `rsi`, `macd`, `bollinger`, `atr` and their upper-case aliases.
    Indicators,
    /// Float math plus `mean`, `stdev`, `highest`, `lowest`.
    Math,
    /// `print` / `debug` routed to a sink that discards everything.
    Logging,
}

impl Capability {
    /// Everything a strategy is normally granted.
    pub const ALL: [Capability; 5] = [
        Capability::Language,
        Capability::CandleData,
        Capability::Indicators,
        Capability::Math,
        Capability::Logging,
    ];

    pub(crate) fn install(self, engine: &mut Engine, budget: &Budget) {
        match self {
            Capability::Language => {
                engine.register_global_module(ArithmeticPackage::new().as_shared_module());
                engine.register_global_module(LogicPackage::new().as_shared_module());
                engine.register_global_module(BasicStringPackage::new().as_shared_module());
                engine.register_global_module(MoreStringPackage::new().as_shared_module());
                engine.register_global_module(BasicIteratorPackage::new().as_shared_module());
                engine.register_global_module(BasicArrayPackage::new().as_shared_module());
                engine.register_global_module(BasicMapPackage::new().as_shared_module());
            }
            Capability::CandleData => register_candle_data(engine, budget),
            Capability::Indicators => register_indicators(engine, budget),
            Capability::Math => {
                engine.register_global_module(BasicMathPackage::new().as_shared_module());
                register_math(engine, budget);
            }
            Capability::Logging => {
                engine.on_print(|_| {});
                engine.on_debug(|_, _, _| {});
            }
        }
    }
}

/// How many series elements a native function converts between budget checks.
const BUDGET_CHECK_STRIDE: usize = 4096;

/// Wall-clock allowance shared by the interpreter and the native functions it calls.
///
/// The interpreter only counts its own operations, so a single host call over a large
/// series is opaque to it. Native functions check the budget while they walk their input
/// and end the run the same way the progress hook does.
#[derive(Debug, Clone, Default)]
pub struct Budget {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl Budget {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self {
            deadline: Some(deadline),
            cancel,
        }
    }

    /// No deadline and a token nobody cancels.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn check_every(&self, index: usize) -> FnResult<()> {
        if index % BUDGET_CHECK_STRIDE == 0 && self.is_exhausted() {
            Err(EvalAltResult::ErrorTerminated(Dynamic::UNIT, Position::NONE).into())
        } else {
            Ok(())
        }
    }
}

/// Builds the script-side view of one candle.
pub fn candle_to_dynamic(candle: &Candle) -> Dynamic {
    let mut map = Map::new();
    map.insert("timestamp".into(), Dynamic::from_int(candle.timestamp));
    map.insert("open".into(), Dynamic::from_float(candle.open));
    map.insert("high".into(), Dynamic::from_float(candle.high));
    map.insert("low".into(), Dynamic::from_float(candle.low));
    map.insert("close".into(), Dynamic::from_float(candle.close));
    map.insert("volume".into(), Dynamic::from_float(candle.volume));
    Dynamic::from_map(map)
}

/// Builds the `data` array handed to `strategy(data)`.
pub fn candles_to_array(candles: &[Candle]) -> Array {
    candles.iter().map(candle_to_dynamic).collect()
}

fn as_number(value: &Dynamic) -> Option<f64> {
    value
        .as_float()
        .ok()
        .or_else(|| value.as_int().ok().map(|i| i as f64))
}

fn to_numbers(fn_name: &str, values: &Array, budget: &Budget) -> FnResult<Vec<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            budget.check_every(i)?;
            as_number(v).ok_or_else(|| {
                format!("{fn_name}: element {i} is {}, expected a number", v.type_name()).into()
            })
        })
        .collect()
}

fn to_array(values: Vec<f64>) -> Array {
    values.into_iter().map(Dynamic::from_float).collect()
}

fn field(fn_name: &str, index: usize, bar: &Dynamic, name: &str) -> FnResult<f64> {
    let map = bar
        .read_lock::<Map>()
        .ok_or_else(|| format!("{fn_name}: element {index} is not a candle map"))?;
    map.get(name)
        .and_then(as_number)
        .ok_or_else(|| format!("{fn_name}: element {index} has no numeric '{name}'").into())
}

fn column(fn_name: &str, data: &Array, name: &str, budget: &Budget) -> FnResult<Vec<f64>> {
    data.iter()
        .enumerate()
        .map(|(i, bar)| {
            budget.check_every(i)?;
            field(fn_name, i, bar, name)
        })
        .collect()
}

fn to_candles(fn_name: &str, data: &Array, budget: &Budget) -> FnResult<Vec<Candle>> {
    data.iter()
        .enumerate()
        .map(|(i, bar)| {
            budget.check_every(i)?;
            Ok(Candle {
                timestamp: 0,
                open: field(fn_name, i, bar, "open")?,
                high: field(fn_name, i, bar, "high")?,
                low: field(fn_name, i, bar, "low")?,
                close: field(fn_name, i, bar, "close")?,
                volume: 0.0,
            })
        })
        .collect()
}

fn indicator_err(e: crate::indicators::IndicatorError) -> Box<EvalAltResult> {
    e.to_string().into()
}

fn register_candle_data(engine: &mut Engine, budget: &Budget) {
    let b = budget.clone();
    engine.register_fn("closes", move |data: Array| -> FnResult<Array> {
        column("closes", &data, "close", &b).map(to_array)
    });
    let b = budget.clone();
    engine.register_fn("column", move |data: Array, name: &str| -> FnResult<Array> {
        column("column", &data, name, &b).map(to_array)
    });
}

fn register_indicators(engine: &mut Engine, budget: &Budget) {
    fn sma(budget: &Budget, values: Array, period: INT) -> FnResult<Array> {
        let values = to_numbers("sma", &values, budget)?;
        series::sma(&values, period).map(to_array).map_err(indicator_err)
    }
    fn ema(budget: &Budget, values: Array, period: INT) -> FnResult<Array> {
        let values = to_numbers("ema", &values, budget)?;
        series::ema(&values, period).map(to_array).map_err(indicator_err)
    }
    fn rsi(budget: &Budget, values: Array, period: INT) -> FnResult<Array> {
        let values = to_numbers("rsi", &values, budget)?;
        series::rsi(&values, period).map(to_array).map_err(indicator_err)
    }
    fn macd(budget: &Budget, values: Array, fast: INT, slow: INT, signal: INT) -> FnResult<Map> {
        let values = to_numbers("macd", &values, budget)?;
        let out = series::macd(&values, fast, slow, signal).map_err(indicator_err)?;
        let mut map = Map::new();
        map.insert("macd".into(), Dynamic::from_array(to_array(out.macd)));
        map.insert("signal".into(), Dynamic::from_array(to_array(out.signal)));
        map.insert("histogram".into(), Dynamic::from_array(to_array(out.histogram)));
        Ok(map)
    }

    for name in ["sma", "SMA"] {
        let b = budget.clone();
        engine.register_fn(name, move |values: Array, period: INT| sma(&b, values, period));
    }
    for name in ["ema", "EMA"] {
        let b = budget.clone();
        engine.register_fn(name, move |values: Array, period: INT| ema(&b, values, period));
    }
    for name in ["rsi", "RSI"] {
        let b = budget.clone();
        engine.register_fn(name, move |values: Array, period: INT| rsi(&b, values, period));
    }
    for name in ["macd", "MACD"] {
        let b = budget.clone();
        engine.register_fn(
            name,
            move |values: Array, fast: INT, slow: INT, signal: INT| {
                macd(&b, values, fast, slow, signal)
            },
        );
        let b = budget.clone();
        engine.register_fn(name, move |values: Array| macd(&b, values, 12, 26, 9));
    }

    let b = budget.clone();
    engine.register_fn(
        "bollinger",
        move |values: Array, period: INT, sigma: rhai::FLOAT| -> FnResult<Map> {
            let values = to_numbers("bollinger", &values, &b)?;
            let out = series::bollinger(&values, period, sigma).map_err(indicator_err)?;
            let mut map = Map::new();
            map.insert("upper".into(), Dynamic::from_array(to_array(out.upper)));
            map.insert("middle".into(), Dynamic::from_array(to_array(out.middle)));
            map.insert("lower".into(), Dynamic::from_array(to_array(out.lower)));
            Ok(map)
        },
    );
    let b = budget.clone();
    engine.register_fn("atr", move |data: Array, period: INT| -> FnResult<Array> {
        let candles = to_candles("atr", &data, &b)?;
        series::atr(&candles, period).map(to_array).map_err(indicator_err)
    });
}

fn register_math(engine: &mut Engine, budget: &Budget) {
    let b = budget.clone();
    engine.register_fn("mean", move |values: Array| -> FnResult<rhai::FLOAT> {
        Ok(series::mean(&to_numbers("mean", &values, &b)?))
    });
    let b = budget.clone();
    engine.register_fn("stdev", move |values: Array| -> FnResult<rhai::FLOAT> {
        Ok(series::stdev(&to_numbers("stdev", &values, &b)?))
    });
    let b = budget.clone();
    engine.register_fn("highest", move |values: Array, period: INT| -> FnResult<Array> {
        let values = to_numbers("highest", &values, &b)?;
        series::highest(&values, period).map(to_array).map_err(indicator_err)
    });
    let b = budget.clone();
    engine.register_fn("lowest", move |values: Array, period: INT| -> FnResult<Array> {
        let values = to_numbers("lowest", &values, &b)?;
        series::lowest(&values, period).map(to_array).map_err(indicator_err)
    });
}

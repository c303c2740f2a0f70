//! Seam between the backtest pipeline and whatever turns strategy code into signals.

use strategy_lab_core::Candle;
use tokio_util::sync::CancellationToken;

use crate::sandbox::ExecutionReport;
use crate::validator::ValidatedStrategy;

/// Produces one signal per candle for a validated strategy.
///
/// Implementations must not fail: any problem is reported through a degraded
/// [`ExecutionReport`] whose signals are all hold.
pub trait SignalGenerator: Send + Sync {
    fn generate(
        &self,
        strategy: &ValidatedStrategy,
        candles: &[Candle],
        cancel: &CancellationToken,
    ) -> ExecutionReport;
}

impl<G: SignalGenerator + ?Sized> SignalGenerator for std::sync::Arc<G> {
    fn generate(
        &self,
        strategy: &ValidatedStrategy,
        candles: &[Candle],
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        (**self).generate(strategy, candles, cancel)
    }
}

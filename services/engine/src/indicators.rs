//! Full-history indicator recomputation.
//!
//! Pure computation module: candle history in, one value per candle out for
//! every indicator column. No I/O, no side effects. Recomputation always runs
//! over the entire retained window so lookback-dependent indicators (EMA
//! family) never drift; the cost is O(len) per update, bounded by the series
//! capacity.
//!
//! Warm-up rows without enough lookback hold `0.0`, the defined neutral
//! value, and any non-finite intermediate result is coerced to `0.0` before a
//! caller can observe it. Observers therefore never see NaN and never see a
//! column whose length differs from the candle count.

use kline_types::Candle;

pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const RSI_PERIOD: usize = 14;
pub const KDJ_PERIOD: usize = 9;
pub const KDJ_SMOOTHING: f64 = 3.0;
pub const BOLL_PERIOD: usize = 20;
pub const BOLL_STD: f64 = 2.0;
pub const VOL_MA_PERIOD: usize = 20;

/// One vector per indicator column, each aligned with the candle series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorColumns {
    pub macd: Vec<f64>,
    pub macd_signal: Vec<f64>,
    pub macd_hist: Vec<f64>,
    pub rsi: Vec<f64>,
    pub k: Vec<f64>,
    pub d: Vec<f64>,
    pub j: Vec<f64>,
    pub bb_upper: Vec<f64>,
    pub bb_mid: Vec<f64>,
    pub bb_lower: Vec<f64>,
    pub vol_ma: Vec<f64>,
}

impl IndicatorColumns {
    pub fn len(&self) -> usize {
        self.macd.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macd.is_empty()
    }

    /// Force every column to `len` rows, zero-filling new slots. Used to keep
    /// stale columns aligned with the series when a recompute is skipped.
    pub(crate) fn resize_to(&mut self, len: usize) {
        for column in self.columns_mut() {
            column.resize(len, 0.0);
        }
    }

    fn columns_mut(&mut self) -> [&mut Vec<f64>; 11] {
        [
            &mut self.macd,
            &mut self.macd_signal,
            &mut self.macd_hist,
            &mut self.rsi,
            &mut self.k,
            &mut self.d,
            &mut self.j,
            &mut self.bb_upper,
            &mut self.bb_mid,
            &mut self.bb_lower,
            &mut self.vol_ma,
        ]
    }

    fn sanitize(&mut self) {
        for column in self.columns_mut() {
            for value in column.iter_mut() {
                if !value.is_finite() {
                    *value = 0.0;
                }
            }
        }
    }
}

/// Recompute every indicator column over the full candle history.
pub fn compute(candles: &[Candle]) -> IndicatorColumns {
    let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let low: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let volume: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let (macd, macd_signal, macd_hist) = macd(&close);
    let rsi = rsi(&close, RSI_PERIOD);
    let (k, d, j) = kdj(&high, &low, &close, KDJ_PERIOD);
    let (bb_upper, bb_mid, bb_lower) = bollinger(&close, BOLL_PERIOD, BOLL_STD);
    let vol_ma = sma(&volume, VOL_MA_PERIOD);

    let mut columns = IndicatorColumns {
        macd,
        macd_signal,
        macd_hist,
        rsi,
        k,
        d,
        j,
        bb_upper,
        bb_mid,
        bb_lower,
        vol_ma,
    };
    columns.sanitize();
    columns
}

/// Simple moving average, zero until `period` values are available.
fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = sum / period as f64;
    }
    out
}

/// Exponential moving average over `values[start..]`, seeded with the SMA of
/// the first `period` entries of that region. Rows before the seed are zero.
fn ema_from(values: &[f64], start: usize, period: usize) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    if period == 0 || values.len() < start + period {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed_end = start + period;
    let mut prev: f64 = values[start..seed_end].iter().sum::<f64>() / period as f64;
    out[seed_end - 1] = prev;
    for i in seed_end..values.len() {
        prev = values[i] * k + prev * (1.0 - k);
        out[i] = prev;
    }
    out
}

/// MACD(12, 26, 9): DIF, DEA and histogram columns.
fn macd(close: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast = ema_from(close, 0, MACD_FAST);
    let slow = ema_from(close, 0, MACD_SLOW);

    let mut dif = vec![0.0; close.len()];
    for i in MACD_SLOW.saturating_sub(1)..close.len() {
        dif[i] = fast[i] - slow[i];
    }

    // DEA is an EMA of DIF, valid only where DIF itself is defined.
    let dea = ema_from(&dif, MACD_SLOW.saturating_sub(1), MACD_SIGNAL);

    let mut hist = vec![0.0; close.len()];
    let first_dea = MACD_SLOW + MACD_SIGNAL - 2;
    for i in first_dea..close.len() {
        hist[i] = dif[i] - dea[i];
    }

    (dif, dea, hist)
}

/// RSI with Wilder's smoothing (factor 1/period).
fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![0.0; close.len()];
    if period == 0 || close.len() < period + 1 {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = close[i] - close[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_value(avg_gain, avg_loss);

    let smoothing = (period - 1) as f64;
    for i in period + 1..close.len() {
        let change = close[i] - close[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * smoothing + gain) / period as f64;
        avg_loss = (avg_loss * smoothing + loss) / period as f64;
        out[i] = rsi_value(avg_gain, avg_loss);
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        // Flat history is neutral; pure gains are maximal strength.
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// KDJ(9, 3, 3): stochastic K/D plus the J divergence line.
fn kdj(high: &[f64], low: &[f64], close: &[f64], period: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let len = close.len();
    let mut k_out = vec![0.0; len];
    let mut d_out = vec![0.0; len];
    let mut j_out = vec![0.0; len];
    if period == 0 || len < period {
        return (k_out, d_out, j_out);
    }

    let mut k_prev = 50.0;
    let mut d_prev = 50.0;
    for i in period - 1..len {
        let window = i + 1 - period..=i;
        let highest = high[window.clone()].iter().cloned().fold(f64::MIN, f64::max);
        let lowest = low[window].iter().cloned().fold(f64::MAX, f64::min);
        let rsv = if highest > lowest {
            (close[i] - lowest) / (highest - lowest) * 100.0
        } else {
            50.0
        };
        k_prev = ((KDJ_SMOOTHING - 1.0) * k_prev + rsv) / KDJ_SMOOTHING;
        d_prev = ((KDJ_SMOOTHING - 1.0) * d_prev + k_prev) / KDJ_SMOOTHING;
        k_out[i] = k_prev;
        d_out[i] = d_prev;
        j_out[i] = 3.0 * k_prev - 2.0 * d_prev;
    }
    (k_out, d_out, j_out)
}

/// Bollinger bands: SMA(period) ± `width` population standard deviations.
fn bollinger(close: &[f64], period: usize, width: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let len = close.len();
    let mut upper = vec![0.0; len];
    let mut mid = sma(close, period);
    let mut lower = vec![0.0; len];
    if period == 0 || len < period {
        mid.resize(len, 0.0);
        return (upper, mid, lower);
    }

    for i in period - 1..len {
        let window = &close[i + 1 - period..=i];
        let mean = mid[i];
        let variance = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / period as f64;
        let deviation = variance.sqrt() * width;
        upper[i] = mean + deviation;
        lower[i] = mean - deviation;
    }
    (upper, mid, lower)
}

//! Trailing-window technical indicators
//!
//! Every function returns a vector aligned with its input. Positions inside
//! the warm-up window are `None`, and no value at index `i` ever reads an
//! input past `i`.

/// Simple moving average over `window` values
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }

    let mut sum: f64 = values[..window].iter().sum();
    out[window - 1] = Some(sum / window as f64);
    for i in window..values.len() {
        sum += values[i] - values[i - window];
        out[i] = Some(sum / window as f64);
    }
    out
}

/// Recursive exponential moving average, `alpha = 2 / (span + 1)`, seeded
/// with the first value
pub fn ema(values: &[f64], span: usize) -> Vec<Option<f64>> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;

    for &v in values {
        let next = match prev {
            Some(p) => alpha * v + (1.0 - alpha) * p,
            None => v,
        };
        prev = Some(next);
        out.push(Some(next));
    }
    out
}

/// Sample standard deviation (n - 1) over `window` defined values
pub fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window < 2 {
        return out;
    }

    for i in (window - 1)..values.len() {
        let slice = &values[i + 1 - window..=i];
        if slice.iter().any(|v| v.is_none()) {
            continue;
        }
        let mean = slice.iter().flatten().sum::<f64>() / window as f64;
        let var = slice
            .iter()
            .flatten()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / (window - 1) as f64;
        out[i] = Some(var.sqrt());
    }
    out
}

/// Simple daily returns; the first element is undefined
pub fn pct_change(values: &[f64]) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    for i in 1..values.len() {
        if values[i - 1] != 0.0 {
            out[i] = Some(values[i] / values[i - 1] - 1.0);
        }
    }
    out
}

/// Difference against the value `lag` positions earlier
pub fn momentum(values: &[f64], lag: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    for i in lag..values.len() {
        out[i] = Some(values[i] - values[i - lag]);
    }
    out
}

/// RSI from simple means of gains and losses over `period` changes
///
/// A window with no losses reads 100; a flat window reads 50.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }

    for i in period..values.len() {
        let mut gain = 0.0;
        let mut loss = 0.0;
        for j in (i + 1 - period)..=i {
            let change = values[j] - values[j - 1];
            if change > 0.0 {
                gain += change;
            } else {
                loss -= change;
            }
        }
        gain /= period as f64;
        loss /= period as f64;

        let value = if gain < 1e-12 && loss < 1e-12 {
            50.0
        } else if loss < 1e-12 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + gain / loss)
        };
        out[i] = Some(value);
    }
    out
}

/// Mean over `window` values, undefined unless every value is defined
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window == 0 {
        return out;
    }
    for i in (window - 1)..values.len() {
        let slice = &values[i + 1 - window..=i];
        if slice.iter().all(|v| v.is_some()) {
            out[i] = Some(slice.iter().flatten().sum::<f64>() / window as f64);
        }
    }
    out
}

// ========== Advanced indicators ==========

/// MACD line, its signal line and the histogram between them
#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

/// EMA(fast) - EMA(slow), with an EMA(signal) of that difference
pub fn macd(close: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let line: Vec<f64> = ema(close, fast)
        .iter()
        .zip(ema(close, slow))
        .map(|(f, s)| f.unwrap_or_default() - s.unwrap_or_default())
        .collect();
    let signal_line = ema(&line, signal);
    let histogram = line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| s.map(|s| m - s))
        .collect();

    Macd {
        macd: line.into_iter().map(Some).collect(),
        signal: signal_line,
        histogram,
    }
}

/// Bands at `num_std` sample deviations around the SMA
#[derive(Debug, Clone, PartialEq)]
pub struct Bollinger {
    pub middle: Vec<Option<f64>>,
    pub upper: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
    pub width: Vec<Option<f64>>,
    /// Position of the close between the bands, 0 at lower and 1 at upper
    pub percent: Vec<Option<f64>>,
}

pub fn bollinger(close: &[f64], window: usize, num_std: f64) -> Bollinger {
    let middle = sma(close, window);
    let std = rolling_std(&close.iter().map(|c| Some(*c)).collect::<Vec<_>>(), window);

    let n = close.len();
    let mut upper = vec![None; n];
    let mut lower = vec![None; n];
    let mut width = vec![None; n];
    let mut percent = vec![None; n];
    for i in 0..n {
        let (Some(mid), Some(sd)) = (middle[i], std[i]) else {
            continue;
        };
        let (hi, lo) = (mid + num_std * sd, mid - num_std * sd);
        upper[i] = Some(hi);
        lower[i] = Some(lo);
        width[i] = Some(hi - lo);
        if hi - lo > 0.0 {
            percent[i] = Some((close[i] - lo) / (hi - lo));
        }
    }

    Bollinger {
        middle,
        upper,
        lower,
        width,
        percent,
    }
}

/// Largest of the bar range and the gaps to the previous close
///
/// The first bar has no previous close and uses its own range.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<Option<f64>> {
    (0..close.len())
        .map(|i| {
            let range = high[i] - low[i];
            if i == 0 {
                return Some(range);
            }
            let prev = close[i - 1];
            Some(range.max((high[i] - prev).abs()).max((low[i] - prev).abs()))
        })
        .collect()
}

/// Simple mean of the true range over `window` bars
pub fn atr(high: &[f64], low: &[f64], close: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling_mean(&true_range(high, low, close), window)
}

/// Trend strength with its directional components
#[derive(Debug, Clone, PartialEq)]
pub struct Adx {
    pub adx: Vec<Option<f64>>,
    pub plus_di: Vec<Option<f64>>,
    pub minus_di: Vec<Option<f64>>,
}

/// ADX from simple means of directional movement and true range
///
/// Defined from bar `2 * window - 2`; windows without range or without
/// directional movement are undefined.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], window: usize) -> Adx {
    let n = close.len();
    let mut plus_dm = vec![Some(0.0); n];
    let mut minus_dm = vec![Some(0.0); n];
    for i in 1..n {
        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        if up > down && up > 0.0 {
            plus_dm[i] = Some(up);
        }
        if down > up && down > 0.0 {
            minus_dm[i] = Some(down);
        }
    }

    let atr = atr(high, low, close, window);
    let plus_avg = rolling_mean(&plus_dm, window);
    let minus_avg = rolling_mean(&minus_dm, window);

    let di = |avg: &[Option<f64>]| -> Vec<Option<f64>> {
        avg.iter()
            .zip(&atr)
            .map(|(dm, tr)| match (dm, tr) {
                (Some(dm), Some(tr)) if *tr > 0.0 => Some(100.0 * dm / tr),
                _ => None,
            })
            .collect()
    };
    let plus_di = di(&plus_avg);
    let minus_di = di(&minus_avg);

    let dx: Vec<Option<f64>> = plus_di
        .iter()
        .zip(&minus_di)
        .map(|(p, m)| match (p, m) {
            (Some(p), Some(m)) if p + m > 0.0 => Some(100.0 * (p - m).abs() / (p + m)),
            _ => None,
        })
        .collect();

    Adx {
        adx: rolling_mean(&dx, window),
        plus_di,
        minus_di,
    }
}

/// Stochastic oscillator %K and its %D smoothing
#[derive(Debug, Clone, PartialEq)]
pub struct Stochastic {
    pub k: Vec<Option<f64>>,
    pub d: Vec<Option<f64>>,
}

/// %K places the close in the `k_window` high-low range; a flat range is
/// undefined
pub fn stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    k_window: usize,
    d_window: usize,
) -> Stochastic {
    let n = close.len();
    let mut k = vec![None; n];
    if k_window > 0 {
        for i in (k_window - 1)..n {
            let range = i + 1 - k_window..=i;
            let highest = high[range.clone()].iter().copied().fold(f64::MIN, f64::max);
            let lowest = low[range].iter().copied().fold(f64::MAX, f64::min);
            if highest > lowest {
                k[i] = Some(100.0 * (close[i] - lowest) / (highest - lowest));
            }
        }
    }
    let d = rolling_mean(&k, d_window);
    Stochastic { k, d }
}

/// Running sum of volume signed by the close-to-close direction
pub fn obv(close: &[f64], volume: &[i64]) -> Vec<Option<f64>> {
    let mut total = 0.0;
    (0..close.len())
        .map(|i| {
            if i > 0 {
                let change = close[i] - close[i - 1];
                if change > 0.0 {
                    total += volume[i] as f64;
                } else if change < 0.0 {
                    total -= volume[i] as f64;
                }
            }
            Some(total)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_warmup_and_values() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = sma(&v, 3);
        assert_eq!(out[..2], [None, None]);
        assert_eq!(out[2], Some(2.0));
        assert_eq!(out[4], Some(4.0));
    }

    #[test]
    fn test_ema_is_recursive() {
        let out = ema(&[10.0, 20.0], 3);
        // alpha = 0.5
        assert_eq!(out[0], Some(10.0));
        assert_eq!(out[1], Some(15.0));
    }

    #[test]
    fn test_rolling_std_sample() {
        let v: Vec<Option<f64>> = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]
            .iter()
            .map(|x| Some(*x))
            .collect();
        let out = rolling_std(&v, 8);
        let expected = (32.0f64 / 7.0).sqrt();
        assert!((out[7].unwrap() - expected).abs() < 1e-12);
        assert!(out[6].is_none());
    }

    #[test]
    fn test_rolling_std_skips_undefined_inputs() {
        let returns = pct_change(&[1.0, 2.0, 3.0]);
        let out = rolling_std(&returns, 2);
        assert!(out[1].is_none());
        assert!(out[2].is_some());
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&rising, 14)[19], Some(100.0));

        let flat = vec![100.0; 20];
        assert_eq!(rsi(&flat, 14)[19], Some(50.0));

        let falling: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert_eq!(rsi(&falling, 14)[19], Some(0.0));
        assert!(rsi(&falling, 14)[13].is_none());
    }

    #[test]
    fn test_momentum_lag() {
        let out = momentum(&[1.0, 2.0, 4.0, 8.0], 2);
        assert_eq!(out, vec![None, None, Some(3.0), Some(6.0)]);
    }

    #[test]
    fn test_rolling_mean_needs_full_window() {
        let out = rolling_mean(&[Some(1.0), None, Some(3.0), Some(5.0)], 2);
        assert_eq!(out, vec![None, None, None, Some(4.0)]);
    }

    #[test]
    fn test_macd_histogram() {
        let close: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let out = macd(&close, 12, 26, 9);
        assert_eq!(out.macd[0], Some(0.0));
        // Fast EMA leads on a rising series
        assert!(out.macd[39].unwrap() > 0.0);
        let expected = out.macd[39].unwrap() - out.signal[39].unwrap();
        assert!((out.histogram[39].unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_bollinger_bands() {
        let close = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let out = bollinger(&close, 8, 2.0);
        let sd = (32.0f64 / 7.0).sqrt();
        assert!(out.middle[6].is_none());
        assert_eq!(out.middle[7], Some(5.0));
        assert!((out.upper[7].unwrap() - (5.0 + 2.0 * sd)).abs() < 1e-12);
        assert!((out.width[7].unwrap() - 4.0 * sd).abs() < 1e-12);
        let pct = (9.0 - (5.0 - 2.0 * sd)) / (4.0 * sd);
        assert!((out.percent[7].unwrap() - pct).abs() < 1e-12);

        // Flat prices have no band to place the close in
        let flat = bollinger(&[3.0; 5], 5, 2.0);
        assert_eq!(flat.width[4], Some(0.0));
        assert!(flat.percent[4].is_none());
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        let high = [10.0, 12.0, 11.0];
        let low = [9.0, 11.0, 7.0];
        let close = [9.5, 11.5, 8.0];
        let tr = true_range(&high, &low, &close);
        assert_eq!(tr, vec![Some(1.0), Some(2.5), Some(4.5)]);

        let out = atr(&high, &low, &close, 2);
        assert_eq!(out, vec![None, Some(1.75), Some(3.5)]);
    }

    #[test]
    fn test_adx_steady_uptrend() {
        let high: Vec<f64> = (0..30).map(|i| 101.0 + i as f64).collect();
        let low: Vec<f64> = (0..30).map(|i| 99.0 + i as f64).collect();
        let close: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let out = adx(&high, &low, &close, 14);

        assert!(out.adx[25].is_none());
        assert!(out.plus_di[13].is_some());
        // Only upward movement after the first bar
        assert_eq!(out.minus_di[29], Some(0.0));
        assert!((out.adx[26].unwrap() - 100.0).abs() < 1e-9);
        assert!((out.adx[29].unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_stochastic_range() {
        let high = [10.0, 11.0, 12.0, 13.0];
        let low = [8.0, 9.0, 10.0, 11.0];
        let close = [9.0, 10.0, 12.0, 11.0];
        let out = stochastic(&high, &low, &close, 3, 2);
        assert_eq!(out.k[1], None);
        assert_eq!(out.k[2], Some(100.0));
        assert_eq!(out.k[3], Some(50.0));
        assert_eq!(out.d[3], Some(75.0));

        let flat = stochastic(&[5.0; 3], &[5.0; 3], &[5.0; 3], 3, 1);
        assert!(flat.k[2].is_none());
    }

    #[test]
    fn test_obv_signs_volume() {
        let out = obv(&[10.0, 11.0, 11.0, 9.0], &[100, 200, 300, 50]);
        assert_eq!(out, vec![Some(0.0), Some(200.0), Some(200.0), Some(150.0)]);
    }
}

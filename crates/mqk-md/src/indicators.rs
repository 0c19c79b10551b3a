//! Pure technical-indicator functions over normalized bars.
//!
//! Every function here takes a `&[NormalizedBar]` ordered oldest-to-newest
//! and returns plain numbers (or `None` when the window is too short to
//! compute a meaningful value). No state, no IO, no caching — that belongs
//! to `cache.rs`.

use crate::normalizer::NormalizedBar;

fn closes(bars: &[NormalizedBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close_micros as f64).collect()
}

/// Exponential moving average over the full slice, seeded with a simple
/// average of the first `period` closes. Returns `None` if fewer than
/// `period` bars are available.
pub fn ema(bars: &[NormalizedBar], period: usize) -> Option<f64> {
    let closes = closes(bars);
    if closes.len() < period || period == 0 {
        return None;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    let mut value = seed;
    for &c in &closes[period..] {
        value = c * k + value * (1.0 - k);
    }
    Some(value)
}

/// EMA series aligned to `closes`, one value per bar starting at index
/// `period - 1`. Used to recover "previous bar's EMA" without recomputing
/// the whole series from scratch.
fn ema_series(bars: &[NormalizedBar], period: usize) -> Vec<Option<f64>> {
    let closes = closes(bars);
    let mut out = vec![None; closes.len()];
    if closes.len() < period || period == 0 {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);
    let mut value = seed;
    for (i, &c) in closes.iter().enumerate().skip(period) {
        value = c * k + value * (1.0 - k);
        out[i] = Some(value);
    }
    out
}

/// Wilder-smoothed RSI over `period` bars (default 14).
pub fn rsi(bars: &[NormalizedBar], period: usize) -> Option<f64> {
    let closes = closes(bars);
    if closes.len() < period + 1 || period == 0 {
        return None;
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in closes[..=period].windows(2) {
        let delta = w[1] - w[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;

    for w in closes[period..].windows(2) {
        let delta = w[1] - w[0];
        let (g, l) = if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + g) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + l) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line and signal line, using the standard 12/26/9 periods.
pub fn macd(bars: &[NormalizedBar]) -> Option<(f64, f64)> {
    let fast = ema_series(bars, 12);
    let slow = ema_series(bars, 26);
    if fast.len() != slow.len() || fast.len() < 26 + 9 {
        return None;
    }
    let macd_line: Vec<f64> = fast
        .iter()
        .zip(slow.iter())
        .filter_map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();
    if macd_line.len() < 9 {
        return None;
    }
    let k = 2.0 / (9.0 + 1.0);
    let seed: f64 = macd_line[..9].iter().sum::<f64>() / 9.0;
    let mut signal = seed;
    for &v in &macd_line[9..] {
        signal = v * k + signal * (1.0 - k);
    }
    Some((*macd_line.last().unwrap(), signal))
}

/// Average True Range over `period` bars (default 14), Wilder-smoothed.
pub fn atr(bars: &[NormalizedBar], period: usize) -> Option<f64> {
    if bars.len() < period + 1 || period == 0 {
        return None;
    }
    let true_ranges: Vec<f64> = bars
        .windows(2)
        .map(|w| {
            let prev_close = w[0].close_micros as f64;
            let hi = w[1].high_micros as f64;
            let lo = w[1].low_micros as f64;
            (hi - lo).max((hi - prev_close).abs()).max((lo - prev_close).abs())
        })
        .collect();
    if true_ranges.len() < period {
        return None;
    }
    let mut value: f64 = true_ranges[..period].iter().sum::<f64>() / period as f64;
    for &tr in &true_ranges[period..] {
        value = (value * (period as f64 - 1.0) + tr) / period as f64;
    }
    Some(value)
}

/// Wilder's Average Directional Index over `period` bars (default 14).
pub fn adx(bars: &[NormalizedBar], period: usize) -> Option<f64> {
    if bars.len() < period * 2 {
        return None;
    }
    let mut plus_dm = Vec::with_capacity(bars.len() - 1);
    let mut minus_dm = Vec::with_capacity(bars.len() - 1);
    let mut trs = Vec::with_capacity(bars.len() - 1);

    for w in bars.windows(2) {
        let up_move = w[1].high_micros as f64 - w[0].high_micros as f64;
        let down_move = w[0].low_micros as f64 - w[1].low_micros as f64;
        plus_dm.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dm.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });

        let prev_close = w[0].close_micros as f64;
        let hi = w[1].high_micros as f64;
        let lo = w[1].low_micros as f64;
        trs.push((hi - lo).max((hi - prev_close).abs()).max((lo - prev_close).abs()));
    }

    if trs.len() < period {
        return None;
    }

    let smooth = |series: &[f64]| -> f64 {
        let mut value: f64 = series[..period].iter().sum();
        for &v in &series[period..] {
            value = value - value / period as f64 + v;
        }
        value
    };

    let mut tr_sum = smooth(&trs);
    let mut plus_sum = smooth(&plus_dm);
    let mut minus_sum = smooth(&minus_dm);

    let dx_at = |tr_sum: f64, plus_sum: f64, minus_sum: f64| -> f64 {
        if tr_sum == 0.0 {
            return 0.0;
        }
        let plus_di = 100.0 * (plus_sum / tr_sum);
        let minus_di = 100.0 * (minus_sum / tr_sum);
        let denom = plus_di + minus_di;
        if denom == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / denom
        }
    };

    let mut dx_values = vec![dx_at(tr_sum, plus_sum, minus_sum)];
    let remaining = trs.len() - period;
    for i in 0..remaining {
        tr_sum = tr_sum - tr_sum / period as f64 + trs[period + i];
        plus_sum = plus_sum - plus_sum / period as f64 + plus_dm[period + i];
        minus_sum = minus_sum - minus_sum / period as f64 + minus_dm[period + i];
        dx_values.push(dx_at(tr_sum, plus_sum, minus_sum));
    }

    if dx_values.len() < period {
        return None;
    }
    let adx = dx_values[..period].iter().sum::<f64>() / period as f64;
    let mut adx = adx;
    for &dx in &dx_values[period..] {
        adx = (adx * (period as f64 - 1.0) + dx) / period as f64;
    }
    Some(adx)
}

/// Session VWAP over the supplied bars (typically the current session only).
pub fn vwap(bars: &[NormalizedBar]) -> Option<f64> {
    if bars.is_empty() {
        return None;
    }
    let mut pv = 0.0;
    let mut vol = 0.0;
    for b in bars {
        let typical = (b.high_micros + b.low_micros + b.close_micros) as f64 / 3.0;
        pv += typical * b.volume as f64;
        vol += b.volume as f64;
    }
    if vol == 0.0 {
        None
    } else {
        Some(pv / vol)
    }
}

/// Ratio of the latest bar's volume to the average of the preceding
/// `lookback` bars' volume. Returns `None` if there aren't enough prior bars
/// or the average is zero.
pub fn volume_ratio(bars: &[NormalizedBar], lookback: usize) -> Option<f64> {
    if bars.len() < lookback + 1 {
        return None;
    }
    let latest = bars.last()?.volume as f64;
    let window = &bars[bars.len() - 1 - lookback..bars.len() - 1];
    let avg = window.iter().map(|b| b.volume as f64).sum::<f64>() / lookback as f64;
    if avg == 0.0 {
        None
    } else {
        Some(latest / avg)
    }
}

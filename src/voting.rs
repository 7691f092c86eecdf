//! Majority vote over per-model directional signals

use serde::{Deserialize, Serialize};

/// Tally of {+1, 0, -1} votes reduced to one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleVote {
    pub final_signal: i8,
    /// Share of voters that voted for `final_signal`
    pub consensus: f64,
    pub buy: usize,
    pub hold: usize,
    pub sell: usize,
}

impl EnsembleVote {
    pub fn voters(&self) -> usize {
        self.buy + self.hold + self.sell
    }
}

/// Plurality vote over `(model_name, signal)` pairs
///
/// Any tie for the highest count resolves to 0 (HOLD). Signals are reduced to
/// their sign first. No voters gives `(0, 0.0)`.
pub fn aggregate<'a, I>(signals: I) -> EnsembleVote
where
    I: IntoIterator<Item = (&'a str, i8)>,
{
    let (mut buy, mut hold, mut sell) = (0usize, 0usize, 0usize);
    for (_, signal) in signals {
        match signal.signum() {
            1 => buy += 1,
            -1 => sell += 1,
            _ => hold += 1,
        }
    }

    let voters = buy + hold + sell;
    if voters == 0 {
        return EnsembleVote {
            final_signal: 0,
            consensus: 0.0,
            buy,
            hold,
            sell,
        };
    }

    let top = buy.max(hold).max(sell);
    let leaders = [buy, hold, sell].iter().filter(|&&c| c == top).count();
    let final_signal = if leaders > 1 {
        0
    } else if buy == top {
        1
    } else if sell == top {
        -1
    } else {
        0
    };

    let votes_for_final = match final_signal {
        1 => buy,
        -1 => sell,
        _ => hold,
    };

    EnsembleVote {
        final_signal,
        consensus: votes_for_final as f64 / voters as f64,
        buy,
        hold,
        sell,
    }
}

//! Market aliases

/// Human-readable market names and their provider symbols
const ALIASES: &[(&str, &str)] = &[
    // Europe
    ("IBEX35", "^IBEX"),
    ("IBEX", "^IBEX"),
    ("FTSE100", "^FTSE"),
    ("FTSE", "^FTSE"),
    ("DAX", "^GDAXI"),
    ("DAX40", "^GDAXI"),
    ("CAC40", "^FCHI"),
    ("CAC", "^FCHI"),
    ("FTSEMIB", "FTSEMIB.MI"),
    ("EUROSTOXX50", "^STOXX50E"),
    ("STOXX50", "^STOXX50E"),
    // Americas
    ("SP500", "^GSPC"),
    ("S&P500", "^GSPC"),
    ("SPX", "^GSPC"),
    ("DOW", "^DJI"),
    ("DJI", "^DJI"),
    ("NASDAQ", "^IXIC"),
    ("NASDAQ100", "^NDX"),
    ("RUSSELL2000", "^RUT"),
    ("VIX", "^VIX"),
    ("BOVESPA", "^BVSP"),
    ("IPC", "^MXX"),
    // Asia-Pacific
    ("NIKKEI", "^N225"),
    ("NIKKEI225", "^N225"),
    ("SHANGHAI", "000001.SS"),
    ("HANGSENG", "^HSI"),
    ("HSI", "^HSI"),
    ("SENSEX", "^BSESN"),
    ("NIFTY50", "^NSEI"),
    ("NIFTY", "^NSEI"),
    ("ASX200", "^AXJO"),
    ("KOSPI", "^KS11"),
];

/// Markets processed when none are given
pub const DEFAULT_SYMBOLS: [&str; 3] = ["^IBEX", "^GSPC", "^N225"];

/// Resolve an alias (case-insensitive) to its provider symbol
///
/// Unknown inputs are returned upper-cased, so `^ibex` and `aapl` pass
/// through as `^IBEX` and `AAPL`.
pub fn resolve_symbol(input: &str) -> String {
    let key = input.trim().to_uppercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, symbol)| symbol.to_string())
        .unwrap_or(key)
}

/// Resolve a comma-separated list, dropping blanks and duplicates
pub fn resolve_list(input: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in input.split(',').filter(|p| !p.trim().is_empty()) {
        let symbol = resolve_symbol(part);
        if !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_alias() {
        assert_eq!(resolve_symbol("IBEX35"), "^IBEX");
        assert_eq!(resolve_symbol("sp500"), "^GSPC");
        assert_eq!(resolve_symbol(" dax "), "^GDAXI");
        assert_eq!(resolve_symbol("nikkei"), "^N225");
    }

    #[test]
    fn test_unknown_passes_through() {
        assert_eq!(resolve_symbol("^ibex"), "^IBEX");
        assert_eq!(resolve_symbol("aapl"), "AAPL");
    }

    #[test]
    fn test_resolve_list() {
        assert_eq!(
            resolve_list("IBEX35, ^IBEX,SP500,,nikkei"),
            vec!["^IBEX".to_string(), "^GSPC".to_string(), "^N225".to_string()]
        );
    }
}

// =============================================================================
// Shared types used across the chartfeed service
// =============================================================================

use serde::{Deserialize, Serialize};

// =============================================================================
// Resolution
// =============================================================================

/// Bar interval supported by the feed.
///
/// Each variant maps to three wire spellings: the widget's resolution string,
/// the Codex `getBars` resolution argument and the Codex aggregate window key
/// used inside streaming payloads.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Resolution {
    S1,
    S5,
    S15,
    S30,
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    H12,
    D1,
    W1,
}

impl Resolution {
    pub const ALL: [Resolution; 13] = [
        Resolution::S1,
        Resolution::S5,
        Resolution::S15,
        Resolution::S30,
        Resolution::M1,
        Resolution::M5,
        Resolution::M15,
        Resolution::M30,
        Resolution::H1,
        Resolution::H4,
        Resolution::H12,
        Resolution::D1,
        Resolution::W1,
    ];

    /// Interval length in seconds.
    pub fn seconds(self) -> i64 {
        match self {
            Self::S1 => 1,
            Self::S5 => 5,
            Self::S15 => 15,
            Self::S30 => 30,
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::M30 => 1_800,
            Self::H1 => 3_600,
            Self::H4 => 14_400,
            Self::H12 => 43_200,
            Self::D1 => 86_400,
            Self::W1 => 604_800,
        }
    }

    /// Resolution string as the charting widget spells it.
    pub fn widget_str(self) -> &'static str {
        match self {
            Self::S1 => "1S",
            Self::S5 => "5S",
            Self::S15 => "15S",
            Self::S30 => "30S",
            Self::M1 => "1",
            Self::M5 => "5",
            Self::M15 => "15",
            Self::M30 => "30",
            Self::H1 => "60",
            Self::H4 => "240",
            Self::H12 => "720",
            Self::D1 => "1D",
            Self::W1 => "1W",
        }
    }

    /// Resolution argument for the Codex `getBars` query.
    pub fn codex_str(self) -> &'static str {
        match self {
            Self::W1 => "7D",
            other => other.widget_str(),
        }
    }

    /// Key of the matching window inside a streaming `aggregates` object.
    pub fn aggregate_key(self) -> &'static str {
        match self {
            Self::S1 => "r1S",
            Self::S5 => "r5S",
            Self::S15 => "r15S",
            Self::S30 => "r30S",
            Self::M1 => "r1",
            Self::M5 => "r5",
            Self::M15 => "r15",
            Self::M30 => "r30",
            Self::H1 => "r60",
            Self::H4 => "r240",
            Self::H12 => "r720",
            Self::D1 => "r1D",
            Self::W1 => "r7D",
        }
    }

    /// Parse a widget resolution string, accepting the common aliases
    /// (`1H`, `4H`, `12H`, `D`, `W`, `7D`).
    pub fn parse(raw: &str) -> Option<Self> {
        let res = match raw.trim() {
            "1S" => Self::S1,
            "5S" => Self::S5,
            "15S" => Self::S15,
            "30S" => Self::S30,
            "1" => Self::M1,
            "5" => Self::M5,
            "15" => Self::M15,
            "30" => Self::M30,
            "60" | "1H" => Self::H1,
            "240" | "4H" => Self::H4,
            "720" | "12H" => Self::H12,
            "D" | "1D" => Self::D1,
            "W" | "1W" | "7D" => Self::W1,
            _ => return None,
        };
        Some(res)
    }

    /// Widget strings for every supported resolution, in ascending order.
    pub fn supported_widget_strs() -> Vec<String> {
        Self::ALL.iter().map(|r| r.widget_str().to_string()).collect()
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.widget_str())
    }
}

impl Serialize for Resolution {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.widget_str())
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unsupported resolution: {raw}")))
    }
}

// =============================================================================
// Quote settings
// =============================================================================

/// Which quoted aggregate of a streaming window feeds the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteCurrency {
    Token,
    Usd,
}

impl Default for QuoteCurrency {
    fn default() -> Self {
        Self::Token
    }
}

impl std::fmt::Display for QuoteCurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Usd => write!(f, "usd"),
        }
    }
}

/// Side of the pair used as the quote in Codex queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteToken {
    Token0,
    Token1,
}

impl Default for QuoteToken {
    fn default() -> Self {
        Self::Token0
    }
}

impl std::fmt::Display for QuoteToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token0 => write!(f, "token0"),
            Self::Token1 => write!(f, "token1"),
        }
    }
}

/// Upstream subscription flavour: in-progress snapshots or closed bars only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Unconfirmed,
    Confirmed,
}

impl Default for StreamKind {
    fn default() -> Self {
        Self::Unconfirmed
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unconfirmed => write!(f, "unconfirmed"),
            Self::Confirmed => write!(f, "confirmed"),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    BTC,
    ETH,
    USD,
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for Asset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BTC" => Ok(Asset::BTC),
            "ETH" => Ok(Asset::ETH),
            "USD" => Ok(Asset::USD),
            other => Err(format!("unsupported asset `{other}`")),
        }
    }
}

/// A trading pair: base/quote. Serializes as its string code (`"ETH-USD"`),
/// and only pairs in [`Pair::supported`] parse back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    /// The asset you buy or sell.
    pub base: Asset,
    /// The asset you pay or receive.
    pub quote: Asset,
}

pub const BTC_USD: Pair = Pair {
    base: Asset::BTC,
    quote: Asset::USD,
};
pub const ETH_USD: Pair = Pair {
    base: Asset::ETH,
    quote: Asset::USD,
};

impl Pair {
    /// The usual string code, e.g. "BTC-USD".
    pub fn code(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }

    /// Crypto/USD spot pair factory.
    pub fn crypto_usd(base: Asset) -> Self {
        Pair {
            base,
            quote: Asset::USD,
        }
    }

    pub fn supported() -> &'static [Pair] {
        &[BTC_USD, ETH_USD]
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || format!("unsupported pair `{s}`");
        let (base, quote) = s.split_once('-').ok_or_else(unsupported)?;
        let pair = Pair {
            base: base.parse().map_err(|_| unsupported())?,
            quote: quote.parse().map_err(|_| unsupported())?,
        };
        if Pair::supported().contains(&pair) {
            Ok(pair)
        } else {
            Err(unsupported())
        }
    }
}

impl TryFrom<String> for Pair {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Pair> for String {
    fn from(pair: Pair) -> String {
        pair.code()
    }
}

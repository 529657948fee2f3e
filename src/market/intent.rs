//! Turns a free-text (usually transcribed voice) command into an intent.
//!
//! Matching is phrase based: a key matches when its words appear
//! contiguously in the input, so "hi" does not match "which".

use crate::market::store::TickerData;
use std::collections::HashMap;

const QUOTE_ASSET: &str = "USDT";

const KNOWLEDGE_BASE: &[(&str, &str)] = &[
    ("hello", "Hello. The market looks volatile today."),
    ("hi", "Greetings. Ready to trade?"),
    ("how are you", "Fully operational and watching the tape."),
    ("who are you", "I am the tickwatch assistant. I track prices and alerts for you."),
    ("what is bitcoin", "Bitcoin is a decentralized digital currency, often called digital gold."),
    ("what is ethereum", "Ethereum is a decentralized platform that runs smart contracts."),
    ("buy", "I cannot execute trades, but I can set alerts for you."),
    ("sell", "I cannot execute trades, but I can set alerts for you."),
    ("thank you", "You are welcome."),
    ("bye", "Goodbye. I will keep watching the charts."),
];

const COIN_DICTIONARY: &[(&str, &str)] = &[
    ("bitcoin", "BTC"),
    ("btc", "BTC"),
    ("ethereum", "ETH"),
    ("ether", "ETH"),
    ("eth", "ETH"),
    ("solana", "SOL"),
    ("sol", "SOL"),
    ("doge", "DOGE"),
    ("dogecoin", "DOGE"),
    ("ripple", "XRP"),
    ("xrp", "XRP"),
    ("cardano", "ADA"),
    ("binance", "BNB"),
    ("bnb", "BNB"),
    ("pepe", "PEPE"),
    ("shiba", "SHIB"),
    ("matic", "MATIC"),
];

const NAVIGATE_WORDS: &[&str] = &["switch", "show", "open", "go to"];
const PRICE_WORDS: &[&str] = &["price", "how much", "value"];

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Conversational(&'static str),
    Navigate { pair: String, base: String },
    QueryPrice { pair: String, base: String, price: Option<String> },
    /// A coin we recognise that is not on the watchlist
    NotWatched(String),
    Unknown,
}

impl Intent {
    /// Response text for the user
    pub fn reply(&self) -> String {
        match self {
            Intent::Conversational(reply) => reply.to_string(),
            Intent::Navigate { base, .. } => format!("Right away. Pulling up the {} chart.", base),
            Intent::QueryPrice {
                base,
                price: Some(price),
                ..
            } => format!("{} is trading at {} dollars.", base, price),
            Intent::QueryPrice { base, price: None, .. } => {
                format!("No live price for {} yet.", base)
            }
            Intent::NotWatched(base) => format!(
                "I know {}, but it is not on your watchlist yet. Add it first.",
                base
            ),
            Intent::Unknown => {
                "I didn't catch that. Try 'switch to bitcoin' or 'what is ethereum'.".to_string()
            }
        }
    }
}

pub trait IntentResolver: Send {
    fn resolve(
        &self,
        text: &str,
        watchlist: &[String],
        tickers: &HashMap<String, TickerData>,
    ) -> Intent;
}

/// Keyword matcher over a fixed knowledge base and coin dictionary
#[derive(Debug, Default)]
pub struct KeywordResolver;

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_phrase(haystack: &[String], phrase: &str) -> bool {
    let needle = words(phrase);
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle.as_slice())
}

fn base_asset(pair: &str) -> &str {
    pair.strip_suffix(QUOTE_ASSET).unwrap_or(pair)
}

impl IntentResolver for KeywordResolver {
    fn resolve(
        &self,
        text: &str,
        watchlist: &[String],
        tickers: &HashMap<String, TickerData>,
    ) -> Intent {
        let heard = words(text);

        if let Some((_, reply)) = KNOWLEDGE_BASE
            .iter()
            .find(|(key, _)| contains_phrase(&heard, key))
        {
            return Intent::Conversational(*reply);
        }

        let target = COIN_DICTIONARY
            .iter()
            .find(|(name, _)| contains_phrase(&heard, name))
            .map(|(_, base)| base.to_string())
            .or_else(|| {
                watchlist
                    .iter()
                    .map(|pair| base_asset(pair))
                    .find(|base| contains_phrase(&heard, base))
                    .map(str::to_string)
            });
        let Some(base) = target else {
            return Intent::Unknown;
        };

        let exact = format!("{}{}", base, QUOTE_ASSET);
        let pair = watchlist
            .iter()
            .find(|s| **s == exact)
            .or_else(|| watchlist.iter().find(|s| s.starts_with(base.as_str())));
        let Some(pair) = pair.cloned() else {
            return Intent::NotWatched(base);
        };

        if NAVIGATE_WORDS.iter().any(|w| contains_phrase(&heard, w)) {
            Intent::Navigate { pair, base }
        } else if PRICE_WORDS.iter().any(|w| contains_phrase(&heard, w)) {
            let price = tickers.get(&pair).map(|t| t.price.clone());
            Intent::QueryPrice { pair, base, price }
        } else {
            Intent::Navigate { pair, base }
        }
    }
}

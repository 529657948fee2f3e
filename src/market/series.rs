use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// One chart point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: DateTime<Utc>,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trend {
    Up,
    #[default]
    Down,
}

/// Bounded rolling window of prices for the selected symbol.
///
/// The window follows exactly one symbol. Changing that symbol empties it;
/// past `capacity` the oldest sample is evicted.
#[derive(Debug, Clone)]
pub struct RollingSeries {
    symbol: Option<String>,
    samples: VecDeque<Sample>,
    capacity: usize,
    paused: bool,
}

impl RollingSeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            symbol: None,
            samples: VecDeque::with_capacity(capacity),
            capacity,
            paused: false,
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    /// Track another symbol; a different symbol starts from an empty window
    pub fn set_symbol(&mut self, symbol: Option<&str>) {
        if self.symbol.as_deref() != symbol {
            self.symbol = symbol.map(str::to_string);
            self.samples.clear();
        }
    }

    /// Append a sample if it belongs to the tracked symbol and buffering is live.
    /// Returns whether the sample was kept.
    pub fn record(&mut self, symbol: &str, price: f64, time: DateTime<Utc>) -> bool {
        if self.paused || self.symbol.as_deref() != Some(symbol) {
            return false;
        }
        self.samples.push_back(Sample { time, price });
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        true
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Up when the newest price is at or above the oldest one.
    /// Fewer than two samples reads as down.
    pub fn trend(&self) -> Trend {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) if self.samples.len() > 1 && last.price >= first.price => {
                Trend::Up
            }
            _ => Trend::Down,
        }
    }

    /// `(min, max)` over the window, for axis scaling
    pub fn price_range(&self) -> Option<(f64, f64)> {
        if self.samples.is_empty() {
            return None;
        }
        let min = self.samples.iter().map(|s| s.price).fold(f64::INFINITY, f64::min);
        let max = self.samples.iter().map(|s| s.price).fold(f64::NEG_INFINITY, f64::max);
        Some((min, max))
    }
}

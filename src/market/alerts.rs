use crate::market::feed::Tick;
use crate::market::notify::Notifier;
use crate::market::store::{Slice, StoreEvent, Subscription, TickerStore};
use crate::error::{Result, TickwatchError};
use log::{info, warn};

/// Emitted once per armed alert, on the tick that crossed the target
#[derive(Debug, Clone, PartialEq)]
pub struct AlertFired {
    pub symbol: String,
    pub target_price: f64,
    pub price: f64,
}

/// One-shot price alert over the store's single alert slot.
///
/// An armed alert fires on the first tick for its symbol whose price is at or
/// above the target, then disarms itself. The `has_fired` latch blocks a second
/// fire until the slot has been observed empty again.
pub struct AlertEngine {
    notifier: Box<dyn Notifier>,
    notifications_permitted: bool,
    has_fired: bool,
    alert_changes: Subscription,
}

impl AlertEngine {
    pub fn new(
        store: &mut TickerStore,
        notifier: Box<dyn Notifier>,
        notifications_permitted: bool,
    ) -> Self {
        Self {
            notifier,
            notifications_permitted,
            has_fired: false,
            alert_changes: store.subscribe(&[Slice::Alert]),
        }
    }

    pub fn has_fired(&self) -> bool {
        self.has_fired
    }

    /// Run one tick through the alert state machine
    pub fn check_price(&mut self, store: &mut TickerStore, tick: &Tick) -> Option<AlertFired> {
        while let Some(event) = self.alert_changes.try_next() {
            if let StoreEvent::AlertChanged(None) = event {
                self.has_fired = false;
            }
        }
        if store.alert().is_none() {
            self.has_fired = false;
            return None;
        }

        let fired = store
            .alert()
            .filter(|alert| alert.symbol == tick.symbol)
            .filter(|alert| !self.has_fired && tick.price >= alert.target_price)
            .map(|alert| AlertFired {
                symbol: alert.symbol.clone(),
                target_price: alert.target_price,
                price: tick.price,
            })?;

        info!(
            "ALERT: {} reached {} (threshold: {})",
            fired.symbol, fired.price, fired.target_price
        );
        self.has_fired = true;
        self.dispatch(&fired);
        store.set_alert(&fired.symbol, None);
        Some(fired)
    }

    fn dispatch(&self, fired: &AlertFired) {
        if let Err(e) = self.notifier.play_sound() {
            warn!("Alert sound failed: {}", e);
        }
        if self.notifications_permitted {
            let title = format!("{} Hit Target!", fired.symbol);
            let body = format!("${}", fired.price);
            if let Err(e) = self.notifier.notify(&title, &body) {
                warn!("Alert notification failed: {}", e);
            }
        }
    }
}

/// Validate a user-typed alert target before it can reach the store
pub fn parse_target_price(input: &str) -> Result<f64> {
    let trimmed = input.trim().trim_start_matches('$').replace(',', "");
    if trimmed.is_empty() {
        return Err(TickwatchError::InvalidInput(
            "alert target is empty".to_string(),
        ));
    }
    match trimmed.parse::<f64>() {
        Ok(price) if price.is_finite() && price > 0.0 => Ok(price),
        _ => Err(TickwatchError::InvalidInput(format!(
            "'{}' is not a valid target price",
            input.trim()
        ))),
    }
}

use std::collections::VecDeque;

/// Default number of ticks kept per symbol
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

/// Rolling window of recent prices and volumes for one symbol
///
/// Prices and volumes are pushed together, so both sequences always have the
/// same length. When the window is full the oldest tick is evicted.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    prices: VecDeque<f64>,
    volumes: VecDeque<f64>,
    capacity: usize,
}

impl PriceWindow {
    /// Create a new window
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of ticks to keep
    pub fn new(capacity: usize) -> Self {
        Self {
            prices: VecDeque::with_capacity(capacity + 1),
            volumes: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a tick, evicting the oldest one if the window is full
    pub fn push(&mut self, price: f64, volume: f64) {
        self.prices.push_back(price);
        self.volumes.push_back(volume);

        while self.prices.len() > self.capacity {
            self.prices.pop_front();
            self.volumes.pop_front();
        }
    }

    /// All prices, oldest first
    pub fn closes(&self) -> Vec<f64> {
        self.prices.iter().copied().collect()
    }

    /// All volumes, oldest first
    pub fn volumes(&self) -> Vec<f64> {
        self.volumes.iter().copied().collect()
    }

    /// The `n` most recent prices, oldest first
    pub fn recent_closes(&self, n: usize) -> Vec<f64> {
        let skip = self.prices.len().saturating_sub(n);
        self.prices.iter().skip(skip).copied().collect()
    }

    pub fn last_price(&self) -> Option<f64> {
        self.prices.back().copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PriceWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

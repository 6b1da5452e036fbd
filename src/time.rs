/// Simulated clock advanced once per runtime tick. TTLs and timers read
/// this, never the wall clock, so headless runs stay deterministic.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimClock {
    now: f64,
    ticks: u64,
}

impl SimClock {
    pub fn advance(&mut self, dt: f32) {
        self.now += dt as f64;
        self.ticks += 1;
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

use std::time::Duration;

use rand::Rng;

use crate::config::Pacing;

impl Pacing {
    pub fn next_delay(&self) -> Duration {
        match *self {
            Pacing::None => Duration::ZERO,
            Pacing::Fixed(d) => d,
            Pacing::Random { min, max } => {
                if max <= min {
                    return min;
                }
                let lo = min.as_nanos().min(u64::MAX as u128) as u64;
                let hi = max.as_nanos().min(u64::MAX as u128) as u64;
                Duration::from_nanos(rand::thread_rng().gen_range(lo..=hi))
            }
        }
    }
}

use std::sync::atomic::Ordering;
use std::time::Duration;

use keylight_api::{LightState, Power, clamp_brightness};

use crate::error::{Error, Result};
use crate::light::LightHandle;
use crate::settings::Identify;

/// Blink sequence used to point out a light.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifyPattern {
    pub high: u8,
    /// Sent clamped, so a zero here ends up as the device minimum
    pub low: u8,
    pub blinks: u32,
    pub delay: Duration,
}

impl Default for IdentifyPattern {
    fn default() -> Self {
        Self {
            high: 50,
            low: 0,
            blinks: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl From<&Identify> for IdentifyPattern {
    fn from(settings: &Identify) -> Self {
        Self {
            high: settings.high,
            low: settings.low,
            blinks: settings.blinks,
            delay: Duration::from_millis(settings.delay_ms),
        }
    }
}

impl IdentifyPattern {
    /// Every state sent for a light that was in `prior`, in order.
    pub fn steps(&self, prior: LightState) -> Vec<LightState> {
        let lit = LightState {
            on: Power::On,
            ..prior
        };
        let high = LightState {
            brightness: clamp_brightness(i64::from(self.high)),
            ..lit
        };
        let low = LightState {
            brightness: clamp_brightness(i64::from(self.low)),
            ..lit
        };

        let mut steps = vec![lit];
        for _ in 0..self.blinks {
            steps.push(high);
            steps.push(low);
        }
        steps.push(prior);
        steps
    }
}

/// Clears the identifying flag and the pending write it holds on drop.
struct IdentifyGuard<'a> {
    handle: &'a LightHandle,
    writing: bool,
}

impl IdentifyGuard<'_> {
    fn begin_write(&mut self) {
        self.handle.inner.begin_write();
        self.writing = true;
    }
}

impl Drop for IdentifyGuard<'_> {
    fn drop(&mut self) {
        let inner = &self.handle.inner;
        inner.identifying.store(false, Ordering::SeqCst);
        if self.writing {
            inner.end_write();
        }
    }
}

impl LightHandle {
    /// Blinks the light, then restores its prior power and brightness.
    ///
    /// Runs to completion once started; a second call while one is running
    /// fails with [`Error::Busy`]. Nothing is published to the sync bus.
    pub async fn identify(&self, pattern: &IdentifyPattern) -> Result<()> {
        let inner = &self.inner;

        if inner.identifying.swap(true, Ordering::SeqCst) {
            return Err(Error::Busy(inner.endpoint.to_string()));
        }

        let mut guard = IdentifyGuard {
            handle: self,
            writing: false,
        };

        // Settle local writes first so the prior state is what the device has
        self.flush().await;
        guard.begin_write();

        let prior = match self.cached() {
            Some(cached) => cached.state,
            None => self.refresh().await?,
        };

        tracing::info!("{}: identifying", inner.endpoint);

        inner.cancel_refetch();
        let result = self.blink(pattern, prior).await;

        if result.is_err() {
            // Best effort; the light may well be gone
            let _send = inner.send_lock.lock().await;
            let _ = inner.put(prior).await;
        }

        inner.store_state(prior, true);
        inner.spawn_refetch();

        result
    }

    async fn blink(&self, pattern: &IdentifyPattern, prior: LightState) -> Result<()> {
        let inner = &self.inner;
        let _send = inner.send_lock.lock().await;

        let steps = pattern.steps(prior);
        let last = steps.len() - 1;

        for (i, step) in steps.into_iter().enumerate() {
            inner.put(step).await?;

            // No pause after turning on or after the restore
            if i != 0 && i != last {
                tokio::time::sleep(pattern.delay).await;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pattern_steps() {
        let prior = LightState::new(Power::Off, 20, 213);
        let steps = IdentifyPattern::default().steps(prior);

        assert_eq!(steps.len(), 8);
        assert_eq!(steps[0], LightState::new(Power::On, 20, 213));
        assert_eq!(steps[1].brightness, 50);
        assert_eq!(steps[2].brightness, 3);
        assert!(steps[1..7].iter().all(|s| s.on == Power::On && s.temperature == 213));
        assert_eq!(steps[7], prior);
    }

    #[test]
    fn test_pattern_from_settings() {
        let pattern = IdentifyPattern::from(&Identify {
            high: 80,
            low: 10,
            blinks: 1,
            delay_ms: 5,
        });

        assert_eq!(pattern.delay, Duration::from_millis(5));
        let steps = pattern.steps(LightState::default());
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[2].brightness, 10);
    }
}

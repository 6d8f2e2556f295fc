//! Scroll settlement
//!
//! After a programmatic scroll the position may keep moving for a few paint
//! ticks (smooth scrolling, lazy content shifting the layout). We sample the
//! position once per tick and stop after `stable_frames` consecutive samples
//! move less than `epsilon`, or when the overall deadline runs out.

use crate::config::SettleConfig;
use crate::error::Result;
use std::future::Future;

/// Poll `read` once per `tick` until the value stops changing.
///
/// Returns the settled value, or the value read at the deadline when the
/// position never stabilised. Errors from `tick` or `read` abort the wait.
pub async fn wait_until_stable<T, TF, R, RF>(
    mut tick: T,
    mut read: R,
    config: &SettleConfig,
) -> Result<f64>
where
    T: FnMut() -> TF,
    TF: Future<Output = Result<()>>,
    R: FnMut() -> RF,
    RF: Future<Output = Result<f64>>,
{
    let mut last = read().await?;

    let polled = tokio::time::timeout(config.timeout(), async {
        let mut stable = 0u32;
        loop {
            tick().await?;
            let current = read().await?;
            if (current - last).abs() < config.epsilon {
                stable += 1;
                if stable >= config.stable_frames {
                    return Ok::<f64, crate::error::CaptureError>(current);
                }
            } else {
                stable = 0;
            }
            last = current;
        }
    })
    .await;

    match polled {
        Ok(result) => result,
        Err(_) => {
            log::debug!(
                "Scroll did not settle within {}ms, last position {:.1}",
                config.timeout_ms,
                last
            );
            read().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    async fn frame() -> Result<()> {
        tokio::time::sleep(Duration::from_millis(16)).await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_value_settles_after_two_frames() {
        let ticks = AtomicU32::new(0);
        let value = wait_until_stable(
            || {
                ticks.fetch_add(1, Ordering::SeqCst);
                frame()
            },
            || async { Ok(250.0) },
            &SettleConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(value, 250.0);
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_movement_to_stop() {
        // Position approaches 500 over four ticks, then holds
        let samples = Mutex::new(vec![100.0, 200.0, 300.0, 400.0, 500.0, 500.0, 500.0]);
        let read = || {
            let mut s = samples.lock().unwrap();
            let v = if s.len() > 1 { s.remove(0) } else { s[0] };
            async move { Ok(v) }
        };

        let value = wait_until_stable(frame, read, &SettleConfig::default())
            .await
            .unwrap();
        assert_eq!(value, 500.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_epsilon_jitter_counts_as_stable() {
        let samples = Mutex::new(vec![10.0, 10.2, 10.4, 10.4]);
        let read = || {
            let mut s = samples.lock().unwrap();
            let v = if s.len() > 1 { s.remove(0) } else { s[0] };
            async move { Ok(v) }
        };

        let value = wait_until_stable(frame, read, &SettleConfig::default())
            .await
            .unwrap();
        assert_eq!(value, 10.4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_current_position() {
        let position = Mutex::new(0.0_f64);
        let read = || {
            let mut p = position.lock().unwrap();
            *p += 10.0;
            let v = *p;
            async move { Ok(v) }
        };

        let start = tokio::time::Instant::now();
        let value = wait_until_stable(frame, read, &SettleConfig::default())
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(800));
        assert!(start.elapsed() < Duration::from_millis(900));
        assert!(value > 400.0, "position kept moving until the deadline: {}", value);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_aborts_wait() {
        let result = wait_until_stable(
            frame,
            || async { Err(crate::error::CaptureError::NoPage) },
            &SettleConfig::default(),
        )
        .await;
        assert!(result.is_err());
    }
}

//! Poll timer seam. The timer loop only sees the trait, so tests drive the
//! whole pipeline by injecting a manual implementation.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

/// One-shot resettable timer delivering tick timestamps.
#[async_trait]
pub trait PollTimer: Send {
    /// Wait for the next tick. `None` means the timer is gone for good.
    async fn tick(&mut self) -> Option<Instant>;

    /// Re-arm the timer to fire once after `after`.
    fn reset(&mut self, after: Duration);

    /// Disarm the timer.
    fn stop(&mut self);
}

enum TimerCmd {
    Reset(Duration),
    Stop,
}

/// Wall-clock timer over `tokio::time::sleep_until`.
pub struct RealTimer {
    ticks: mpsc::Receiver<Instant>,
    cmd: mpsc::UnboundedSender<TimerCmd>,
}

impl RealTimer {
    /// Create a timer whose first fire is `first` from now.
    pub fn new(first: Duration) -> Self {
        let (tick_tx, ticks) = mpsc::channel(1);
        let (cmd, mut cmd_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut deadline = Some(Instant::now() + first);
            loop {
                let armed = async {
                    match deadline {
                        Some(at) => sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(TimerCmd::Reset(after)) => {
                            deadline = Some(Instant::now() + after);
                        }
                        Some(TimerCmd::Stop) | None => break,
                    },
                    _ = armed => {
                        deadline = None;
                        if tick_tx.send(Instant::now()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { ticks, cmd }
    }
}

#[async_trait]
impl PollTimer for RealTimer {
    async fn tick(&mut self) -> Option<Instant> {
        self.ticks.recv().await
    }

    fn reset(&mut self, after: Duration) {
        let _ = self.cmd.send(TimerCmd::Reset(after));
    }

    fn stop(&mut self) {
        let _ = self.cmd.send(TimerCmd::Stop);
    }
}

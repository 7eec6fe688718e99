use crate::actor;
use crate::replica::timers::stop_signal::StopCheck;
use crate::replica::timers::time::{Clock, RealClock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

/// The periodic jobs of a replica. Each kind gets its own task, and the actor decides what a tick
/// means for the current role.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Tick {
    /// Check whether the election deadline has passed.
    Election,
    /// Leader asserts itself to every peer.
    Heartbeat,
    /// Leader sends missing entries to peers that are behind.
    Replication,
    /// Apply newly committed entries.
    Apply,
}

/// TickerTask publishes `tick` to the actor every `period` until stopped or the actor exits.
pub(crate) struct TickerTask<C: Clock> {
    tick: Tick,
    period: Duration,
    actor_client: actor::WeakActorClient,
    clock: C,
    stop_check: StopCheck,
    started_at: Instant,
}

impl TickerTask<RealClock> {
    pub(crate) fn spawn(
        tick: Tick,
        period: Duration,
        actor_client: actor::WeakActorClient,
        stop_check: StopCheck,
    ) -> JoinHandle<()> {
        let task = TickerTask::new(tick, period, actor_client, stop_check, RealClock);
        tokio::task::spawn(task.run())
    }
}

impl<C: Clock + Send + Sync + 'static> TickerTask<C> {
    fn new(
        tick: Tick,
        period: Duration,
        actor_client: actor::WeakActorClient,
        stop_check: StopCheck,
        clock: C,
    ) -> Self {
        TickerTask {
            tick,
            period,
            actor_client,
            started_at: clock.now(),
            clock,
            stop_check,
        }
    }

    async fn run(mut self) {
        let mut next_wake = self.started_at;
        loop {
            next_wake += self.period;
            self.clock.sleep_until(next_wake).await;

            if self.stop_check.should_stop() {
                return;
            }
            if self.actor_client.tick(self.tick).await.is_err() {
                return;
            }

            // After a stall, tick once and resume the cadence from now instead of bursting.
            let now = self.clock.now();
            if next_wake < now {
                next_wake = now;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::timers::stop_signal;
    use crate::replica::timers::test_utils::TestUtilActor;
    use crate::replica::timers::time;

    #[tokio::test]
    async fn ticker_lifecycle() {
        // -- setup --
        let period = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (stopper, stop_check) = stop_signal::new();
        let (mock_clock, mut mock_clock_controller) = time::mocked_clock();

        let task = TickerTask::new(Tick::Heartbeat, period, strong_actor_client.weak(), stop_check, mock_clock);
        let join_handle = tokio::task::spawn(task.run());

        // -- execute & verify --

        // 1. Nothing until a period passes.
        actor.assert_no_event().await;

        // 2. One tick per period.
        for _ in 0..5 {
            mock_clock_controller.advance(period);
            actor.assert_tick_event(Tick::Heartbeat).await;
            actor.assert_no_event().await;
        }

        // 3. A big leap yields a single tick.
        mock_clock_controller.advance(period * 5);
        actor.assert_tick_event(Tick::Heartbeat).await;
        actor.assert_no_event().await;

        // 4. Stop, and the task exits at its next wake without publishing.
        stopper.stop();
        mock_clock_controller.advance(period);
        join_handle.await.unwrap();
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn ticker_exits_when_actor_is_gone() {
        let period = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let (_stopper, stop_check) = stop_signal::new();
        let (mock_clock, mut mock_clock_controller) = time::mocked_clock();

        let task = TickerTask::new(Tick::Apply, period, strong_actor_client.weak(), stop_check, mock_clock);
        let join_handle = tokio::task::spawn(task.run());

        drop(rx);
        drop(strong_actor_client);
        mock_clock_controller.advance(period);
        tokio::time::timeout(Duration::from_secs(5), join_handle)
            .await
            .expect("ticker should exit")
            .unwrap();
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::coordinator::RoomCoordinator;

/// Background task that retires expired rooms.
///
/// Runs once immediately and then every `interval` until `shutdown` fires.
/// A slow pass delays the next tick rather than bunching ticks up.
pub async fn run_sweep_loop(
    coordinator: Arc<RoomCoordinator>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Sweep task stopping");
                break;
            }
            _ = ticker.tick() => {
                let retired = coordinator.sweep(Utc::now()).await;
                if !retired.is_empty() {
                    info!("Sweep: retired {} expired rooms", retired.len());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use ripple_types::events::RoomEvent;

    use super::*;
    use crate::test_support::coordinator;

    #[tokio::test(start_paused = true)]
    async fn test_loop_retires_rooms_until_cancelled() {
        let coordinator = coordinator();
        let room = coordinator
            .registry()
            .create(None, chrono::Duration::zero(), 5)
            .unwrap();
        let mut sub = coordinator.dispatcher().register(room.id, Uuid::new_v4()).await.unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_sweep_loop(
            coordinator.clone(),
            Duration::from_secs(300),
            shutdown.clone(),
        ));

        // First tick fires right away
        assert_eq!(
            *sub.events.recv().await.unwrap(),
            RoomEvent::RoomExpired { room_id: room.id }
        );
        assert!(!coordinator.registry().get(room.id).unwrap().room.active);

        shutdown.cancel();
        task.await.unwrap();
    }
}

use std::time::Duration;

use tracing::info;

use crate::route::AppState;

pub async fn reap_idle_sessions(state: AppState) {
    let max_idle = Duration::from_millis(state.config.stream.idle_timeout);
    let tick = Duration::from_millis(state.config.stream.check_tick_time.0);
    loop {
        tokio::time::sleep(tick).await;
        let reaped = state.registry.reap_idle(max_idle).await;
        if !reaped.is_empty() {
            info!("reaped {} idle stream sessions: {:?}", reaped.len(), reaped);
        }
    }
}

//! Background sweep for subscriptions past their TTL.
//!
//! Connections that vanish without the transport ever reporting them gone
//! would otherwise linger until a send fails. The sweep bounds that staleness
//! to the TTL plus one interval.

use std::sync::Arc;
use std::time::Duration;

use super::SubscriptionRegistry;

/// Run one sweep pass against the registry.
pub async fn sweep_once(registry: &dyn SubscriptionRegistry) {
    let now = chrono::Utc::now().timestamp();
    match registry.sweep_expired(now).await {
        Ok(count) if count > 0 => {
            tracing::info!("Subscription TTL sweep: removed {} expired rows", count);
        }
        Ok(_) => {
            tracing::debug!("Subscription TTL sweep: nothing expired");
        }
        Err(e) => {
            tracing::error!("Subscription TTL sweep error: {}", e);
        }
    }
}

/// Spawn a background task that sweeps expired subscriptions every `interval_secs`.
/// An interval of zero disables the sweep.
pub fn spawn_ttl_sweep(registry: Arc<dyn SubscriptionRegistry>, interval_secs: u64) {
    if interval_secs == 0 {
        tracing::info!("Subscription TTL sweep disabled");
        return;
    }
    let interval = Duration::from_secs(interval_secs);

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            sweep_once(registry.as_ref()).await;
        }
    });
}

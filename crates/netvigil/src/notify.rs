// ── Log-based status notifications ──

use tracing::{info, warn};

use netvigil_core::{Notifier, StatusChange};

/// Reports notifiable status transitions through `tracing`.
///
/// Outages log at `warn`, devices coming up at `info`.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, change: &StatusChange) {
        if change.new.is_up() {
            info!(
                device = %change.device_id,
                name = %change.device_name,
                from = %change.old,
                to = %change.new,
                "device is up"
            );
        } else {
            warn!(
                device = %change.device_id,
                name = %change.device_name,
                from = %change.old,
                to = %change.new,
                "device status changed"
            );
        }
    }
}

//! One-time remote provisioning with persisted completion flags.

use rusqlite::Connection;

use crate::db::{state_keys, SqliteSyncStateRepository, SyncStateRepository};
use crate::error::Result;
use crate::remote::RemoteStore;

/// Ensures the remote zone and change subscription exist.
///
/// Each step records a completion flag in `sync_state` so later launches
/// skip the remote call entirely. A crash between the remote call and the
/// flag write re-runs the step; both remote operations are idempotent, so
/// re-running is safe. The remote is considered available only once both
/// steps have completed.
pub struct SyncCoordinator<'a, R: RemoteStore> {
    conn: &'a Connection,
    remote: &'a R,
    zone_name: &'a str,
}

impl<'a, R: RemoteStore> SyncCoordinator<'a, R> {
    pub const fn new(conn: &'a Connection, remote: &'a R, zone_name: &'a str) -> Self {
        Self { conn, remote, zone_name }
    }

    /// Run any provisioning steps not yet recorded as complete.
    pub async fn provision(&self) -> Result<()> {
        let state = SqliteSyncStateRepository::new(self.conn);

        if state.get_flag(state_keys::ZONE_CREATED)? {
            tracing::debug!(zone = self.zone_name, "Zone already provisioned");
        } else {
            self.remote.create_zone(self.zone_name).await?;
            state.set_flag(state_keys::ZONE_CREATED, true)?;
            tracing::info!(zone = self.zone_name, "Created remote zone");
        }

        if state.get_flag(state_keys::SUBSCRIPTION_SAVED)? {
            tracing::debug!("Subscription already provisioned");
        } else {
            // The subscription only drives change notifications; pulls work
            // without it, so a failure here does not block readiness.
            match self.remote.create_subscription(self.zone_name).await {
                Ok(()) => {
                    state.set_flag(state_keys::SUBSCRIPTION_SAVED, true)?;
                    tracing::info!("Created change subscription");
                }
                Err(error) => {
                    tracing::warn!(%error, "Subscription creation failed; will retry");
                }
            }
        }

        state.set_flag(state_keys::REMOTE_AVAILABLE, true)?;
        Ok(())
    }
}

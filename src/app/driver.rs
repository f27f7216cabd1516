use std::{sync::Arc, thread::JoinHandle, time::Duration};

use tracing::{debug, error, info};

use super::{
    error::SupervisorError,
    supervisor::{Activator, Supervisor},
};
use crate::{context::Context, utils::threads::spawn_named_thread};

/// Background thread calling [`Supervisor::update_status`] at a fixed interval, for callers
/// that do not drive the polling themselves.
pub struct StatusDriver {
    ctx: Context,
    handle: JoinHandle<()>,
}

impl StatusDriver {
    pub fn spawn<A>(
        supervisor: Arc<Supervisor<A>>,
        interval: Duration,
    ) -> Result<Self, SupervisorError>
    where
        A: Activator + 'static,
    {
        let ctx = Context::new();
        let thread_ctx = ctx.clone();
        let thread_name = format!("status driver {}", supervisor.id());

        let handle = spawn_named_thread(thread_name, move || loop {
            match supervisor.update_status() {
                Ok(Some(status)) => debug!(supervisor = %supervisor.id(), fields = status.len(), "status updated"),
                Ok(None) => {}
                Err(err) => error!(supervisor = %supervisor.id(), "Status update failed: {}", err),
            }
            if thread_ctx.wait_cancelled(interval) {
                debug!(supervisor = %supervisor.id(), "status driver cancelled");
                break;
            }
        })
        .map_err(SupervisorError::ThreadSpawn)?;
        info!("Status driver started");

        Ok(Self { ctx, handle })
    }

    /// Cancels the driver and waits for its thread. Returns whether it finished normally.
    pub fn stop(self) -> bool {
        if let Err(err) = self.ctx.cancel_all() {
            error!("Could not cancel status driver: {}", err);
            return false;
        }
        self.handle.join().is_ok()
    }
}

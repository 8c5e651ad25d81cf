//! Launch composition: plan → backend → dispatch → binding → lifecycle.

use tokio::sync::watch;
use tracing::info;

use crate::backend::{build_backend, BackendConfig};
use crate::config::LauncherConfig;
use crate::error::LaunchError;
use crate::lifecycle::Lifecycle;
use crate::overrides::OverrideRule;
use crate::transport::{dispatch, PlatformCapability, TargetAddress, TransportBinding};

/// Receiving side of the shutdown signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested or the trigger is gone.
    pub async fn wait(&mut self) {
        loop {
            let fired = *self.rx.borrow_and_update();
            if fired || self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Sending side of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Everything one invocation needs, as parsed from the command line.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub target: TargetAddress,
    pub backend: BackendConfig,
    pub overrides: Vec<OverrideRule>,
    pub capability: PlatformCapability,
}

impl LaunchPlan {
    /// Configuration-file overrides first, then the plan's own in argv order.
    fn ordered_rules(&self, config: &LauncherConfig) -> Vec<OverrideRule> {
        let mut cli = self.overrides.clone();
        cli.sort_by_key(|rule| rule.position);
        config
            .override_rules()
            .into_iter()
            .chain(cli)
            .enumerate()
            .map(|(position, rule)| OverrideRule { position, ..rule })
            .collect()
    }
}

/// Run one invocation to completion.
///
/// Overrides are evaluated and the transport is dispatched before anything
/// is acquired; only then does the lifecycle set up, serve and tear down.
///
/// # Errors
/// Any [`LaunchError`]; its category decides the exit status.
pub async fn launch(
    plan: LaunchPlan,
    config: &LauncherConfig,
    shutdown: Shutdown,
) -> Result<(), LaunchError> {
    launch_with(plan, config, shutdown, &mut Lifecycle::new()).await
}

/// [`launch`], recording the states passed through in `lifecycle`.
pub async fn launch_with(
    plan: LaunchPlan,
    config: &LauncherConfig,
    shutdown: Shutdown,
    lifecycle: &mut Lifecycle,
) -> Result<(), LaunchError> {
    let rules = plan.ordered_rules(config);
    let backend = build_backend(plan.backend.clone(), &rules)?;
    lifecycle.backend_ready();

    let binding_kind = dispatch(plan.target.scheme(), plan.capability)?;
    let mut binding =
        TransportBinding::new(binding_kind, &plan.target, backend.clone(), &config.transport)?;
    lifecycle.transport_ready();

    info!(
        target = %plan.target,
        backend = %backend.kind(),
        capability = %plan.capability,
        "launching virtual ECU"
    );
    lifecycle.run(&backend, &mut binding, shutdown).await
}

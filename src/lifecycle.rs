// Lifecycle: setup, run and teardown of one virtual ECU invocation
//
// Teardown is bracketed by a guard armed before setup, so the backend is torn
// down exactly once whether the run completes, faults or is cancelled.

use std::fmt;

use tracing::{info, warn};

use crate::backend::ResolvedBackend;
use crate::error::{log_launch_error, LaunchError};
use crate::launcher::Shutdown;
use crate::transport::ServerTransport;

/// Phase of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unconfigured,
    BackendReady,
    TransportReady,
    Running,
    Completed,
    Faulted,
    TornDown,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::BackendReady => "backend-ready",
            LifecycleState::TransportReady => "transport-ready",
            LifecycleState::Running => "running",
            LifecycleState::Completed => "completed",
            LifecycleState::Faulted => "faulted",
            LifecycleState::TornDown => "torn-down",
        };
        f.write_str(name)
    }
}

/// Tears the backend down once: explicitly via [`TeardownGuard::release`],
/// or on drop if the owning future was cancelled first.
pub struct TeardownGuard {
    backend: Option<ResolvedBackend>,
}

impl TeardownGuard {
    pub fn arm(backend: ResolvedBackend) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn release(mut self) -> Result<(), LaunchError> {
        match self.backend.take() {
            Some(backend) => backend.teardown(),
            None => Ok(()),
        }
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if let Some(backend) = self.backend.take() {
            warn!("run abandoned; tearing backend down");
            if let Err(err) = backend.teardown() {
                log_launch_error(&err, "teardown on drop");
            }
        }
    }
}

/// Sequences one invocation and records every state it passes through.
///
/// The launcher reports the selector and dispatcher results through
/// [`Lifecycle::backend_ready`] and [`Lifecycle::transport_ready`]; `run`
/// owns everything from backend setup onwards.
///
/// # Example
/// ```ignore
/// let mut lifecycle = Lifecycle::new();
/// let backend = build_backend(config, &rules)?;
/// lifecycle.backend_ready();
/// let mut binding = TransportBinding::new(kind, &target, backend.clone(), &transport)?;
/// lifecycle.transport_ready();
/// lifecycle.run(&backend, &mut binding, shutdown).await?;
/// assert_eq!(lifecycle.state(), LifecycleState::TornDown);
/// ```
#[derive(Debug)]
pub struct Lifecycle {
    history: Vec<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            history: vec![LifecycleState::Unconfigured],
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.history
            .last()
            .copied()
            .unwrap_or(LifecycleState::Unconfigured)
    }

    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    fn transition(&mut self, next: LifecycleState) {
        info!(from = %self.state(), to = %next, "lifecycle transition");
        self.history.push(next);
    }

    /// The backend selector produced a backend.
    pub fn backend_ready(&mut self) {
        self.transition(LifecycleState::BackendReady);
    }

    /// The dispatcher produced a binding for the backend.
    pub fn transport_ready(&mut self) {
        self.transition(LifecycleState::TransportReady);
    }

    /// Set up the backend, bind and serve the transport, then tear down.
    ///
    /// The run enters `Running` once backend setup completes.
    ///
    /// # Arguments
    /// * `backend` - Backend shared with `transport`
    /// * `transport` - Binding constructed for `backend`
    /// * `shutdown` - Signal ending the serve phase
    ///
    /// # Errors
    /// - The setup, bind or serve error that faulted the run; a teardown
    ///   failure after a fault is only logged
    /// - `TeardownFailed` when teardown fails after a completed run
    pub async fn run<T: ServerTransport>(
        &mut self,
        backend: &ResolvedBackend,
        transport: &mut T,
        shutdown: Shutdown,
    ) -> Result<(), LaunchError> {
        let guard = TeardownGuard::arm(backend.clone());
        let outcome = self.drive(backend, transport, shutdown).await;

        match &outcome {
            Ok(()) => self.transition(LifecycleState::Completed),
            Err(err) => {
                log_launch_error(err, "run");
                self.transition(LifecycleState::Faulted);
            }
        }

        let teardown = guard.release();
        self.transition(LifecycleState::TornDown);

        match (outcome, teardown) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(LaunchError::TeardownFailed { reason })) => {
                Err(LaunchError::TeardownFailed { reason })
            }
            (Ok(()), Err(err)) => Err(LaunchError::TeardownFailed {
                reason: err.to_string(),
            }),
            (Err(fault), Ok(())) => Err(fault),
            (Err(fault), Err(err)) => {
                log_launch_error(&err, "teardown after fault");
                Err(fault)
            }
        }
    }

    async fn drive<T: ServerTransport>(
        &mut self,
        backend: &ResolvedBackend,
        transport: &mut T,
        shutdown: Shutdown,
    ) -> Result<(), LaunchError> {
        backend.setup()?;
        self.transition(LifecycleState::Running);

        transport.bind().await?;
        transport.serve(shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendKind, ResponseDefaults, UdsBackend};
    use crate::launcher::shutdown_channel;
    use crate::overrides::AttributeValue;
    use crate::uds::ServiceId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        setups: AtomicUsize,
        teardowns: AtomicUsize,
    }

    struct CountingBackend {
        counters: Arc<Counters>,
        defaults: ResponseDefaults,
        fail_setup: bool,
        fail_teardown: bool,
    }

    impl UdsBackend for CountingBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Synthetic
        }

        fn defaults(&self) -> &ResponseDefaults {
            &self.defaults
        }

        fn defaults_mut(&mut self) -> &mut ResponseDefaults {
            &mut self.defaults
        }

        fn setup(&mut self) -> Result<(), LaunchError> {
            self.counters.setups.fetch_add(1, Ordering::SeqCst);
            if self.fail_setup {
                return Err(LaunchError::SetupFailed {
                    reason: "boom".into(),
                });
            }
            Ok(())
        }

        fn teardown(&mut self) -> Result<(), LaunchError> {
            self.counters.teardowns.fetch_add(1, Ordering::SeqCst);
            if self.fail_teardown {
                return Err(LaunchError::TeardownFailed {
                    reason: "stuck".into(),
                });
            }
            Ok(())
        }

        fn supports_service(&self, _: ServiceId) -> bool {
            true
        }

        fn supports_sub_function(&self, _: ServiceId, _: u8) -> bool {
            true
        }

        fn respond(&mut self, _: &[u8]) -> Option<Vec<u8>> {
            None
        }

        fn apply_specific(&mut self, name: &str, _: AttributeValue) -> Result<(), LaunchError> {
            Err(LaunchError::UnknownAttribute {
                kind: self.kind(),
                name: name.to_string(),
            })
        }
    }

    fn counting(fail_setup: bool, fail_teardown: bool) -> (ResolvedBackend, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let backend = CountingBackend {
            counters: counters.clone(),
            defaults: ResponseDefaults::default(),
            fail_setup,
            fail_teardown,
        };
        (ResolvedBackend::new(Box::new(backend)), counters)
    }

    enum Script {
        Complete,
        FailBind,
        FailServe,
        WaitForShutdown,
        Hang,
    }

    struct ScriptedTransport(Script);

    fn prepared() -> Lifecycle {
        let mut lifecycle = Lifecycle::new();
        lifecycle.backend_ready();
        lifecycle.transport_ready();
        lifecycle
    }

    impl ServerTransport for ScriptedTransport {
        async fn bind(&mut self) -> Result<(), LaunchError> {
            match self.0 {
                Script::FailBind => Err(LaunchError::transport("address in use")),
                _ => Ok(()),
            }
        }

        async fn serve(&mut self, mut shutdown: Shutdown) -> Result<(), LaunchError> {
            match self.0 {
                Script::FailServe => Err(LaunchError::transport("connection reset")),
                Script::WaitForShutdown => {
                    shutdown.wait().await;
                    Ok(())
                }
                Script::Hang => std::future::pending().await,
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn completed_run_visits_every_state() {
        let (backend, counters) = counting(false, false);
        let (_trigger, shutdown) = shutdown_channel();
        let mut lifecycle = prepared();
        lifecycle
            .run(&backend, &mut ScriptedTransport(Script::Complete), shutdown)
            .await
            .unwrap();

        use LifecycleState::*;
        assert_eq!(
            lifecycle.history(),
            &[Unconfigured, BackendReady, TransportReady, Running, Completed, TornDown]
        );
        assert_eq!(counters.setups.load(Ordering::SeqCst), 1);
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_signal_ends_the_run() {
        let (backend, counters) = counting(false, false);
        let (trigger, shutdown) = shutdown_channel();
        trigger.fire();
        Lifecycle::new()
            .run(&backend, &mut ScriptedTransport(Script::WaitForShutdown), shutdown)
            .await
            .unwrap();
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn every_fault_still_tears_down_once() {
        for (fail_setup, script) in [
            (true, Script::Complete),
            (false, Script::FailBind),
            (false, Script::FailServe),
        ] {
            let (backend, counters) = counting(fail_setup, false);
            let (_trigger, shutdown) = shutdown_channel();
            let mut lifecycle = prepared();
            let err = lifecycle
                .run(&backend, &mut ScriptedTransport(script), shutdown)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                LaunchError::SetupFailed { .. } | LaunchError::TransportFailed { .. }
            ));
            assert_eq!(lifecycle.state(), LifecycleState::TornDown);
            assert!(lifecycle.history().contains(&LifecycleState::Faulted));
            assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn setup_failure_faults_before_running() {
        let (backend, _counters) = counting(true, false);
        let (_trigger, shutdown) = shutdown_channel();
        let mut lifecycle = prepared();
        lifecycle
            .run(&backend, &mut ScriptedTransport(Script::Complete), shutdown)
            .await
            .unwrap_err();

        use LifecycleState::*;
        assert_eq!(
            lifecycle.history(),
            &[Unconfigured, BackendReady, TransportReady, Faulted, TornDown]
        );
    }

    #[tokio::test]
    async fn bind_failure_faults_while_running() {
        let (backend, _counters) = counting(false, false);
        let (_trigger, shutdown) = shutdown_channel();
        let mut lifecycle = prepared();
        lifecycle
            .run(&backend, &mut ScriptedTransport(Script::FailBind), shutdown)
            .await
            .unwrap_err();

        use LifecycleState::*;
        assert_eq!(
            lifecycle.history(),
            &[Unconfigured, BackendReady, TransportReady, Running, Faulted, TornDown]
        );
    }

    #[tokio::test]
    async fn teardown_failure_after_fault_keeps_original_error() {
        let (backend, counters) = counting(false, true);
        let (_trigger, shutdown) = shutdown_channel();
        let err = Lifecycle::new()
            .run(&backend, &mut ScriptedTransport(Script::FailServe), shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::TransportFailed { .. }));
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn teardown_failure_after_completion_is_reported() {
        let (backend, _counters) = counting(false, true);
        let (_trigger, shutdown) = shutdown_channel();
        let err = Lifecycle::new()
            .run(&backend, &mut ScriptedTransport(Script::Complete), shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::TeardownFailed { .. }));
    }

    #[tokio::test]
    async fn cancelled_run_tears_down_on_drop() {
        let (backend, counters) = counting(false, false);
        let (_trigger, shutdown) = shutdown_channel();
        let mut lifecycle = Lifecycle::new();
        let mut transport = ScriptedTransport(Script::Hang);
        let run = lifecycle.run(&backend, &mut transport, shutdown);
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(20), run).await;
        assert!(timed_out.is_err());
        assert_eq!(counters.setups.load(Ordering::SeqCst), 1);
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);
    }
}

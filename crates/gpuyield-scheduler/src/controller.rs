//! Allocation controller
//!
//! Owns the single managed workload and decides, for each incoming claim,
//! whether the workload has to be preempted and where it runs next. Every
//! transition happens under one lock, so concurrent claims are serialized.

use gpuyield_core::{
    display_devices, Claim, ClaimOutcome, ControllerPhase, ControllerState, ControllerStatus,
    DeviceSet, GpuYieldError, GpuYieldResult, ProcessHandle,
};
use gpuyield_runtime::Launcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::inventory::InventoryCache;

/// Allocation controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Command line of the managed workload
    pub command: String,
    /// Wait after a stop before the freed devices are reused
    pub settle_delay: Duration,
}

impl ControllerConfig {
    /// Create a configuration with the default one-second settling delay
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// State machine running one workload on whatever GPUs are left free
pub struct AllocationController {
    config: ControllerConfig,
    inventory: Arc<InventoryCache>,
    launcher: Arc<dyn Launcher>,
    state: Mutex<ControllerState>,
    phase: watch::Sender<ControllerPhase>,
}

impl AllocationController {
    /// Create a new controller in the `Idle` state
    pub fn new(
        config: ControllerConfig,
        inventory: Arc<InventoryCache>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        let (phase, _) = watch::channel(ControllerPhase::Idle);
        Self {
            config,
            inventory,
            launcher,
            state: Mutex::new(ControllerState::Idle),
            phase,
        }
    }

    /// Scan the inventory and start the workload on every free device.
    ///
    /// Returns the launched process, or `None` when no device is free.
    pub async fn bootstrap(&self) -> GpuYieldResult<Option<ProcessHandle>> {
        let mut state = self.state.lock().await;
        if let ControllerState::Running(handle) = &*state {
            debug!(launch_id = %handle.launch_id, "Workload already running");
            return Ok(Some(handle.clone()));
        }

        let free = self.inventory.refresh().await;
        info!(
            source = self.inventory.source_name(),
            free = %display_devices(&free),
            "Initial GPU inventory"
        );

        if free.is_empty() {
            info!("No free GPUs, workload not started");
            self.set_state(&mut state, ControllerState::Idle);
            return Ok(None);
        }

        self.launch(&mut state, free).await.map(Some)
    }

    /// Handle another actor's claim on `claim` devices.
    pub async fn claim(&self, claim: Claim) -> GpuYieldResult<ClaimOutcome> {
        let mut state = self.state.lock().await;
        let held = state.devices();

        info!(
            claimed = %display_devices(claim.devices()),
            held = %display_devices(&held),
            "Claim received"
        );

        let free = self.inventory.refresh_excluding(&claim).await;

        if claim.is_empty() {
            debug!("Empty claim, assignment unchanged");
            return Ok(ClaimOutcome::Unchanged {
                devices: state.handle().map(|h| h.devices.clone()),
            });
        }

        let mut preempted = false;
        if state.handle().map_or(false, |h| h.conflicts_with(&claim)) {
            if let ControllerState::Running(handle) = std::mem::take(&mut *state) {
                info!(
                    launch_id = %handle.launch_id,
                    devices = %display_devices(&handle.devices),
                    "Workload holds claimed GPUs, preempting"
                );
                self.phase.send_replace(ControllerPhase::Preempting);
                self.terminate(&handle).await;
                self.set_state(&mut state, ControllerState::Idle);
                preempted = true;
            }
        } else if !held.is_empty() {
            debug!("Claim does not overlap the running workload");
        }

        if free.is_empty() {
            if let ControllerState::Running(handle) = std::mem::take(&mut *state) {
                self.terminate(&handle).await;
            }
            self.set_state(&mut state, ControllerState::Idle);
            info!("No free GPUs left, workload not started");
            return Ok(ClaimOutcome::NoDevicesAvailable { preempted });
        }

        if let ControllerState::Running(handle) = &*state {
            if handle.devices == free {
                debug!(
                    devices = %display_devices(&free),
                    "Workload already runs on the free GPUs"
                );
                return Ok(ClaimOutcome::Launched {
                    devices: free,
                    preempted,
                });
            }
        }

        if let ControllerState::Running(handle) = std::mem::take(&mut *state) {
            info!(
                from = %display_devices(&handle.devices),
                to = %display_devices(&free),
                "Moving workload to recomputed GPUs"
            );
            self.phase.send_replace(ControllerPhase::Preempting);
            self.terminate(&handle).await;
            self.set_state(&mut state, ControllerState::Idle);
        }

        let handle = self.launch(&mut state, free).await?;
        Ok(ClaimOutcome::Launched {
            devices: handle.devices,
            preempted,
        })
    }

    /// Cached free devices; never queries the inventory source
    pub async fn free_devices(&self) -> DeviceSet {
        self.inventory.current().await
    }

    /// Current phase, including the transient `Preempting` phase
    pub fn phase(&self) -> ControllerPhase {
        *self.phase.borrow()
    }

    /// Snapshot of the controller
    pub async fn status(&self) -> ControllerStatus {
        let state = self.state.lock().await;
        let process = state.handle().cloned();

        let alive = match &process {
            Some(handle) => match self.launcher.is_running(handle).await {
                Ok(alive) => alive,
                Err(e) => {
                    warn!(error = %e, "Failed to check workload process");
                    false
                }
            },
            None => false,
        };

        ControllerStatus {
            phase: state.phase(),
            process,
            alive,
            free_devices: self.inventory.current().await,
        }
    }

    /// Stop the workload, if any, and go idle
    pub async fn shutdown(&self) -> GpuYieldResult<()> {
        let mut state = self.state.lock().await;
        let previous = std::mem::take(&mut *state);
        self.set_state(&mut state, ControllerState::Idle);

        if let ControllerState::Running(handle) = previous {
            info!(launch_id = %handle.launch_id, "Stopping workload for shutdown");
            self.launcher.stop(&handle).await?;
        }
        Ok(())
    }

    async fn launch(
        &self,
        state: &mut ControllerState,
        devices: DeviceSet,
    ) -> GpuYieldResult<ProcessHandle> {
        match self.launcher.start(&self.config.command, &devices).await {
            Ok(handle) => {
                info!(
                    launch_id = %handle.launch_id,
                    pid = ?handle.pid,
                    devices = %display_devices(&handle.devices),
                    "Workload started"
                );
                self.set_state(state, ControllerState::Running(handle.clone()));
                Ok(handle)
            }
            Err(e) => {
                error!(
                    devices = %display_devices(&devices),
                    error = %e,
                    "Failed to start workload"
                );
                self.set_state(state, ControllerState::Idle);
                Err(match e {
                    GpuYieldError::Launch(msg) => GpuYieldError::Launch(msg),
                    other => GpuYieldError::Launch(other.to_string()),
                })
            }
        }
    }

    /// Kill the workload and wait for its devices to settle.
    ///
    /// Failures are logged; the caller goes on to relaunch either way.
    async fn terminate(&self, handle: &ProcessHandle) {
        match self.launcher.stop(handle).await {
            Ok(()) => {}
            Err(GpuYieldError::PreemptionTimeout(msg)) => {
                error!(
                    launch_id = %handle.launch_id,
                    pid = ?handle.pid,
                    error = %msg,
                    "Workload did not exit in time, continuing"
                );
            }
            Err(e) => {
                warn!(
                    launch_id = %handle.launch_id,
                    error = %e,
                    "Failed to stop workload"
                );
            }
        }

        if !self.config.settle_delay.is_zero() {
            debug!(
                delay_ms = self.config.settle_delay.as_millis() as u64,
                "Waiting for GPUs to settle"
            );
            tokio::time::sleep(self.config.settle_delay).await;
        }
    }

    fn set_state(&self, state: &mut ControllerState, next: ControllerState) {
        self.inventory.set_held(next.devices());
        self.phase.send_replace(next.phase());
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::InventorySource;
    use async_trait::async_trait;
    use gpuyield_core::device_set;
    use std::collections::HashSet;
    use std::time::Instant;
    use uuid::Uuid;

    /// Inventory whose answer the test controls
    struct FakeInventory {
        answer: std::sync::Mutex<Option<DeviceSet>>,
    }

    impl FakeInventory {
        fn new(devices: DeviceSet) -> Arc<Self> {
            Arc::new(Self {
                answer: std::sync::Mutex::new(Some(devices)),
            })
        }

        fn set(&self, devices: Option<DeviceSet>) {
            *self.answer.lock().unwrap() = devices;
        }
    }

    #[async_trait]
    impl InventorySource for FakeInventory {
        async fn free_devices(&self) -> GpuYieldResult<DeviceSet> {
            self.answer
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| GpuYieldError::InventoryUnavailable("offline".to_string()))
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    #[derive(Debug, Clone)]
    enum Event {
        Start(DeviceSet, Instant),
        Stop(Uuid, Instant),
    }

    /// Launcher that records calls and tracks live processes
    #[derive(Default)]
    struct FakeLauncher {
        live: std::sync::Mutex<HashSet<Uuid>>,
        max_live: std::sync::Mutex<usize>,
        events: std::sync::Mutex<Vec<Event>>,
        fail_start: std::sync::atomic::AtomicBool,
        stop_times_out: std::sync::atomic::AtomicBool,
        stop_delay: Duration,
    }

    impl FakeLauncher {
        fn starts(&self) -> Vec<DeviceSet> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    Event::Start(devices, _) => Some(devices.clone()),
                    _ => None,
                })
                .collect()
        }

        fn stops(&self) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| matches!(e, Event::Stop(..)))
                .count()
        }

        fn live(&self) -> usize {
            self.live.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Launcher for FakeLauncher {
        async fn start(
            &self,
            command: &str,
            devices: &DeviceSet,
        ) -> GpuYieldResult<ProcessHandle> {
            if self.fail_start.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(GpuYieldError::Launch("permission denied".to_string()));
            }
            let handle = ProcessHandle::new(command.to_string(), devices.clone());
            {
                let mut live = self.live.lock().unwrap();
                live.insert(handle.launch_id);
                let mut max_live = self.max_live.lock().unwrap();
                *max_live = (*max_live).max(live.len());
            }
            self.events
                .lock()
                .unwrap()
                .push(Event::Start(devices.clone(), Instant::now()));
            Ok(handle)
        }

        async fn stop(&self, handle: &ProcessHandle) -> GpuYieldResult<()> {
            if !self.stop_delay.is_zero() {
                tokio::time::sleep(self.stop_delay).await;
            }
            self.live.lock().unwrap().remove(&handle.launch_id);
            self.events
                .lock()
                .unwrap()
                .push(Event::Stop(handle.launch_id, Instant::now()));
            if self.stop_times_out.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(GpuYieldError::PreemptionTimeout("stuck".to_string()));
            }
            Ok(())
        }

        async fn is_running(&self, handle: &ProcessHandle) -> GpuYieldResult<bool> {
            Ok(self.live.lock().unwrap().contains(&handle.launch_id))
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn controller_with(
        inventory: Arc<FakeInventory>,
        launcher: Arc<FakeLauncher>,
        settle_delay: Duration,
    ) -> AllocationController {
        let config = ControllerConfig {
            command: "python train.py".to_string(),
            settle_delay,
        };
        AllocationController::new(config, Arc::new(InventoryCache::new(inventory)), launcher)
    }

    fn claim(ids: &[u32]) -> Claim {
        Claim::new(device_set(ids.iter().copied()))
    }

    #[tokio::test]
    async fn test_bootstrap_starts_on_all_free_devices() {
        let launcher = Arc::new(FakeLauncher::default());
        let controller = controller_with(
            FakeInventory::new(device_set([0, 1, 2, 3])),
            launcher.clone(),
            Duration::ZERO,
        );

        let handle = controller.bootstrap().await.unwrap().unwrap();
        assert_eq!(handle.devices, device_set([0, 1, 2, 3]));
        assert_eq!(controller.phase(), ControllerPhase::Running);
        assert_eq!(launcher.starts(), vec![device_set([0, 1, 2, 3])]);
    }

    #[tokio::test]
    async fn test_bootstrap_without_free_devices_stays_idle() {
        let launcher = Arc::new(FakeLauncher::default());
        let controller =
            controller_with(FakeInventory::new(DeviceSet::new()), launcher.clone(), Duration::ZERO);

        assert!(controller.bootstrap().await.unwrap().is_none());
        assert_eq!(controller.phase(), ControllerPhase::Idle);
        assert!(launcher.starts().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_claim_preempts_and_relaunches() {
        let launcher = Arc::new(FakeLauncher::default());
        let controller = controller_with(
            FakeInventory::new(device_set([0, 1, 2, 3])),
            launcher.clone(),
            Duration::ZERO,
        );
        controller.bootstrap().await.unwrap();

        let outcome = controller.claim(claim(&[1, 2])).await.unwrap();
        assert_eq!(
            outcome,
            ClaimOutcome::Launched {
                devices: device_set([0, 3]),
                preempted: true,
            }
        );
        assert_eq!(outcome.message(), "Use currently available GPUs: [0, 3]");
        assert_eq!(launcher.stops(), 1);
        assert_eq!(launcher.live(), 1);
        assert_eq!(controller.free_devices().await, device_set([0, 3]));
    }

    #[tokio::test]
    async fn test_disjoint_claim_does_not_preempt() {
        let inventory = FakeInventory::new(device_set([0, 1]));
        let launcher = Arc::new(FakeLauncher::default());
        let controller = controller_with(inventory.clone(), launcher.clone(), Duration::ZERO);
        controller.bootstrap().await.unwrap();

        // Our own workload keeps 0 and 1 busy; device 2 has since become free
        inventory.set(Some(device_set([2])));
        let outcome = controller.claim(claim(&[5])).await.unwrap();

        assert_eq!(
            outcome,
            ClaimOutcome::Launched {
                devices: device_set([0, 1, 2]),
                preempted: false,
            }
        );
        assert_eq!(launcher.starts().last(), Some(&device_set([0, 1, 2])));
        assert_eq!(launcher.live(), 1);
    }

    #[tokio::test]
    async fn test_disjoint_claim_keeps_workload_when_nothing_changed() {
        let inventory = FakeInventory::new(device_set([0, 1]));
        let launcher = Arc::new(FakeLauncher::default());
        let controller = controller_with(inventory.clone(), launcher.clone(), Duration::ZERO);
        controller.bootstrap().await.unwrap();

        inventory.set(Some(DeviceSet::new()));
        let outcome = controller.claim(claim(&[5])).await.unwrap();

        assert_eq!(
            outcome,
            ClaimOutcome::Launched {
                devices: device_set([0, 1]),
                preempted: false,
            }
        );
        assert_eq!(launcher.starts().len(), 1);
        assert_eq!(launcher.stops(), 0);
    }

    #[tokio::test]
    async fn test_exhausting_claim_goes_idle() {
        let launcher = Arc::new(FakeLauncher::default());
        let controller = controller_with(
            FakeInventory::new(device_set([0, 1])),
            launcher.clone(),
            Duration::ZERO,
        );
        controller.bootstrap().await.unwrap();

        let outcome = controller.claim(claim(&[0, 1])).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::NoDevicesAvailable { preempted: true });
        assert_eq!(outcome.message(), "No available GPUs - process will not be started");
        assert_eq!(controller.phase(), ControllerPhase::Idle);
        assert!(controller.free_devices().await.is_empty());
        assert_eq!(launcher.live(), 0);

        let status = controller.status().await;
        assert!(status.process.is_none());
        assert!(!status.alive);
    }

    #[tokio::test]
    async fn test_empty_claim_changes_nothing() {
        let inventory = FakeInventory::new(device_set([0, 1]));
        let launcher = Arc::new(FakeLauncher::default());
        let controller = controller_with(inventory.clone(), launcher.clone(), Duration::ZERO);
        let before = controller.bootstrap().await.unwrap().unwrap();

        inventory.set(Some(device_set([2, 3])));
        let outcome = controller.claim(Claim::default()).await.unwrap();

        assert_eq!(
            outcome,
            ClaimOutcome::Unchanged {
                devices: Some(device_set([0, 1])),
            }
        );
        assert_eq!(launcher.starts().len(), 1);
        assert_eq!(launcher.stops(), 0);
        let after = controller.status().await.process.unwrap();
        assert_eq!(after.launch_id, before.launch_id);
    }

    #[tokio::test]
    async fn test_claim_while_idle_launches_on_remaining_devices() {
        let inventory = FakeInventory::new(DeviceSet::new());
        let launcher = Arc::new(FakeLauncher::default());
        let controller = controller_with(inventory.clone(), launcher.clone(), Duration::ZERO);
        controller.bootstrap().await.unwrap();

        inventory.set(Some(device_set([0, 1, 2])));
        let outcome = controller.claim(claim(&[1])).await.unwrap();
        assert_eq!(
            outcome,
            ClaimOutcome::Launched {
                devices: device_set([0, 2]),
                preempted: false,
            }
        );
        assert_eq!(launcher.stops(), 0);
    }

    #[tokio::test]
    async fn test_start_failure_leaves_controller_idle() {
        let launcher = Arc::new(FakeLauncher::default());
        let controller = controller_with(
            FakeInventory::new(device_set([0, 1, 2])),
            launcher.clone(),
            Duration::ZERO,
        );
        controller.bootstrap().await.unwrap();

        launcher
            .fail_start
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let result = controller.claim(claim(&[0])).await;

        assert!(matches!(result, Err(GpuYieldError::Launch(_))));
        assert_eq!(controller.phase(), ControllerPhase::Idle);
        assert_eq!(launcher.live(), 0);
        assert!(controller.status().await.process.is_none());
    }

    #[tokio::test]
    async fn test_preemption_timeout_still_relaunches() {
        let launcher = Arc::new(FakeLauncher::default());
        let controller = controller_with(
            FakeInventory::new(device_set([0, 1])),
            launcher.clone(),
            Duration::ZERO,
        );
        controller.bootstrap().await.unwrap();

        launcher
            .stop_times_out
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let outcome = controller.claim(claim(&[0])).await.unwrap();

        assert_eq!(
            outcome,
            ClaimOutcome::Launched {
                devices: device_set([1]),
                preempted: true,
            }
        );
        assert_eq!(controller.phase(), ControllerPhase::Running);
    }

    #[tokio::test]
    async fn test_inventory_failure_uses_last_known_devices() {
        let inventory = FakeInventory::new(device_set([0, 1, 2]));
        let launcher = Arc::new(FakeLauncher::default());
        let controller = controller_with(inventory.clone(), launcher.clone(), Duration::ZERO);
        controller.bootstrap().await.unwrap();

        inventory.set(None);
        let outcome = controller.claim(claim(&[2])).await.unwrap();
        assert_eq!(
            outcome,
            ClaimOutcome::Launched {
                devices: device_set([0, 1]),
                preempted: true,
            }
        );
    }

    #[tokio::test]
    async fn test_settle_delay_separates_stop_and_start() {
        let settle = Duration::from_millis(50);
        let launcher = Arc::new(FakeLauncher::default());
        let controller = controller_with(
            FakeInventory::new(device_set([0, 1])),
            launcher.clone(),
            settle,
        );
        controller.bootstrap().await.unwrap();
        controller.claim(claim(&[1])).await.unwrap();

        let events = launcher.events.lock().unwrap().clone();
        let stopped_at = events
            .iter()
            .find_map(|e| match e {
                Event::Stop(_, at) => Some(*at),
                _ => None,
            })
            .unwrap();
        let restarted_at = match events.last() {
            Some(Event::Start(_, at)) => *at,
            other => panic!("expected a restart, got {:?}", other),
        };
        assert!(restarted_at.duration_since(stopped_at) >= settle);
    }

    #[tokio::test]
    async fn test_phase_reports_preempting() {
        let launcher = Arc::new(FakeLauncher {
            stop_delay: Duration::from_millis(100),
            ..FakeLauncher::default()
        });
        let controller = Arc::new(controller_with(
            FakeInventory::new(device_set([0, 1])),
            launcher.clone(),
            Duration::ZERO,
        ));
        controller.bootstrap().await.unwrap();

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.claim(claim(&[0])).await })
        };

        // The phase is readable while the claim holds the state lock
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(controller.phase(), ControllerPhase::Preempting);
        task.await.unwrap().unwrap();
        assert_eq!(controller.phase(), ControllerPhase::Running);
    }

    #[tokio::test]
    async fn test_relaunch_on_recomputed_devices_reports_preempting() {
        let inventory = FakeInventory::new(device_set([0, 1]));
        let launcher = Arc::new(FakeLauncher {
            stop_delay: Duration::from_millis(100),
            ..FakeLauncher::default()
        });
        let controller = Arc::new(controller_with(
            inventory.clone(),
            launcher.clone(),
            Duration::ZERO,
        ));
        controller.bootstrap().await.unwrap();

        inventory.set(Some(device_set([2])));
        let task = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.claim(claim(&[5])).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(controller.phase(), ControllerPhase::Preempting);
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            ClaimOutcome::Launched {
                devices: device_set([0, 1, 2]),
                preempted: false,
            }
        );
        assert_eq!(controller.phase(), ControllerPhase::Running);
    }

    #[tokio::test]
    async fn test_periodic_refresh_keeps_workload_devices_free() {
        let inventory = FakeInventory::new(device_set([0, 1]));
        let launcher = Arc::new(FakeLauncher::default());
        let cache = Arc::new(InventoryCache::new(inventory.clone()));
        let controller = AllocationController::new(
            ControllerConfig {
                command: "python train.py".to_string(),
                settle_delay: Duration::ZERO,
            },
            cache.clone(),
            launcher.clone(),
        );
        controller.bootstrap().await.unwrap();

        // Busy with our own workload, the source reports nothing free
        inventory.set(Some(DeviceSet::new()));
        controller.claim(Claim::default()).await.unwrap();
        assert_eq!(controller.free_devices().await, device_set([0, 1]));

        assert_eq!(cache.refresh().await, device_set([0, 1]));
        assert_eq!(controller.free_devices().await, device_set([0, 1]));

        controller.claim(Claim::default()).await.unwrap();
        assert_eq!(controller.free_devices().await, device_set([0, 1]));

        // Once the workload is gone its devices are no longer added back
        controller.shutdown().await.unwrap();
        assert!(cache.refresh().await.is_empty());
        assert_eq!(launcher.starts().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_claims_leave_one_process() {
        let launcher = Arc::new(FakeLauncher {
            stop_delay: Duration::from_millis(20),
            ..FakeLauncher::default()
        });
        let controller = Arc::new(controller_with(
            FakeInventory::new(device_set([0, 1])),
            launcher.clone(),
            Duration::from_millis(5),
        ));
        controller.bootstrap().await.unwrap();

        let a = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.claim(claim(&[0])).await })
        };
        let b = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.claim(claim(&[1])).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(launcher.live(), 1);
        assert_eq!(*launcher.max_live.lock().unwrap(), 1);
        let running = controller.status().await.process.unwrap();
        assert!(running.devices == device_set([0]) || running.devices == device_set([1]));
    }

    #[tokio::test]
    async fn test_many_concurrent_claims_never_overlap() {
        let launcher = Arc::new(FakeLauncher::default());
        let controller = Arc::new(controller_with(
            FakeInventory::new(device_set([0, 1, 2, 3])),
            launcher.clone(),
            Duration::ZERO,
        ));
        controller.bootstrap().await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..20u32 {
            let controller = controller.clone();
            tasks.push(tokio::spawn(async move {
                let claimed = claim(&[i % 4]);
                let outcome = controller.claim(claimed.clone()).await.unwrap();
                if let ClaimOutcome::Launched { devices, .. } = outcome {
                    assert!(!claimed.overlaps(&devices));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*launcher.max_live.lock().unwrap(), 1);
        assert!(launcher.live() <= 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_workload() {
        let launcher = Arc::new(FakeLauncher::default());
        let controller = controller_with(
            FakeInventory::new(device_set([0])),
            launcher.clone(),
            Duration::ZERO,
        );
        controller.bootstrap().await.unwrap();

        controller.shutdown().await.unwrap();
        assert_eq!(launcher.live(), 0);
        assert_eq!(controller.phase(), ControllerPhase::Idle);

        // Nothing left to stop
        controller.shutdown().await.unwrap();
        assert_eq!(launcher.stops(), 1);
    }
}

//! End-to-end scenarios for the backup orchestrator.
//!
//! The volume manager, `df`, the copy pipeline and the hypervisor are
//! replaced by scripted in-memory doubles; the backup directory is a real
//! temporary directory so output files can be checked on disk.
//!
//! Tested in this file:
//! - snapshot → copy → verify → cleanup for healthy and overflowing snapshots
//! - the free-space skip policy
//! - fatal volume-group / snapshot failures and the error policies
//! - snapshot removal and partial-output deletion on every failure path

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;

use kvm_disk_backup::backup::{DirLock, DiskOutcome, DiskStage, Orchestrator};
use kvm_disk_backup::{
    BackupConfig, BackupError, CommandRunner, ErrorPolicy, Hypervisor, Result, ShellCommand,
};

const GIB_IN_KIB: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// Scripted command runner
// ---------------------------------------------------------------------------

struct ScriptedRunner {
    state: Mutex<RunnerState>,
}

struct RunnerState {
    issued: Vec<ShellCommand>,
    free_gb: u64,
    /// `lvs` output per snapshot name; `default_fullness` otherwise.
    fullness: HashMap<String, String>,
    default_fullness: String,
    /// Programs that exit non-zero.
    failing: HashSet<&'static str>,
    /// Volumes whose copy pipeline fails after writing a partial file.
    failing_copies: HashSet<String>,
}

impl ScriptedRunner {
    fn new(free_gb: u64, fullness: &str) -> Self {
        Self {
            state: Mutex::new(RunnerState {
                issued: Vec::new(),
                free_gb,
                fullness: HashMap::new(),
                default_fullness: format!("  {fullness}\n"),
                failing: HashSet::new(),
                failing_copies: HashSet::new(),
            }),
        }
    }

    fn failing(self, program: &'static str) -> Self {
        self.state.lock().unwrap().failing.insert(program);
        self
    }

    fn failing_copy(self, volume_name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_copies
            .insert(volume_name.to_string());
        self
    }

    fn fullness_for(self, snapshot_spec: &str, output: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .fullness
            .insert(snapshot_spec.to_string(), output.to_string());
        self
    }

    fn issued(&self) -> Vec<ShellCommand> {
        self.state.lock().unwrap().issued.clone()
    }

    fn programs(&self) -> Vec<String> {
        self.issued().into_iter().map(|c| c.program).collect()
    }

    fn count(&self, program: &str) -> usize {
        self.programs().iter().filter(|p| *p == program).count()
    }

    fn respond(&self, command: &ShellCommand) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.issued.push(command.clone());

        let failed = || BackupError::CommandFailed {
            command: command.to_string(),
            status: Some(5),
            output: "Insufficient privileges".to_string(),
        };

        if state.failing.contains(command.program.as_str()) {
            return Err(failed());
        }

        let out = match command.program.as_str() {
            "lvdisplay" => {
                let path = command.args.first().cloned().unwrap_or_default();
                format!(
                    "  --- Logical volume ---\n  LV Path                {path}\n  VG Name                vg0\n"
                )
            }
            "df" => format!("Avail\n{}\n", state.free_gb * GIB_IN_KIB),
            "lvcreate" | "lvremove" => String::new(),
            "lvs" => {
                let lv = command.args.last().cloned().unwrap_or_default();
                state
                    .fullness
                    .get(&lv)
                    .cloned()
                    .unwrap_or_else(|| state.default_fullness.clone())
            }
            "bash" => {
                let script = command.args.last().cloned().unwrap_or_default();
                let output = copy_destination(&script);
                std::fs::write(&output, b"compressed snapshot").expect("write fake output");
                let fails = state
                    .failing_copies
                    .iter()
                    .any(|name| script.contains(&format!("/{name}_backup ")));
                if fails {
                    return Err(failed());
                }
                String::new()
            }
            other => panic!("unexpected command {other}"),
        };
        Ok(out.into_bytes())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &ShellCommand) -> Result<Vec<u8>> {
        self.respond(command)
    }
}

/// The `of=` path of a `dd if=… | gzip -c | dd of=… bs=…` script.
fn copy_destination(script: &str) -> PathBuf {
    let rest = &script[script.find("of=").expect("of= in copy script") + 3..];
    let path = rest.split_whitespace().next().unwrap_or_default();
    PathBuf::from(path.trim_matches('\''))
}

// ---------------------------------------------------------------------------
// Scripted hypervisor
// ---------------------------------------------------------------------------

struct FakeHypervisor {
    vms: HashMap<String, Vec<String>>,
}

impl FakeHypervisor {
    fn with_vm(name: &str, disks: &[&str]) -> Self {
        let mut vms = HashMap::new();
        vms.insert(name.to_string(), disks.iter().map(|d| d.to_string()).collect());
        Self { vms }
    }

    fn and_vm(mut self, name: &str, disks: &[&str]) -> Self {
        self.vms
            .insert(name.to_string(), disks.iter().map(|d| d.to_string()).collect());
        self
    }
}

#[async_trait]
impl Hypervisor for FakeHypervisor {
    type Domain = String;

    async fn lookup(&self, name: &str) -> Result<String> {
        if self.vms.contains_key(name) {
            Ok(name.to_string())
        } else {
            Err(BackupError::VmNotFound {
                name: name.to_string(),
                reason: "Domain not found".to_string(),
            })
        }
    }

    async fn descriptor(&self, domain: &String) -> Result<String> {
        let disks: String = self.vms[domain]
            .iter()
            .map(|src| {
                format!(
                    "<disk type='block' device='disk'><source dev='{src}'/><target dev='vda'/></disk>"
                )
            })
            .collect();
        Ok(format!(
            "<domain type='kvm'><name>{domain}</name><devices>{disks}</devices></domain>"
        ))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(dir: &Path, vms: &[&str]) -> BackupConfig {
    BackupConfig {
        vms: vms.iter().map(|v| v.to_string()).collect(),
        backup_dir: dir.to_path_buf(),
        ..BackupConfig::default()
    }
}

fn scenario(
    runner: ScriptedRunner,
    disks: &[&str],
    policy: ErrorPolicy,
) -> (TempDir, Orchestrator<ScriptedRunner, FakeHypervisor>) {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), &["vm-1.example.com"]);
    cfg.on_error = policy;
    let orchestrator = Orchestrator::new(
        cfg,
        runner,
        FakeHypervisor::with_vm("vm-1.example.com", disks),
    );
    (dir, orchestrator)
}

// ---------------------------------------------------------------------------
// Scenario A: healthy snapshot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn healthy_snapshot_is_backed_up_and_removed() {
    let (dir, orch) = scenario(
        ScriptedRunner::new(10, "42.00"),
        &["/dev/vg0/lv-vm1"],
        ErrorPolicy::Abort,
    );

    let report = orch.run().await.expect("run should succeed");

    let output = dir.path().join("lv-vm1.gz");
    assert!(output.exists(), "compressed backup should exist");
    assert_eq!(
        report.vms[0].disks[0].outcome,
        DiskOutcome::BackedUp {
            output: output.clone(),
            fullness: 42.0
        }
    );

    let issued = orch.runner().issued();
    let create = issued.iter().find(|c| c.program == "lvcreate").expect("lvcreate");
    assert_eq!(
        create.args,
        vec!["--snapshot", "--size", "1G", "--name", "lv-vm1_backup", "/dev/vg0/lv-vm1"]
    );
    let remove = issued.iter().find(|c| c.program == "lvremove").expect("lvremove");
    assert_eq!(remove.args, vec!["-f", "/dev/vg0/lv-vm1_backup"]);
    let lvs = issued.iter().find(|c| c.program == "lvs").expect("lvs");
    assert_eq!(lvs.args.last().map(String::as_str), Some("vg0/lv-vm1_backup"));

    assert_eq!(
        orch.runner().programs(),
        vec!["lvdisplay", "df", "lvcreate", "bash", "lvs", "lvremove"]
    );
}

#[tokio::test]
async fn copy_uses_configured_block_size() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), &["vm-1.example.com"]);
    cfg.block_size = 65536;
    cfg.snapshot_size_gb = 2;
    let orch = Orchestrator::new(
        cfg,
        ScriptedRunner::new(10, "3.10"),
        FakeHypervisor::with_vm("vm-1.example.com", &["/dev/vg0/lv-vm1"]),
    );

    orch.run().await.unwrap();

    let issued = orch.runner().issued();
    let copy = issued.iter().find(|c| c.program == "bash").unwrap();
    let script = copy.args.last().unwrap();
    assert!(script.starts_with("dd if=/dev/vg0/lv-vm1_backup bs=65536 | gzip -c | dd of="));
    assert!(script.ends_with("lv-vm1.gz bs=65536"));
    let create = issued.iter().find(|c| c.program == "lvcreate").unwrap();
    assert!(create.args.contains(&"2G".to_string()));
}

// ---------------------------------------------------------------------------
// Scenario B: overflowing snapshot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_snapshot_rolls_back_output() {
    let (dir, orch) = scenario(
        ScriptedRunner::new(10, "100.00"),
        &["/dev/vg0/lv-vm1"],
        ErrorPolicy::Abort,
    );

    let report = orch.run().await.expect("rollback is not an error");

    assert!(!dir.path().join("lv-vm1.gz").exists());
    assert_eq!(
        report.vms[0].disks[0].outcome,
        DiskOutcome::RolledBack { fullness: 100.0 }
    );
    assert_eq!(orch.runner().count("lvremove"), 1);
    assert_eq!(report.rolled_back(), 1);
    assert!(!report.has_failures());
}

// ---------------------------------------------------------------------------
// Scenario C: not enough free space
// ---------------------------------------------------------------------------

#[tokio::test]
async fn low_free_space_skips_without_snapshot() {
    let (dir, orch) = scenario(
        ScriptedRunner::new(0, "42.00"),
        &["/dev/vg0/lv-vm1"],
        ErrorPolicy::Abort,
    );

    let report = orch.run().await.unwrap();

    assert_eq!(
        report.vms[0].disks[0].outcome,
        DiskOutcome::Skipped {
            free_gb: 0,
            required_gb: 1
        }
    );
    assert_eq!(orch.runner().count("lvcreate"), 0);
    assert_eq!(orch.runner().count("bash"), 0);
    assert_eq!(orch.runner().count("lvremove"), 0);
    assert!(!dir.path().join("lv-vm1.gz").exists());
}

#[tokio::test]
async fn min_free_threshold_overrides_snapshot_size() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), &["vm-1.example.com"]);
    cfg.min_free_gb = Some(20);
    let orch = Orchestrator::new(
        cfg,
        ScriptedRunner::new(10, "42.00"),
        FakeHypervisor::with_vm("vm-1.example.com", &["/dev/vg0/lv-vm1"]),
    );

    let report = orch.run().await.unwrap();

    assert_eq!(report.skipped(), 1);
    assert_eq!(orch.runner().count("lvcreate"), 0);
}

// ---------------------------------------------------------------------------
// Command failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn volume_group_failure_surfaces_before_snapshot() {
    let (_dir, orch) = scenario(
        ScriptedRunner::new(10, "42.00").failing("lvdisplay"),
        &["/dev/vg0/lv-vm1"],
        ErrorPolicy::Continue,
    );

    let err = orch.run().await.expect_err("privilege failure is fatal");

    match &err {
        BackupError::Privilege { source, hint, .. } => {
            assert!(matches!(**source, BackupError::CommandFailed { .. }));
            assert!(hint.contains("root"));
        }
        other => panic!("expected Privilege, got {other:?}"),
    }
    assert_eq!(orch.runner().count("lvcreate"), 0);
}

#[tokio::test]
async fn snapshot_creation_failure_is_fatal() {
    let (dir, orch) = scenario(
        ScriptedRunner::new(10, "42.00").failing("lvcreate"),
        &["/dev/vg0/lv-vm1", "/dev/vg0/lv-vm1-data"],
        ErrorPolicy::Continue,
    );

    let err = orch.run().await.expect_err("snapshot failure is fatal");

    assert!(err.is_fatal());
    assert!(err.to_string().contains("lv-vm1_backup"));
    assert_eq!(orch.runner().count("lvcreate"), 1);
    assert_eq!(orch.runner().count("bash"), 0);
    assert!(!dir.path().join("lv-vm1.gz").exists());
}

#[tokio::test]
async fn copy_failure_under_continue_cleans_up_and_moves_on() {
    let (dir, orch) = scenario(
        ScriptedRunner::new(10, "42.00").failing_copy("lv-vm1"),
        &["/dev/vg0/lv-vm1", "/dev/vg0/lv-vm1-data"],
        ErrorPolicy::Continue,
    );

    let report = orch.run().await.unwrap();
    let disks = &report.vms[0].disks;

    assert_eq!(disks.len(), 2);
    assert!(matches!(
        disks[0].outcome,
        DiskOutcome::Failed {
            stage: DiskStage::Copy,
            ..
        }
    ));
    assert!(!dir.path().join("lv-vm1.gz").exists(), "partial output deleted");
    assert!(matches!(disks[1].outcome, DiskOutcome::BackedUp { .. }));
    assert!(dir.path().join("lv-vm1-data.gz").exists());

    // Both snapshots were removed.
    assert_eq!(orch.runner().count("lvremove"), 2);
    assert!(report.has_failures());
}

#[tokio::test]
async fn copy_failure_under_abort_still_removes_snapshot() {
    let (dir, orch) = scenario(
        ScriptedRunner::new(10, "42.00").failing_copy("lv-vm1"),
        &["/dev/vg0/lv-vm1", "/dev/vg0/lv-vm1-data"],
        ErrorPolicy::Abort,
    );

    let err = orch.run().await.expect_err("abort on first failure");

    assert!(matches!(err, BackupError::CommandFailed { .. }));
    assert_eq!(orch.runner().count("lvremove"), 1);
    assert_eq!(orch.runner().count("lvcreate"), 1, "second disk never started");
    assert!(!dir.path().join("lv-vm1.gz").exists());
}

#[tokio::test]
async fn snapshot_overflow_during_copy_rolls_back_and_moves_on() {
    let (dir, orch) = scenario(
        ScriptedRunner::new(10, "42.00")
            .failing_copy("lv-vm1")
            .fullness_for("vg0/lv-vm1_backup", "  100.00\n"),
        &["/dev/vg0/lv-vm1", "/dev/vg0/lv-vm1-data"],
        ErrorPolicy::Abort,
    );

    let report = orch.run().await.expect("overflow is a rollback, not an aborted run");
    let disks = &report.vms[0].disks;

    assert_eq!(disks[0].outcome, DiskOutcome::RolledBack { fullness: 100.0 });
    assert!(!dir.path().join("lv-vm1.gz").exists());
    assert!(matches!(disks[1].outcome, DiskOutcome::BackedUp { .. }));
    assert!(dir.path().join("lv-vm1-data.gz").exists());
    assert_eq!(orch.runner().count("lvs"), 2);
    assert_eq!(orch.runner().count("lvcreate"), 2);
    assert_eq!(orch.runner().count("lvremove"), 2);
    assert!(!report.has_failures());
}

#[tokio::test]
async fn unreadable_fullness_discards_output() {
    let (dir, orch) = scenario(
        ScriptedRunner::new(10, "42.00")
            .fullness_for("vg0/lv-vm1_backup", "  Failed to find logical volume\n"),
        &["/dev/vg0/lv-vm1"],
        ErrorPolicy::Continue,
    );

    let report = orch.run().await.unwrap();

    assert!(matches!(
        report.vms[0].disks[0].outcome,
        DiskOutcome::Failed {
            stage: DiskStage::Verify,
            ..
        }
    ));
    assert!(!dir.path().join("lv-vm1.gz").exists());
    assert_eq!(orch.runner().count("lvremove"), 1);
}

#[tokio::test]
async fn snapshot_removal_failure_is_reported_as_cleanup() {
    let (dir, orch) = scenario(
        ScriptedRunner::new(10, "42.00").failing("lvremove"),
        &["/dev/vg0/lv-vm1"],
        ErrorPolicy::Continue,
    );

    let report = orch.run().await.unwrap();

    assert!(matches!(
        report.vms[0].disks[0].outcome,
        DiskOutcome::Failed {
            stage: DiskStage::Cleanup,
            ..
        }
    ));
    // The copy itself was good.
    assert!(dir.path().join("lv-vm1.gz").exists());
}

// ---------------------------------------------------------------------------
// VMs and disks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_disk_of_every_vm_gets_one_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let orch = Orchestrator::new(
        config(dir.path(), &["vm-1.example.com", "vm-2.example.com"]),
        ScriptedRunner::new(10, "42.00").fullness_for("vg0/lv-vm2_backup", "  100.00\n"),
        FakeHypervisor::with_vm("vm-1.example.com", &["/dev/vg0/lv-vm1", "/dev/vg0/lv-vm1-data"])
            .and_vm("vm-2.example.com", &["/dev/vg0/lv-vm2"]),
    );

    let report = orch.run().await.unwrap();

    let sources: Vec<_> = report.disks().map(|d| d.source.as_str()).collect();
    assert_eq!(
        sources,
        vec!["/dev/vg0/lv-vm1", "/dev/vg0/lv-vm1-data", "/dev/vg0/lv-vm2"]
    );
    assert_eq!(report.backed_up(), 2);
    assert_eq!(report.rolled_back(), 1);
    assert_eq!(orch.runner().count("lvcreate"), 3);
    assert_eq!(orch.runner().count("lvremove"), 3);
    assert!(report.finished_at.is_some());
}

#[tokio::test]
async fn missing_vm_under_continue_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), &["ghost.example.com", "vm-1.example.com"]);
    cfg.on_error = ErrorPolicy::Continue;
    let orch = Orchestrator::new(
        cfg,
        ScriptedRunner::new(10, "42.00"),
        FakeHypervisor::with_vm("vm-1.example.com", &["/dev/vg0/lv-vm1"]),
    );

    let report = orch.run().await.unwrap();

    assert!(report.vms[0].error.is_some());
    assert_eq!(report.backed_up(), 1);
    assert!(report.has_failures());
}

#[tokio::test]
async fn missing_vm_under_abort_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let orch = Orchestrator::new(
        config(dir.path(), &["ghost.example.com", "vm-1.example.com"]),
        ScriptedRunner::new(10, "42.00"),
        FakeHypervisor::with_vm("vm-1.example.com", &["/dev/vg0/lv-vm1"]),
    );

    let err = orch.run().await.expect_err("unknown VM aborts");

    assert!(matches!(err, BackupError::VmNotFound { .. }));
    assert!(orch.runner().issued().is_empty());
}

// ---------------------------------------------------------------------------
// Backup directory lock
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_run_on_same_directory_is_refused() {
    let (dir, orch) = scenario(
        ScriptedRunner::new(10, "42.00"),
        &["/dev/vg0/lv-vm1"],
        ErrorPolicy::Continue,
    );
    let _held = DirLock::acquire(dir.path()).unwrap();

    let err = orch.run().await.expect_err("directory is locked");

    assert!(matches!(err, BackupError::Lock { .. }));
    assert!(orch.runner().issued().is_empty());
}

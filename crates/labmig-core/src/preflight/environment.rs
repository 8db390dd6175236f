//! Host inspection and configuration-vs-host compatibility.

use super::{CompatibilityCheck, CompatibilityIssue, EnvironmentCompatibilityResult, EnvironmentInfo};
use crate::config::{IssueSeverity, MigrationOptions, ResourceThresholds};
use chrono::Utc;
use std::path::{Path, PathBuf};
use sysinfo::{Disks, System};
use tracing::{info, warn};

const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Gather OS, CPU, memory and free disk space for the disk holding `path`.
///
/// Blocking; call from `spawn_blocking` in async contexts.
pub fn collect_environment(path: &Path) -> EnvironmentInfo {
    let mut sys = System::new();
    sys.refresh_memory();

    let processor_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    EnvironmentInfo {
        operating_system: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
        os_version: System::os_version().unwrap_or_default(),
        processor_count,
        total_memory_mb: sys.total_memory() / BYTES_PER_MB,
        available_memory_mb: sys.available_memory() / BYTES_PER_MB,
        available_disk_space_gb: available_disk_space_gb(path).unwrap_or(0.0),
    }
}

/// Free space in GB on the disk whose mount point is the longest prefix of `path`.
pub(crate) fn available_disk_space_gb(path: &Path) -> Option<f64> {
    let resolved = resolve_existing(path);
    let disks = Disks::new_with_refreshed_list();

    let mut best_match: Option<(&sysinfo::Disk, usize)> = None;
    for disk in disks.list() {
        let mount_point = disk.mount_point();
        if resolved.starts_with(mount_point) {
            let depth = mount_point.components().count();
            if best_match.map_or(true, |(_, d)| depth > d) {
                best_match = Some((disk, depth));
            }
        }
    }

    best_match
        .map(|(disk, _)| disk)
        .or_else(|| disks.list().first())
        .map(|disk| disk.available_space() as f64 / BYTES_PER_GB)
}

/// `path` made absolute, walked up to the nearest directory that exists.
fn resolve_existing(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute
        .ancestors()
        .find(|p| p.exists())
        .and_then(|p| p.canonicalize().ok())
        .unwrap_or(absolute)
}

/// Compare the configuration's resource demands with the host.
///
/// Every check is reported; checks that fail also produce an issue.
pub fn assess_compatibility(
    options: &MigrationOptions,
    env: &EnvironmentInfo,
) -> (Vec<CompatibilityCheck>, Vec<CompatibilityIssue>) {
    let mut checks = Vec::new();
    let mut issues = Vec::new();

    checks.push(CompatibilityCheck {
        check_name: "Operating System".into(),
        description: format!("Running on {} {}", env.operating_system, env.os_version)
            .trim()
            .to_string(),
        is_compatible: true,
        recommendation: "No issues detected".into(),
    });

    let cpu_ok = env.processor_count >= ResourceThresholds::MIN_PROCESSOR_COUNT;
    checks.push(CompatibilityCheck {
        check_name: "CPU Cores".into(),
        description: format!("Processor count: {}", env.processor_count),
        is_compatible: cpu_ok,
        recommendation: if cpu_ok {
            "CPU is sufficient".into()
        } else {
            "Consider running on a system with more CPU cores".into()
        },
    });
    if !cpu_ok {
        issues.push(CompatibilityIssue {
            component: "CPU".into(),
            issue: format!("Only {} processor(s) available", env.processor_count),
            impact: "Tables cannot be seeded in parallel".into(),
            resolution: format!(
                "Run on a host with at least {} CPU cores",
                ResourceThresholds::MIN_PROCESSOR_COUNT
            ),
            severity: IssueSeverity::Warning,
        });
    }

    let memory_ok = env.available_memory_mb > ResourceThresholds::MIN_AVAILABLE_MEMORY_MB;
    checks.push(CompatibilityCheck {
        check_name: "Available Memory".into(),
        description: format!(
            "Available memory: {}MB of {}MB",
            env.available_memory_mb, env.total_memory_mb
        ),
        is_compatible: memory_ok,
        recommendation: if memory_ok {
            "Memory is sufficient".into()
        } else {
            "Consider increasing available memory".into()
        },
    });
    if !memory_ok {
        issues.push(CompatibilityIssue {
            component: "Memory".into(),
            issue: format!("{}MB of memory available", env.available_memory_mb),
            impact: "Large batches may exhaust memory".into(),
            resolution: "Free memory or reduce SeedingOptions.BatchSize".into(),
            severity: IssueSeverity::Warning,
        });
    }

    let cpu_limit = env.processor_count as i64 * ResourceThresholds::CONCURRENCY_PER_CPU;
    let concurrency = i64::from(options.max_concurrent_operations);
    let concurrency_ok = concurrency <= cpu_limit;
    checks.push(CompatibilityCheck {
        check_name: "Concurrency vs CPU".into(),
        description: format!(
            "MaxConcurrentOperations {} against {} CPU cores",
            concurrency, env.processor_count
        ),
        is_compatible: concurrency_ok,
        recommendation: if concurrency_ok {
            "Concurrency fits the available CPU".into()
        } else {
            format!("Reduce MaxConcurrentOperations to {} or fewer for this CPU", cpu_limit)
        },
    });
    if !concurrency_ok {
        issues.push(CompatibilityIssue {
            component: "CPU".into(),
            issue: format!(
                "MaxConcurrentOperations ({}) exceeds {} per CPU core",
                concurrency,
                ResourceThresholds::CONCURRENCY_PER_CPU
            ),
            impact: "Seeding tasks will contend for CPU".into(),
            resolution: format!("Set MaxConcurrentOperations to at most {}", cpu_limit),
            severity: IssueSeverity::Warning,
        });
    }

    let planned_rows = i64::from(options.seeding_options.batch_size.max(0)) * concurrency.max(1);
    let planned_mb = planned_rows as u64 * ResourceThresholds::ESTIMATED_ROW_BYTES / BYTES_PER_MB;
    let budget_mb = (env.available_memory_mb as f64 * ResourceThresholds::BATCH_MEMORY_SHARE) as u64;
    let footprint_ok = planned_mb <= budget_mb;
    checks.push(CompatibilityCheck {
        check_name: "Batch Memory Footprint".into(),
        description: format!(
            "About {}MB held in flight ({} rows across {} workers)",
            planned_mb, planned_rows, concurrency
        ),
        is_compatible: footprint_ok,
        recommendation: if footprint_ok {
            "Batch size fits available memory".into()
        } else {
            format!("Reduce BatchSize so batches stay under {}MB of memory", budget_mb)
        },
    });
    if !footprint_ok {
        issues.push(CompatibilityIssue {
            component: "Memory".into(),
            issue: format!(
                "Batches need about {}MB but only {}MB of memory is budgeted",
                planned_mb, budget_mb
            ),
            impact: "Seeding may swap or run out of memory".into(),
            resolution: "Lower SeedingOptions.BatchSize or MaxConcurrentOperations".into(),
            severity: IssueSeverity::Warning,
        });
    }

    let budget_ok = options.seeding_options.command_timeout <= options.operation_timeout;
    checks.push(CompatibilityCheck {
        check_name: "Command Timeout Budget".into(),
        description: format!(
            "CommandTimeout {}s within OperationTimeout {}s",
            options.seeding_options.command_timeout.num_seconds(),
            options.operation_timeout.num_seconds()
        ),
        is_compatible: budget_ok,
        recommendation: if budget_ok {
            "Timeouts are consistent".into()
        } else {
            "Raise OperationTimeout above CommandTimeout".into()
        },
    });
    if !budget_ok {
        issues.push(CompatibilityIssue {
            component: "Timeouts".into(),
            issue: "A single batch may outlive the whole migration".into(),
            impact: "The migration can time out inside its first batch".into(),
            resolution: "Set OperationTimeout greater than SeedingOptions.CommandTimeout".into(),
            severity: IssueSeverity::Information,
        });
    }

    (checks, issues)
}

/// Inspect the host and assess `options` against it.
pub async fn check_environment_compatibility(options: &MigrationOptions) -> EnvironmentCompatibilityResult {
    let check_start_time = Utc::now();
    let disk_path = PathBuf::from(&options.seeding_options.csv_directory);
    let environment_info = match tokio::task::spawn_blocking(move || collect_environment(&disk_path)).await {
        Ok(info) => info,
        Err(e) => {
            warn!(error = %e, "Environment inspection failed");
            EnvironmentInfo::default()
        }
    };

    let (compatibility_checks, compatibility_issues) = assess_compatibility(options, &environment_info);
    let result = EnvironmentCompatibilityResult {
        is_compatible: compatibility_issues.is_empty(),
        check_start_time,
        check_end_time: Utc::now(),
        environment_info,
        compatibility_checks,
        compatibility_issues,
    };

    info!(
        compatible = result.is_compatible,
        issues = result.compatibility_issues.len(),
        cpus = result.environment_info.processor_count,
        memory_mb = result.environment_info.available_memory_mb,
        "Environment compatibility checked"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(cpus: usize, memory_mb: u64) -> EnvironmentInfo {
        EnvironmentInfo {
            operating_system: "Linux".into(),
            os_version: "6.1".into(),
            processor_count: cpus,
            total_memory_mb: memory_mb * 2,
            available_memory_mb: memory_mb,
            available_disk_space_gb: 50.0,
        }
    }

    #[test]
    fn test_default_options_fit_reasonable_host() {
        let (checks, issues) = assess_compatibility(&MigrationOptions::default(), &host(8, 16_384));
        assert!(issues.is_empty(), "{:?}", issues);
        assert!(checks.iter().all(|c| c.is_compatible));
        assert!(checks.iter().any(|c| c.check_name == "CPU Cores"));
        assert!(checks.iter().any(|c| c.check_name == "Available Memory"));
    }

    #[test]
    fn test_small_host_flags_cpu_and_memory() {
        let (checks, issues) = assess_compatibility(&MigrationOptions::default(), &host(1, 256));
        let cpu = checks.iter().find(|c| c.check_name == "CPU Cores").unwrap();
        assert!(!cpu.is_compatible);
        assert!(cpu.recommendation.contains("CPU"));
        let memory = checks.iter().find(|c| c.check_name == "Available Memory").unwrap();
        assert!(memory.recommendation.contains("memory"));
        assert!(issues.iter().any(|i| i.component == "CPU"));
        assert!(issues.iter().any(|i| i.component == "Memory"));
    }

    #[test]
    fn test_disproportionate_configuration_is_advisory() {
        let mut options = MigrationOptions::default();
        options.max_concurrent_operations = 64;
        options.seeding_options.batch_size = 100_000;
        let (checks, issues) = assess_compatibility(&options, &host(4, 2_048));

        let concurrency = checks.iter().find(|c| c.check_name == "Concurrency vs CPU").unwrap();
        assert!(!concurrency.is_compatible);
        assert!(concurrency.recommendation.contains("CPU"));
        let footprint = checks.iter().find(|c| c.check_name == "Batch Memory Footprint").unwrap();
        assert!(!footprint.is_compatible);
        assert!(footprint.recommendation.contains("memory"));
        assert!(issues.len() >= 2);
    }

    #[test]
    fn test_command_timeout_longer_than_operation() {
        let mut options = MigrationOptions::default();
        options.seeding_options.command_timeout = chrono::TimeDelta::hours(2);
        let (_, issues) = assess_compatibility(&options, &host(8, 16_384));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].component, "Timeouts");
    }

    #[tokio::test]
    async fn test_real_host_reports_positive_counts() {
        let result = check_environment_compatibility(&MigrationOptions::default()).await;
        assert!(result.environment_info.processor_count > 0);
        assert!(!result.compatibility_checks.is_empty());
        assert_eq!(result.is_compatible, result.compatibility_issues.is_empty());
    }
}

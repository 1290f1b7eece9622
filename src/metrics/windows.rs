use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::constants::limits;
use crate::metrics::types::{
    CpuMetrics, DetailedMetrics, DiskMetrics, InterfaceInfo, MemoryMetrics, MetricsSnapshot,
    NetworkMetrics, PartitionInfo, ProcessInfo, SystemInfo,
};
use crate::metrics::units::{bytes_to_gb, kb_to_gb, parse_f64, parse_u64, percent_used, round1};
use crate::metrics::{field_or_default, required_output, ParseError};
use crate::services::logger::Logger;

const SKIPPED_ADAPTER_MARKERS: &[&str] = &["loopback", "isatap", "teredo"];
const SKIPPED_PROCESS_NAMES: &[&str] = &["Idle", "_Total"];

#[derive(Debug, Default)]
pub struct RawWindowsMetrics {
    pub cpu_load: Option<String>,
    pub core_count: Option<String>,
    pub memory: Option<String>,
    pub root_disk: Option<String>,
    pub network: Option<String>,
    pub uptime: Option<String>,
}

#[derive(Debug, Default)]
pub struct RawWindowsDetails {
    pub processes: Option<String>,
    pub interfaces: Option<String>,
    pub all_disks: Option<String>,
    pub os_info: Option<String>,
    pub hostname: Option<String>,
}

pub fn build_snapshot(raw: &RawWindowsMetrics, logger: &Logger) -> MetricsSnapshot {
    let cores = field_or_default(
        required_output(&raw.core_count, "processor count output").and_then(parse_core_count),
        logger,
        "cpu.cores",
    );
    let cpu = CpuMetrics {
        usage_percent: field_or_default(
            required_output(&raw.cpu_load, "cpu load output").and_then(parse_cpu_load),
            logger,
            "cpu.usage_percent",
        ),
        cores,
        load_avg: [0.0, 0.0, 0.0],
    };
    let memory = field_or_default(
        required_output(&raw.memory, "os memory output").and_then(parse_memory),
        logger,
        "memory",
    );
    let disk = field_or_default(
        required_output(&raw.root_disk, "logicaldisk output").and_then(parse_system_disk),
        logger,
        "disk",
    );
    let network = field_or_default(
        required_output(&raw.network, "network counters output").and_then(parse_network_totals),
        logger,
        "network",
    );
    let uptime = field_or_default(
        required_output(&raw.uptime, "uptime output").and_then(parse_uptime_text),
        logger,
        "uptime",
    );
    MetricsSnapshot {
        cpu,
        memory,
        disk,
        network,
        uptime,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

pub fn build_details(raw: &RawWindowsDetails, logger: &Logger) -> DetailedMetrics {
    DetailedMetrics {
        top_processes: raw
            .processes
            .as_deref()
            .map(parse_top_processes)
            .unwrap_or_default(),
        network_interfaces: raw
            .interfaces
            .as_deref()
            .map(parse_interfaces)
            .unwrap_or_default(),
        disk_partitions: raw
            .all_disks
            .as_deref()
            .map(parse_partitions)
            .unwrap_or_default(),
        system_info: SystemInfo {
            os: field_or_default(
                required_output(&raw.os_info, "os caption output")
                    .and_then(|raw| parse_os_field(raw, "Caption")),
                logger,
                "system_info.os",
            ),
            kernel: field_or_default(
                required_output(&raw.os_info, "os version output")
                    .and_then(|raw| parse_os_field(raw, "Version")),
                logger,
                "system_info.kernel",
            ),
            hostname: raw
                .hostname
                .as_deref()
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
        },
    }
}

pub fn parse_value_blocks(raw: &str) -> Vec<BTreeMap<String, String>> {
    let mut blocks = Vec::new();
    let mut current: BTreeMap<String, String> = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            current.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

pub fn block_value<'a>(block: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    block
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.as_str())
}

pub fn parse_cpu_load(raw: &str) -> Result<f64, ParseError> {
    let loads: Vec<f64> = parse_value_blocks(raw)
        .iter()
        .filter_map(|block| block_value(block, "LoadPercentage"))
        .map(parse_f64)
        .collect::<Result<_, _>>()?;
    if loads.is_empty() {
        return Err(ParseError::Missing("LoadPercentage value"));
    }
    Ok(round1(loads.iter().sum::<f64>() / loads.len() as f64))
}

pub fn parse_core_count(raw: &str) -> Result<u32, ParseError> {
    let count: u32 = raw
        .trim()
        .parse()
        .map_err(|_| ParseError::Number(raw.trim().to_string()))?;
    if count == 0 {
        return Err(ParseError::Layout("processor count is zero"));
    }
    Ok(count)
}

pub fn parse_memory(raw: &str) -> Result<MemoryMetrics, ParseError> {
    let blocks = parse_value_blocks(raw);
    let block = blocks
        .iter()
        .find(|block| block_value(block, "TotalVisibleMemorySize").is_some())
        .ok_or(ParseError::Missing("TotalVisibleMemorySize value"))?;
    let total_kb = parse_f64(
        block_value(block, "TotalVisibleMemorySize")
            .ok_or(ParseError::Missing("TotalVisibleMemorySize value"))?,
    )?;
    let free_kb = parse_f64(
        block_value(block, "FreePhysicalMemory")
            .ok_or(ParseError::Missing("FreePhysicalMemory value"))?,
    )?;
    let used_kb = (total_kb - free_kb).max(0.0);
    Ok(MemoryMetrics {
        total_gb: kb_to_gb(total_kb),
        used_gb: kb_to_gb(used_kb),
        available_gb: kb_to_gb(free_kb),
        usage_percent: percent_used(used_kb, total_kb),
    })
}

pub fn parse_system_disk(raw: &str) -> Result<DiskMetrics, ParseError> {
    let blocks = parse_value_blocks(raw);
    let block = blocks
        .iter()
        .find(|block| block_value(block, "Size").map_or(false, |size| !size.is_empty()))
        .ok_or(ParseError::Missing("logicaldisk Size value"))?;
    let total_bytes = parse_f64(block_value(block, "Size").unwrap_or_default())?;
    let free_bytes = parse_f64(
        block_value(block, "FreeSpace").ok_or(ParseError::Missing("FreeSpace value"))?,
    )?;
    let used_bytes = (total_bytes - free_bytes).max(0.0);
    let caption = block_value(block, "Caption")
        .or_else(|| block_value(block, "DeviceID"))
        .unwrap_or("C:");
    Ok(DiskMetrics {
        total_gb: bytes_to_gb(total_bytes),
        used_gb: bytes_to_gb(used_bytes),
        available_gb: bytes_to_gb(free_bytes),
        usage_percent: percent_used(used_bytes, total_bytes),
        mount_point: caption.to_string(),
    })
}

pub fn parse_network_totals(raw: &str) -> Result<NetworkMetrics, ParseError> {
    let mut totals = NetworkMetrics::default();
    for block in parse_value_blocks(raw) {
        let Some(name) = block_value(&block, "Name") else {
            continue;
        };
        let lowered = name.to_ascii_lowercase();
        if SKIPPED_ADAPTER_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            continue;
        }
        totals.bytes_recv += block_value(&block, "BytesReceivedPersec")
            .and_then(|v| parse_u64(v).ok())
            .unwrap_or(0);
        totals.bytes_sent += block_value(&block, "BytesSentPersec")
            .and_then(|v| parse_u64(v).ok())
            .unwrap_or(0);
        totals.packets_recv += block_value(&block, "PacketsReceivedPersec")
            .and_then(|v| parse_u64(v).ok())
            .unwrap_or(0);
        totals.packets_sent += block_value(&block, "PacketsSentPersec")
            .and_then(|v| parse_u64(v).ok())
            .unwrap_or(0);
        totals.interfaces.push(name.to_string());
    }
    if totals.interfaces.is_empty() {
        return Err(ParseError::Missing("network adapter blocks"));
    }
    Ok(totals)
}

pub fn parse_uptime_text(raw: &str) -> Result<String, ParseError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ParseError::Missing("uptime text"));
    }
    Ok(text.to_string())
}

pub fn parse_uptime_from_boot(raw: &str, now: DateTime<Utc>) -> Result<String, ParseError> {
    let blocks = parse_value_blocks(raw);
    let stamp = blocks
        .iter()
        .filter_map(|block| block_value(block, "LastBootUpTime"))
        .next()
        .ok_or(ParseError::Missing("LastBootUpTime value"))?;
    let boot = parse_wmi_datetime(stamp)?;
    let elapsed = now.signed_duration_since(boot);
    if elapsed.num_seconds() < 0 {
        return Err(ParseError::Layout("boot time is in the future"));
    }
    let days = elapsed.num_days();
    let hours = elapsed.num_hours() - days * 24;
    let minutes = elapsed.num_minutes() - elapsed.num_hours() * 60;
    Ok(format!(
        "up {} days, {} hours, {} minutes",
        days, hours, minutes
    ))
}

fn parse_wmi_datetime(stamp: &str) -> Result<DateTime<Utc>, ParseError> {
    let stamp = stamp.trim();
    if stamp.len() < 14 {
        return Err(ParseError::Layout("WMI datetime shorter than 14 digits"));
    }
    let naive = NaiveDateTime::parse_from_str(&stamp[..14], "%Y%m%d%H%M%S")
        .map_err(|_| ParseError::Number(stamp.to_string()))?;
    let offset_minutes: i64 = stamp
        .rsplit(['+', '-'])
        .next()
        .and_then(|tail| tail.parse().ok())
        .unwrap_or(0);
    let sign = if stamp.contains('-') { 1 } else { -1 };
    let utc = Utc.from_utc_datetime(&naive) + chrono::Duration::minutes(sign * offset_minutes);
    Ok(utc)
}

pub fn parse_top_processes(raw: &str) -> Vec<ProcessInfo> {
    let mut processes: Vec<ProcessInfo> = parse_value_blocks(raw)
        .iter()
        .filter_map(parse_process_block)
        .collect();
    processes.sort_by(|a, b| {
        b.cpu_percent
            .partial_cmp(&a.cpu_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    processes.truncate(limits::TOP_PROCESS_COUNT);
    processes
}

fn parse_process_block(block: &BTreeMap<String, String>) -> Option<ProcessInfo> {
    let name = block_value(block, "Name")?;
    if SKIPPED_PROCESS_NAMES.contains(&name) {
        return None;
    }
    let pid: u32 = block_value(block, "IDProcess")?.parse().ok()?;
    let cpu_percent: f64 = block_value(block, "PercentProcessorTime")?.parse().ok()?;
    let working_set: f64 = block_value(block, "WorkingSet")?.parse().ok()?;
    Some(ProcessInfo {
        pid,
        name: name.to_string(),
        user: String::new(),
        cpu_percent,
        memory_mb: round1(working_set / 1024.0 / 1024.0),
    })
}

pub fn parse_interfaces(raw: &str) -> Vec<InterfaceInfo> {
    parse_value_blocks(raw)
        .iter()
        .filter_map(|block| {
            let name = block_value(block, "Description")?;
            let addresses = parse_brace_list(block_value(block, "IPAddress")?);
            if addresses.is_empty() {
                return None;
            }
            Some(InterfaceInfo {
                name: name.to_string(),
                addresses,
            })
        })
        .collect()
}

fn parse_brace_list(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(|part| part.trim().trim_matches('"').to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

pub fn parse_partitions(raw: &str) -> Vec<PartitionInfo> {
    parse_value_blocks(raw)
        .iter()
        .filter_map(|block| {
            let caption = block_value(block, "Caption").or_else(|| block_value(block, "DeviceID"))?;
            let size = block_value(block, "Size").filter(|size| !size.is_empty())?;
            let total_bytes: f64 = size.parse().ok()?;
            let free_bytes: f64 = block_value(block, "FreeSpace")?.parse().ok()?;
            let used_bytes = (total_bytes - free_bytes).max(0.0);
            Some(PartitionInfo {
                filesystem: caption.to_string(),
                mount_point: caption.to_string(),
                total_gb: bytes_to_gb(total_bytes),
                used_gb: bytes_to_gb(used_bytes),
                available_gb: bytes_to_gb(free_bytes),
                usage_percent: percent_used(used_bytes, total_bytes),
            })
        })
        .collect()
}

pub fn parse_os_field(raw: &str, key: &str) -> Result<String, ParseError> {
    let blocks = parse_value_blocks(raw);
    blocks
        .iter()
        .filter_map(|block| block_value(block, key))
        .map(|value| value.to_string())
        .next()
        .ok_or(ParseError::Missing("os info value"))
}

pub fn parse_account_names(raw: &str) -> Vec<String> {
    let names: Vec<String> = parse_value_blocks(raw)
        .iter()
        .filter_map(|block| block_value(block, "Name"))
        .map(|name| name.to_string())
        .collect();
    if !names.is_empty() {
        return names;
    }
    parse_net_user_listing(raw)
}

pub fn parse_net_user_listing(raw: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut in_listing = false;
    for line in raw.lines() {
        let line = line.trim();
        if line.chars().count() > 3 && line.chars().all(|c| c == '-') {
            in_listing = true;
            continue;
        }
        if line.starts_with("The command completed") {
            break;
        }
        if in_listing && !line.is_empty() {
            names.extend(line.split_whitespace().map(str::to_string));
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMORY_OUTPUT: &str =
        "\r\n\r\nFreePhysicalMemory=8327772\r\nTotalVisibleMemorySize=16655544\r\n\r\n\r\n";

    const DISK_OUTPUT: &str = "\r\n\r\nCaption=C:\r\nFreeSpace=53687091200\r\nSize=107374182400\r\n\r\n\r\nCaption=D:\r\nFreeSpace=\r\nSize=\r\n\r\n";

    const NETWORK_OUTPUT: &str = "\r\nBytesReceivedPersec=123456789\r\nBytesSentPersec=23456789\r\nName=Intel[R] Ethernet Connection\r\nPacketsReceivedPersec=987654\r\nPacketsSentPersec=456789\r\n\r\n\r\nBytesReceivedPersec=1000\r\nBytesSentPersec=1000\r\nName=Loopback Pseudo-Interface 1\r\nPacketsReceivedPersec=10\r\nPacketsSentPersec=10\r\n\r\n";

    const PROCESS_OUTPUT: &str = "\r\nIDProcess=0\r\nName=Idle\r\nPercentProcessorTime=95\r\nWorkingSet=8192\r\n\r\n\r\nIDProcess=4712\r\nName=sqlservr\r\nPercentProcessorTime=12\r\nWorkingSet=536870912\r\n\r\n\r\nIDProcess=912\r\nName=explorer\r\nPercentProcessorTime=3\r\nWorkingSet=104857600\r\n\r\n";

    const NIC_OUTPUT: &str = "\r\nDescription=Intel[R] Ethernet Connection\r\nIPAddress={\"192.168.1.50\",\"fe80::1c2b:3d4e:5f60:7a8b\"}\r\n\r\n\r\nDescription=Bluetooth Device\r\nIPAddress={}\r\n\r\n";

    const NET_USER_OUTPUT: &str = "User accounts for \\\\WIN-HOST\r\n\r\n-------------------------------------------------------------------------------\r\nAdministrator            DefaultAccount           Guest\r\nWDAGUtilityAccount       deploy\r\nThe command completed successfully.\r\n";

    #[test]
    fn value_blocks_split_on_blank_lines() {
        let blocks = parse_value_blocks(DISK_OUTPUT);
        assert_eq!(blocks.len(), 2);
        assert_eq!(block_value(&blocks[0], "Caption"), Some("C:"));
        assert_eq!(block_value(&blocks[1], "Size"), Some(""));
    }

    #[test]
    fn cpu_load_averages_sockets() {
        let raw = "\r\nLoadPercentage=10\r\n\r\n\r\nLoadPercentage=20\r\n\r\n";
        assert_eq!(parse_cpu_load(raw).unwrap(), 15.0);
    }

    #[test]
    fn cpu_load_missing_is_error() {
        assert!(parse_cpu_load("\r\nStatus=OK\r\n").is_err());
    }

    #[test]
    fn memory_from_kilobyte_counters() {
        let memory = parse_memory(MEMORY_OUTPUT).unwrap();
        assert_eq!(memory.total_gb, 15.9);
        assert_eq!(memory.available_gb, 7.9);
        assert_eq!(memory.usage_percent, 50.0);
    }

    #[test]
    fn system_disk_skips_empty_size_drives() {
        let disk = parse_system_disk(DISK_OUTPUT).unwrap();
        assert_eq!(disk.total_gb, 100.0);
        assert_eq!(disk.used_gb, 50.0);
        assert_eq!(disk.usage_percent, 50.0);
        assert_eq!(disk.mount_point, "C:");
    }

    #[test]
    fn network_totals_skip_loopback_adapters() {
        let totals = parse_network_totals(NETWORK_OUTPUT).unwrap();
        assert_eq!(totals.bytes_recv, 123_456_789);
        assert_eq!(totals.bytes_sent, 23_456_789);
        assert_eq!(totals.interfaces.len(), 1);
    }

    #[test]
    fn top_processes_sorted_without_idle() {
        let processes = parse_top_processes(PROCESS_OUTPUT);
        assert_eq!(processes.len(), 2);
        assert_eq!(processes[0].name, "sqlservr");
        assert_eq!(processes[0].memory_mb, 512.0);
        assert_eq!(processes[1].name, "explorer");
    }

    #[test]
    fn interfaces_from_nicconfig_brace_lists() {
        let interfaces = parse_interfaces(NIC_OUTPUT);
        assert_eq!(interfaces.len(), 1);
        assert_eq!(
            interfaces[0].addresses,
            vec!["192.168.1.50", "fe80::1c2b:3d4e:5f60:7a8b"]
        );
    }

    #[test]
    fn uptime_from_wmi_boot_time() {
        let now = Utc.with_ymd_and_hms(2024, 8, 23, 12, 30, 0).unwrap();
        let raw = "\r\nLastBootUpTime=20240818093000.500000+180\r\n\r\n";
        let text = parse_uptime_from_boot(raw, now).unwrap();
        assert_eq!(text, "up 5 days, 6 hours, 0 minutes");
    }

    #[test]
    fn account_names_prefer_structured_output() {
        let raw = "\r\nName=Administrator\r\n\r\n\r\nName=deploy\r\n\r\n";
        assert_eq!(parse_account_names(raw), vec!["Administrator", "deploy"]);
    }

    #[test]
    fn account_names_fall_back_to_net_user_listing() {
        let names = parse_account_names(NET_USER_OUTPUT);
        assert_eq!(
            names,
            vec![
                "Administrator",
                "DefaultAccount",
                "Guest",
                "WDAGUtilityAccount",
                "deploy"
            ]
        );
    }

    #[test]
    fn snapshot_degrades_per_field() {
        let logger = Logger::new("test");
        let raw = RawWindowsMetrics {
            cpu_load: Some("\r\nLoadPercentage=12\r\n\r\n".to_string()),
            core_count: Some("8\r\n".to_string()),
            memory: Some("no counters here".to_string()),
            root_disk: Some(DISK_OUTPUT.to_string()),
            network: None,
            uptime: Some("up 2 days, 1 hours, 5 minutes".to_string()),
        };
        let snapshot = build_snapshot(&raw, &logger);
        assert_eq!(snapshot.cpu.usage_percent, 12.0);
        assert_eq!(snapshot.cpu.cores, 8);
        assert_eq!(snapshot.memory, MemoryMetrics::default());
        assert_eq!(snapshot.disk.total_gb, 100.0);
        assert_eq!(snapshot.network, NetworkMetrics::default());
    }
}

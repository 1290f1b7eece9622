use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::limits;
use crate::metrics::types::{
    CpuMetrics, DetailedMetrics, DiskMetrics, InterfaceInfo, MemoryMetrics, MetricsSnapshot,
    NetworkMetrics, PartitionInfo, ProcessInfo, SystemInfo,
};
use crate::metrics::units::{mb_to_gb, parse_f64, parse_u64, percent_used, round1, size_to_gb};
use crate::metrics::{field_or_default, required_output, ParseError};
use crate::services::logger::Logger;

static CPU_IDLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\d.,]+)\s*%?\s*id\b").expect("valid cpu idle regex"));

static PRETTY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^PRETTY_NAME="?([^"\n]+)"?"#).expect("valid os-release regex"));

const PSEUDO_FILESYSTEMS: &[&str] = &["tmpfs", "devtmpfs", "none", "overlay", "squashfs"];

#[derive(Debug, Default)]
pub struct RawLinuxMetrics {
    pub top: Option<String>,
    pub proc_stat: Option<String>,
    pub core_count: Option<String>,
    pub load_avg: Option<String>,
    pub memory: Option<String>,
    pub root_disk: Option<String>,
    pub net_dev: Option<String>,
    pub uptime: Option<String>,
}

#[derive(Debug, Default)]
pub struct RawLinuxDetails {
    pub processes: Option<String>,
    pub addresses: Option<String>,
    pub all_disks: Option<String>,
    pub os_release: Option<String>,
    pub kernel: Option<String>,
    pub hostname: Option<String>,
}

pub fn build_snapshot(raw: &RawLinuxMetrics, logger: &Logger) -> MetricsSnapshot {
    let usage = parse_cpu_usage(raw);
    let cpu = CpuMetrics {
        usage_percent: field_or_default(usage, logger, "cpu.usage_percent"),
        cores: field_or_default(
            required_output(&raw.core_count, "nproc output").and_then(parse_core_count),
            logger,
            "cpu.cores",
        ),
        load_avg: field_or_default(
            required_output(&raw.load_avg, "loadavg output").and_then(parse_load_avg),
            logger,
            "cpu.load_avg",
        ),
    };
    let memory = field_or_default(
        required_output(&raw.memory, "free output").and_then(parse_memory),
        logger,
        "memory",
    );
    let disk = field_or_default(
        required_output(&raw.root_disk, "df output").and_then(parse_root_disk),
        logger,
        "disk",
    );
    let network = field_or_default(
        required_output(&raw.net_dev, "net/dev output").and_then(parse_network_totals),
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

pub fn build_details(raw: &RawLinuxDetails, logger: &Logger) -> DetailedMetrics {
    DetailedMetrics {
        top_processes: raw
            .processes
            .as_deref()
            .map(parse_top_processes)
            .unwrap_or_default(),
        network_interfaces: raw
            .addresses
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
                required_output(&raw.os_release, "os-release output")
                    .and_then(parse_os_release_name),
                logger,
                "system_info.os",
            ),
            kernel: raw
                .kernel
                .as_deref()
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            hostname: raw
                .hostname
                .as_deref()
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
        },
    }
}

fn parse_cpu_usage(raw: &RawLinuxMetrics) -> Result<f64, ParseError> {
    match required_output(&raw.top, "top output").and_then(parse_cpu_usage_from_top) {
        Ok(usage) => Ok(usage),
        Err(_) => {
            required_output(&raw.proc_stat, "stat output").and_then(parse_cpu_usage_from_stat)
        }
    }
}

pub fn parse_cpu_usage_from_top(raw: &str) -> Result<f64, ParseError> {
    let line = raw
        .lines()
        .find(|line| line.contains("Cpu(s)"))
        .ok_or(ParseError::Missing("Cpu(s) line"))?;
    let captures = CPU_IDLE_RE
        .captures(line)
        .ok_or(ParseError::Layout("no idle column in Cpu(s) line"))?;
    let idle = parse_f64(&captures[1])?;
    Ok(round1((100.0 - idle).clamp(0.0, 100.0)))
}

pub fn parse_cpu_usage_from_stat(raw: &str) -> Result<f64, ParseError> {
    let line = raw
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or(ParseError::Missing("aggregate cpu line"))?;
    let ticks: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(parse_u64)
        .collect::<Result<_, _>>()?;
    if ticks.len() < 4 {
        return Err(ParseError::Layout("cpu line has fewer than 4 counters"));
    }
    let total: u64 = ticks.iter().sum();
    if total == 0 {
        return Err(ParseError::Layout("cpu counters sum to zero"));
    }
    let idle = ticks[3];
    let usage = (total - idle) as f64 / total as f64 * 100.0;
    Ok(round1(usage.clamp(0.0, 100.0)))
}

pub fn parse_core_count(raw: &str) -> Result<u32, ParseError> {
    let count: u32 = raw
        .split_whitespace()
        .next()
        .ok_or(ParseError::Missing("core count"))?
        .parse()
        .map_err(|_| ParseError::Number(raw.trim().to_string()))?;
    if count == 0 {
        return Err(ParseError::Layout("core count is zero"));
    }
    Ok(count)
}

pub fn parse_load_avg(raw: &str) -> Result<[f64; 3], ParseError> {
    let fields: Vec<&str> = raw.split_whitespace().take(3).collect();
    if fields.len() < 3 {
        return Err(ParseError::Layout("loadavg has fewer than 3 fields"));
    }
    Ok([
        parse_f64(fields[0])?,
        parse_f64(fields[1])?,
        parse_f64(fields[2])?,
    ])
}

pub fn parse_memory(raw: &str) -> Result<MemoryMetrics, ParseError> {
    let line = raw
        .lines()
        .find(|line| line.trim_start().starts_with("Mem:"))
        .ok_or(ParseError::Missing("Mem: row"))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(ParseError::Layout("Mem: row has fewer than 3 columns"));
    }
    let total_mb = parse_f64(fields[1])?;
    let used_mb = parse_f64(fields[2])?;
    let available_mb = match fields.get(6) {
        Some(value) => parse_f64(value)?,
        None => (total_mb - used_mb).max(0.0),
    };
    Ok(MemoryMetrics {
        total_gb: mb_to_gb(total_mb),
        used_gb: mb_to_gb(used_mb),
        available_gb: mb_to_gb(available_mb),
        usage_percent: percent_used(used_mb, total_mb),
    })
}

pub fn parse_root_disk(raw: &str) -> Result<DiskMetrics, ParseError> {
    let line = raw
        .lines()
        .skip(1)
        .find(|line| line.split_whitespace().count() >= 6)
        .ok_or(ParseError::Missing("df data row"))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let total_gb = size_to_gb(fields[1])?;
    let used_gb = size_to_gb(fields[2])?;
    let available_gb = size_to_gb(fields[3])?;
    let usage_percent = match parse_f64(fields[4].trim_end_matches('%')) {
        Ok(value) => value,
        Err(_) => percent_used(used_gb, total_gb),
    };
    Ok(DiskMetrics {
        total_gb,
        used_gb,
        available_gb,
        usage_percent,
        mount_point: fields[5].to_string(),
    })
}

pub fn parse_network_totals(raw: &str) -> Result<NetworkMetrics, ParseError> {
    let mut totals = NetworkMetrics::default();
    for line in raw.lines().skip(2) {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name == "lo" {
            continue;
        }
        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        totals.bytes_recv += parse_u64(fields[0]).unwrap_or(0);
        totals.packets_recv += parse_u64(fields[1]).unwrap_or(0);
        totals.bytes_sent += parse_u64(fields[8]).unwrap_or(0);
        totals.packets_sent += parse_u64(fields[9]).unwrap_or(0);
        totals.interfaces.push(name.to_string());
    }
    if totals.interfaces.is_empty() {
        return Err(ParseError::Missing("non-loopback interfaces"));
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

pub fn parse_user_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_top_processes(raw: &str) -> Vec<ProcessInfo> {
    raw.lines()
        .skip_while(|line| line.trim_start().starts_with("USER"))
        .filter_map(parse_process_line)
        .take(limits::TOP_PROCESS_COUNT)
        .collect()
}

fn parse_process_line(line: &str) -> Option<ProcessInfo> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 11 {
        return None;
    }
    let pid: u32 = fields[1].parse().ok()?;
    let cpu_percent: f64 = fields[2].parse().ok()?;
    let rss_kb: f64 = fields[5].parse().ok()?;
    let command = fields[10];
    let name = command
        .rsplit('/')
        .next()
        .unwrap_or(command)
        .trim_start_matches('-');
    Some(ProcessInfo {
        pid,
        name: name.to_string(),
        user: fields[0].to_string(),
        cpu_percent,
        memory_mb: round1(rss_kb / 1024.0),
    })
}

pub fn parse_interfaces(raw: &str) -> Vec<InterfaceInfo> {
    let mut interfaces: Vec<InterfaceInfo> = Vec::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let name = fields[1].trim_end_matches(':');
        if name == "lo" {
            continue;
        }
        if fields[2] != "inet" && fields[2] != "inet6" {
            continue;
        }
        let address = fields[3].to_string();
        match interfaces.iter_mut().find(|iface| iface.name == name) {
            Some(iface) => iface.addresses.push(address),
            None => interfaces.push(InterfaceInfo {
                name: name.to_string(),
                addresses: vec![address],
            }),
        }
    }
    interfaces
}

pub fn parse_partitions(raw: &str) -> Vec<PartitionInfo> {
    raw.lines()
        .skip(1)
        .filter_map(parse_partition_line)
        .collect()
}

fn parse_partition_line(line: &str) -> Option<PartitionInfo> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return None;
    }
    let filesystem = fields[0];
    if PSEUDO_FILESYSTEMS
        .iter()
        .any(|pseudo| filesystem.starts_with(pseudo))
    {
        return None;
    }
    let total_gb = size_to_gb(fields[1]).ok()?;
    let used_gb = size_to_gb(fields[2]).ok()?;
    let available_gb = size_to_gb(fields[3]).ok()?;
    let usage_percent = fields[4].trim_end_matches('%').parse().unwrap_or(0.0);
    Some(PartitionInfo {
        filesystem: filesystem.to_string(),
        mount_point: fields[5..].join(" "),
        total_gb,
        used_gb,
        available_gb,
        usage_percent,
    })
}

pub fn parse_os_release_name(raw: &str) -> Result<String, ParseError> {
    let captures = PRETTY_NAME_RE
        .captures(raw)
        .ok_or(ParseError::Missing("PRETTY_NAME entry"))?;
    Ok(captures[1].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOP_OUTPUT: &str = "top - 14:23:01 up 5 days,  3:12,  2 users,  load average: 0.52, 0.58, 0.59\n\
        Tasks: 189 total,   1 running, 188 sleeping,   0 stopped,   0 zombie\n\
        %Cpu(s):  5.3 us,  2.1 sy,  0.0 ni, 92.1 id,  0.4 wa,  0.0 hi,  0.1 si,  0.0 st\n\
        MiB Mem :  15882.2 total,   4912.3 free,   7823.1 used,   3146.8 buff/cache\n\
        MiB Swap:   2048.0 total,   2048.0 free,      0.0 used.   7551.9 avail Mem";

    const OLD_TOP_OUTPUT: &str = "top - 09:01:44 up 12 min,  1 user,  load average: 0.10, 0.08, 0.05\n\
        Tasks:  95 total,   2 running,  93 sleeping,   0 stopped,   0 zombie\n\
        Cpu(s): 12.5%us,  3.1%sy,  0.0%ni, 84.0%id,  0.3%wa,  0.0%hi,  0.1%si,  0.0%st";

    const FREE_OUTPUT: &str = "              total        used        free      shared  buff/cache   available\n\
        Mem:          16000        8000        5000         200        3000        8000\n\
        Swap:          2048           0        2048";

    const DF_ROOT_OUTPUT: &str = "Filesystem      Size  Used Avail Use% Mounted on\n\
        /dev/sda1        50G   25G   23G  50% /";

    const NET_DEV_OUTPUT: &str = "Inter-|   Receive                                                |  Transmit\n\
         face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n\
            lo:  104013     876    0    0    0     0          0         0   104013     876    0    0    0     0       0          0\n\
          eth0: 7894561    5120    0    0    0     0          0         0  1234567    3010    0    0    0     0       0          0\n\
          eth1: 1000000    1000    0    0    0     0          0         0  2000000    2000    0    0    0     0       0          0";

    const PS_OUTPUT: &str = "USER         PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND\n\
        root           1  0.1  0.3 167584 11264 ?        Ss   Aug18   1:22 /sbin/init\n\
        www-data     912 12.4  2.1 721004 344064 ?       Sl   Aug18  93:11 /usr/sbin/nginx -g daemon on;\n\
        postgres    1044  4.2  6.0 513280 983040 ?       Ss   Aug18  44:02 postgres";

    const IP_ADDR_OUTPUT: &str = "1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever\n\
        2: eth0    inet 192.168.1.10/24 brd 192.168.1.255 scope global eth0\\       valid_lft forever preferred_lft forever\n\
        2: eth0    inet6 fe80::215:5dff:fe00:101/64 scope link\\       valid_lft forever preferred_lft forever";

    const DF_ALL_OUTPUT: &str = "Filesystem      Size  Used Avail Use% Mounted on\n\
        /dev/sda1        50G   25G   23G  50% /\n\
        /dev/sdb1       200G  120G   70G  63% /var/lib/data\n\
        tmpfs           7.8G     0  7.8G   0% /dev/shm";

    #[test]
    fn cpu_usage_from_top_idle() {
        assert_eq!(parse_cpu_usage_from_top(TOP_OUTPUT).unwrap(), 7.9);
    }

    #[test]
    fn cpu_usage_from_old_top_format() {
        assert_eq!(parse_cpu_usage_from_top(OLD_TOP_OUTPUT).unwrap(), 16.0);
    }

    #[test]
    fn cpu_usage_from_proc_stat_counters() {
        let raw = "cpu  10000 500 3000 86000 200 100 200 0 0 0\ncpu0 2500 125 750 21500 50 25 50 0 0 0";
        assert_eq!(parse_cpu_usage_from_stat(raw).unwrap(), 14.0);
    }

    #[test]
    fn cpu_usage_missing_idle_is_error() {
        assert!(parse_cpu_usage_from_top("Tasks: 10 total").is_err());
        assert!(parse_cpu_usage_from_stat("intr 12345").is_err());
    }

    #[test]
    fn memory_from_free_megabytes() {
        let memory = parse_memory(FREE_OUTPUT).unwrap();
        assert_eq!(memory.total_gb, 15.6);
        assert_eq!(memory.used_gb, 7.8);
        assert_eq!(memory.available_gb, 7.8);
        assert_eq!(memory.usage_percent, 50.0);
    }

    #[test]
    fn memory_without_available_column() {
        let raw = "             total       used       free     shared    buffers     cached\nMem:          2048       1024";
        let memory = parse_memory(raw).unwrap();
        assert_eq!(memory.total_gb, 2.0);
        assert_eq!(memory.available_gb, 1.0);
    }

    #[test]
    fn root_disk_from_df() {
        let disk = parse_root_disk(DF_ROOT_OUTPUT).unwrap();
        assert_eq!(disk.total_gb, 50.0);
        assert_eq!(disk.used_gb, 25.0);
        assert_eq!(disk.available_gb, 23.0);
        assert_eq!(disk.usage_percent, 50.0);
        assert_eq!(disk.mount_point, "/");
    }

    #[test]
    fn network_totals_skip_loopback() {
        let totals = parse_network_totals(NET_DEV_OUTPUT).unwrap();
        assert_eq!(totals.bytes_recv, 8_894_561);
        assert_eq!(totals.bytes_sent, 3_234_567);
        assert_eq!(totals.packets_recv, 6_120);
        assert_eq!(totals.packets_sent, 5_010);
        assert_eq!(totals.interfaces, vec!["eth0", "eth1"]);
    }

    #[test]
    fn load_avg_from_proc() {
        let load = parse_load_avg("0.52 0.58 0.59 1/189 12345").unwrap();
        assert_eq!(load, [0.52, 0.58, 0.59]);
    }

    #[test]
    fn top_processes_skip_header_and_junk() {
        let processes = parse_top_processes(PS_OUTPUT);
        assert_eq!(processes.len(), 3);
        assert_eq!(processes[0].name, "init");
        assert_eq!(processes[1].pid, 912);
        assert_eq!(processes[1].user, "www-data");
        assert_eq!(processes[1].cpu_percent, 12.4);
        assert_eq!(processes[1].memory_mb, 336.0);
        assert_eq!(processes[2].name, "postgres");
    }

    #[test]
    fn interfaces_group_addresses_and_skip_loopback() {
        let interfaces = parse_interfaces(IP_ADDR_OUTPUT);
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0].name, "eth0");
        assert_eq!(
            interfaces[0].addresses,
            vec!["192.168.1.10/24", "fe80::215:5dff:fe00:101/64"]
        );
    }

    #[test]
    fn partitions_skip_pseudo_filesystems() {
        let partitions = parse_partitions(DF_ALL_OUTPUT);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].filesystem, "/dev/sda1");
        assert_eq!(partitions[1].mount_point, "/var/lib/data");
        assert_eq!(partitions[1].usage_percent, 63.0);
    }

    #[test]
    fn os_release_pretty_name() {
        let raw = "NAME=\"Ubuntu\"\nVERSION=\"22.04.3 LTS (Jammy Jellyfish)\"\nPRETTY_NAME=\"Ubuntu 22.04.3 LTS\"\nID=ubuntu";
        assert_eq!(parse_os_release_name(raw).unwrap(), "Ubuntu 22.04.3 LTS");
    }

    #[test]
    fn user_list_from_getent() {
        let users = parse_user_list("alice\nbob\n\ndeploy\n");
        assert_eq!(users, vec!["alice", "bob", "deploy"]);
    }

    #[test]
    fn snapshot_degrades_per_field() {
        let logger = Logger::new("test");
        let raw = RawLinuxMetrics {
            top: Some(TOP_OUTPUT.to_string()),
            proc_stat: None,
            core_count: Some("4\n".to_string()),
            load_avg: Some("0.52 0.58 0.59 1/189 12345".to_string()),
            memory: Some("garbage that is not free output".to_string()),
            root_disk: Some(DF_ROOT_OUTPUT.to_string()),
            net_dev: Some(NET_DEV_OUTPUT.to_string()),
            uptime: Some("up 5 days, 3 hours, 12 minutes".to_string()),
        };
        let snapshot = build_snapshot(&raw, &logger);
        assert_eq!(snapshot.cpu.usage_percent, 7.9);
        assert_eq!(snapshot.cpu.cores, 4);
        assert_eq!(snapshot.memory, MemoryMetrics::default());
        assert_eq!(snapshot.disk.usage_percent, 50.0);
        assert_eq!(snapshot.uptime, "up 5 days, 3 hours, 12 minutes");
        assert!(!snapshot.timestamp.is_empty());
    }

    #[test]
    fn snapshot_falls_back_to_proc_stat() {
        let logger = Logger::new("test");
        let raw = RawLinuxMetrics {
            top: None,
            proc_stat: Some("cpu  10000 500 3000 86000 200 100 200 0 0 0".to_string()),
            ..RawLinuxMetrics::default()
        };
        let snapshot = build_snapshot(&raw, &logger);
        assert_eq!(snapshot.cpu.usage_percent, 14.0);
    }
}

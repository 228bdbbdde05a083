//! Extraction functions, one per log record shape
//!
//! Kubelet/CRI-O journal records and kernel OOM reports are matched line by
//! line. Each function here recognizes or pulls apart exactly one record
//! shape so kernel format variants stay local to one function.

use crate::models::{CgroupMemory, ContainerId, JobId, VictimMemory};
use regex::Regex;
use std::sync::OnceLock;

macro_rules! regex {
    ($pattern:expr) => {{
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new($pattern).expect("static pattern must compile"))
    }};
}

/// True when the line carries `job-<id>` not followed by another digit or letter
pub fn has_job_tag(line: &str, job: JobId) -> bool {
    let tag = job.tag();
    let bytes = line.as_bytes();
    let mut from = 0;
    while let Some(pos) = line[from..].find(&tag) {
        let start = from + pos;
        let end = start + tag.len();
        let before_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let after_ok = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

/// Every 64-hex token in the line, in order of appearance
pub fn container_ids(line: &str) -> Vec<ContainerId> {
    regex!(r"\b[0-9a-fA-F]{64}\b")
        .find_iter(line)
        .filter_map(|m| ContainerId::parse(m.as_str()))
        .collect()
}

/// Kubelet killing the job's `worker` container
pub fn is_worker_kill(line: &str) -> bool {
    regex!(r"(?i)killing container").is_match(line)
        && regex!(r#"containerName="?worker\b|/worker\b"#).is_match(line)
}

/// PLEG "container finished" record
pub fn is_container_finished(line: &str) -> bool {
    regex!(r"(?i)container finished").is_match(line)
}

/// Kubelet `ContainerStarted` PLEG event or CRI-O "Started container"
pub fn is_container_started(line: &str) -> bool {
    regex!(r"(?i)containerstarted|container started|started container").is_match(line)
}

/// Pod UID carried by a kubelet record (`podUID=`, `podID=`, or a PLEG event `"ID":`)
pub fn pod_uid(line: &str) -> Option<String> {
    regex!(
        r#"(?:podUID|podID|pod_uid|"ID")\s*[=:]\s*"?([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})"#
    )
    .captures(line)
    .map(|c| c[1].to_string())
}

/// Kubelet eviction manager record
pub fn is_eviction(line: &str) -> bool {
    regex!(r"(?i)eviction[_ ]manager").is_match(line)
}

/// Kernel `oom-kill:constraint=...` summary line
pub fn is_oom_kill(line: &str) -> bool {
    line.contains("oom-kill:")
}

/// First line of a kernel OOM report
pub fn is_oom_invocation(line: &str) -> bool {
    line.contains("invoked oom-killer")
}

/// True when one of the oom-kill cgroup fields names the container
pub fn oom_kill_names_container(line: &str, container: &ContainerId) -> bool {
    if !is_oom_kill(line) {
        return false;
    }
    regex!(r"\b(?:oom_memcg|task_memcg|cpuset)=([^,\s]+)")
        .captures_iter(line)
        .any(|c| c[1].to_ascii_lowercase().contains(container.as_str()))
}

/// `pid=` field of an oom-kill line
pub fn oom_kill_pid(line: &str) -> Option<u32> {
    regex!(r"\bpid=(\d+)")
        .captures(line)
        .and_then(|c| c[1].parse().ok())
}

/// `task=` field of an oom-kill line
pub fn oom_kill_task(line: &str) -> Option<String> {
    regex!(r"\btask=([^,\s]+)")
        .captures(line)
        .map(|c| c[1].to_string())
}

/// "Killed process <pid> (<name>) total-vm:..kB, anon-rss:..kB, ..."
pub fn killed_process(line: &str) -> Option<VictimMemory> {
    let caps = regex!(r"Killed process (\d+) \(([^)]*)\)").captures(line)?;
    let field = |re: &Regex| -> Option<u64> { re.captures(line).and_then(|c| c[1].parse().ok()) };
    Some(VictimMemory {
        pid: caps[1].parse().ok(),
        name: Some(caps[2].to_string()),
        total_vm_kb: field(regex!(r"total-vm:(\d+)kB")),
        anon_rss_kb: field(regex!(r"anon-rss:(\d+)kB")),
        file_rss_kb: field(regex!(r"file-rss:(\d+)kB")),
        shmem_rss_kb: field(regex!(r"shmem-rss:(\d+)kB")),
    })
}

/// cgroup summary "memory: usage <n>kB, limit <n>kB, failcnt <n>"
pub fn cgroup_memory(line: &str) -> Option<CgroupMemory> {
    let caps = regex!(r"(?:^|[^+\w])memory: usage (\d+)kB, limit (\d+)kB, failcnt (\d+)")
        .captures(line)?;
    Some(CgroupMemory {
        usage_kb: caps[1].parse().ok()?,
        limit_kb: caps[2].parse().ok()?,
        failcnt: caps[3].parse().ok()?,
    })
}

/// Header preceding the per-task memory dump
pub fn is_task_dump_header(line: &str) -> bool {
    line.contains("Tasks state (memory values in pages)")
}

/// Summary lines that close the task dump
pub fn is_task_dump_end(line: &str) -> bool {
    is_oom_kill(line) || line.contains("Killed process")
}

/// One row of the task dump: (process name, rss pages)
///
/// Handles `[  pid]` and `[pid]` brackets, both the
/// `pgtables_bytes swapents oom_score_adj` and the older
/// `nr_ptes nr_pmds swapents oom_score_adj` column sets, and process
/// names containing spaces.
pub fn task_dump_row(line: &str) -> Option<(String, u64)> {
    let caps = regex!(r"\[\s*(\d+)\]\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)(?:\s+-?\d+)+\s+(\S.*?)\s*$")
        .captures(line)?;
    let rss_pages = caps[5].parse().ok()?;
    Some((caps[6].to_string(), rss_pages))
}

/// Node named by a scheduler "Successfully assigned <ns>/<pod> to <node>" event
pub fn assigned_node(message: &str, job: JobId) -> Option<String> {
    if !message.contains("assigned") || !has_job_tag(message, job) {
        return None;
    }
    message
        .split_whitespace()
        .last()
        .map(|token| token.trim_end_matches(['.', ',']).to_string())
        .filter(|node| !node.is_empty() && !has_job_tag(node, job))
}

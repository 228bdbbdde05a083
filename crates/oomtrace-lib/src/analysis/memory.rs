//! Memory accounting from kernel OOM reports
//!
//! A kernel OOM report runs from the "invoked oom-killer" line through the
//! meminfo/cgroup summary, the optional "Tasks state" dump, the
//! `oom-kill:` summary and finally "Killed process". Logs often hold many
//! reports, so extraction is bounded to the one report around the matched
//! `oom-kill:` line.

use crate::models::{ContainerId, MemoryReport, ProcessRss, VictimMemory};
use crate::resolve::patterns;
use std::collections::BTreeMap;
use std::ops::Range;

/// Page size assumed for task dump RSS values
pub const PAGE_SIZE_KB: u64 = 4;

const KB_PER_MB: u64 = 1024;
const KB_PER_GB: u64 = 1024 * 1024;

/// Build the memory report for `container` from kernel text
///
/// When `pid` is known the `oom-kill:` line with that pid is used, otherwise
/// the last one naming the container. Every field is extracted independently;
/// a missing line leaves only its own fields empty.
pub fn extract(text: &str, pid: Option<u32>, container: &ContainerId) -> MemoryReport {
    let lines: Vec<&str> = text.lines().collect();
    let Some(anchor) = find_oom_kill(&lines, pid, container) else {
        return MemoryReport::default();
    };
    let region = &lines[oom_region(&lines, anchor)];

    let pid = pid.or_else(|| patterns::oom_kill_pid(lines[anchor]));
    let mut victim = VictimMemory {
        pid,
        name: patterns::oom_kill_task(lines[anchor]),
        ..Default::default()
    };
    let killed = region
        .iter()
        .filter_map(|l| patterns::killed_process(l))
        .find(|v| pid.is_none() || v.pid == pid);
    if let Some(killed) = killed {
        victim = VictimMemory {
            pid: killed.pid.or(victim.pid),
            name: killed.name.or(victim.name),
            ..killed
        };
    }

    MemoryReport {
        victim,
        cgroup: region.iter().rev().find_map(|l| patterns::cgroup_memory(l)),
        processes: aggregate_tasks(region),
    }
}

/// Line range of the OOM report containing `anchor`
///
/// Starts at the nearest preceding "invoked oom-killer" line (or the start
/// of text) and ends before the next one (or at the end of text).
pub fn oom_region(lines: &[&str], anchor: usize) -> Range<usize> {
    let start = lines[..=anchor]
        .iter()
        .rposition(|l| patterns::is_oom_invocation(l))
        .unwrap_or(0);
    let end = lines[anchor + 1..]
        .iter()
        .position(|l| patterns::is_oom_invocation(l))
        .map(|offset| anchor + 1 + offset)
        .unwrap_or(lines.len());
    start..end
}

fn find_oom_kill(lines: &[&str], pid: Option<u32>, container: &ContainerId) -> Option<usize> {
    let naming: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| patterns::oom_kill_names_container(l, container))
        .map(|(i, _)| i)
        .collect();

    pid.and_then(|pid| {
        naming
            .iter()
            .rev()
            .copied()
            .find(|&i| patterns::oom_kill_pid(lines[i]) == Some(pid))
    })
    .or_else(|| naming.last().copied())
}

/// Aggregate the "Tasks state" dump by process name, RSS in kB
///
/// The dump runs from its header to the `oom-kill:` summary. Lines in
/// between that are not task rows (interleaved journal records, column
/// headers) are skipped.
fn aggregate_tasks(region: &[&str]) -> BTreeMap<String, ProcessRss> {
    let mut processes: BTreeMap<String, ProcessRss> = BTreeMap::new();
    let mut in_dump = false;

    for line in region {
        if patterns::is_task_dump_header(line) {
            in_dump = true;
            continue;
        }
        if !in_dump {
            continue;
        }
        if patterns::is_task_dump_end(line) {
            in_dump = false;
            continue;
        }
        if let Some((name, rss_pages)) = patterns::task_dump_row(line) {
            let entry = processes.entry(name).or_default();
            entry.count += 1;
            entry.rss_kb += rss_pages * PAGE_SIZE_KB;
        }
    }

    processes
}

/// Render kB with a derived MB or GB figure
///
/// `1023` -> `1023kB`, `2048` -> `2048kB (2MB)`, `2097152` -> `2097152kB (2.0GB)`.
pub fn format_kb(kb: u64) -> String {
    if kb >= KB_PER_GB {
        format!("{}kB ({:.1}GB)", kb, kb as f64 / KB_PER_GB as f64)
    } else if kb >= KB_PER_MB {
        format!("{}kB ({}MB)", kb, kb / KB_PER_MB)
    } else {
        format!("{}kB", kb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn container() -> ContainerId {
        ContainerId::parse(CID).unwrap()
    }

    fn oom_kill(cid: &str, pid: u32) -> String {
        format!(
            "kernel: oom-kill:constraint=CONSTRAINT_MEMCG,nodemask=(null),cpuset=crio-{cid}.scope,mems_allowed=0,oom_memcg=/kubepods.slice/crio-{cid}.scope,task_memcg=/kubepods.slice/crio-{cid}.scope,task=ansible-playboo,pid={pid},uid=1000"
        )
    }

    fn report(cid: &str, pid: u32, usage: u64, with_tasks: bool) -> Vec<String> {
        let mut lines = vec![
            "kernel: ansible-playboo invoked oom-killer: gfp_mask=0xcc0(GFP_KERNEL), order=0, oom_score_adj=1000".to_string(),
            "kernel: CPU: 3 PID: 555 Comm: ansible-playboo Not tainted".to_string(),
            format!("kernel: memory: usage {}kB, limit 524288kB, failcnt 412", usage),
            "kernel: memory+swap: usage 524288kB, limit 9007199254740988kB, failcnt 0".to_string(),
        ];
        if with_tasks {
            lines.extend([
                "kernel: Tasks state (memory values in pages):".to_string(),
                "kernel: [  pid  ]   uid  tgid total_vm      rss pgtables_bytes swapents oom_score_adj name".to_string(),
                "kernel: [    555]  1000   555   225000   120000   1200000        0          1000 ansible-playboo".to_string(),
                "kernel: [    601]  1000   601   225000    10000   1200000        0          1000 ansible-playboo".to_string(),
                "kernel: [1000712]  1000 1000712    4000      256      40       3        0          1000 ssh".to_string(),
            ]);
        }
        lines.push(oom_kill(cid, pid));
        lines.push(format!(
            "kernel: Memory cgroup out of memory: Killed process {} (ansible-playboo) total-vm:900000kB, anon-rss:524288kB, file-rss:2048kB, shmem-rss:0kB, UID:1000 pgtables:1172kB oom_score_adj:1000",
            pid
        ));
        lines
    }

    #[test]
    fn test_format_kb_thresholds() {
        assert_eq!(format_kb(1023), "1023kB");
        assert!(format_kb(2048).contains("2MB"));
        assert!(format_kb(2097152).contains("GB"));
        assert_eq!(format_kb(2097152), "2097152kB (2.0GB)");
        assert_eq!(format_kb(524288), "524288kB (512MB)");
    }

    #[test]
    fn test_full_report() {
        let text = report(CID, 555, 524200, true).join("\n");
        let m = extract(&text, Some(555), &container());

        assert_eq!(m.victim.pid, Some(555));
        assert_eq!(m.victim.name.as_deref(), Some("ansible-playboo"));
        assert_eq!(m.victim.anon_rss_kb, Some(524288));
        assert_eq!(m.victim.file_rss_kb, Some(2048));
        assert_eq!(m.victim.total_vm_kb, Some(900000));

        let cgroup = m.cgroup.unwrap();
        assert_eq!(cgroup.usage_kb, 524200);
        assert_eq!(cgroup.limit_kb, 524288);
        assert_eq!(cgroup.failcnt, 412);

        let ansible = m.processes["ansible-playboo"];
        assert_eq!(ansible.count, 2);
        assert_eq!(ansible.rss_kb, 130000 * PAGE_SIZE_KB);
        assert_eq!(m.processes["ssh"].rss_kb, 1024);
    }

    #[test]
    fn test_region_is_bounded_to_one_report() {
        let other = "b".repeat(64);
        let mut lines = report(&other, 700, 111, true);
        lines.extend(report(CID, 555, 222, false));
        lines.extend(report(&other, 701, 333, true));
        let text = lines.join("\n");

        let m = extract(&text, Some(555), &container());
        assert_eq!(m.cgroup.unwrap().usage_kb, 222);
        // neighbouring reports' task dumps must not leak in
        assert!(m.processes.is_empty());
        assert_eq!(m.victim.pid, Some(555));
    }

    #[test]
    fn test_missing_lines_leave_other_fields() {
        let text = [oom_kill(CID, 42), "kernel: Tasks state (memory values in pages):".into()]
            .join("\n");
        let m = extract(&text, None, &container());
        assert_eq!(m.victim.pid, Some(42));
        assert_eq!(m.victim.name.as_deref(), Some("ansible-playboo"));
        assert_eq!(m.victim.anon_rss_kb, None);
        assert!(m.cgroup.is_none());
        assert!(m.processes.is_empty());
    }

    #[test]
    fn test_task_dump_survives_interleaved_journal_lines() {
        let lines = [
            "May 01 10:04:59 worker-1 kernel: ansible-playboo invoked oom-killer: gfp_mask=0xcc0(GFP_KERNEL), order=0, oom_score_adj=1000".to_string(),
            "May 01 10:04:59 worker-1 kernel: Tasks state (memory values in pages):".to_string(),
            "May 01 10:04:59 worker-1 kernel: [  pid  ]   uid  tgid total_vm      rss pgtables_bytes swapents oom_score_adj name".to_string(),
            "May 01 10:04:59 worker-1 kernel: [    400]  1000   400     1000      100    40000        0          1000 sh".to_string(),
            r#"May 01 10:04:59 worker-1 kubenswrapper[2110]: I0501 10:04:59.500 2110 kubelet.go:2430] "SyncLoop UPDATE" source="api" pods=["aap/automation-job-9-q2w3e"]"#.to_string(),
            "May 01 10:04:59 worker-1 kernel: [    555]  1000   555   225000   120000  1200000        0          1000 ansible-playboo".to_string(),
            format!("May 01 10:04:59 worker-1 {}", oom_kill(CID, 555)),
            "May 01 10:04:59 worker-1 kernel: [    999]  1000   999     1000     9999    40000        0          1000 not-a-task".to_string(),
        ];
        let m = extract(&lines.join("\n"), Some(555), &container());

        assert_eq!(m.processes.len(), 2);
        assert_eq!(m.processes["sh"].rss_kb, 400);
        assert_eq!(m.processes["ansible-playboo"].rss_kb, 120000 * PAGE_SIZE_KB);
    }

    #[test]
    fn test_task_dump_names_with_spaces() {
        let mut lines = report(CID, 555, 1, false);
        let at = lines.len() - 2;
        lines.splice(
            at..at,
            [
                "kernel: Tasks state (memory values in pages):".to_string(),
                "kernel: [    400]  1000   400     1000      100    40000        0          1000 sh".to_string(),
                "kernel: [    401]  1000   401     9000     2000    80000        0          1000 Web Content".to_string(),
                "kernel: [    555]  1000   555   225000   120000  1200000        0          1000 ansible-playboo".to_string(),
            ],
        );
        let m = extract(&lines.join("\n"), Some(555), &container());

        assert_eq!(m.processes["Web Content"].rss_kb, 8000);
        assert_eq!(m.processes["ansible-playboo"].count, 1);
        assert_eq!(m.top_processes()[0].0, "ansible-playboo");
    }

    #[test]
    fn test_no_matching_oom_kill() {
        let text = report(&"c".repeat(64), 9, 1, true).join("\n");
        assert!(extract(&text, None, &container()).is_empty());
    }

    #[test]
    fn test_oom_region_bounds() {
        let lines = ["a", "x invoked oom-killer", "b", "anchor", "c", "y invoked oom-killer", "d"];
        assert_eq!(oom_region(&lines, 3), 1..5);
        assert_eq!(oom_region(&lines[2..], 1), 0..3);
    }
}

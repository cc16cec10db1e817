//! Result serialization.
//!
//! One header line with the verdict, one `Job(...)` line per job, then the
//! schedule: one tuple per segment, `(t, job.uid, job.c, job.bw, ...)` with
//! `None, 0, 0` for idle cores. The analytic baseline writes the header only.

use crate::prelude::*;
use std::io::Write;

pub mod prelude {
    pub use super::{
        ResultHeader,
        write_result,
    };
}

pub struct ResultHeader {
    pub idx: usize,
    pub util: f64,
    pub schedulable: bool,
    pub runtime_secs: f64,
    pub num_taskgraphs: usize,
    pub num_tasks: usize,
}

// =============================================================================

pub fn write_result(
    out: &mut impl Write,
    header: &ResultHeader,
    jobs: &JobSet,
    taskset: &Taskset,
    schedule: Option<&[SegmentRecord]>,
) -> std::io::Result<()> {
    writeln!(
        out,
        "TASKSET IDX: {}, UTIL: {:.1}, SCHEDULABLE: {}, RUNTIME: {}, NUM TASKGRAPHS: {}, NUM TASKS: {}",
        header.idx,
        header.util,
        py_bool(header.schedulable),
        header.runtime_secs,
        header.num_taskgraphs,
        header.num_tasks,
    )?;

    let Some(schedule) = schedule else {
        return Ok(());
    };

    for job in &jobs.jobs {
        writeln!(out, "{}", job_line(job, jobs, taskset))?;
    }

    writeln!(
        out,
        "STARTING SCHEDULE, format: (t, job_0.uid, job_0.c, job_0.bw, job_1.uid, job_1.c, job_1.bw, ...)",
    )?;

    for segment in schedule {
        writeln!(out, "{}", segment_line(segment, jobs))?;
    }

    Ok(())
}

fn py_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

fn job_line(job: &Job, jobs: &JobSet, taskset: &Taskset) -> String {
    let id_list = |ids: &[usize]| -> String {
        if ids.is_empty() {
            "None".to_string()
        } else {
            ids.iter()
                .map(|&at| jobs.jobs[at].id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
    };

    let name = &taskset.dags[job.dag_idx].subtasks[job.sub_idx].workload;
    format!(
        "Job(uid={}, name={}, parent_uids=[{}], child_uids=[{}], release_time={}, deadline={}, dag_deadline={}, cur_finish={}, complete={}, c={}, bw={})",
        job.id,
        name,
        id_list(&job.parents),
        id_list(&job.children),
        job.release_offset,
        job.deadline,
        job.dag_deadline,
        job.cur_finish,
        py_bool(job.complete),
        job.c,
        job.bw,
    )
}

fn segment_line(segment: &SegmentRecord, jobs: &JobSet) -> String {
    let mut fields = vec![segment.t.to_string()];

    for slot in &segment.slots {
        match slot {
            Some(alloc) => {
                fields.push(format!("'{}'", jobs.jobs[alloc.job].id));
                fields.push(alloc.c.to_string());
                fields.push(alloc.bw.to_string());
            },
            None => {
                fields.push("None".to_string());
                fields.push("0".to_string());
                fields.push("0".to_string());
            },
        }
    }

    format!("({})", fields.join(", "))
}

// Tests -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testbed;
    use crate::engine::AlgoKind;

    fn chain_run() -> (JobSet, Taskset, Vec<SegmentRecord>) {
        let platform = testbed::platform2();
        let mut db = PhaseDb::new(&platform);
        testbed::uniform_workload(&mut db, &platform, "streamcluster", 2001, 125_000_000, testbed::flat_theta());

        let dag = testbed::chain_dag("streamcluster", 2, 10_000, 2001, &db, &platform);
        let mut taskset = Taskset { dags: vec![dag] };
        decompose_taskset(&mut taskset, AlgoKind::Rasco, &platform, &db);
        let mut jobs = expand_jobs(&taskset);
        let schedule = build_schedule(&mut jobs, &taskset, AlgoKind::Rasco, &platform, &db);

        (jobs, taskset, schedule)
    }

    #[test]
    fn rendered_output_matches_the_documented_format() {
        let (jobs, taskset, schedule) = chain_run();

        let header = ResultHeader {
            idx: 7,
            util: 0.4,
            schedulable: true,
            runtime_secs: 0.25,
            num_taskgraphs: 1,
            num_tasks: 2,
        };

        let mut raw = Vec::new();
        write_result(&mut raw, &header, &jobs, &taskset, Some(&schedule)).unwrap();
        let text = String::from_utf8(raw).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "TASKSET IDX: 7, UTIL: 0.4, SCHEDULABLE: True, RUNTIME: 0.25, NUM TASKGRAPHS: 1, NUM TASKS: 2",
        );
        assert!(lines[1].starts_with(
            "Job(uid=0_0, name=streamcluster, parent_uids=[None], child_uids=[1_0], release_time=0,",
        ));
        assert!(lines[1].contains("dag_deadline=10000"));
        assert!(lines[1].contains("cur_finish=1000"));
        assert!(lines[1].ends_with("complete=True, c=8, bw=8)"));
        assert!(lines[2].starts_with("Job(uid=1_0, name=streamcluster, parent_uids=[0_0], child_uids=[None]"));
        assert_eq!(
            lines[3],
            "STARTING SCHEDULE, format: (t, job_0.uid, job_0.c, job_0.bw, job_1.uid, job_1.c, job_1.bw, ...)",
        );
        assert_eq!(lines[4], "(0, '0_0', 8, 8, None, 0, 0)");
        assert_eq!(lines[5], "(1000, '1_0', 8, 8, None, 0, 0)");

        // every emitted job uid appears in some schedule tuple
        for job in &jobs.jobs {
            let quoted = format!("'{}'", job.id);
            assert!(lines[4..].iter().any(|line| line.contains(&quoted)));
        }
    }

    #[test]
    fn analytic_runs_emit_the_header_only() {
        let (jobs, taskset, _) = chain_run();

        let header = ResultHeader {
            idx: 0,
            util: 1.0,
            schedulable: false,
            runtime_secs: 0.001,
            num_taskgraphs: 1,
            num_tasks: 2,
        };

        let mut raw = Vec::new();
        write_result(&mut raw, &header, &jobs, &taskset, None).unwrap();
        let text = String::from_utf8(raw).unwrap();

        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("TASKSET IDX: 0, UTIL: 1.0, SCHEDULABLE: False"));
    }
}

//! Durable artifacts written once the collection run has stopped.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::CollectorError;
use crate::format::whole_megabytes;
use crate::system::history::{PeakMetric, ProcessSample, SeriesSummary, TimeSeriesStore};
use crate::system::platform;
use crate::system::process::ProcessIdentity;

/// One element of the JSON array.
#[derive(Serialize)]
struct ProcessRecord<'a> {
    pid: u32,
    ppid: u32,
    name: &'a str,
    data: &'a [ProcessSample],
}

/// How the CSV view picks its columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CsvOptions {
    pub metric: PeakMetric,
    /// Processes whose peak is not strictly above this are left out.
    pub noise_floor_bytes: u64,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            metric: PeakMetric::WorkingSet,
            noise_floor_bytes: 100 * 1024 * 1024,
        }
    }
}

pub fn write_json<W: Write>(store: &TimeSeriesStore, metric: PeakMetric, mut out: W) -> io::Result<()> {
    let records: Vec<ProcessRecord<'_>> = store
        .summaries(metric)
        .into_iter()
        .map(|summary| ProcessRecord {
            pid: summary.identity.pid,
            ppid: summary.identity.ppid,
            name: &summary.identity.name,
            data: summary.samples,
        })
        .collect();
    serde_json::to_writer(&mut out, &records)?;
    out.flush()
}

pub fn write_csv<W: Write>(store: &TimeSeriesStore, options: CsvOptions, mut out: W) -> io::Result<()> {
    let columns: Vec<SeriesSummary<'_>> = store
        .summaries(options.metric)
        .into_iter()
        .filter(|summary| summary.peak > options.noise_floor_bytes)
        .collect();

    let mut timeline: BTreeMap<u64, HashMap<&ProcessIdentity, &ProcessSample>> = BTreeMap::new();
    write!(out, "Time")?;
    for column in &columns {
        for sample in column.samples {
            timeline
                .entry(sample.timestamp)
                .or_default()
                .entry(column.identity)
                .or_insert(sample);
        }
        write!(
            out,
            ";{} (pid: {}, ppid: {})",
            column.identity.name, column.identity.pid, column.identity.ppid
        )?;
    }
    write!(out, "\r\n")?;

    for (time, row) in &timeline {
        write!(out, "{time}")?;
        for column in &columns {
            write!(out, ";")?;
            if let Some(sample) = row.get(column.identity) {
                write!(out, "{}", whole_megabytes(sample.memory.working_set_size))?;
            }
        }
        write!(out, "\r\n")?;
    }
    out.flush()
}

/// `onlooker_YYYY-MM-DD_HH-MM-SS_<pid>`, shared by the log, JSON and CSV files.
pub fn artifact_basename(started: &DateTime<Local>, pid: u32) -> String {
    format!("onlooker_{}_{pid}", started.format("%Y-%m-%d_%H-%M-%S"))
}

/// Writes the JSON artifact to `path`, refusing concurrent writers.
pub fn dump_json(store: &TimeSeriesStore, metric: PeakMetric, path: &Path) -> Result<(), CollectorError> {
    let file = platform::open_exclusive(path).map_err(|err| CollectorError::io("json", path, err))?;
    write_json(store, metric, BufWriter::new(file)).map_err(|err| CollectorError::io("json", path, err))
}

/// Writes the CSV artifact to `path`, refusing concurrent writers.
pub fn dump_csv(store: &TimeSeriesStore, options: CsvOptions, path: &Path) -> Result<(), CollectorError> {
    let file = platform::open_exclusive(path).map_err(|err| CollectorError::io("csv", path, err))?;
    write_csv(store, options, BufWriter::new(file)).map_err(|err| CollectorError::io("csv", path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::memory::MemoryCounters;

    const MB: u64 = 1024 * 1024;

    fn sample(timestamp: u64, working_set: u64) -> ProcessSample {
        ProcessSample {
            timestamp,
            cpu_usage: 12.4,
            memory: MemoryCounters {
                working_set_size: working_set,
                ..MemoryCounters::default()
            },
        }
    }

    fn csv(store: &TimeSeriesStore, options: CsvOptions) -> String {
        let mut buf = Vec::new();
        write_csv(store, options, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn basename_layout() {
        use chrono::TimeZone;
        let started = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(artifact_basename(&started, 4242), "onlooker_2024-03-09_07-05-01_4242");
    }

    #[test]
    fn empty_store_is_empty_array() {
        let mut buf = Vec::new();
        write_json(&TimeSeriesStore::new(), PeakMetric::WorkingSet, &mut buf).unwrap();
        assert_eq!(buf, b"[]");
    }

    #[test]
    fn json_layout() {
        let mut store = TimeSeriesStore::new();
        store.append(ProcessIdentity::new(4, 1, "a\"b.exe"), sample(1000, 2 * MB));

        let mut buf = Vec::new();
        write_json(&store, PeakMetric::WorkingSet, &mut buf).unwrap();
        let json = String::from_utf8(buf).unwrap();

        assert_eq!(
            json,
            concat!(
                r#"[{"pid":4,"ppid":1,"name":"a\"b.exe","data":[{"time":1000,"cpuUsage":12,"#,
                r#""memory":{"pageFaultCount":0,"peakWorkingSetSize":0,"workingSetSize":2097152,"#,
                r#""quotaPeakPagedPoolUsage":0,"quotaPagedPoolUsage":0,"quotaPeakNonPagedPoolUsage":0,"#,
                r#""quotaNonPagedPoolUsage":0,"pagefileUsage":0,"peakPagefileUsage":0,"privateUsage":0}}]}]"#
            )
        );
    }

    #[test]
    fn csv_floor_is_exclusive() {
        let mut store = TimeSeriesStore::new();
        store.append(ProcessIdentity::new(1, 0, "at-floor"), sample(10, 100 * MB));
        store.append(ProcessIdentity::new(2, 0, "above"), sample(10, 100 * MB + 1));

        let text = csv(&store, CsvOptions::default());
        let header = text.lines().next().unwrap();
        assert_eq!(header, "Time;above (pid: 2, ppid: 0)");
    }

    #[test]
    fn csv_leaves_missing_cells_empty() {
        let mut store = TimeSeriesStore::new();
        let a = ProcessIdentity::new(1, 0, "a");
        let b = ProcessIdentity::new(2, 1, "b");
        store.append(a.clone(), sample(10, 300 * MB));
        store.append(a.clone(), sample(20, 310 * MB));
        store.append(b.clone(), sample(20, 150 * MB));
        store.append(b, sample(30, 151 * MB + 5));
        store.append(a, sample(40, 320 * MB));

        let text = csv(&store, CsvOptions::default());
        assert_eq!(
            text,
            "Time;a (pid: 1, ppid: 0);b (pid: 2, ppid: 1)\r\n\
             10;300;\r\n\
             20;310;150\r\n\
             30;;151\r\n\
             40;320;\r\n"
        );
    }

    #[test]
    fn csv_with_no_columns_still_has_header() {
        let mut store = TimeSeriesStore::new();
        store.append(ProcessIdentity::new(1, 0, "tiny"), sample(10, MB));
        assert_eq!(csv(&store, CsvOptions::default()), "Time\r\n");
    }

    #[test]
    fn csv_pagefile_metric_selects_columns() {
        let mut store = TimeSeriesStore::new();
        let mut s = sample(10, MB);
        s.memory.pagefile_usage = 2 * MB;
        store.append(ProcessIdentity::new(1, 0, "committed"), s);

        let options = CsvOptions {
            metric: PeakMetric::Pagefile,
            noise_floor_bytes: MB,
        };
        assert_eq!(csv(&store, options), "Time;committed (pid: 1, ppid: 0)\r\n10;1\r\n");
    }
}

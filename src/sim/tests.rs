use std::fs;
use std::path::PathBuf;

use super::config::{RootKind, SimulatorConfig};
use super::top::{RootReport, SimReport, Simulator};

const SMALL_SYSTEM: &str = r#"
    [engine]
    progress_period = 0

    [dram]
    banks_per_rank = 2
    rows_per_bank = 16
    blocks_per_row = 8
    max_queue_size = 4

    [pcm]
    banks_per_rank = 2
    rows_per_bank = 256
    blocks_per_row = 8
    max_queue_size = 4

    [cache]
    block_size = 256
    set_assoc = 2
    page_size = 4096
    max_queue_size = 8

    [traffic]
    num_requests = 300
    max_outstanding = 8
    issue_interval = 2

    [traffic.pattern]
    kind = "random"
    footprint = 65536
    read_fraction = 0.6
    seed = 7
"#;

fn small_config() -> SimulatorConfig {
    SimulatorConfig::from_toml_str(SMALL_SYSTEM).unwrap()
}

fn run(config: SimulatorConfig) -> SimReport {
    let mut sim = Simulator::from_config(config).unwrap();
    sim.run()
}

fn scratch_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("hymsim-{}-{}", std::process::id(), name))
}

#[test]
fn cached_system_serves_every_request() {
    let report = run(small_config());
    assert!(report.finished);
    assert_eq!(300, report.driver.issued);
    assert_eq!(300, report.driver.completed);
    let RootReport::Cache(cache) = report.memory else {
        panic!("expected a cache report");
    };
    assert!(cache.cache.hits > 0);
    assert!(cache.cache.misses > 0);
    // every miss reads from the slow tier
    assert!(cache.pcm.memory.reads > 0);
    assert!(cache.dram.memory.writes > 0);
    assert!(report.driver.min_latency.is_some_and(|min| min > 0));
}

#[test]
fn plain_memory_root_uses_the_slow_tier_config() {
    let mut config = small_config();
    config.sim.root = RootKind::Memory;
    let report = run(config);
    assert!(report.finished);
    let RootReport::Memory(memory) = report.memory else {
        panic!("expected a memory report");
    };
    assert_eq!("pcm", memory.name);
    assert_eq!(300, memory.memory.requests());
}

#[test]
fn staller_root_answers_after_the_penalty() {
    let mut config = small_config();
    config.sim.root = RootKind::Staller;
    config.sim.staller_penalty = 100;
    config.traffic.num_requests = 50;
    config.traffic.max_outstanding = 1;
    let report = run(config);
    assert!(report.finished);
    assert_eq!(5000, report.engine.final_timestamp);
    assert_eq!(100.0, report.average_latency);
}

#[test]
fn identical_configs_give_identical_runs() {
    let first = run(small_config());
    let second = run(small_config());
    assert_eq!(first.engine.final_timestamp, second.engine.final_timestamp);
    assert_eq!(first.engine.total_events, second.engine.total_events);
    assert_eq!(
        serde_json::to_value(&first.driver).unwrap(),
        serde_json::to_value(&second.driver).unwrap()
    );
    assert_eq!(
        serde_json::to_value(&first.memory).unwrap(),
        serde_json::to_value(&second.memory).unwrap()
    );
}

#[test]
fn faster_tier_wins_for_a_cache_resident_working_set() {
    let mut cached = small_config();
    cached.traffic.pattern.kind = "sequential".to_string();
    cached.traffic.pattern.footprint = 4096;
    cached.traffic.num_requests = 2000;
    let mut plain = cached.clone();
    plain.sim.root = RootKind::Memory;
    plain.pcm.row_buffer_policy = crate::mem::config::RowBufferPolicy::ClosePage;

    let cached = run(cached);
    let plain = run(plain);
    assert!(cached.finished && plain.finished);
    assert!(cached.average_latency < plain.average_latency);
}

#[test]
fn trace_file_drives_the_run() {
    let path = scratch_file("replay.trace");
    fs::write(&path, "# three records\nR 0x0\nW 0x40\nR 0x1000\n").unwrap();
    let mut config = small_config();
    config.sim.root = RootKind::Memory;
    config.traffic.file = Some(path.clone());
    config.traffic.num_requests = 0;
    let report = run(config);
    fs::remove_file(&path).ok();
    assert!(report.finished);
    assert_eq!(3, report.driver.completed);
    assert_eq!(1, report.driver.writes);
}

#[test]
fn trace_outside_the_memory_is_rejected() {
    let path = scratch_file("far.trace");
    fs::write(&path, "R 0x0\nR 0xffffffffff\n").unwrap();
    let mut config = small_config();
    config.traffic.file = Some(path.clone());
    let err = Simulator::from_config(config).err().unwrap();
    fs::remove_file(&path).ok();
    assert!(format!("{:#}", err).contains("record 2"));
}

#[test]
fn oversized_footprint_is_rejected() {
    let mut config = small_config();
    config.traffic.pattern.footprint = 1 << 40;
    assert!(Simulator::from_config(config).is_err());
}

#[test]
fn periodic_stats_are_written_as_json_lines() {
    let path = scratch_file("stats.jsonl");
    let mut config = small_config();
    config.engine.stats_period = 500;
    config.engine.stats_file = Some(path.clone());
    let report = run(config);
    let text = fs::read_to_string(&path).unwrap();
    fs::remove_file(&path).ok();

    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    // one line per elapsed period plus the final flush
    let expected = report.engine.final_timestamp / 500 + 1;
    assert_eq!(expected as usize, lines.len());
    let last = lines.last().unwrap();
    assert_eq!(report.engine.final_timestamp, last["timestamp"].as_u64().unwrap());
    assert_eq!(300, last["stats"]["driver"]["completed"].as_u64().unwrap());
}

#[test]
fn traffic_typos_are_reported_not_fatal() {
    let mut config = small_config();
    config.traffic.pattern.kind = "rand".to_string();
    let err = Simulator::from_config(config).err().unwrap();
    let message = format!("{:#}", err);
    assert!(message.contains("unsupported traffic pattern kind 'rand'"), "{}", message);

    let mut config = small_config();
    config.traffic.pattern.read_fraction = 1.5;
    let err = Simulator::from_config(config).err().unwrap();
    assert!(format!("{:#}", err).contains("[traffic]"));
}

#[test]
#[should_panic(expected = "offset must be a multiple of the cache block_size")]
fn slow_tier_offset_must_align_to_cache_blocks() {
    let mut config = small_config();
    config.pcm.offset = 64;
    config.traffic.base = 64;
    let _ = Simulator::from_config(config);
}

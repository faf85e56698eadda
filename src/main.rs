//! settlement-engine CLI
//!
//! Compare the two transfer strategies under concurrent load.
//!
//! # Usage
//!
//! ```bash
//! # Two threads, 100 settlements each (the defaults)
//! settlement-engine compare
//!
//! # Heavier contention, JSON output
//! settlement-engine compare --threads 8 --operations 200 --members 3 --format json
//!
//! # Tune retries from a config file
//! settlement-engine compare --config engine.json
//! ```

use log::info;
use serde::Serialize;
use settlement_engine::config::EngineConfig;
use settlement_engine::simulation::contention::{
    compare, Comparison, ContentionConfig, ContentionReport, Recommendation,
};
use settlement_engine::simulation::scenario::ScenarioConfig;
use std::process;

fn print_usage() {
    eprintln!(
        r#"settlement-engine — concurrent expense settlement with pessimistic and optimistic locking

USAGE:
    settlement-engine <COMMAND> [OPTIONS]

COMMANDS:
    compare     Run both strategies under the same load and compare them
    help        Show this message

OPTIONS (compare):
    --threads <N>       Worker threads (default: 2)
    --operations <N>    Settlements per thread (default: 100)
    --members <N>       Members in the generated scenario (default: 4)
    --expenses <N>      Expenses in the generated scenario (default: 20)
    --seed <N>          Seed for the generated scenario (default: random)
    --config <FILE>     JSON engine config (retries, delays, timeouts)
    --format <FORMAT>   Output format: text (default) or json

ENVIRONMENT:
    RUST_LOG            Log filter, e.g. RUST_LOG=debug (default: info)

EXAMPLES:
    settlement-engine compare
    settlement-engine compare --threads 8 --operations 200 --members 3
    settlement-engine compare --config engine.json --format json"#
    );
}

/// JSON output schema for a comparison.
#[derive(Serialize)]
struct ComparisonOutput<'a> {
    pessimistic: &'a ContentionReport,
    optimistic: &'a ContentionReport,
    throughput_diff_percent: f64,
    latency_diff_percent: f64,
    recommendation: Recommendation,
    advice: String,
}

fn parse_number(flag: &str, value: Option<&String>) -> usize {
    value.and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{} requires a number", flag);
        process::exit(1);
    })
}

fn cmd_compare(args: &[String]) {
    let mut contention = ContentionConfig::default();
    let mut scenario = ScenarioConfig::default();
    let mut config_path: Option<String> = None;
    let mut format = "text".to_string();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--threads" => {
                i += 1;
                contention.threads = parse_number("--threads", args.get(i));
            }
            "--operations" => {
                i += 1;
                contention.operations_per_thread = parse_number("--operations", args.get(i));
            }
            "--members" => {
                i += 1;
                scenario.member_count = parse_number("--members", args.get(i)) as u64;
            }
            "--expenses" => {
                i += 1;
                scenario.expense_count = parse_number("--expenses", args.get(i)) as u64;
            }
            "--seed" => {
                i += 1;
                scenario.seed = Some(parse_number("--seed", args.get(i)) as u64);
            }
            "--config" => {
                i += 1;
                config_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--config requires a file path");
                    process::exit(1);
                }));
            }
            "--format" => {
                i += 1;
                format = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--format requires 'text' or 'json'");
                    process::exit(1);
                });
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    if contention.threads == 0 {
        eprintln!("Error: --threads must be at least 1");
        process::exit(1);
    }
    if scenario.member_count < 2 {
        eprintln!("Error: --members must be at least 2");
        process::exit(1);
    }

    let engine = match config_path {
        Some(path) => EngineConfig::from_json_file(&path).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            process::exit(1);
        }),
        None => EngineConfig::default(),
    };
    scenario.lock_timeout = engine.lock_timeout();

    info!(
        "comparing strategies: {} threads x {} operations, {} members, {} expenses",
        contention.threads,
        contention.operations_per_thread,
        scenario.member_count,
        scenario.expense_count
    );
    let comparison = compare(&scenario, &engine, &contention);

    if format == "json" {
        print_json(&comparison);
    } else {
        println!("{}", comparison);
    }
}

fn print_json(comparison: &Comparison) {
    let recommendation = comparison.recommendation();
    let output = ComparisonOutput {
        pessimistic: &comparison.pessimistic,
        optimistic: &comparison.optimistic,
        throughput_diff_percent: comparison.throughput_diff_percent(),
        latency_diff_percent: comparison.latency_diff_percent(),
        recommendation,
        advice: recommendation.to_string(),
    };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing report: {}", e);
            process::exit(1);
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "compare" => cmd_compare(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Strand CLI - run the demo flows and watch the handoffs.

use std::env;
use std::process;
use std::rc::Rc;

use colored::Colorize;
use strand_flow::{
    FlowEvent, FlowReport, Pipeline, PipelineConfig, ScatterConfig, ScatterGather,
};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "scatter" => {
            let producers = parse_arg(&args, 2, 2);
            let batch = parse_arg(&args, 3, 4);
            let threshold = parse_arg(&args, 4, default_scatter_threshold(producers));
            cmd_scatter(producers as usize, batch, threshold);
        }
        "pipeline" => {
            let batch = parse_arg(&args, 2, 4);
            let target = parse_arg(&args, 3, 32);
            cmd_pipeline(batch, target);
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        "version" | "--version" | "-V" => {
            println!("strand 0.1.0");
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        "{} 0.1.0 - cooperative multitasking demos",
        "Strand".bold()
    );
    println!();
    println!("Usage: strand <command> [args]");
    println!();
    println!("Commands:");
    println!("  scatter [producers] [batch] [threshold]");
    println!("                   N producers, round-robin coordinator, one gather");
    println!("                   (defaults: 2 4, threshold 32 per producer)");
    println!("  pipeline [batch] [target]");
    println!("                   One producer feeding one unit-at-a-time consumer");
    println!("                   (defaults: 4 32)");
    println!("  help             Show this help");
    println!("  version          Show version");
}

/// Default threshold scales with the producer count, so the default
/// run always takes the same number of cycles.
fn default_scatter_threshold(producers: u64) -> u64 {
    producers.max(1).saturating_mul(32)
}

fn parse_arg(args: &[String], index: usize, default: u64) -> u64 {
    match args.get(index) {
        None => default,
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                eprintln!("{}: not a number: {}", "error".red().bold(), raw);
                process::exit(1);
            }
        },
    }
}

fn cmd_scatter(producers: usize, batch: u64, threshold: u64) {
    println!(
        "{} {} producer(s), batch {}, threshold {}",
        "scatter".cyan().bold(),
        producers,
        batch,
        threshold
    );
    let config = ScatterConfig::new(producers, batch, threshold);
    let flow = match ScatterGather::with_observer(&config, Rc::new(print_event)) {
        Ok(flow) => flow,
        Err(e) => fail(e),
    };
    match flow.run() {
        Ok(report) => print_report(&report),
        Err(e) => fail(e),
    }
}

fn cmd_pipeline(batch: u64, target: u64) {
    println!(
        "{} batch {}, target {}",
        "pipeline".cyan().bold(),
        batch,
        target
    );
    let config = PipelineConfig::new(batch, target);
    let pipeline = match Pipeline::with_observer(&config, Rc::new(print_event)) {
        Ok(pipeline) => pipeline,
        Err(e) => fail(e),
    };
    match pipeline.run() {
        Ok(report) => print_report(&report),
        Err(e) => fail(e),
    }
}

fn print_event(event: &FlowEvent) {
    match event {
        FlowEvent::Produced {
            producer,
            amount,
            in_flight,
        } => {
            println!(
                "  {} producer-{} published {} (slot now {})",
                "+".green(),
                producer,
                amount,
                in_flight
            );
        }
        FlowEvent::Drained { got, total } => {
            println!("  {} gather drained {} (total {})", "-".yellow(), got, total);
        }
        FlowEvent::Consumed { in_flight, total } => {
            println!(
                "  {} consumed one (slot {}, total {})",
                "-".yellow(),
                in_flight,
                total
            );
        }
        FlowEvent::Finished { total, cycles } => {
            println!(
                "  {} finished at {} after {} cycle(s)",
                "*".blue().bold(),
                total,
                cycles
            );
        }
    }
}

fn print_report(report: &FlowReport) {
    println!(
        "{} total {} in {} cycle(s)",
        "done".green().bold(),
        report.total,
        report.cycles
    );
}

fn fail(error: strand_flow::FlowError) -> ! {
    eprintln!("{}: {}", "error".red().bold(), error);
    process::exit(1);
}

use std::io::{self, Write};
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use pf_components::{
    Inductor, IntegrationMethod, MachineParams, Resistor, RxLoad, Switch, SynchronousMachine,
    VoltageSource,
};
use pf_core::units::{henry, ohm, s, volt, watt};
use pf_core::{Complex, Terminal};
use pf_sim::{
    RealTimeOptions, RealTimeStats, RecordData, SimOptions, SimResult, Simulation,
    SimulationBuilder, SimulationController, StepRecord, VariantSpec,
};
use pf_tasks::ExecutionPolicy;
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(name = "pf-cli")]
#[command(about = "PhasorFlow CLI - dynamic-phasor network simulation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in scenario
    Run {
        scenario: Scenario,
        /// Time step in seconds
        #[arg(long, default_value_t = 1e-3)]
        dt: f64,
        /// End time in seconds (scenario default if omitted)
        #[arg(long)]
        t_end: Option<f64>,
        /// Pace steps to the wall clock
        #[arg(long)]
        realtime: bool,
        /// Worker threads for task layers (0 = one per core, 1 = sequential)
        #[arg(long, default_value_t = 0)]
        threads: usize,
        /// Print every step record as a JSON line
        #[arg(long)]
        json: bool,
        /// In text mode, print every n-th step
        #[arg(long, default_value_t = 50)]
        every: u64,
    },
    /// List built-in scenarios
    Scenarios,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
enum Scenario {
    /// Source, R-L line and a load switched from 1000 Ω to 800 Ω at 0.1 s
    RlLine,
    /// Constant-impedance load with a capacitor bank switched in at 0.15 s
    RxLoad,
    /// Generator on an infinite bus through a line, with a fault from 0.1 s to 0.2 s
    Machine,
}

impl Scenario {
    const ALL: [Scenario; 3] = [Scenario::RlLine, Scenario::RxLoad, Scenario::Machine];

    fn name(self) -> &'static str {
        match self {
            Scenario::RlLine => "rl-line",
            Scenario::RxLoad => "rx-load",
            Scenario::Machine => "machine",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Scenario::RlLine => "10 kV source, 1 Ω + 1 H line, load 1000 Ω -> 800 Ω at t = 0.1 s",
            Scenario::RxLoad => "11 kV feeder, 1 MW / 0.3 Mvar load, 0.4 Mvar capacitor bank at t = 0.15 s",
            Scenario::Machine => "10 MVA generator on an 11 kV bus, bolted fault 0.1 s .. 0.2 s",
        }
    }

    fn default_t_end(self) -> f64 {
        match self {
            Scenario::RlLine | Scenario::RxLoad => 0.3,
            Scenario::Machine => 1.0,
        }
    }

    fn build(self, options: SimOptions) -> SimulationBuilder {
        let omega = options.omega;
        let mut b = SimulationBuilder::new(options);
        match self {
            Scenario::RlLine => {
                b.add_component(VoltageSource::new(
                    "vs",
                    Terminal::Node(0),
                    Terminal::Ground,
                    Complex::new(10_000.0, 0.0),
                ));
                b.add_component(Resistor::new("r_line", Terminal::Node(0), Terminal::Node(1), ohm(1.0)));
                b.add_component(Inductor::new("l_line", Terminal::Node(1), Terminal::Node(2), henry(1.0)));
                b.add_component(Resistor::new("r_load", Terminal::Node(2), Terminal::Ground, ohm(1000.0)));
                b.add_component(Resistor::new("r_load2", Terminal::Node(2), Terminal::Ground, ohm(800.0)));
                b.add_variant("load-1000", VariantSpec::new().deactivate("r_load2"));
                b.add_variant("load-800", VariantSpec::new().deactivate("r_load"));
                b.schedule_switch(0.1, "load-800");
            }
            Scenario::RxLoad => {
                b.add_component(VoltageSource::from_magnitude(
                    "vs",
                    Terminal::Node(0),
                    Terminal::Ground,
                    volt(11_000.0),
                ));
                b.add_component(Resistor::new("r_feeder", Terminal::Node(0), Terminal::Node(1), ohm(0.5)));
                b.add_component(Inductor::new("l_feeder", Terminal::Node(1), Terminal::Node(2), henry(5e-3)));
                b.add_component(RxLoad::new(
                    "load",
                    Terminal::Node(2),
                    watt(1e6),
                    watt(0.3e6),
                    volt(11_000.0),
                ));
                b.add_component(
                    RxLoad::new("cap_bank", Terminal::Node(2), watt(0.0), watt(-0.4e6), volt(11_000.0))
                        .with_method(IntegrationMethod::BackwardEuler),
                );
                b.add_variant("base", VariantSpec::new().deactivate("cap_bank"));
                b.add_variant("compensated", VariantSpec::new());
                b.schedule_switch(0.15, "compensated");
            }
            Scenario::Machine => {
                let bus = 11_000.0;
                let params = MachineParams {
                    emf: volt(12_000.0),
                    reactance: ohm(10.0),
                    rated_power: watt(10e6),
                    inertia: s(3.0),
                    damping: 2.0,
                };
                let x_line = omega * 20e-3;
                let p_mech = 4e6;
                let p_max = params.emf.value * bus / (params.reactance.value + x_line);
                let angle = (p_mech / p_max).clamp(-1.0, 1.0).asin();

                b.add_component(
                    SynchronousMachine::new("gen", Terminal::Node(0), params, watt(p_mech), angle)
                        .with_method(IntegrationMethod::Trapezoidal),
                );
                b.add_component(Inductor::new("l_line", Terminal::Node(0), Terminal::Node(1), henry(20e-3)));
                b.add_component(VoltageSource::new(
                    "bus",
                    Terminal::Node(1),
                    Terminal::Ground,
                    Complex::new(bus, 0.0),
                ));
                b.add_component(Switch::new(
                    "fault",
                    Terminal::Node(0),
                    Terminal::Ground,
                    ohm(1e6),
                    ohm(0.5),
                ));
                b.add_variant("normal", VariantSpec::new());
                b.add_variant("faulted", VariantSpec::new().close("fault"));
                b.schedule_switch(0.1, "faulted");
                b.schedule_switch(0.2, "normal");
            }
        }
        b
    }
}

#[derive(Serialize)]
struct RunSummary<'a> {
    scenario: Scenario,
    options: &'a SimOptions,
    steps: u64,
    wall_s: f64,
    active_variant: u32,
    realtime: Option<RealTimeStats>,
}

#[derive(Serialize)]
struct SummaryLine<'a> {
    summary: RunSummary<'a>,
}

fn main() -> SimResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scenario,
            dt,
            t_end,
            realtime,
            threads,
            json,
            every,
        } => cmd_run(scenario, dt, t_end, realtime, threads, json, every.max(1)),
        Commands::Scenarios => {
            cmd_scenarios();
            Ok(())
        }
    }
}

fn cmd_scenarios() {
    println!("Built-in scenarios:");
    for scenario in Scenario::ALL {
        println!("  {:<8} {}", scenario.name(), scenario.description());
    }
}

fn cmd_run(
    scenario: Scenario,
    dt: f64,
    t_end: Option<f64>,
    realtime: bool,
    threads: usize,
    json: bool,
    every: u64,
) -> SimResult<()> {
    let policy = if threads == 1 {
        ExecutionPolicy::Sequential
    } else {
        ExecutionPolicy::Parallel
    };
    let mut options = SimOptions::new(scenario.name()).with_policy(policy, threads);
    options.dt = dt;
    options.final_time = t_end.unwrap_or_else(|| scenario.default_t_end());
    if realtime {
        options = options.with_realtime(RealTimeOptions::default());
    }

    let mut builder = scenario.build(options);
    builder.add_observer(printer(json, every));
    let sim = builder.build()?;

    if !json {
        println!(
            "Running scenario {} ({} steps, dt = {} s)",
            scenario.name(),
            sim.total_steps(),
            sim.options().dt
        );
    }

    let wall = Instant::now();
    let (sim, stats) = if realtime {
        let ctl = SimulationController::spawn(sim)?;
        ctl.start()?;
        let outcome = ctl.wait();
        let stats = ctl.realtime_stats();
        let sim = ctl.join()?;
        outcome?;
        (sim, Some(stats))
    } else {
        let mut sim = sim;
        sim.run()?;
        sim.release();
        (sim, None)
    };
    let wall_s = wall.elapsed().as_secs_f64();
    info!(scenario = scenario.name(), wall_s, "run complete");

    if json {
        let line = SummaryLine {
            summary: RunSummary {
                scenario,
                options: sim.options(),
                steps: sim.steps_done(),
                wall_s,
                active_variant: sim.active_variant().index(),
                realtime: stats,
            },
        };
        if let Ok(text) = serde_json::to_string(&line) {
            println!("{text}");
        }
    } else {
        print_summary(&sim, wall_s, stats);
    }
    Ok(())
}

fn printer(json: bool, every: u64) -> impl FnMut(&StepRecord) + Send + 'static {
    move |record: &StepRecord| {
        let mut out = io::stdout().lock();
        if json {
            if let Ok(text) = serde_json::to_string(record) {
                let _ = writeln!(out, "{text}");
            }
        } else if record.step % every == 0 {
            let _ = writeln!(out, "{}", format_record(record));
        }
    }
}

fn format_record(record: &StepRecord) -> String {
    let currents: Vec<String> = record
        .values
        .iter()
        .filter(|v| v.name == "i_intf")
        .filter_map(|v| v.value.as_complex().map(|z| format!("{}={:.3}", v.owner, z.norm())))
        .collect();
    format!(
        "  step {:>6}  t = {:>8.4} s  |i| {}",
        record.step,
        record.time,
        currents.join(" ")
    )
}

fn print_summary(sim: &Simulation, wall_s: f64, stats: Option<RealTimeStats>) {
    println!("✓ {} steps in {:.3} s", sim.steps_done(), wall_s);
    let t = sim.timings();
    println!(
        "  avg per step: pre {:.1} µs, solve {:.1} µs, post {:.1} µs",
        t.pre_step.average_seconds() * 1e6,
        t.solve.average_seconds() * 1e6,
        t.post_step.average_seconds() * 1e6
    );
    if let Some(stats) = stats {
        println!(
            "  real time: {} deadline misses, max overrun {:?}",
            stats.deadline_misses, stats.max_overrun
        );
    }

    println!("  final values:");
    let attrs = sim.attrs();
    for id in attrs.logged() {
        let Ok(value) = attrs.snapshot(id) else {
            continue;
        };
        let label = attrs.label(id);
        match RecordData::from_value(&value) {
            Some(RecordData::Complex([re, im])) => {
                let z = Complex::new(re, im);
                println!("    {label:<20} {:>12.4} ∠ {:>8.3}°", z.norm(), z.arg().to_degrees());
            }
            Some(RecordData::Real(v)) => println!("    {label:<20} {v:>12.4}"),
            Some(RecordData::RealVector(v)) => println!("    {label:<20} {v:?}"),
            Some(RecordData::ComplexVector(_)) | None => {}
        }
    }
}

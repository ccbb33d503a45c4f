//! lxt2-record - Write an LXT2 trace from a text script
//!
//! Signals are registered on the calling thread; value changes are then
//! replayed through a [`TraceWorker`].
//!
//! Usage:
//!     lxt2-record stimulus.txt out.lx2
//!     lxt2-record --optimize space --depth 9 stimulus.txt out.lx2
//!     lxt2-record --config writer.json --json stimulus.txt out.lx2
//!
//! Script format, one command per line:
//!
//! ```text
//! // registration
//! var top.clk 1
//! var top.bus 8
//! real top.temp
//! string top.state
//! alias top.bus_view top.bus 7 0
//! // values
//! #0
//! top.clk=0
//! top.bus=00001010
//! #5
//! top.clk=1
//! top.temp=21.5
//! top.state=idle
//! dumpoff
//! #100
//! dumpon
//! flush
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use lxt2_core::{
    Lxt2Error, OptimumMode, SignalFlags, SignalId, SignalKind, Trace, TraceConfig, TraceStats,
    TraceWorker, WorkerConfig,
};
use regex::Regex;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "lxt2-record")]
#[command(about = "Record a scripted signal trace into an LXT2 file")]
#[command(version)]
struct Args {
    /// Script describing signals and value changes
    script: PathBuf,

    /// Output trace file
    output: PathBuf,

    /// Writer configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tuning preset: speed or space
    #[arg(long)]
    optimize: Option<OptimumMode>,

    /// Deflate level 0-9
    #[arg(long)]
    depth: Option<u32>,

    /// Start a new file after this many bytes
    #[arg(long)]
    break_size: Option<u64>,

    /// Only checkpoint the first section
    #[arg(long)]
    no_checkpoint: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output (debug logging)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Error, Debug)]
enum CliError {
    #[error("{path}:{line}: {reason}")]
    Script {
        path: String,
        line: usize,
        reason: String,
    },

    #[error(transparent)]
    Trace(#[from] Lxt2Error),

    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

/// One parsed script line
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Var { name: String, width: u32 },
    Real { name: String },
    Text { name: String },
    Alias { name: String, root: String, msb: i32, lsb: i32 },
    Time(u64),
    Value { name: String, value: String },
    DumpOff,
    DumpOn,
    Flush,
}

struct ScriptParser {
    var: Regex,
    real: Regex,
    text: Regex,
    alias: Regex,
    time: Regex,
    value: Regex,
}

impl ScriptParser {
    fn new() -> Self {
        // Patterns are constant; a failure here is a programming error.
        let compile = |pattern: &str| match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => lxt2_core::error::fatal(&format!("bad script pattern {}: {}", pattern, e)),
        };
        Self {
            var: compile(r"^var\s+(\S+)\s+(\d+)$"),
            real: compile(r"^real\s+(\S+)$"),
            text: compile(r"^string\s+(\S+)$"),
            alias: compile(r"^alias\s+(\S+)\s+(\S+)\s+(-?\d+)\s+(-?\d+)$"),
            time: compile(r"^#(\d+)$"),
            value: compile(r"^([^=\s]+)=(.*)$"),
        }
    }

    /// Parse one line; `Ok(None)` for blanks and comments
    fn parse_line(&self, line: &str) -> Result<Option<Command>, String> {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            return Ok(None);
        }

        let command = match line {
            "dumpoff" => Command::DumpOff,
            "dumpon" => Command::DumpOn,
            "flush" => Command::Flush,
            _ => {
                if let Some(caps) = self.var.captures(line) {
                    let width: u32 = caps[2].parse().map_err(|e| format!("bad width: {}", e))?;
                    if width == 0 {
                        return Err("width must be at least 1".to_string());
                    }
                    Command::Var {
                        name: caps[1].to_string(),
                        width,
                    }
                } else if let Some(caps) = self.real.captures(line) {
                    Command::Real {
                        name: caps[1].to_string(),
                    }
                } else if let Some(caps) = self.text.captures(line) {
                    Command::Text {
                        name: caps[1].to_string(),
                    }
                } else if let Some(caps) = self.alias.captures(line) {
                    Command::Alias {
                        name: caps[1].to_string(),
                        root: caps[2].to_string(),
                        msb: caps[3].parse().map_err(|e| format!("bad msb: {}", e))?,
                        lsb: caps[4].parse().map_err(|e| format!("bad lsb: {}", e))?,
                    }
                } else if let Some(caps) = self.time.captures(line) {
                    Command::Time(caps[1].parse().map_err(|e| format!("bad time: {}", e))?)
                } else if let Some(caps) = self.value.captures(line) {
                    Command::Value {
                        name: caps[1].to_string(),
                        value: caps[2].to_string(),
                    }
                } else {
                    return Err(format!("unrecognized line '{}'", line));
                }
            }
        };
        Ok(Some(command))
    }
}

impl Command {
    fn is_registration(&self) -> bool {
        matches!(
            self,
            Command::Var { .. } | Command::Real { .. } | Command::Text { .. } | Command::Alias { .. }
        )
    }
}

/// Registered names and how their values are posted
type SignalMap = HashMap<String, (SignalId, SignalKind)>;

fn register(trace: &mut Trace, signals: &mut SignalMap, command: &Command) -> Result<(), String> {
    let (name, id) = match command {
        Command::Var { name, width } => {
            let msb = width.saturating_sub(1) as i32;
            (name, trace.add(name, 0, msb, 0, SignalFlags::BITS))
        }
        Command::Real { name } => (name, trace.add(name, 0, 0, 0, SignalFlags::DOUBLE)),
        Command::Text { name } => (name, trace.add(name, 0, 0, 0, SignalFlags::STRING)),
        Command::Alias { name, root, msb, lsb } => (name, trace.alias(root, name, *msb, *lsb)),
        _ => return Ok(()),
    };
    let id = id.map_err(|e| e.to_string())?;
    let kind = trace.signal(id).map(|s| s.kind()).unwrap_or(SignalKind::Bits);
    signals.insert(name.clone(), (id, kind));
    Ok(())
}

fn post(worker: &mut TraceWorker, signals: &SignalMap, command: Command) -> Result<(), String> {
    let posted = match command {
        Command::Time(time) => {
            if time < worker.time() {
                return Err(format!("time {} is before {}", time, worker.time()));
            }
            worker.set_time(time);
            Ok(())
        }
        Command::Value { name, value } => {
            let &(id, kind) = signals
                .get(&name)
                .ok_or_else(|| format!("unknown signal '{}'", name))?;
            match kind {
                SignalKind::Double => {
                    let number: f64 = value
                        .parse()
                        .map_err(|e| format!("bad real value '{}': {}", value, e))?;
                    worker.emit_double(id, number)
                }
                SignalKind::String => worker.emit_string(id, value),
                SignalKind::Bits | SignalKind::Integer => worker.emit_bits(id, value),
            }
        }
        Command::DumpOff => worker.dump_off(),
        Command::DumpOn => worker.dump_on(),
        Command::Flush => worker.flush(),
        _ => return Err("signals must be registered before the first value".to_string()),
    };
    posted.map_err(|e| e.to_string())
}

fn load_config(args: &Args) -> Result<TraceConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => {
            let text = read(path)?;
            serde_json::from_str::<TraceConfig>(&text).map_err(Lxt2Error::from)?
        }
        None => TraceConfig::default(),
    }
    .from_env();

    if let Some(mode) = args.optimize {
        config = config.with_optimum_mode(mode);
    }
    if let Some(depth) = args.depth {
        config = config.with_compression_depth(depth);
    }
    if let Some(bytes) = args.break_size {
        config = config.with_break_size(bytes);
    }
    if args.no_checkpoint {
        config = config.with_checkpoint(false);
    }
    Ok(config)
}

fn read(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })
}

fn run(args: &Args) -> Result<TraceStats, CliError> {
    let config = load_config(args)?;
    let script = read(&args.script)?;
    let script_path = args.script.display().to_string();
    let script_error = |line: usize, reason: String| CliError::Script {
        path: script_path.clone(),
        line,
        reason,
    };

    let parser = ScriptParser::new();
    let mut commands = Vec::new();
    for (idx, line) in script.lines().enumerate() {
        match parser.parse_line(line) {
            Ok(Some(command)) => commands.push((idx + 1, command)),
            Ok(None) => {}
            Err(reason) => return Err(script_error(idx + 1, reason)),
        }
    }

    let mut trace = Trace::create_with_config(&args.output, config)?;
    let mut signals = SignalMap::new();
    let mut commands = commands.into_iter().peekable();
    while let Some((line, command)) = commands.next_if(|(_, c)| c.is_registration()) {
        register(&mut trace, &mut signals, &command).map_err(|reason| script_error(line, reason))?;
    }
    tracing::debug!(signals = signals.len(), "registration complete");

    let mut worker = TraceWorker::spawn(trace, WorkerConfig::default())?;
    for (line, command) in commands {
        post(&mut worker, &signals, command).map_err(|reason| script_error(line, reason))?;
    }
    let trace = worker.finish()?;
    Ok(trace.close()?)
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "lxt2_core=debug" } else { "lxt2_core=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let stats = match run(&args) {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&stats) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing summary: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        println!("Wrote {}", args.output.display());
        println!(
            "  {} signals, {} aliases, last time {}",
            stats.signals, stats.aliases, stats.last_time
        );
        println!(
            "  {} granules in {} sections across {} file(s)",
            stats.granules_flushed, stats.sections_closed, stats.file_parts
        );
        println!(
            "  {} dictionary values, {} change maps",
            stats.dictionary_entries, stats.map_entries
        );
        if stats.io_errors > 0 {
            println!("  {} write errors", stats.io_errors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registration_lines() {
        let parser = ScriptParser::new();
        assert_eq!(
            parser.parse_line("var top.bus 8").unwrap(),
            Some(Command::Var {
                name: "top.bus".to_string(),
                width: 8
            })
        );
        assert_eq!(
            parser.parse_line("alias v top.bus 7 0").unwrap(),
            Some(Command::Alias {
                name: "v".to_string(),
                root: "top.bus".to_string(),
                msb: 7,
                lsb: 0
            })
        );
        assert!(parser.parse_line("var top.bus 0").is_err());
    }

    #[test]
    fn test_parse_values_and_control() {
        let parser = ScriptParser::new();
        assert_eq!(parser.parse_line("  // note").unwrap(), None);
        assert_eq!(parser.parse_line("").unwrap(), None);
        assert_eq!(parser.parse_line("#42").unwrap(), Some(Command::Time(42)));
        assert_eq!(parser.parse_line("dumpoff").unwrap(), Some(Command::DumpOff));
        assert_eq!(
            parser.parse_line("top.state=busy now").unwrap(),
            Some(Command::Value {
                name: "top.state".to_string(),
                value: "busy now".to_string()
            })
        );
        assert!(parser.parse_line("what is this").is_err());
    }

    #[test]
    fn test_script_drives_trace() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("in.txt");
        std::fs::write(
            &script,
            "var a 4\nreal r\n#0\na=0101\nr=1.5\n#10\na=0110\nflush\n",
        )
        .unwrap();
        let args = Args::parse_from([
            "lxt2-record",
            script.to_str().unwrap(),
            dir.path().join("out.lx2").to_str().unwrap(),
        ]);
        let stats = run(&args).unwrap();
        assert_eq!(stats.signals, 2);
        assert_eq!(stats.last_time, 10);
        assert!(stats.sections_closed >= 1);
    }

    #[test]
    fn test_registration_after_values_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("in.txt");
        std::fs::write(&script, "var a 1\n#0\na=1\nvar b 1\n").unwrap();
        let args = Args::parse_from([
            "lxt2-record",
            script.to_str().unwrap(),
            dir.path().join("out.lx2").to_str().unwrap(),
        ]);
        match run(&args) {
            Err(CliError::Script { line, reason, .. }) => {
                assert_eq!(line, 4);
                assert!(reason.contains("registered before the first value"));
            }
            other => panic!("expected script error, got {:?}", other.map(|_| ())),
        }
    }
}

//! stateviz CLI - headless validation, graphs, layouts and test paths

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stateviz::graph::build_graph;
use stateviz::layout::{layout_input, LayeredLayout, LayoutDirection, LayoutEngine, ProcessLayoutEngine};
use stateviz::paths::{shortest_paths, simple_paths, StatePath, TraversalOptions};
use stateviz::{load_definitions, validated, AppConfig, Interpreter, MachineLogic, StatechartDefinition};

const USAGE: &str = "\
stateviz-cli - Statechart tools

Usage:
  stateviz-cli validate <file>
  stateviz-cli graph <file>
  stateviz-cli layout <file> [--lr]
  stateviz-cli paths <file> [--simple] [--max N] [--depth N]

Options:
  --config <file>   JSON config (also STATEVIZ_CONFIG)

Files ending in .json are JSON machine configs, anything else is the DSL.";

struct Args {
    command: String,
    file: PathBuf,
    config: Option<PathBuf>,
    simple: bool,
    lr: bool,
    max: Option<usize>,
    depth: Option<usize>,
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
    let mut positional = Vec::new();
    let mut args = Args {
        command: String::new(),
        file: PathBuf::new(),
        config: None,
        simple: false,
        lr: false,
        max: None,
        depth: None,
    };

    let mut iter = raw.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--simple" => args.simple = true,
            "--lr" => args.lr = true,
            "--max" => args.max = Some(number(iter.next(), "--max")?),
            "--depth" => args.depth = Some(number(iter.next(), "--depth")?),
            "--config" => {
                let path = iter.next().ok_or("--config needs a file")?;
                args.config = Some(PathBuf::from(path));
            }
            other if other.starts_with("--") => return Err(format!("unknown option {}", other)),
            other => positional.push(other.to_string()),
        }
    }

    match positional.as_slice() {
        [command, file] => {
            args.command = command.clone();
            args.file = PathBuf::from(file);
            Ok(args)
        }
        _ => Err("expected a command and a file".to_string()),
    }
}

fn number(value: Option<&String>, flag: &str) -> Result<usize, String> {
    value
        .ok_or_else(|| format!("{} needs a number", flag))?
        .parse()
        .map_err(|_| format!("{} needs a number", flag))
}

fn main() {
    env_logger::init();

    let raw: Vec<String> = env::args().skip(1).collect();
    if raw.is_empty() {
        println!("{}", USAGE);
        return;
    }

    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("❌ {}\n\n{}", message, USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(&args) {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> stateviz::Result<()> {
    let config = AppConfig::load(args.config.as_deref())?;
    let definitions = load(&args.file)?;

    match args.command.as_str() {
        "validate" => {
            for definition in definitions {
                let definition = validated(definition)?;
                println!(
                    "✅ {}: {} states, {} events",
                    definition.id,
                    definition.nodes().len(),
                    definition.events().len()
                );
            }
        }
        "graph" => {
            for definition in definitions {
                print_graph(Arc::new(validated(definition)?))?;
            }
        }
        "layout" => {
            let mut options = config.layout.clone();
            if args.lr {
                options.direction = LayoutDirection::Lr;
            }
            let engine: Box<dyn LayoutEngine> = match config
                .layout_command
                .as_deref()
                .and_then(ProcessLayoutEngine::from_command_line)
            {
                Some(process) => Box::new(process),
                None => Box::new(LayeredLayout::new()),
            };

            for definition in definitions {
                let graph = build_graph(Arc::new(validated(definition)?))?;
                let result = engine.layout(&layout_input(&graph, &options))?;
                let json = serde_json::to_string_pretty(&result).map_err(stateviz::layout::LayoutError::from)?;
                println!("{}", json);
            }
        }
        "paths" => {
            let mut options = TraversalOptions::new();
            options.max_depth = args.depth;
            options.max_paths = args.max;

            for definition in definitions {
                let definition = Arc::new(validated(definition)?);
                let logic = Interpreter::new(definition.clone());
                let initial = logic.initial_snapshot()?;
                let paths = if args.simple {
                    simple_paths(&logic, &initial, &options)?
                } else {
                    shortest_paths(&logic, &initial, &options)?
                };

                println!("{} ({} paths):", definition.id, paths.len());
                for path in &paths {
                    println!("  {}", describe(path));
                }
            }
        }
        other => {
            eprintln!("❌ Unknown command '{}'\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
    Ok(())
}

fn load(file: &Path) -> stateviz::Result<Vec<StatechartDefinition>> {
    let definitions = load_definitions(file)?;
    log::info!("loaded {} machine(s) from {}", definitions.len(), file.display());
    Ok(definitions)
}

fn print_graph(definition: Arc<StatechartDefinition>) -> stateviz::Result<()> {
    let graph = build_graph(definition)?;
    println!("Machine: {}", graph.definition().id);
    for node in graph.all_nodes() {
        let indent = "  ".repeat(node.level + 1);
        let kind = graph.definition().node(node.state).kind;
        println!("{}{} ({:?})", indent, node.id, kind);
    }
    println!("Edges:");
    for edge in graph.all_edges() {
        println!(
            "  {}: {} --> {} : {}",
            edge.id,
            graph.node(edge.source).id,
            graph.node(edge.target).id,
            edge.label.text
        );
    }
    Ok(())
}

fn describe(path: &StatePath) -> String {
    let events: Vec<&str> = path.events().map(|e| e.kind.as_str()).collect();
    let state = path.state.configuration.join(", ");
    if events.is_empty() {
        format!("[{}] (initial)", state)
    } else {
        format!("[{}] <- {}", state, events.join(" -> "))
    }
}

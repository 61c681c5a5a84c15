//! Statechart DSL Parser
//! Parses the textual statechart DSL into machine configurations

use indexmap::IndexMap;
use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::statechart::{
    ActionConfig, GuardConfig, MachineConfig, NodeKind, OneOrMany, StateConfig,
    TransitionConfig, TransitionSpec,
};

#[cfg(test)]
mod tests;

#[derive(Parser)]
#[grammar = "parser/statechart.pest"]
pub struct StatechartParser;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Parse error: {0}")]
    PestError(#[from] pest::error::Error<Rule>),
    #[error("Invalid syntax at line {line}: {message}")]
    SyntaxError { line: usize, message: String },
    #[error("Can't parse \"{0}\" delay")]
    InvalidDuration(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse DSL source code into machine configurations
pub fn parse_machines(source: &str) -> ParseResult<Vec<MachineConfig>> {
    let pairs = StatechartParser::parse(Rule::file, source)?;
    let mut machines = Vec::new();

    for pair in pairs {
        if pair.as_rule() == Rule::file {
            for inner in pair.into_inner() {
                if inner.as_rule() == Rule::machine {
                    machines.push(parse_machine(inner)?);
                }
            }
        }
    }

    log::debug!("parsed {} machine(s) from DSL source", machines.len());
    Ok(machines)
}

/// Parse a duration literal into milliseconds.
///
/// Accepts `"300ms"`, `"2s"`, `"1.5s"`, `".25s"` and bare millisecond counts.
/// At most three fractional digits are allowed on seconds.
pub fn parse_duration(text: &str) -> ParseResult<u64> {
    let invalid = || ParseError::InvalidDuration(text.to_string());
    let text = text.trim();

    if let Some(ms) = text.strip_suffix("ms") {
        return ms.parse::<u64>().map_err(|_| invalid());
    }

    if let Some(seconds) = text.strip_suffix('s') {
        let (whole, fraction) = match seconds.split_once('.') {
            Some((whole, fraction)) => (whole, Some(fraction)),
            None => (seconds, None),
        };

        let whole_ms = if whole.is_empty() {
            0
        } else {
            whole.parse::<u64>().map_err(|_| invalid())? * 1000
        };

        let Some(fraction) = fraction else {
            return Ok(whole_ms);
        };

        if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        // "5" -> 500, "25" -> 250; anything past three digits is >= 1000
        let padded = format!("{:0<3}", fraction);
        let fraction_ms = padded.parse::<u64>().map_err(|_| invalid())?;
        if fraction_ms >= 1000 {
            return Err(invalid());
        }
        return Ok(whole_ms + fraction_ms);
    }

    text.parse::<u64>().map_err(|_| invalid())
}

// ============================================================================
// PAIR HELPERS
// ============================================================================

fn line_of(pair: &Pair<Rule>) -> usize {
    pair.as_span().start_pos().line_col().0
}

fn expect_next<'a>(pairs: &mut Pairs<'a, Rule>, line: usize, what: &str) -> ParseResult<Pair<'a, Rule>> {
    pairs.next().ok_or_else(|| ParseError::SyntaxError {
        line,
        message: format!("expected {}", what),
    })
}

// ============================================================================
// MACHINE / STATE PARSING
// ============================================================================

fn parse_machine(pair: Pair<Rule>) -> ParseResult<MachineConfig> {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let id = expect_next(&mut inner, line, "machine name")?.as_str().to_string();

    let mut machine = MachineConfig::new(id);

    for item in inner {
        match item.as_rule() {
            Rule::delay_decl => {
                let line = line_of(&item);
                let mut parts = item.into_inner();
                let name = expect_next(&mut parts, line, "delay name")?.as_str().to_string();
                let duration = expect_next(&mut parts, line, "delay duration")?;
                machine.delays.insert(name, parse_duration(duration.as_str())?);
            }
            Rule::context_decl => {
                let mut context = match machine.context {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                for entry in item.into_inner() {
                    let line = line_of(&entry);
                    let mut parts = entry.into_inner();
                    let key = expect_next(&mut parts, line, "context key")?.as_str().to_string();
                    let value = parse_literal(expect_next(&mut parts, line, "context value")?)?;
                    context.insert(key, value);
                }
                machine.context = Value::Object(context);
            }
            _ => parse_state_item(item, &mut machine.root)?,
        }
    }

    Ok(machine)
}

fn parse_state_item(item: Pair<Rule>, state: &mut StateConfig) -> ParseResult<()> {
    let line = line_of(&item);

    match item.as_rule() {
        Rule::initial_decl => {
            let mut parts = item.into_inner();
            state.initial = Some(expect_next(&mut parts, line, "initial state")?.as_str().to_string());
        }
        Rule::description_decl => {
            let mut parts = item.into_inner();
            let string = expect_next(&mut parts, line, "description")?;
            state.description = Some(string_contents(string));
        }
        Rule::entry_decl => {
            let list = expect_next(&mut item.into_inner(), line, "entry actions")?;
            append_actions(&mut state.entry, parse_action_list(list)?);
        }
        Rule::exit_decl => {
            let list = expect_next(&mut item.into_inner(), line, "exit actions")?;
            append_actions(&mut state.exit, parse_action_list(list)?);
        }
        Rule::on_decl => {
            let mut parts = item.into_inner();
            let event = expect_next(&mut parts, line, "event name")?.as_str().to_string();
            let tail = expect_next(&mut parts, line, "transition")?;
            push_transition(&mut state.on, event, parse_transition_tail(tail)?);
        }
        Rule::after_decl => {
            let mut parts = item.into_inner();
            let delay_ref = expect_next(&mut parts, line, "delay")?;
            let delay_inner = expect_next(&mut delay_ref.into_inner(), line, "delay")?;
            let key = match delay_inner.as_rule() {
                Rule::duration => parse_duration(delay_inner.as_str())?.to_string(),
                _ => delay_inner.as_str().to_string(),
            };
            let tail = expect_next(&mut parts, line, "transition")?;
            push_transition(&mut state.after, key, parse_transition_tail(tail)?);
        }
        Rule::always_decl => {
            let tail = expect_next(&mut item.into_inner(), line, "transition")?;
            let transition = parse_transition_tail(tail)?;
            state.always = Some(match state.always.take() {
                Some(existing) => {
                    let mut list = existing.into_vec();
                    list.push(transition);
                    OneOrMany::Many(list)
                }
                None => OneOrMany::One(transition),
            });
        }
        Rule::state_decl => {
            let (key, child) = parse_state_decl(item)?;
            if state.states.contains_key(&key) {
                return Err(ParseError::SyntaxError {
                    line,
                    message: format!("state '{}' is declared twice", key),
                });
            }
            state.states.insert(key, child);
        }
        Rule::delay_decl | Rule::context_decl => {
            return Err(ParseError::SyntaxError {
                line,
                message: "delay and context declarations belong at machine level".to_string(),
            });
        }
        _ => {}
    }

    Ok(())
}

fn parse_state_decl(pair: Pair<Rule>) -> ParseResult<(String, StateConfig)> {
    let line = line_of(&pair);
    let mut state = StateConfig::default();
    let mut key = None;

    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::state_kind => {
                state.kind = Some(match item.as_str() {
                    "parallel" => NodeKind::Parallel,
                    "final" => NodeKind::Final,
                    _ => NodeKind::History,
                });
            }
            Rule::ident => key = Some(item.as_str().to_string()),
            Rule::custom_id => {
                state.id = Some(item.as_str().trim_start_matches('#').to_string());
            }
            Rule::state_body => {
                for body_item in item.into_inner() {
                    parse_state_item(body_item, &mut state)?;
                }
            }
            _ => {}
        }
    }

    let key = key.ok_or_else(|| ParseError::SyntaxError {
        line,
        message: "state without a name".to_string(),
    })?;
    Ok((key, state))
}

// ============================================================================
// TRANSITION / ACTION PARSING
// ============================================================================

fn parse_transition_tail(pair: Pair<Rule>) -> ParseResult<TransitionSpec> {
    let mut config = TransitionConfig::default();

    for item in pair.into_inner() {
        let line = line_of(&item);
        match item.as_rule() {
            Rule::guard => {
                let name = expect_next(&mut item.into_inner(), line, "guard name")?;
                config.guard = Some(GuardConfig::Named(name.as_str().to_string()));
            }
            Rule::target_list => {
                let targets: Vec<String> = item.into_inner().map(|t| t.as_str().to_string()).collect();
                config.target = Some(OneOrMany::Many(targets));
            }
            Rule::action_list => {
                config.actions = Some(OneOrMany::Many(parse_action_list(item)?));
            }
            Rule::reenter => config.reenter = true,
            _ => {}
        }
    }

    // Plain `on EV -> target;` keeps the compact config form
    let simple = config.guard.is_none() && config.actions.is_none() && !config.reenter;
    if simple {
        if let Some(OneOrMany::Many(targets)) = &config.target {
            if targets.len() == 1 {
                return Ok(TransitionSpec::Target(targets[0].clone()));
            }
        }
    }

    Ok(TransitionSpec::Full(config))
}

fn parse_action_list(pair: Pair<Rule>) -> ParseResult<Vec<ActionConfig>> {
    pair.into_inner().map(parse_action).collect()
}

fn parse_action(pair: Pair<Rule>) -> ParseResult<ActionConfig> {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let name = expect_next(&mut inner, line, "action name")?.as_str().to_string();

    let Some(arg_list) = inner.next() else {
        return Ok(ActionConfig::Named(name));
    };

    let mut named = Map::new();
    let mut positional = Vec::new();
    for arg in arg_list.into_inner() {
        let line = line_of(&arg);
        let value = expect_next(&mut arg.into_inner(), line, "argument")?;
        match value.as_rule() {
            Rule::named_arg => {
                let mut parts = value.into_inner();
                let key = expect_next(&mut parts, line, "argument name")?.as_str().to_string();
                let literal = parse_literal(expect_next(&mut parts, line, "argument value")?)?;
                named.insert(key, literal);
            }
            Rule::literal => positional.push(parse_literal(value)?),
            _ => positional.push(Value::String(value.as_str().to_string())),
        }
    }

    let params = match (named.is_empty(), positional.is_empty()) {
        (true, true) => Value::Null,
        (false, true) => Value::Object(named),
        (true, false) => Value::Array(positional),
        (false, false) => {
            return Err(ParseError::SyntaxError {
                line,
                message: format!("action '{}' mixes named and positional arguments", name),
            })
        }
    };

    Ok(ActionConfig::Detailed { kind: name, params })
}

fn parse_literal(pair: Pair<Rule>) -> ParseResult<Value> {
    let line = line_of(&pair);
    let value = match pair.as_rule() {
        Rule::literal => expect_next(&mut pair.into_inner(), line, "literal")?,
        _ => pair,
    };

    match value.as_rule() {
        Rule::string => Ok(Value::String(string_contents(value))),
        Rule::boolean => Ok(Value::Bool(value.as_str() == "true")),
        Rule::number => {
            let text = value.as_str();
            if let Ok(int) = text.parse::<i64>() {
                return Ok(Value::from(int));
            }
            text.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| ParseError::SyntaxError {
                    line,
                    message: format!("invalid number '{}'", text),
                })
        }
        _ => Err(ParseError::SyntaxError {
            line,
            message: format!("unexpected literal '{}'", value.as_str()),
        }),
    }
}

fn string_contents(pair: Pair<Rule>) -> String {
    pair.into_inner()
        .next()
        .map(|inner| inner.as_str().to_string())
        .unwrap_or_default()
}

fn append_actions(slot: &mut Option<OneOrMany<ActionConfig>>, actions: Vec<ActionConfig>) {
    let mut list = slot.take().map(OneOrMany::into_vec).unwrap_or_default();
    list.extend(actions);
    *slot = Some(OneOrMany::Many(list));
}

fn push_transition(
    map: &mut IndexMap<String, OneOrMany<TransitionSpec>>,
    key: String,
    transition: TransitionSpec,
) {
    match map.get_mut(&key) {
        Some(existing) => {
            let mut list = std::mem::take(existing).into_vec();
            list.push(transition);
            *existing = OneOrMany::Many(list);
        }
        None => {
            map.insert(key, OneOrMany::One(transition));
        }
    }
}

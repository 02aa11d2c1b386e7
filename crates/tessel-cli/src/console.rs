//! Line commands typed at `tessel run`

use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::anyhow;
use tessel_engine::{DetectParams, Engine, Priority, Value};
use tessel_events::ItemId;
use thiserror::Error;

use crate::sources::{DirectorySources, CONSOLE_OBJECT, CONSOLE_OWNER};

const DEFAULT_TOP: usize = 10;

pub const HELP: &str = "\
Commands:
  touch                       touch the console object
  say <channel> <text>        chat on a channel the scripts may listen to
  post <script> <event> [..]  deliver an event to one script
  reset <script>              reset a script
  stop <script>               stop a script
  suspend <script>            hold a script's events
  resume <script>             release a suspended script
  stats                       engine statistics
  top [n]                     scripts by execution time
  restart                     recompile and restart every script
  save                        save all script state
  enable on|off               enable or disable the engine
  help                        this text
  quit                        shut down

<script> is a file name without extension or an item number.";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Touch,
    Say { channel: i32, text: String },
    Post { script: String, event: String, args: Vec<Value> },
    Reset(String),
    Stop(String),
    Suspend(String),
    Resume(String),
    Stats,
    Top(usize),
    Restart,
    Save,
    Enable(bool),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),
    #[error("'{command}' needs {what}")]
    Missing {
        command: &'static str,
        what: &'static str,
    },
    #[error("'{0}' is not a number")]
    BadNumber(String),
}

fn missing(command: &'static str, what: &'static str) -> ParseCommandError {
    ParseCommandError::Missing { command, what }
}

/// Integer if it parses as one, then float, otherwise a string
pub fn parse_arg(token: &str) -> Value {
    if let Ok(i) = token.parse::<i32>() {
        return Value::Integer(i);
    }
    if let Ok(f) = token.parse::<f64>() {
        return Value::Float(f);
    }
    let unquoted = token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token);
    Value::String(unquoted.to_string())
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let head = tokens.next().ok_or(ParseCommandError::Empty)?;
        let script = |tokens: &mut std::str::SplitWhitespace<'_>, command| {
            tokens
                .next()
                .map(str::to_string)
                .ok_or_else(|| missing(command, "a script"))
        };

        let command = match head.to_ascii_lowercase().as_str() {
            "touch" => Command::Touch,
            "reset" => Command::Reset(script(&mut tokens, "reset")?),
            "stop" => Command::Stop(script(&mut tokens, "stop")?),
            "suspend" => Command::Suspend(script(&mut tokens, "suspend")?),
            "resume" => Command::Resume(script(&mut tokens, "resume")?),
            "stats" => Command::Stats,
            "restart" => Command::Restart,
            "save" => Command::Save,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "say" => {
                let channel = tokens.next().ok_or_else(|| missing("say", "a channel"))?;
                let channel = channel
                    .parse()
                    .map_err(|_| ParseCommandError::BadNumber(channel.to_string()))?;
                let text = tokens.collect::<Vec<_>>().join(" ");
                Command::Say { channel, text }
            }
            "post" => {
                let script = script(&mut tokens, "post")?;
                let event = tokens
                    .next()
                    .ok_or_else(|| missing("post", "an event name"))?
                    .to_string();
                Command::Post {
                    script,
                    event,
                    args: tokens.map(parse_arg).collect(),
                }
            }
            "top" => match tokens.next() {
                Some(n) => Command::Top(
                    n.parse()
                        .map_err(|_| ParseCommandError::BadNumber(n.to_string()))?,
                ),
                None => Command::Top(DEFAULT_TOP),
            },
            "enable" => match tokens.next() {
                Some("on" | "true" | "1") => Command::Enable(true),
                Some("off" | "false" | "0") => Command::Enable(false),
                _ => return Err(missing("enable", "on or off")),
            },
            other => return Err(ParseCommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// What the console should do after a command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Quit,
}

fn resolve(sources: &DirectorySources, script: &str) -> anyhow::Result<ItemId> {
    if let Ok(n) = script.parse::<u64>() {
        return Ok(ItemId(n));
    }
    sources
        .find_by_name(script)
        .ok_or_else(|| anyhow!("no script named '{}'", script))
}

pub fn execute(
    engine: &Engine,
    sources: &DirectorySources,
    command: Command,
) -> anyhow::Result<Reply> {
    let text = match command {
        Command::Touch => {
            let queued = engine.post_object_event(
                CONSOLE_OBJECT,
                "touch_start",
                vec![Value::Integer(1)],
                vec![DetectParams::agent(CONSOLE_OWNER, "Console")],
            )?;
            format!("touched {} script(s)", queued)
        }
        Command::Say { channel, text } => {
            let queued = engine.post_object_event(
                CONSOLE_OBJECT,
                "listen",
                vec![
                    Value::Integer(channel),
                    Value::String("Console".to_string()),
                    Value::Key(CONSOLE_OWNER.to_string()),
                    Value::String(text),
                ],
                Vec::new(),
            )?;
            format!("heard by {} script(s)", queued)
        }
        Command::Post {
            script,
            event,
            args,
        } => {
            let item = resolve(sources, &script)?;
            let outcome = engine.post_event(item, &event, args, Vec::new(), Priority::Normal)?;
            format!("{} -> {:?}", event, outcome)
        }
        Command::Reset(script) => {
            engine.reset(resolve(sources, &script)?)?;
            format!("reset {}", script)
        }
        Command::Stop(script) => {
            if engine.stop(resolve(sources, &script)?) {
                format!("stopping {}", script)
            } else {
                format!("{} is not running", script)
            }
        }
        Command::Suspend(script) => {
            engine.suspend(resolve(sources, &script)?)?;
            format!("suspended {}", script)
        }
        Command::Resume(script) => {
            engine.resume(resolve(sources, &script)?)?;
            format!("resumed {}", script)
        }
        Command::Stats => engine.stats().to_string(),
        Command::Top(n) => {
            let mut out = String::new();
            for score in engine.top_scripts(n) {
                let _ = writeln!(
                    out,
                    "{:>10.3} ms  {} ({})",
                    score.score_ms, score.name, score.item
                );
            }
            if out.is_empty() {
                out.push_str("no scripts");
            }
            out.trim_end().to_string()
        }
        Command::Restart => format!("restarted {} script(s)", engine.restart_all()),
        Command::Save => format!("saved {} script(s)", engine.save_all_states()),
        Command::Enable(enabled) => {
            engine.set_enabled(enabled);
            format!("engine {}", if enabled { "enabled" } else { "disabled" })
        }
        Command::Help => HELP.to_string(),
        Command::Quit => return Ok(Reply::Quit),
    };
    Ok(Reply::Text(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tessel_engine::{EngineConfig, MemoryWorld, SourceProvider, StartParams};

    #[test]
    fn test_parse_commands() {
        assert_eq!("touch".parse(), Ok(Command::Touch));
        assert_eq!("TOP".parse(), Ok(Command::Top(DEFAULT_TOP)));
        assert_eq!("top 3".parse(), Ok(Command::Top(3)));
        assert_eq!("enable off".parse(), Ok(Command::Enable(false)));
        assert_eq!(
            "say 5 open the door".parse(),
            Ok(Command::Say {
                channel: 5,
                text: "open the door".to_string()
            })
        );
        assert_eq!(
            "post door link_message 1 2.5 \"hi\" k".parse(),
            Ok(Command::Post {
                script: "door".to_string(),
                event: "link_message".to_string(),
                args: vec![
                    Value::Integer(1),
                    Value::Float(2.5),
                    Value::String("hi".to_string()),
                    Value::String("k".to_string()),
                ],
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(ParseCommandError::Empty));
        assert_eq!(
            "dance".parse::<Command>(),
            Err(ParseCommandError::Unknown("dance".to_string()))
        );
        assert_eq!(
            "say loud hi".parse::<Command>(),
            Err(ParseCommandError::BadNumber("loud".to_string()))
        );
        assert!(matches!(
            "reset".parse::<Command>(),
            Err(ParseCommandError::Missing { command: "reset", .. })
        ));
    }

    #[test]
    fn test_touch_and_say_reach_console_scripts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("door.lsl"),
            r#"
default
{
    touch_start(integer n) { llSay(0, "touched by " + llDetectedName(0)); }
    listen(integer channel, string name, key id, string message) { llSay(0, "heard " + message); }
}
"#,
        )
        .unwrap();

        let world = Arc::new(MemoryWorld::new());
        world.add_object(CONSOLE_OBJECT, "console", CONSOLE_OWNER);
        let sources = Arc::new(DirectorySources::new(Some(dir.path().to_path_buf()), Vec::new()));
        let engine = Engine::builder()
            .with_engine_config(EngineConfig {
                command_pass_interval_ms: 5,
                ..EngineConfig::default()
            })
            .with_world(world.clone())
            .with_sources(sources.clone())
            .build()
            .unwrap();
        for source in sources.all_sources() {
            engine.start(source, StartParams::default()).unwrap();
        }
        assert!(engine.wait_idle(Duration::from_secs(5)));

        let reply = execute(&engine, &sources, Command::Touch).unwrap();
        assert_eq!(reply, Reply::Text("touched 1 script(s)".to_string()));
        assert!(engine.wait_idle(Duration::from_secs(5)));
        execute(&engine, &sources, "say 5 open".parse().unwrap()).unwrap();
        assert!(engine.wait_idle(Duration::from_secs(5)));
        assert_eq!(world.chat_text(), vec!["touched by Console", "heard open"]);

        assert!(execute(&engine, &sources, "reset window".parse().unwrap()).is_err());
        assert_eq!(
            execute(&engine, &sources, Command::Quit).unwrap(),
            Reply::Quit
        );
        engine.shutdown();
    }
}

//! Operator input parsing for the interactive console.

use anyhow::{bail, Context, Result};
use pilot_core::{DroneCommand, FlightMode, MoveCommand};

/// One line of operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorInput {
    Command(DroneCommand),
    Connect,
    Disconnect,
    Fallback(bool),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  takeoff | land | info
  move <left_right> <forward_backward> <up_down> <yaw>   (each -100..100)
  mode <manual|face_tracking|slam|path_planning|neural>
  record <start|stop>
  connect | disconnect | fallback <on|off>
  status | help | quit";

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<OperatorInput>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    // raw JSON commands, as a front-end would send them
    if line.starts_with('{') {
        let command = DroneCommand::parse(line)?;
        return Ok(Some(OperatorInput::Command(command)));
    }

    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    let input = match verb.as_str() {
        "takeoff" => OperatorInput::Command(DroneCommand::Takeoff),
        "land" => OperatorInput::Command(DroneCommand::Land),
        "info" => OperatorInput::Command(DroneCommand::GetInfo),
        "move" => OperatorInput::Command(DroneCommand::Move(parse_move(&args)?)),
        "mode" => {
            let [name] = args.as_slice() else {
                bail!("usage: mode <name>");
            };
            OperatorInput::Command(DroneCommand::SetMode {
                mode: FlightMode::from(*name),
            })
        }
        "record" => match args.as_slice() {
            ["start"] => OperatorInput::Command(DroneCommand::StartRecording),
            ["stop"] => OperatorInput::Command(DroneCommand::StopRecording),
            _ => bail!("usage: record <start|stop>"),
        },
        "connect" => OperatorInput::Connect,
        "disconnect" => OperatorInput::Disconnect,
        "fallback" => match args.as_slice() {
            ["on"] => OperatorInput::Fallback(true),
            ["off"] => OperatorInput::Fallback(false),
            _ => bail!("usage: fallback <on|off>"),
        },
        "status" => OperatorInput::Status,
        "help" | "?" => OperatorInput::Help,
        "quit" | "exit" => OperatorInput::Quit,
        other => bail!("unknown command '{}', try 'help'", other),
    };
    Ok(Some(input))
}

fn parse_move(args: &[&str]) -> Result<MoveCommand> {
    let [left_right, forward_backward, up_down, yaw] = args else {
        bail!("usage: move <left_right> <forward_backward> <up_down> <yaw>");
    };
    Ok(MoveCommand {
        left_right: parse_axis("left_right", left_right)?,
        forward_backward: parse_axis("forward_backward", forward_backward)?,
        up_down: parse_axis("up_down", up_down)?,
        yaw: parse_axis("yaw", yaw)?,
    })
}

fn parse_axis(name: &str, raw: &str) -> Result<f64> {
    let value: f64 = raw
        .parse()
        .with_context(|| format!("{} must be a number, got '{}'", name, raw))?;
    if !value.is_finite() {
        bail!("{} must be finite", name);
    }
    Ok(value.clamp(-100.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_verbs() {
        assert_eq!(
            parse_line("takeoff").unwrap(),
            Some(OperatorInput::Command(DroneCommand::Takeoff))
        );
        assert_eq!(parse_line("  FALLBACK on ").unwrap(), Some(OperatorInput::Fallback(true)));
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("# comment").unwrap(), None);
    }

    #[test]
    fn parses_move_and_clamps_axes() {
        let input = parse_line("move 10 -250 50 0").unwrap();
        assert_eq!(
            input,
            Some(OperatorInput::Command(DroneCommand::Move(MoveCommand {
                left_right: 10.0,
                forward_backward: -100.0,
                up_down: 50.0,
                yaw: 0.0,
            })))
        );
        assert!(parse_line("move 1 2 3").is_err());
        assert!(parse_line("move a 2 3 4").is_err());
    }

    #[test]
    fn parses_mode_and_recording() {
        assert_eq!(
            parse_line("mode slam").unwrap(),
            Some(OperatorInput::Command(DroneCommand::SetMode {
                mode: FlightMode::Slam
            }))
        );
        assert_eq!(
            parse_line("record stop").unwrap(),
            Some(OperatorInput::Command(DroneCommand::StopRecording))
        );
        assert!(parse_line("record pause").is_err());
    }

    #[test]
    fn accepts_raw_json_and_rejects_unknown_tags() {
        assert_eq!(
            parse_line(r#"{"type":"start_recording"}"#).unwrap(),
            Some(OperatorInput::Command(DroneCommand::StartRecording))
        );
        assert!(parse_line(r#"{"type":"barrel_roll"}"#).is_err());
        assert!(parse_line("barrel_roll").is_err());
    }
}

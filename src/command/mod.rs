//! Translating a decoded [`crate::resp::Value`] into one of the commands
//! this server understands.

use thiserror::Error;

use crate::resp::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Echo(Vec<u8>),
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        px_ms: Option<i64>,
    },
    Get(Vec<u8>),
    Info(Option<Vec<u8>>),
    ReplConf(Vec<Vec<u8>>),
    Psync { replid: Vec<u8>, offset: Vec<u8> },
}

impl Command {
    /// Write commands are the ones a master fans out to attached replicas
    /// Only `SET` qualifies in this command set.
    pub fn is_write(&self) -> bool {
        matches!(self, Command::Set { .. })
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("expected an array of bulk strings")]
    NotACommandArray,

    #[error("wrong number of arguments")]
    WrongArity,

    #[error("unknown command {0:?}")]
    UnsupportedCommand(String),
}

/// Parses a decoded frame into a [`Command`]. The frame must be an array
/// whose first element is the command name; names and the `PX` keyword are
/// matched case-insensitively.
pub fn parse(frame: &Value) -> Result<Command, CommandError> {
    let Value::Array(parts) = frame else {
        return Err(CommandError::NotACommandArray);
    };

    let args: Vec<&[u8]> = parts
        .iter()
        .map(|v| v.as_bulk_string().ok_or(CommandError::NotACommandArray))
        .collect::<Result<_, _>>()?;

    let name = args.first().ok_or(CommandError::NotACommandArray)?;
    let name_upper = String::from_utf8_lossy(name).to_ascii_uppercase();

    match name_upper.as_str() {
        "PING" => Ok(Command::Ping),
        "ECHO" => {
            let msg = args.get(1).ok_or(CommandError::WrongArity)?;
            Ok(Command::Echo(msg.to_vec()))
        }
        "SET" => parse_set(&args),
        "GET" => {
            let key = args.get(1).ok_or(CommandError::WrongArity)?;
            Ok(Command::Get(key.to_vec()))
        }
        "INFO" => Ok(Command::Info(args.get(1).map(|s| s.to_vec()))),
        "REPLCONF" => {
            if args.len() < 2 {
                return Err(CommandError::WrongArity);
            }
            Ok(Command::ReplConf(args[1..].iter().map(|s| s.to_vec()).collect()))
        }
        "PSYNC" => {
            if args.len() != 3 {
                return Err(CommandError::WrongArity);
            }
            Ok(Command::Psync {
                replid: args[1].to_vec(),
                offset: args[2].to_vec(),
            })
        }
        other => Err(CommandError::UnsupportedCommand(other.to_string())),
    }
}

fn parse_set(args: &[&[u8]]) -> Result<Command, CommandError> {
    if args.len() != 3 && args.len() != 5 {
        return Err(CommandError::WrongArity);
    }
    let key = args[1].to_vec();
    let value = args[2].to_vec();

    let px_ms = if args.len() == 5 {
        let keyword = String::from_utf8_lossy(args[3]).to_ascii_uppercase();
        if keyword != "PX" {
            return Err(CommandError::WrongArity);
        }
        let ms: i64 = std::str::from_utf8(args[4])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(CommandError::WrongArity)?;
        Some(ms)
    } else {
        None
    };

    Ok(Command::Set { key, value, px_ms })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(parts: &[&str]) -> Value {
        Value::command_array(parts.iter().map(|s| s.as_bytes().to_vec()))
    }

    #[test]
    fn parses_ping_and_echo() {
        assert_eq!(parse(&frame(&["PING"])).unwrap(), Command::Ping);
        assert_eq!(parse(&frame(&["ping"])).unwrap(), Command::Ping);
        assert_eq!(
            parse(&frame(&["ECHO", "mango"])).unwrap(),
            Command::Echo(b"mango".to_vec())
        );
    }

    #[test]
    fn parses_set_without_and_with_px_case_insensitively() {
        assert_eq!(
            parse(&frame(&["SET", "foo", "bar"])).unwrap(),
            Command::Set {
                key: b"foo".to_vec(),
                value: b"bar".to_vec(),
                px_ms: None
            }
        );
        assert_eq!(
            parse(&frame(&["SET", "k", "v", "px", "100"])).unwrap(),
            Command::Set {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
                px_ms: Some(100)
            }
        );
    }

    #[test]
    fn parses_get_info_replconf_psync() {
        assert_eq!(parse(&frame(&["GET", "foo"])).unwrap(), Command::Get(b"foo".to_vec()));
        assert_eq!(parse(&frame(&["INFO"])).unwrap(), Command::Info(None));
        assert_eq!(
            parse(&frame(&["INFO", "replication"])).unwrap(),
            Command::Info(Some(b"replication".to_vec()))
        );
        assert_eq!(
            parse(&frame(&["REPLCONF", "listening-port", "6380"])).unwrap(),
            Command::ReplConf(vec![b"listening-port".to_vec(), b"6380".to_vec()])
        );
        assert_eq!(
            parse(&frame(&["PSYNC", "?", "-1"])).unwrap(),
            Command::Psync {
                replid: b"?".to_vec(),
                offset: b"-1".to_vec()
            }
        );
    }

    #[test]
    fn rejects_bad_arity_and_unknown_commands() {
        assert!(matches!(parse(&frame(&["GET"])), Err(CommandError::WrongArity)));
        assert!(matches!(
            parse(&frame(&["SET", "k"])),
            Err(CommandError::WrongArity)
        ));
        assert!(matches!(
            parse(&frame(&["FLUSHALL"])),
            Err(CommandError::UnsupportedCommand(_))
        ));
    }

    #[test]
    fn is_write_is_true_only_for_set() {
        assert!(Command::Set { key: vec![], value: vec![], px_ms: None }.is_write());
        assert!(!Command::Ping.is_write());
        assert!(!Command::Get(vec![]).is_write());
    }
}

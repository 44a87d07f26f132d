//! Console commands, parsing and autocomplete logic.

use reqwest::Method;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "get",
    aliases: &["g", "read"],
    usage: "get <path>",
    description: "Read through the cache",
  },
  Command {
    name: "volatile",
    aliases: &["v"],
    usage: "volatile <path>",
    description: "Read, caching with the short TTL",
  },
  Command {
    name: "post",
    aliases: &[],
    usage: "post <path> [json]",
    description: "Create; deferred while offline",
  },
  Command {
    name: "put",
    aliases: &[],
    usage: "put <path> [json]",
    description: "Replace; deferred while offline",
  },
  Command {
    name: "patch",
    aliases: &[],
    usage: "patch <path> [json]",
    description: "Update; deferred while offline",
  },
  Command {
    name: "delete",
    aliases: &["del", "rm"],
    usage: "delete <path>",
    description: "Delete; deferred while offline",
  },
  Command {
    name: "stats",
    aliases: &["s", "cache"],
    usage: "stats",
    description: "Show cached entries",
  },
  Command {
    name: "invalidate",
    aliases: &["inv"],
    usage: "invalidate [pattern]",
    description: "Drop cached entries matching a pattern",
  },
  Command {
    name: "clear",
    aliases: &[],
    usage: "clear",
    description: "Drop all cached entries",
  },
  Command {
    name: "queue",
    aliases: &["q"],
    usage: "queue",
    description: "Show pending deferred operations",
  },
  Command {
    name: "drain",
    aliases: &[],
    usage: "drain",
    description: "Replay deferred operations now",
  },
  Command {
    name: "status",
    aliases: &["net"],
    usage: "status",
    description: "Show network status",
  },
  Command {
    name: "offline",
    aliases: &[],
    usage: "offline",
    description: "Simulate losing connectivity (manual network mode)",
  },
  Command {
    name: "online",
    aliases: &[],
    usage: "online",
    description: "Simulate reconnecting (manual network mode)",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "List commands",
  },
  Command {
    name: "quit",
    aliases: &["exit"],
    usage: "quit",
    description: "Exit cfgshield",
  },
];

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
  Get(String),
  Volatile(String),
  Write {
    method: Method,
    path: String,
    body: Option<Value>,
  },
  Stats,
  Invalidate(Option<String>),
  Clear,
  Queue,
  Drain,
  Status,
  SetOnline(bool),
  Help,
  Quit,
}

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
      continue;
    }

    // Fuzzy match on alias
    if cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((cmd, 5));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Resolve a command word by exact name or alias.
fn resolve(word: &str) -> Option<&'static Command> {
  let word = word.to_lowercase();
  COMMANDS
    .iter()
    .find(|cmd| cmd.name == word || cmd.aliases.contains(&word.as_str()))
}

/// Parse one console line. Errors are messages for the user.
pub fn parse(line: &str) -> Result<Action, String> {
  let line = line.trim();
  let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
  let rest = rest.trim();

  let Some(cmd) = resolve(word) else {
    let suggestions: Vec<&str> = get_suggestions(word).iter().take(3).map(|c| c.name).collect();
    return Err(if suggestions.is_empty() {
      format!("Unknown command '{}'. Type 'help' for a list.", word)
    } else {
      format!("Unknown command '{}'. Did you mean: {}?", word, suggestions.join(", "))
    });
  };

  let require_path = |rest: &str| -> Result<String, String> {
    let path = rest.split_whitespace().next().ok_or_else(|| format!("Usage: {}", cmd.usage))?;
    Ok(normalize_path(path))
  };

  match cmd.name {
    "get" => Ok(Action::Get(require_path(rest)?)),
    "volatile" => Ok(Action::Volatile(require_path(rest)?)),
    "post" | "put" | "patch" | "delete" => {
      let (path, body) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
      let path = require_path(path)?;
      let body = body.trim();
      let body = if body.is_empty() {
        None
      } else {
        Some(serde_json::from_str(body).map_err(|e| format!("Invalid JSON body: {}", e))?)
      };
      let method = match cmd.name {
        "post" => Method::POST,
        "put" => Method::PUT,
        "patch" => Method::PATCH,
        _ => Method::DELETE,
      };
      Ok(Action::Write { method, path, body })
    }
    "stats" => Ok(Action::Stats),
    "invalidate" => Ok(Action::Invalidate(
      rest.split_whitespace().next().map(String::from),
    )),
    "clear" => Ok(Action::Clear),
    "queue" => Ok(Action::Queue),
    "drain" => Ok(Action::Drain),
    "status" => Ok(Action::Status),
    "offline" => Ok(Action::SetOnline(false)),
    "online" => Ok(Action::SetOnline(true)),
    "help" => Ok(Action::Help),
    _ => Ok(Action::Quit),
  }
}

fn normalize_path(path: &str) -> String {
  if path.starts_with('/') {
    path.to_string()
  } else {
    format!("/{}", path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_match() {
    let suggestions = get_suggestions("stats");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "stats");
  }

  #[test]
  fn test_alias_match() {
    let suggestions = get_suggestions("inv");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "invalidate");
  }

  #[test]
  fn test_prefix_match() {
    let suggestions = get_suggestions("vol");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "volatile");
  }

  #[test]
  fn test_fuzzy_match() {
    let suggestions = get_suggestions("lida");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "invalidate");
  }

  #[test]
  fn test_parse_reads() {
    assert_eq!(parse("get /gates"), Ok(Action::Get("/gates".to_string())));
    assert_eq!(parse("g experiments"), Ok(Action::Get("/experiments".to_string())));
    assert_eq!(parse("volatile /metrics"), Ok(Action::Volatile("/metrics".to_string())));
    assert!(parse("get").unwrap_err().starts_with("Usage"));
  }

  #[test]
  fn test_parse_write_with_body() {
    assert_eq!(
      parse(r#"patch /gates/beta {"enabled": true}"#),
      Ok(Action::Write {
        method: Method::PATCH,
        path: "/gates/beta".to_string(),
        body: Some(json!({"enabled": true})),
      })
    );
    assert_eq!(
      parse("rm /gates/beta"),
      Ok(Action::Write {
        method: Method::DELETE,
        path: "/gates/beta".to_string(),
        body: None,
      })
    );
    assert!(parse("post /gates {oops").unwrap_err().starts_with("Invalid JSON"));
  }

  #[test]
  fn test_parse_admin_commands() {
    assert_eq!(parse("invalidate"), Ok(Action::Invalidate(None)));
    assert_eq!(parse("inv /gates"), Ok(Action::Invalidate(Some("/gates".to_string()))));
    assert_eq!(parse("QUIT"), Ok(Action::Quit));
    assert_eq!(parse("offline"), Ok(Action::SetOnline(false)));
  }

  #[test]
  fn test_unknown_command_suggests() {
    let err = parse("sta").unwrap_err();
    assert!(err.contains("Did you mean"));
    assert!(err.contains("stats"));
  }
}

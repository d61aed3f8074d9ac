use std::collections::BTreeMap;

use serde_json::Value;

use super::registry::{
    CommandSpec, KEYED_COMMANDS, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_ARG_COMMANDS,
};

/// One line of shell input resolved to a studio intent.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Command {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

/// `key rest...` where rest keeps shell quoting semantics.
fn split_keyed_arg(arg: &str) -> (String, String) {
    let mut parts = split_args(arg).into_iter();
    let key = parts.next().unwrap_or_default();
    let rest = parts.collect::<Vec<String>>().join(" ");
    (key, rest)
}

pub fn parse_command(text: &str) -> Command {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Command::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let mut parsed = Command::new(action, text);
                parsed
                    .command_args
                    .insert("value".to_string(), Value::String(arg.to_string()));
                return parsed;
            }

            if let Some(action) = find_action(&command, KEYED_COMMANDS) {
                let (key, rest) = split_keyed_arg(arg);
                let mut parsed = Command::new(action, text);
                parsed
                    .command_args
                    .insert("key".to_string(), Value::String(key));
                parsed
                    .command_args
                    .insert("value".to_string(), Value::String(rest));
                return parsed;
            }

            if let Some(action) = find_action(&command, SINGLE_ARG_COMMANDS) {
                let mut parsed = Command::new(action, text);
                parsed.command_args.insert(
                    "key".to_string(),
                    Value::String(split_args(arg).join(" ")),
                );
                return parsed;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Command::new(action, text);
            }

            let mut parsed = Command::new("unknown", text);
            parsed
                .command_args
                .insert("command".to_string(), Value::String(command));
            parsed
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return parsed;
        }
    }

    let mut parsed = Command::new("text", text);
    parsed.prompt = Some(raw_trimmed.to_string());
    parsed
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_command;

    #[test]
    fn plain_text_is_a_prompt() {
        let parsed = parse_command("  a lighthouse in a storm  ");
        assert_eq!(parsed.action, "text");
        assert_eq!(parsed.prompt.as_deref(), Some("a lighthouse in a storm"));
    }

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_command("   ").action, "noop");
    }

    #[test]
    fn raw_arg_commands_keep_the_whole_tail() {
        let tab = parse_command("/tab Storyboard");
        assert_eq!(tab.action, "select_tab");
        assert_eq!(tab.arg("value"), Some("Storyboard"));

        let scene = parse_command("/scene_add The hero, at dusk");
        assert_eq!(scene.action, "add_scene");
        assert_eq!(scene.command_args["value"], json!("The hero, at dusk"));

        let download = parse_command("/download");
        assert_eq!(download.action, "download");
        assert_eq!(download.arg("value"), None);
    }

    #[test]
    fn upload_splits_slot_from_quoted_path() {
        let parsed = parse_command("/upload character1 \"/tmp/hero one.png\"");
        assert_eq!(parsed.action, "upload_asset");
        assert_eq!(parsed.arg("key"), Some("character1"));
        assert_eq!(parsed.arg("value"), Some("/tmp/hero one.png"));
    }

    #[test]
    fn scene_set_takes_number_then_prompt() {
        let parsed = parse_command("/scene_set 2 The orb glows");
        assert_eq!(parsed.action, "set_scene");
        assert_eq!(parsed.arg("key"), Some("2"));
        assert_eq!(parsed.arg("value"), Some("The orb glows"));
    }

    #[test]
    fn single_arg_and_no_arg_commands() {
        assert_eq!(parse_command("/remove source").arg("key"), Some("source"));
        assert_eq!(parse_command("/scene_remove 3").action, "remove_scene");
        assert_eq!(parse_command("/run").action, "submit");
        assert_eq!(parse_command("/exit").action, "quit");
        assert_eq!(parse_command("/NEW_CHAT").action, "new_chat");
    }

    #[test]
    fn unknown_command_keeps_name_and_arg() {
        let parsed = parse_command("/magic foo bar");
        assert_eq!(parsed.action, "unknown");
        assert_eq!(parsed.command_args["command"], json!("magic"));
        assert_eq!(parsed.command_args["arg"], json!("foo bar"));
    }
}

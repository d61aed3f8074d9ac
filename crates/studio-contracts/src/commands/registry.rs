#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "tab",
        action: "select_tab",
    },
    CommandSpec {
        command: "ratio",
        action: "set_aspect_ratio",
    },
    CommandSpec {
        command: "scene_add",
        action: "add_scene",
    },
    CommandSpec {
        command: "download",
        action: "download",
    },
];

/// Commands taking a leading token followed by free text.
pub(crate) const KEYED_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "upload",
        action: "upload_asset",
    },
    CommandSpec {
        command: "scene_set",
        action: "set_scene",
    },
];

pub(crate) const SINGLE_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "remove",
        action: "remove_asset",
    },
    CommandSpec {
        command: "scene_remove",
        action: "remove_scene",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "run",
        action: "submit",
    },
    CommandSpec {
        command: "new_chat",
        action: "new_chat",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const SHELL_HELP_COMMANDS: &[&str] = &[
    "/tab <generate|edit|storyboard|chat>",
    "/ratio <1:1|9:16|16:9|4:3|3:4|original>",
    "/upload <source|reference|character1|character2> <path>",
    "/remove <slot>",
    "/scene_add [prompt]",
    "/scene_set <n> <prompt>",
    "/scene_remove <n>",
    "/run",
    "/download [n|all]",
    "/new_chat",
    "/status",
    "/help",
    "/quit",
];

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use studio_contracts::assets::ImageAsset;
use studio_contracts::commands::{parse_command, Command as ShellCommand, SHELL_HELP_COMMANDS};
use studio_contracts::config::StudioConfig;
use studio_contracts::events::EventWriter;
use studio_contracts::request::{AspectRatio, MAX_REFERENCE_ASSETS};
use studio_contracts::transcript::ChatRole;
use studio_engine::{AssetSlot, GeminiCapability, Studio, StudioSnapshot, Tab};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const LOG_ENV: &str = "STUDIO_LOG";
const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Debug, Parser)]
#[command(name = "studio", version, about = "Creative studio image generation CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Four variations of one prompt.
    Generate(GenerateArgs),
    /// Four edited variants of an uploaded image.
    Edit(EditArgs),
    /// One image per scene, optionally guided by character references.
    Storyboard(StoryboardArgs),
    /// Interactive studio session.
    Shell(ShellArgs),
}

#[derive(Debug, Parser)]
struct OutputArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: AspectRatio,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    reference: Option<PathBuf>,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: AspectRatio,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Parser)]
struct StoryboardArgs {
    #[arg(long = "scene", required = true)]
    scenes: Vec<String>,
    #[arg(long = "character")]
    characters: Vec<PathBuf>,
    #[arg(long, default_value = "16:9")]
    aspect_ratio: AspectRatio,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Parser)]
struct ShellArgs {
    #[arg(long, default_value = "generate")]
    tab: Tab,
    #[command(flatten)]
    output: OutputArgs,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("studio error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .compact()
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = StudioConfig::from_env().context("studio cannot start")?;
    match cli.command {
        Command::Generate(args) => run_generate(&config, args),
        Command::Edit(args) => run_edit(&config, args),
        Command::Storyboard(args) => run_storyboard(&config, args),
        Command::Shell(args) => {
            run_shell(&config, args)?;
            Ok(0)
        }
    }
}

fn open_studio(config: &StudioConfig, output: &OutputArgs) -> Result<Studio> {
    fs::create_dir_all(&output.out)
        .with_context(|| format!("failed to create {}", output.out.display()))?;
    let events_path = output
        .events
        .clone()
        .unwrap_or_else(|| output.out.join("events.jsonl"));
    let session_id = format!("studio-{}", Uuid::new_v4().simple());
    info!(session_id = %session_id, events = %events_path.display(), "studio session opened");
    let events = EventWriter::new(events_path, session_id);
    let capability = Arc::new(GeminiCapability::new(config)?);
    Ok(Studio::new(config, capability, events))
}

fn run_generate(config: &StudioConfig, args: GenerateArgs) -> Result<i32> {
    let mut studio = open_studio(config, &args.output)?;
    studio.select_tab(Tab::Generate);
    studio.set_aspect_ratio(args.aspect_ratio);
    studio.set_prompt(&args.prompt);
    studio.submit_generate()?;
    save_results(&studio, &args.output.out)?;
    Ok(0)
}

fn run_edit(config: &StudioConfig, args: EditArgs) -> Result<i32> {
    let mut studio = open_studio(config, &args.output)?;
    studio.select_tab(Tab::Edit);
    studio.upload_asset(AssetSlot::EditSource, &args.image)?;
    if let Some(reference) = &args.reference {
        studio.upload_asset(AssetSlot::EditReference, reference)?;
    }
    studio.set_aspect_ratio(args.aspect_ratio);
    studio.set_prompt(&args.prompt);
    studio.submit_edit()?;
    save_results(&studio, &args.output.out)?;
    Ok(0)
}

fn run_storyboard(config: &StudioConfig, args: StoryboardArgs) -> Result<i32> {
    if args.characters.len() > MAX_REFERENCE_ASSETS {
        bail!("at most {MAX_REFERENCE_ASSETS} --character images are supported");
    }
    let mut studio = open_studio(config, &args.output)?;
    studio.select_tab(Tab::Storyboard);
    for scene in &args.scenes {
        studio.add_scene(scene);
    }
    for (idx, path) in args.characters.iter().enumerate() {
        studio.upload_asset(AssetSlot::Character(idx), path)?;
    }
    studio.set_aspect_ratio(args.aspect_ratio);
    studio.submit_storyboard()?;
    save_results(&studio, &args.output.out)?;
    Ok(0)
}

fn save_results(studio: &Studio, out: &Path) -> Result<()> {
    for path in studio.download_all(out)? {
        println!("{}", path.display());
    }
    Ok(())
}

fn run_shell(config: &StudioConfig, args: ShellArgs) -> Result<()> {
    let out_dir = args.output.out.clone();
    let mut studio = open_studio(config, &args.output)?;
    studio.subscribe(render_progress);
    studio.select_tab(args.tab);

    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "Studio shell started on the {} tab. Type /help for commands.",
        args.tab
    );

    loop {
        print!("{}> ", studio.tab());
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let command = parse_command(input);
        match command.action.as_str() {
            "noop" => {}
            "quit" => break,
            "help" => println!("Commands: {}", SHELL_HELP_COMMANDS.join("  ")),
            "status" => print_status(&studio.snapshot()),
            "text" => handle_text(&mut studio, command.prompt.as_deref().unwrap_or("")),
            "unknown" => {
                let name = command.arg("command").unwrap_or("");
                println!("Unknown command /{name}. Type /help for commands.");
            }
            _ => {
                if let Err(err) = handle_command(&mut studio, &command, &out_dir) {
                    println!("Error: {err:#}");
                }
            }
        }
    }
    Ok(())
}

fn handle_command(studio: &mut Studio, command: &ShellCommand, out_dir: &Path) -> Result<()> {
    match command.action.as_str() {
        "select_tab" => {
            let tab = parse_arg::<Tab>(command.arg("value"), "/tab needs a tab name")?;
            studio.select_tab(tab);
            println!("Switched to {tab}.");
        }
        "set_aspect_ratio" => {
            let ratio = parse_arg::<AspectRatio>(command.arg("value"), "/ratio needs a ratio")?;
            studio.set_aspect_ratio(ratio);
            println!("Aspect ratio set to {ratio}.");
        }
        "upload_asset" => {
            let slot = parse_arg::<AssetSlot>(command.arg("key"), "/upload needs a slot")?;
            let Some(path) = command.arg("value") else {
                bail!("/upload needs a file path");
            };
            studio.upload_asset(slot, Path::new(path))?;
            println!("Uploaded {path} as {slot}.");
        }
        "remove_asset" => {
            let slot = parse_arg::<AssetSlot>(command.arg("key"), "/remove needs a slot")?;
            studio.remove_asset(slot)?;
            println!("Cleared {slot}.");
        }
        "add_scene" => {
            studio.add_scene(command.arg("value").unwrap_or(""));
            println!("{} scene(s).", studio.inputs().scenes.len());
        }
        "set_scene" => {
            let index = scene_index(command.arg("key"))?;
            studio.set_scene(index, command.arg("value").unwrap_or(""))?;
            println!("Scene {} updated.", index + 1);
        }
        "remove_scene" => {
            let index = scene_index(command.arg("key"))?;
            studio.remove_scene(index)?;
            println!("{} scene(s).", studio.inputs().scenes.len());
        }
        "submit" => {
            studio.submit_current()?;
            print_results(studio.results());
        }
        "download" => match command.arg("value") {
            None | Some("all") => {
                for path in studio.download_all(out_dir)? {
                    println!("Saved {}", path.display());
                }
            }
            Some(number) => {
                let index = number
                    .parse::<usize>()
                    .ok()
                    .and_then(|number| number.checked_sub(1))
                    .with_context(|| format!("'{number}' is not a result number"))?;
                let path = studio.download(index, out_dir)?;
                println!("Saved {}", path.display());
            }
        },
        "new_chat" => {
            studio.new_chat();
            println!("Started a new chat.");
        }
        other => bail!("unhandled shell action {other}"),
    }
    Ok(())
}

/// Plain text means whatever the current tab expects.
fn handle_text(studio: &mut Studio, text: &str) {
    match studio.tab() {
        Tab::Generate | Tab::Edit => {
            studio.set_prompt(text);
            match studio.submit_current() {
                Ok(_) => print_results(studio.results()),
                Err(err) => println!("Error: {err}"),
            }
        }
        Tab::Storyboard => {
            studio.add_scene(text);
            println!(
                "Scene {} added. /run to render the storyboard.",
                studio.inputs().scenes.len()
            );
        }
        Tab::Chat => {
            if !studio.submit_chat_message(text) {
                println!("Still waiting for the previous reply.");
                return;
            }
            let snapshot = studio.snapshot();
            if let Some(reply) = snapshot
                .transcript
                .last()
                .filter(|message| message.role == ChatRole::Assistant)
            {
                println!("assistant> {}", reply.text);
            }
        }
    }
}

fn render_progress(snapshot: &StudioSnapshot) {
    if snapshot.loading {
        println!("Working...");
    }
}

fn print_results(results: &[ImageAsset]) {
    for asset in results {
        let size = asset
            .dimensions()
            .map(|(width, height)| format!("{width}x{height}"))
            .unwrap_or_else(|| "?".to_string());
        println!(
            "  [{}] {} {} ({})",
            asset.index + 1,
            asset.file_name(),
            size,
            asset.fingerprint()
        );
    }
    if !results.is_empty() {
        println!("/download [n] to save.");
    }
}

fn print_status(snapshot: &StudioSnapshot) {
    let inputs = &snapshot.inputs;
    println!("tab: {}", snapshot.tab);
    println!("ratio: {}", inputs.aspect_ratio);
    println!("prompt: {}", inputs.prompt);
    for (idx, scene) in inputs.scenes.iter().enumerate() {
        println!("scene {}: {}", idx + 1, scene);
    }
    let slots = [
        AssetSlot::EditSource,
        AssetSlot::EditReference,
        AssetSlot::Character(0),
        AssetSlot::Character(1),
    ];
    for slot in slots {
        if let Some(upload) = inputs.slot(slot) {
            println!("{slot}: {}", upload.path.display());
        }
    }
    println!("results: {}", snapshot.results.len());
    println!(
        "chat: {:?}, {} message(s)",
        snapshot.chat_state,
        snapshot.transcript.len()
    );
    if let Some(error) = &snapshot.error {
        println!("error: {error}");
    }
}

fn parse_arg<T>(value: Option<&str>, missing: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let Some(value) = value else {
        bail!("{missing}");
    };
    value.parse::<T>().map_err(anyhow::Error::msg)
}

/// Shell scene numbers are 1-based.
fn scene_index(value: Option<&str>) -> Result<usize> {
    let Some(value) = value else {
        bail!("a scene number is required");
    };
    value
        .parse::<usize>()
        .ok()
        .and_then(|number| number.checked_sub(1))
        .with_context(|| format!("'{value}' is not a scene number"))
}
